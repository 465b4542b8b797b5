#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]

extern crate alloc;

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use bootloader_api::info::PixelFormat;
use core::panic::PanicInfo;

#[allow(deprecated)]
pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config.kernel_stack_size = 512 * 1024; // 512 KiB (default 80 KiB is too small)
    config.frame_buffer.minimum_framebuffer_height = Some(720);
    config.frame_buffer.minimum_framebuffer_width = Some(1280);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

/// Write a byte directly to the serial port (COM1 at 0x3F8).
/// No initialization needed for basic QEMU serial — just write.
fn serial_byte(b: u8) {
    unsafe {
        x86_64::instructions::port::Port::new(0x3F8).write(b);
    }
}

fn serial_str(s: &str) {
    for b in s.bytes() {
        serial_byte(b);
    }
}

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    // Absolute first thing: write directly to serial port
    serial_str("KERNEL ENTRY\n");

    // Init serial properly
    aegis::serial::init();
    aegis::serial_println!("Serial initialized");

    // Initialize framebuffer
    if let Some(fb) = boot_info.framebuffer.as_mut() {
        let info = fb.info();
        let fb_info = aegis::framebuffer::FramebufferInfo {
            width: info.width,
            height: info.height,
            stride: info.stride,
            bytes_per_pixel: info.bytes_per_pixel,
            is_bgr: matches!(info.pixel_format, PixelFormat::Bgr),
        };
        let w = info.width;
        let h = info.height;
        aegis::serial_println!(
            "Framebuffer: {}x{}, {} bpp, {:?}",
            w, h, info.bytes_per_pixel, info.pixel_format
        );
        aegis::framebuffer::init(fb.buffer_mut(), fb_info);
        aegis::console::init(w, h);
        aegis::serial_println!("Framebuffer console initialized");
    } else {
        aegis::serial_println!("WARNING: No framebuffer available");
    }

    // VGA output (now goes to both framebuffer and serial)
    aegis::println!("Booting Aegis...");
    aegis::serial_println!("VGA print done");

    // Init GDT, IDT, PICs
    aegis::init();
    aegis::serial_println!("GDT, IDT, PICs initialized");

    // Set up paging and heap
    let phys_mem_offset = x86_64::VirtAddr::new(
        boot_info
            .physical_memory_offset
            .into_option()
            .expect("physical_memory_offset not available"),
    );

    let mut mapper = unsafe { aegis::memory::init(phys_mem_offset) };
    let mut frame_allocator =
        unsafe { aegis::memory::BootInfoFrameAllocator::init(&boot_info.memory_regions) };

    aegis::allocator::init_heap(&mut mapper, &mut frame_allocator)
        .expect("heap initialization failed");
    aegis::serial_println!("Heap initialized");

    aegis::filesystem::init();
    aegis::serial_println!("Filesystem initialized");

    aegis::interrupts::init_pit();
    aegis::serial_println!("PIT configured at 100 Hz");

    aegis::task::process::init();
    aegis::serial_println!("Process table initialized");

    aegis::task::scheduler::init();

    aegis::println!("All subsystems initialized.");

    let mut executor = aegis::task::executor::Executor::new();
    executor.spawn_process(
        alloc::string::String::from("shell"),
        aegis::shell::run(),
        None,
    );
    executor.run();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    aegis::println!("{}", info);
    aegis::serial_println!("{}", info);
    aegis::hlt_loop()
}
