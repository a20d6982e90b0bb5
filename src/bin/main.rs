//! TFT demo
//! ========================================
//! source ~/export-esp.sh
//! cargo run --release --features esp32
//! ========================================
//!
//! Brings up the display and touch controller on the shared SPI host,
//! paints a few bars, then prints raw touch samples and marks each touch on
//! screen.

//% CHIPS: esp32
//% FEATURES: esp-hal/unstable

#![no_std]
#![no_main]

// Define the application description, which is placed in a special section of the binary.
// This is used by the bootloader to verify the application.
esp_bootloader_esp_idf::esp_app_desc!();

use esp32_tftspi::{
    display::touch,
    gpio::EspGpio,
    lock::PinLockTable,
    regs::Mmio,
    sched::CriticalSectionScheduler,
    Controller, SpiBus, Tft, TftPins,
};

use esp_backtrace as _;
use esp_hal::{delay::Delay, main, Config};

use embedded_graphics::{
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
};
use embedded_hal::delay::DelayNs;
use log::{info, warn};

extern crate alloc;

// Poll period for the touch loop (milliseconds)
const TOUCH_POLL_MS: u32 = 20;
// Pressure (Z1) above which the panel counts as touched
const TOUCH_Z_MIN: u16 = 100;

#[main]
fn main() -> ! {
    let _peripherals = esp_hal::init(Config::default());

    // read-back buffers come from here
    esp_alloc::heap_allocator!(size: 32 * 1024);

    esp_println::logger::init_logger(log::LevelFilter::Info);

    // SAFETY: this is the only code touching the SPI hosts and the GPIO matrix.
    let (regs, gpio_regs) = unsafe { (Mmio::steal(), Mmio::steal()) };
    let bus = SpiBus::new(regs, EspGpio::new(gpio_regs), CriticalSectionScheduler::new());

    let mut locks = PinLockTable::new();
    let mut tft = Tft::new(bus, Delay::new(), TftPins::default());

    if let Err(e) = tft.configure(&mut locks) {
        panic!("tft setup failed: {}", e);
    }
    if let Err(e) = tft.init(Controller::Ili9341) {
        panic!("tft init failed: {}", e);
    }

    // -------------------- Test pattern --------------------
    let bars = [Rgb565::RED, Rgb565::GREEN, Rgb565::BLUE, Rgb565::WHITE];
    let bar_h = tft.height() as u32 / bars.len() as u32;
    for (i, color) in bars.iter().enumerate() {
        let area = Rectangle::new(Point::new(0, (i as u32 * bar_h) as i32), Size::new(tft.width() as u32, bar_h));
        if let Err(e) = area.into_styled(PrimitiveStyle::with_fill(*color)).draw(&mut tft) {
            warn!("fill failed: {}", e);
        }
    }

    match tft.read_pixel(10, 10) {
        Ok(c) => info!("pixel (10,10) reads back as {:04x}", c.into_storage()),
        Err(e) => warn!("read back failed: {}", e),
    }

    // -------------------- Touch loop --------------------
    let mut delay = Delay::new();
    loop {
        let sample = tft
            .read_touch_sample(touch::Z1)
            .and_then(|z| Ok((z, tft.read_touch_sample(touch::X)?, tft.read_touch_sample(touch::Y)?)));

        match sample {
            Ok((z, x, y)) if z > TOUCH_Z_MIN => {
                info!("touch x={} y={} z={}", x, y, z);
                // 12-bit raw values scaled to the panel, no calibration
                let px = (x as u32 * tft.width() as u32 / 4096) as i32;
                let py = (y as u32 * tft.height() as u32 / 4096) as i32;
                let dot = Rectangle::with_center(Point::new(px, py), Size::new(5, 5));
                if let Err(e) = tft.fill_solid(&dot, Rgb565::BLACK) {
                    warn!("draw failed: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("touch read failed: {}", e),
        }

        delay.delay_ms(TOUCH_POLL_MS);
    }
}
