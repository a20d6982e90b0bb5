//! TFT display protocol (ILI9341 / ST7735 family) on top of the shared SPI bus.
//
// - Display and touch controller sit on the same host as two units.
// - D/C is a plain GPIO, switched between the command and data phases once
//   the previous phase has left the shift register.
// - Pixels go out RGB565, high byte first.

use alloc::vec::Vec;

use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use embedded_hal::delay::DelayNs;

use crate::bus::SpiBus;
use crate::error::{Error, Result};
use crate::gpio::Gpio;
use crate::lock::PinLock;
use crate::regs::Registers;
use crate::sched::{Scheduler, Section};
use crate::transfer::{wire16, ColorSource, Engine};

/// Controller commands shared by the ILI9341 and ST7735.
pub mod cmd {
    pub const NOP: u8 = 0x00;
    pub const SWRESET: u8 = 0x01;
    pub const SLPIN: u8 = 0x10;
    pub const SLPOUT: u8 = 0x11;
    pub const PTLON: u8 = 0x12;
    pub const NORON: u8 = 0x13;
    pub const INVOFF: u8 = 0x20;
    pub const INVON: u8 = 0x21;
    pub const GAMMASET: u8 = 0x26;
    pub const DISPOFF: u8 = 0x28;
    pub const DISPON: u8 = 0x29;
    pub const CASET: u8 = 0x2A;
    pub const PASET: u8 = 0x2B;
    pub const RAMWR: u8 = 0x2C;
    pub const RAMRD: u8 = 0x2E;
    pub const PTLAR: u8 = 0x30;
    pub const MADCTL: u8 = 0x36;
    pub const COLMOD: u8 = 0x3A;
    pub const FRMCTR1: u8 = 0xB1;
    pub const FRMCTR2: u8 = 0xB2;
    pub const FRMCTR3: u8 = 0xB3;
    pub const INVCTR: u8 = 0xB4;
    pub const DFUNCTR: u8 = 0xB6;
    pub const PWCTR1: u8 = 0xC0;
    pub const PWCTR2: u8 = 0xC1;
    pub const PWCTR3: u8 = 0xC2;
    pub const PWCTR4: u8 = 0xC3;
    pub const PWCTR5: u8 = 0xC4;
    pub const VMCTR1: u8 = 0xC5;
    pub const VMCTR2: u8 = 0xC7;
    pub const GMCTRP1: u8 = 0xE0;
    pub const GMCTRN1: u8 = 0xE1;
}

/// Touch controller channel commands (XPT2046 style, 12-bit).
pub mod touch {
    pub const X: u8 = 0xD0;
    pub const Y: u8 = 0x90;
    pub const Z1: u8 = 0xB0;
    pub const Z2: u8 = 0xC0;
}

/// Wiring of a TFT module with a touch controller on the same SPI lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TftPins {
    /// Unit number of the display controller.
    pub disp_unit: u8,
    /// Unit number of the touch controller, same host as the display.
    pub touch_unit: u8,
    pub miso: u8,
    pub mosi: u8,
    pub clk: u8,
    pub cs: u8,
    /// Touch chip select, 0 when there is no touch controller.
    pub tcs: u8,
    pub dc: u8,
    pub rst: Option<u8>,
    /// Active low.
    pub backlight: Option<u8>,
}

impl Default for TftPins {
    fn default() -> Self {
        crate::wiring::TFT_PINS
    }
}

// Display unit: mode 0, 20 MHz, write only
const DISP_MODE: u8 = 0;
const DISP_SPEED_KHZ: u32 = 20_000;
// Touch unit: mode 2, 2.5 MHz
const TOUCH_MODE: u8 = 2;
const TOUCH_SPEED_KHZ: u32 = 2_500;

// Wait for the previous phase to finish, then drive D/C
#[inline(always)]
fn phase<R: Registers, G: Gpio>(eng: &mut Engine<'_, R>, gpio: &mut G, dc: u8, data: bool) -> Result<()> {
    eng.wait_idle()?;
    gpio.set_level(dc, data);
    Ok(())
}

#[inline(always)]
fn command<R: Registers, G: Gpio>(eng: &mut Engine<'_, R>, gpio: &mut G, dc: u8, op: u8) -> Result<()> {
    phase(eng, gpio, dc, false)?;
    eng.write_byte(op);
    Ok(())
}

/// CASET/PASET payload `[a_hi, a_lo, b_hi, b_lo]` as one transfer word.
#[inline(always)]
pub const fn window_word(a: u16, b: u16) -> u32 {
    let [a_hi, a_lo] = a.to_be_bytes();
    let [b_hi, b_lo] = b.to_be_bytes();
    u32::from_le_bytes([a_hi, a_lo, b_hi, b_lo])
}

#[cfg_attr(feature = "esp32", esp_hal::ram)]
fn address_window<R: Registers, G: Gpio>(
    eng: &mut Engine<'_, R>,
    gpio: &mut G,
    dc: u8,
    (x1, y1, x2, y2): (u16, u16, u16, u16),
) -> Result<()> {
    command(eng, gpio, dc, cmd::CASET)?;
    phase(eng, gpio, dc, true)?;
    eng.write_raw(window_word(x1, x2), 32);

    command(eng, gpio, dc, cmd::PASET)?;
    phase(eng, gpio, dc, true)?;
    eng.write_raw(window_word(y1, y2), 32);
    Ok(())
}

/// Decode one `[r, g, b]` group read back from GRAM.
#[inline]
pub fn decode_rgb(rgb: &[u8]) -> Rgb565 {
    let (r, g, b) = match *rgb {
        [r, g, b, ..] => (r as u16, g as u16, b as u16),
        _ => (0, 0, 0),
    };
    Rgb565::from(RawU16::new(((r & 0xF8) << 8) | ((g & 0xFC) << 3) | (b >> 3)))
}

/// TFT display and touch controller sharing one SPI host.
pub struct Tft<R, G, S, D> {
    pub(crate) bus: SpiBus<R, G, S>,
    pub(crate) delay: D,
    pub(crate) pins: TftPins,
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) col_start: u16,
    pub(crate) row_start: u16,
}

impl<R, G, S, D> Tft<R, G, S, D>
where
    R: Registers,
    G: Gpio,
    S: Scheduler,
    D: DelayNs,
{
    pub fn new(bus: SpiBus<R, G, S>, delay: D, pins: TftPins) -> Self {
        Self {
            bus,
            delay,
            pins,
            width: 320,
            height: 240,
            col_start: 0,
            row_start: 0,
        }
    }

    pub fn release(self) -> (SpiBus<R, G, S>, D) {
        (self.bus, self.delay)
    }

    pub fn bus(&mut self) -> &mut SpiBus<R, G, S> {
        &mut self.bus
    }

    pub fn pins(&self) -> &TftPins {
        &self.pins
    }

    #[inline]
    pub fn width(&self) -> u16 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn set_size(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
    }

    /// Controller column/row of pixel (0, 0).
    pub fn set_offsets(&mut self, col_start: u16, row_start: u16) {
        self.col_start = col_start;
        self.row_start = row_start;
    }

    /// Set up both units and the control pins.
    pub fn configure<L: PinLock>(&mut self, lock: &mut L) -> Result<()> {
        let p = self.pins;
        let bus = &mut self.bus;

        bus.configure_pins(p.disp_unit, p.miso, p.mosi, p.clk, p.cs)?;
        bus.gpio_mut().set_output(p.dc);
        bus.init(p.disp_unit, true, lock)?;
        bus.set_mode(p.disp_unit, DISP_MODE)?;
        bus.set_speed(p.disp_unit, DISP_SPEED_KHZ)?;
        bus.set_duplex(p.disp_unit, false)?;

        if p.tcs != 0 {
            bus.configure_pins(p.touch_unit, p.miso, p.mosi, p.clk, p.tcs)?;
            bus.init(p.touch_unit, true, lock)?;
            bus.set_mode(p.touch_unit, TOUCH_MODE)?;
            bus.set_speed(p.touch_unit, TOUCH_SPEED_KHZ)?;
            bus.set_duplex(p.touch_unit, false)?;
        }

        if let Some(rst) = p.rst {
            bus.gpio_mut().set_output(rst);
            bus.gpio_mut().set_level(rst, true);
        }
        if let Some(bl) = p.backlight {
            bus.gpio_mut().set_output(bl);
        }
        Ok(())
    }

    // Display transaction in `section`, with the D/C pin at hand
    fn disp<T>(
        &mut self,
        section: Section,
        f: impl FnOnce(&mut Engine<'_, R>, &mut G, u8) -> Result<T>,
    ) -> Result<T> {
        let (unit, dc) = (self.pins.disp_unit, self.pins.dc);
        self.bus.transaction_in(unit, section, |eng, gpio| f(eng, gpio, dc))
    }

    fn window(&self, x1: u16, y1: u16, x2: u16, y2: u16) -> (u16, u16, u16, u16) {
        (
            x1.wrapping_add(self.col_start),
            y1.wrapping_add(self.row_start),
            x2.wrapping_add(self.col_start),
            y2.wrapping_add(self.row_start),
        )
    }

    pub fn send_command(&mut self, op: u8) -> Result<()> {
        self.disp(Section::Interrupts, |eng, gpio, dc| command(eng, gpio, dc, op))
    }

    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.disp(Section::Interrupts, |eng, gpio, dc| {
            phase(eng, gpio, dc, true)?;
            eng.write_bytes(data)
        })
    }

    pub fn set_address_window(&mut self, x1: u16, y1: u16, x2: u16, y2: u16) -> Result<()> {
        let win = self.window(x1, y1, x2, y2);
        self.disp(Section::Tasks, |eng, gpio, dc| address_window(eng, gpio, dc, win))
    }

    pub fn draw_pixel(&mut self, x: u16, y: u16, color: Rgb565) -> Result<()> {
        let win = self.window(x, y, x.wrapping_add(1), y.wrapping_add(1));
        self.disp(Section::Interrupts, |eng, gpio, dc| {
            address_window(eng, gpio, dc, win)?;
            command(eng, gpio, dc, cmd::RAMWR)?;
            phase(eng, gpio, dc, true)?;
            eng.write_raw(wire16(color.into_storage()), 16);
            Ok(())
        })
    }

    fn stream(&mut self, win: Option<(u16, u16, u16, u16)>, src: ColorSource<'_>) -> Result<()> {
        self.disp(Section::Tasks, |eng, gpio, dc| {
            if let Some(win) = win {
                address_window(eng, gpio, dc, win)?;
            }
            command(eng, gpio, dc, cmd::RAMWR)?;
            phase(eng, gpio, dc, true)?;
            eng.write_colors(src)
        })
    }

    /// Write one pixel at the controller's current GRAM position.
    pub fn push_pixel(&mut self, color: Rgb565) -> Result<()> {
        self.push_pixels(&[color])
    }

    /// Write `color` `count` times into the current window.
    pub fn push_pixels_repeated(&mut self, color: Rgb565, count: usize) -> Result<()> {
        self.stream(None, ColorSource::Repeated { color: color.into_storage(), count })
    }

    /// Write `pixels` into the current window.
    pub fn push_pixels(&mut self, pixels: &[Rgb565]) -> Result<()> {
        self.stream(None, ColorSource::Colors(pixels))
    }

    /// Set the window and fill it with `count` pixels of `color`, as one
    /// indivisible sequence.
    pub fn fill_window(&mut self, x1: u16, y1: u16, x2: u16, y2: u16, color: Rgb565, count: usize) -> Result<()> {
        let win = self.window(x1, y1, x2, y2);
        self.stream(Some(win), ColorSource::Repeated { color: color.into_storage(), count })
    }

    /// Set the window and write `pixels` into it, as one indivisible sequence.
    pub fn write_window(&mut self, x1: u16, y1: u16, x2: u16, y2: u16, pixels: &[Rgb565]) -> Result<()> {
        let win = self.window(x1, y1, x2, y2);
        self.stream(Some(win), ColorSource::Colors(pixels))
    }

    /// Same as [`write_window`](Self::write_window) for raw RGB565 values.
    pub fn write_window_raw(&mut self, x1: u16, y1: u16, x2: u16, y2: u16, pixels: &[u16]) -> Result<()> {
        let win = self.window(x1, y1, x2, y2);
        self.stream(Some(win), ColorSource::Pixels(pixels))
    }

    pub fn read_pixel(&mut self, x: u16, y: u16) -> Result<Rgb565> {
        let win = self.window(x, y, x.wrapping_add(1), y.wrapping_add(1));
        let mut raw = [0u8; 4];
        self.disp(Section::Interrupts, |eng, gpio, dc| {
            address_window(eng, gpio, dc, win)?;
            command(eng, gpio, dc, cmd::RAMRD)?;
            eng.read_bytes(&mut raw)
        })?;
        log::trace!("read pixel {},{}: {:02x?}", x, y, raw);
        // first byte is a dummy read
        Ok(decode_rgb(&raw[1..]))
    }

    /// Read `count` pixels of the window.
    pub fn read_pixels(&mut self, x1: u16, y1: u16, x2: u16, y2: u16, count: usize) -> Result<Vec<Rgb565>> {
        let nbytes = count
            .checked_mul(3)
            .and_then(|n| n.checked_add(1))
            .ok_or(Error::OutOfMemory)?;

        let mut raw = Vec::new();
        let mut pixels = Vec::new();
        if raw.try_reserve_exact(nbytes).is_err() || pixels.try_reserve_exact(count).is_err() {
            log::warn!("no memory to read back {} pixels", count);
            return Err(Error::OutOfMemory);
        }
        raw.resize(nbytes, 0u8);

        let win = self.window(x1, y1, x2, y2);
        self.disp(Section::Tasks, |eng, gpio, dc| {
            address_window(eng, gpio, dc, win)?;
            command(eng, gpio, dc, cmd::RAMRD)?;
            eng.read_bytes(&mut raw[..])
        })?;

        pixels.extend(raw[1..].chunks_exact(3).map(decode_rgb));
        Ok(pixels)
    }

    /// One 12-bit sample from the touch controller channel `channel`.
    pub fn read_touch_sample(&mut self, channel: u8) -> Result<u16> {
        let (unit, dc) = (self.pins.touch_unit, self.pins.dc);
        let mut rx = [0u8; 2];
        self.bus.transaction_in(unit, Section::Interrupts, |eng, gpio| {
            phase(eng, gpio, dc, true)?;
            eng.write_bytes(&[channel])?;
            eng.read_bytes(&mut rx)
        })?;
        Ok(u16::from_be_bytes(rx) >> 4)
    }

    pub(crate) fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    pub(crate) fn set_pin(&mut self, pin: u8, high: bool) {
        self.bus.gpio_mut().set_level(pin, high);
    }

    // Visible part of `area`, as an inclusive window
    fn clip(&self, area: &Rectangle) -> Option<(u16, u16, u16, u16, usize)> {
        let bounds = Rectangle::new(Point::zero(), self.size());
        let inter = area.intersection(&bounds);
        let br = inter.bottom_right()?;
        let tl = inter.top_left;
        let count = inter.size.width as usize * inter.size.height as usize;
        Some((tl.x as u16, tl.y as u16, br.x as u16, br.y as u16, count))
    }
}

// -------------------- embedded-graphics integration --------------------
impl<R, G, S, D> OriginDimensions for Tft<R, G, S, D>
where
    R: Registers,
    G: Gpio,
    S: Scheduler,
    D: DelayNs,
{
    fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }
}

impl<R, G, S, D> DrawTarget for Tft<R, G, S, D>
where
    R: Registers,
    G: Gpio,
    S: Scheduler,
    D: DelayNs,
{
    type Color = Rgb565;
    type Error = Error;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<()>
    where
        I: IntoIterator<Item = Pixel<Rgb565>>,
    {
        for Pixel(p, c) in pixels {
            if p.x < 0 || p.y < 0 || p.x >= self.width as i32 || p.y >= self.height as i32 {
                continue;
            }
            self.draw_pixel(p.x as u16, p.y as u16, c)?;
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Rgb565) -> Result<()> {
        match self.clip(area) {
            Some((x1, y1, x2, y2, count)) => self.fill_window(x1, y1, x2, y2, color, count),
            None => Ok(()),
        }
    }

    fn clear(&mut self, color: Rgb565) -> Result<()> {
        let (w, h) = (self.width, self.height);
        if w == 0 || h == 0 {
            return Ok(());
        }
        self.fill_window(0, 0, w - 1, h - 1, color, w as usize * h as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::unit;
    use crate::lock::PinLockTable;
    use crate::mock::{Event, GpioOp, MockDelay, MockGpio, MockHardware, MockRegisters, MockScheduler, SchedOp};
    use alloc::vec;

    type TestTft = Tft<MockRegisters, MockGpio, MockScheduler, MockDelay>;

    const PINS: TftPins = TftPins {
        disp_unit: unit(3, 0),
        touch_unit: unit(3, 1),
        miso: 19,
        mosi: 23,
        clk: 18,
        cs: 5,
        tcs: 4,
        dc: 21,
        rst: None,
        backlight: Some(2),
    };

    fn tft(hw: &MockHardware) -> TestTft {
        let bus = SpiBus::new(hw.registers(), hw.gpio(), hw.scheduler());
        let mut tft = Tft::new(bus, hw.delay(), PINS);
        tft.configure(&mut PinLockTable::new()).unwrap();
        hw.clear_events();
        tft
    }

    #[test]
    fn test_configure_units() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);

        let bus = tft.bus();
        assert_eq!(bus.speed_khz(PINS.disp_unit).unwrap(), 20_000);
        assert_eq!(bus.speed_khz(PINS.touch_unit).unwrap(), 2_500);
        assert_eq!(bus.unit_config(PINS.touch_unit).unwrap().mode, 2);
        assert!(!bus.unit_config(PINS.disp_unit).unwrap().duplex);
        assert_eq!(bus.cs_pin(PINS.touch_unit).unwrap(), 4);
    }

    #[test]
    fn test_window_word_layout() {
        assert_eq!(window_word(0x0102, 0x0304), 0x0403_0201);
        assert_eq!(window_word(0, 319), 0x3F01_0000);
    }

    #[test]
    fn test_command_then_data_toggles_dc() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);

        tft.send_command(cmd::MADCTL).unwrap();
        tft.send_data(&[0x48]).unwrap();

        let tx = hw.transactions();
        assert_eq!(tx.len(), 2);
        assert_eq!(tx[0].bytes(), [cmd::MADCTL]);
        assert_eq!(tx[1].bytes(), [0x48]);

        let dc: Vec<_> = hw
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Gpio(GpioOp::Level(21, level)) => Some(level),
                _ => None,
            })
            .collect();
        assert_eq!(dc, [false, true]);
    }

    #[test]
    fn test_empty_data_is_noop() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);

        tft.send_data(&[]).unwrap();
        assert!(hw.events().is_empty());
    }

    #[test]
    fn test_short_sequences_disable_interrupts() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);

        tft.send_command(cmd::NOP).unwrap();
        let ev = hw.events();
        assert_eq!(ev.first(), Some(&Event::Sched(SchedOp::DisableIrq)));
        assert_eq!(ev.last(), Some(&Event::Sched(SchedOp::EnableIrq)));
    }

    #[test]
    fn test_fill_window_is_one_task_section() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);

        tft.fill_window(0, 0, 1, 1, Rgb565::new(31, 0, 0), 4).unwrap();

        let sched: Vec<_> = hw
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Sched(_)))
            .collect();
        assert_eq!(sched, vec![Event::Sched(SchedOp::Suspend), Event::Sched(SchedOp::Resume)]);

        let tx = hw.transactions();
        assert_eq!(tx.len(), 6);
        assert_eq!(tx[4].bytes(), [cmd::RAMWR]);
        assert_eq!(tx[5].bytes(), [0xF8, 0x00, 0xF8, 0x00, 0xF8, 0x00, 0xF8, 0x00]);
    }

    #[test]
    fn test_draw_pixel_window() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);

        tft.draw_pixel(10, 20, Rgb565::new(0, 63, 0)).unwrap();

        let tx = hw.transactions();
        assert_eq!(tx.len(), 6);
        assert_eq!(tx[1].bytes(), [0, 10, 0, 11]);
        assert_eq!(tx[3].bytes(), [0, 20, 0, 21]);
        assert_eq!(tx[5].mosi_bits, 16);
        assert_eq!(tx[5].bytes(), [0x07, 0xE0]);
    }

    #[test]
    fn test_offsets_shift_window() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);
        tft.set_offsets(2, 1);

        tft.set_address_window(0, 0, 127, 159).unwrap();

        let tx = hw.transactions();
        assert_eq!(tx[1].bytes(), [0, 2, 0, 129]);
        assert_eq!(tx[3].bytes(), [0, 1, 0, 160]);
    }

    #[test]
    fn test_read_pixels_decodes_groups() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);
        hw.queue_rx(&[0x00, 0xF8, 0x00, 0x00, 0x00, 0x00, 0xF8]);

        let px = tft.read_pixels(0, 0, 1, 0, 2).unwrap();
        assert_eq!(px, [Rgb565::new(31, 0, 0), Rgb565::new(0, 0, 31)]);
    }

    #[test]
    fn test_read_pixels_too_large() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);

        assert_eq!(tft.read_pixels(0, 0, 0, 0, usize::MAX / 2), Err(Error::OutOfMemory));
        assert!(hw.transactions().is_empty());
    }

    #[test]
    fn test_touch_sample() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);
        hw.queue_rx(&[0xAB, 0xCD]);

        assert_eq!(tft.read_touch_sample(touch::X).unwrap(), 0x0ABC);

        let tx = hw.transactions();
        assert_eq!(tx[0].bytes(), [touch::X]);
        assert_eq!(tx[1].miso_bits, 16);
        // touch unit selected through its own chip select
        assert!(hw.events().contains(&Event::Gpio(GpioOp::Level(4, false))));
    }

    #[test]
    fn test_fill_solid_clips() {
        let hw = MockHardware::new();
        let mut tft = tft(&hw);
        tft.set_size(4, 4);

        tft.fill_solid(&Rectangle::new(Point::new(2, 2), Size::new(10, 10)), Rgb565::new(0, 0, 0))
            .unwrap();
        let tx = hw.transactions();
        assert_eq!(tx[1].bytes(), [0, 2, 0, 3]);
        assert_eq!(tx[5].mosi_bits, 4 * 16);

        hw.clear_events();
        tft.fill_solid(&Rectangle::new(Point::new(8, 8), Size::new(2, 2)), Rgb565::new(0, 0, 0))
            .unwrap();
        assert!(hw.transactions().is_empty());
    }
}
