//! GPIO pad and signal-matrix primitives used by the SPI pin multiplexer.
//!
//! [`Gpio`] is what the bus needs from the pin layer. [`EspGpio`] implements it
//! for the ESP32 GPIO matrix and IO_MUX on top of [`Registers`], so the mock
//! register backend sees those writes too.

use crate::regs::Registers;

/// Input signal index meaning "constant low" when used as a pin number.
pub const MATRIX_DETACH_IN_LOW: u8 = 0x30;
/// Input signal index meaning "constant high" when used as a pin number.
pub const MATRIX_DETACH_IN_HIGH: u8 = 0x38;
/// Output signal index handing the pad back to the GPIO output register.
pub const MATRIX_DETACH_OUT: u16 = 0x100;

/// Number of GPIO pads on the ESP32.
pub const NUM_PINS: usize = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
}

/// IO_MUX function for a pad.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinFunction {
    /// Dedicated peripheral routing (function 1 on the SPI pads).
    Spi,
    /// Plain GPIO, signals go through the GPIO matrix.
    Gpio,
}

impl PinFunction {
    pub const fn mcu_sel(self) -> u32 {
        match self {
            PinFunction::Spi => 1,
            PinFunction::Gpio => 2,
        }
    }
}

/// Pad level, direction and matrix routing.
///
/// Implementations must be idempotent: re-applying the same state has no
/// visible side effect.
pub trait Gpio {
    fn set_direction(&mut self, pin: u8, dir: Direction);

    fn set_pull(&mut self, pin: u8, pull: Pull);

    fn set_level(&mut self, pin: u8, high: bool);

    /// Connect peripheral input `signal` to pad `pin`.
    fn route_input(&mut self, pin: u8, signal: u16, invert: bool);

    /// Drive pad `pin` from peripheral output `signal`.
    fn route_output(&mut self, pin: u8, signal: u16, invert: bool, oe_invert: bool);

    /// Let peripheral input `signal` bypass the matrix and read its IO_MUX pad.
    fn bypass_input(&mut self, signal: u16);

    fn select_function(&mut self, pin: u8, function: PinFunction);

    #[inline]
    fn set_output(&mut self, pin: u8) {
        self.set_direction(pin, Direction::Output);
    }
}

impl<G: Gpio + ?Sized> Gpio for &mut G {
    fn set_direction(&mut self, pin: u8, dir: Direction) {
        (**self).set_direction(pin, dir)
    }
    fn set_pull(&mut self, pin: u8, pull: Pull) {
        (**self).set_pull(pin, pull)
    }
    fn set_level(&mut self, pin: u8, high: bool) {
        (**self).set_level(pin, high)
    }
    fn route_input(&mut self, pin: u8, signal: u16, invert: bool) {
        (**self).route_input(pin, signal, invert)
    }
    fn route_output(&mut self, pin: u8, signal: u16, invert: bool, oe_invert: bool) {
        (**self).route_output(pin, signal, invert, oe_invert)
    }
    fn bypass_input(&mut self, signal: u16) {
        (**self).bypass_input(signal)
    }
    fn select_function(&mut self, pin: u8, function: PinFunction) {
        (**self).select_function(pin, function)
    }
}

// GPIO matrix registers
const GPIO_BASE: u32 = 0x3FF4_4000;
const GPIO_OUT_W1TS: u32 = GPIO_BASE + 0x08;
const GPIO_OUT_W1TC: u32 = GPIO_BASE + 0x0C;
const GPIO_OUT1_W1TS: u32 = GPIO_BASE + 0x14;
const GPIO_OUT1_W1TC: u32 = GPIO_BASE + 0x18;
const GPIO_ENABLE_W1TS: u32 = GPIO_BASE + 0x24;
const GPIO_ENABLE_W1TC: u32 = GPIO_BASE + 0x28;
const GPIO_ENABLE1_W1TS: u32 = GPIO_BASE + 0x30;
const GPIO_ENABLE1_W1TC: u32 = GPIO_BASE + 0x34;
pub(crate) const GPIO_FUNC_IN_SEL_CFG: u32 = GPIO_BASE + 0x130;
const GPIO_FUNC_OUT_SEL_CFG: u32 = GPIO_BASE + 0x530;

pub(crate) const SIG_IN_SEL: u32 = 1 << 7;
const SIG_IN_INV: u32 = 1 << 6;
const OUT_INV: u32 = 1 << 9;
const OEN_SEL: u32 = 1 << 10;
const OEN_INV: u32 = 1 << 11;

// IO_MUX pad registers
const IO_MUX_BASE: u32 = 0x3FF4_9000;
const FUN_WPD: u32 = 1 << 7;
const FUN_WPU: u32 = 1 << 8;
const FUN_IE: u32 = 1 << 9;
const MCU_SEL: u32 = 0x7;
const MCU_SEL_S: u32 = 12;

/// IO_MUX register offset for each pad, 0 where the pad does not exist.
const IO_MUX_OFFSET: [u16; NUM_PINS] = [
    0x44, 0x88, 0x40, 0x84, 0x48, 0x6C, 0x60, 0x64, // 0..7
    0x68, 0x54, 0x58, 0x5C, 0x34, 0x38, 0x30, 0x3C, // 8..15
    0x4C, 0x50, 0x70, 0x74, 0x78, 0x7C, 0x80, 0x8C, // 16..23
    0x00, 0x24, 0x28, 0x2C, 0x00, 0x00, 0x00, 0x00, // 24..31
    0x1C, 0x20, 0x14, 0x18, 0x04, 0x08, 0x0C, 0x10, // 32..39
];

/// ESP32 GPIO matrix + IO_MUX backend.
pub struct EspGpio<R> {
    regs: R,
}

impl<R: Registers> EspGpio<R> {
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    pub fn into_inner(self) -> R {
        self.regs
    }

    fn mux_reg(pin: u8) -> Option<u32> {
        match IO_MUX_OFFSET.get(pin as usize) {
            Some(&off) if off != 0 => Some(IO_MUX_BASE + off as u32),
            _ => None,
        }
    }

    // Write a W1TS/W1TC pair for `pin`, picking the bank by pin number
    fn write_bank(&mut self, pin: u8, low: (u32, u32), high: (u32, u32), set: bool) {
        let (w1ts, w1tc, bit) = if pin < 32 {
            (low.0, low.1, pin)
        } else {
            (high.0, high.1, pin - 32)
        };
        self.regs.write(if set { w1ts } else { w1tc }, 1 << bit);
    }
}

impl<R: Registers> Gpio for EspGpio<R> {
    fn set_direction(&mut self, pin: u8, dir: Direction) {
        if pin as usize >= NUM_PINS {
            return;
        }
        if let Some(mux) = Self::mux_reg(pin) {
            // input enable stays on so outputs can be read back
            self.regs.set_bits(mux, FUN_IE);
        }
        // pads 34..39 are input only
        let output = dir == Direction::Output && pin < 34;
        self.write_bank(
            pin,
            (GPIO_ENABLE_W1TS, GPIO_ENABLE_W1TC),
            (GPIO_ENABLE1_W1TS, GPIO_ENABLE1_W1TC),
            output,
        );
        if output {
            self.regs
                .write(GPIO_FUNC_OUT_SEL_CFG + 4 * pin as u32, MATRIX_DETACH_OUT as u32 | OEN_SEL);
        }
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) {
        let Some(mux) = Self::mux_reg(pin) else { return };
        match pull {
            Pull::Up => {
                self.regs.clear_bits(mux, FUN_WPD);
                self.regs.set_bits(mux, FUN_WPU);
            }
            Pull::None => self.regs.clear_bits(mux, FUN_WPU | FUN_WPD),
        }
    }

    fn set_level(&mut self, pin: u8, high: bool) {
        if pin as usize >= NUM_PINS {
            return;
        }
        self.write_bank(pin, (GPIO_OUT_W1TS, GPIO_OUT_W1TC), (GPIO_OUT1_W1TS, GPIO_OUT1_W1TC), high);
    }

    fn route_input(&mut self, pin: u8, signal: u16, invert: bool) {
        if let Some(mux) = Self::mux_reg(pin) {
            self.regs.set_bits(mux, FUN_IE);
        }
        let mut cfg = (pin as u32 & 0x3F) | SIG_IN_SEL;
        if invert {
            cfg |= SIG_IN_INV;
        }
        self.regs.write(GPIO_FUNC_IN_SEL_CFG + 4 * signal as u32, cfg);
    }

    fn route_output(&mut self, pin: u8, signal: u16, invert: bool, oe_invert: bool) {
        if pin as usize >= NUM_PINS {
            return;
        }
        let mut cfg = signal as u32 & 0x1FF;
        if invert {
            cfg |= OUT_INV;
        }
        if oe_invert {
            cfg |= OEN_INV;
        }
        if signal == MATRIX_DETACH_OUT {
            // output enable follows GPIO_ENABLE
            cfg |= OEN_SEL;
        } else {
            self.write_bank(
                pin,
                (GPIO_ENABLE_W1TS, GPIO_ENABLE_W1TC),
                (GPIO_ENABLE1_W1TS, GPIO_ENABLE1_W1TC),
                true,
            );
        }
        self.regs.write(GPIO_FUNC_OUT_SEL_CFG + 4 * pin as u32, cfg);
    }

    fn bypass_input(&mut self, signal: u16) {
        self.regs.clear_bits(GPIO_FUNC_IN_SEL_CFG + 4 * signal as u32, SIG_IN_SEL);
    }

    fn select_function(&mut self, pin: u8, function: PinFunction) {
        if let Some(mux) = Self::mux_reg(pin) {
            self.regs.set_field(mux, MCU_SEL, function.mcu_sel(), MCU_SEL_S);
        }
    }
}
