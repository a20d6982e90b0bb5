//! Controller init sequences.
//!
//! ST7735 tables are kept in their packed byte form:
//!
//! ```text
//! count, (opcode, nargs | DELAY, args.., [delay])*
//! ```
//!
//! where a delay byte of 255 means 500 ms. They are parsed into [`InitStep`]s
//! before anything is sent, so a truncated table never leaves the controller
//! half configured. The ILI9341 sequences are written directly as steps.

use embedded_hal::delay::DelayNs;

use crate::display::{cmd, Tft};
use crate::error::{Error, Result};
use crate::gpio::Gpio;
use crate::regs::Registers;
use crate::sched::Scheduler;

/// Arg-count flag: a delay byte follows the arguments.
pub const DELAY: u8 = 0x80;

/// Most steps a packed table may hold.
pub const MAX_STEPS: usize = 32;

/// One entry of an init sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStep<'a> {
    Command {
        opcode: u8,
        args: &'a [u8],
        delay_ms: Option<u16>,
    },
    /// Wait without sending anything.
    Pause(u16),
}

const fn op(opcode: u8, args: &[u8]) -> InitStep<'_> {
    InitStep::Command { opcode, args, delay_ms: None }
}

const fn op_wait(opcode: u8, args: &[u8], ms: u16) -> InitStep<'_> {
    InitStep::Command { opcode, args, delay_ms: Some(ms) }
}

/// Parse a packed command table.
pub fn parse_command_list(table: &[u8]) -> Result<heapless::Vec<InitStep<'_>, MAX_STEPS>> {
    let (&count, mut rest) = table.split_first().ok_or(Error::InvalidCommandTable)?;
    let mut steps = heapless::Vec::new();

    for _ in 0..count {
        let [opcode, flags, tail @ ..] = rest else {
            return Err(Error::InvalidCommandTable);
        };
        let nargs = (flags & !DELAY) as usize;
        if tail.len() < nargs {
            return Err(Error::InvalidCommandTable);
        }
        let (args, tail) = tail.split_at(nargs);

        let (delay_ms, tail) = if flags & DELAY != 0 {
            let (&ms, tail) = tail.split_first().ok_or(Error::InvalidCommandTable)?;
            (Some(if ms == 255 { 500 } else { ms as u16 }), tail)
        } else {
            (None, tail)
        };

        steps
            .push(InitStep::Command { opcode: *opcode, args, delay_ms })
            .map_err(|_| Error::InvalidCommandTable)?;
        rest = tail;
    }
    Ok(steps)
}

// ST7735 specific opcodes
const DISSET5: u8 = 0xB6;
const PWCTR6: u8 = 0xFC;

/// ST7735B.
#[rustfmt::skip]
pub static ST7735B_INIT: &[u8] = &[
    18,
    cmd::SWRESET, DELAY, 50,
    cmd::SLPOUT, DELAY, 255,
    cmd::COLMOD, 1 | DELAY, 0x05, 10,
    cmd::FRMCTR1, 3 | DELAY, 0x00, 0x06, 0x03, 10,
    cmd::MADCTL, 1, 0x08,
    DISSET5, 2, 0x15, 0x02,
    cmd::INVCTR, 1, 0x00,
    cmd::PWCTR1, 2 | DELAY, 0x02, 0x70, 10,
    cmd::PWCTR2, 1, 0x05,
    cmd::PWCTR3, 2, 0x01, 0x02,
    cmd::VMCTR1, 2 | DELAY, 0x3C, 0x38, 10,
    PWCTR6, 2, 0x11, 0x15,
    cmd::GMCTRP1, 16,
    0x09, 0x16, 0x09, 0x20, 0x21, 0x1B, 0x13, 0x19,
    0x17, 0x15, 0x1E, 0x2B, 0x04, 0x05, 0x02, 0x0E,
    cmd::GMCTRN1, 16 | DELAY,
    0x0B, 0x14, 0x08, 0x1E, 0x22, 0x1D, 0x18, 0x1E,
    0x1B, 0x1A, 0x24, 0x2B, 0x06, 0x06, 0x02, 0x0F,
    10,
    cmd::CASET, 4, 0x00, 0x02, 0x00, 0x81,
    cmd::PASET, 4, 0x00, 0x02, 0x00, 0x81,
    cmd::NORON, DELAY, 10,
    cmd::DISPON, DELAY, 255,
];

/// ST7735R, first part (all tabs).
#[rustfmt::skip]
pub static ST7735R_INIT1: &[u8] = &[
    15,
    cmd::SWRESET, DELAY, 150,
    cmd::SLPOUT, DELAY, 255,
    cmd::FRMCTR1, 3, 0x01, 0x2C, 0x2D,
    cmd::FRMCTR2, 3, 0x01, 0x2C, 0x2D,
    cmd::FRMCTR3, 6, 0x01, 0x2C, 0x2D, 0x01, 0x2C, 0x2D,
    cmd::INVCTR, 1, 0x07,
    cmd::PWCTR1, 3, 0xA2, 0x02, 0x84,
    cmd::PWCTR2, 1, 0xC5,
    cmd::PWCTR3, 2, 0x0A, 0x00,
    cmd::PWCTR4, 2, 0x8A, 0x2A,
    cmd::PWCTR5, 2, 0x8A, 0xEE,
    cmd::VMCTR1, 1, 0x0E,
    cmd::INVOFF, 0,
    cmd::MADCTL, 1, 0xC0,
    cmd::COLMOD, 1 | DELAY, 0x05, 10,
];

/// ST7735R green tab: 2 column / 1 row offset.
#[rustfmt::skip]
pub static ST7735R_GREEN: &[u8] = &[
    2,
    cmd::CASET, 4, 0x00, 0x02, 0x00, 0x7F + 0x02,
    cmd::PASET, 4, 0x00, 0x01, 0x00, 0x9F + 0x01,
];

/// ST7735R red and black tabs.
#[rustfmt::skip]
pub static ST7735R_RED: &[u8] = &[
    2,
    cmd::CASET, 4, 0x00, 0x00, 0x00, 0x7F,
    cmd::PASET, 4, 0x00, 0x00, 0x00, 0x9F,
];

/// ST7735R, last part (all tabs).
#[rustfmt::skip]
pub static ST7735R_INIT3: &[u8] = &[
    4,
    cmd::GMCTRP1, 16,
    0x02, 0x1C, 0x07, 0x12, 0x37, 0x32, 0x29, 0x2D,
    0x29, 0x25, 0x2B, 0x39, 0x00, 0x01, 0x03, 0x10,
    cmd::GMCTRN1, 16,
    0x03, 0x1D, 0x07, 0x06, 0x2E, 0x2C, 0x29, 0x2D,
    0x2E, 0x2E, 0x37, 0x3F, 0x00, 0x00, 0x02, 0x10,
    cmd::NORON, DELAY, 10,
    cmd::DISPON, DELAY, 100,
];

static GAMMA_POS: [u8; 15] = [
    0x0F, 0x31, 0x2B, 0x0C, 0x0E, 0x08, 0x4E, 0xF1, 0x37, 0x07, 0x10, 0x03, 0x0E, 0x09, 0x00,
];
static GAMMA_NEG: [u8; 15] = [
    0x00, 0x0E, 0x14, 0x03, 0x11, 0x07, 0x31, 0xC1, 0x48, 0x08, 0x0F, 0x0C, 0x31, 0x36, 0x0F,
];

/// ILI9341, portrait.
#[rustfmt::skip]
pub static ILI9341_INIT: &[InitStep<'static>] = &[
    op_wait(cmd::SWRESET, &[], 200),
    op(0xCB, &[0x39, 0x2C, 0x00, 0x34, 0x02]),   // power A
    op(0xCF, &[0x00, 0xC1, 0x30]),               // power B
    op(0xEF, &[0x03, 0x80, 0x02]),
    op(0xE8, &[0x85, 0x00, 0x78]),               // driver timing A
    op(0xEA, &[0x00, 0x00]),                     // driver timing B
    op(0xED, &[0x64, 0x03, 0x12, 0x81]),         // power on sequence
    op(0xF7, &[0x20]),                           // pump ratio
    op(cmd::PWCTR1, &[0x23]),
    op(cmd::PWCTR2, &[0x10]),
    op(cmd::VMCTR1, &[0x3E, 0x28]),
    op(cmd::VMCTR2, &[0x86]),
    op(cmd::MADCTL, &[0x48]),
    op(cmd::COLMOD, &[0x55]),
    op(cmd::FRMCTR1, &[0x00, 0x18]),
    op(cmd::DFUNCTR, &[0x08, 0x82, 0x27]),
    op(cmd::PTLAR, &[0x00, 0x00, 0x01, 0x3F]),
    op(0xF2, &[0x00]),                           // 3-gamma off
    op(cmd::GAMMASET, &[0x01]),
    op(cmd::GMCTRP1, &GAMMA_POS),
    op(cmd::GMCTRN1, &GAMMA_NEG),
    op_wait(cmd::SLPOUT, &[], 120),
    op(cmd::DISPON, &[]),
];

/// ILI9341, landscape. Expects a reset beforehand.
#[rustfmt::skip]
pub static ILI9341_ALT_INIT: &[InitStep<'static>] = &[
    op(0xCF, &[0x00, 0x83, 0x30]),
    op(0xED, &[0x64, 0x03, 0x12, 0x81]),
    op(0xE8, &[0x85, 0x01, 0x79]),
    op(0xCB, &[0x39, 0x2C, 0x00, 0x34, 0x02]),
    op(0xF7, &[0x20]),
    op(0xEA, &[0x00, 0x00]),
    op(cmd::PWCTR1, &[0x26]),
    op(cmd::PWCTR2, &[0x11]),
    op(cmd::VMCTR1, &[0x35, 0x3E]),
    op(cmd::VMCTR2, &[0xBE]),
    op(cmd::MADCTL, &[0x28]),
    op(cmd::COLMOD, &[0x55]),
    op(cmd::FRMCTR1, &[0x00, 0x1B]),
    op(0xF2, &[0x08]),
    op(cmd::GAMMASET, &[0x01]),
    op(cmd::GMCTRP1, &GAMMA_POS),
    op(cmd::GMCTRN1, &GAMMA_NEG),
    op(cmd::CASET, &[0x00, 0x00, 0x00, 0xEF]),
    op(cmd::PASET, &[0x00, 0x00, 0x01, 0x3F]),
    op(cmd::RAMWR, &[]),
    op(0xB7, &[0x07]),                           // entry mode
    op(cmd::DFUNCTR, &[0x0A, 0x82, 0x27, 0x00]),
    op_wait(cmd::SLPOUT, &[], 120),
    op(cmd::DISPON, &[]),
];

/// Soft reset used by the landscape ILI9341 set when there is no reset line.
pub static ILI9341_SOFT_RESET: &[InitStep<'static>] = &[op(cmd::SWRESET, &[]), InitStep::Pause(200)];

/// ST7735R tab colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tab {
    Black,
    Green,
    Red,
}

/// Supported controllers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Controller {
    St7735B,
    St7735R(Tab),
    Ili9341,
    /// ILI9341 in landscape with the alternate power settings.
    Ili9341Alt,
}

impl Controller {
    /// Panel size after init, as (width, height).
    pub const fn size(self) -> (u16, u16) {
        match self {
            Controller::St7735B | Controller::St7735R(_) => (128, 160),
            Controller::Ili9341 => (240, 320),
            Controller::Ili9341Alt => (320, 240),
        }
    }
}

impl<R, G, S, D> Tft<R, G, S, D>
where
    R: Registers,
    G: Gpio,
    S: Scheduler,
    D: DelayNs,
{
    pub fn run_init_steps(&mut self, steps: &[InitStep<'_>]) -> Result<()> {
        for step in steps {
            match *step {
                InitStep::Command { opcode, args, delay_ms } => {
                    self.send_command(opcode)?;
                    self.send_data(args)?;
                    if let Some(ms) = delay_ms {
                        self.delay_ms(ms as u32);
                    }
                }
                InitStep::Pause(ms) => self.delay_ms(ms as u32),
            }
        }
        Ok(())
    }

    /// Parse and send a packed command table.
    pub fn run_command_list(&mut self, table: &[u8]) -> Result<()> {
        let steps = parse_command_list(table)?;
        self.run_init_steps(&steps)
    }

    // Pulse the reset line, or soft reset without one
    fn st7735_reset(&mut self) -> Result<()> {
        match self.pins.rst {
            Some(rst) => {
                self.set_pin(rst, true);
                self.delay_ms(10);
                self.set_pin(rst, false);
                self.delay_ms(50);
                self.set_pin(rst, true);
                self.delay_ms(130);
            }
            None => {
                self.send_command(cmd::SWRESET)?;
                self.delay_ms(130);
            }
        }
        Ok(())
    }

    // Returns true when a hardware reset was done
    fn ili9341_reset(&mut self) -> bool {
        let Some(rst) = self.pins.rst else {
            return false;
        };
        self.set_pin(rst, false);
        self.delay_ms(100);
        self.set_pin(rst, true);
        self.delay_ms(100);
        true
    }

    /// Reset and initialise the controller, then switch the backlight on.
    pub fn init(&mut self, controller: Controller) -> Result<()> {
        self.set_offsets(0, 0);

        match controller {
            Controller::St7735B => {
                self.st7735_reset()?;
                self.run_command_list(ST7735B_INIT)?;
            }
            Controller::St7735R(tab) => {
                self.delay_ms(50);
                self.st7735_reset()?;
                self.run_command_list(ST7735R_INIT1)?;
                if tab == Tab::Green {
                    self.run_command_list(ST7735R_GREEN)?;
                    self.set_offsets(2, 1);
                } else {
                    self.run_command_list(ST7735R_RED)?;
                }
                self.run_command_list(ST7735R_INIT3)?;

                // black tab has the colour filter the other way round
                if tab == Tab::Black {
                    self.send_command(cmd::MADCTL)?;
                    self.send_data(&[0xC0])?;
                }
            }
            Controller::Ili9341 => {
                self.ili9341_reset();
                self.run_init_steps(ILI9341_INIT)?;
            }
            Controller::Ili9341Alt => {
                if !self.ili9341_reset() {
                    self.run_init_steps(ILI9341_SOFT_RESET)?;
                }
                self.run_init_steps(ILI9341_ALT_INIT)?;
            }
        }

        let (w, h) = controller.size();
        self.set_size(w, h);

        // backlight is active low
        if let Some(bl) = self.pins.backlight {
            self.set_pin(bl, false);
        }

        log::info!("tft: {:?} ready, {}x{}", controller, w, h);
        Ok(())
    }
}
