//! Pin ownership arbitration between driver subsystems.

use crate::gpio::NUM_PINS;

/// Subsystem holding a pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Gpio,
    Spi,
    I2c,
    Uart,
    Display,
}

/// The pin is already held by someone else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockConflict {
    pub owner: Owner,
    pub unit: u8,
}

/// Central pin lock. Other subsystems may query and release entries.
pub trait PinLock {
    fn acquire(&mut self, owner: Owner, unit: u8, pin: u8) -> Result<(), LockConflict>;

    fn release(&mut self, owner: Owner, unit: u8, pin: u8);

    fn owner_of(&self, pin: u8) -> Option<(Owner, u8)>;
}

/// Fixed table with one slot per pad.
#[derive(Debug)]
pub struct PinLockTable {
    slots: [Option<(Owner, u8)>; NUM_PINS],
}

impl Default for PinLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PinLockTable {
    pub const fn new() -> Self {
        Self { slots: [None; NUM_PINS] }
    }
}

impl PinLock for PinLockTable {
    fn acquire(&mut self, owner: Owner, unit: u8, pin: u8) -> Result<(), LockConflict> {
        let Some(slot) = self.slots.get_mut(pin as usize) else {
            // pins outside the pad range are never contended
            return Ok(());
        };
        match *slot {
            None => {
                *slot = Some((owner, unit));
                Ok(())
            }
            Some(held) if held == (owner, unit) => Ok(()),
            Some((owner, unit)) => Err(LockConflict { owner, unit }),
        }
    }

    fn release(&mut self, owner: Owner, unit: u8, pin: u8) {
        if let Some(slot) = self.slots.get_mut(pin as usize) {
            if *slot == Some((owner, unit)) {
                *slot = None;
            }
        }
    }

    fn owner_of(&self, pin: u8) -> Option<(Owner, u8)> {
        self.slots.get(pin as usize).copied().flatten()
    }
}
