#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bus;
pub mod clock;
pub mod display;
pub mod error;
pub mod gpio;
pub mod init;
pub mod lock;
pub mod mount;
pub mod pins;
pub mod regs;
pub mod sched;
pub mod transfer;
pub mod wiring;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use bus::{unit, BusConfig, SharedBus, SpiBus, UnitDevice};
pub use display::{Tft, TftPins};
pub use error::{Error, Result};
pub use init::{Controller, InitStep, Tab};
pub use transfer::WaitPolicy;
