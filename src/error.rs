//! Driver error type shared by the bus, display and init layers.

use core::fmt;

use crate::lock::Owner;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors returned by configuration and lifecycle operations.
///
/// The hot transfer path only produces `Timeout`, and only when a bounded
/// [`WaitPolicy`](crate::transfer::WaitPolicy) was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Unit number outside the configured hardware range.
    InvalidUnit(u8),
    /// SPI mode outside 0..=3.
    InvalidMode(u8),
    /// Only master mode is supported.
    SlaveNotAllowed,
    /// Generic setup failure.
    CannotSetup,
    /// A pin needed by the unit is already claimed by another subsystem.
    PinLocked { pin: u8, owner: Owner, unit: u8 },
    /// A read-back staging buffer could not be allocated.
    OutOfMemory,
    /// The peripheral did not finish a transaction within the wait budget.
    Timeout,
    /// A packed init command list ended in the middle of a record.
    InvalidCommandTable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidUnit(u) => write!(f, "invalid unit {}", u),
            Error::InvalidMode(m) => write!(f, "invalid mode {}", m),
            Error::SlaveNotAllowed => write!(f, "slave mode not allowed"),
            Error::CannotSetup => write!(f, "can't setup"),
            Error::PinLocked { pin, owner, unit } => {
                write!(f, "pin {} is used by {:?}{}", pin, owner, unit)
            }
            Error::OutOfMemory => write!(f, "not enough memory"),
            Error::Timeout => write!(f, "bus timeout"),
            Error::InvalidCommandTable => write!(f, "malformed command list"),
        }
    }
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}
