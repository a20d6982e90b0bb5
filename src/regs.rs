//! Register access interface and the ESP32 SPI register map.
//!
//! Everything above this module talks to hardware through [`Registers`], so a
//! simulated backend can stand in for the peripheral in tests.

/// 32-bit register access at an absolute address.
pub trait Registers {
    fn read(&mut self, addr: u32) -> u32;

    fn write(&mut self, addr: u32, value: u32);

    /// `SET_PERI_REG_MASK`
    #[inline]
    fn set_bits(&mut self, addr: u32, mask: u32) {
        let v = self.read(addr);
        self.write(addr, v | mask);
    }

    /// `CLEAR_PERI_REG_MASK`
    #[inline]
    fn clear_bits(&mut self, addr: u32, mask: u32) {
        let v = self.read(addr);
        self.write(addr, v & !mask);
    }

    /// Replace the field `mask << shift` with `value`.
    #[inline]
    fn set_field(&mut self, addr: u32, mask: u32, value: u32, shift: u32) {
        let v = self.read(addr) & !(mask << shift);
        self.write(addr, v | ((value & mask) << shift));
    }
}

impl<R: Registers + ?Sized> Registers for &mut R {
    #[inline]
    fn read(&mut self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    #[inline]
    fn write(&mut self, addr: u32, value: u32) {
        (**self).write(addr, value)
    }
}

/// Memory-mapped register access on the real chip.
#[cfg(feature = "esp32")]
pub struct Mmio {
    _private: (),
}

#[cfg(feature = "esp32")]
impl Mmio {
    /// # Safety
    ///
    /// The caller must own the SPI hosts, GPIO matrix and IO_MUX registers
    /// touched through this handle; nothing else may program them concurrently.
    pub const unsafe fn steal() -> Self {
        Self { _private: () }
    }
}

#[cfg(feature = "esp32")]
impl Registers for Mmio {
    #[inline(always)]
    fn read(&mut self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    #[inline(always)]
    fn write(&mut self, addr: u32, value: u32) {
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }
}

/// Base address of SPI host `host` (0..=3).
pub const fn spi_base(host: u8) -> u32 {
    const SPI1_BASE: u32 = 0x3FF4_2000;
    if host > 1 {
        SPI1_BASE + (host as u32) * 0x1000 + 0x2_0000
    } else {
        SPI1_BASE + ((!host & 1) as u32) * 0x1000
    }
}

// SPI register offsets
pub const SPI_CMD: u32 = 0x00;
pub const SPI_CTRL: u32 = 0x08;
pub const SPI_CTRL2: u32 = 0x14;
pub const SPI_CLOCK: u32 = 0x18;
pub const SPI_USER: u32 = 0x1C;
pub const SPI_USER1: u32 = 0x20;
pub const SPI_USER2: u32 = 0x24;
pub const SPI_MOSI_DLEN: u32 = 0x28;
pub const SPI_MISO_DLEN: u32 = 0x2C;
pub const SPI_PIN: u32 = 0x34;
pub const SPI_SLAVE: u32 = 0x38;
pub const SPI_W0: u32 = 0x80;

// SPI_CMD
pub const SPI_USR: u32 = 1 << 18;

// SPI_CTRL
pub const SPI_WR_BIT_ORDER: u32 = 1 << 26;
pub const SPI_RD_BIT_ORDER: u32 = 1 << 25;

// SPI_CTRL2
pub const SPI_MISO_DELAY_MODE: u32 = 0x3;
pub const SPI_MISO_DELAY_MODE_S: u32 = 16;
pub const SPI_MISO_DELAY_NUM: u32 = 0x7;
pub const SPI_MISO_DELAY_NUM_S: u32 = 18;

// SPI_CLOCK
pub const SPI_CLK_EQU_SYSCLK: u32 = 1 << 31;

// SPI_USER
pub const SPI_DOUTDIN: u32 = 1 << 0;
pub const SPI_CS_HOLD: u32 = 1 << 4;
pub const SPI_CS_SETUP: u32 = 1 << 5;
pub const SPI_CK_OUT_EDGE: u32 = 1 << 7;
pub const SPI_USR_MOSI: u32 = 1 << 27;
pub const SPI_USR_MISO: u32 = 1 << 28;
pub const SPI_USR_ADDR: u32 = 1 << 30;
pub const SPI_USR_COMMAND: u32 = 1 << 31;

// SPI_USER1
pub const SPI_USR_ADDR_BITLEN: u32 = 0x3F;
pub const SPI_USR_ADDR_BITLEN_S: u32 = 26;

// SPI_USER2
pub const SPI_USR_COMMAND_BITLEN: u32 = 0xF;
pub const SPI_USR_COMMAND_BITLEN_S: u32 = 28;

// SPI_MOSI_DLEN / SPI_MISO_DLEN
pub const SPI_USR_DBITLEN: u32 = 0x00FF_FFFF;

// SPI_PIN
pub const SPI_CK_IDLE_EDGE: u32 = 1 << 29;

// SPI_SLAVE
pub const SPI_TRANS_DONE: u32 = 1 << 4;
pub const SPI_SLAVE_MODE: u32 = 1 << 30;

/// Address of register `offset` on `host`.
#[inline(always)]
pub const fn spi_reg(host: u8, offset: u32) -> u32 {
    spi_base(host) + offset
}

/// Address of hardware transfer word `idx` (0..16) on `host`.
#[inline(always)]
pub const fn spi_w(host: u8, idx: usize) -> u32 {
    spi_base(host) + SPI_W0 + ((idx as u32) << 2)
}
