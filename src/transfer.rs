//! Chunked data movement through the 16-word hardware transfer buffer.
//!
//! The SPI peripheral shifts out of and into W0..W15 (64 bytes). Longer
//! transfers are split into chunks of at most 64 bytes; each chunk is packed
//! little-endian into 32-bit words, so the first byte of the buffer is the
//! first byte on the wire.
//!
//! [`Engine::transfer`] is the general full-duplex primitive. The remaining
//! methods are the write-only / read-only phases used by the display layer,
//! which toggles D/C between them.

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::IntoStorage;

use crate::error::{Error, Result};
use crate::regs::{self, Registers};

/// Words in the hardware transfer buffer.
pub const TRANSFER_WORDS: usize = 16;
/// Bytes in the hardware transfer buffer.
pub const TRANSFER_BYTES: usize = TRANSFER_WORDS * 4;

const PIXELS_PER_CHUNK: usize = TRANSFER_WORDS * 2;

/// How long to spin on `SPI_USR` before giving up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Spin until the peripheral finishes, however long that takes.
    #[default]
    Unbounded,
    /// Poll at most this many times, then fail with [`Error::Timeout`].
    Spins(u32),
}

/// RGB565 pixels to stream, as raw 16-bit values.
#[derive(Clone, Copy, Debug)]
pub enum ColorSource<'a> {
    /// One colour sent `count` times.
    Repeated { color: u16, count: usize },
    /// Raw colours sent once each.
    Pixels(&'a [u16]),
    /// Colours sent once each.
    Colors(&'a [Rgb565]),
}

impl ColorSource<'_> {
    pub fn len(&self) -> usize {
        match *self {
            ColorSource::Repeated { count, .. } => count,
            ColorSource::Pixels(px) => px.len(),
            ColorSource::Colors(px) => px.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    fn get(&self, idx: usize) -> u16 {
        match *self {
            ColorSource::Repeated { color, .. } => color,
            ColorSource::Pixels(px) => px.get(idx).copied().unwrap_or(0),
            ColorSource::Colors(px) => px.get(idx).map_or(0, |c| c.into_storage()),
        }
    }
}

/// One RGB565 value in the low half of a transfer word, high byte first on
/// the wire.
#[inline(always)]
pub const fn wire16(color: u16) -> u32 {
    color.swap_bytes() as u32
}

/// Register-level access to one SPI host for the duration of a selection.
pub struct Engine<'a, R> {
    regs: &'a mut R,
    host: u8,
    wait: WaitPolicy,
}

impl<'a, R: Registers> Engine<'a, R> {
    pub fn new(regs: &'a mut R, host: u8, wait: WaitPolicy) -> Self {
        Self { regs, host: host & 3, wait }
    }

    #[inline]
    pub fn host(&self) -> u8 {
        self.host
    }

    /// A transaction is still in flight.
    #[inline(always)]
    pub fn is_busy(&mut self) -> bool {
        self.regs.read(regs::spi_reg(self.host, regs::SPI_CMD)) & regs::SPI_USR != 0
    }

    #[cfg_attr(feature = "esp32", esp_hal::ram)]
    pub fn wait_idle(&mut self) -> Result<()> {
        match self.wait {
            WaitPolicy::Unbounded => {
                while self.is_busy() {
                    core::hint::spin_loop();
                }
                Ok(())
            }
            WaitPolicy::Spins(max) => {
                for _ in 0..=max {
                    if !self.is_busy() {
                        return Ok(());
                    }
                    core::hint::spin_loop();
                }
                Err(Error::Timeout)
            }
        }
    }

    // Raw DLEN field values: bits - 1, or 0 for an unused phase
    #[inline(always)]
    fn set_lengths(&mut self, mosi: u32, miso: u32) {
        let host = self.host;
        self.regs.set_field(
            regs::spi_reg(host, regs::SPI_MOSI_DLEN),
            regs::SPI_USR_DBITLEN,
            mosi,
            0,
        );
        self.regs.set_field(
            regs::spi_reg(host, regs::SPI_MISO_DLEN),
            regs::SPI_USR_DBITLEN,
            miso,
            0,
        );
    }

    #[inline(always)]
    fn load(&mut self, words: &[u32]) {
        for (idx, &wd) in words.iter().enumerate() {
            self.regs.write(regs::spi_w(self.host, idx), wd);
        }
    }

    #[inline(always)]
    fn start(&mut self) {
        self.regs.set_bits(regs::spi_reg(self.host, regs::SPI_CMD), regs::SPI_USR);
    }

    /// Full-duplex transfer of `count` words of `word_size` bytes.
    ///
    /// Without `out` every byte sent is `0xFF`. With `inp`, the bytes clocked
    /// in are stored in the same order they went out.
    #[cfg_attr(feature = "esp32", esp_hal::ram)]
    pub fn transfer(
        &mut self,
        word_size: usize,
        count: usize,
        out: Option<&[u8]>,
        mut inp: Option<&mut [u8]>,
    ) -> Result<()> {
        let total = word_size * count;
        let mut buffer = [0u32; TRANSFER_WORDS];
        let mut done = 0;

        while done < total {
            let n = (total - done).min(TRANSFER_BYTES);
            let nwords = n.div_ceil(4);
            let bits = (n * 8) as u32;

            for (idx, wd) in buffer[..nwords].iter_mut().enumerate() {
                let mut bytes = [0u8; 4];
                for (b, slot) in bytes.iter_mut().enumerate() {
                    let pos = idx * 4 + b;
                    if pos < n {
                        *slot = out.and_then(|o| o.get(done + pos).copied()).unwrap_or(0xFF);
                    }
                }
                *wd = u32::from_le_bytes(bytes);
            }

            self.wait_idle()?;
            self.set_lengths(bits - 1, bits - 1);
            self.load(&buffer[..nwords]);
            self.start();
            self.wait_idle()?;

            if let Some(inp) = inp.as_deref_mut() {
                let host = self.host;
                for (idx, wd) in buffer[..nwords].iter_mut().enumerate() {
                    *wd = self.regs.read(regs::spi_w(host, idx));
                }
                let dst = inp.iter_mut().skip(done).take(n);
                for (slot, byte) in dst.zip(buffer.iter().flat_map(|w| w.to_le_bytes())) {
                    *slot = byte;
                }
            }

            done += n;
        }

        Ok(())
    }

    /// Start a write of the low `bits` bits of `word`. The bus must be idle.
    #[cfg_attr(feature = "esp32", esp_hal::ram)]
    pub fn write_raw(&mut self, word: u32, bits: u32) {
        self.regs.write(regs::spi_w(self.host, 0), word);
        self.set_lengths(bits.saturating_sub(1), 0);
        self.start();
    }

    /// Start an 8-bit write. The bus must be idle.
    #[inline]
    pub fn write_byte(&mut self, byte: u8) {
        self.write_raw(byte as u32, 8);
    }

    /// Write-only stream of `data`. The bus must be idle; the last chunk may
    /// still be in flight on return.
    #[cfg_attr(feature = "esp32", esp_hal::ram)]
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        for (i, chunk) in data.chunks(TRANSFER_BYTES).enumerate() {
            if i > 0 {
                self.wait_idle()?;
            }
            for (idx, quad) in chunk.chunks(4).enumerate() {
                let mut bytes = [0u8; 4];
                bytes[..quad.len()].copy_from_slice(quad);
                self.regs.write(regs::spi_w(self.host, idx), u32::from_le_bytes(bytes));
            }
            self.set_lengths((chunk.len() * 8) as u32 - 1, 0);
            self.start();
        }
        Ok(())
    }

    /// Read-only stream into `buf`.
    #[cfg_attr(feature = "esp32", esp_hal::ram)]
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let host = self.host;
        for chunk in buf.chunks_mut(TRANSFER_BYTES) {
            self.wait_idle()?;
            self.set_lengths(0, (chunk.len() * 8) as u32 - 1);
            self.start();
            self.wait_idle()?;

            for (idx, quad) in chunk.chunks_mut(4).enumerate() {
                let wd = self.regs.read(regs::spi_w(host, idx)).to_le_bytes();
                quad.copy_from_slice(&wd[..quad.len()]);
            }
        }
        Ok(())
    }

    /// Stream RGB565 pixels, two per word, each high byte first. An odd
    /// trailing pixel occupies the low half of the final word alone. The bus
    /// must be idle.
    #[cfg_attr(feature = "esp32", esp_hal::ram)]
    pub fn write_colors(&mut self, src: ColorSource<'_>) -> Result<()> {
        let total = src.len();
        let mut sent = 0;

        while sent < total {
            if sent > 0 {
                self.wait_idle()?;
            }
            let n = (total - sent).min(PIXELS_PER_CHUNK);

            let mut idx = 0;
            let mut px = 0;
            while px < n {
                let mut wd = wire16(src.get(sent + px));
                if px + 1 < n {
                    wd |= wire16(src.get(sent + px + 1)) << 16;
                }
                self.regs.write(regs::spi_w(self.host, idx), wd);
                idx += 1;
                px += 2;
            }

            self.set_lengths((n * 16) as u32 - 1, 0);
            self.start();
            sent += n;
        }
        Ok(())
    }
}
