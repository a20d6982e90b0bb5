//! Shared SPI bus: per-unit configuration and lazy reprogramming.
//!
//! Several logical units share one SPI host. Each unit keeps its own pins,
//! mode, clock and duplex setting; the hardware is only reprogrammed when a
//! unit is selected and its settings are stale (it was changed, or another
//! unit used the host in between).
//!
//! Unit numbering: `unit = host | (slot << 2)` with host in 1..=3 and slot in
//! 0..3. The host number is the low two bits.

use alloc::vec::Vec;
use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, Operation, SpiDevice};

use crate::clock::{divisor_to_frequency, frequency_to_divisor, ClockDivisor};
use crate::error::{Error, Result};
use crate::gpio::Gpio;
use crate::lock::{Owner, PinLock};
use crate::pins::{self, PinSet};
use crate::regs::{self, Registers};
use crate::sched::{self, Scheduler, Section};
use crate::transfer::{Engine, WaitPolicy, TRANSFER_BYTES};

pub const FIRST_HOST: u8 = 1;
pub const LAST_HOST: u8 = 3;
/// Device slots per host.
pub const SLOTS_PER_HOST: u8 = 3;
/// Size of the unit table, indexed by unit number.
pub const NUM_UNITS: usize = 12;

/// Speed applied by `init` when the unit has none yet.
pub const DEFAULT_SPEED_KHZ: u32 = 1000;

const NAMES: [&str; 4] = ["spi0", "spi1", "spi2", "spi3"];

/// Runtime options of the bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusConfig {
    pub wait: WaitPolicy,
}

/// Stored settings of one logical unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnitConfig {
    pub pins: PinSet,
    pub mode: u8,
    pub speed_khz: u32,
    pub divisor: ClockDivisor,
    pub duplex: bool,
    /// Hardware does not reflect these settings yet.
    pub dirty: bool,
}

#[inline]
const fn host_of(unit: u8) -> u8 {
    unit & 3
}

/// Unit number for `host` and `slot`.
pub const fn unit(host: u8, slot: u8) -> u8 {
    (host & 3) | (slot << 2)
}

fn check(unit: u8) -> Result<usize> {
    let host = host_of(unit);
    if !(FIRST_HOST..=LAST_HOST).contains(&host) || (unit >> 2) >= SLOTS_PER_HOST {
        return Err(Error::InvalidUnit(unit));
    }
    Ok(unit as usize)
}

/// Owner of the SPI hosts and the unit table.
pub struct SpiBus<R, G, S> {
    regs: R,
    gpio: G,
    sched: S,
    config: BusConfig,
    units: [UnitConfig; NUM_UNITS],
    // unit that held the bus most recently
    last: Option<u8>,
}

impl<R, G, S> SpiBus<R, G, S>
where
    R: Registers,
    G: Gpio,
    S: Scheduler,
{
    pub fn new(regs: R, gpio: G, sched: S) -> Self {
        Self::with_config(regs, gpio, sched, BusConfig::default())
    }

    pub fn with_config(regs: R, gpio: G, sched: S, config: BusConfig) -> Self {
        Self {
            regs,
            gpio,
            sched,
            config,
            units: [UnitConfig::default(); NUM_UNITS],
            last: None,
        }
    }

    pub fn release(self) -> (R, G, S) {
        (self.regs, self.gpio, self.sched)
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.sched
    }

    pub fn unit_config(&self, unit: u8) -> Result<&UnitConfig> {
        Ok(&self.units[check(unit)?])
    }

    /// Bus name of `unit`'s host.
    pub fn name(unit: u8) -> &'static str {
        NAMES[host_of(unit) as usize]
    }

    pub fn configure_pins(&mut self, unit: u8, sdi: u8, sdo: u8, sck: u8, cs: u8) -> Result<()> {
        let idx = check(unit)?;
        self.set_cs_pin(unit, cs)?;

        let u = &mut self.units[idx];
        u.pins = PinSet::new(sdi, sdo, sck, cs);
        u.dirty = true;
        Ok(())
    }

    pub fn pins(&self, unit: u8) -> Result<PinSet> {
        Ok(self.units[check(unit)?].pins)
    }

    pub fn set_mode(&mut self, unit: u8, mode: u8) -> Result<()> {
        let idx = check(unit)?;
        if mode > 3 {
            return Err(Error::InvalidMode(mode));
        }
        self.units[idx].mode = mode;
        self.units[idx].dirty = true;
        Ok(())
    }

    pub fn set_speed(&mut self, unit: u8, khz: u32) -> Result<()> {
        let idx = check(unit)?;
        let u = &mut self.units[idx];
        u.speed_khz = khz;
        u.divisor = frequency_to_divisor(khz.saturating_mul(1000));
        u.dirty = true;
        Ok(())
    }

    /// Clock actually produced for `unit`, in kHz. 0 when no speed was set.
    pub fn speed_khz(&self, unit: u8) -> Result<u32> {
        let u = &self.units[check(unit)?];
        if u.speed_khz == 0 {
            return Ok(0);
        }
        Ok(divisor_to_frequency(u.divisor) / 1000)
    }

    /// Store `pin` as chip select; a new nonzero pin is made an output and
    /// driven high (deselected).
    pub fn set_cs_pin(&mut self, unit: u8, pin: u8) -> Result<()> {
        let idx = check(unit)?;
        let u = &mut self.units[idx];
        if pin != u.pins.cs {
            u.pins.cs = pin;
            if pin != 0 {
                u.dirty = true;
                self.gpio.set_output(pin);
                self.gpio.set_level(pin, true);
            }
        }
        Ok(())
    }

    pub fn cs_pin(&self, unit: u8) -> Result<u8> {
        Ok(self.units[check(unit)?].pins.cs)
    }

    pub fn set_duplex(&mut self, unit: u8, full: bool) -> Result<()> {
        let idx = check(unit)?;
        self.units[idx].duplex = full;
        self.units[idx].dirty = true;
        Ok(())
    }

    pub fn mark_dirty(&mut self, unit: u8) -> Result<()> {
        let idx = check(unit)?;
        self.units[idx].dirty = true;
        Ok(())
    }

    /// Bring up `unit` as a master: default pins if none were configured,
    /// claim the pins, mode 0, full duplex.
    pub fn init<L: PinLock>(&mut self, unit: u8, master: bool, lock: &mut L) -> Result<()> {
        let idx = check(unit)?;
        if !master {
            return Err(Error::SlaveNotAllowed);
        }

        let host = host_of(unit);
        if self.units[idx].pins.sck == 0 {
            let def = pins::default_pins(host).ok_or(Error::CannotSetup)?;
            self.configure_pins(unit, def.sdi, def.sdo, def.sck, def.cs)?;
        }

        // units on one host share their data/clock pads, so the host is the lock holder
        let pins = self.units[idx].pins;
        let mut taken: heapless::Vec<u8, 4> = heapless::Vec::new();
        for pin in pins.as_array() {
            let fresh = lock.owner_of(pin).is_none();
            if let Err(conflict) = lock.acquire(Owner::Spi, host, pin) {
                // give back what this call claimed, pins shared with other units stay held
                for held in taken {
                    lock.release(Owner::Spi, host, held);
                }
                log::warn!(
                    "{}: pin {} is used by {:?}{}",
                    Self::name(unit),
                    pin,
                    conflict.owner,
                    conflict.unit
                );
                return Err(Error::PinLocked { pin, owner: conflict.owner, unit: conflict.unit });
            }
            if fresh {
                let _ = taken.push(pin);
            }
        }

        log::info!(
            "{}: unit {} at pins sdi={} sdo={} sck={} cs={}",
            Self::name(unit),
            unit,
            pins.sdi,
            pins.sdo,
            pins.sck,
            pins.cs
        );

        self.set_mode(unit, 0)?;
        self.set_duplex(unit, true)?;
        if self.units[idx].speed_khz == 0 {
            self.set_speed(unit, DEFAULT_SPEED_KHZ)?;
        }
        self.units[idx].dirty = true;
        Ok(())
    }

    /// Take the bus for `unit`, reprogramming the host if needed, and assert CS.
    pub fn select(&mut self, unit: u8) -> Result<()> {
        let idx = check(unit)?;
        let host = host_of(unit);

        // `last` only moves once the hand-off went through, so a failed
        // reprogram is retried against the same previous unit
        let mut prev = None;
        if self.last != Some(unit) {
            if let Some(last) = self.last {
                self.units[last as usize].dirty = true;
                prev = Some((host_of(last), self.units[last as usize].pins));
            }
            self.units[idx].dirty = true;
        }

        if self.units[idx].dirty {
            self.reprogram(host, idx, prev)?;
        }
        self.last = Some(unit);

        let cs = self.units[idx].pins.cs;
        if cs != 0 {
            self.gpio.set_level(cs, false);
        }
        Ok(())
    }

    /// Release CS once the bus is idle.
    pub fn deselect(&mut self, unit: u8) -> Result<()> {
        let idx = check(unit)?;
        let u = self.units[idx];
        if u.dirty || u.pins.cs == 0 {
            return Ok(());
        }
        Engine::new(&mut self.regs, host_of(unit), self.config.wait).wait_idle()?;
        self.gpio.set_level(u.pins.cs, true);
        Ok(())
    }

    fn reprogram(&mut self, host: u8, idx: usize, prev: Option<(u8, PinSet)>) -> Result<()> {
        let u = self.units[idx];
        log::debug!("{}: reprogramming for unit {} (mode {}, {:?})", NAMES[host as usize], idx, u.mode, u.divisor);

        Engine::new(&mut self.regs, host, self.config.wait).wait_idle()?;

        if let Some((prev_host, _)) = prev {
            self.finish_pending(prev_host);
        }
        self.finish_pending(host);

        pins::hand_off(&mut self.gpio, prev, (host, u.pins));

        let r = &mut self.regs;
        let reg = |off| regs::spi_reg(host, off);

        r.write(reg(regs::SPI_USER), 0);

        // mode -> (clock idles high, data changes on the leading edge)
        let (idle_high, out_edge) = match u.mode {
            0 => (false, false),
            1 => (false, true),
            2 => (true, false),
            _ => (true, true),
        };
        if idle_high {
            r.set_bits(reg(regs::SPI_PIN), regs::SPI_CK_IDLE_EDGE);
        } else {
            r.clear_bits(reg(regs::SPI_PIN), regs::SPI_CK_IDLE_EDGE);
        }
        if out_edge {
            r.set_bits(reg(regs::SPI_USER), regs::SPI_CK_OUT_EDGE);
        } else {
            r.clear_bits(reg(regs::SPI_USER), regs::SPI_CK_OUT_EDGE);
        }

        // MSB first
        r.clear_bits(reg(regs::SPI_CTRL), regs::SPI_WR_BIT_ORDER | regs::SPI_RD_BIT_ORDER);

        if u.duplex {
            r.set_bits(reg(regs::SPI_USER), regs::SPI_DOUTDIN);
        }

        // master
        r.write(reg(regs::SPI_USER1), 0);
        r.set_field(reg(regs::SPI_CTRL2), regs::SPI_MISO_DELAY_MODE, 0, regs::SPI_MISO_DELAY_MODE_S);
        r.clear_bits(reg(regs::SPI_SLAVE), regs::SPI_SLAVE_MODE);

        r.clear_bits(reg(regs::SPI_CLOCK), regs::SPI_CLK_EQU_SYSCLK);
        r.write(reg(regs::SPI_CLOCK), u.divisor.bits());

        r.set_bits(
            reg(regs::SPI_USER),
            regs::SPI_CS_SETUP | regs::SPI_CS_HOLD | regs::SPI_USR_MOSI | regs::SPI_USR_MISO,
        );
        r.set_bits(
            reg(regs::SPI_CTRL2),
            (4 & regs::SPI_MISO_DELAY_NUM) << regs::SPI_MISO_DELAY_NUM_S,
        );

        // no command or address phase
        r.clear_bits(reg(regs::SPI_USER), regs::SPI_USR_COMMAND);
        r.set_field(reg(regs::SPI_USER2), regs::SPI_USR_COMMAND_BITLEN, 0, regs::SPI_USR_COMMAND_BITLEN_S);
        r.clear_bits(reg(regs::SPI_USER), regs::SPI_USR_ADDR);
        r.set_field(reg(regs::SPI_USER1), regs::SPI_USR_ADDR_BITLEN, 0, regs::SPI_USR_ADDR_BITLEN_S);

        self.units[idx].dirty = false;
        Ok(())
    }

    // Complete operations, if pending
    fn finish_pending(&mut self, host: u8) {
        self.regs
            .clear_bits(regs::spi_reg(host, regs::SPI_SLAVE), regs::SPI_TRANS_DONE << 5);
        self.regs.set_bits(regs::spi_reg(host, regs::SPI_USER), regs::SPI_CS_SETUP);
    }

    /// select → `f` → deselect with task switching suspended.
    pub fn transaction<T>(
        &mut self,
        unit: u8,
        f: impl FnOnce(&mut Engine<'_, R>, &mut G) -> Result<T>,
    ) -> Result<T> {
        self.transaction_in(unit, Section::Tasks, f)
    }

    /// select → `f` → deselect inside `section`. Deselect runs even if `f`
    /// fails; the first error wins.
    pub fn transaction_in<T>(
        &mut self,
        unit: u8,
        section: Section,
        f: impl FnOnce(&mut Engine<'_, R>, &mut G) -> Result<T>,
    ) -> Result<T> {
        check(unit)?;
        sched::enter(&mut self.sched, section);
        let out = self.selected(unit, f);
        sched::leave(&mut self.sched, section);
        out
    }

    fn selected<T>(
        &mut self,
        unit: u8,
        f: impl FnOnce(&mut Engine<'_, R>, &mut G) -> Result<T>,
    ) -> Result<T> {
        self.select(unit)?;
        let out = {
            let mut eng = Engine::new(&mut self.regs, host_of(unit), self.config.wait);
            f(&mut eng, &mut self.gpio)
        };
        let released = self.deselect(unit);
        let value = out?;
        released?;
        Ok(value)
    }

    // Run `f` on the unit's host with interrupts disabled.
    fn with_engine<T>(&mut self, unit: u8, f: impl FnOnce(&mut Engine<'_, R>) -> Result<T>) -> Result<T> {
        check(unit)?;
        sched::enter(&mut self.sched, Section::Interrupts);
        let out = f(&mut Engine::new(&mut self.regs, host_of(unit), self.config.wait));
        sched::leave(&mut self.sched, Section::Interrupts);
        out
    }

    // Bit order is LSB first on the host
    fn lsb_first(&mut self, unit: u8) -> bool {
        self.regs.read(regs::spi_reg(host_of(unit), regs::SPI_CTRL))
            & (regs::SPI_WR_BIT_ORDER | regs::SPI_RD_BIT_ORDER)
            != 0
    }

    /// Exchange one byte.
    pub fn transfer_byte(&mut self, unit: u8, data: u8) -> Result<u8> {
        check(unit)?;
        let mut read = [0u8];
        Engine::new(&mut self.regs, host_of(unit), self.config.wait)
            .transfer(1, 1, Some(&[data][..]), Some(&mut read[..]))?;
        Ok(read[0])
    }

    pub fn bulk_write(&mut self, unit: u8, data: &[u8]) -> Result<()> {
        self.with_engine(unit, |eng| eng.transfer(1, data.len(), Some(data), None))
    }

    pub fn bulk_read(&mut self, unit: u8, data: &mut [u8]) -> Result<()> {
        let n = data.len();
        self.with_engine(unit, |eng| eng.transfer(1, n, None, Some(data)))
    }

    /// Send `data` and replace it with the bytes clocked in.
    pub fn bulk_rw(&mut self, unit: u8, data: &mut [u8]) -> Result<()> {
        check(unit)?;
        let mut read = Vec::new();
        if read.try_reserve_exact(data.len()).is_err() {
            log::warn!("{}: no memory for a {} byte read buffer", Self::name(unit), data.len());
            return Err(Error::OutOfMemory);
        }
        read.resize(data.len(), 0u8);

        let n = data.len();
        self.with_engine(unit, |eng| eng.transfer(1, n, Some(&*data), Some(&mut read[..])))?;
        data.copy_from_slice(&read);
        Ok(())
    }

    pub fn bulk_write16(&mut self, unit: u8, data: &[u16]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.with_engine(unit, |eng| eng.transfer(2, data.len(), Some(bytes), None))
    }

    pub fn bulk_read16(&mut self, unit: u8, data: &mut [u16]) -> Result<()> {
        let n = data.len();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        self.with_engine(unit, |eng| eng.transfer(2, n, None, Some(bytes)))
    }

    pub fn bulk_write32(&mut self, unit: u8, data: &[u32]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.with_engine(unit, |eng| eng.transfer(4, data.len(), Some(bytes), None))
    }

    /// Send 32-bit words most significant byte first. When the host shifts
    /// LSB first the words are byte-swapped in place before sending.
    pub fn bulk_write32_be(&mut self, unit: u8, data: &mut [u32]) -> Result<()> {
        check(unit)?;
        if self.lsb_first(unit) {
            data.iter_mut().for_each(|w| *w = w.swap_bytes());
        }
        self.bulk_write32(unit, data)
    }

    pub fn bulk_read32_be(&mut self, unit: u8, data: &mut [u32]) -> Result<()> {
        let n = data.len();
        {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
            self.with_engine(unit, |eng| eng.transfer(4, n, None, Some(bytes)))?;
        }
        if self.lsb_first(unit) {
            data.iter_mut().for_each(|w| *w = w.swap_bytes());
        }
        Ok(())
    }

    /// embedded-hal view of `unit`, for generic device drivers.
    pub fn device<D: DelayNs>(&mut self, unit: u8, delay: D) -> Result<UnitDevice<'_, R, G, S, D>> {
        check(unit)?;
        Ok(UnitDevice { bus: self, unit, delay })
    }
}

/// One unit of a [`SpiBus`] as an `embedded_hal::spi::SpiDevice`.
///
/// Each `transaction` selects the unit, runs the operations and deselects,
/// with task switching suspended throughout.
pub struct UnitDevice<'b, R, G, S, D> {
    bus: &'b mut SpiBus<R, G, S>,
    unit: u8,
    delay: D,
}

impl<R, G, S, D> ErrorType for UnitDevice<'_, R, G, S, D> {
    type Error = Error;
}

impl<R, G, S, D> SpiDevice<u8> for UnitDevice<'_, R, G, S, D>
where
    R: Registers,
    G: Gpio,
    S: Scheduler,
    D: DelayNs,
{
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<()> {
        let delay = &mut self.delay;
        self.bus.transaction(self.unit, |eng, _| {
            for op in operations.iter_mut() {
                match op {
                    Operation::Read(buf) => {
                        let n = buf.len();
                        eng.transfer(1, n, None, Some(&mut buf[..]))?;
                    }
                    Operation::Write(buf) => eng.transfer(1, buf.len(), Some(&buf[..]), None)?,
                    Operation::Transfer(read, write) => {
                        let n = read.len().max(write.len());
                        eng.transfer(1, n, Some(&write[..]), Some(&mut read[..]))?;
                    }
                    Operation::TransferInPlace(buf) => {
                        for chunk in buf.chunks_mut(TRANSFER_BYTES) {
                            let mut out = [0u8; TRANSFER_BYTES];
                            out[..chunk.len()].copy_from_slice(chunk);
                            let n = chunk.len();
                            eng.transfer(1, n, Some(&out[..n]), Some(chunk))?;
                        }
                    }
                    Operation::DelayNs(ns) => {
                        eng.wait_idle()?;
                        delay.delay_ns(*ns);
                    }
                }
            }
            Ok(())
        })
    }
}

/// [`SpiBus`] behind a critical-section mutex, for sharing between tasks and
/// interrupt handlers. Every access holds the lock for the whole
/// select → deselect sequence.
pub struct SharedBus<R, G, S> {
    inner: Mutex<RefCell<SpiBus<R, G, S>>>,
}

impl<R, G, S> SharedBus<R, G, S>
where
    R: Registers,
    G: Gpio,
    S: Scheduler,
{
    pub const fn new(bus: SpiBus<R, G, S>) -> Self {
        Self { inner: Mutex::new(RefCell::new(bus)) }
    }

    pub fn lock<T>(&self, f: impl FnOnce(&mut SpiBus<R, G, S>) -> T) -> T {
        critical_section::with(|cs| f(&mut *self.inner.borrow_ref_mut(cs)))
    }

    pub fn into_inner(self) -> SpiBus<R, G, S> {
        self.inner.into_inner().into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MATRIX_DETACH_OUT;
    use crate::lock::PinLockTable;
    use crate::mock::{Event, GpioOp, MockGpio, MockHardware, MockRegisters, MockScheduler, SchedOp};
    use alloc::vec;

    type Bus = SpiBus<MockRegisters, MockGpio, MockScheduler>;

    const VSPI: u8 = 3;
    const TOUCH: u8 = unit(3, 1);

    fn bus(hw: &MockHardware) -> Bus {
        SpiBus::new(hw.registers(), hw.gpio(), hw.scheduler())
    }

    fn clock_writes(hw: &MockHardware) -> usize {
        hw.writes_to(regs::spi_reg(3, regs::SPI_CLOCK)).len()
    }

    #[test]
    fn test_invalid_units_touch_nothing() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);

        for unit in [0, 4, 8, 12, unit(1, 3), 0xFF] {
            assert_eq!(bus.select(unit), Err(Error::InvalidUnit(unit)));
            assert_eq!(bus.deselect(unit), Err(Error::InvalidUnit(unit)));
            assert_eq!(bus.set_mode(unit, 0), Err(Error::InvalidUnit(unit)));
            assert_eq!(bus.set_speed(unit, 1000), Err(Error::InvalidUnit(unit)));
            assert_eq!(bus.bulk_write(unit, &[1, 2]), Err(Error::InvalidUnit(unit)));
        }
        assert!(hw.events().is_empty());
    }

    #[test]
    fn test_invalid_mode() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        assert_eq!(bus.set_mode(VSPI, 4), Err(Error::InvalidMode(4)));
        assert!(bus.set_mode(VSPI, 3).is_ok());
    }

    #[test]
    fn test_init_defaults() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        let mut locks = PinLockTable::new();

        bus.init(VSPI, true, &mut locks).unwrap();

        assert_eq!(bus.pins(VSPI).unwrap(), PinSet::new(19, 23, 18, 5));
        assert_eq!(bus.speed_khz(VSPI).unwrap(), 1000);
        let cfg = bus.unit_config(VSPI).unwrap();
        assert_eq!(cfg.mode, 0);
        assert!(cfg.duplex);
        assert!(cfg.dirty);
        assert_eq!(locks.owner_of(18), Some((Owner::Spi, 3)));
    }

    #[test]
    fn test_init_slave_rejected() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        assert_eq!(bus.init(VSPI, false, &mut PinLockTable::new()), Err(Error::SlaveNotAllowed));
    }

    #[test]
    fn test_init_reports_lock_owner() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        let mut locks = PinLockTable::new();
        locks.acquire(Owner::I2c, 0, 18).unwrap();

        assert_eq!(
            bus.init(VSPI, true, &mut locks),
            Err(Error::PinLocked { pin: 18, owner: Owner::I2c, unit: 0 })
        );
    }

    #[test]
    fn test_init_lock_failure_releases_claimed_pins() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        let mut locks = PinLockTable::new();
        locks.acquire(Owner::I2c, 0, 18).unwrap();

        assert!(bus.init(VSPI, true, &mut locks).is_err());
        assert_eq!(locks.owner_of(19), None);
        assert_eq!(locks.owner_of(23), None);
        assert_eq!(locks.owner_of(18), Some((Owner::I2c, 0)));
    }

    #[test]
    fn test_init_failure_keeps_pins_shared_with_other_units() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        let mut locks = PinLockTable::new();
        bus.init(VSPI, true, &mut locks).unwrap();
        locks.acquire(Owner::Uart, 1, 4).unwrap();

        bus.configure_pins(TOUCH, 19, 23, 18, 4).unwrap();
        assert_eq!(
            bus.init(TOUCH, true, &mut locks),
            Err(Error::PinLocked { pin: 4, owner: Owner::Uart, unit: 1 })
        );
        for pin in [19, 23, 18, 5] {
            assert_eq!(locks.owner_of(pin), Some((Owner::Spi, 3)));
        }
    }

    #[test]
    fn test_failed_select_retries_hand_off() {
        let hw = MockHardware::new();
        let mut bus = SpiBus::with_config(
            hw.registers(),
            hw.gpio(),
            hw.scheduler(),
            BusConfig { wait: WaitPolicy::Spins(4) },
        );
        let mut locks = PinLockTable::new();
        bus.configure_pins(TOUCH, 25, 26, 27, 4).unwrap();
        bus.init(TOUCH, true, &mut locks).unwrap();
        bus.init(VSPI, true, &mut locks).unwrap();

        bus.select(TOUCH).unwrap();
        bus.deselect(TOUCH).unwrap();

        let cmd = regs::spi_reg(3, regs::SPI_CMD);
        let mut r = hw.registers();
        hw.set_stuck(true);
        r.write(cmd, regs::SPI_USR);
        assert_eq!(bus.select(VSPI), Err(Error::Timeout));

        hw.set_stuck(false);
        r.write(cmd, 0);
        hw.clear_events();
        bus.select(VSPI).unwrap();

        // the touch unit's matrix pads are released on the retry
        let ev = hw.events();
        assert!(ev.contains(&Event::Gpio(GpioOp::RouteOut { pin: 26, signal: MATRIX_DETACH_OUT })));
        assert!(ev.contains(&Event::Gpio(GpioOp::Level(4, true))));
    }

    #[test]
    fn test_units_on_one_host_share_pins() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        let mut locks = PinLockTable::new();

        bus.init(VSPI, true, &mut locks).unwrap();
        bus.configure_pins(TOUCH, 19, 23, 18, 4).unwrap();
        assert!(bus.init(TOUCH, true, &mut locks).is_ok());
    }

    #[test]
    fn test_speed_reports_achieved_clock() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);

        assert_eq!(bus.speed_khz(VSPI).unwrap(), 0);
        bus.set_speed(VSPI, 20_000).unwrap();
        assert_eq!(bus.speed_khz(VSPI).unwrap(), 20_000);
        bus.set_speed(VSPI, 27_000).unwrap();
        assert_eq!(bus.speed_khz(VSPI).unwrap(), 26_666);
    }

    #[test]
    fn test_names() {
        assert_eq!(Bus::name(VSPI), "spi3");
        assert_eq!(Bus::name(TOUCH), "spi3");
        assert_eq!(Bus::name(unit(2, 2)), "spi2");
    }

    #[test]
    fn test_reprogram_only_when_needed() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        let mut locks = PinLockTable::new();
        bus.init(VSPI, true, &mut locks).unwrap();
        bus.configure_pins(TOUCH, 19, 23, 18, 4).unwrap();
        bus.init(TOUCH, true, &mut locks).unwrap();

        // each reprogram clears EQU_SYSCLK then writes the divisor
        bus.select(VSPI).unwrap();
        bus.deselect(VSPI).unwrap();
        assert_eq!(clock_writes(&hw), 2);

        bus.select(VSPI).unwrap();
        bus.deselect(VSPI).unwrap();
        assert_eq!(clock_writes(&hw), 2);

        bus.select(TOUCH).unwrap();
        bus.deselect(TOUCH).unwrap();
        assert_eq!(clock_writes(&hw), 4);

        bus.select(VSPI).unwrap();
        bus.deselect(VSPI).unwrap();
        assert_eq!(clock_writes(&hw), 6);

        bus.set_speed(VSPI, 20_000).unwrap();
        bus.select(VSPI).unwrap();
        assert_eq!(clock_writes(&hw), 8);
        assert_eq!(hw.peek(regs::spi_reg(3, regs::SPI_CLOCK)), frequency_to_divisor(20_000_000).bits());
    }

    #[test]
    fn test_mode_table() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        bus.init(VSPI, true, &mut PinLockTable::new()).unwrap();

        for (mode, idle, edge) in [(0, false, false), (1, false, true), (2, true, false), (3, true, true)] {
            bus.set_mode(VSPI, mode).unwrap();
            bus.select(VSPI).unwrap();
            let pin = hw.peek(regs::spi_reg(3, regs::SPI_PIN));
            let user = hw.peek(regs::spi_reg(3, regs::SPI_USER));
            assert_eq!(pin & regs::SPI_CK_IDLE_EDGE != 0, idle, "mode {}", mode);
            assert_eq!(user & regs::SPI_CK_OUT_EDGE != 0, edge, "mode {}", mode);
            assert_ne!(user & regs::SPI_USR_MOSI, 0);
            assert_ne!(user & regs::SPI_DOUTDIN, 0);
            assert_eq!(user & (regs::SPI_USR_COMMAND | regs::SPI_USR_ADDR), 0);
            bus.deselect(VSPI).unwrap();
        }
    }

    #[test]
    fn test_half_duplex_clears_doutdin() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        bus.init(VSPI, true, &mut PinLockTable::new()).unwrap();
        bus.set_duplex(VSPI, false).unwrap();
        bus.select(VSPI).unwrap();
        assert_eq!(hw.peek(regs::spi_reg(3, regs::SPI_USER)) & regs::SPI_DOUTDIN, 0);
    }

    #[test]
    fn test_select_drives_cs() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        bus.init(VSPI, true, &mut PinLockTable::new()).unwrap();
        hw.clear_events();

        bus.select(VSPI).unwrap();
        bus.deselect(VSPI).unwrap();

        let levels: Vec<_> = hw
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Gpio(GpioOp::Level(5, _))))
            .collect();
        assert_eq!(
            levels,
            vec![Event::Gpio(GpioOp::Level(5, false)), Event::Gpio(GpioOp::Level(5, true))]
        );
    }

    #[test]
    fn test_deselect_noop_when_dirty() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        bus.configure_pins(VSPI, 19, 23, 18, 5).unwrap();
        hw.clear_events();

        assert!(bus.deselect(VSPI).is_ok());
        assert!(hw.events().is_empty());
    }

    #[test]
    fn test_transaction_deselects_after_error() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        bus.init(VSPI, true, &mut PinLockTable::new()).unwrap();
        hw.clear_events();

        let r: Result<()> = bus.transaction(VSPI, |_, _| Err(Error::CannotSetup));
        assert_eq!(r, Err(Error::CannotSetup));

        let ev = hw.events();
        assert_eq!(ev.first(), Some(&Event::Sched(SchedOp::Suspend)));
        assert_eq!(ev.last(), Some(&Event::Sched(SchedOp::Resume)));
        assert!(ev.contains(&Event::Gpio(GpioOp::Level(5, true))));
    }

    #[test]
    fn test_bulk_rw_loopback_in_chunks() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        bus.init(VSPI, true, &mut PinLockTable::new()).unwrap();
        bus.select(VSPI).unwrap();
        hw.clear_events();

        let mut data: Vec<u8> = (0..100u8).collect();
        bus.bulk_rw(VSPI, &mut data).unwrap();

        assert_eq!(hw.transactions().len(), 2);
        assert_eq!(data, (0..100u8).collect::<Vec<_>>());
        let ev = hw.events();
        assert_eq!(ev.first(), Some(&Event::Sched(SchedOp::DisableIrq)));
        assert_eq!(ev.last(), Some(&Event::Sched(SchedOp::EnableIrq)));
    }

    #[test]
    fn test_bulk_rw_returns_device_bytes() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        bus.init(VSPI, true, &mut PinLockTable::new()).unwrap();
        hw.queue_rx(&[0xA0, 0xA1, 0xA2]);

        let mut data = [1, 2, 3];
        bus.bulk_rw(VSPI, &mut data).unwrap();
        assert_eq!(data, [0xA0, 0xA1, 0xA2]);
        assert_eq!(hw.transactions()[0].bytes(), [1, 2, 3]);
    }

    #[test]
    fn test_bulk_write16_memory_order() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);

        bus.bulk_write16(VSPI, &[0x1234, 0xABCD]).unwrap();
        let tx = hw.transactions();
        assert_eq!(tx[0].mosi_bits, 32);
        assert_eq!(tx[0].bytes(), bytemuck::cast_slice::<u16, u8>(&[0x1234, 0xABCD]));
    }

    #[test]
    fn test_bulk_read32_be_msb_first_untouched() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        hw.queue_rx(&[1, 2, 3, 4]);

        let mut words = [0u32];
        bus.bulk_read32_be(VSPI, &mut words).unwrap();
        assert_eq!(words, [u32::from_ne_bytes([1, 2, 3, 4])]);
    }

    #[test]
    fn test_transfer_byte() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        hw.queue_rx(&[0x5A]);
        assert_eq!(bus.transfer_byte(VSPI, 0x11), Ok(0x5A));
        assert_eq!(hw.transactions()[0].mosi_bits, 8);
    }

    #[test]
    fn test_unit_device_transaction() {
        let hw = MockHardware::new();
        let mut bus = bus(&hw);
        bus.init(VSPI, true, &mut PinLockTable::new()).unwrap();

        let mut dev = bus.device(VSPI, hw.delay()).unwrap();
        let mut rx = [0u8; 2];
        hw.queue_rx(&[0x00, 0x12, 0x34]);
        dev.transaction(&mut [
            Operation::Write(&[0x90]),
            Operation::DelayNs(500),
            Operation::Read(&mut rx),
        ])
        .unwrap();

        let tx = hw.transactions();
        assert_eq!(tx[0].bytes(), [0x90]);
        assert_eq!(rx, [0x12, 0x34]);
        assert!(hw.events().contains(&Event::DelayNs(500)));
        assert!(hw.events().contains(&Event::Gpio(GpioOp::Level(5, true))));
    }

    #[test]
    fn test_shared_bus_lock() {
        let hw = MockHardware::new();
        let shared = SharedBus::new(bus(&hw));

        let r = shared.lock(|bus| bus.set_mode(VSPI, 2));
        assert!(r.is_ok());
        assert_eq!(shared.into_inner().unit_config(VSPI).unwrap().mode, 2);
    }
}
