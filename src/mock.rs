//! Simulated hardware for host-side tests.
//!
//! Registers, GPIO, scheduler and delay all append to one shared event log,
//! so tests can check the relative order of pad changes and bus transactions.
//!
//! [`MockRegisters`] behaves like the SPI peripheral as far as the driver can
//! tell: setting `SPI_USR` completes a transaction immediately (unless the bus
//! is marked stuck), and the W0..W15 words are left untouched, which acts as a
//! MOSI→MISO loopback. Bytes queued with [`MockHardware::queue_rx`] are loaded
//! into the W words instead when a transaction clocks data in.

#![cfg(any(test, feature = "mock"))]

use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::gpio::{Direction, Gpio, PinFunction, Pull};
use crate::regs::{self, Registers};
use crate::sched::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioOp {
    Direction(u8, Direction),
    Pull(u8, Pull),
    Level(u8, bool),
    RouteIn { pin: u8, signal: u16 },
    RouteOut { pin: u8, signal: u16 },
    BypassIn(u16),
    Function(u8, PinFunction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedOp {
    DisableIrq,
    EnableIrq,
    Suspend,
    Resume,
}

/// One hardware transaction triggered through `SPI_USR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub host: u8,
    pub mosi_bits: u32,
    pub miso_bits: u32,
    /// W words covering `mosi_bits`, as written before the trigger.
    pub words: Vec<u32>,
}

impl Transaction {
    /// Outgoing bytes in wire order.
    pub fn bytes(&self) -> Vec<u8> {
        let n = (self.mosi_bits / 8) as usize;
        self.words.iter().flat_map(|w| w.to_le_bytes()).take(n).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write { addr: u32, value: u32 },
    Transaction(Transaction),
    Gpio(GpioOp),
    Sched(SchedOp),
    DelayMs(u32),
    DelayNs(u32),
}

#[derive(Default)]
struct State {
    mem: BTreeMap<u32, u32>,
    events: Vec<Event>,
    rx: VecDeque<u8>,
    stuck: bool,
}

type Shared = Rc<RefCell<State>>;

/// Factory for mock backends that share one log.
#[derive(Clone, Default)]
pub struct MockHardware {
    state: Shared,
}

impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registers(&self) -> MockRegisters {
        MockRegisters { state: self.state.clone() }
    }

    pub fn gpio(&self) -> MockGpio {
        MockGpio { state: self.state.clone() }
    }

    pub fn scheduler(&self) -> MockScheduler {
        MockScheduler { state: self.state.clone() }
    }

    pub fn delay(&self) -> MockDelay {
        MockDelay { state: self.state.clone() }
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Transaction(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of register writes logged so far.
    pub fn register_writes(&self) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| matches!(e, Event::Write { .. }))
            .count()
    }

    /// Bytes the "device" shifts out on the next reads.
    pub fn queue_rx(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// A stuck bus never clears `SPI_USR`.
    pub fn set_stuck(&self, stuck: bool) {
        self.state.borrow_mut().stuck = stuck;
    }

    pub fn peek(&self, addr: u32) -> u32 {
        self.state.borrow().mem.get(&addr).copied().unwrap_or(0)
    }

    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        writes_to(&self.state, addr)
    }
}

fn writes_to(state: &Shared, addr: u32) -> Vec<u32> {
    state
        .borrow()
        .events
        .iter()
        .filter_map(|e| match *e {
            Event::Write { addr: a, value } if a == addr => Some(value),
            _ => None,
        })
        .collect()
}

fn host_of_cmd(addr: u32) -> Option<u8> {
    (0..4u8).find(|&h| regs::spi_reg(h, regs::SPI_CMD) == addr)
}

/// Simulated register file.
#[derive(Clone, Default)]
pub struct MockRegisters {
    state: Shared,
}

impl MockRegisters {
    /// Standalone register file with its own log.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peek(&self, addr: u32) -> u32 {
        self.state.borrow().mem.get(&addr).copied().unwrap_or(0)
    }

    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        writes_to(&self.state, addr)
    }

    fn run_transaction(st: &mut State, host: u8) {
        let dlen = |st: &State, off| {
            st.mem.get(&regs::spi_reg(host, off)).copied().unwrap_or(0) & regs::SPI_USR_DBITLEN
        };
        let mosi_bits = dlen(st, regs::SPI_MOSI_DLEN) + 1;
        let miso_bits = dlen(st, regs::SPI_MISO_DLEN) + 1;

        let nwords = mosi_bits.div_ceil(32) as usize;
        let words = (0..nwords)
            .map(|i| st.mem.get(&regs::spi_w(host, i)).copied().unwrap_or(0))
            .collect();
        st.events.push(Event::Transaction(Transaction { host, mosi_bits, miso_bits, words }));

        // clock queued device bytes into the W words
        let nbytes = (miso_bits / 8) as usize;
        if nbytes > 0 && !st.rx.is_empty() {
            for i in 0..nbytes.div_ceil(4) {
                let mut b = [0u8; 4];
                for slot in b.iter_mut().take(nbytes - i * 4) {
                    *slot = st.rx.pop_front().unwrap_or(0xFF);
                }
                st.mem.insert(regs::spi_w(host, i), u32::from_le_bytes(b));
            }
        }
    }
}

impl Registers for MockRegisters {
    fn read(&mut self, addr: u32) -> u32 {
        self.peek(addr)
    }

    fn write(&mut self, addr: u32, value: u32) {
        let mut st = self.state.borrow_mut();
        st.events.push(Event::Write { addr, value });
        st.mem.insert(addr, value);

        if value & regs::SPI_USR != 0 {
            if let Some(host) = host_of_cmd(addr) {
                Self::run_transaction(&mut st, host);
                if !st.stuck {
                    st.mem.insert(addr, value & !regs::SPI_USR);
                }
            }
        }
    }
}

/// Logs every pad operation.
#[derive(Clone)]
pub struct MockGpio {
    state: Shared,
}

impl MockGpio {
    fn push(&self, op: GpioOp) {
        self.state.borrow_mut().events.push(Event::Gpio(op));
    }
}

impl Gpio for MockGpio {
    fn set_direction(&mut self, pin: u8, dir: Direction) {
        self.push(GpioOp::Direction(pin, dir));
    }

    fn set_pull(&mut self, pin: u8, pull: Pull) {
        self.push(GpioOp::Pull(pin, pull));
    }

    fn set_level(&mut self, pin: u8, high: bool) {
        self.push(GpioOp::Level(pin, high));
    }

    fn route_input(&mut self, pin: u8, signal: u16, _invert: bool) {
        self.push(GpioOp::RouteIn { pin, signal });
    }

    fn route_output(&mut self, pin: u8, signal: u16, _invert: bool, _oe_invert: bool) {
        self.push(GpioOp::RouteOut { pin, signal });
    }

    fn bypass_input(&mut self, signal: u16) {
        self.push(GpioOp::BypassIn(signal));
    }

    fn select_function(&mut self, pin: u8, function: PinFunction) {
        self.push(GpioOp::Function(pin, function));
    }
}

#[derive(Clone)]
pub struct MockScheduler {
    state: Shared,
}

impl MockScheduler {
    fn push(&self, op: SchedOp) {
        self.state.borrow_mut().events.push(Event::Sched(op));
    }
}

impl Scheduler for MockScheduler {
    fn disable_interrupts(&mut self) {
        self.push(SchedOp::DisableIrq);
    }

    fn enable_interrupts(&mut self) {
        self.push(SchedOp::EnableIrq);
    }

    fn suspend_all(&mut self) {
        self.push(SchedOp::Suspend);
    }

    fn resume_all(&mut self) {
        self.push(SchedOp::Resume);
    }
}

#[derive(Clone)]
pub struct MockDelay {
    state: Shared,
}

impl embedded_hal::delay::DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.state.borrow_mut().events.push(Event::DelayNs(ns));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.state.borrow_mut().events.push(Event::DelayMs(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usr_completes_and_logs_transaction() {
        let hw = MockHardware::new();
        let mut r = hw.registers();

        r.write(regs::spi_reg(3, regs::SPI_MOSI_DLEN), 15);
        r.write(regs::spi_w(3, 0), 0x3412);
        r.set_bits(regs::spi_reg(3, regs::SPI_CMD), regs::SPI_USR);

        assert_eq!(r.read(regs::spi_reg(3, regs::SPI_CMD)) & regs::SPI_USR, 0);
        let t = hw.transactions();
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].bytes(), [0x12, 0x34]);
    }

    #[test]
    fn test_queued_rx_fills_words() {
        let hw = MockHardware::new();
        let mut r = hw.registers();
        hw.queue_rx(&[1, 2, 3, 4, 5]);

        r.write(regs::spi_reg(2, regs::SPI_MISO_DLEN), 39);
        r.write(regs::spi_reg(2, regs::SPI_CMD), regs::SPI_USR);

        assert_eq!(r.read(regs::spi_w(2, 0)), 0x0403_0201);
        assert_eq!(r.read(regs::spi_w(2, 1)), 0x05);
    }

    #[test]
    fn test_stuck_bus_keeps_usr() {
        let hw = MockHardware::new();
        let mut r = hw.registers();
        hw.set_stuck(true);

        r.write(regs::spi_reg(1, regs::SPI_CMD), regs::SPI_USR);
        assert_ne!(r.read(regs::spi_reg(1, regs::SPI_CMD)) & regs::SPI_USR, 0);
    }
}
