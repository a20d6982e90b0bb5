//! Scheduler hooks bracketing non-preemptible bus sequences.
//!
//! Short register sequences run with interrupts disabled; whole display
//! transactions (window + pixel stream) run with task switching suspended.

/// Interrupt and task-switch control.
pub trait Scheduler {
    fn disable_interrupts(&mut self);

    fn enable_interrupts(&mut self);

    fn suspend_all(&mut self);

    fn resume_all(&mut self);
}

impl<S: Scheduler + ?Sized> Scheduler for &mut S {
    fn disable_interrupts(&mut self) {
        (**self).disable_interrupts()
    }
    fn enable_interrupts(&mut self) {
        (**self).enable_interrupts()
    }
    fn suspend_all(&mut self) {
        (**self).suspend_all()
    }
    fn resume_all(&mut self) {
        (**self).resume_all()
    }
}

/// Which bracket to put around a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    /// Interrupts disabled.
    Interrupts,
    /// Task switching suspended.
    Tasks,
}

#[inline]
pub fn enter<S: Scheduler>(sched: &mut S, section: Section) {
    match section {
        Section::Interrupts => sched.disable_interrupts(),
        Section::Tasks => sched.suspend_all(),
    }
}

#[inline]
pub fn leave<S: Scheduler>(sched: &mut S, section: Section) {
    match section {
        Section::Interrupts => sched.enable_interrupts(),
        Section::Tasks => sched.resume_all(),
    }
}

/// Bare-metal scheduler built on the `critical-section` implementation of the
/// target. Without an RTOS, suspending task switching and masking interrupts
/// are the same critical section; nesting is tracked so the outermost release
/// restores the saved state.
pub struct CriticalSectionScheduler {
    stack: heapless::Vec<critical_section::RestoreState, 4>,
}

impl Default for CriticalSectionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalSectionScheduler {
    pub const fn new() -> Self {
        Self { stack: heapless::Vec::new() }
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn enter(&mut self) {
        // SAFETY: every acquire is paired with a release in `leave`, in LIFO order.
        let state = unsafe { critical_section::acquire() };
        if let Err(state) = self.stack.push(state) {
            // nesting this deep never happens in the driver; undo and carry on
            unsafe { critical_section::release(state) };
        }
    }

    fn leave(&mut self) {
        if let Some(state) = self.stack.pop() {
            // SAFETY: `state` came from the matching `acquire` in `enter`.
            unsafe { critical_section::release(state) };
        }
    }
}

impl Scheduler for CriticalSectionScheduler {
    fn disable_interrupts(&mut self) {
        self.enter();
    }

    fn enable_interrupts(&mut self) {
        self.leave();
    }

    fn suspend_all(&mut self) {
        self.enter();
    }

    fn resume_all(&mut self) {
        self.leave();
    }
}
