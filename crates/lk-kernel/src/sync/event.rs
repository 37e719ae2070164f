use crate::arch::ArchCpu;
use crate::error::{KResult, KernelError};
use crate::types::{EventId, Timeout, Wait, WaitQueueId};
use crate::wait::WaitQueueOwner;
use crate::Kernel;
use bitflags::bitflags;

pub const EVENT_MAGIC: u32 = u32::from_be_bytes(*b"evnt");

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventFlags: u32 {
        /// Each signal releases at most one waiter and clears itself.
        const AUTOUNSIGNAL = 1 << 0;
    }
}

#[derive(Debug)]
pub struct Event {
    pub(crate) magic: u32,
    pub(crate) signaled: bool,
    pub(crate) flags: EventFlags,
    pub(crate) wait: WaitQueueId,
}

impl Event {
    pub fn is_signaled(&self) -> bool {
        self.signaled
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }
}

impl<C: ArchCpu> Kernel<C> {
    pub fn event_create(&mut self, initial: bool, flags: EventFlags) -> KResult<EventId> {
        let wait = self.wait_queue_alloc(WaitQueueOwner::Standalone)?;
        let event = Event {
            magic: EVENT_MAGIC,
            signaled: initial,
            flags,
            wait,
        };
        match self.events.insert(event) {
            Ok(index) => {
                let id = EventId(index);
                self.wq_mut(wait).owner = WaitQueueOwner::Event(id);
                Ok(id)
            }
            Err(_) => {
                self.wait_queues.remove(wait.0);
                Err(KernelError::NoMemory)
            }
        }
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.0).filter(|e| e.magic == EVENT_MAGIC)
    }

    pub fn event_initialized(&self, id: EventId) -> bool {
        self.event(id).is_some()
    }

    pub fn event_is_signaled(&self, id: EventId) -> Option<bool> {
        self.event(id).map(|e| e.signaled)
    }

    fn event_mut(&mut self, id: EventId) -> &mut Event {
        match self.events.get_mut(id.0) {
            Some(e) => {
                assert_eq!(e.magic, EVENT_MAGIC, "event {:?}: bad magic", id);
                e
            }
            None => panic!("event {:?}: stale or destroyed handle", id),
        }
    }

    pub fn event_destroy(&mut self, cpu: &mut C, id: EventId) {
        self.enter_critical_section(cpu);
        let e = self.event_mut(id);
        e.magic = 0;
        e.signaled = false;
        let wait = e.wait;
        self.events.remove(id.0);
        self.destroy_wait_queue_locked(cpu, wait, true);
        self.exit_critical_section(cpu);
    }

    /// Returns at once if the event is signaled (consuming the signal for an
    /// auto-unsignal event), otherwise blocks until a signal or `timeout`.
    pub fn event_wait(&mut self, cpu: &mut C, id: EventId, timeout: Timeout) -> KResult<Wait> {
        assert!(
            !self.in_interrupt(cpu),
            "event_wait: called from interrupt context"
        );
        self.enter_critical_section(cpu);
        let e = self.event_mut(id);
        let ret = if e.signaled {
            if e.flags.contains(EventFlags::AUTOUNSIGNAL) {
                e.signaled = false;
            }
            Ok(Wait::Done)
        } else if timeout.is_immediate() {
            Err(KernelError::TimedOut)
        } else {
            let wait = e.wait;
            self.block_locked(cpu, wait, timeout)
        };
        self.exit_critical_section(cpu);
        ret
    }

    /// Signals the event.
    ///
    /// Auto-unsignal: releases the longest waiter, or stays signaled for
    /// the next waiter if there is none. Otherwise the event stays signaled
    /// and every waiter is released. Signaling an already signaled event
    /// does nothing. `reschedule` must be false in interrupt context.
    pub fn event_signal(&mut self, cpu: &mut C, id: EventId, reschedule: bool) {
        assert!(
            !(reschedule && self.in_interrupt(cpu)),
            "event_signal: reschedule from interrupt context"
        );
        self.enter_critical_section(cpu);
        let e = self.event_mut(id);
        if !e.signaled {
            let wait = e.wait;
            if e.flags.contains(EventFlags::AUTOUNSIGNAL) {
                if self.wq(wait).count() == 0 {
                    self.event_mut(id).signaled = true;
                } else {
                    self.wake_one_locked(cpu, wait, reschedule, Ok(()));
                }
            } else {
                e.signaled = true;
                self.wake_all_locked(cpu, wait, reschedule, Ok(()));
            }
        }
        self.exit_critical_section(cpu);
    }

    pub fn event_unsignal(&mut self, cpu: &mut C, id: EventId) {
        self.enter_critical_section(cpu);
        self.event_mut(id).signaled = false;
        self.exit_critical_section(cpu);
    }
}
