//! Timer and event substrate
//!
//! A fixed set of one-shot deadline timers feeds a FIFO event queue which is
//! drained by a single dispatch loop. Timer expiry does the minimum possible
//! work (posting an event, or flagging a timeout and posting), all protocol
//! logic runs later from the dispatcher.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::{Deque, Vec};
use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::Ts;

/// Events handled by the MAC dispatch loop.
///
/// Events carry no payload, all context lives in the MAC state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Scheduled channel check, reschedules the cadence
    ChannelCheck,
    /// Out of schedule channel check (reply catching), does not reschedule
    ExtraChannelCheck,
    /// Fast sleep / strobe progress and timeout handling
    Periodic,
    /// Deferred device interrupt servicing
    Isr,
}

/// Deadline timers owned by the MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    ChannelCheck,
    ExtraChannelCheck,
    Periodic,
    Timeout,
}

impl TimerId {
    /// Event posted on expiry of this timer
    pub fn event(&self) -> Event {
        match self {
            TimerId::ChannelCheck => Event::ChannelCheck,
            TimerId::ExtraChannelCheck => Event::ExtraChannelCheck,
            TimerId::Periodic => Event::Periodic,
            // The periodic handler checks the timeout flag
            TimerId::Timeout => Event::Periodic,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// FIFO event queue.
///
/// Each event is queued at most once, posting an already pending event
/// is a no-op and keeps its original position.
#[derive(Debug, Clone)]
pub struct EventQueue {
    queue: Deque<Event, { Event::COUNT }>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self { queue: Deque::new() }
    }

    /// Append an event to the queue, returns false if already pending
    pub fn post(&mut self, ev: Event) -> bool {
        if self.contains(ev) {
            return false;
        }
        // Capacity matches the number of distinct events
        self.queue.push_back(ev).is_ok()
    }

    /// Remove a pending event (no-op if absent)
    pub fn cancel(&mut self, ev: Event) {
        let n = self.queue.len();
        for _ in 0..n {
            if let Some(e) = self.queue.pop_front() {
                if e != ev {
                    let _ = self.queue.push_back(e);
                }
            }
        }
    }

    /// Fetch the next event in post order
    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    pub fn contains(&self, ev: Event) -> bool {
        self.queue.iter().any(|e| *e == ev)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// One-shot deadline timers, indexed by [`TimerId`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timers {
    deadlines: [Option<Ts>; TimerId::COUNT],
    armed_seq: [u32; TimerId::COUNT],
    seq: u32,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer `delay_us` after `now`, replacing any pending arming
    pub fn arm(&mut self, id: TimerId, now: Ts, delay_us: u32) {
        self.deadlines[id.index()] = Some(now + delay_us as Ts);
        self.armed_seq[id.index()] = self.seq;
        self.seq = self.seq.wrapping_add(1);
    }

    /// Disarm a timer (no-op if not armed)
    pub fn cancel(&mut self, id: TimerId) {
        self.deadlines[id.index()] = None;
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.deadlines[id.index()].is_some()
    }

    pub fn deadline(&self, id: TimerId) -> Option<Ts> {
        self.deadlines[id.index()]
    }

    /// Earliest pending deadline over all timers
    pub fn next_deadline(&self) -> Option<Ts> {
        self.deadlines.iter().filter_map(|d| *d).min()
    }

    /// Disarm and return every timer due at `now`, in expiry order.
    ///
    /// Timers sharing a deadline are returned in the order they were armed.
    pub fn expire(&mut self, now: Ts) -> Vec<TimerId, { TimerId::COUNT }> {
        let mut due: Vec<(Ts, u32, TimerId), { TimerId::COUNT }> = Vec::new();

        for id in TimerId::iter() {
            if let Some(d) = self.deadlines[id.index()] {
                if d <= now {
                    let _ = due.push((d, self.armed_seq[id.index()], id));
                    self.deadlines[id.index()] = None;
                }
            }
        }

        due.sort_unstable_by_key(|(d, seq, _)| (*d, *seq));

        due.iter().map(|(_, _, id)| *id).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn queue_fifo_and_dedup() {
        let mut q = EventQueue::new();

        assert!(q.post(Event::Periodic));
        assert!(q.post(Event::Isr));
        assert!(!q.post(Event::Periodic));
        assert!(q.post(Event::ChannelCheck));
        assert_eq!(q.len(), 3);

        assert_eq!(q.pop(), Some(Event::Periodic));
        assert_eq!(q.pop(), Some(Event::Isr));
        assert_eq!(q.pop(), Some(Event::ChannelCheck));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn queue_cancel_keeps_order() {
        let mut q = EventQueue::new();

        q.post(Event::Isr);
        q.post(Event::Periodic);
        q.post(Event::ExtraChannelCheck);

        q.cancel(Event::Periodic);
        q.cancel(Event::ChannelCheck);

        assert!(!q.contains(Event::Periodic));
        assert_eq!(q.pop(), Some(Event::Isr));
        assert_eq!(q.pop(), Some(Event::ExtraChannelCheck));
        assert!(q.is_empty());
    }

    #[test]
    fn timer_rearm_replaces() {
        let mut t = Timers::new();

        t.arm(TimerId::Timeout, 0, 100);
        t.arm(TimerId::Timeout, 50, 100);
        assert_eq!(t.deadline(TimerId::Timeout), Some(150));

        assert!(t.expire(120).is_empty());
        assert_eq!(&t.expire(150)[..], &[TimerId::Timeout]);
        assert!(!t.is_armed(TimerId::Timeout));

        // Cancelling an unarmed timer is fine
        t.cancel(TimerId::Periodic);
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn timer_expiry_order() {
        let mut t = Timers::new();

        t.arm(TimerId::Timeout, 0, 300);
        t.arm(TimerId::ChannelCheck, 0, 200);
        t.arm(TimerId::Periodic, 0, 300);
        t.arm(TimerId::ExtraChannelCheck, 0, 1000);

        assert_eq!(t.next_deadline(), Some(200));

        // Earlier deadline first, equal deadlines in arming order
        let due = t.expire(500);
        assert_eq!(&due[..], &[TimerId::ChannelCheck, TimerId::Timeout, TimerId::Periodic]);

        assert_eq!(t.next_deadline(), Some(1000));
    }

    #[test]
    fn timeout_posts_periodic() {
        assert_eq!(TimerId::Timeout.event(), Event::Periodic);
        assert_eq!(TimerId::ChannelCheck.event(), Event::ChannelCheck);
    }
}
