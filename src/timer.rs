//! LPWAN Timer API
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::Ts;

/// Timer trait provides mechanisms for accessing monotonic times
/// to assist with procotol implementations.
///
/// All methods are monotonic and relative to the same unknown epoc
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn ticks_ms(&self) -> Ts {
        self.ticks_us() / 1000
    }

    /// Returns the number of microsecond ticks since some unknown epoc
    fn ticks_us(&self) -> Ts;

    /// Block until the provided microsecond tick has been reached.
    ///
    /// Used for the short, fixed cadence CCA bursts only; returns
    /// immediately if the deadline is already in the past.
    fn wait_until_us(&self, deadline_us: Ts);
}

/// Host timer using the standard library monotonic clock
#[cfg(feature = "std")]
#[derive(Clone, Debug)]
pub struct StdTimer {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdTimer {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Timer for StdTimer {
    fn ticks_us(&self) -> Ts {
        self.start.elapsed().as_micros() as Ts
    }

    fn wait_until_us(&self, deadline_us: Ts) {
        let now = self.ticks_us();
        if deadline_us > now {
            std::thread::sleep(std::time::Duration::from_micros(deadline_us - now));
        }
    }
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use crate::Ts;

    /// Mock timer implementation to assist with testing.
    ///
    /// Clones share the same underlying time, waiting advances it.
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<Ts>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_ms(&mut self, val: u32) {
            *self.0.lock().unwrap() = val as Ts * 1000;
        }

        pub fn set_us(&mut self, val: Ts) {
            *self.0.lock().unwrap() = val;
        }

        pub fn inc_us(&mut self, val: Ts) {
            let mut v  = self.0.lock().unwrap();
            *v += val;
        }

        pub fn val(&self) -> Ts {
            *self.0.lock().unwrap()
        }
    }

    impl Default for MockTimer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_us(&self) -> Ts {
            let v = self.0.lock().unwrap();
            return *v
        }

        fn wait_until_us(&self, deadline_us: Ts) {
            let mut v = self.0.lock().unwrap();
            if deadline_us > *v {
                *v = deadline_us;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Timer, mock::MockTimer};

    #[test]
    fn mock_timer_shared() {
        let mut a = MockTimer::new();
        let b = a.clone();

        a.set_ms(3);
        assert_eq!(b.ticks_ms(), 3);
        assert_eq!(b.ticks_us(), 3000);

        // Waiting never goes backwards
        b.wait_until_us(1000);
        assert_eq!(a.val(), 3000);

        b.wait_until_us(4500);
        assert_eq!(a.val(), 4500);
    }
}
