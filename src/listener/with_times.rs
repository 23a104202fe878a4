use crate::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Invocation budget for a listener that removes itself after `times` calls.
#[derive(Debug)]
pub(crate) struct WithTimes {
    remaining: AtomicUsize,
}

impl WithTimes {
    pub(crate) fn new(times: usize) -> Result<Self> {
        if times == 0 {
            return Err(Error::InvalidTimes);
        }
        Ok(Self {
            remaining: AtomicUsize::new(times),
        })
    }

    /// Consumes one call. `None` once the budget is spent, otherwise whether
    /// this was the final call.
    pub(crate) fn tick(&self) -> Option<bool> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|previous| previous == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_times_is_rejected() {
        assert_eq!(WithTimes::new(0).unwrap_err(), Error::InvalidTimes);
    }

    #[test]
    fn counts_down_to_exhaustion() {
        let times = WithTimes::new(2).unwrap();
        assert_eq!(times.tick(), Some(false));
        assert_eq!(times.tick(), Some(true));
        assert_eq!(times.tick(), None);
        assert_eq!(times.tick(), None);
    }
}
