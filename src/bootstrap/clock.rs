//! Simulation clock

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// The backtest's "virtual now". One writer (the orchestrator), many readers.
///
/// Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct SimulationClock {
    now: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl SimulationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = Some(instant);
    }

    /// Forget the current instant
    pub fn clear(&self) {
        *self.now.write() = None;
    }

    /// Current instant, if one was set
    pub fn now(&self) -> Option<DateTime<Utc>> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unset_by_default() {
        assert!(SimulationClock::new().now().is_none());
    }

    #[test]
    fn test_clones_share_instant() {
        let clock = SimulationClock::new();
        let reader = clock.clone();
        let t = Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap();

        clock.set(t);
        assert_eq!(reader.now(), Some(t));

        clock.clear();
        assert!(reader.now().is_none());
    }

    #[test]
    fn test_independent_clocks() {
        let a = SimulationClock::new();
        let b = SimulationClock::new();
        a.set(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        assert!(b.now().is_none());
    }
}
