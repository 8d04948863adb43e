//! Next-due index for the daily distribution sweep
//!
//! Active positions are kept in a set ordered by the time their next payout
//! is due, so a sweep only visits positions that are actually due.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tally_core::{Amount, StakeId};

/// Time-ordered schedule of stake positions
#[derive(Debug, Default)]
pub struct DistributionSchedule {
    queue: BTreeSet<(DateTime<Utc>, StakeId)>,
    due_at: HashMap<StakeId, DateTime<Utc>>,
}

impl DistributionSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a position, replacing any earlier entry for it
    pub fn schedule(&mut self, id: StakeId, due: DateTime<Utc>) {
        if let Some(previous) = self.due_at.insert(id, due) {
            self.queue.remove(&(previous, id));
        }
        self.queue.insert((due, id));
    }

    /// Drop a position from the schedule
    pub fn remove(&mut self, id: StakeId) -> bool {
        match self.due_at.remove(&id) {
            Some(due) => self.queue.remove(&(due, id)),
            None => false,
        }
    }

    /// Pop the earliest entry due at or before `now`
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<StakeId> {
        let &(due, id) = self.queue.first()?;
        if due > now {
            return None;
        }
        self.queue.remove(&(due, id));
        self.due_at.remove(&id);
        Some(id)
    }

    /// Earliest due time
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.queue.first().map(|(due, _)| *due)
    }

    /// When a position is next due
    pub fn due_at(&self, id: StakeId) -> Option<DateTime<Utc>> {
        self.due_at.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.due_at.clear();
    }
}

/// Outcome of one distribution sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Due entries popped from the schedule
    pub examined: usize,
    /// Positions that received a payout
    pub paid: usize,
    /// Due positions with nothing accrued yet
    pub empty: usize,
    /// Positions closed since they were scheduled
    pub retired: usize,
    /// Positions whose settlement failed and were skipped
    pub failed: usize,
    /// Total rewards paid
    pub distributed: Amount,
    /// Sweep stopped early on request
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_pops_only_due_in_order() {
        let mut schedule = DistributionSchedule::new();
        schedule.schedule(StakeId::new(3), t0() + Duration::hours(2));
        schedule.schedule(StakeId::new(1), t0() + Duration::hours(1));
        schedule.schedule(StakeId::new(2), t0() + Duration::days(2));

        let now = t0() + Duration::hours(3);
        assert_eq!(schedule.pop_due(now), Some(StakeId::new(1)));
        assert_eq!(schedule.pop_due(now), Some(StakeId::new(3)));
        assert_eq!(schedule.pop_due(now), None);
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.next_due(), Some(t0() + Duration::days(2)));
    }

    #[test]
    fn test_reschedule_replaces_entry() {
        let mut schedule = DistributionSchedule::new();
        let id = StakeId::new(7);
        schedule.schedule(id, t0());
        schedule.schedule(id, t0() + Duration::days(1));

        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.due_at(id), Some(t0() + Duration::days(1)));
        assert_eq!(schedule.pop_due(t0()), None);
    }

    #[test]
    fn test_remove() {
        let mut schedule = DistributionSchedule::new();
        schedule.schedule(StakeId::new(1), t0());
        assert!(schedule.remove(StakeId::new(1)));
        assert!(!schedule.remove(StakeId::new(1)));
        assert!(schedule.is_empty());
    }
}
