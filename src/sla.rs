//! SLA timers and their derived status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived from elapsed time against target; never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    /// Elapsed ≤ 80% of target
    OnTrack,
    /// 80% of target < elapsed ≤ target
    Warning,
    /// Elapsed > target
    Overdue,
}

impl SlaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaStatus::OnTrack => "on_track",
            SlaStatus::Warning => "warning",
            SlaStatus::Overdue => "overdue",
        }
    }
}

/// Timer for one step, started when that step became current
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaTracker {
    pub instance_id: Uuid,
    pub step_number: u32,
    pub target_hours: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
}

impl SlaTracker {
    pub fn new(instance_id: Uuid, step_number: u32, target_hours: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            step_number,
            target_hours,
            started_at,
            escalated_at: None,
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> SlaStatus {
        compute_sla_status(self, now)
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.started_at + chrono::Duration::hours(i64::from(self.target_hours))
    }
}

/// Classify a tracker at `now`.
///
/// Compared in whole seconds with integer arithmetic so the 80% boundary is
/// exact: `elapsed * 5 <= target * 4` is on track.
pub fn compute_sla_status(tracker: &SlaTracker, now: DateTime<Utc>) -> SlaStatus {
    let elapsed = (now - tracker.started_at).num_seconds().max(0);
    let target = i64::from(tracker.target_hours) * 3600;

    if elapsed * 5 <= target * 4 {
        SlaStatus::OnTrack
    } else if elapsed <= target {
        SlaStatus::Warning
    } else {
        SlaStatus::Overdue
    }
}

/// A step that crossed its SLA and was escalated by this pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub instance_id: Uuid,
    pub step_id: Uuid,
    pub step_number: u32,
    pub step_name: String,
    pub target_hours: u32,
    pub started_at: DateTime<Utc>,
    pub escalated_at: DateTime<Utc>,
    /// People the step was routed to when it escalated
    pub assignees: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tracker(started_hours_ago: i64, target_hours: u32, now: DateTime<Utc>) -> SlaTracker {
        SlaTracker::new(
            Uuid::new_v4(),
            1,
            target_hours,
            now - Duration::hours(started_hours_ago),
        )
    }

    #[test]
    fn test_on_track_within_eighty_percent() {
        let now = Utc::now();
        assert_eq!(tracker(0, 24, now).status(now), SlaStatus::OnTrack);
        assert_eq!(tracker(10, 24, now).status(now), SlaStatus::OnTrack);
    }

    #[test]
    fn test_exactly_eighty_percent_is_on_track() {
        let now = Utc::now();
        let t = SlaTracker::new(Uuid::new_v4(), 1, 10, now - Duration::hours(8));
        assert_eq!(t.status(now), SlaStatus::OnTrack);
        let t = SlaTracker::new(
            Uuid::new_v4(),
            1,
            10,
            now - Duration::hours(8) - Duration::seconds(1),
        );
        assert_eq!(t.status(now), SlaStatus::Warning);
    }

    #[test]
    fn test_exactly_at_target_is_warning() {
        let now = Utc::now();
        assert_eq!(tracker(48, 48, now).status(now), SlaStatus::Warning);
        let t = SlaTracker::new(
            Uuid::new_v4(),
            1,
            48,
            now - Duration::hours(48) - Duration::seconds(1),
        );
        assert_eq!(t.status(now), SlaStatus::Overdue);
    }

    #[test]
    fn test_fifty_hours_against_forty_eight_is_overdue() {
        let now = Utc::now();
        assert_eq!(tracker(50, 48, now).status(now), SlaStatus::Overdue);
    }

    #[test]
    fn test_clock_skew_counts_as_on_track() {
        let now = Utc::now();
        let t = SlaTracker::new(Uuid::new_v4(), 1, 1, now + Duration::hours(2));
        assert_eq!(t.status(now), SlaStatus::OnTrack);
    }

    #[test]
    fn test_deadline() {
        let now = Utc::now();
        let t = SlaTracker::new(Uuid::new_v4(), 2, 24, now);
        assert_eq!(t.deadline(), now + Duration::hours(24));
    }
}
