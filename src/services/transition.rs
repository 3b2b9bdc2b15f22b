//! Edge-triggered transition detection with one-shot exit suppression
//!
//! Turns a stream of zone classifications into at most one event per call:
//! - `Unknown -> Inside/Outside`: state set, no event (nothing to compare with)
//! - `Outside -> Inside`: `Entered`, exit suppression cleared
//! - `Inside -> Outside`: `Exited`, unless already sent since the last entry
//! - `NoZone`: ignored entirely (state and suppression untouched)
//!
//! GPS jitter near the boundary would otherwise produce an alert storm.

use crate::domain::types::{
    Position, TransitionEvent, TransitionKind, ZoneState, ZoneStatus,
};

/// Last known side of the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerState {
    #[default]
    Unknown,
    Inside,
    Outside,
}

#[derive(Debug, Default)]
pub struct TransitionTracker {
    state: TrackerState,
    /// Set once an exit has been emitted, cleared on the next entry
    exit_alert_sent: bool,
}

impl TransitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn exit_alert_sent(&self) -> bool {
        self.exit_alert_sent
    }

    /// Feed one classification; returns the edge event it produces, if any
    pub fn observe(&mut self, status: &ZoneStatus, position: &Position) -> Option<TransitionEvent> {
        let (next, distance_meters) = match (status.state, status.distance_meters) {
            (ZoneState::Inside, Some(d)) => (TrackerState::Inside, d),
            (ZoneState::Outside, Some(d)) => (TrackerState::Outside, d),
            _ => return None,
        };

        let previous = std::mem::replace(&mut self.state, next);
        let kind = match (previous, next) {
            (TrackerState::Outside, TrackerState::Inside) => {
                self.exit_alert_sent = false;
                TransitionKind::Entered
            }
            (TrackerState::Inside, TrackerState::Outside) if !self.exit_alert_sent => {
                self.exit_alert_sent = true;
                TransitionKind::Exited
            }
            _ => return None,
        };

        Some(TransitionEvent { kind, at_position: *position, distance_meters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn status(state: ZoneState) -> ZoneStatus {
        match state {
            ZoneState::Inside => ZoneStatus { state, distance_meters: Some(10.0) },
            ZoneState::Outside => ZoneStatus { state, distance_meters: Some(90.0) },
            ZoneState::NoZone => ZoneStatus::NO_ZONE,
        }
    }

    fn run(states: &[ZoneState]) -> Vec<TransitionKind> {
        let mut tracker = TransitionTracker::new();
        let position = Position::new(34.0, 35.0, Utc::now());
        states
            .iter()
            .filter_map(|s| tracker.observe(&status(*s), &position))
            .map(|e| e.kind)
            .collect()
    }

    use ZoneState::{Inside, NoZone, Outside};

    #[test]
    fn test_first_classification_emits_nothing() {
        assert!(run(&[Inside]).is_empty());
        assert!(run(&[Outside]).is_empty());
    }

    #[test]
    fn test_edge_triggering() {
        let events = run(&[Outside, Outside, Inside, Inside, Outside, Outside]);
        assert_eq!(events, vec![TransitionKind::Entered, TransitionKind::Exited]);
    }

    #[test]
    fn test_one_shot_exit_suppression() {
        let events = run(&[Inside, Outside, Outside, Outside]);
        assert_eq!(events, vec![TransitionKind::Exited]);
    }

    #[test]
    fn test_no_zone_is_neutral() {
        assert!(run(&[Inside, NoZone, Inside]).is_empty());
        assert!(run(&[Outside, NoZone, NoZone, Outside]).is_empty());
    }

    #[test]
    fn test_no_zone_does_not_reset_state() {
        // Leaving the boundary after a NoZone gap is still a real exit
        let events = run(&[Inside, NoZone, Outside]);
        assert_eq!(events, vec![TransitionKind::Exited]);
    }

    #[test]
    fn test_only_no_zone_stays_unknown() {
        let mut tracker = TransitionTracker::new();
        let position = Position::new(0.0, 0.0, Utc::now());
        assert!(tracker.observe(&ZoneStatus::NO_ZONE, &position).is_none());
        assert_eq!(tracker.state(), TrackerState::Unknown);
    }

    #[test]
    fn test_reentry_rearms_exit() {
        let events = run(&[Inside, Outside, Inside, Outside]);
        assert_eq!(
            events,
            vec![TransitionKind::Exited, TransitionKind::Entered, TransitionKind::Exited]
        );
    }

    #[test]
    fn test_flags_track_transitions() {
        let mut tracker = TransitionTracker::new();
        let position = Position::new(34.0, 35.0, Utc::now());

        tracker.observe(&status(Inside), &position);
        assert_eq!(tracker.state(), TrackerState::Inside);
        assert!(!tracker.exit_alert_sent());

        let event = tracker.observe(&status(Outside), &position).unwrap();
        assert_eq!(event.kind, TransitionKind::Exited);
        assert_eq!(event.distance_meters, 90.0);
        assert_eq!(event.at_position, position);
        assert!(tracker.exit_alert_sent());

        let event = tracker.observe(&status(Inside), &position).unwrap();
        assert_eq!(event.kind, TransitionKind::Entered);
        assert!(!tracker.exit_alert_sent());
    }

    #[test]
    fn test_jitter_bounds_alert_volume() {
        // Alternating fixes around the boundary: one event per real crossing
        let states = [Inside, Outside, Inside, Outside, Inside, Outside];
        let events = run(&states);
        let exits = events.iter().filter(|k| **k == TransitionKind::Exited).count();
        let entries = events.iter().filter(|k| **k == TransitionKind::Entered).count();
        assert_eq!(exits, 3);
        assert_eq!(entries, 2);
    }
}
