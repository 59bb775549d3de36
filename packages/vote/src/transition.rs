//! Vote state transitions and their counter deltas.

use safewalk_report_models::{CounterDelta, VoteDirection, VoteState};

/// State reached by pressing `direction` while in `current`.
///
/// Pressing the direction that is already active retracts the vote;
/// anything else (first vote or switching sides) activates `direction`.
#[must_use]
pub fn next_state(current: VoteState, direction: VoteDirection) -> VoteState {
    let pressed = VoteState::from(direction);
    if current == pressed {
        VoteState::None
    } else {
        pressed
    }
}

/// Counter change that moves a report's tallies from `current` to `next`.
///
/// Each state contributes one tally (or none); the delta is the
/// difference between the two contributions, so every pair is covered and
/// `transition_delta(b, a) == transition_delta(a, b).negate()`.
#[must_use]
pub const fn transition_delta(current: VoteState, next: VoteState) -> CounterDelta {
    let from = contribution(current);
    let to = contribution(next);
    CounterDelta::new(to.up - from.up, to.down - from.down)
}

const fn contribution(state: VoteState) -> CounterDelta {
    match state {
        VoteState::Up => CounterDelta::new(1, 0),
        VoteState::Down => CounterDelta::new(0, 1),
        VoteState::None => CounterDelta::new(0, 0),
    }
}

#[cfg(test)]
mod tests {
    use safewalk_report_models::{RawReportRow, ReportId};
    use safewalk_store::ReportStore;

    use super::*;

    const TABLE: [(VoteState, VoteState, i64, i64); 6] = [
        (VoteState::None, VoteState::Up, 1, 0),
        (VoteState::None, VoteState::Down, 0, 1),
        (VoteState::Up, VoteState::None, -1, 0),
        (VoteState::Down, VoteState::None, 0, -1),
        (VoteState::Up, VoteState::Down, -1, 1),
        (VoteState::Down, VoteState::Up, 1, -1),
    ];

    const ALL: [VoteState; 3] = [VoteState::Up, VoteState::Down, VoteState::None];

    #[test]
    fn matches_delta_table() {
        for (current, next, up, down) in TABLE {
            assert_eq!(
                transition_delta(current, next),
                CounterDelta::new(up, down),
                "{current} -> {next}"
            );
        }
    }

    #[test]
    fn same_state_is_zero() {
        for state in ALL {
            assert!(transition_delta(state, state).is_zero());
        }
    }

    #[test]
    fn reverse_transition_is_negation() {
        for a in ALL {
            for b in ALL {
                assert_eq!(transition_delta(b, a), transition_delta(a, b).negate());
            }
        }
    }

    #[test]
    fn next_state_rules() {
        assert_eq!(next_state(VoteState::None, VoteDirection::Up), VoteState::Up);
        assert_eq!(next_state(VoteState::None, VoteDirection::Down), VoteState::Down);
        assert_eq!(next_state(VoteState::Up, VoteDirection::Up), VoteState::None);
        assert_eq!(next_state(VoteState::Down, VoteDirection::Down), VoteState::None);
        assert_eq!(next_state(VoteState::Up, VoteDirection::Down), VoteState::Down);
        assert_eq!(next_state(VoteState::Down, VoteDirection::Up), VoteState::Up);
    }

    #[test]
    fn forward_then_rollback_restores_counters() {
        for (current, next, _, _) in TABLE {
            for (up, down) in [(0, 0), (1, 1), (7, 3)] {
                // Counters must already reflect `current`; a report showing
                // an upvote with zero upvotes can't exist.
                let (up, down) = match current {
                    VoteState::Up => (up + 1, down),
                    VoteState::Down => (up, down + 1),
                    VoteState::None => (up, down),
                };

                let store = ReportStore::new();
                store.load_snapshot(vec![RawReportRow {
                    id: Some(1),
                    lat: Some(38.9),
                    lon: Some(-77.0),
                    created_at: Some("2025-06-01T00:00:00Z".to_string()),
                    upvote_no: Some(up),
                    downvote_no: Some(down),
                    ..RawReportRow::default()
                }]);

                let delta = transition_delta(current, next);
                store.update_counters(ReportId(1), delta.up, delta.down);
                let undo = delta.negate();
                store.update_counters(ReportId(1), undo.up, undo.down);

                let report = store.get(ReportId(1)).unwrap();
                assert_eq!(
                    (i64::from(report.upvotes), i64::from(report.downvotes)),
                    (up, down),
                    "{current} -> {next} from ({up}, {down})"
                );
            }
        }
    }
}
