//! Plain-text formatting for command output.

use chrono::{DateTime, Utc};
use safewalk_backend::SafeRoute;
use safewalk_geography::Coordinate;
use safewalk_report_models::{Report, ReportStats};
use safewalk_vote::{SkipReason, VoteOutcome};

/// Width of the area column before truncation.
const AREA_WIDTH: usize = 28;

pub fn report_header() -> String {
    format!(
        "{:<8} {:<14} {:<area$} {:>5} {:>9} {:>7}",
        "ID",
        "TYPE",
        "AREA",
        "SEV",
        "AGE",
        "VOTES",
        area = AREA_WIDTH,
    )
}

/// One table row for a report. `reference` adds a distance column.
pub fn report_line(report: &Report, now: DateTime<Utc>, reference: Option<Coordinate>) -> String {
    let area = report.area_name.as_deref().unwrap_or("-");
    let severity = report
        .severity
        .map_or_else(|| "-".to_string(), |s| format!("{s:.1}"));
    let votes = format!("+{}/-{}", report.upvotes, report.downvotes);

    let mut line = format!(
        "{:<8} {:<14} {:<width$} {severity:>5} {:>9} {votes:>7}",
        report.id.to_string(),
        report.category,
        truncate(area, AREA_WIDTH),
        age(report.created_at, now),
        width = AREA_WIDTH,
    );
    if let Some(reference) = reference {
        line.push_str(&format!(
            " {:>7.2} km",
            reference.distance_km(report.coordinate)
        ));
    }
    line
}

pub fn stats_summary(stats: &ReportStats) -> String {
    format!(
        "{} reports, {} in the last week, {} high severity",
        stats.total, stats.last_week, stats.high_severity
    )
}

pub fn vote_outcome(outcome: &VoteOutcome) -> String {
    match outcome {
        VoteOutcome::Committed(state) => format!("Vote saved ({state})"),
        VoteOutcome::Skipped(SkipReason::Busy) => "Vote already in progress".to_string(),
        VoteOutcome::Skipped(SkipReason::Unauthenticated) => {
            "Sign in to vote (set SAFEWALK_USER_ID)".to_string()
        }
        VoteOutcome::RolledBack { attempted, error } => {
            format!("Could not save vote ({attempted}), reverted: {error}")
        }
    }
}

pub fn route_summary(route: &SafeRoute) -> String {
    let mut out = format!(
        "{:.1} km, about {} min",
        route.distance_m / 1000.0,
        (route.duration_s / 60.0).round()
    );
    if let Some(advisory) = &route.advisory {
        out.push('\n');
        out.push_str(advisory);
    }
    out
}

/// Compact age like `45s`, `12m`, `3h`, `2d`.
fn age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - created_at).num_seconds().max(0);
    match secs {
        0..60 => format!("{secs}s"),
        60..3_600 => format!("{}m", secs / 60),
        3_600..86_400 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
