//! Skew-aware priority scoring.
//!
//! A shape whose median sits below its mean has a heavy right tail: most
//! runs are cheap and a few are very expensive. Such shapes are pulled
//! down by their dispersion. A shape whose median sits above its mean is
//! consistently expensive and is pushed up.

use serde::Serialize;

use crate::reservoir::Snapshot;

/// The intermediate values behind a priority, kept for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriorityBreakdown {
    pub mean: i64,
    pub median: i64,
    /// Total absolute distance from the median, divided by the mean.
    pub deviation: i64,
    pub priority: i64,
}

/// Score a reservoir snapshot. Returns `None` for an empty snapshot.
pub fn score_snapshot(snapshot: &Snapshot) -> Option<PriorityBreakdown> {
    if snapshot.is_empty() {
        return None;
    }

    let mean = snapshot.mean() as i64;
    let median = snapshot.median() as i64;

    if mean == 0 {
        return Some(PriorityBreakdown {
            mean,
            median,
            deviation: 0,
            priority: median,
        });
    }

    let spread: i128 = snapshot
        .values()
        .iter()
        .map(|&v| (v as i128 - median as i128).abs())
        .sum();
    let deviation = (spread / mean as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64;

    let priority = if median <= mean {
        median.saturating_sub(deviation)
    } else {
        median.saturating_add(deviation)
    };

    Some(PriorityBreakdown {
        mean,
        median,
        deviation,
        priority,
    })
}
