//! Pure scoring of task results.
//!
//! Every score is clamped to `[0, max_score]`, and anything but a completed result scores zero.
//! A missing completion time counts as the full time limit, so it earns no speed bonus.

use super::TaskStatus;
use crate::tasks::{ScoringMethod, TaskDefinition};

/// Base points of the `time` method for finishing at all.
pub const TIME_BASE_POINTS: f64 = 100.0;
const COMPOSITE_COMPLETION_SHARE: f64 = 0.6;
const COMPOSITE_SPEED_SHARE: f64 = 0.4;

/// Fraction of the time limit left, in `[0, 1]`.
fn remaining_time_fraction(task: &TaskDefinition, completion_time_ms: Option<u64>) -> f64 {
    let limit = task.time_limit_ms() as f64;
    if limit <= 0.0 {
        return 0.0;
    }
    let used = completion_time_ms.map(|t| t as f64).unwrap_or(limit);
    (1.0 - used / limit).clamp(0.0, 1.0)
}

/// Points earned on `task` by a result with `status` and `completion_time_ms`.
pub fn compute_score(task: &TaskDefinition, status: TaskStatus, completion_time_ms: Option<u64>) -> f64 {
    if status != TaskStatus::Completed {
        return 0.0;
    }
    let max = task.max_score.max(0.0);
    let speed = remaining_time_fraction(task, completion_time_ms);

    let raw = match task.scoring {
        ScoringMethod::Time => (TIME_BASE_POINTS + (max - TIME_BASE_POINTS) * speed).round(),
        ScoringMethod::Accuracy => max,
        ScoringMethod::Composite => {
            COMPOSITE_COMPLETION_SHARE * max + COMPOSITE_SPEED_SHARE * max * speed
        }
    };
    raw.clamp(0.0, max)
}
