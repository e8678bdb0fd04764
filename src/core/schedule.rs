//! Cron evaluation for job definitions.

use chrono::{DateTime, Utc};
use croner::Cron;
use tracing::warn;

use crate::core::models::JobDefinition;

/// First instant strictly after `base` matching the 5-field expression.
///
/// A missing `base` means "now". Returns `None` for an expression that does
/// not parse or never matches; such a job is never due.
pub fn calculate_next_run(expr: &str, base: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let base = base.unwrap_or_else(Utc::now);

    let cron = match Cron::new(expr.trim()).parse() {
        Ok(cron) => cron,
        Err(e) => {
            warn!(cron = expr, error = %e, "Invalid cron expression");
            return None;
        }
    };

    match cron.find_next_occurrence(&base, false) {
        Ok(next) => Some(next),
        Err(e) => {
            warn!(cron = expr, error = %e, "Cron expression has no next occurrence");
            None
        }
    }
}

/// Next run of a scheduled job, measured from its last run (or creation).
/// Manual jobs have none.
pub fn next_run(job: &JobDefinition) -> Option<DateTime<Utc>> {
    if !job.is_scheduled() {
        return None;
    }
    let base = job.last_run.unwrap_or(job.created_at);
    calculate_next_run(&job.schedule_cron, Some(base))
}

pub fn is_due(job: &JobDefinition, now: DateTime<Utc>) -> bool {
    next_run(job).is_some_and(|next| next <= now)
}
