use super::registry::{ActiveTaskRecord, ActiveTaskStore};
use crate::shared::EngineLog;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_ACTIVE_TASKS: usize = 50;
pub const DEFAULT_TASK_TIMEOUT_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionLimits {
    pub max_active: usize,
    pub task_timeout_ms: i64,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE_TASKS,
            task_timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionReport {
    pub timed_out: Vec<ActiveTaskRecord>,
    pub evicted: Vec<ActiveTaskRecord>,
    pub remaining: usize,
}

impl AdmissionReport {
    pub fn removed_count(&self) -> usize {
        self.timed_out.len() + self.evicted.len()
    }

    pub fn removed_ids(&self) -> impl Iterator<Item = &str> {
        self.timed_out
            .iter()
            .chain(self.evicted.iter())
            .map(|record| record.task_id.as_str())
    }
}

/// Applies the timeout sweep and then the load sweep to `registry`.
///
/// Load shedding removes the oldest non-premium tasks first and touches
/// premium tasks only when every non-premium task is already gone. Within
/// each tier, order is `start_time` ascending with the task id as the tie
/// break.
pub fn check_long_running_tasks(
    registry: &mut dyn ActiveTaskStore,
    limits: &AdmissionLimits,
    label: &str,
    now: i64,
    log: &EngineLog,
) -> AdmissionReport {
    let mut report = AdmissionReport::default();

    let mut expired = registry
        .records()
        .into_iter()
        .filter(|record| now.saturating_sub(record.start_time) > limits.task_timeout_ms)
        .collect::<Vec<_>>();
    sort_oldest_first(&mut expired);
    for record in expired {
        if let Some(removed) = registry.remove(&record.task_id) {
            log.warn(
                "admission.timeout",
                &[
                    ("label", Value::String(label.to_string())),
                    ("taskId", Value::String(removed.task_id.clone())),
                    ("userId", Value::String(removed.user_id.clone())),
                    ("ageMs", Value::from(now.saturating_sub(removed.start_time))),
                ],
            );
            report.timed_out.push(removed);
        }
    }

    let count = registry.count();
    if count > limits.max_active {
        let excess = count - limits.max_active;
        let (mut premium, mut standard): (Vec<_>, Vec<_>) = registry
            .records()
            .into_iter()
            .partition(|record| record.has_premium);
        sort_oldest_first(&mut standard);
        sort_oldest_first(&mut premium);

        for record in standard.into_iter().chain(premium).take(excess) {
            if let Some(removed) = registry.remove(&record.task_id) {
                log.warn(
                    "admission.evicted",
                    &[
                        ("label", Value::String(label.to_string())),
                        ("taskId", Value::String(removed.task_id.clone())),
                        ("userId", Value::String(removed.user_id.clone())),
                        ("hasPremium", Value::Bool(removed.has_premium)),
                    ],
                );
                report.evicted.push(removed);
            }
        }
    }

    report.remaining = registry.count();
    if report.removed_count() > 0 {
        log.info(
            "admission.summary",
            &[
                ("label", Value::String(label.to_string())),
                ("removedCount", Value::from(report.removed_count() as u64)),
                ("remainingCount", Value::from(report.remaining as u64)),
            ],
        );
    }
    report
}

fn sort_oldest_first(records: &mut [ActiveTaskRecord]) {
    records.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
}
