use super::policy::{check_long_running_tasks, AdmissionLimits, AdmissionReport};
use super::registry::{RunControlTable, SharedTaskRegistry};
use crate::shared::{now_millis, EngineLog};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::from_millis(0) {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(Duration::from_millis(50));
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

/// One sweep against a shared registry; removed tasks are signalled through
/// `controls` when given.
pub fn sweep_once(
    registry: &SharedTaskRegistry,
    limits: &AdmissionLimits,
    label: &str,
    controls: Option<&RunControlTable>,
    log: &EngineLog,
    now: i64,
) -> AdmissionReport {
    let report = match registry.lock() {
        Ok(mut guard) => check_long_running_tasks(&mut *guard, limits, label, now, log),
        Err(_) => {
            log.error(
                "admission.registry_poisoned",
                &[("label", Value::String(label.to_string()))],
            );
            return AdmissionReport::default();
        }
    };
    if let Some(controls) = controls {
        for record in &report.timed_out {
            controls.evict(&record.task_id, "admission timeout");
        }
        for record in &report.evicted {
            controls.evict(&record.task_id, "admission load shedding");
        }
    }
    report
}

pub struct AdmissionSweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AdmissionSweeper {
    pub fn stop_and_join(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AdmissionSweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

pub fn spawn_admission_sweeper(
    registry: SharedTaskRegistry,
    limits: AdmissionLimits,
    interval: Duration,
    label: impl Into<String>,
    controls: Option<RunControlTable>,
    log: EngineLog,
) -> AdmissionSweeper {
    let stop = Arc::new(AtomicBool::new(false));
    let label = label.into();
    let worker_stop = stop.clone();
    let handle = thread::spawn(move || {
        log.info(
            "admission.sweeper_started",
            &[
                ("label", Value::String(label.clone())),
                ("intervalMs", Value::from(interval.as_millis() as u64)),
            ],
        );
        while sleep_with_stop(&worker_stop, interval) {
            sweep_once(&registry, &limits, &label, controls.as_ref(), &log, now_millis());
        }
        log.info(
            "admission.sweeper_stopped",
            &[("label", Value::String(label.clone()))],
        );
    });
    AdmissionSweeper {
        stop,
        handle: Some(handle),
    }
}
