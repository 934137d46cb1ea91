use crate::run::RunControl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTaskRecord {
    pub task_id: String,
    pub user_id: String,
    pub has_premium: bool,
    pub start_time: i64,
}

impl ActiveTaskRecord {
    pub fn new(task_id: impl Into<String>, user_id: impl Into<String>, has_premium: bool, start_time: i64) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            has_premium,
            start_time,
        }
    }
}

/// Live set of active tasks that admission control sweeps.
pub trait ActiveTaskStore {
    fn count(&self) -> usize;
    fn records(&self) -> Vec<ActiveTaskRecord>;
    fn insert(&mut self, record: ActiveTaskRecord);
    fn remove(&mut self, task_id: &str) -> Option<ActiveTaskRecord>;
    fn contains(&self, task_id: &str) -> bool;
}

/// Process-local registry; nothing here is persisted.
#[derive(Debug, Clone, Default)]
pub struct ActiveTaskRegistry {
    tasks: HashMap<String, ActiveTaskRecord>,
}

impl ActiveTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedTaskRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn get(&self, task_id: &str) -> Option<&ActiveTaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl ActiveTaskStore for ActiveTaskRegistry {
    fn count(&self) -> usize {
        self.tasks.len()
    }

    fn records(&self) -> Vec<ActiveTaskRecord> {
        self.tasks.values().cloned().collect()
    }

    fn insert(&mut self, record: ActiveTaskRecord) {
        self.tasks.insert(record.task_id.clone(), record);
    }

    fn remove(&mut self, task_id: &str) -> Option<ActiveTaskRecord> {
        self.tasks.remove(task_id)
    }

    fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }
}

pub type SharedTaskRegistry = Arc<Mutex<ActiveTaskRegistry>>;

/// Cancellation handles keyed by task id, so a sweep can signal the
/// executor that owns a removed task.
#[derive(Debug, Clone, Default)]
pub struct RunControlTable {
    controls: Arc<Mutex<HashMap<String, RunControl>>>,
}

impl RunControlTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: &str, control: RunControl) {
        if let Ok(mut controls) = self.controls.lock() {
            controls.insert(task_id.to_string(), control);
        }
    }

    pub fn unregister(&self, task_id: &str) {
        if let Ok(mut controls) = self.controls.lock() {
            controls.remove(task_id);
        }
    }

    pub fn evict(&self, task_id: &str, reason: &str) -> bool {
        let control = self
            .controls
            .lock()
            .ok()
            .and_then(|controls| controls.get(task_id).cloned());
        match control {
            Some(control) => {
                control.evict(reason);
                true
            }
            None => false,
        }
    }
}
