use super::allocation::{ResourceAllocation, ResourceAmounts, ResourceLimits, ResourceUsage, UsageStats};
use super::error::{AllocationError, DimensionList};
use super::policy::{LimitPolicy, LoggingLimitPolicy};
use crate::shared::{now_millis, EngineLog};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hierarchical budget tracker.
///
/// Children reserve their full limits from the parent's available budget
/// when created; consumption is pushed up the whole ancestor chain, and
/// releasing a child hands its reservation back to the parent.
pub struct ResourceAllocator {
    allocations: BTreeMap<String, ResourceAllocation>,
    policy: Arc<dyn LimitPolicy>,
    log: EngineLog,
}

impl std::fmt::Debug for ResourceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("allocations", &self.allocations)
            .finish_non_exhaustive()
    }
}

impl Default for ResourceAllocator {
    fn default() -> Self {
        Self::new(EngineLog::disabled())
    }
}

impl ResourceAllocator {
    pub fn new(log: EngineLog) -> Self {
        Self {
            allocations: BTreeMap::new(),
            policy: Arc::new(LoggingLimitPolicy::new(log.clone())),
            log,
        }
    }

    pub fn with_limit_policy(mut self, policy: Arc<dyn LimitPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn create_allocation(
        &mut self,
        id: &str,
        limits: ResourceLimits,
        parent_id: Option<&str>,
    ) -> Result<(), AllocationError> {
        if self.allocations.contains_key(id) {
            return Err(AllocationError::AlreadyExists { id: id.to_string() });
        }

        let now = now_millis();
        if let Some(parent_id) = parent_id {
            let parent = self.allocations.get_mut(parent_id).ok_or_else(|| {
                AllocationError::ParentNotFound {
                    parent_id: parent_id.to_string(),
                }
            })?;
            let available = parent.available();
            if !limits.fits_within(&available) {
                return Err(AllocationError::InsufficientParentResources {
                    id: id.to_string(),
                    parent_id: parent_id.to_string(),
                    dimensions: DimensionList(limits.exceeded_dimensions(&available)),
                });
            }
            parent.reserved = parent.reserved.saturating_add(&limits);
            parent.updated_at = now;
        }

        self.allocations.insert(
            id.to_string(),
            ResourceAllocation {
                id: id.to_string(),
                parent_id: parent_id.map(str::to_string),
                limits,
                consumed: ResourceUsage::default(),
                reserved: ResourceAmounts::default(),
                created_at: now,
                updated_at: now,
            },
        );
        self.log.info(
            "allocator.created",
            &[
                ("allocationId", Value::String(id.to_string())),
                (
                    "parentId",
                    parent_id
                        .map(|v| Value::String(v.to_string()))
                        .unwrap_or(Value::Null),
                ),
            ],
        );
        Ok(())
    }

    pub fn track_usage(&mut self, id: &str, usage: &ResourceUsage) -> bool {
        if !self.allocations.contains_key(id) {
            self.log_unknown("track_usage", id);
            return false;
        }

        let now = now_millis();
        let mut cursor = Some(id.to_string());
        while let Some(current_id) = cursor.take() {
            let Some(allocation) = self.allocations.get_mut(&current_id) else {
                break;
            };
            allocation.consumed = allocation.consumed.saturating_add(usage);
            allocation.updated_at = now;
            let exceeded = allocation.consumed.exceeded_dimensions(&allocation.limits);
            if !exceeded.is_empty() {
                self.policy.on_limits_exceeded(allocation, &exceeded);
            }
            cursor = allocation.parent_id.clone();
        }
        true
    }

    pub fn can_allocate(&self, id: &str, request: &ResourceAmounts) -> bool {
        match self.allocations.get(id) {
            Some(allocation) => request.fits_within(&allocation.available()),
            None => {
                self.log_unknown("can_allocate", id);
                false
            }
        }
    }

    /// Removes the allocation and any descendants, returning each one's
    /// reservation to its parent's pool.
    pub fn release_allocation(&mut self, id: &str) -> bool {
        if !self.allocations.contains_key(id) {
            self.log_unknown("release_allocation", id);
            return false;
        }
        for child_id in self.dependent_resources(id).into_iter().rev() {
            self.release_single(&child_id);
        }
        self.release_single(id);
        true
    }

    fn release_single(&mut self, id: &str) {
        let Some(allocation) = self.allocations.remove(id) else {
            return;
        };
        if let Some(parent) = allocation
            .parent_id
            .as_ref()
            .and_then(|parent_id| self.allocations.get_mut(parent_id))
        {
            parent.reserved = parent.reserved.saturating_sub(&allocation.limits);
            parent.updated_at = now_millis();
        }
        self.log.info(
            "allocator.released",
            &[("allocationId", Value::String(id.to_string()))],
        );
    }

    pub fn allocation(&self, id: &str) -> Option<&ResourceAllocation> {
        self.allocations.get(id)
    }

    pub fn available(&self, id: &str) -> Option<ResourceAmounts> {
        self.allocations.get(id).map(ResourceAllocation::available)
    }

    pub fn usage_stats(&self, id: &str) -> Option<UsageStats> {
        match self.allocations.get(id) {
            Some(allocation) => Some(UsageStats::from_allocation(allocation)),
            None => {
                self.log_unknown("usage_stats", id);
                None
            }
        }
    }

    pub fn children(&self, parent_id: &str) -> Vec<&ResourceAllocation> {
        self.allocations
            .values()
            .filter(|allocation| allocation.parent_id.as_deref() == Some(parent_id))
            .collect()
    }

    /// Ids of every transitive descendant, parents before their children.
    pub fn dependent_resources(&self, id: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for child in self.children(&current) {
                ordered.push(child.id.clone());
                frontier.push(child.id.clone());
            }
        }
        ordered
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    fn log_unknown(&self, operation: &str, id: &str) {
        self.log.warn(
            "allocator.unknown_id",
            &[
                ("operation", Value::String(operation.to_string())),
                ("allocationId", Value::String(id.to_string())),
            ],
        );
    }
}
