use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceDimension {
    Credits,
    Tokens,
    Time,
    Memory,
}

impl ResourceDimension {
    pub const ALL: [ResourceDimension; 4] = [
        ResourceDimension::Credits,
        ResourceDimension::Tokens,
        ResourceDimension::Time,
        ResourceDimension::Memory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credits => "credits",
            Self::Tokens => "tokens",
            Self::Time => "time",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for ResourceDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One amount per resource dimension. Used for limits, consumption and
/// reservations alike; all arithmetic saturates at zero and `u64::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAmounts {
    #[serde(default)]
    pub credits: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub time_ms: u64,
    #[serde(default)]
    pub memory_mb: u64,
}

pub type ResourceLimits = ResourceAmounts;
pub type ResourceUsage = ResourceAmounts;

impl ResourceAmounts {
    pub fn new(credits: u64, tokens: u64, time_ms: u64, memory_mb: u64) -> Self {
        Self {
            credits,
            tokens,
            time_ms,
            memory_mb,
        }
    }

    pub fn credits(credits: u64) -> Self {
        Self {
            credits,
            ..Self::default()
        }
    }

    pub fn get(&self, dimension: ResourceDimension) -> u64 {
        match dimension {
            ResourceDimension::Credits => self.credits,
            ResourceDimension::Tokens => self.tokens,
            ResourceDimension::Time => self.time_ms,
            ResourceDimension::Memory => self.memory_mb,
        }
    }

    pub fn is_zero(&self) -> bool {
        ResourceDimension::ALL.iter().all(|dim| self.get(*dim) == 0)
    }

    pub fn saturating_add(&self, other: &Self) -> Self {
        Self {
            credits: self.credits.saturating_add(other.credits),
            tokens: self.tokens.saturating_add(other.tokens),
            time_ms: self.time_ms.saturating_add(other.time_ms),
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
        }
    }

    pub fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            credits: self.credits.saturating_sub(other.credits),
            tokens: self.tokens.saturating_sub(other.tokens),
            time_ms: self.time_ms.saturating_sub(other.time_ms),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
        }
    }

    pub fn min(&self, other: &Self) -> Self {
        Self {
            credits: self.credits.min(other.credits),
            tokens: self.tokens.min(other.tokens),
            time_ms: self.time_ms.min(other.time_ms),
            memory_mb: self.memory_mb.min(other.memory_mb),
        }
    }

    /// True iff every dimension of `self` is at most the matching one in `bound`.
    pub fn fits_within(&self, bound: &Self) -> bool {
        ResourceDimension::ALL
            .iter()
            .all(|dim| self.get(*dim) <= bound.get(*dim))
    }

    pub fn exceeded_dimensions(&self, limits: &Self) -> Vec<ResourceDimension> {
        ResourceDimension::ALL
            .into_iter()
            .filter(|dim| self.get(*dim) > limits.get(*dim))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllocation {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub limits: ResourceLimits,
    #[serde(default)]
    pub consumed: ResourceUsage,
    #[serde(default)]
    pub reserved: ResourceAmounts,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ResourceAllocation {
    pub fn available(&self) -> ResourceAmounts {
        self.limits
            .saturating_sub(&self.consumed)
            .saturating_sub(&self.reserved)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentUsed {
    pub credits: f64,
    pub tokens: f64,
    pub time: f64,
    pub memory: f64,
}

impl PercentUsed {
    pub fn get(&self, dimension: ResourceDimension) -> f64 {
        match dimension {
            ResourceDimension::Credits => self.credits,
            ResourceDimension::Tokens => self.tokens,
            ResourceDimension::Time => self.time,
            ResourceDimension::Memory => self.memory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub allocation_id: String,
    pub consumed: ResourceUsage,
    pub reserved: ResourceAmounts,
    pub remaining: ResourceAmounts,
    pub percent_used: PercentUsed,
}

impl UsageStats {
    pub fn from_allocation(allocation: &ResourceAllocation) -> Self {
        let percent = |dim: ResourceDimension| {
            percent_of(allocation.consumed.get(dim), allocation.limits.get(dim))
        };
        Self {
            allocation_id: allocation.id.clone(),
            consumed: allocation.consumed,
            reserved: allocation.reserved,
            remaining: allocation.available(),
            percent_used: PercentUsed {
                credits: percent(ResourceDimension::Credits),
                tokens: percent(ResourceDimension::Tokens),
                time: percent(ResourceDimension::Time),
                memory: percent(ResourceDimension::Memory),
            },
        }
    }
}

fn percent_of(consumed: u64, limit: u64) -> f64 {
    if limit == 0 {
        return if consumed > 0 { 100.0 } else { 0.0 };
    }
    ((consumed as f64 / limit as f64) * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_never_underflows() {
        let allocation = ResourceAllocation {
            id: "a".to_string(),
            parent_id: None,
            limits: ResourceAmounts::credits(10),
            consumed: ResourceAmounts::credits(8),
            reserved: ResourceAmounts::credits(5),
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(allocation.available(), ResourceAmounts::default());
    }

    #[test]
    fn percent_used_is_capped_at_one_hundred() {
        assert_eq!(percent_of(150, 100), 100.0);
        assert_eq!(percent_of(25, 100), 25.0);
        assert_eq!(percent_of(0, 0), 0.0);
        assert_eq!(percent_of(1, 0), 100.0);
    }

    #[test]
    fn exceeded_dimensions_lists_only_overruns() {
        let usage = ResourceAmounts::new(11, 5, 0, 3);
        let limits = ResourceAmounts::new(10, 5, 100, 2);
        assert_eq!(
            usage.exceeded_dimensions(&limits),
            vec![ResourceDimension::Credits, ResourceDimension::Memory]
        );
    }
}
