pub mod allocation;
pub mod allocator;
pub mod error;
pub mod policy;

pub use allocation::{
    PercentUsed, ResourceAllocation, ResourceAmounts, ResourceDimension, ResourceLimits,
    ResourceUsage, UsageStats,
};
pub use allocator::ResourceAllocator;
pub use error::AllocationError;
pub use policy::{LimitPolicy, LoggingLimitPolicy};
