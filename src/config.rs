//! Engine configuration
//!
//! Validated at construction so a misconfigured engine fails fast rather
//! than deadlocking on a zero-permit semaphore at runtime.

use crate::error::ConfigError;

/// Maximum reasonable listing permit count
const MAX_LISTING_PERMITS: usize = 512;

/// Ready-batch size limits (store-then-expand execution phase)
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 100_000;

/// How discovered targets are persisted relative to execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpansionStrategy {
    /// Persist each discovered target and execute it immediately
    /// (incremental; the canonical mode)
    #[default]
    ExpandThenStore,
    /// Persist the whole expansion first, then execute targets in ready
    /// batches pulled back from the store
    StoreThenExpand,
}

/// Validated engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Permits bounding concurrent directory listings
    pub listing_permits: usize,

    /// Batch size when pulling ready targets back from the store
    pub batch_size: usize,

    /// Expansion strategy
    pub strategy: ExpansionStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listing_permits: num_cpus::get(),
            batch_size: 1000,
            strategy: ExpansionStrategy::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration, validating the permit and batch bounds
    pub fn new(
        listing_permits: usize,
        batch_size: usize,
        strategy: ExpansionStrategy,
    ) -> Result<Self, ConfigError> {
        if listing_permits == 0 || listing_permits > MAX_LISTING_PERMITS {
            return Err(ConfigError::InvalidListingPermits {
                count: listing_permits,
                max: MAX_LISTING_PERMITS,
            });
        }
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(ConfigError::InvalidBatchSize {
                size: batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(Self {
            listing_permits,
            batch_size,
            strategy,
        })
    }
}
