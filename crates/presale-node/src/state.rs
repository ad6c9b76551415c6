//! Shared node state for HTTP handlers.

use std::sync::Arc;
use std::time::Instant;

use presale_core::StaticSettings;
use presale_settlement::SettlementEngine;

/// Shared state for the running node, accessible from HTTP handlers.
pub struct NodeState {
    pub engine: Arc<SettlementEngine>,
    /// Runtime-adjustable sale settings the engine reads from.
    pub settings: Arc<StaticSettings>,
    /// Name of the storage backend in use.
    pub storage_backend: &'static str,
    /// When the node started.
    pub start_time: Instant,
}

impl NodeState {
    pub fn new(
        engine: Arc<SettlementEngine>,
        settings: Arc<StaticSettings>,
        storage_backend: &'static str,
    ) -> Self {
        Self {
            engine,
            settings,
            storage_backend,
            start_time: Instant::now(),
        }
    }
}
