#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use inventory_service::cache::{AdvisoryCache, MemoryCache};
use inventory_service::memory::MemoryLedger;
use inventory_service::{EngineConfig, InventoryEngine};

pub struct Harness {
    pub engine: Arc<InventoryEngine<MemoryLedger>>,
    pub ledger: MemoryLedger,
    pub cache: Arc<MemoryCache>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let ledger = MemoryLedger::new();
    let cache = Arc::new(MemoryCache::new());
    let engine = Arc::new(InventoryEngine::new(
        ledger.clone(),
        AdvisoryCache::new(cache.clone(), Duration::from_millis(100)),
        config,
    ));
    Harness { engine, ledger, cache }
}

pub async fn stock_pair(harness: &Harness, product_id: &str) -> (i32, i32) {
    let stock = harness.engine.get_stock(product_id).await.unwrap();
    (stock.available_quantity, stock.reserved_quantity)
}
