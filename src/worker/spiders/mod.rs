//! Spider registry (spec §9 "Plugin dispatch"): spiders are registered by name at process
//! startup rather than looked up through reflection, so the set of available spiders is a
//! compile-time-checked, statically-linked table.

pub mod detail_spider;
pub mod list_spider;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::context::Context;
use crate::error::SpiderError;
use crate::models::Task;

#[async_trait]
pub trait Spider: Send + Sync {
    async fn start(&self, task: Task, ctx: &Context) -> Result<(), SpiderError>;
}

pub type SpiderFactory = fn() -> Arc<dyn Spider>;

fn registry() -> &'static HashMap<&'static str, SpiderFactory> {
    static REGISTRY: OnceLock<HashMap<&'static str, SpiderFactory>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<&'static str, SpiderFactory> = HashMap::new();
        m.insert("list_spider", || Arc::new(list_spider::ListSpider) as Arc<dyn Spider>);
        m.insert("detail_spider", || {
            Arc::new(detail_spider::DetailSpider) as Arc<dyn Spider>
        });
        m
    })
}

pub fn lookup(name: &str) -> Option<Arc<dyn Spider>> {
    registry().get(name).map(|factory| factory())
}

pub fn known_names() -> Vec<&'static str> {
    registry().keys().copied().collect()
}
