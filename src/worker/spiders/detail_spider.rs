//! Detail crawler. Spec non-goal: detail-page extraction semantics are out of scope, this
//! registers the name so `WorkerExecutor` can reject unknown spiders rather than missing
//! spiders, but does no crawling of its own yet.

use async_trait::async_trait;
use tracing::warn;

use crate::context::Context;
use crate::error::SpiderError;
use crate::models::Task;

use super::Spider;

pub struct DetailSpider;

#[async_trait]
impl Spider for DetailSpider {
    async fn start(&self, task: Task, _ctx: &Context) -> Result<(), SpiderError> {
        warn!(id = %task.id, "detail_spider invoked but detail extraction is not implemented");
        Ok(())
    }
}
