//! WorkerExecutor (spec §4.6): consumes tasks off the broker and dispatches them to the
//! registered [`spiders::Spider`] named on the task, acking or nacking per [`ErrorKind`].
//! Also owns the DISPATCHED->IN_PROGRESS->{DONE|FAILED|RETRY} state transitions on
//! `recruitment_datasource_config` (spec §3 Ownership).

pub mod spiders;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{AckAction, DeliveryMetadata};
use crate::context::Context;
use crate::error::{ErrorKind, HasKind, SpiderError};
use crate::models::{ConfigState, Task};

const COLLECTION: &str = "recruitment_datasource_config";

pub struct WorkerExecutor {
    ctx: Context,
    spider_name: String,
    queue: String,
    prefetch: u16,
}

impl WorkerExecutor {
    pub fn new(ctx: Context, spider_name: impl Into<String>) -> Self {
        let queue = ctx.settings.worker.task_queue.clone();
        let prefetch = ctx.settings.worker.prefetch_count;
        WorkerExecutor {
            ctx,
            spider_name: spider_name.into(),
            queue,
            prefetch,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let spider = spiders::lookup(&self.spider_name).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown spider {:?}, known spiders: {:?}",
                self.spider_name,
                spiders::known_names()
            )
        })?;

        self.ctx
            .broker
            .declare_queue(&self.queue, true, 10)
            .await?;

        let ctx = self.ctx.clone();
        let spider_name = self.spider_name.clone();
        let handler: crate::broker::DeliveryHandler = Arc::new(move |body, meta| {
            let ctx = ctx.clone();
            let spider = spider.clone();
            let spider_name = spider_name.clone();
            Box::pin(async move { handle_delivery(&ctx, spider.as_ref(), &spider_name, body, meta).await })
        });

        info!(queue = %self.queue, spider = %self.spider_name, prefetch = self.prefetch, "worker starting");
        self.ctx
            .broker
            .consume(&self.queue, self.prefetch, handler, cancel)
            .await?;
        info!("worker stopped");
        Ok(())
    }
}

async fn handle_delivery(
    ctx: &Context,
    spider: &dyn spiders::Spider,
    spider_name: &str,
    body: Vec<u8>,
    meta: DeliveryMetadata,
) -> AckAction {
    let task: Task = match serde_json::from_slice(&body) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "dropping undeserializable task");
            return AckAction::NackDrop;
        }
    };

    info!(id = %task.id, spider = %spider_name, redelivered = meta.redelivered, "dispatching task");
    transition_state(ctx, &task.id, ConfigState::InProgress).await;

    match spider.start(task.clone(), ctx).await {
        Ok(()) => {
            transition_state(ctx, &task.id, ConfigState::Done).await;
            AckAction::Ack
        }
        Err(e) => classify_failure(&task, &e, ctx).await,
    }
}

async fn classify_failure(task: &Task, err: &SpiderError, ctx: &Context) -> AckAction {
    match err.kind() {
        ErrorKind::Transport | ErrorKind::Timeout => {
            warn!(id = %task.id, error = %err, "transient failure, requeuing");
            transition_state(ctx, &task.id, ConfigState::Retry).await;
            AckAction::NackRequeue
        }
        ErrorKind::Config
        | ErrorKind::Protocol
        | ErrorKind::NoPageVariable
        | ErrorKind::Proxy => {
            error!(id = %task.id, error = %err, "permanent failure, dropping");
            transition_state(ctx, &task.id, ConfigState::Failed).await;
            AckAction::NackDrop
        }
    }
}

/// Best-effort state write. A failed transition is logged, not propagated — the ack/nack
/// decision (and thus broker redelivery) must not depend on document-store availability.
async fn transition_state(ctx: &Context, id: &str, state: ConfigState) {
    let update = json!({"$set": {"state": state as i32}});
    if let Err(e) = ctx.document_store.update_one(COLLECTION, json!({"id": id}), update).await {
        error!(id, error = %e, ?state, "failed to persist state transition");
    }
}
