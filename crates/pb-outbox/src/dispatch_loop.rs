//! Dispatch Loop
//!
//! One poll–send–acknowledge cycle per interval:
//! - fetch up to `batch_size` unsent messages (ascending id)
//! - for each: send to the webhook, record the provider id, mark sent
//! - sleep `poll_interval`, pre-empted by the stop signal
//!
//! The delivery record is written before the message is marked sent, so a
//! failure between the two writes leaves the message unsent and it is
//! delivered again on a later cycle (at-least-once).

use std::sync::Arc;
use std::time::Duration;

use pb_common::{DeliveryRecord, FailurePolicy, Message};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::DeliveryCache;
use crate::error::{DispatchError, ErrorScope, Result};
use crate::outbox_metrics;
use crate::store::MessageStore;
use crate::webhook::WebhookClient;

/// Dispatch loop configuration
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum messages fetched per poll
    pub batch_size: u32,
    /// Sleep between batches
    pub poll_interval: Duration,
    pub failure_policy: FailurePolicy,
    /// Consecutive failed polls tolerated under `SkipFailed`
    pub max_consecutive_store_failures: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            poll_interval: Duration::from_secs(120),
            failure_policy: FailurePolicy::StopOnError,
            max_consecutive_store_failures: 5,
        }
    }
}

/// Why a loop instance terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The controller stopped this run
    Stopped,
    /// A failure ended the run; the controller is back to idle
    Failed(DispatchError),
}

impl LoopExit {
    pub fn reason(&self) -> &'static str {
        match self {
            LoopExit::Stopped => "stopped",
            LoopExit::Failed(_) => "failed",
        }
    }
}

/// Counts for a completed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum CycleOutcome {
    Completed(BatchReport),
    Stopped,
}

pub struct DispatchLoop {
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn DeliveryCache>,
    webhook: Arc<dyn WebhookClient>,
    config: LoopConfig,
}

impl DispatchLoop {
    pub fn new(
        store: Arc<dyn MessageStore>,
        cache: Arc<dyn DeliveryCache>,
        webhook: Arc<dyn WebhookClient>,
        config: LoopConfig,
    ) -> Self {
        Self {
            store,
            cache,
            webhook,
            config,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Deliver a single message: send, record the provider id (if any), mark sent.
    ///
    /// Returns the provider id that was recorded.
    pub async fn deliver(&self, message: &Message) -> Result<Option<String>> {
        let response = self.webhook.send(&message.payload()).await?;
        let provider_id = response.provider_message_id().map(str::to_owned);

        if let Some(ref id) = provider_id {
            self.cache
                .record(&DeliveryRecord::new(message.id, id.clone()))
                .await?;
            outbox_metrics::record_delivery_recorded();
        }

        self.store.mark_sent(message.id).await?;
        Ok(provider_id)
    }

    /// Run until stopped or until a failure ends the run.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> LoopExit {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            failure_policy = %self.config.failure_policy,
            "Dispatch loop started"
        );

        let mut store_failures = 0u32;

        let exit = loop {
            if *stop.borrow() {
                break LoopExit::Stopped;
            }

            match self.run_cycle(&stop).await {
                Ok(CycleOutcome::Stopped) => break LoopExit::Stopped,
                Ok(CycleOutcome::Completed(report)) => {
                    store_failures = 0;
                    info!(
                        fetched = report.fetched,
                        sent = report.sent,
                        failed = report.failed,
                        "Messages processed"
                    );
                }
                Err(e) => match self.config.failure_policy {
                    FailurePolicy::StopOnError => break LoopExit::Failed(e),
                    FailurePolicy::SkipFailed => {
                        store_failures += 1;
                        if store_failures >= self.config.max_consecutive_store_failures {
                            error!(
                                error = %e,
                                consecutive_failures = store_failures,
                                "Message store unavailable, giving up"
                            );
                            break LoopExit::Failed(e);
                        }
                        warn!(
                            error = %e,
                            consecutive_failures = store_failures,
                            "Poll failed, retrying next cycle"
                        );
                    }
                },
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = stop.wait_for(|stopped| *stopped) => break LoopExit::Stopped,
            }
        };

        match &exit {
            LoopExit::Stopped => info!("Dispatch loop stopped"),
            LoopExit::Failed(e) => error!(error = %e, "Dispatch loop terminated"),
        }
        outbox_metrics::record_loop_exit(exit.reason());
        exit
    }

    async fn run_cycle(&self, stop: &watch::Receiver<bool>) -> Result<CycleOutcome> {
        debug!("Polling for unsent messages");
        let messages = self.store.fetch_unsent(self.config.batch_size).await.map_err(|e| {
            outbox_metrics::record_poll_failed();
            e
        })?;

        if *stop.borrow() {
            return Ok(CycleOutcome::Stopped);
        }

        outbox_metrics::record_batch_fetched(messages.len());
        let mut report = BatchReport {
            fetched: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            if *stop.borrow() {
                return Ok(CycleOutcome::Stopped);
            }

            debug!(message_id = message.id, "Processing message");
            match self.deliver(message).await {
                Ok(provider_id) => {
                    report.sent += 1;
                    outbox_metrics::record_message_sent();
                    info!(
                        message_id = message.id,
                        provider_message_id = provider_id.as_deref().unwrap_or(""),
                        "Message sent"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    outbox_metrics::record_message_failed(e.kind());
                    error!(message_id = message.id, error = %e, "Error sending message");

                    let skip = self.config.failure_policy == FailurePolicy::SkipFailed
                        && e.scope() == ErrorScope::Message;
                    if !skip {
                        return Err(e);
                    }
                }
            }
        }

        Ok(CycleOutcome::Completed(report))
    }
}
