//! Ordered background processing of webhook notifications.

use super::invalidator::WebhookInvalidator;
use super::notice::MutationNotice;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sending side of the webhook worker.
///
/// Notifications are processed one at a time in the order they were
/// enqueued, so live `update` frames follow storage commit order.
#[derive(Clone)]
pub struct WebhookQueue {
    sender: mpsc::Sender<MutationNotice>,
}

impl WebhookQueue {
    /// Start the worker. It drains remaining notifications and exits once
    /// `token` is cancelled.
    pub fn spawn(
        invalidator: Arc<WebhookInvalidator>,
        capacity: usize,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<MutationNotice>(capacity.max(1));

        let worker = tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    biased;
                    notice = receiver.recv() => match notice {
                        Some(notice) => notice,
                        None => break,
                    },
                    _ = token.cancelled() => break,
                };
                // Malformed keys are logged inside `process`.
                let _ = invalidator.process(&notice).await;
            }

            receiver.close();
            while let Some(notice) = receiver.recv().await {
                let _ = invalidator.process(&notice).await;
            }
            debug!("webhook worker stopped");
        });

        (Self { sender }, worker)
    }

    /// Queue a notification without waiting. Returns false if it was shed.
    pub fn enqueue(&self, notice: MutationNotice) -> bool {
        match self.sender.try_send(notice) {
            Ok(()) => true,
            Err(TrySendError::Full(notice)) => {
                warn!(key = %notice.key, "webhook queue full, dropping notification");
                false
            }
            Err(TrySendError::Closed(notice)) => {
                warn!(key = %notice.key, "webhook worker stopped, dropping notification");
                false
            }
        }
    }
}
