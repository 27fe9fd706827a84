//! Ordered progress relay
//!
//! Events are queued and delivered by a single worker task, one call at a
//! time, so the API sees them in exactly the order they were sent even
//! though each notification is itself an asynchronous request. A failed
//! delivery is logged and the queue moves on.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use restcoder_core::dto::progress::ProgressEvent;

use crate::repository::ProgressNotifier;

pub struct ProgressRelay {
    sender: Mutex<Option<mpsc::UnboundedSender<ProgressEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressRelay {
    /// Starts the delivery worker for one submission
    pub fn start(notifier: Arc<dyn ProgressNotifier>, notify_key: impl Into<String>) -> Self {
        let notify_key = notify_key.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<ProgressEvent>();

        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                debug!("Notifying {} for {}", event.kind(), notify_key);
                if let Err(e) = notifier.notify_progress(&notify_key, &event).await {
                    warn!("Progress notification {} dropped: {:#}", event.kind(), e);
                }
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Relay for a run that has no notification key; drops every event
    pub fn disabled() -> Self {
        Self {
            sender: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Queues an event; ignored once the relay is closed
    pub fn send(&self, event: ProgressEvent) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }

    /// Stops accepting events and waits until every queued one is delivered
    pub async fn close(&self) {
        self.sender.lock().unwrap().take();

        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Progress relay worker failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use restcoder_core::domain::result::PipelineResult;
    use std::time::Duration;

    /// Records every notification, optionally failing some
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub events: Mutex<Vec<ProgressEvent>>,
        pub results: Mutex<Vec<PipelineResult>>,
        pub fail_kinds: Vec<&'static str>,
    }

    impl RecordingNotifier {
        pub fn kinds(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
        }
    }

    #[async_trait]
    impl ProgressNotifier for RecordingNotifier {
        async fn notify_progress(&self, _key: &str, event: &ProgressEvent) -> anyhow::Result<()> {
            // Uneven latency must not reorder delivery
            if matches!(event, ProgressEvent::Preparing) {
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            if self.fail_kinds.contains(&event.kind()) {
                anyhow::bail!("notification rejected");
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn submit_result(&self, _key: &str, result: &PipelineResult) -> anyhow::Result<()> {
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivery_preserves_order() {
        let notifier = Arc::new(RecordingNotifier::default());
        let relay = ProgressRelay::start(notifier.clone(), "key");

        relay.send(ProgressEvent::Preparing);
        relay.send(ProgressEvent::Install);
        relay.send(ProgressEvent::InstallOk);
        relay.close().await;

        assert_eq!(notifier.kinds(), vec!["PREPARING", "INSTALL", "INSTALL_OK"]);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_stop_queue() {
        let notifier = Arc::new(RecordingNotifier {
            fail_kinds: vec!["INSTALL"],
            ..Default::default()
        });
        let relay = ProgressRelay::start(notifier.clone(), "key");

        relay.send(ProgressEvent::Install);
        relay.send(ProgressEvent::Ready);
        relay.close().await;

        assert_eq!(notifier.kinds(), vec!["READY"]);
    }

    #[tokio::test]
    async fn test_send_after_close_is_ignored() {
        let notifier = Arc::new(RecordingNotifier::default());
        let relay = ProgressRelay::start(notifier.clone(), "key");
        relay.close().await;
        relay.send(ProgressEvent::Ready);
        relay.close().await;

        assert!(notifier.kinds().is_empty());
    }
}
