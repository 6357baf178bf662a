use std::sync::Arc;

use livequery_core::{BackendAdapter, InterestSet, LiveQueryResult};
use tokio::sync::{mpsc, Mutex};

use crate::payload::parse_payload;
use crate::source::ListenSource;

/// §6 NOTIFY/trigger-style `BackendAdapter`. Owns a [`ListenSource`],
/// subscribes to one channel per `(database, table)` pair in the published
/// interest-set, and forwards each decoded notification to the channel
/// supplied at construction.
pub struct NotifyBackend {
    source: Arc<Mutex<Box<dyn ListenSource>>>,
    tx: mpsc::Sender<(String, String, livequery_core::CandidateRow)>,
    channel_prefix: String,
    forwarder: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NotifyBackend {
    pub fn new(
        source: Box<dyn ListenSource>,
        tx: mpsc::Sender<(String, String, livequery_core::CandidateRow)>,
        channel_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            tx,
            channel_prefix: channel_prefix.into(),
            forwarder: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl BackendAdapter for NotifyBackend {
    async fn start(&self, interest: InterestSet) -> LiveQueryResult<()> {
        {
            let mut source = self.source.lock().await;
            source.connect().await?;
            source.listen(&self.channel_prefix).await?;
        }
        let _ = interest; // subscription is channel-wide; filtering happens per-candidate in Engine

        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                let notification = {
                    let mut source = source.lock().await;
                    source.next_notification().await
                };
                match notification {
                    Ok(Some(raw)) => match parse_payload(&raw.payload) {
                        Ok((database, table, candidate)) => {
                            tracing::debug!(%database, %table, "notify payload decoded");
                            if tx.send((database, table, candidate)).await.is_err() {
                                tracing::debug!("ingress channel closed, stopping forwarder");
                                break;
                            }
                        }
                        Err(err) => tracing::warn!("dropping malformed notify payload: {err}"),
                    },
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!("notify stream failed: {err}");
                        break;
                    }
                }
            }
        });
        *self.forwarder.lock().await = Some(handle);
        tracing::info!(channel = %self.channel_prefix, "notify backend started");
        Ok(())
    }

    async fn stop(&self) -> LiveQueryResult<()> {
        if let Some(handle) = self.forwarder.lock().await.take() {
            handle.abort();
        }
        self.source.lock().await.disconnect().await;
        Ok(())
    }

    async fn set_interest(&self, _interest: InterestSet) -> LiveQueryResult<()> {
        // The channel subscription is fixed at `start()`; narrowing interest
        // only changes which caches `Engine::ingest_candidate` invalidates.
        Ok(())
    }
}
