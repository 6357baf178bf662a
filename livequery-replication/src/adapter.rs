use std::sync::Arc;

use livequery_core::{BackendAdapter, InterestSet, LiveQueryResult, RowEvent};
use tokio::sync::{mpsc, Mutex};

use crate::source::LogSource;

/// §6 binlog-style `BackendAdapter`. Owns a [`LogSource`] and forwards every
/// event it yields to the channel supplied at construction, the same
/// "construct with a sender, spawn a forwarder task" shape
/// `WebSocketClient::connect`/`start_reading` uses in the teacher's sync
/// client.
pub struct ReplicationBackend {
    source: Arc<Mutex<Box<dyn LogSource>>>,
    tx: mpsc::Sender<RowEvent>,
    forwarder: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ReplicationBackend {
    pub fn new(source: Box<dyn LogSource>, tx: mpsc::Sender<RowEvent>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            tx,
            forwarder: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl BackendAdapter for ReplicationBackend {
    async fn start(&self, interest: InterestSet) -> LiveQueryResult<()> {
        {
            let mut source = self.source.lock().await;
            source.connect().await?;
            source.set_interest(interest).await?;
        }

        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = {
                    let mut source = source.lock().await;
                    source.next_event().await
                };
                match event {
                    Ok(Some(event)) => {
                        tracing::debug!(table = %event.table, op = ?event.op, "binlog event received");
                        if tx.send(event).await.is_err() {
                            tracing::debug!("ingress channel closed, stopping forwarder");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!("binlog read failed: {err}");
                        break;
                    }
                }
            }
        });
        *self.forwarder.lock().await = Some(handle);
        tracing::info!("replication backend started");
        Ok(())
    }

    async fn stop(&self) -> LiveQueryResult<()> {
        if let Some(handle) = self.forwarder.lock().await.take() {
            handle.abort();
        }
        self.source.lock().await.disconnect().await;
        Ok(())
    }

    async fn set_interest(&self, interest: InterestSet) -> LiveQueryResult<()> {
        self.source.lock().await.set_interest(interest).await
    }
}
