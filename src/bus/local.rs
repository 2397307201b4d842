//! In-process broadcast bus.
//!
//! Every instance opened with `local://` shares one process-wide bus, so
//! multiple caches inside one program invalidate each other the same way
//! networked instances would through a remote bus. Mostly useful for
//! tests and for embedding several caches in one service.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use super::Bus;
use crate::error::Result;

const CHANNEL_CAPACITY: usize = 256;

static SHARED: Lazy<Arc<LocalBus>> = Lazy::new(|| Arc::new(LocalBus::new()));

#[derive(Default)]
pub struct LocalBus {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus joined by `local://`.
    pub fn shared() -> Arc<LocalBus> {
        SHARED.clone()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Bus for LocalBus {
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        trace!(channel, len = payload.len(), "bus publish");
        // A send error just means nobody is subscribed yet.
        let _ = self.sender(channel).send(payload.to_vec());
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let mut rx = self.sender(channel).subscribe();
        let (tx, out) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    // A lagged subscriber drops messages; best-effort
                    // delivery tolerates that.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out)
    }
}
