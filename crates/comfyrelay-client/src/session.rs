//! Execution session: one lazily opened event channel, reused across jobs

use crate::channel::{Connector, EventChannel};
use comfyrelay_core::{Error, Result, SessionId};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

struct LiveChannel {
    id: SessionId,
    channel: Box<dyn EventChannel>,
}

/// Owns the session id and its channel. Connects on first `acquire`; a failed
/// connect is not cached, so the next call retries with a fresh id.
///
/// Holding a `SessionLease` excludes every other job, which serializes
/// submissions on one channel.
pub struct ExecutionSession {
    connector: Arc<dyn Connector>,
    live: Mutex<Option<LiveChannel>>,
}

impl ExecutionSession {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            live: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) -> Result<SessionLease<'_>> {
        let mut slot = self.live.lock().await;
        let id = match slot.as_ref() {
            Some(live) => live.id.clone(),
            None => {
                let id = SessionId::generate();
                let channel = self.connector.connect(&id).await?;
                info!("Session {} opened", id);
                *slot = Some(LiveChannel {
                    id: id.clone(),
                    channel,
                });
                id
            }
        };
        Ok(SessionLease { id, slot })
    }

    /// Current session id, if a channel is open and not leased out.
    pub fn current_id(&self) -> Option<SessionId> {
        self.live
            .try_lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|live| live.id.clone()))
    }

    pub async fn is_connected(&self) -> bool {
        self.live.lock().await.is_some()
    }
}

/// Exclusive use of the session for one job.
pub struct SessionLease<'a> {
    id: SessionId,
    slot: MutexGuard<'a, Option<LiveChannel>>,
}

impl SessionLease<'_> {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn channel(&mut self) -> Result<&mut dyn EventChannel> {
        match self.slot.as_mut() {
            Some(live) => Ok(live.channel.as_mut()),
            None => Err(Error::ChannelClosed(format!("session {} was invalidated", self.id))),
        }
    }

    /// Drop the channel; the next `acquire` reconnects.
    pub fn invalidate(&mut self) {
        if self.slot.take().is_some() {
            warn!("Session {} invalidated", self.id);
        }
    }
}
