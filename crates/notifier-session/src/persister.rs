//! Session persister: the bridge between a transport's session hook and a store.
//!
//! At startup `resolve` looks the stored session up (`exists`, then
//! `extract`). Once the transport is running, `spawn` consumes its event
//! stream and saves every `SessionUpdated` blob, one save at a time.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use notifier_core::{SessionStore, StorageError, TransportEvent};
use tokio::{sync::watch, task::JoinHandle};

struct Inner<S: ?Sized> {
    session_id: String,
    busy: watch::Sender<bool>,
    saves: AtomicU64,
    errors: Mutex<Vec<StorageError>>,
    store: Arc<S>,
}

/// Persists one named session on behalf of a transport.
pub struct SessionPersister<S>
where
    S: SessionStore + ?Sized + 'static,
{
    inner: Arc<Inner<S>>,
}

impl<S> SessionPersister<S>
where
    S: SessionStore + ?Sized + 'static,
{
    /// Create a persister for `session_id` backed by `store`.
    #[must_use]
    pub fn new(store: Arc<S>, session_id: impl Into<String>) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                busy,
                saves: AtomicU64::new(0),
                errors: Mutex::new(Vec::new()),
                store,
            }),
        }
    }

    /// Session identifier this persister manages.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Look up the stored session, if any.
    ///
    /// # Errors
    /// Returns error if the store fails; a missing session is `Ok(None)`.
    pub async fn resolve(&self) -> Result<Option<Bytes>, StorageError> {
        let session_id = self.session_id();
        if !self.inner.store.exists(session_id).await? {
            tracing::info!(session_id, "No stored session, a fresh login is required");
            return Ok(None);
        }

        let blob = self.inner.store.extract(session_id).await?;
        match &blob {
            Some(blob) => tracing::info!(session_id, size = blob.len(), "Resuming stored session"),
            None => tracing::warn!(session_id, "Stored session vanished before it could be read"),
        }
        Ok(blob)
    }

    /// Remove the stored session so the next run starts a fresh login.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn discard(&self) -> Result<(), StorageError> {
        self.inner.store.delete(self.session_id()).await?;
        tracing::info!(session_id = self.session_id(), "Stored session discarded");
        Ok(())
    }

    /// Save every `SessionUpdated` blob from `events` until the stream ends.
    pub fn spawn(&self, mut events: BoxStream<'static, TransportEvent>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let TransportEvent::SessionUpdated(blob) = event else {
                    continue;
                };

                inner.busy.send_replace(true);
                let size = blob.len();
                match inner.store.save(&inner.session_id, blob).await {
                    Ok(()) => {
                        inner.saves.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(session_id = %inner.session_id, size, "Session persisted");
                    }
                    Err(e) => {
                        tracing::error!(session_id = %inner.session_id, error = %e, "Session persist failed");
                        inner
                            .errors
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(e);
                    }
                }
                inner.busy.send_replace(false);
            }
        })
    }

    /// Wait until no save is in flight.
    ///
    /// Only covers updates the hook has already received. To flush updates
    /// still buffered on the stream, end the stream and await the handle
    /// returned by [`Self::spawn`].
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Whether a save is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        *self.inner.busy.borrow()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn saves(&self) -> u64 {
        self.inner.saves.load(Ordering::Relaxed)
    }

    /// Take the save failures collected so far.
    #[must_use]
    pub fn take_errors(&self) -> Vec<StorageError> {
        std::mem::take(
            &mut *self
                .inner
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}
