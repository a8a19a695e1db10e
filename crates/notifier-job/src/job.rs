//! The daily notification job.
//!
//! One run walks `Bootstrapping → AwaitingReady → Querying → Sending →
//! Draining → Terminated`. Each phase returns `Result<_, JobError>`; the
//! first infrastructure error skips ahead to teardown, which always runs.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{Datelike, NaiveDate};
use futures::{StreamExt, stream::BoxStream};
use notifier_core::{
    OutboundMessage, QueryError, Record, RecordSource, SessionStore, StorageError, Transport,
    TransportError, TransportEvent,
};
use notifier_session::SessionPersister;
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};

use crate::ack::{AckOutcome, AckTracker};

/// Tunables for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Destination chat for every message.
    pub chat_id: String,
    /// Time to wait for each message's acknowledgment.
    pub ack_timeout: Duration,
    /// Pause between consecutive sends.
    pub send_delay: Duration,
    /// Grace period before teardown so late session saves can land.
    pub drain_delay: Duration,
    /// Auth failures tolerated while resuming a session.
    pub auth_retries: u32,
    /// Bound on the readiness wait once a session is resumed or authenticated.
    pub ready_timeout: Duration,
    /// Extra `send_text` attempts after a failed one.
    pub send_retries: u32,
    /// Delete a resumed session that fails authentication.
    pub discard_stale_session: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            chat_id: String::new(),
            ack_timeout: Duration::from_secs(20),
            send_delay: Duration::from_secs(5),
            drain_delay: Duration::from_secs(10),
            auth_retries: 3,
            ready_timeout: Duration::from_secs(120),
            send_retries: 0,
            discard_stale_session: true,
        }
    }
}

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Bootstrapping,
    AwaitingReady,
    Querying,
    Sending,
    Draining,
    Terminated,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bootstrapping => "bootstrapping",
            Self::AwaitingReady => "awaiting_ready",
            Self::Querying => "querying",
            Self::Sending => "sending",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        })
    }
}

/// Fatal job error. Per-message failures never surface here.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Session storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Transport kept disconnecting before ready: {0}")]
    Disconnected(String),
    #[error("Transport not ready after {0:?}")]
    ReadyTimeout(Duration),
    #[error("Record query failed: {0}")]
    Query(#[from] QueryError),
    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Records matched for the date.
    pub records: usize,
    /// Messages the transport accepted.
    pub sent: usize,
    /// Messages acknowledged at server level or above.
    pub confirmed: usize,
    /// Messages with no acknowledgment within the timeout.
    pub timed_out: usize,
    /// Messages the transport refused or failed to send.
    pub failed: usize,
    /// Teardown steps that reported an error.
    pub teardown_errors: usize,
}

/// Background tasks fed by the transport's event stream.
struct Workers {
    persist: JoinHandle<()>,
    acks: JoinHandle<()>,
}

/// One day's notification run.
pub struct NotificationJob {
    settings: JobSettings,
    persister: SessionPersister<dyn SessionStore>,
    records: Arc<dyn RecordSource>,
    tracker: Arc<AckTracker>,
    phase: JobPhase,
}

impl NotificationJob {
    #[must_use]
    pub fn new(
        settings: JobSettings,
        persister: SessionPersister<dyn SessionStore>,
        records: Arc<dyn RecordSource>,
    ) -> Self {
        Self {
            settings,
            persister,
            records,
            tracker: Arc::new(AckTracker::new()),
            phase: JobPhase::Bootstrapping,
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Run the job for `date`.
    ///
    /// `connect` builds the transport from the resolved session blob
    /// (`None` for a fresh login). Teardown runs whether or not an earlier
    /// phase failed.
    ///
    /// # Errors
    /// Returns the first fatal error from the run itself (storage, auth,
    /// repeated disconnects, readiness timeout, query or transport startup),
    /// else a session save failure.
    pub async fn run<F, Fut>(&mut self, date: NaiveDate, connect: F) -> Result<RunReport, JobError>
    where
        F: FnOnce(Option<Bytes>) -> Fut,
        Fut: Future<Output = Result<Arc<dyn Transport>, TransportError>>,
    {
        let mut report = RunReport::default();
        let mut transport = None;
        let mut workers = None;

        let executed = self
            .execute(date, connect, &mut transport, &mut workers, &mut report)
            .await;
        if let Err(e) = &executed {
            tracing::error!(phase = %self.phase, error = %e, "Job failed");
        }

        self.enter(JobPhase::Terminated);
        report.teardown_errors = self.teardown(transport.as_deref()).await;
        if let Some(workers) = workers {
            self.join_workers(workers).await;
        }

        // The persister has seen every event by now, including updates the
        // transport flushed while shutting down.
        let result = match (executed, self.persist_outcome()) {
            (Ok(()), persisted) => persisted,
            (Err(e), Err(lost)) => {
                tracing::error!(error = %lost, "Session save failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        };

        result.map(|()| {
            tracing::info!(
                records = report.records,
                sent = report.sent,
                confirmed = report.confirmed,
                timed_out = report.timed_out,
                failed = report.failed,
                "Job finished"
            );
            report
        })
    }

    async fn execute<F, Fut>(
        &mut self,
        date: NaiveDate,
        connect: F,
        transport_slot: &mut Option<Arc<dyn Transport>>,
        workers: &mut Option<Workers>,
        report: &mut RunReport,
    ) -> Result<(), JobError>
    where
        F: FnOnce(Option<Bytes>) -> Fut,
        Fut: Future<Output = Result<Arc<dyn Transport>, TransportError>>,
    {
        self.enter(JobPhase::Bootstrapping);
        let session = self.persister.resolve().await?;
        let resumed = session.is_some();

        let transport = connect(session).await?;
        *transport_slot = Some(Arc::clone(&transport));
        *workers = Some(Workers {
            persist: self.persister.spawn(transport.subscribe()),
            acks: self.tracker.spawn_dispatch(transport.subscribe()),
        });

        self.enter(JobPhase::AwaitingReady);
        if let Err(e) = self.await_ready(transport.subscribe(), resumed).await {
            if resumed && self.settings.discard_stale_session && matches!(e, JobError::Auth(_)) {
                if let Err(discard) = self.persister.discard().await {
                    tracing::warn!(error = %discard, "Failed to discard stale session");
                }
            }
            return Err(e);
        }
        self.check_destination(transport.as_ref()).await;

        self.enter(JobPhase::Querying);
        let records = self.records.records_for_date(date.month(), date.day()).await?;
        report.records = records.len();

        if records.is_empty() {
            tracing::info!(%date, "No birthdays today");
        } else {
            tracing::info!(%date, count = records.len(), "Birthdays found");
            self.enter(JobPhase::Sending);
            self.send_all(transport.as_ref(), &records, report).await;
        }

        self.enter(JobPhase::Draining);
        self.drain().await;
        Ok(())
    }

    fn enter(&mut self, phase: JobPhase) {
        self.phase = phase;
        tracing::info!(phase = %phase, "Job phase");
    }

    /// Wait for `Ready`.
    ///
    /// A fresh login waits without bound and fails on the first auth
    /// failure. Once a session is resumed or authenticated, auth failures
    /// and disconnects are tolerated up to `auth_retries` and the wait is
    /// bounded by `ready_timeout`. Only an auth failure exhausting the budget
    /// is `JobError::Auth`; a disconnect doing so is `JobError::Disconnected`.
    async fn await_ready(
        &self,
        mut events: BoxStream<'static, TransportEvent>,
        resumed: bool,
    ) -> Result<(), JobError> {
        let ready_timeout = self.settings.ready_timeout;
        let mut deadline = resumed.then(|| Instant::now() + ready_timeout);
        let mut failures = 0u32;

        loop {
            let next = match deadline {
                Some(at) => tokio::time::timeout_at(at, events.next())
                    .await
                    .map_err(|_| JobError::ReadyTimeout(ready_timeout))?,
                None => events.next().await,
            };
            let Some(event) = next else {
                return Err(JobError::Transport(TransportError::Closed));
            };

            match event {
                TransportEvent::Ready => {
                    tracing::info!("Transport ready");
                    return Ok(());
                }
                TransportEvent::LoginChallenge(code) => {
                    tracing::info!(code = %code, "Login required, scan the code to pair");
                }
                TransportEvent::Authenticated => {
                    tracing::info!("Transport authenticated");
                    deadline.get_or_insert_with(|| Instant::now() + ready_timeout);
                }
                TransportEvent::AuthFailure(reason) if deadline.is_some() => {
                    failures += 1;
                    tracing::warn!(
                        reason = %reason,
                        failures,
                        retries = self.settings.auth_retries,
                        "Authentication failed, still waiting"
                    );
                    if failures > self.settings.auth_retries {
                        return Err(JobError::Auth(reason));
                    }
                }
                // Counts against the same budget, but never marks the
                // session itself as bad.
                TransportEvent::Disconnected(reason) if deadline.is_some() => {
                    failures += 1;
                    tracing::warn!(
                        reason = %reason,
                        failures,
                        retries = self.settings.auth_retries,
                        "Transport disconnected, still waiting"
                    );
                    if failures > self.settings.auth_retries {
                        return Err(JobError::Disconnected(reason));
                    }
                }
                TransportEvent::AuthFailure(reason) => return Err(JobError::Auth(reason)),
                TransportEvent::Disconnected(reason) => {
                    tracing::warn!(reason = %reason, "Transport disconnected before login");
                }
                _ => {}
            }
        }
    }

    async fn check_destination(&self, transport: &dyn Transport) {
        let chat_id = self.settings.chat_id.as_str();
        match transport.find_chat(chat_id).await {
            Ok(Some(chat)) => {
                tracing::info!(chat_id, name = %chat.name, is_group = chat.is_group, "Destination chat found");
            }
            Ok(None) => tracing::warn!(chat_id, "Destination chat is unknown to the transport"),
            Err(e) => tracing::warn!(chat_id, error = %e, "Destination chat lookup failed"),
        }
    }

    async fn send_all(&self, transport: &dyn Transport, records: &[Record], report: &mut RunReport) {
        for (index, record) in records.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.send_delay).await;
            }

            let message = OutboundMessage::greeting(&self.settings.chat_id, record);
            match self.deliver(transport, &message).await {
                Ok(AckOutcome::Confirmed(level)) => {
                    report.sent += 1;
                    report.confirmed += 1;
                    tracing::info!(name = %record.display_name(), %level, "Greeting delivered");
                }
                Ok(AckOutcome::TimedOut | AckOutcome::Abandoned) => {
                    report.sent += 1;
                    report.timed_out += 1;
                    tracing::warn!(
                        name = %record.display_name(),
                        timeout = ?self.settings.ack_timeout,
                        "No delivery confirmation"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(name = %record.display_name(), error = %e, "Greeting not sent");
                }
            }
        }
    }

    /// Send one message and wait for its acknowledgment.
    async fn deliver(
        &self,
        transport: &dyn Transport,
        message: &OutboundMessage,
    ) -> Result<AckOutcome, TransportError> {
        self.tracker.reset();

        let mut attempt = 0;
        let id = loop {
            match transport.send_text(&message.chat_id, &message.body).await {
                Ok(id) => break id,
                Err(e) if attempt < self.settings.send_retries => {
                    attempt += 1;
                    tracing::warn!(chat_id = %message.chat_id, attempt, error = %e, "Send failed, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        tracing::debug!(chat_id = %message.chat_id, message_id = %id, "Message sent");
        let waiter = self.tracker.register(id);
        Ok(self.tracker.wait(waiter, self.settings.ack_timeout).await)
    }

    /// Give in-flight session saves time to land before teardown.
    async fn drain(&self) {
        tokio::time::sleep(self.settings.drain_delay).await;
        if tokio::time::timeout(self.settings.ack_timeout, self.persister.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!("Session save still in flight after drain");
        }
    }

    /// First save failure of the run, if any.
    fn persist_outcome(&self) -> Result<(), JobError> {
        let mut errors = self.persister.take_errors().into_iter();
        match errors.next() {
            Some(first) => {
                for e in errors {
                    tracing::error!(error = %e, "Additional session save failure");
                }
                Err(JobError::Storage(first))
            }
            None => Ok(()),
        }
    }

    /// Release the transport, then the record source. Both are attempted;
    /// returns how many failed.
    async fn teardown(&self, transport: Option<&dyn Transport>) -> usize {
        let mut failures = 0;
        if let Some(transport) = transport {
            if let Err(e) = transport.shutdown().await {
                failures += 1;
                tracing::error!(error = %e, "Transport shutdown failed");
            }
        }
        if let Err(e) = self.records.close().await {
            failures += 1;
            tracing::error!(error = %e, "Record source close failed");
        }
        failures
    }

    async fn join_workers(&self, workers: Workers) {
        workers.acks.abort();
        let mut persist = workers.persist;
        if tokio::time::timeout(self.settings.ack_timeout, &mut persist)
            .await
            .is_err()
        {
            tracing::warn!("Session persister did not stop after transport shutdown");
            persist.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(JobPhase::AwaitingReady.to_string(), "awaiting_ready");
        assert_eq!(JobPhase::Terminated.to_string(), "terminated");
    }

    #[test]
    fn test_default_settings() {
        let settings = JobSettings::default();
        assert_eq!(settings.ack_timeout, Duration::from_secs(20));
        assert_eq!(settings.send_delay, Duration::from_secs(5));
        assert_eq!(settings.drain_delay, Duration::from_secs(10));
        assert_eq!(settings.auth_retries, 3);
        assert_eq!(settings.send_retries, 0);
        assert!(settings.discard_stale_session);
    }

    #[test]
    fn test_error_conversions() {
        let err: JobError = QueryError::Database("down".to_string()).into();
        assert!(matches!(err, JobError::Query(_)));
        let err: JobError = TransportError::Closed.into();
        assert_eq!(err.to_string(), "Transport failed: Transport closed");
    }
}
