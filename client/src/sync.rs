//! Push/pull sync cycle per (file, group) scope.
//!
//! One cycle:
//!
//! 1. Authenticate, reusing the cached token when there is one
//! 2. Push the scope's unacknowledged outbox entries with its cursor
//! 3. Pull the messages the server returns
//! 4. Advance the local clock past the newest pulled timestamp. If the clock
//!    refuses (the timestamp is too far ahead), the cycle fails with
//!    [`SyncError::Clock`] before anything is merged.
//! 5. Merge each message into local storage
//! 6. Only if every message merged: advance the cursor and drop the pushed
//!    entries from the outbox, in one transaction
//!
//! Any failure before step 6 commits leaves the cursor and outbox as they
//! were, so the next cycle repeats the same work. Merging is idempotent,
//! which makes the repetition harmless.
//!
//! Cycles on one scope never overlap. A request that arrives while a cycle
//! is running is coalesced into one more cycle run by the current holder,
//! whether or not the running cycle succeeds.

use crate::auth::Session;
use crate::config::Config;
use crate::db::{cursor, outbox, Database};
use crate::error::{FailureReason, SyncError};
use crate::scope::Scope;
use crate::transport::{FileInfo, SyncTransport};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_engine::{wire, Envelope, HybridLogicalClock, MergeOutcome, Message, Timestamp};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Where a scope's sync currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Authenticating,
    Pushing,
    Pulling,
    Merging,
    Failed(FailureReason),
}

/// Retry and deadline settings for [`SyncClient::sync`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Extra attempts after a network failure
    pub retries: u32,
    /// Delay before the first retry; doubles each time
    pub backoff: Duration,
    /// Deadline for the whole sync, retries included
    pub timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.sync_retries,
            backoff: config.sync_backoff,
            timeout: config.sync_timeout,
        }
    }
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Outbox entries delivered and removed
    pub pushed: usize,
    /// Messages pulled from the server
    pub received: usize,
    pub applied: usize,
    pub discarded: usize,
    /// Watermark after the cycle
    pub cursor: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// This call ran the cycle (possibly several, if requests were coalesced).
    Completed(CycleReport),
    /// A cycle was already running; it will run once more on our behalf,
    /// even if the running one fails.
    Coalesced,
}

struct ScopeSlot {
    lock: Mutex<()>,
    rerun: AtomicBool,
    state: watch::Sender<SyncState>,
}

impl ScopeSlot {
    fn new() -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
            state,
        }
    }

    fn publish(&self, scope: &Scope, state: SyncState) {
        info!(%scope, ?state, "Sync state changed");
        self.state.send_replace(state);
    }
}

/// Runs sync cycles against the server.
pub struct SyncClient {
    db: Database,
    transport: Arc<dyn SyncTransport>,
    session: Session,
    clock: Arc<HybridLogicalClock>,
    options: SyncOptions,
    scopes: DashMap<Scope, Arc<ScopeSlot>>,
}

impl SyncClient {
    pub fn new(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        session: Session,
        clock: Arc<HybridLogicalClock>,
        options: SyncOptions,
    ) -> Self {
        Self {
            db,
            transport,
            session,
            clock,
            options,
            scopes: DashMap::new(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn slot(&self, scope: &Scope) -> Arc<ScopeSlot> {
        Arc::clone(
            self.scopes
                .entry(scope.clone())
                .or_insert_with(|| Arc::new(ScopeSlot::new()))
                .value(),
        )
    }

    /// Current state of a scope.
    pub fn state(&self, scope: &Scope) -> SyncState {
        *self.slot(scope).state.borrow()
    }

    /// Watch a scope's state transitions.
    pub fn subscribe(&self, scope: &Scope) -> watch::Receiver<SyncState> {
        self.slot(scope).state.subscribe()
    }

    /// Budget files visible to this account.
    pub async fn list_user_files(&self) -> Result<Vec<FileInfo>, SyncError> {
        let token = self.session.token(self.transport.as_ref()).await?;
        match self.transport.list_user_files(&token).await {
            Err(SyncError::Auth(reason)) if self.session.can_reauthenticate() => {
                warn!(%reason, "Token rejected, logging in again");
                self.session.invalidate().await;
                let token = self.session.token(self.transport.as_ref()).await?;
                self.transport.list_user_files(&token).await
            }
            other => other,
        }
    }

    /// Fetch a scope's full history without touching local storage.
    pub async fn pull_history(&self, scope: &Scope) -> Result<Vec<Message>, SyncError> {
        let request = Envelope::new(&scope.file_id, &scope.group_id, Timestamp::zero(), vec![]);
        let body = wire::encode(&request).map_err(SyncError::Decode)?;
        let response = self.exchange(None, scope, body).await?;
        let envelope = wire::decode(&response).map_err(SyncError::Decode)?;
        info!(%scope, messages = envelope.messages.len(), "Pulled full history");
        Ok(envelope.messages)
    }

    /// Run a sync cycle for a scope, or coalesce into the one in flight.
    ///
    /// When a cycle fails while a coalesced request is waiting, the holder
    /// runs once more and reports the outcome of that rerun instead.
    pub async fn sync(&self, scope: &Scope) -> Result<SyncOutcome, SyncError> {
        let slot = self.slot(scope);
        let mut last = None;

        loop {
            let guard = match slot.lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    slot.rerun.store(true, Ordering::SeqCst);
                    // The holder may have released between the two checks.
                    match slot.lock.try_lock() {
                        Ok(guard) => guard,
                        Err(_) => {
                            debug!(%scope, "Sync already running, coalesced");
                            break;
                        }
                    }
                }
            };
            slot.rerun.store(false, Ordering::SeqCst);

            let result = self.run_with_retry(scope, &slot).await;
            drop(guard);

            match result {
                Ok(report) => {
                    slot.publish(scope, SyncState::Idle);
                    info!(
                        %scope,
                        pushed = report.pushed,
                        received = report.received,
                        applied = report.applied,
                        discarded = report.discarded,
                        "Sync cycle complete"
                    );
                    last = Some(report);
                }
                Err(e) => {
                    error!(%scope, error = %e, "Sync cycle failed");
                    slot.publish(scope, SyncState::Failed(e.reason()));
                    if !slot.rerun.load(Ordering::SeqCst) {
                        return Err(e);
                    }
                    info!(%scope, "Running coalesced request after failure");
                    continue;
                }
            }

            if !slot.rerun.load(Ordering::SeqCst) {
                break;
            }
        }

        Ok(match last {
            Some(report) => SyncOutcome::Completed(report),
            None => SyncOutcome::Coalesced,
        })
    }

    async fn run_with_retry(&self, scope: &Scope, slot: &ScopeSlot) -> Result<CycleReport, SyncError> {
        let attempts = async {
            let mut attempt = 0u32;
            loop {
                match self.run_cycle(scope, slot).await {
                    Err(e) if e.is_retryable() && attempt < self.options.retries => {
                        let delay = self
                            .options
                            .backoff
                            .saturating_mul(2u32.saturating_pow(attempt));
                        attempt += 1;
                        warn!(%scope, error = %e, attempt, ?delay, "Retrying sync");
                        tokio::time::sleep(delay).await;
                    }
                    result => return result,
                }
            }
        };

        match tokio::time::timeout(self.options.timeout, attempts).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Cancelled),
        }
    }

    /// Send one request, logging in again once if the token was rejected.
    async fn exchange(
        &self,
        slot: Option<&ScopeSlot>,
        scope: &Scope,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, SyncError> {
        if let Some(slot) = slot {
            slot.publish(scope, SyncState::Authenticating);
        }
        let token = self.session.token(self.transport.as_ref()).await?;

        if let Some(slot) = slot {
            slot.publish(scope, SyncState::Pushing);
        }
        match self.transport.sync(&token, &scope.file_id, body.clone()).await {
            Err(SyncError::Auth(reason)) if self.session.can_reauthenticate() => {
                warn!(%scope, %reason, "Token rejected, logging in again");
                self.session.invalidate().await;
                if let Some(slot) = slot {
                    slot.publish(scope, SyncState::Authenticating);
                }
                let token = self.session.token(self.transport.as_ref()).await?;
                if let Some(slot) = slot {
                    slot.publish(scope, SyncState::Pushing);
                }
                self.transport.sync(&token, &scope.file_id, body).await
            }
            other => other,
        }
    }

    async fn run_cycle(&self, scope: &Scope, slot: &ScopeSlot) -> Result<CycleReport, SyncError> {
        let pending = self.db.pending_outbox(scope).await?;
        let since = self.db.cursor(&scope.file_id, &scope.group_id).await?;
        debug!(%scope, pending = pending.len(), %since, "Starting sync cycle");

        let request = Envelope::new(
            &scope.file_id,
            &scope.group_id,
            since.clone(),
            pending.iter().map(|entry| entry.message.clone()).collect(),
        );
        let body = wire::encode(&request).map_err(SyncError::Decode)?;
        let response = self.exchange(Some(slot), scope, body).await?;

        slot.publish(scope, SyncState::Pulling);
        let envelope = wire::decode(&response).map_err(SyncError::Decode)?;

        // Local writes stamped after this cycle must beat everything merged
        // by it, so nothing is merged unless the clock can move past all of it.
        if let Some(max) = envelope.max_timestamp() {
            self.clock.observe(max).map_err(SyncError::Clock)?;
        }

        slot.publish(scope, SyncState::Merging);
        let total = envelope.messages.len();
        let (mut applied, mut discarded, mut failed) = (0, 0, 0);
        for message in &envelope.messages {
            match self.db.apply(message).await {
                Ok(MergeOutcome::Applied { row_created }) => {
                    applied += 1;
                    debug!(cell = ?message.cell(), row_created, "Applied");
                }
                Ok(MergeOutcome::Discarded { reason }) => {
                    discarded += 1;
                    debug!(cell = ?message.cell(), ?reason, "Discarded");
                }
                Err(e) => {
                    failed += 1;
                    warn!(cell = ?message.cell(), error = %e, "Skipping message that failed to apply");
                }
            }
        }
        if failed > 0 {
            return Err(SyncError::Incomplete { failed, total });
        }

        let cursor = match envelope.max_timestamp() {
            Some(max) if *max > since => max.clone(),
            _ => since,
        };
        let ids: Vec<i64> = pending.iter().map(|entry| entry.id).collect();

        let mut tx = self.db.pool().begin().await?;
        cursor::store(&mut tx, &scope.file_id, &scope.group_id, &cursor).await?;
        outbox::acknowledge(&mut tx, scope, &ids).await?;
        tx.commit().await?;

        Ok(CycleReport {
            pushed: ids.len(),
            received: total,
            applied,
            discarded,
            cursor,
        })
    }
}
