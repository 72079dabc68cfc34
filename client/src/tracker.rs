//! Outbound change tracking.
//!
//! A use-case that has changed local data hands the changed cells to
//! [`ChangeTracker::track`]. Each one is stamped by the clock, queued in the
//! scope's outbox, and merged into local storage, all in one transaction.
//! Because the clock only moves forward, the fresh stamp beats anything
//! previously applied to the cell, so the local write is visible
//! immediately. If it does not, the batch is refused rather than queued.

use crate::db::{cells, outbox, Database};
use crate::error::TrackError;
use crate::scope::Scope;
use std::sync::Arc;
use tally_engine::{DiscardReason, HybridLogicalClock, MergeOutcome, Message, Mutation};
use tracing::{debug, warn};

/// What happened to a tracked batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackReport {
    /// Messages queued for delivery, in stamp order
    pub queued: Vec<Message>,
    /// Mutations of the local-only `prefs` dataset, not queued
    pub local_only: usize,
}

/// Stamps local changes and queues them for sync.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    db: Database,
    clock: Arc<HybridLogicalClock>,
}

impl ChangeTracker {
    pub fn new(db: Database, clock: Arc<HybridLogicalClock>) -> Self {
        Self { db, clock }
    }

    /// Stamp, queue for `scope` and apply a batch of mutations.
    ///
    /// All or nothing: on error no mutation was queued or applied, and the
    /// caller should retry.
    pub async fn track(
        &self,
        scope: &Scope,
        mutations: Vec<Mutation>,
    ) -> Result<TrackReport, TrackError> {
        let schema = self.db.schema();
        let (local, synced): (Vec<_>, Vec<_>) =
            mutations.into_iter().partition(Mutation::is_local_only);

        for mutation in &synced {
            schema
                .check(&mutation.dataset, &mutation.column, &mutation.value)
                .map_err(TrackError::Rejected)?;
        }

        let mut report = TrackReport {
            queued: Vec::with_capacity(synced.len()),
            local_only: local.len(),
        };
        if synced.is_empty() {
            return Ok(report);
        }

        let mut tx = self.db.pool().begin().await?;
        for mutation in synced {
            let timestamp = self.clock.now().map_err(TrackError::Clock)?;
            let message = mutation.stamp(timestamp);

            outbox::enqueue(&mut tx, scope, &message).await?;
            match cells::apply_message(&mut tx, schema, &message).await? {
                MergeOutcome::Applied { .. } => {}
                MergeOutcome::Discarded { reason: DiscardReason::Stale } => {
                    // Dropping the transaction rolls back the whole batch.
                    warn!(timestamp = %message.timestamp, "Local write lost to stored clock");
                    return Err(TrackError::Shadowed {
                        cell: message.cell(),
                        timestamp: message.timestamp,
                    });
                }
                MergeOutcome::Discarded { reason: DiscardReason::LocalOnly } => {}
            }
            report.queued.push(message);
        }
        tx.commit().await?;

        debug!(%scope, queued = report.queued.len(), "Tracked local changes");
        Ok(report)
    }
}
