use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::time::Duration;

use crate::error::SyncError;
use crate::pipeline::checkpoint::{CheckpointStore, FailedRow, ReplaceCheckpoint, ReplacePhase};
use crate::pipeline::pacing::{Clock, TokenBucket};
use crate::pipeline::record::CanonicalVideoRecord;
use crate::pipeline::util::percent;
use crate::store::{DocumentStore, StoreError, classify};

/// Calls slower than this get a warning in the log.
pub const SLOW_CALL_THRESHOLD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
pub struct ReplaceSummary {
    pub total_rows: u64,
    pub initial_count: u64,
    pub deleted: u64,
    pub added: u64,
    pub errors: u64,
    pub failed_rows: Vec<FailedRow>,
    pub throttled_ms: u64,
}

impl ReplaceSummary {
    fn from_checkpoint(cp: &ReplaceCheckpoint, throttled: Duration) -> Self {
        Self {
            total_rows: cp.total_rows,
            initial_count: cp.initial_count,
            deleted: cp.deleted,
            added: cp.added,
            errors: cp.errors,
            failed_rows: cp.failed_rows.clone(),
            throttled_ms: throttled.as_millis() as u64,
        }
    }

    pub fn expected_added(&self) -> u64 {
        self.total_rows.saturating_sub(self.errors)
    }

    pub fn consistent(&self) -> bool {
        self.added == self.expected_added()
    }
}

/// Drives the delete-then-insert run against one collection, one batch at a time.
pub struct Replacer<'a, S: DocumentStore + ?Sized, C: Clock> {
    store: &'a mut S,
    limiter: TokenBucket<C>,
    checkpoints: CheckpointStore,
}

impl<'a, S: DocumentStore + ?Sized, C: Clock> Replacer<'a, S, C> {
    pub fn new(store: &'a mut S, limiter: TokenBucket<C>, checkpoints: CheckpointStore) -> Self {
        Self {
            store,
            limiter,
            checkpoints,
        }
    }

    /// Continue `cp` from whatever phase it is in until it completes.
    ///
    /// A failed delete batch aborts with the checkpoint saved; rejected rows
    /// and failed commits are recorded and the run carries on.
    pub fn run(
        &mut self,
        records: &[CanonicalVideoRecord],
        cp: &mut ReplaceCheckpoint,
    ) -> Result<ReplaceSummary> {
        if cp.total_rows != records.len() as u64 {
            bail!(
                "checkpoint expects {} rows but the manifest has {}",
                cp.total_rows,
                records.len()
            );
        }
        if cp.delete_batch_size == 0 || cp.insert_batch_size == 0 {
            bail!("checkpoint has a zero batch size");
        }

        if cp.phase == ReplacePhase::Pending {
            self.snapshot(cp)?;
        }
        if cp.phase == ReplacePhase::Deleting {
            self.delete_phase(cp)?;
            cp.phase = ReplacePhase::Inserting;
            self.checkpoints.save(cp)?;
        }
        if cp.phase == ReplacePhase::Inserting {
            self.insert_phase(records, cp)?;
            cp.phase = ReplacePhase::Completed;
            self.checkpoints.save(cp)?;
        }

        let summary = ReplaceSummary::from_checkpoint(cp, self.limiter.total_wait());
        if !summary.consistent() {
            tracing::warn!(
                added = summary.added,
                expected = summary.expected_added(),
                "added count does not match rows minus errors"
            );
        }
        tracing::info!(
            initial_count = summary.initial_count,
            deleted = summary.deleted,
            added = summary.added,
            errors = summary.errors,
            throttled_ms = summary.throttled_ms,
            "replace finished"
        );
        Ok(summary)
    }

    fn snapshot(&mut self, cp: &mut ReplaceCheckpoint) -> Result<()> {
        let ids = self
            .store
            .list_ids()
            .map_err(classify)
            .context("failed to list existing documents")?;
        cp.initial_count = ids.len() as u64;
        cp.pending_delete = ids;
        cp.phase = ReplacePhase::Deleting;
        self.checkpoints.save(cp)?;
        tracing::info!(
            initial_count = cp.initial_count,
            target = %self.store.describe(),
            "snapshot taken"
        );
        Ok(())
    }

    fn delete_phase(&mut self, cp: &mut ReplaceCheckpoint) -> Result<()> {
        let size = cp.delete_batch_size;
        let batches = cp.initial_count.div_ceil(size as u64);
        while !cp.pending_delete.is_empty() {
            let batch = (cp.deleted / size as u64) as usize + 1;
            let take = size.min(cp.pending_delete.len());
            let ids: Vec<String> = cp.pending_delete[..take].to_vec();

            self.limiter.acquire(ids.len() as u64);
            let result = timed(self.limiter.clock(), "delete", batch, || {
                self.store.delete_batch(&ids)
            });
            if let Err(source) = result {
                self.checkpoints.save(cp)?;
                if matches!(source, StoreError::Unauthorized(_)) {
                    return Err(classify(source));
                }
                let cause = source.to_string();
                let err = SyncError::BatchDelete {
                    batch,
                    deleted: cp.deleted,
                    source,
                };
                tracing::error!(batch, deleted = cp.deleted, error = %err, cause = %cause, "delete phase aborted");
                return Err(err.into());
            }

            cp.pending_delete.drain(..take);
            cp.deleted += take as u64;
            self.checkpoints.save(cp)?;
            tracing::info!(
                batch,
                batches,
                batch_size = take,
                deleted = cp.deleted,
                remaining = cp.pending_delete.len(),
                progress = %format!("{:.1}%", percent(cp.deleted, cp.initial_count)),
                "delete batch done"
            );
        }
        Ok(())
    }

    fn insert_phase(
        &mut self,
        records: &[CanonicalVideoRecord],
        cp: &mut ReplaceCheckpoint,
    ) -> Result<()> {
        let size = cp.insert_batch_size;
        let batches = records.len().div_ceil(size);
        if cp.next_insert_batch > 0 {
            tracing::info!(
                skipped = cp.next_insert_batch,
                batches,
                "resuming insert phase"
            );
        }

        for (index, chunk) in records
            .chunks(size)
            .enumerate()
            .skip(cp.next_insert_batch)
        {
            let batch = index + 1;
            let mut docs = Vec::with_capacity(chunk.len());
            for (offset, record) in chunk.iter().enumerate() {
                match record.build_document() {
                    Ok(doc) => docs.push(doc),
                    Err(reason) => {
                        let err = SyncError::RowUpsert {
                            row: index * size + offset + 1,
                            doc_id: record.document_id(),
                            reason: reason.clone(),
                        };
                        tracing::warn!(batch, error = %err, "row skipped");
                        cp.errors += 1;
                        cp.failed_rows.push(FailedRow {
                            doc_id: record.document_id(),
                            batch,
                            reason,
                        });
                    }
                }
            }

            if !docs.is_empty() {
                self.limiter.acquire(docs.len() as u64);
                let result = timed(self.limiter.clock(), "insert", batch, || {
                    self.store.upsert_batch(&docs)
                });
                match result {
                    Ok(()) => cp.added += docs.len() as u64,
                    Err(StoreError::Unauthorized(msg)) => {
                        self.checkpoints.save(cp)?;
                        return Err(classify(StoreError::Unauthorized(msg)));
                    }
                    Err(source) => {
                        let reason = source.to_string();
                        let err = SyncError::BatchCommit {
                            batch,
                            rows: docs.len(),
                            source,
                        };
                        tracing::error!(batch, error = %err, cause = %reason, "insert batch failed, continuing");
                        cp.errors += docs.len() as u64;
                        cp.failed_rows
                            .extend(docs.iter().map(|(doc_id, _)| FailedRow {
                                doc_id: doc_id.clone(),
                                batch,
                                reason: reason.clone(),
                            }));
                    }
                }
            }

            cp.next_insert_batch = batch;
            self.checkpoints.save(cp)?;
            tracing::info!(
                batch,
                batches,
                batch_size = chunk.len(),
                added = cp.added,
                errors = cp.errors,
                progress = %format!("{:.1}%", percent(cp.added + cp.errors, cp.total_rows)),
                "insert batch done"
            );
        }
        Ok(())
    }
}

fn timed<C: Clock, T>(
    clock: &C,
    operation: &'static str,
    batch: usize,
    call: impl FnOnce() -> T,
) -> T {
    let started = clock.elapsed();
    let out = call();
    let took = clock.elapsed().saturating_sub(started);
    if took > SLOW_CALL_THRESHOLD {
        tracing::warn!(
            operation,
            batch,
            took_ms = took.as_millis() as u64,
            "slow write"
        );
    }
    out
}
