use anyhow::{Context, Result};
use serde::Serialize;

use crate::pipeline::record::CanonicalVideoRecord;
use crate::store::{DocumentStore, classify};

pub const DEFAULT_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct SampleCheck {
    pub index: usize,
    pub doc_id: String,
    pub exists: bool,
    pub video_id_matches: bool,
    pub thumbnail_url_matches: bool,
}

impl SampleCheck {
    pub fn passed(&self) -> bool {
        self.exists && self.video_id_matches && self.thumbnail_url_matches
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub csv_count: u64,
    pub doc_count: u64,
    pub samples: Vec<SampleCheck>,
}

impl VerifyOutcome {
    pub fn counts_match(&self) -> bool {
        self.csv_count == self.doc_count
    }

    /// Rows missing remotely; negative when the collection holds extras.
    pub fn deficit(&self) -> i64 {
        self.csv_count as i64 - self.doc_count as i64
    }

    pub fn all_samples_pass(&self) -> bool {
        self.samples.iter().all(SampleCheck::passed)
    }

    pub fn passed(&self) -> bool {
        self.counts_match() && self.all_samples_pass()
    }
}

/// `floor(i * total / n)` for `i in 0..n`, `n = min(sample_size, total)`.
pub fn sample_indices(total: usize, sample_size: usize) -> Vec<usize> {
    let n = sample_size.min(total);
    (0..n).map(|i| i * total / n).collect()
}

pub fn verify<S: DocumentStore + ?Sized>(
    store: &S,
    records: &[CanonicalVideoRecord],
    sample_size: usize,
) -> Result<VerifyOutcome> {
    let doc_count = store
        .list_ids()
        .map_err(classify)
        .context("failed to count remote documents")?
        .len() as u64;
    let csv_count = records.len() as u64;

    let mut samples = Vec::new();
    for index in sample_indices(records.len(), sample_size) {
        let record = &records[index];
        let doc_id = record.document_id();
        let fetched = store
            .get(&doc_id)
            .map_err(classify)
            .with_context(|| format!("failed to fetch {doc_id}"))?;
        let check = match fetched {
            Some(doc) => SampleCheck {
                index,
                doc_id,
                exists: true,
                video_id_matches: doc.video_id == record.video_id,
                thumbnail_url_matches: doc.thumbnail_url == record.thumbnail_url,
            },
            None => SampleCheck {
                index,
                doc_id,
                exists: false,
                video_id_matches: false,
                thumbnail_url_matches: false,
            },
        };
        if !check.passed() {
            tracing::warn!(
                index,
                doc_id = %check.doc_id,
                exists = check.exists,
                "sample mismatch"
            );
        }
        samples.push(check);
    }

    let outcome = VerifyOutcome {
        csv_count,
        doc_count,
        samples,
    };
    if outcome.counts_match() {
        tracing::info!(csv_count, doc_count, "document count matches manifest");
    } else {
        tracing::warn!(
            csv_count,
            doc_count,
            deficit = outcome.deficit(),
            "document count does not match manifest"
        );
    }
    Ok(outcome)
}
