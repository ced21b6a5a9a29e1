//! Vulnerability write stage.
//!
//! One file maps to one transaction. Individual records are best-effort:
//! a bad timestamp, unserializable risk factors or a rejected insert are
//! logged and recovered locally, and only transaction-level failures
//! (begin, prepare, commit) fail the file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{FileRef, VulnerabilityRecord, VulnerabilityRow};
use crate::traits::{VulnerabilityStore, WriteError};

/// Stored in place of risk factors that cannot be serialized.
pub const EMPTY_RISK_FACTORS: &str = "[]";

/// Per-file write statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// Persists the records of one file inside a single transaction.
#[derive(Debug, Clone)]
pub struct VulnerabilityWriter<S> {
    store: S,
}

impl<S: VulnerabilityStore> VulnerabilityWriter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes `records` for `file`, committing even when some inserts fail.
    ///
    /// # Errors
    ///
    /// [`WriteError`] when the transaction cannot be opened, the insert
    /// statement cannot be prepared, or the commit fails. The transaction is
    /// rolled back in every error case.
    pub async fn write(
        &self,
        file: &FileRef,
        records: &[VulnerabilityRecord],
    ) -> Result<WriteSummary, WriteError> {
        let mut tx = self.store.begin().await.map_err(WriteError::Begin)?;

        if let Err(e) = tx.prepare_insert().await {
            if let Err(rollback) = tx.rollback().await {
                warn!(path = %file.path, error = %rollback, "Rollback after failed prepare failed");
            }
            return Err(WriteError::Prepare(e));
        }

        let scan_time = Utc::now();
        let mut summary = WriteSummary::default();

        for record in records {
            let row = normalize(file, record, scan_time);
            match tx.insert(&row).await {
                Ok(()) => summary.inserted += 1,
                Err(e) => {
                    warn!(path = %file.path, id = %record.id, error = %e, "Error inserting vulnerability");
                    summary.skipped += 1;
                }
            }
        }

        tx.commit().await.map_err(WriteError::Commit)?;

        debug!(
            path = %file.path,
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Committed vulnerability transaction"
        );
        Ok(summary)
    }
}

/// Builds the row for `record`, substituting for an invalid published date
/// or unserializable risk factors.
pub(crate) fn normalize(
    file: &FileRef,
    record: &VulnerabilityRecord,
    scan_time: DateTime<Utc>,
) -> VulnerabilityRow {
    let published_date = match DateTime::parse_from_rfc3339(&record.published_date) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            warn!(
                path = %file.path,
                id = %record.id,
                value = %record.published_date,
                error = %e,
                "Invalid published date, using current time"
            );
            Utc::now()
        }
    };

    VulnerabilityRow {
        id: record.id.clone(),
        source_file: file.path.clone(),
        scan_time,
        severity: record.severity.clone(),
        cvss: record.cvss,
        status: record.status.clone(),
        package_name: record.package_name.clone(),
        current_version: record.current_version.clone(),
        fixed_version: record.fixed_version.clone(),
        description: record.description.clone(),
        published_date,
        link: record.link.clone(),
        risk_factors: serialize_risk_factors(&file.path, &record.id, &record.risk_factors),
    }
}

/// Serializes risk factors to JSON text, storing [`EMPTY_RISK_FACTORS`] on
/// failure. Decoded records hold a `serde_json::Value`, which always
/// serializes, so the fallback only triggers for other `Serialize` inputs.
pub(crate) fn serialize_risk_factors<T: Serialize + ?Sized>(path: &str, id: &str, value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        warn!(path, id, error = %e, "Failed to serialize risk factors");
        EMPTY_RISK_FACTORS.to_string()
    })
}
