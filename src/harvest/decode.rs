//! Report decode stage.

use tracing::warn;

use crate::model::{ScanReport, VulnerabilityRecord};
use crate::traits::ParseError;

/// Parses a scan-result payload into its list of reports. A bare `null`
/// payload is an empty list.
pub fn decode_reports(raw: &[u8]) -> Result<Vec<ScanReport>, ParseError> {
    let reports: Option<Vec<ScanReport>> = serde_json::from_slice(raw)?;
    Ok(reports.unwrap_or_default())
}

/// Returns the vulnerabilities of the first report, or `None` when the
/// payload holds no reports at all.
///
/// Scan-result files carry one report by convention; any trailing reports
/// are dropped with a warning.
pub fn first_report_vulnerabilities(
    path: &str,
    reports: Vec<ScanReport>,
) -> Option<Vec<VulnerabilityRecord>> {
    let total = reports.len();
    let first = reports.into_iter().next()?;

    if total > 1 {
        warn!(path, ignored = total - 1, "Ignoring trailing scan reports");
    }

    Some(first.scan_results.vulnerabilities)
}
