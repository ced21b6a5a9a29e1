use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Reads an explicit `null` as the type's default value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// One candidate scan-result file in a repository listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(default)]
    pub name: String,
    /// Path relative to the repository root; unique within a batch.
    pub path: String,
    #[serde(default)]
    pub size: u64,
    /// Contents-API locator returning a [`ContentEnvelope`].
    pub url: String,
}

impl FileRef {
    pub fn new(path: impl Into<String>, url: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            name,
            path,
            size: 0,
            url: url.into(),
        }
    }
}

/// JSON envelope returned by the contents API for a single file.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentEnvelope {
    pub content: String,
}

/// One scan report as found in a scan-result file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(rename = "scanResults", default, deserialize_with = "null_as_default")]
    pub scan_results: ScanResults,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResults {
    #[serde(default, deserialize_with = "null_as_default")]
    pub vulnerabilities: Vec<VulnerabilityRecord>,
}

/// A vulnerability exactly as reported by the scanner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnerabilityRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub severity: String,
    #[serde(deserialize_with = "null_as_default")]
    pub cvss: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub package_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub current_version: String,
    /// Usually `null` while no fix is released.
    #[serde(deserialize_with = "null_as_default")]
    pub fixed_version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    /// RFC 3339 timestamp; scanners are not always well-behaved here.
    #[serde(deserialize_with = "null_as_default")]
    pub published_date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub link: String,
    pub risk_factors: serde_json::Value,
}

/// A normalized record ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct VulnerabilityRow {
    pub id: String,
    pub source_file: String,
    pub scan_time: DateTime<Utc>,
    pub severity: String,
    pub cvss: f64,
    pub status: String,
    pub package_name: String,
    pub current_version: String,
    pub fixed_version: String,
    pub description: String,
    pub published_date: DateTime<Utc>,
    pub link: String,
    pub risk_factors: String,
}

/// A row read back from the `vulnerabilities` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredVulnerability {
    pub id: String,
    pub source_file: String,
    pub scan_time: DateTime<Utc>,
    pub severity: String,
    pub cvss: f64,
    pub status: String,
    pub package_name: String,
    pub current_version: String,
    pub fixed_version: String,
    pub description: String,
    pub published_date: DateTime<Utc>,
    pub link: String,
    pub risk_factors: String,
}

impl From<VulnerabilityRow> for StoredVulnerability {
    fn from(row: VulnerabilityRow) -> Self {
        Self {
            id: row.id,
            source_file: row.source_file,
            scan_time: row.scan_time,
            severity: row.severity,
            cvss: row.cvss,
            status: row.status,
            package_name: row.package_name,
            current_version: row.current_version,
            fixed_version: row.fixed_version,
            description: row.description,
            published_date: row.published_date,
            link: row.link,
            risk_factors: row.risk_factors,
        }
    }
}
