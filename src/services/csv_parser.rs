//! DRE CSV output parsing
//!
//! Reads `node_metrics_by_node.csv` files into [`NodeMetricRecord`]s. Bad
//! numeric values fall back to defaults; malformed rows are logged and skipped.

use chrono::NaiveDate;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, warn};

use crate::models::node_metrics::{failure_rate, NodeMetricRecord};

/// File name the DRE tool writes per node provider
pub const NODE_METRICS_FILE: &str = "node_metrics_by_node.csv";

/// Date format used by the DRE tool (`DD-MM-YYYY`)
pub const DRE_DATE_FORMAT: &str = "%d-%m-%Y";

/// Why a single CSV row was rejected
#[derive(Debug, Error)]
pub enum RowError {
    #[error("malformed row: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid {column} value {value:?}: expected a non-negative integer")]
    InvalidCount { column: &'static str, value: String },
}

/// Raw row as it appears in the file. Every column except the key columns is
/// optional so files from older and newer tool versions both deserialize.
#[derive(Debug, Deserialize)]
struct NodeMetricsRow {
    node_id: String,
    day_utc: String,
    #[serde(default)]
    node_status: Option<String>,
    #[serde(default)]
    node_reward_type: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    dc_id: Option<String>,
    #[serde(default)]
    performance_multiplier: Option<String>,
    #[serde(default)]
    rewards_reduction: Option<String>,
    #[serde(default)]
    base_rewards_xdr_permyriad: Option<String>,
    #[serde(default)]
    adjusted_rewards_xdr_permyriad: Option<String>,
    #[serde(default)]
    subnet_assigned: Option<String>,
    #[serde(default)]
    num_blocks_proposed: Option<String>,
    #[serde(default)]
    num_blocks_failed: Option<String>,
    #[serde(default)]
    subnet_assigned_fr: Option<String>,
    #[serde(default)]
    original_fr: Option<String>,
    #[serde(default)]
    relative_fr: Option<String>,
    #[serde(default)]
    extrapolated_fr: Option<String>,
}

impl TryFrom<NodeMetricsRow> for NodeMetricRecord {
    type Error = RowError;

    fn try_from(row: NodeMetricsRow) -> Result<Self, Self::Error> {
        let num_blocks_proposed = parse_count("num_blocks_proposed", row.num_blocks_proposed)?;
        let num_blocks_failed = parse_count("num_blocks_failed", row.num_blocks_failed)?;

        Ok(NodeMetricRecord {
            day_utc: parse_date(&row.day_utc),
            node_id: row.node_id,
            node_status: row.node_status.unwrap_or_default(),
            node_reward_type: row.node_reward_type.unwrap_or_default(),
            region: row.region.unwrap_or_default(),
            dc_id: row.dc_id.unwrap_or_default(),
            // An absent column means "no adjustment"; a present but unusable one is zeroed
            performance_multiplier: match row.performance_multiplier {
                None => 1.0,
                Some(v) => safe_float(&v),
            },
            rewards_reduction: row.rewards_reduction.as_deref().map_or(0.0, safe_float),
            base_rewards_xdr_permyriad: row.base_rewards_xdr_permyriad.as_deref().map_or(0, safe_int),
            adjusted_rewards_xdr_permyriad: row
                .adjusted_rewards_xdr_permyriad
                .as_deref()
                .map_or(0, safe_int),
            subnet_assigned: row.subnet_assigned.filter(|s| !s.is_empty()),
            num_blocks_proposed,
            num_blocks_failed,
            daily_failure_rate: failure_rate(
                i64::from(num_blocks_proposed),
                i64::from(num_blocks_failed),
            ),
            subnet_assigned_fr: row.subnet_assigned_fr.as_deref().and_then(optional_float),
            original_fr: row.original_fr.as_deref().and_then(optional_float),
            relative_fr: row.relative_fr.as_deref().and_then(optional_float),
            extrapolated_fr: row.extrapolated_fr.as_deref().and_then(optional_float),
        })
    }
}

/// Parse `DD-MM-YYYY` into a calendar date
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(value, DRE_DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(_) => {
            warn!("Failed to parse date: {}", value);
            None
        }
    }
}

/// Integer or 0
pub fn safe_int(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

/// Finite float or 0
pub fn safe_float(value: &str) -> f64 {
    optional_float(value).unwrap_or(0.0)
}

fn optional_float(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Block counts feed the derived failure rate, so a garbage value rejects the
/// row instead of silently reading as zero. Empty means zero.
fn parse_count(column: &'static str, value: Option<String>) -> Result<i32, RowError> {
    let Some(value) = value else { return Ok(0) };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    match trimmed.parse::<i32>() {
        Ok(n) if n >= 0 => Ok(n),
        _ => Err(RowError::InvalidCount { column, value }),
    }
}

/// Stateless CSV parser. Each call to [`CsvParser::parse_node_metrics`]
/// reopens the file and starts over.
#[derive(Debug, Clone, Default)]
pub struct CsvParser;

impl CsvParser {
    pub fn new() -> Self {
        Self
    }

    /// Lazily parse a `node_metrics_by_node.csv` file
    pub fn parse_node_metrics(&self, csv_path: impl AsRef<Path>) -> NodeMetricsReader {
        let path = csv_path.as_ref().to_path_buf();

        if !path.exists() {
            warn!("File not found: {}", path.display());
            return NodeMetricsReader::empty(path);
        }

        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path);

        match reader {
            Ok(reader) => NodeMetricsReader {
                rows: Some(reader.into_deserialize()),
                path,
                line: 1,
            },
            Err(e) => {
                error!("Error reading CSV file {}: {}", path.display(), e);
                NodeMetricsReader::empty(path)
            }
        }
    }

    /// List node provider ids (one subdirectory each) under a DRE output directory
    pub fn discover_providers(&self, output_path: &Path) -> std::io::Result<Vec<String>> {
        let mut providers = Vec::new();

        for entry in std::fs::read_dir(output_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => providers.push(name),
                Ok(_) => {}
                Err(name) => warn!("Skipping non UTF-8 provider directory {:?}", name),
            }
        }

        providers.sort();
        Ok(providers)
    }
}

/// Iterator over the records of one metrics file
pub struct NodeMetricsReader {
    rows: Option<csv::DeserializeRecordsIntoIter<File, NodeMetricsRow>>,
    path: PathBuf,
    line: usize,
}

impl NodeMetricsReader {
    fn empty(path: PathBuf) -> Self {
        Self { rows: None, path, line: 1 }
    }
}

impl Iterator for NodeMetricsReader {
    type Item = NodeMetricRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let result = self.rows.as_mut()?.next()?;
            self.line += 1;

            match result {
                Err(e) if e.is_io_error() => {
                    error!("Error reading CSV file {}: {}", self.path.display(), e);
                    self.rows = None;
                    return None;
                }
                Err(e) => {
                    error!(
                        "Error parsing row {} in {}: {}",
                        self.line,
                        self.path.display(),
                        RowError::from(e)
                    );
                }
                Ok(row) => match NodeMetricRecord::try_from(row) {
                    Ok(record) => return Some(record),
                    Err(e) => {
                        error!("Error parsing row {} in {}: {}", self.line, self.path.display(), e);
                    }
                },
            }
        }
    }
}
