//! Run results and the CSV report

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;

/// Outcome of one task in one iteration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationResult {
    pub iteration: u32,
    pub task: String,
    pub started_at: DateTime<Utc>,
    /// Every fragment stored and the manifest published
    pub success: bool,
    /// Download matched the uploaded payload byte for byte
    pub verified: bool,
    pub fragment_count: usize,
    pub shards_used: usize,
    pub payload_bytes: u64,
    pub upload_ms: u64,
    pub download_ms: u64,
    pub tx_count: usize,
    pub gas_used: u64,
    /// Download URL of the published manifest
    pub url: Option<String>,
    pub error: Option<String>,
}

impl IterationResult {
    /// A result with nothing recorded yet
    pub fn new(iteration: u32, task: &str) -> Self {
        IterationResult {
            iteration,
            task: task.to_string(),
            started_at: Utc::now(),
            success: false,
            verified: false,
            fragment_count: 0,
            shards_used: 0,
            payload_bytes: 0,
            upload_ms: 0,
            download_ms: 0,
            tx_count: 0,
            gas_used: 0,
            url: None,
            error: None,
        }
    }

    /// Upload throughput in bytes per second
    pub fn upload_throughput_bps(&self) -> Option<f64> {
        if !self.success || self.upload_ms == 0 {
            return None;
        }
        Some(self.payload_bytes as f64 * 1000.0 / self.upload_ms as f64)
    }
}

/// Aggregates over all iteration results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    /// Results that uploaded and verified
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    /// Mean over successful uploads
    pub avg_upload_ms: f64,
    /// Mean over verified downloads
    pub avg_download_ms: f64,
    pub avg_tx_count: f64,
    pub total_gas: u64,
    pub avg_upload_throughput_bps: f64,
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

impl RunSummary {
    /// Summarize a set of results
    pub fn from_results(results: &[IterationResult]) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success && r.verified).count();

        RunSummary {
            total,
            succeeded,
            failed: total - succeeded,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
            avg_upload_ms: mean(results.iter().filter(|r| r.success).map(|r| r.upload_ms as f64)),
            avg_download_ms: mean(results.iter().filter(|r| r.verified).map(|r| r.download_ms as f64)),
            avg_tx_count: mean(results.iter().map(|r| r.tx_count as f64)),
            total_gas: results.iter().map(|r| r.gas_used).sum(),
            avg_upload_throughput_bps: mean(results.iter().filter_map(|r| r.upload_throughput_bps())),
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_id: String,
    /// `allocator/transmitter/confirmation`
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub iterations: Vec<IterationResult>,
    pub summary: RunSummary,
}

impl RunResult {
    /// Assemble a result and compute its summary
    pub fn new(
        run_id: String,
        strategy: String,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
        iterations: Vec<IterationResult>,
    ) -> Self {
        let summary = RunSummary::from_results(&iterations);
        RunResult {
            run_id,
            strategy,
            started_at,
            elapsed_ms,
            iterations,
            summary,
        }
    }

    /// Write one CSV row per iteration result
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        for result in &self.iterations {
            csv.serialize(result)
                .map_err(|e| Error::Report(format!("Failed to write CSV row: {}", e)))?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Write the CSV report to a file
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)
            .map_err(|e| Error::Report(format!("Failed to create {:?}: {}", path, e)))?;
        self.write_csv(file)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "Run {} ({})", self.run_id, self.strategy)?;
        writeln!(f, "==========================================")?;
        for r in &self.iterations {
            let status = match (&r.error, r.verified) {
                (None, true) => "ok".to_string(),
                (Some(e), _) => format!("FAILED: {}", e),
                (None, false) => "FAILED".to_string(),
            };
            writeln!(
                f,
                "  #{} {:<20} {:>4} fragments on {} shards  upload {:>6} ms  download {:>6} ms  {}",
                r.iteration, r.task, r.fragment_count, r.shards_used, r.upload_ms, r.download_ms, status
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "Succeeded: {}/{} ({:.1}%)",
            s.succeeded,
            s.total,
            s.success_rate * 100.0
        )?;
        writeln!(f, "Avg upload: {:.1} ms", s.avg_upload_ms)?;
        writeln!(f, "Avg download: {:.1} ms", s.avg_download_ms)?;
        writeln!(f, "Avg transactions: {:.1}", s.avg_tx_count)?;
        writeln!(f, "Total gas: {}", s.total_gas)?;
        write!(
            f,
            "Avg upload throughput: {:.1} KiB/s",
            s.avg_upload_throughput_bps / 1024.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn result(iteration: u32, verified: bool, upload_ms: u64, bytes: u64) -> IterationResult {
        IterationResult {
            success: verified,
            verified,
            upload_ms,
            download_ms: 10,
            payload_bytes: bytes,
            tx_count: 4,
            gas_used: 1000,
            error: (!verified).then(|| "boom".to_string()),
            ..IterationResult::new(iteration, "task")
        }
    }

    #[test]
    fn test_summary() {
        let results = vec![
            result(1, true, 100, 1000),
            result(2, true, 300, 3000),
            result(3, false, 0, 1000),
        ];
        let summary = RunSummary::from_results(&results);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.avg_upload_ms, 200.0);
        assert_eq!(summary.avg_download_ms, 10.0);
        assert_eq!(summary.avg_tx_count, 4.0);
        assert_eq!(summary.total_gas, 3000);
        assert_eq!(summary.avg_upload_throughput_bps, 10_000.0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = RunSummary::from_results(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.avg_upload_ms, 0.0);
    }

    #[test]
    fn test_csv_report() {
        let run = RunResult::new(
            "run".into(),
            "static/onebyone/polling".into(),
            Utc::now(),
            5,
            vec![result(1, true, 100, 1000), result(2, false, 0, 1000)],
        );

        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("run.csv");
        run.save_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("iteration,task,started_at,success,verified"));
        assert!(lines[2].ends_with("boom"));

        let rendered = run.to_string();
        assert!(rendered.contains("Succeeded: 1/2 (50.0%)"));
        assert!(rendered.contains("FAILED: boom"));
    }
}
