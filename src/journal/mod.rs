// Results CSV and the per-run audit log
use crate::models::TradeBatch;
use crate::Result;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Writes the batch outcome to `trade_results_<stamp>.csv`.
///
/// The whole file is rewritten after every trade (temp file + rename), so a crash
/// mid-run leaves the last complete snapshot on disk.
#[derive(Debug)]
pub struct ResultJournal {
    run_id: Uuid,
    results_path: PathBuf,
    log: TradeLog,
}

impl ResultJournal {
    /// Create the results directory and open this run's audit log.
    ///
    /// # Arguments
    /// * `results_dir` - Directory for results CSVs and audit logs
    /// * `started_at` - Run start time; names both output files
    pub fn create(results_dir: &Path, started_at: DateTime<Local>) -> Result<Self> {
        std::fs::create_dir_all(results_dir)?;

        let stamp = started_at.format("%Y%m%d_%H%M%S");
        let results_path = results_dir.join(format!("trade_results_{}.csv", stamp));
        let log = TradeLog::open(&results_dir.join(format!("trade_log_{}.log", stamp)))?;

        let run_id = Uuid::new_v4();
        log.record(&format!(
            "Run {} started, results in {}",
            run_id,
            results_path.display()
        ));

        Ok(Self {
            run_id,
            results_path,
            log,
        })
    }

    /// Correlates console output with this run's audit log
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn log(&self) -> &TradeLog {
        &self.log
    }

    /// Snapshot every record, original columns first, then `transaction_id` and `status`
    pub fn persist(&self, batch: &TradeBatch) -> Result<()> {
        let headers = batch.output_headers();
        let tmp_path = self.results_path.with_extension("csv.tmp");

        {
            let mut writer = csv::Writer::from_path(&tmp_path)?;
            writer.write_record(&headers)?;
            for record in &batch.records {
                writer.write_record(
                    headers
                        .iter()
                        .map(|column| record.field(column).unwrap_or("")),
                )?;
            }
            writer.flush()?;
        }

        std::fs::rename(&tmp_path, &self.results_path)?;
        tracing::debug!(
            "Persisted {} records to {}",
            batch.len(),
            self.results_path.display()
        );
        Ok(())
    }
}

/// Append-only audit trail, one `[YYYY-mm-dd HH:MM:SS.mmm] message` line per event
#[derive(Debug)]
pub struct TradeLog {
    path: PathBuf,
    file: File,
    failures: AtomicUsize,
}

impl TradeLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            failures: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line. A failed write is reported on the console and counted, but never stops a trade.
    pub fn record(&self, message: &str) {
        let line = format!(
            "[{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            message
        );
        if let Err(e) = (&self.file).write_all(line.as_bytes()) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!("❌ Failed to write audit log {}: {}", self.path.display(), e);
        }
    }

    /// Lines lost since the log was opened
    pub fn failed_writes(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}
