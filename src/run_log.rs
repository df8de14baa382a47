//! CSV run log sink.
//!
//! One file per run id. Rows are flushed as they arrive so two concurrent
//! runs with distinct ids never interleave within a file, and a crashed run
//! still leaves everything it logged behind.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::SecondsFormat;
use flow_exec::{RunReporter, StepRecord};
use flowpilot_core_types::RunId;
use tracing::warn;

const HEADER: [&str; 9] = [
    "run_id",
    "user_id",
    "timestamp",
    "step_no",
    "url",
    "action",
    "target",
    "result",
    "error",
];

pub struct CsvRunReporter {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvRunReporter {
    /// Open (or create) the log file for a run id. The header is written
    /// only when the file is new, so repeated scheduler ticks append.
    pub fn create(logs_dir: &Path, run_id: &RunId) -> std::io::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("run_{run_id}.csv"));
        let existed = path.exists();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if !existed {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunReporter for CsvRunReporter {
    fn record(&self, record: StepRecord) {
        let timestamp = record
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        // Absent errors serialize as the empty string, never a placeholder.
        let error = record.error.as_deref().unwrap_or("");

        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        let row = [
            record.run_id.as_str(),
            record.user_id.as_str(),
            timestamp.as_str(),
            record.step_no.as_str(),
            record.url.as_str(),
            record.action.as_str(),
            record.target.as_str(),
            record.result.as_str(),
            error,
        ];
        let written = writer
            .write_record(row)
            .and_then(|()| writer.flush().map_err(csv::Error::from));
        if let Err(err) = written {
            warn!(target: "run-log", path = %self.path.display(), %err, "failed to write log row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowpilot_core_types::UserId;

    fn record(run_id: &RunId, result: &str, error: Option<String>) -> StepRecord {
        StepRecord {
            run_id: run_id.clone(),
            user_id: UserId::new("tester"),
            timestamp: Utc::now(),
            step_no: "1".to_string(),
            url: "https://example.com".to_string(),
            action: flow_exec::StepAction::Click,
            target: "#go, really".to_string(),
            result: result.to_string(),
            error,
        }
    }

    #[test]
    fn rows_have_nine_fields_and_empty_error() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = RunId::new();
        let reporter = CsvRunReporter::create(dir.path(), &run_id).unwrap();
        reporter.record(record(&run_id, "success", None));
        reporter.record(record(&run_id, "failure", Some("boom".to_string())));

        let raw = std::fs::read_to_string(reporter.path()).unwrap();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(raw.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.len(), 9, "every row has exactly 9 fields");
        }
        assert_eq!(&rows[0][0], "run_id");
        assert_eq!(&rows[1][8], "");
        assert_ne!(&rows[1][8], "undefined");
        assert_eq!(&rows[2][8], "boom");
        // Commas inside fields stay inside their column.
        assert_eq!(&rows[1][6], "#go, really");
    }

    #[test]
    fn timestamps_are_iso8601_with_millis() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = RunId::new();
        let reporter = CsvRunReporter::create(dir.path(), &run_id).unwrap();
        reporter.record(record(&run_id, "success", None));

        let raw = std::fs::read_to_string(reporter.path()).unwrap();
        let data_line = raw.lines().nth(1).unwrap();
        let timestamp = data_line.split(',').nth(2).unwrap();
        assert!(
            chrono::DateTime::parse_from_rfc3339(timestamp).is_ok(),
            "timestamp not RFC 3339: {timestamp}"
        );
        assert!(timestamp.contains('.'), "millisecond precision expected");
    }

    #[test]
    fn distinct_run_ids_use_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunId::new();
        let second = RunId::new();
        let reporter_a = CsvRunReporter::create(dir.path(), &first).unwrap();
        let reporter_b = CsvRunReporter::create(dir.path(), &second).unwrap();
        reporter_a.record(record(&first, "success", None));
        reporter_b.record(record(&second, "failure", Some("x".into())));

        assert_ne!(reporter_a.path(), reporter_b.path());
        let raw_a = std::fs::read_to_string(reporter_a.path()).unwrap();
        let raw_b = std::fs::read_to_string(reporter_b.path()).unwrap();
        assert!(raw_a.contains(first.as_str()));
        assert!(!raw_a.contains(second.as_str()));
        assert!(raw_b.contains(second.as_str()));
    }

    #[test]
    fn reopening_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = RunId::new();
        {
            let reporter = CsvRunReporter::create(dir.path(), &run_id).unwrap();
            reporter.record(record(&run_id, "success", None));
        }
        {
            let reporter = CsvRunReporter::create(dir.path(), &run_id).unwrap();
            reporter.record(record(&run_id, "success", None));
        }

        let raw = std::fs::read_to_string(dir.path().join(format!("run_{run_id}.csv"))).unwrap();
        let header_count = raw.lines().filter(|line| line.starts_with("run_id,")).count();
        assert_eq!(header_count, 1);
        assert_eq!(raw.lines().count(), 3);
    }
}
