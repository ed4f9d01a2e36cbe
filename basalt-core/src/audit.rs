//! Append-only audit trail of bootstrap runs (one JSON object per line)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::result::BootstrapResult;

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub recorded_at: DateTime<Utc>,
    /// Who ran the bootstrap (username@hostname)
    pub operator: String,
    pub result: BootstrapResult,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append `result` as a single JSON line
    pub fn append(&self, result: &BootstrapResult) -> std::io::Result<()> {
        let record = AuditRecord {
            recorded_at: Utc::now(),
            operator: crate::lock::lock_owner(),
            result: result.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{BootstrapStatus, Phase};
    use tempfile::tempdir;

    fn result(run_id: &str) -> BootstrapResult {
        let now = Utc::now();
        BootstrapResult {
            run_id: run_id.to_string(),
            store: "state-store-1".to_string(),
            status: BootstrapStatus::AlreadySatisfied,
            outputs: None,
            failure: None,
            phases: vec![Phase::Start, Phase::Probing, Phase::AlreadySatisfied],
            steps: Vec::new(),
            created: vec![],
            mutated: false,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_append_is_one_line_per_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("basalt-audit.log");
        let log = AuditLog::new(&path);

        log.append(&result("run-1")).unwrap();
        log.append(&result("run-2")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let records: Vec<AuditRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].result.run_id, "run-1");
        assert_eq!(records[1].result.run_id, "run-2");
        assert!(records[0].operator.contains('@'));
    }

    #[test]
    fn test_append_keeps_existing_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("basalt-audit.log");
        std::fs::write(&path, "{\"earlier\":true}\n").unwrap();

        AuditLog::new(&path).append(&result("run-3")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("{\"earlier\":true}"));
    }
}
