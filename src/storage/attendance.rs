use crate::common::{AttendanceError, Result};
use crate::storage::embedding_store::IdentityKey;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Live,
    BatchUpload,
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::BatchUpload => write!(f, "batch-upload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: IdentityKey,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub confidence: f32,
    pub method: VerificationMethod,
    pub note: String,
}

impl AttendanceRecord {
    pub fn at(
        identity: IdentityKey,
        when: NaiveDateTime,
        confidence: f32,
        method: VerificationMethod,
        note: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            date: when.date(),
            time: when.time(),
            confidence,
            method,
            note: note.into(),
        }
    }

    pub fn now(identity: IdentityKey, confidence: f32, method: VerificationMethod, note: impl Into<String>) -> Self {
        Self::at(identity, Local::now().naive_local(), confidence, method, note)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record for the same identity and date already existed; nothing was written.
    Duplicate,
}

/// Where attendance records go. Implementations own the `(identity, date)`
/// uniqueness check so the live and batch paths cannot race each other.
pub trait AttendanceSink {
    fn has_record(&self, identity: &IdentityKey, date: NaiveDate) -> Result<bool>;

    /// Writes `record` unless one already exists for its identity and date.
    /// Check and write happen under one lock.
    fn insert_unique(&self, record: AttendanceRecord) -> Result<InsertOutcome>;

    fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>>;
}

/// Append-only JSON-lines ledger.
pub struct JsonlAttendanceLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAttendanceLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<AttendanceRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AttendanceRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    "Skipping unreadable attendance line {} in {}: {}",
                    line_no + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }
}

impl AttendanceSink for JsonlAttendanceLedger {
    fn has_record(&self, identity: &IdentityKey, date: NaiveDate) -> Result<bool> {
        let _guard = self.lock.lock();
        Ok(self
            .read_all()?
            .iter()
            .any(|r| &r.identity == identity && r.date == date))
    }

    fn insert_unique(&self, record: AttendanceRecord) -> Result<InsertOutcome> {
        let _guard = self.lock.lock();
        let exists = self
            .read_all()?
            .iter()
            .any(|r| r.identity == record.identity && r.date == record.date);
        if exists {
            tracing::debug!("Attendance for {} on {} already recorded", record.identity, record.date);
            return Ok(InsertOutcome::Duplicate);
        }

        let mut line = serde_json::to_string(&record)
            .map_err(|e| AttendanceError::Storage(format!("Failed to serialize record: {}", e)))?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&self.path)?;
        if !ends_with_newline(&mut file)? {
            tracing::warn!("Attendance ledger {} ends mid-line; starting a new line", self.path.display());
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        tracing::info!(
            "Attendance recorded for {} ({}, confidence {:.2})",
            record.identity,
            record.method,
            record.confidence
        );
        Ok(InsertOutcome::Inserted)
    }

    fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let _guard = self.lock.lock();
        let mut records: Vec<_> = self.read_all()?.into_iter().filter(|r| r.date == date).collect();
        records.sort_by_key(|r| r.time);
        Ok(records)
    }
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(file: &mut fs::File) -> Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// In-memory sink for tests and dry runs.
#[derive(Default)]
pub struct MemoryAttendanceSink {
    records: Mutex<Vec<AttendanceRecord>>,
}

impl MemoryAttendanceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().clone()
    }
}

impl AttendanceSink for MemoryAttendanceSink {
    fn has_record(&self, identity: &IdentityKey, date: NaiveDate) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .iter()
            .any(|r| &r.identity == identity && r.date == date))
    }

    fn insert_unique(&self, record: AttendanceRecord) -> Result<InsertOutcome> {
        let mut records = self.records.lock();
        if records
            .iter()
            .any(|r| r.identity == record.identity && r.date == record.date)
        {
            return Ok(InsertOutcome::Duplicate);
        }
        records.push(record);
        Ok(InsertOutcome::Inserted)
    }

    fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.date == date)
            .cloned()
            .collect())
    }
}
