use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::jobs::Job;

/// Accounting record types written by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Checkpoint,
}

impl AccountKind {
    /// Single-letter record tag used in the accounting file.
    pub fn tag(self) -> char {
        match self {
            AccountKind::Checkpoint => 'C',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub kind: AccountKind,
    pub job_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Sink for accounting records. Recording must not block the caller.
pub trait Accounting: Send + Sync {
    fn record(&self, kind: AccountKind, job: &Job, message: &str);
}

/// Writes records to the `accounting` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAccounting;

impl Accounting for TracingAccounting {
    fn record(&self, kind: AccountKind, job: &Job, message: &str) {
        tracing::info!(
            target: "accounting",
            record = %kind.tag(),
            job_id = %job.id,
            owner = %job.owner,
            "{}",
            message
        );
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAccounting {
    records: Mutex<Vec<AccountRecord>>,
}

impl MemoryAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AccountRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn records_for(&self, job_id: &str) -> Vec<AccountRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.job_id == job_id)
            .collect()
    }
}

impl Accounting for MemoryAccounting {
    fn record(&self, kind: AccountKind, job: &Job, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(AccountRecord {
                kind,
                job_id: job.id.clone(),
                message: message.to_string(),
                at: Utc::now(),
            });
        }
    }
}
