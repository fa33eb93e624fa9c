use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::client::{Client, ClientId};

pub const CLIENT_AUDIT_HEADER: [&str; 2] = ["Nom", "Email"];

/// Record appended whenever a client is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCreated {
    pub client_id: ClientId,
    pub name: String,
    pub email: String,
}

impl From<&Client> for ClientCreated {
    fn from(client: &Client) -> Self {
        Self { client_id: client.id, name: client.name.clone(), email: client.email.clone() }
    }
}

/// Best-effort side channel. Implementations log their own failures and never
/// propagate them to the caller.
pub trait ClientAuditSink: Send + Sync {
    fn client_created(&self, record: &ClientCreated);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl ClientAuditSink for NoopAuditSink {
    fn client_created(&self, _record: &ClientCreated) {}
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<ClientCreated>>>,
}

impl InMemoryAuditSink {
    pub fn records(&self) -> Vec<ClientCreated> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ClientAuditSink for InMemoryAuditSink {
    fn client_created(&self, record: &ClientCreated) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}

/// Appends `Nom,Email` rows to a CSV file, writing the header when the file is new.
#[derive(Debug)]
pub struct CsvFileAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvFileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &ClientCreated) -> Result<(), csv::Error> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let is_new = fs::metadata(&self.path).map(|meta| meta.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        if is_new {
            writer.write_record(CLIENT_AUDIT_HEADER)?;
        }
        writer.write_record([record.name.as_str(), record.email.as_str()])?;
        writer.flush()?;
        Ok(())
    }
}

impl ClientAuditSink for CsvFileAuditSink {
    fn client_created(&self, record: &ClientCreated) {
        if record.name.trim().is_empty() || record.email.trim().is_empty() {
            warn!(
                event_name = "audit.client_created.skipped",
                client_id = record.client_id.0,
                "client audit record skipped: name or email is empty"
            );
            return;
        }

        if let Err(err) = self.append(record) {
            error!(
                event_name = "audit.client_created.failed",
                client_id = record.client_id.0,
                path = %self.path.display(),
                error = %err,
                "failed to append client audit record"
            );
        }
    }
}
