//! Audit trail for sessions and commands
//!
//! Records who connected, what they ran, which trees were sent and when the
//! permission grants were reloaded. Sinks are trait objects so hosts can
//! route events wherever they like.

use chrono::{DateTime, Utc};
use lodestone::ClientId;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// One audited action
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Identifier of the subject involved, `host` for host-wide events
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<u64>,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, subject: impl Into<String>, details: AuditDetails) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            subject: subject.into(),
            client: None,
            details,
        }
    }

    pub fn with_client(mut self, client: ClientId) -> Self {
        self.client = Some(client.get());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SessionConnected,
    SessionDisconnected,
    CommandExecuted,
    CommandFailed,
    /// A command tree was sent to a client
    TreeSynced,
    /// The permission store was reloaded from its backing storage
    PermissionsReloaded,
    /// One subject's grants changed and its cache was dropped
    PermissionsChanged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Session,
    Command {
        line: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Tree {
        nodes: usize,
        fingerprint: String,
    },
    Permissions {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit sink not available: {0}")]
    Unavailable(String),
}

/// Destination for audit events
///
/// ```rust
/// use lodestone_host::audit::{AuditError, AuditEvent, AuditSink};
///
/// struct StdoutSink;
///
/// impl AuditSink for StdoutSink {
///     fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
///         println!("{}", serde_json::to_string(&event)?);
///         Ok(())
///     }
///
///     fn flush(&self) -> Result<(), AuditError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Flush any buffered events
    fn flush(&self) -> Result<(), AuditError>;

    fn is_healthy(&self) -> bool {
        true
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).record(event)
    }

    fn flush(&self) -> Result<(), AuditError> {
        (**self).flush()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

// ============================================================================
// Default Implementations
// ============================================================================

/// Appends one JSON object per line
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", json)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.flush()?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.path.parent().map(|p| p.exists()).unwrap_or(true)
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// Keeps the most recent events in memory
pub struct MemoryAuditSink {
    events: RwLock<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Sink holding up to 1000 events
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.read().iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn find_by_subject(&self, subject: &str) -> Vec<AuditEvent> {
        self.read()
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VecDeque<AuditEvent>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Discards all events
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl NullAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Fans events out to several sinks
pub struct CompositeAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for CompositeAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for CompositeAuditSink {
    /// Every sink sees the event even when an earlier one fails. The first
    /// error is returned.
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event.clone()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn flush(&self) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.flush()?;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.sinks.iter().all(|s| s.is_healthy())
    }
}

impl fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

pub fn session_connected(subject: &str, client: ClientId) -> AuditEvent {
    AuditEvent::new(AuditEventType::SessionConnected, subject, AuditDetails::Session)
        .with_client(client)
}

pub fn session_disconnected(subject: &str, client: ClientId) -> AuditEvent {
    AuditEvent::new(AuditEventType::SessionDisconnected, subject, AuditDetails::Session)
        .with_client(client)
}

pub fn command_executed(subject: &str, client: ClientId, line: &str, result: i32) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CommandExecuted,
        subject,
        AuditDetails::Command {
            line: line.to_string(),
            result: Some(result),
            error: None,
        },
    )
    .with_client(client)
}

pub fn command_failed(subject: &str, client: ClientId, line: &str, error: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CommandFailed,
        subject,
        AuditDetails::Command {
            line: line.to_string(),
            result: None,
            error: Some(error.to_string()),
        },
    )
    .with_client(client)
}

pub fn tree_synced(subject: &str, client: ClientId, nodes: usize, fingerprint: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::TreeSynced,
        subject,
        AuditDetails::Tree {
            nodes,
            fingerprint: fingerprint.to_string(),
        },
    )
    .with_client(client)
}

pub fn permissions_reloaded(path: Option<&Path>) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::PermissionsReloaded,
        "host",
        AuditDetails::Permissions {
            path: path.map(Path::to_path_buf),
        },
    )
}

pub fn permissions_changed(subject: &str, client: ClientId) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::PermissionsChanged,
        subject,
        AuditDetails::Permissions { path: None },
    )
    .with_client(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("offline".into()))
        }

        fn flush(&self) -> Result<(), AuditError> {
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        sink.record(session_connected("alice", ClientId::new(1)))
            .unwrap();

        assert_eq!(sink.count(), 1);
        let events = sink.find_by_type(AuditEventType::SessionConnected);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject, "alice");
        assert_eq!(events[0].client, Some(1));
    }

    #[test]
    fn test_memory_sink_eviction() {
        let sink = MemoryAuditSink::with_capacity(2);
        for i in 0..3 {
            sink.record(session_connected(&format!("player-{}", i), ClientId::new(i)))
                .unwrap();
        }

        assert_eq!(sink.count(), 2);
        let events = sink.events();
        assert_eq!(events[0].subject, "player-1");
        assert_eq!(events[1].subject, "player-2");
    }

    #[test]
    fn test_null_sink() {
        let sink = NullAuditSink::new();
        assert!(sink.record(permissions_reloaded(None)).is_ok());
        assert!(sink.flush().is_ok());
    }

    #[test]
    fn test_composite_sink() {
        let first = Arc::new(MemoryAuditSink::new());
        let second = Arc::new(MemoryAuditSink::new());
        let composite = CompositeAuditSink::new()
            .with_sink(first.clone())
            .with_sink(FailingSink)
            .with_sink(second.clone());

        let result = composite.record(command_executed("alice", ClientId::new(1), "home", 1));
        assert!(matches!(result, Err(AuditError::Unavailable(_))));
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
        assert!(!composite.is_healthy());
    }

    #[test]
    fn test_event_serialization() {
        let event = command_failed("bob", ClientId::new(4), "ban steve", "Unknown command");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"command_failed\""));
        assert!(json.contains("\"type\":\"command\""));
        assert!(json.contains("ban steve"));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");

        let sink = FileAuditSink::new(&path).unwrap();
        sink.record(tree_synced("alice", ClientId::new(1), 12, "abc"))
            .unwrap();
        sink.record(session_disconnected("alice", ClientId::new(1)))
            .unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("tree_synced"));
        assert!(lines[1].contains("session_disconnected"));
    }
}
