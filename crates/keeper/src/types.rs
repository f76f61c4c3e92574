//! Keeper types and structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::KeeperError;

/// Retention limit applied when the configured value is missing or not positive.
pub const DEFAULT_RETENTION_LIMIT: u32 = 100;

/// Upper bound for every network operation unless configured otherwise.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Hostname label written into records when none is configured.
pub const DEFAULT_HOSTNAME: &str = "freeplan-keeper";

/// Version stamped into `ping_details.version`.
pub const RECORD_VERSION: &str = "1.0";

/// Name of the retention table (Postgres) and collection (MongoDB).
pub const KEEP_ALIVE_COLLECTION: &str = "keep_alive_reserved";

/// Kind of hosted backend a keeper sustains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Document database (MongoDB Atlas)
    DocumentStore,
    /// Relational database (Supabase Postgres)
    RelationalStore,
    /// Message queue (CloudAMQP)
    Queue,
}

impl BackendKind {
    /// Display name used for log attribution
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::DocumentStore => "MongoDB",
            BackendKind::RelationalStore => "Supabase",
            BackendKind::Queue => "CloudAMQP",
        }
    }

    /// Fixed `ping_source` label written into every record
    pub fn source_label(&self) -> &'static str {
        match self {
            BackendKind::DocumentStore => "mongodb-keeper",
            BackendKind::RelationalStore => "supabase-keeper",
            BackendKind::Queue => "cloudamqp-keeper",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-kind connection parameters
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionParams {
    DocumentStore {
        uri: String,
        database: String,
    },
    RelationalStore {
        uri: String,
        /// Overrides the password embedded in `uri`
        #[serde(default)]
        password: Option<String>,
    },
    Queue {
        uri: String,
        queue: String,
    },
}

impl ConnectionParams {
    /// Kind tag carried by these parameters
    pub fn kind(&self) -> BackendKind {
        match self {
            ConnectionParams::DocumentStore { .. } => BackendKind::DocumentStore,
            ConnectionParams::RelationalStore { .. } => BackendKind::RelationalStore,
            ConnectionParams::Queue { .. } => BackendKind::Queue,
        }
    }
}

// Connection strings carry credentials; keep them out of Debug output.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionParams::DocumentStore { database, .. } => f
                .debug_struct("DocumentStore")
                .field("uri", &"<redacted>")
                .field("database", database)
                .finish(),
            ConnectionParams::RelationalStore { password, .. } => f
                .debug_struct("RelationalStore")
                .field("uri", &"<redacted>")
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            ConnectionParams::Queue { queue, .. } => f
                .debug_struct("Queue")
                .field("uri", &"<redacted>")
                .field("queue", queue)
                .finish(),
        }
    }
}

/// Configuration record describing one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Connection parameters; also carries the backend kind
    pub params: ConnectionParams,

    /// Whether a keeper should be built for this backend
    pub enabled: bool,

    /// Maximum number of keep-alive records kept
    pub retention_limit: u32,

    /// Instance label written into `ping_details.hostname`
    pub hostname: String,

    /// Upper bound for connect, sustain and release
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl BackendDescriptor {
    /// Create an enabled descriptor with default limits
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            enabled: true,
            retention_limit: DEFAULT_RETENTION_LIMIT,
            hostname: DEFAULT_HOSTNAME.to_string(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Backend kind of this descriptor
    pub fn kind(&self) -> BackendKind {
        self.params.kind()
    }
}

/// `ping_details` object of a keep-alive record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingDetails {
    pub hostname: String,
    pub version: String,
}

/// Artifact written into a backend by every successful check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveRecord {
    /// Backend-assigned identifier, known after the write
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,

    pub ping_timestamp: DateTime<Utc>,

    pub ping_source: String,

    pub ping_details: PingDetails,
}

impl KeepAliveRecord {
    /// Build a record for `kind` stamped with the current time
    pub fn new(kind: BackendKind, hostname: &str) -> Self {
        Self {
            id: None,
            ping_timestamp: Utc::now(),
            ping_source: kind.source_label().to_string(),
            ping_details: PingDetails {
                hostname: hostname.to_string(),
                version: RECORD_VERSION.to_string(),
            },
        }
    }

    /// Set the backend-assigned identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Result of the retention step that follows a successful write
#[derive(Debug)]
pub enum CleanupOutcome {
    /// Number of records removed
    Pruned(u64),
    /// Backend has no server-side log to prune
    NotApplicable,
    /// Pruning failed; the write itself still counts
    Failed(KeeperError),
}

/// What a successful sustain produced
#[derive(Debug)]
pub struct SustainReport {
    pub record: KeepAliveRecord,
    pub cleanup: CleanupOutcome,
}

/// Classification of one check for statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Succeeded => write!(f, "SUCCEEDED"),
            CheckStatus::Failed => write!(f, "FAILED"),
            CheckStatus::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Per-keeper check statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperStats {
    /// Total checks performed
    pub total_checks: u64,

    /// Successful checks
    pub successful_checks: u64,

    /// Failed checks
    pub failed_checks: u64,

    /// Timeout count
    pub timeouts: u64,

    /// Average check time (milliseconds)
    pub avg_check_time_ms: f64,

    /// Current consecutive successes
    pub consecutive_successes: u32,

    /// Current consecutive failures
    pub consecutive_failures: u32,

    /// Wall-clock time of the last check
    pub last_check: Option<DateTime<Utc>>,
}

impl KeeperStats {
    /// Update stats with a finished check
    pub fn update(&mut self, status: CheckStatus, duration: Duration) {
        self.total_checks += 1;
        self.last_check = Some(Utc::now());

        match status {
            CheckStatus::Succeeded => {
                self.successful_checks += 1;
                self.consecutive_successes += 1;
                self.consecutive_failures = 0;
            }
            CheckStatus::Failed => {
                self.failed_checks += 1;
                self.consecutive_failures += 1;
                self.consecutive_successes = 0;
            }
            CheckStatus::TimedOut => {
                self.timeouts += 1;
                self.consecutive_failures += 1;
                self.consecutive_successes = 0;
            }
        }

        let duration_ms = duration.as_secs_f64() * 1000.0;
        self.avg_check_time_ms = (self.avg_check_time_ms * (self.total_checks - 1) as f64
            + duration_ms)
            / self.total_checks as f64;
    }
}
