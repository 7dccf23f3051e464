//! The operations this crate needs from a database driver.
//!
//! Everything that touches the network goes through these traits, so the
//! rest of the crate never depends on a concrete driver. The `mongo`
//! submodule adapts the `mongodb` crate; tests plug in an in-memory driver.

use std::fmt;
use bson::{ Bson, Document };
use crate::{
    config::ConnectionConfig,
    literal::CursorFlags,
    error::{ Error, ErrorKind, Result, StoreCode },
};

pub mod mongo;

/// Establishes connections.
pub trait Driver: fmt::Debug {
    /// Connects (and authenticates, if the configuration has credentials)
    /// to the server(s) named in the connection string.
    fn connect(&self, uri: &str, config: &ConnectionConfig) -> Result<Box<dyn Session>>;
}

/// A live connection, able to run commands and CRUD operations.
pub trait Session: fmt::Debug {
    /// Runs a database command and returns the server's reply verbatim.
    fn run_command(&self, database: &str, command: Document) -> Result<Document>;

    /// Starts a query.
    fn find(&self, namespace: &Namespace, spec: FindSpec) -> Result<Box<dyn RawCursor>>;

    /// Counts the documents matching `criteria`, honoring `limit` and `skip`.
    fn count(
        &self,
        namespace: &Namespace,
        criteria: Document,
        limit: Option<i64>,
        skip: Option<i64>,
    ) -> Result<i64>;

    /// Inserts a single document, which must already have an `_id`.
    fn insert(&self, namespace: &Namespace, document: Document, concern: WriteConcern) -> Result<WriteAck>;

    /// Updates the document(s) matching `criteria`.
    fn update(
        &self,
        namespace: &Namespace,
        criteria: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<WriteAck>;

    /// Removes the document(s) matching `criteria`.
    fn remove(&self, namespace: &Namespace, criteria: Document, options: RemoveOptions) -> Result<WriteAck>;

    /// Tears the connection down.
    fn close(&self) -> Result<()>;
}

/// A forward-only, single-pass sequence of query results.
pub trait RawCursor: Iterator<Item = Result<Document>> + fmt::Debug {
    /// Changes the batch size mid-iteration, where the driver allows it.
    fn set_batch_size(&mut self, _size: i32) {}

    /// Changes the client-side timeout mid-iteration, where the driver allows it.
    fn set_timeout(&mut self, _millis: i64) {}
}

/// A fully-qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    /// The database name.
    pub database: String,
    /// The collection name.
    pub collection: String,
}

impl Namespace {
    /// Creates a namespace from a database and a collection name.
    pub fn new<D: Into<String>, C: Into<String>>(database: D, collection: C) -> Self {
        Namespace {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Everything the driver needs to start a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    /// The query criteria.
    pub criteria: Document,
    /// Fields to include (`1`) or exclude (`0`); empty means all fields.
    pub projection: Document,
    /// Maximal number of results.
    pub limit: Option<i64>,
    /// Number of results to skip.
    pub skip: Option<i64>,
    /// Sort specification.
    pub sort: Option<Document>,
    /// Index hint, either an index name or a key pattern.
    pub hint: Option<Bson>,
    /// Number of results per batch.
    pub batch_size: Option<i32>,
    /// Server-side time limit, in milliseconds.
    pub max_time_ms: Option<i64>,
    /// Boolean cursor options.
    pub flags: CursorFlags,
}

/// How a write is acknowledged by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteConcern {
    /// Number of servers that must acknowledge the write; `0` means
    /// the write isn't acknowledged at all.
    pub w: i32,
    /// Whether to wait for the journal commit.
    pub journal: bool,
    /// How long to wait for acknowledgment, in milliseconds.
    pub timeout_ms: Option<i32>,
}

impl WriteConcern {
    /// A write concern that doesn't wait for the server at all.
    pub fn unacknowledged() -> Self {
        WriteConcern { w: 0, ..WriteConcern::default() }
    }

    /// Returns `false` for `w = 0`.
    pub fn is_acknowledged(&self) -> bool {
        self.w != 0
    }
}

/// The default is acknowledgment by the primary.
impl Default for WriteConcern {
    fn default() -> Self {
        WriteConcern {
            w: 1,
            journal: false,
            timeout_ms: None,
        }
    }
}

/// Options of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Acknowledgment requirements.
    pub write_concern: WriteConcern,
    /// Update every matching document rather than only the first one.
    pub multiple: bool,
    /// Insert a document if none matches.
    pub upsert: bool,
}

/// Options of a removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoveOptions {
    /// Acknowledgment requirements.
    pub write_concern: WriteConcern,
    /// Remove only the first matching document.
    pub just_one: bool,
}

/// The server's acknowledgment of a write, in the shape of the
/// `getLastError` reply: `{ ok, n, updatedExisting, upserted, err, code }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteAck {
    /// Whether the write succeeded.
    pub ok: bool,
    /// Number of documents affected (matched, for updates).
    pub n: i64,
    /// Whether an update modified an existing document.
    pub updated_existing: bool,
    /// The id of the document an upsert inserted.
    pub upserted: Option<Bson>,
    /// The error message, if the write failed.
    pub err: Option<String>,
    /// The error code, if the write failed.
    pub code: Option<i32>,
}

impl WriteAck {
    /// A successful acknowledgment affecting `n` documents.
    pub fn ok(n: i64) -> Self {
        WriteAck { ok: true, n, ..WriteAck::default() }
    }

    /// A failed acknowledgment.
    pub fn failed<S: Into<String>>(message: S, code: Option<i32>) -> Self {
        WriteAck {
            ok: false,
            err: Some(message.into()),
            code,
            ..WriteAck::default()
        }
    }

    /// Converts a failed acknowledgment into a `Write` error.
    pub fn check(self, message: &str) -> Result<Self> {
        if self.ok {
            return Ok(self);
        }

        let reason = self.err.as_ref().map_or("unknown error", String::as_str);
        let error = Error::new(ErrorKind::Write, format!("{}: {}", message, reason));

        Err(match self.code {
            Some(code) => error.with_context::<StoreCode>(code),
            None => error,
        })
    }
}
