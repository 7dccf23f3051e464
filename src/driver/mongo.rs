//! `Driver` implementation backed by the synchronous `mongodb` crate.

use std::fmt;
use bson::{ Bson, Document };
use mongodb::{ Client, ThreadedClient, CommandType };
use mongodb::db::ThreadedDatabase;
use mongodb::coll::options::{ FindOptions, CountOptions, CursorType };
use mongodb::coll::error::WriteException;
use crate::{
    config::ConnectionConfig,
    literal::CursorFlags,
    error::{ ErrorKind, Result, ResultExt },
};
use super::{
    Driver, Session, RawCursor, Namespace, FindSpec,
    WriteConcern, WriteAck, UpdateOptions, RemoveOptions,
};

/// Connects to real MongoDB deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDriver;

impl MongoDriver {
    /// Creates a driver.
    pub fn new() -> Self {
        MongoDriver
    }
}

impl Driver for MongoDriver {
    fn connect(&self, uri: &str, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        let client = Client::with_uri(uri)
            .chain(|| format!("can't connect to {}", config.hosts().join(",")))
            .map_err(|error| error.with_kind(ErrorKind::Connection))?;
        let db = client.db(&config.database);

        if let Some(ref username) = config.username {
            let password = config.password.as_ref().map_or("", String::as_str);
            db.auth(username, password)
                .chain(|| format!("authentication of {} failed", username))
                .map_err(|error| error.with_kind(ErrorKind::Connection))?;
        }

        // The client connects lazily, so a failure only surfaces on first use.
        db.command(doc!{ "ping": 1 }, CommandType::Suppressed, None)
            .chain(|| format!("{} is unreachable", config.hosts().join(",")))
            .map_err(|error| error.with_kind(ErrorKind::Connection))?;

        debug!("connected to {}/{}", config.hosts().join(","), config.database);

        Ok(Box::new(MongoSession { client }))
    }
}

/// A connected `mongodb::Client`.
struct MongoSession {
    /// The driver's connection pool.
    client: Client,
}

impl MongoSession {
    /// Returns the driver's handle to a collection.
    fn collection(&self, namespace: &Namespace) -> mongodb::coll::Collection {
        self.client.db(&namespace.database).collection(&namespace.collection)
    }
}

impl Session for MongoSession {
    fn run_command(&self, database: &str, command: Document) -> Result<Document> {
        self.client
            .db(database)
            .command(command, CommandType::Suppressed, None)
            .chain(|| format!("error running command on {}", database))
    }

    fn find(&self, namespace: &Namespace, spec: FindSpec) -> Result<Box<dyn RawCursor>> {
        let mut options = FindOptions::default();

        if !spec.projection.is_empty() {
            options.projection = Some(spec.projection);
        }
        options.limit = spec.limit;
        options.skip = spec.skip;
        options.sort = spec.sort;
        options.batch_size = spec.batch_size;
        options.max_time_ms = spec.max_time_ms;
        options.modifiers = spec.hint.map(|hint| doc!{ "$hint": hint });
        options.no_cursor_timeout = spec.flags.contains(CursorFlags::IMMORTAL);
        options.allow_partial_results = spec.flags.contains(CursorFlags::PARTIAL);
        if spec.flags.contains(CursorFlags::TAILABLE) {
            options.cursor_type = CursorType::Tailable;
        }

        let cursor = self
            .collection(namespace)
            .find(Some(spec.criteria), Some(options))
            .chain(|| format!("error querying {}", namespace))?;

        Ok(Box::new(MongoCursor { inner: cursor }))
    }

    fn count(
        &self,
        namespace: &Namespace,
        criteria: Document,
        limit: Option<i64>,
        skip: Option<i64>,
    ) -> Result<i64> {
        let mut options = CountOptions::default();
        options.limit = limit;
        options.skip = skip;

        self.collection(namespace)
            .count(Some(criteria), Some(options))
            .chain(|| format!("error counting {}", namespace))
    }

    fn insert(&self, namespace: &Namespace, document: Document, concern: WriteConcern) -> Result<WriteAck> {
        let result = self
            .collection(namespace)
            .insert_one(document, Some(convert_write_concern(concern)))
            .chain(|| format!("error inserting into {}", namespace))?;

        Ok(match result.write_exception {
            Some(exception) => failed_ack(&exception),
            None => WriteAck::ok(1),
        })
    }

    fn update(
        &self,
        namespace: &Namespace,
        criteria: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<WriteAck> {
        let coll = self.collection(namespace);
        let driver_options = mongodb::coll::options::UpdateOptions {
            upsert: Some(options.upsert),
            write_concern: Some(convert_write_concern(options.write_concern)),
        };
        let result = if options.multiple {
            coll.update_many(criteria, update, Some(driver_options))
        } else {
            coll.update_one(criteria, update, Some(driver_options))
        };
        let result = result.chain(|| format!("error updating {}", namespace))?;

        if let Some(exception) = result.write_exception {
            return Ok(failed_ack(&exception));
        }

        // The driver reports the upserted id wrapped in `{ _id: ... }`.
        let upserted = result.upserted_id.map(|id| match id {
            Bson::Document(mut doc) => doc.remove("_id").unwrap_or(Bson::Null),
            other => other,
        });
        let matched = i64::from(result.matched_count);

        Ok(WriteAck {
            ok: true,
            n: if upserted.is_some() { 1 } else { matched },
            updated_existing: matched > 0,
            upserted,
            err: None,
            code: None,
        })
    }

    fn remove(&self, namespace: &Namespace, criteria: Document, options: RemoveOptions) -> Result<WriteAck> {
        let coll = self.collection(namespace);
        let concern = Some(convert_write_concern(options.write_concern));
        let result = if options.just_one {
            coll.delete_one(criteria, concern)
        } else {
            coll.delete_many(criteria, concern)
        };
        let result = result.chain(|| format!("error removing from {}", namespace))?;

        Ok(match result.write_exception {
            Some(exception) => failed_ack(&exception),
            None => WriteAck::ok(i64::from(result.deleted_count)),
        })
    }

    fn close(&self) -> Result<()> {
        // Sockets are returned to the pool and closed when the client is dropped.
        Ok(())
    }
}

impl fmt::Debug for MongoSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MongoSession").finish()
    }
}

/// Wraps a `mongodb::cursor::Cursor`.
struct MongoCursor {
    /// The driver's cursor.
    inner: mongodb::cursor::Cursor,
}

impl Iterator for MongoCursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|result| result.chain("can't step cursor"))
    }
}

impl RawCursor for MongoCursor {}

impl fmt::Debug for MongoCursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MongoCursor").finish()
    }
}

/// Translates our write concern to the driver's.
fn convert_write_concern(concern: WriteConcern) -> mongodb::common::WriteConcern {
    mongodb::common::WriteConcern {
        w: concern.w,
        w_timeout: concern.timeout_ms.unwrap_or(0),
        j: concern.journal,
        fsync: false,
    }
}

/// Turns a driver write exception into a failed acknowledgment.
fn failed_ack(exception: &WriteException) -> WriteAck {
    let code = exception.write_error.as_ref().map(|error| error.code);
    warn!("write rejected: {}", exception);
    WriteAck::failed(exception.to_string(), code)
}
