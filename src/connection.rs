//! Named, lazily-established connections.

use std::fmt;
use std::convert::TryFrom;
use std::rc::Rc;
use std::cell::RefCell;
use bson::{ Bson, Document };
use crate::{
    coll::Collection,
    config::ConnectionConfig,
    driver::{ Driver, Session },
    bsn::{ BsonExt, IntoDocument },
    error::{ Error, ErrorKind, Result, ResultExt, StoreCode },
};

/// The error code the server replies with for an unknown command.
const COMMAND_NOT_FOUND: i32 = 59;

/// The collection holding the counters of `get_next_auto_increment()`,
/// unless the caller names another one.
pub const DEFAULT_COUNTER_COLLECTION: &str = "counters";

/// A named connection to a database.
///
/// The network connection is only established when first needed, and at
/// most once. Clones share the same underlying connection, which is closed
/// when the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    /// The shared state.
    inner: Rc<Inner>,
}

/// The state shared by clones of a `Connection`.
struct Inner {
    /// The name the connection is registered under.
    name: String,
    /// Where to connect.
    config: ConnectionConfig,
    /// Rendered from `config` once.
    uri: String,
    /// Establishes the session.
    driver: Rc<dyn Driver>,
    /// `Some` while connected.
    session: RefCell<Option<Box<dyn Session>>>,
}

impl Connection {
    /// Creates a disconnected connection. Fails if the configuration is invalid.
    pub fn new<S: Into<String>>(
        name: S,
        config: ConnectionConfig,
        driver: Rc<dyn Driver>,
    ) -> Result<Self> {
        let name = name.into();
        config.validate().chain(|| format!("invalid configuration for connection `{}`", name))?;
        let uri = config.connection_string();

        Ok(Connection {
            inner: Rc::new(Inner {
                name,
                config,
                uri,
                driver,
                session: RefCell::new(None),
            })
        })
    }

    /// The name the connection is registered under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The configuration the connection was created with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// The connection string.
    pub fn connection_string(&self) -> &str {
        &self.inner.uri
    }

    /// The database selected on connect.
    pub fn database(&self) -> &str {
        &self.inner.config.database
    }

    /// Whether the network connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.inner.session.borrow().is_some()
    }

    /// Establishes the network connection, unless it already is.
    /// Failures are not retried.
    pub fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let session = self.inner.driver
            .connect(&self.inner.uri, &self.inner.config)
            .chain(|| format!("connection `{}` failed", self.inner.name))
            .map_err(|error| error.with_kind(ErrorKind::Connection))?;

        debug!("connection `{}` established to database `{}`", self.name(), self.database());
        *self.inner.session.borrow_mut() = Some(session);

        Ok(())
    }

    /// Tears down the network connection, if it is established.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Connects if necessary, then runs `f` with the live session.
    pub fn with_session<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&dyn Session) -> Result<T>
    {
        self.connect()?;

        let session = self.inner.session.borrow();
        let session = session.as_ref().ok_or_else(|| Error::new(
            ErrorKind::Connection,
            format!("connection `{}` is closed", self.name())
        ))?;

        f(session.as_ref())
    }

    /// Returns an accessor for a collection of the selected database.
    pub fn select_collection(&self, name: &str) -> Result<Collection> {
        self.select_collection_in(self.database(), name)
    }

    /// Returns an accessor for a collection of an arbitrary database.
    pub fn select_collection_in(&self, database: &str, name: &str) -> Result<Collection> {
        self.connect()?;
        Ok(Collection::new(self.clone(), database, name, false))
    }

    /// Returns an accessor for the file metadata collection (`<prefix>.files`)
    /// of a grid storage bucket.
    pub fn select_grid_storage(&self, prefix: &str) -> Result<Collection> {
        self.connect()?;
        let name = format!("{}.files", prefix);
        Ok(Collection::new(self.clone(), self.database(), &name, true))
    }

    /// Runs a database command against the selected database, and checks
    /// its `ok` flag. A falsy flag is reported as a `Command` error, or as
    /// `MethodNotFound` if the server doesn't know the command.
    pub fn execute_command_safe<C: IntoDocument>(&self, command: C) -> Result<Document> {
        let command = command.into_document()?;
        let name = command.keys().next().cloned().unwrap_or_default();

        debug!("running command `{}` on `{}`", name, self.database());

        let reply = self.with_session(|session| {
            session.run_command(self.database(), command)
        })?;

        if reply.get("ok").and_then(Bson::try_as_bool).unwrap_or(false) {
            return Ok(reply);
        }

        let code = reply
            .get("code")
            .and_then(Bson::try_as_i64)
            .and_then(|code| i32::try_from(code).ok());
        let message = match reply.get("errmsg").or_else(|| reply.get("err")) {
            Some(&Bson::String(ref message)) => message.clone(),
            _ => String::from("no error message"),
        };
        let unknown = code == Some(COMMAND_NOT_FOUND)
            || message.contains("no such command")
            || message.contains("no such cmd");
        let kind = if unknown {
            ErrorKind::MethodNotFound
        } else {
            ErrorKind::Command
        };
        let error = Error::new(kind, format!("command `{}` failed: {}", name, message));

        Err(match code {
            Some(code) => error.with_context::<StoreCode>(code),
            None => error,
        })
    }

    /// Runs `findAndModify` on `collection`. The `command` holds the rest
    /// of the arguments (`query`, `update`, `new`, `upsert`, ...).
    /// Returns the document found (or created), if any.
    pub fn find_and_modify<C: IntoDocument>(&self, collection: &str, command: C) -> Result<Option<Document>> {
        let mut full = doc!{ "findAndModify": collection };

        for (key, value) in command.into_document()?.iter() {
            if key != "findAndModify" {
                full.insert(key.clone(), value.clone());
            }
        }

        let mut reply = self.execute_command_safe(full)?;

        match reply.remove("value") {
            Some(Bson::Document(doc)) => Ok(Some(doc)),
            Some(Bson::Null) | None => Ok(None),
            Some(other) => Err(Error::new(
                ErrorKind::IllTypedDocumentField,
                format!("findAndModify returned a non-document value: {}", other)
            )),
        }
    }

    /// Atomically increments and returns the counter named `key`, stored in
    /// `collection` (by default `counters`). The first value is `1`.
    pub fn get_next_auto_increment(&self, key: &str, collection: Option<&str>) -> Result<i64> {
        let collection = collection.unwrap_or(DEFAULT_COUNTER_COLLECTION);
        let counter = self.find_and_modify(collection, doc!{
            "query": { "_id": key },
            "update": { "$inc": { "seq": 1_i64 } },
            "new": true,
            "upsert": true,
        })?;

        counter
            .as_ref()
            .and_then(|counter| counter.get("seq"))
            .and_then(Bson::try_as_i64)
            .ok_or_else(|| Error::new(
                ErrorKind::MissingDocumentField,
                format!("counter `{}` in `{}` has no numeric `seq`", key, collection)
            ))
    }
}

impl Inner {
    /// Closes the session if there is one.
    fn close(&self) -> Result<()> {
        let session = self.session.borrow_mut().take();

        match session {
            Some(session) => {
                debug!("closing connection `{}`", self.name);
                session.close().chain(|| format!("error closing connection `{}`", self.name))
            }
            None => Ok(()),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!("{}", error);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("database", &self.inner.config.database)
            .field("connected", &self.is_connected())
            .finish()
    }
}
