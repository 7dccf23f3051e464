//! The composition root: named connections and registered models.

use std::fmt;
use std::rc::Rc;
use std::cell::RefCell;
use std::collections::HashMap;
use bson::Bson;
use crate::{
    coll::Collection,
    connection::Connection,
    config::ConnectionConfig,
    doc::Doc,
    model::Model,
    bsn::IntoDocument,
    driver::{ Driver, mongo::MongoDriver },
    error::{ Error, ErrorKind, Result },
};

/// Owns the driver, the named connections and the models.
///
/// Cloning is cheap; clones share the same state. Documents and collections
/// obtained through the registry keep a clone of it for resolving their
/// references.
#[derive(Clone)]
pub struct Registry {
    /// The shared state.
    inner: Rc<Inner>,
}

/// The state shared by clones of a `Registry`.
struct Inner {
    /// Establishes every connection of the registry.
    driver: Rc<dyn Driver>,
    /// Connections by name.
    connections: RefCell<HashMap<String, Connection>>,
    /// Models by name.
    models: RefCell<HashMap<String, Rc<Model>>>,
}

impl Registry {
    /// Creates an empty registry connecting through `driver`.
    pub fn new<D: Driver + 'static>(driver: D) -> Self {
        Registry {
            inner: Rc::new(Inner {
                driver: Rc::new(driver),
                connections: RefCell::new(HashMap::new()),
                models: RefCell::new(HashMap::new()),
            })
        }
    }

    /// Creates an empty registry connecting to real MongoDB servers.
    pub fn with_mongo() -> Self {
        Registry::new(MongoDriver::new())
    }

    /// Returns the connection registered as `name`. The first time a name
    /// is requested, a configuration must be supplied, otherwise this fails
    /// with a `Configuration` error. Later configurations are ignored.
    pub fn connection(&self, name: &str, config: Option<ConnectionConfig>) -> Result<Connection> {
        if let Some(conn) = self.inner.connections.borrow().get(name) {
            return Ok(conn.clone());
        }

        let config = config.ok_or_else(|| Error::new(
            ErrorKind::Configuration,
            format!("no configuration for connection `{}`", name)
        ))?;
        let conn = Connection::new(name, config, Rc::clone(&self.inner.driver))?;

        debug!("registered connection `{}`", name);
        self.inner.connections.borrow_mut().insert(name.to_owned(), conn.clone());

        Ok(conn)
    }

    /// Registers a model, replacing any earlier model of the same name.
    pub fn register(&self, model: Model) -> Rc<Model> {
        let model = Rc::new(model);
        self.inner.models.borrow_mut().insert(model.name().to_owned(), Rc::clone(&model));
        model
    }

    /// Looks up a registered model.
    pub fn model(&self, name: &str) -> Result<Rc<Model>> {
        self.inner.models.borrow().get(name).cloned().ok_or_else(|| Error::new(
            ErrorKind::Configuration,
            format!("no model named `{}`", name)
        ))
    }

    /// Returns the connection a model's documents are accessed through.
    pub fn connection_for(&self, model: &Model) -> Result<Connection> {
        self.connection(model.connection_name(), None)
    }

    /// A new, empty document of the named model.
    pub fn doc(&self, model: &str) -> Result<Doc> {
        Ok(Doc::new(self.clone(), self.model(model)?))
    }

    /// A document of the named model with a known id. Nothing is loaded
    /// until a field other than the id is read.
    pub fn doc_with_id<I: Into<Bson>>(&self, model: &str, id: I) -> Result<Doc> {
        Ok(Doc::with_id(self.clone(), self.model(model)?, id.into()))
    }

    /// A document of the named model, to be loaded lazily by `criteria`.
    pub fn doc_with_criteria<C: IntoDocument>(&self, model: &str, criteria: C) -> Result<Doc> {
        let model = self.model(model)?;
        let criteria = model.translate(&criteria.into_document()?);
        Ok(Doc::with_criteria(self.clone(), model, criteria))
    }

    /// An accessor for the collection of the named model, mapping its
    /// results to documents of that model.
    pub fn collection(&self, model: &str) -> Result<Collection> {
        let model = self.model(model)?;
        self.collection_of(model)
    }

    /// Helper for `collection()`, also used by documents.
    pub(crate) fn collection_of(&self, model: Rc<Model>) -> Result<Collection> {
        let coll = self.unbound_collection(&model)?;
        Ok(coll.bind(self.clone(), model))
    }

    /// An accessor for the collection of a model, without alias translation.
    pub(crate) fn unbound_collection(&self, model: &Model) -> Result<Collection> {
        let conn = self.connection_for(model)?;
        let database = model.database_name().unwrap_or_else(|| conn.database());
        conn.select_collection_in(database, model.collection_name())
    }

    /// Closes and forgets every connection, and forgets every model.
    pub fn reset(&self) -> Result<()> {
        let connections: Vec<_> = self.inner.connections.borrow_mut().drain().collect();
        self.inner.models.borrow_mut().clear();

        let mut first_error = None;

        for (_, conn) in connections {
            if let Err(error) = conn.close() {
                warn!("{}", error);
                first_error = first_error.or(Some(error));
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut connections: Vec<_> = self.inner.connections.borrow().keys().cloned().collect();
        let mut models: Vec<_> = self.inner.models.borrow().keys().cloned().collect();
        connections.sort();
        models.sort();

        f.debug_struct("Registry")
            .field("driver", &self.inner.driver)
            .field("connections", &connections)
            .field("models", &models)
            .finish()
    }
}
