//! A query builder and write helper over a single collection.

use std::fmt;
use std::rc::Rc;
use bson::{ Bson, Document };
use crate::{
    connection::Connection,
    cursor::{ Cursor, Docs },
    doc::Doc,
    model::Model,
    registry::Registry,
    merge::{ merge, put },
    literal::{ Order, CursorFlags },
    bsn::{ IntoDocument, render_shell },
    utils::int_to_usize_with_msg,
    driver::{ Namespace, FindSpec, WriteAck, WriteConcern, UpdateOptions, RemoveOptions },
    error::{ Error, ErrorKind, Result, ResultExt },
};

/// Options that may still be changed after iteration has started.
const MUTABLE_OPTIONS: &[&str] = &["batchSize", "maxTimeMS"];

/// The outcome of `update_safe()` or `remove_safe()`.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The write wasn't acknowledged (`w = 0`), so nothing was checked.
    Raw(WriteAck),
    /// Whether a single update modified an existing document.
    Updated(bool),
    /// The number of documents matched by a multi-document update.
    Modified(usize),
    /// The id of the document an upsert inserted.
    Upserted(Bson),
    /// The number of documents removed.
    Removed(usize),
}

/// The model a collection maps its results to.
#[derive(Debug, Clone)]
struct Binding {
    /// Resolves the references of mapped documents.
    registry: Registry,
    /// Aliases, and the model of mapped documents.
    model: Rc<Model>,
}

/// Accessor for one collection: builds a query, then iterates its results.
///
/// Query state (criteria, projection, options) accumulates until the
/// results are materialized by `load()` or by iteration. From then on it
/// is frozen, apart from the batch size and the timeout. The results can
/// only be iterated once; build a new accessor to run the query again.
///
/// Field names are translated through the aliases of the bound model, if
/// there is one.
pub struct Collection {
    /// The connection the collection is accessed through.
    conn: Connection,
    /// Database and collection name.
    namespace: Namespace,
    /// Whether this is the file collection of a grid storage bucket.
    grid: bool,
    /// The model results are mapped to, if any.
    binding: Option<Binding>,
    /// Criteria, projection and options of the query.
    spec: FindSpec,
    /// Chained options in the order they were set, for `inspect()`.
    chain: Vec<(&'static str, Bson)>,
    /// The materialized results.
    cursor: Option<Cursor>,
}

impl Collection {
    /// Creates an accessor with an empty query.
    pub(crate) fn new(conn: Connection, database: &str, name: &str, grid: bool) -> Self {
        Collection {
            conn,
            namespace: Namespace::new(database, name),
            grid,
            binding: None,
            spec: FindSpec::default(),
            chain: Vec::new(),
            cursor: None,
        }
    }

    /// Binds the accessor to a model.
    pub(crate) fn bind(mut self, registry: Registry, model: Rc<Model>) -> Self {
        self.binding = Some(Binding { registry, model });
        self
    }

    /// The fully-qualified name of the collection.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The name of the database.
    pub fn database(&self) -> &str {
        &self.namespace.database
    }

    /// The name of the collection.
    pub fn name(&self) -> &str {
        &self.namespace.collection
    }

    /// Whether this is the file collection of a grid storage bucket.
    pub fn is_grid_storage(&self) -> bool {
        self.grid
    }

    /// The model results are mapped to, if any.
    pub fn model(&self) -> Option<&Rc<Model>> {
        self.binding.as_ref().map(|binding| &binding.model)
    }

    /// The accumulated criteria, with stored field names.
    pub fn criteria(&self) -> &Document {
        &self.spec.criteria
    }

    /// The accumulated projection, with stored field names.
    pub fn projection(&self) -> &Document {
        &self.spec.projection
    }

    /// Whether the results have been materialized.
    pub fn is_loaded(&self) -> bool {
        self.cursor.is_some()
    }

    /// Adds criteria to the query, merging them with those already present.
    ///
    /// ```no_run
    /// # #[macro_use]
    /// # extern crate bson;
    /// # extern crate guava;
    /// #
    /// # use guava::prelude::*;
    /// # use guava::driver::mongo::MongoDriver;
    /// #
    /// # fn main() -> Result<()> {
    /// let registry = Registry::new(MongoDriver::new());
    /// let conn = registry.connection("default", Some(ConnectionConfig::new("shop")))?;
    /// let mut users = conn.select_collection("users")?;
    ///
    /// users.find(("active", true))?
    ///      .find("{ age: { $gte: 18 } }")?
    ///      .limit(10)?;
    ///
    /// assert_eq!(users.criteria(), &doc!{ "active": true, "age": { "$gte": 18_i64 } });
    /// # Ok(())
    /// # }
    /// ```
    pub fn find<C: IntoDocument>(&mut self, criteria: C) -> Result<&mut Self> {
        self.ensure_mutable("find")?;
        let criteria = self.translate(criteria.into_document()?);
        self.spec.criteria = merge(&self.spec.criteria, &criteria);
        Ok(self)
    }

    /// Includes (or, if `include` is false, excludes) fields in the results.
    pub fn fields<I, S>(&mut self, fields: I, include: bool) -> Result<&mut Self>
        where I: IntoIterator<Item = S>,
              S: AsRef<str>,
    {
        self.ensure_mutable("fields")?;

        for field in fields {
            let name = self.stored_name(field.as_ref());
            put(&mut self.spec.projection, &name, Bson::I32(if include { 1 } else { 0 }));
        }

        Ok(self)
    }

    /// Returns at most `n` results.
    pub fn limit(&mut self, n: i64) -> Result<&mut Self> {
        self.set_option("limit", Bson::I64(n))?;
        self.spec.limit = Some(n);
        Ok(self)
    }

    /// Skips the first `n` results.
    pub fn skip(&mut self, n: i64) -> Result<&mut Self> {
        self.set_option("skip", Bson::I64(n))?;
        self.spec.skip = Some(n);
        Ok(self)
    }

    /// Sorts the results.
    pub fn sort<S: IntoDocument>(&mut self, sort: S) -> Result<&mut Self> {
        let sort = self.translate(sort.into_document()?);
        self.set_option("sort", Bson::Document(sort.clone()))?;
        self.spec.sort = Some(sort);
        Ok(self)
    }

    /// Adds a sort key after those already set.
    pub fn sort_by(&mut self, field: &str, order: Order) -> Result<&mut Self> {
        let mut sort = self.spec.sort.clone().unwrap_or_default();
        put(&mut sort, &self.stored_name(field), order.into());
        self.set_option("sort", Bson::Document(sort.clone()))?;
        self.spec.sort = Some(sort);
        Ok(self)
    }

    /// Forces the use of an index, given by name or by key pattern.
    pub fn hint<H: Into<Bson>>(&mut self, hint: H) -> Result<&mut Self> {
        let hint = match hint.into() {
            Bson::Document(pattern) => Bson::Document(self.translate(pattern)),
            other => other,
        };
        self.set_option("hint", hint.clone())?;
        self.spec.hint = Some(hint);
        Ok(self)
    }

    /// Sets the number of results fetched per round trip.
    /// May be changed during iteration.
    pub fn batch_size(&mut self, size: i32) -> Result<&mut Self> {
        self.set_option("batchSize", Bson::I32(size))?;
        self.spec.batch_size = Some(size);
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.set_batch_size(size);
        }
        Ok(self)
    }

    /// Sets the time limit of the query, in milliseconds.
    /// May be changed during iteration.
    pub fn timeout(&mut self, millis: i64) -> Result<&mut Self> {
        self.set_option("maxTimeMS", Bson::I64(millis))?;
        self.spec.max_time_ms = Some(millis);
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.set_timeout(millis);
        }
        Ok(self)
    }

    /// Keeps the server-side cursor open indefinitely.
    pub fn immortal(&mut self, on: bool) -> Result<&mut Self> {
        self.set_flag("immortal", CursorFlags::IMMORTAL, on)
    }

    /// Keeps the cursor open after the last result of a capped collection.
    pub fn tailable(&mut self, on: bool) -> Result<&mut Self> {
        self.set_flag("tailable", CursorFlags::TAILABLE, on)
    }

    /// Accepts partial results if some shards are down.
    pub fn partial(&mut self, on: bool) -> Result<&mut Self> {
        self.set_flag("partial", CursorFlags::PARTIAL, on)
    }

    /// Sends the query and materializes its results.
    /// Does nothing if they are already materialized.
    pub fn load(&mut self) -> Result<&mut Self> {
        if self.cursor.is_some() {
            return Ok(self);
        }

        let query = Collection::inspect(self);
        debug!("loading {}", query);

        let namespace = &self.namespace;
        let spec = self.spec.clone();
        let inner = self.conn
            .with_session(|session| session.find(namespace, spec))
            .map_err(|error| error.with_query(query.clone()))?;

        self.cursor = Some(Cursor::new(inner, query));

        Ok(self)
    }

    /// Checks whether the results have more documents, loading them first
    /// if necessary.
    pub fn has_next(&mut self) -> Result<bool> {
        self.load()?;
        Ok(self.cursor.as_mut().map_or(false, Cursor::has_next))
    }

    /// Iterates the results as documents of the bound model.
    pub fn docs(&mut self) -> Result<Docs<'_>> {
        if self.binding.is_none() {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("{} isn't bound to a model", self.namespace)
            ));
        }

        self.load()?;
        Ok(Docs::new(self))
    }

    /// Fetches a single document, independently of the accumulated query.
    pub fn find_one<C, I, S>(&self, criteria: C, fields: I) -> Result<Option<Document>>
        where C: IntoDocument,
              I: IntoIterator<Item = S>,
              S: AsRef<str>,
    {
        let criteria = self.translate(criteria.into_document()?);
        let mut projection = Document::new();

        for field in fields {
            projection.insert(self.stored_name(field.as_ref()), 1);
        }

        let query = format!(
            "{}.findOne({},{})",
            self.namespace,
            render_shell(&Bson::Document(criteria.clone())),
            render_shell(&Bson::Document(projection.clone())),
        );
        debug!("loading {}", query);

        let spec = FindSpec {
            criteria,
            projection,
            limit: Some(1),
            ..FindSpec::default()
        };
        let namespace = &self.namespace;

        self.conn
            .with_session(|session| {
                let mut cursor = Cursor::new(session.find(namespace, spec)?, query.clone());
                cursor.next().map_or(Ok(None), |result| result.map(Some))
            })
            .map_err(|error| error.with_query(query.clone()))
    }

    /// Counts the results of the accumulated query, honoring `limit` and
    /// `skip` only if `include_limit_and_skip` is set.
    pub fn count(&self, include_limit_and_skip: bool) -> Result<usize> {
        let (limit, skip) = if include_limit_and_skip {
            (self.spec.limit, self.spec.skip)
        } else {
            (None, None)
        };

        self.count_raw(self.spec.criteria.clone(), limit, skip)
            .map_err(|error| error.with_query(self.inspect()))
    }

    /// Counts the documents matching `criteria`, ignoring the accumulated query.
    pub fn count_query<C: IntoDocument>(&self, criteria: C) -> Result<usize> {
        let criteria = self.translate(criteria.into_document()?);
        self.count_raw(criteria, None, None)
    }

    /// Inserts a document, which must already have an `_id`. Unless the
    /// write concern is `w = 0`, a failure is reported as a `Write` error.
    pub fn insert_safe(&self, document: Document, concern: WriteConcern) -> Result<WriteAck> {
        debug!("inserting into {}", self.namespace);

        let namespace = &self.namespace;
        let ack = self.conn
            .with_session(|session| session.insert(namespace, document, concern))
            .chain(|| format!("error inserting into {}", namespace))?;

        if concern.is_acknowledged() {
            ack.check(&format!("insert into {} failed", self.namespace))
        } else {
            Ok(ack)
        }
    }

    /// Updates the documents matching `criteria`.
    ///
    /// Unless the write concern is `w = 0`, the acknowledgment is checked
    /// and interpreted: a multi-document update returns the number of
    /// matched documents, an upsert which inserted returns the new id,
    /// and any other update returns whether an existing document was updated.
    pub fn update_safe<C, U>(&self, criteria: C, update: U, options: UpdateOptions) -> Result<WriteOutcome>
        where C: IntoDocument,
              U: IntoDocument,
    {
        let criteria = self.translate(criteria.into_document()?);
        let update = self.translate_update(update.into_document()?);

        debug!("updating {} where {}", self.namespace, render_shell(&Bson::Document(criteria.clone())));

        let namespace = &self.namespace;
        let ack = self.conn
            .with_session(|session| session.update(namespace, criteria, update, options))
            .chain(|| format!("error updating {}", namespace))?;

        if !options.write_concern.is_acknowledged() {
            return Ok(WriteOutcome::Raw(ack));
        }

        let ack = ack.check(&format!("update of {} failed", self.namespace))?;

        if options.multiple {
            int_to_usize_with_msg(ack.n, "# of updated documents").map(WriteOutcome::Modified)
        } else if let (true, Some(id)) = (options.upsert, ack.upserted.clone()) {
            Ok(WriteOutcome::Upserted(id))
        } else {
            Ok(WriteOutcome::Updated(ack.updated_existing))
        }
    }

    /// Removes the documents matching `criteria`, returning their number
    /// unless the write concern is `w = 0`.
    pub fn remove_safe<C: IntoDocument>(&self, criteria: C, options: RemoveOptions) -> Result<WriteOutcome> {
        let criteria = self.translate(criteria.into_document()?);

        debug!("removing from {} where {}", self.namespace, render_shell(&Bson::Document(criteria.clone())));

        let namespace = &self.namespace;
        let ack = self.conn
            .with_session(|session| session.remove(namespace, criteria, options))
            .chain(|| format!("error removing from {}", namespace))?;

        if !options.write_concern.is_acknowledged() {
            return Ok(WriteOutcome::Raw(ack));
        }

        let ack = ack.check(&format!("removal from {} failed", self.namespace))?;
        int_to_usize_with_msg(ack.n, "# of removed documents").map(WriteOutcome::Removed)
    }

    /// Renders the query the way the interactive shell would spell it:
    /// `<database>.<collection>.find(<criteria>,<projection>).<option>(<value>)...`
    pub fn inspect(&self) -> String {
        let mut rendered = format!(
            "{}.find({},{})",
            self.namespace,
            render_shell(&Bson::Document(self.spec.criteria.clone())),
            render_shell(&Bson::Document(self.spec.projection.clone())),
        );

        for &(name, ref value) in &self.chain {
            rendered.push('.');
            rendered.push_str(name);
            rendered.push('(');
            rendered.push_str(&render_shell(value));
            rendered.push(')');
        }

        rendered
    }

    /// Wraps a result document in a `Doc` of the bound model.
    pub(crate) fn wrap(&self, stored: Document) -> Result<Doc> {
        match self.binding {
            Some(ref binding) => Ok(Doc::from_stored(
                binding.registry.clone(),
                Rc::clone(&binding.model),
                stored,
            )),
            None => Err(Error::new(
                ErrorKind::Validation,
                format!("{} isn't bound to a model", self.namespace)
            )),
        }
    }

    /// Fails if the results are materialized, unless the option may be
    /// changed during iteration.
    fn ensure_mutable(&self, what: &str) -> Result<()> {
        if self.cursor.is_some() && !MUTABLE_OPTIONS.contains(&what) {
            Err(Error::new(
                ErrorKind::QueryState,
                format!("can't change `{}` after iteration started", what)
            ).with_query(self.inspect()))
        } else {
            Ok(())
        }
    }

    /// Records a chained option, replacing an earlier value of the same option.
    fn set_option(&mut self, name: &'static str, value: Bson) -> Result<()> {
        self.ensure_mutable(name)?;

        match self.chain.iter_mut().find(|entry| entry.0 == name) {
            Some(entry) => entry.1 = value,
            None => self.chain.push((name, value)),
        }

        Ok(())
    }

    /// Helper for the boolean cursor options.
    fn set_flag(&mut self, name: &'static str, flag: CursorFlags, on: bool) -> Result<&mut Self> {
        self.set_option(name, Bson::Boolean(on))?;
        self.spec.flags.set(flag, on);
        Ok(self)
    }

    /// Runs a count.
    fn count_raw(&self, criteria: Document, limit: Option<i64>, skip: Option<i64>) -> Result<usize> {
        let namespace = &self.namespace;
        let n = self.conn
            .with_session(|session| session.count(namespace, criteria, limit, skip))
            .chain(|| format!("error counting {}", namespace))?;

        int_to_usize_with_msg(n, "# of counted documents")
    }

    /// Translates a logical field name of the bound model.
    fn stored_name(&self, field: &str) -> String {
        match self.binding {
            Some(ref binding) => binding.model.stored_name(field),
            None => field.to_owned(),
        }
    }

    /// Translates the field names of criteria through the bound model.
    fn translate(&self, criteria: Document) -> Document {
        match self.binding {
            Some(ref binding) => binding.model.translate(&criteria),
            None => criteria,
        }
    }

    /// Translates the field names inside each operator of an update document.
    fn translate_update(&self, update: Document) -> Document {
        let binding = match self.binding {
            Some(ref binding) => binding,
            None => return update,
        };
        let mut translated = Document::new();

        for (op, operand) in update.iter() {
            let operand = match *operand {
                Bson::Document(ref fields) => Bson::Document(binding.model.translate(fields)),
                ref other => other.clone(),
            };
            translated.insert(op.clone(), operand);
        }

        translated
    }
}

impl Iterator for Collection {
    type Item = Result<Document>;

    /// Yields the next raw result document, loading the results first if
    /// necessary.
    fn next(&mut self) -> Option<Self::Item> {
        if let Err(error) = self.load() {
            return Some(Err(error));
        }
        self.cursor.as_mut().and_then(Iterator::next)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace)
            .field("grid", &self.grid)
            .field("model", &self.model().map(|model| model.name()))
            .field("query", &self.inspect())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
