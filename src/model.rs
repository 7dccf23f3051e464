//! Declarative description of a kind of document.
//!
//! A `Model` says where documents of a kind live, how their fields are
//! named in the store, how they reference other documents, and which hooks
//! run around their persistence. A single generic `Doc` engine serves every
//! model.

use std::fmt;
use std::rc::Rc;
use std::collections::BTreeMap;
use bson::{ Bson, Document };
use crate::{
    doc::Doc,
    literal::Order,
    id::ID_FIELD,
    error::Result,
};

/// The name of the connection models use unless told otherwise.
pub const DEFAULT_CONNECTION: &str = "default";

/// The logical name of the primary key, an alias of `_id`.
pub const ID_ALIAS: &str = "id";

/// How a document refers to other documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reference {
    /// `field` holds the id of a single document of `model`.
    One {
        /// The name of the referenced model.
        model: String,
        /// The field holding the id.
        field: String,
    },
    /// `field` holds an array of ids of documents of `model`.
    Many {
        /// The name of the referenced model.
        model: String,
        /// The field holding the ids.
        field: String,
    },
    /// Documents of `model` whose `foreign_field` holds this document's id.
    Reverse {
        /// The name of the referencing model.
        model: String,
        /// The field of the referencing documents holding the id.
        foreign_field: String,
    },
}

/// A named, predefined query for documents of another (or the same) model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Search {
    /// The model of the documents searched for.
    pub model: String,
    /// Query criteria, with logical field names.
    pub criteria: Document,
    /// Sort specification, with logical field names.
    pub sort: Option<Document>,
    /// Maximal number of results.
    pub limit: Option<i64>,
}

impl Search {
    /// Searches documents of `model` matching `criteria`.
    pub fn new<S: Into<String>>(model: S, criteria: Document) -> Self {
        Search {
            model: model.into(),
            criteria,
            sort: None,
            limit: None,
        }
    }

    /// Sorts the results by a single field.
    pub fn sort_by(mut self, field: &str, order: Order) -> Self {
        let mut sort = self.sort.take().unwrap_or_default();
        sort.insert(field, order);
        self.sort = Some(sort);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// The kind of write a save hook is called for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaveAction {
    /// The document didn't have an id yet, or its id was changed.
    Insert,
    /// Changes of a document with a known id are sent.
    Update,
    /// The document is upserted using its fields as criteria.
    Upsert,
}

/// Callbacks around the persistence of documents of a model.
///
/// Every method does nothing by default. Returning an error from a
/// `before_*` hook aborts the operation before anything is sent.
#[allow(unused_variables)]
pub trait Hooks: fmt::Debug {
    /// Called before a document is loaded.
    fn before_load(&self, doc: &mut Doc) -> Result<()> {
        Ok(())
    }

    /// Called after a load attempt, whether or not a document was found.
    fn after_load(&self, doc: &mut Doc) -> Result<()> {
        Ok(())
    }

    /// Called before a document is written.
    fn before_save(&self, doc: &mut Doc, action: SaveAction) -> Result<()> {
        Ok(())
    }

    /// Called after a document was written successfully.
    fn after_save(&self, doc: &mut Doc, action: SaveAction) -> Result<()> {
        Ok(())
    }

    /// Called before a document is removed.
    fn before_delete(&self, doc: &mut Doc) -> Result<()> {
        Ok(())
    }

    /// Called after a document was removed. Its state is already cleared.
    fn after_delete(&self, doc: &mut Doc) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}

/// Everything the document engine needs to know about a kind of document.
///
/// ```
/// # extern crate guava;
/// #
/// # use guava::model::{ Model, Reference };
/// #
/// # fn main() {
/// let model = Model::new("Article", "articles")
///     .alias("title", "t")
///     .reference("author", Reference::One {
///         model: "User".into(),
///         field: "author_id".into(),
///     });
///
/// assert_eq!(model.stored_name("title"), "t");
/// assert_eq!(model.stored_name("title.en"), "t.en");
/// assert_eq!(model.stored_name("id"), "_id");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Model {
    /// The logical name of the model, used by the registry.
    name: String,
    /// The name of the connection the documents are accessed through.
    connection: String,
    /// Overrides the database of the connection, if set.
    database: Option<String>,
    /// The name of the collection.
    collection: String,
    /// Logical field name to stored field name.
    aliases: BTreeMap<String, String>,
    /// References, by name.
    references: BTreeMap<String, Reference>,
    /// Named searches.
    searches: BTreeMap<String, Search>,
    /// Persistence callbacks.
    hooks: Rc<dyn Hooks>,
}

impl Model {
    /// Describes documents named `name`, stored in `collection`
    /// of the `default` connection's database.
    pub fn new<N, C>(name: N, collection: C) -> Self
        where N: Into<String>,
              C: Into<String>,
    {
        Model {
            name: name.into(),
            connection: String::from(DEFAULT_CONNECTION),
            database: None,
            collection: collection.into(),
            aliases: BTreeMap::new(),
            references: BTreeMap::new(),
            searches: BTreeMap::new(),
            hooks: Rc::new(NoHooks),
        }
    }

    /// Uses the named connection.
    pub fn connection<S: Into<String>>(mut self, name: S) -> Self {
        self.connection = name.into();
        self
    }

    /// Uses a database other than the connection's.
    pub fn database<S: Into<String>>(mut self, name: S) -> Self {
        self.database = Some(name.into());
        self
    }

    /// Stores the field known as `logical` under the name `stored`.
    pub fn alias<L, S>(mut self, logical: L, stored: S) -> Self
        where L: Into<String>,
              S: Into<String>,
    {
        self.aliases.insert(logical.into(), stored.into());
        self
    }

    /// Adds a named reference.
    pub fn reference<S: Into<String>>(mut self, name: S, reference: Reference) -> Self {
        self.references.insert(name.into(), reference);
        self
    }

    /// Adds a named search.
    pub fn search<S: Into<String>>(mut self, name: S, search: Search) -> Self {
        self.searches.insert(name.into(), search);
        self
    }

    /// Installs persistence callbacks.
    pub fn hooks<H: Hooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Rc::new(hooks);
        self
    }

    /// The logical name of the model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the connection.
    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    /// The database override, if any.
    pub fn database_name(&self) -> Option<&str> {
        self.database.as_ref().map(String::as_str)
    }

    /// The name of the collection.
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Looks up a reference by name.
    pub fn get_reference(&self, name: &str) -> Option<&Reference> {
        self.references.get(name)
    }

    /// Iterates over the references.
    pub fn references(&self) -> impl Iterator<Item = (&String, &Reference)> {
        self.references.iter()
    }

    /// Looks up a named search.
    pub fn get_search(&self, name: &str) -> Option<&Search> {
        self.searches.get(name)
    }

    /// The persistence callbacks.
    pub fn get_hooks(&self) -> Rc<dyn Hooks> {
        Rc::clone(&self.hooks)
    }

    /// Translates a logical field name or dotted path to its stored form.
    /// Only the first path segment is subject to aliasing.
    pub fn stored_name(&self, logical: &str) -> String {
        let (head, tail) = split_path(logical);
        let head = match self.aliases.get(head) {
            Some(stored) => stored.as_str(),
            None if head == ID_ALIAS => ID_FIELD,
            None => head,
        };
        join_path(head, tail)
    }

    /// Translates the field names of query criteria (or of a projection or
    /// sort specification) to their stored form. Operators such as `$or`
    /// are descended into; operands are left alone.
    pub fn translate(&self, criteria: &Document) -> Document {
        let mut translated = Document::new();

        for (key, value) in criteria.iter() {
            if key.starts_with('$') {
                translated.insert(key.clone(), self.translate_operand(value));
            } else {
                translated.insert(self.stored_name(key), value.clone());
            }
        }

        translated
    }

    /// Helper for `translate()`: logical operators hold criteria themselves.
    fn translate_operand(&self, value: &Bson) -> Bson {
        match *value {
            Bson::Array(ref items) => Bson::Array(
                items.iter().map(|item| self.translate_operand(item)).collect()
            ),
            Bson::Document(ref doc) => Bson::Document(self.translate(doc)),
            ref other => other.clone(),
        }
    }
}

/// Splits the first segment off a dotted path.
fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.find('.') {
        Some(i) => (&path[..i], Some(&path[i + 1..])),
        None => (path, None),
    }
}

/// Inverse of `split_path()`.
fn join_path(head: &str, tail: Option<&str>) -> String {
    match tail {
        Some(tail) => format!("{}.{}", head, tail),
        None => head.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_always_aliased() {
        let model = Model::new("User", "users");

        assert_eq!(model.stored_name("id"), "_id");
        assert_eq!(model.stored_name("_id"), "_id");
        assert_eq!(model.stored_name("name"), "name");
    }

    #[test]
    fn translates_criteria_recursively() {
        let model = Model::new("User", "users").alias("email", "e");
        let criteria = doc!{
            "id": 1,
            "$or": [{ "email": "a@b.c" }, { "email.verified": true }],
            "age": { "$gt": 18 },
        };

        assert_eq!(model.translate(&criteria), doc!{
            "_id": 1,
            "$or": [{ "e": "a@b.c" }, { "e.verified": true }],
            "age": { "$gt": 18 },
        });
    }

    #[test]
    fn builder_sets_location() {
        let model = Model::new("Log", "logs").connection("audit").database("archive");

        assert_eq!(model.name(), "Log");
        assert_eq!(model.connection_name(), "audit");
        assert_eq!(model.database_name(), Some("archive"));
        assert_eq!(model.collection_name(), "logs");
        assert_eq!(Model::new("X", "xs").connection_name(), DEFAULT_CONNECTION);
    }

    #[test]
    fn search_builder() {
        let search = Search::new("Post", doc!{ "published": true })
            .sort_by("date", Order::Descending)
            .limit(10);

        assert_eq!(search.sort, Some(doc!{ "date": -1 }));
        assert_eq!(search.limit, Some(10));
    }
}
