//! Change-tracking documents.
//!
//! A `Doc` remembers which fields were assigned (`changed`), which atomic
//! operators are queued (`pending`), and which fields those operators make
//! stale (`dirty`). Saving compiles all of it into as few writes as
//! possible: a single update for a known document, or an insert (followed
//! by an update if operators were queued) for a new one.

use std::rc::Rc;
use std::collections::{ BTreeSet, HashMap };
use bson::{ Bson, Document };
use crate::{
    coll::{ Collection, WriteOutcome },
    model::{ Model, Reference, SaveAction },
    registry::Registry,
    ops::{ PendingOps, top_level },
    merge::{ merge, put },
    literal::BitOp,
    bsn::IntoDocument,
    id::{ ID_FIELD, to_native_id, new_object_id },
    driver::{ WriteConcern, UpdateOptions, RemoveOptions },
    error::{ Error, ErrorKind, Result, ResultExt },
};

/// Whether a document was loaded from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadState {
    /// No load was attempted yet.
    NotAttempted,
    /// The last load found nothing.
    Failed,
    /// The last load found the document, or the document was saved.
    Succeeded,
}

impl Default for LoadState {
    fn default() -> Self {
        LoadState::NotAttempted
    }
}

/// What a reference or a named search resolves to.
#[derive(Debug)]
pub enum Related {
    /// A single referenced document.
    One(Doc),
    /// A query for the referenced documents.
    Many(Collection),
}

impl Related {
    /// The referenced document, if this is a single reference.
    pub fn as_doc_mut(&mut self) -> Option<&mut Doc> {
        match *self {
            Related::One(ref mut doc) => Some(doc),
            Related::Many(_) => None,
        }
    }

    /// The query, if this is a multiple reference or a search.
    pub fn as_collection_mut(&mut self) -> Option<&mut Collection> {
        match *self {
            Related::One(_) => None,
            Related::Many(ref mut coll) => Some(coll),
        }
    }
}

/// A document of some model, with change tracking and lazy loading.
///
/// Field names passed to the accessors are logical names; they are
/// translated through the aliases of the model (`id` always stands for
/// `_id`). Dotted paths address embedded fields.
#[derive(Debug)]
pub struct Doc {
    /// Resolves references and connections.
    registry: Registry,
    /// What kind of document this is.
    model: Rc<Model>,
    /// Field values, with stored names.
    stored: Document,
    /// Top-level fields assigned since the last load or save.
    changed: BTreeSet<String>,
    /// Operators queued until the next save.
    pending: PendingOps,
    /// Top-level fields whose value in `stored` may be stale.
    dirty: BTreeSet<String>,
    /// Whether the document was loaded.
    load_state: LoadState,
    /// Criteria to load the document by when its id is unknown.
    criteria: Option<Document>,
    /// Resolved references and searches, by name.
    related: HashMap<String, Related>,
}

impl Doc {
    /// A new, empty document.
    pub(crate) fn new(registry: Registry, model: Rc<Model>) -> Self {
        Doc {
            registry,
            model,
            stored: Document::new(),
            changed: BTreeSet::new(),
            pending: PendingOps::new(),
            dirty: BTreeSet::new(),
            load_state: LoadState::NotAttempted,
            criteria: None,
            related: HashMap::new(),
        }
    }

    /// A document with a known id, not loaded yet.
    pub(crate) fn with_id(registry: Registry, model: Rc<Model>, id: Bson) -> Self {
        let mut doc = Doc::new(registry, model);
        doc.stored.insert(ID_FIELD, to_native_id(id));
        doc
    }

    /// A document to be loaded by `criteria` (with stored field names).
    pub(crate) fn with_criteria(registry: Registry, model: Rc<Model>, criteria: Document) -> Self {
        let mut doc = Doc::new(registry, model);
        doc.criteria = Some(criteria);
        doc
    }

    /// A document just read from the store.
    pub(crate) fn from_stored(registry: Registry, model: Rc<Model>, stored: Document) -> Self {
        let mut doc = Doc::new(registry, model);
        doc.stored = stored;
        doc.load_state = LoadState::Succeeded;
        doc
    }

    /// The model of the document.
    pub fn model(&self) -> &Rc<Model> {
        &self.model
    }

    /// The primary key, if known.
    pub fn id(&self) -> Option<&Bson> {
        self.stored.get(ID_FIELD)
    }

    /// Assigns the primary key. A document whose id was assigned is
    /// inserted, not updated, when saved.
    pub fn set_id<I: Into<Bson>>(&mut self, id: I) -> Result<&mut Self> {
        self.set(ID_FIELD, id)
    }

    /// Whether a load was attempted, and whether it found the document.
    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    /// Whether the field was assigned since the last load or save.
    pub fn is_changed(&self, field: &str) -> bool {
        self.changed.contains(&self.model.stored_name(field))
    }

    /// Whether reading the field will reload the document first.
    pub fn is_dirty(&self, field: &str) -> bool {
        let path = self.model.stored_name(field);
        self.dirty.contains(top_level(&path))
    }

    /// Whether any operator is queued.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The queued operators.
    pub fn pending(&self) -> &PendingOps {
        &self.pending
    }

    /// An accessor for the collection of the document's model.
    pub fn collection(&self) -> Result<Collection> {
        self.registry.collection_of(Rc::clone(&self.model))
    }

    /// Reads a field, or an embedded field by dotted path.
    ///
    /// Reading any field but the id loads the document first if no load was
    /// attempted yet and it can be found (by id or by criteria). Reading a
    /// dirty field reloads it once its operators were sent. Fields assigned
    /// locally keep their values across loads.
    pub fn get(&mut self, field: &str) -> Result<Option<Bson>> {
        let path = self.model.stored_name(field);
        let top = top_level(&path).to_owned();

        if top != ID_FIELD && self.can_load() {
            if self.dirty.contains(&top) && !self.pending.fields().contains(&top) {
                trace!("{}: `{}` is dirty, reloading", self.model.name(), field);
                self.reload()?;
            } else if self.load_state == LoadState::NotAttempted {
                trace!("{}: loading lazily for `{}`", self.model.name(), field);
                self.reload()?;
            }
        }

        Ok(lookup(&self.stored, &path).cloned())
    }

    /// Assigns a field. Assigning the value a field already has does
    /// nothing. A dotted path queues a `$set` of the embedded field instead.
    pub fn set<V: Into<Bson>>(&mut self, field: &str, value: V) -> Result<&mut Self> {
        if let Some(&Reference::One { .. }) = self.model.get_reference(field) {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("`{}` is a reference, assign a document with `set_related()`", field)
            ));
        }

        let path = self.model.stored_name(field);
        let value = value.into();

        if path.contains('.') {
            self.pending.set(&path, value);
            self.mark_dirty(&path);
            return Ok(self);
        }

        let value = if path == ID_FIELD { to_native_id(value) } else { value };

        if self.stored.get(&path) != Some(&value) {
            put(&mut self.stored, &path, value);
            self.changed.insert(path);
        }

        Ok(self)
    }

    /// Removes a field, or queues the removal of an embedded field.
    pub fn unset(&mut self, field: &str) -> &mut Self {
        let path = self.model.stored_name(field);

        if !path.contains('.') {
            self.stored.remove(&path);
            self.changed.remove(&path);
        }

        self.pending.unset(&path);
        self.mark_dirty(&path);
        self
    }

    /// Queues an increment of a numeric field.
    pub fn inc<V: Into<Bson>>(&mut self, field: &str, amount: V) -> Result<&mut Self> {
        let path = self.model.stored_name(field);
        self.pending.inc(&path, amount.into())?;
        self.mark_dirty(&path);
        Ok(self)
    }

    /// Queues appending a value to an array.
    pub fn push<V: Into<Bson>>(&mut self, field: &str, value: V) -> &mut Self {
        let path = self.model.stored_name(field);
        self.pending.push(&path, value.into());
        self.mark_dirty(&path);
        self
    }

    /// Queues appending several values to an array.
    pub fn push_all<I, V>(&mut self, field: &str, values: I) -> &mut Self
        where I: IntoIterator<Item = V>,
              V: Into<Bson>,
    {
        let path = self.model.stored_name(field);
        self.pending.push_all(&path, values.into_iter().map(Into::into).collect());
        self.mark_dirty(&path);
        self
    }

    /// Queues removing every occurrence of a value from an array.
    pub fn pull<V: Into<Bson>>(&mut self, field: &str, value: V) -> &mut Self {
        let path = self.model.stored_name(field);
        self.pending.pull(&path, value.into());
        self.mark_dirty(&path);
        self
    }

    /// Queues removing every occurrence of several values from an array.
    pub fn pull_all<I, V>(&mut self, field: &str, values: I) -> &mut Self
        where I: IntoIterator<Item = V>,
              V: Into<Bson>,
    {
        let path = self.model.stored_name(field);
        self.pending.pull_all(&path, values.into_iter().map(Into::into).collect());
        self.mark_dirty(&path);
        self
    }

    /// Queues adding a value to an array unless it's already there.
    pub fn add_to_set<V: Into<Bson>>(&mut self, field: &str, value: V) -> &mut Self {
        let path = self.model.stored_name(field);
        self.pending.add_to_set(&path, value.into());
        self.mark_dirty(&path);
        self
    }

    /// Queues removing the last element of an array.
    pub fn pop(&mut self, field: &str) -> &mut Self {
        let path = self.model.stored_name(field);
        self.pending.pop(&path);
        self.mark_dirty(&path);
        self
    }

    /// Queues removing the first element of an array.
    pub fn shift(&mut self, field: &str) -> &mut Self {
        let path = self.model.stored_name(field);
        self.pending.shift(&path);
        self.mark_dirty(&path);
        self
    }

    /// Queues a bitwise operation on an integer field.
    pub fn bit<V: Into<Bson>>(&mut self, field: &str, op: BitOp, operand: V) -> &mut Self {
        let path = self.model.stored_name(field);
        self.pending.bit(&path, op, operand.into());
        self.mark_dirty(&path);
        self
    }

    /// Resolves a reference or a named search of the model. The result is
    /// cached for the lifetime of the document.
    pub fn related(&mut self, name: &str) -> Result<&mut Related> {
        if !self.related.contains_key(name) {
            let related = self.resolve_related(name)?;
            self.related.insert(name.to_owned(), related);
        }

        self.related.get_mut(name).ok_or_else(|| Error::new(
            ErrorKind::MissingDocumentField,
            format!("reference `{}` vanished", name)
        ))
    }

    /// Assigns the document a single reference points to, and the
    /// referencing field to its id.
    pub fn set_related(&mut self, name: &str, doc: Doc) -> Result<&mut Self> {
        let field = match self.model.get_reference(name) {
            Some(&Reference::One { ref field, .. }) => field.clone(),
            _ => return Err(Error::new(
                ErrorKind::Validation,
                format!("`{}` isn't a single reference of {}", name, self.model.name())
            )),
        };

        if let Some(id) = doc.id().cloned() {
            self.set(&field, id)?;
        }

        self.related.insert(name.to_owned(), Related::One(doc));

        Ok(self)
    }

    /// Loads the document by `criteria`, which are remembered for later
    /// reloads while the id is unknown.
    pub fn load<C: IntoDocument>(&mut self, criteria: C) -> Result<&mut Self> {
        let criteria = self.model.translate(&criteria.into_document()?);
        self.criteria = Some(criteria.clone());
        self.load_by(criteria)?;
        Ok(self)
    }

    /// Loads the document again, by id if it is known, by the remembered
    /// criteria otherwise.
    pub fn reload(&mut self) -> Result<&mut Self> {
        let criteria = self.load_criteria().ok_or_else(|| Error::new(
            ErrorKind::MissingId,
            format!("can't load a {} with neither id nor criteria", self.model.name())
        ))?;
        self.load_by(criteria)?;
        Ok(self)
    }

    /// Replaces the field values. With `clean` set, the values (with stored
    /// names) become the loaded state of the document, as returned by
    /// `as_array(true)`; otherwise they are assigned one by one, as if by
    /// `set()`.
    pub fn load_values(&mut self, values: Document, clean: bool) -> Result<&mut Self> {
        if clean {
            self.stored = values;
            self.changed.clear();
            self.dirty = self.pending.fields();
            self.load_state = LoadState::Succeeded;
        } else {
            for (field, value) in values.iter() {
                self.set(field, value.clone())?;
            }
        }

        Ok(self)
    }

    /// The field values, with stored names. With `clean` set, every field is
    /// returned; otherwise only the fields assigned since the last load or save.
    pub fn as_array(&self, clean: bool) -> Document {
        if clean {
            self.stored.clone()
        } else {
            self.changed_values()
        }
    }

    /// Writes the document: inserts it if its id is unknown or was assigned,
    /// otherwise sends its changes and queued operators in a single update.
    /// With `acknowledge` unset, failures are not reported.
    pub fn save(&mut self, acknowledge: bool) -> Result<&mut Self> {
        self.update_references()?;

        let concern = if acknowledge {
            WriteConcern::default()
        } else {
            WriteConcern::unacknowledged()
        };

        if self.id_is_known() {
            self.save_update(concern)?;
        } else {
            self.save_insert(concern)?;
        }

        Ok(self)
    }

    /// Upserts the document, using all of its fields as criteria. The queued
    /// operators are merged with `extra` operators.
    pub fn upsert<C: IntoDocument>(&mut self, extra: C) -> Result<&mut Self> {
        let extra = PendingOps::from_document(self.translate_update(extra.into_document()?))?;

        self.update_references()?;

        let criteria = self.stored.clone();

        if criteria.is_empty() {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("no fields to upsert {} by", self.model.name())
            ));
        }

        let update = merge(&self.pending.to_update(), &extra.to_update());

        if update.is_empty() {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("no operators to upsert {} with", self.model.name())
            ));
        }

        let hooks = self.model.get_hooks();
        hooks.before_save(self, SaveAction::Upsert)?;

        debug!("upserting {} in {}", self.model.name(), self.model.collection_name());

        let options = UpdateOptions { upsert: true, ..UpdateOptions::default() };
        let outcome = self.store()?
            .update_safe(criteria, update, options)
            .chain(|| format!("error upserting {}", self.model.name()))?;

        if let WriteOutcome::Upserted(id) = outcome {
            self.insert_id(id);
        }

        self.changed.clear();
        self.flush_pending(&extra);
        hooks.after_save(self, SaveAction::Upsert)?;

        Ok(self)
    }

    /// Removes the document from the store, and clears all of its state.
    pub fn delete(&mut self) -> Result<&mut Self> {
        let id = match self.id() {
            Some(id) if self.id_is_known() => id.clone(),
            _ => return Err(Error::new(
                ErrorKind::Validation,
                format!("can't delete a {} that was never saved", self.model.name())
            )),
        };

        let hooks = self.model.get_hooks();
        hooks.before_delete(self)?;

        debug!("deleting {} {}", self.model.name(), id);

        let options = RemoveOptions { just_one: true, ..RemoveOptions::default() };
        self.store()?
            .remove_safe(doc!{ "_id": id }, options)
            .chain(|| format!("error deleting {}", self.model.name()))?;

        self.clear();
        hooks.after_delete(self)?;

        Ok(self)
    }

    /// The insert path of `save()`.
    fn save_insert(&mut self, concern: WriteConcern) -> Result<()> {
        if self.changed.is_empty() {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("nothing to insert for {}", self.model.name())
            ));
        }

        let hooks = self.model.get_hooks();
        hooks.before_save(self, SaveAction::Insert)?;

        let id = match self.id().cloned() {
            Some(id) => id,
            None => new_object_id()?,
        };
        let mut payload = doc!{ "_id": id.clone() };

        for (field, value) in self.changed_values().iter() {
            if field != ID_FIELD {
                payload.insert(field.clone(), value.clone());
            }
        }

        debug!("inserting {} into {}", self.model.name(), self.model.collection_name());

        let coll = self.store()?;
        coll.insert_safe(payload, concern)
            .chain(|| format!("error saving {}", self.model.name()))?;

        self.insert_id(id.clone());
        self.changed.clear();
        self.load_state = LoadState::Succeeded;

        if !self.pending.is_empty() {
            let options = UpdateOptions { write_concern: concern, ..UpdateOptions::default() };
            coll.update_safe(doc!{ "_id": id }, self.pending.to_update(), options)
                .chain(|| format!("error applying operators to new {}", self.model.name()))?;
        }

        self.flush_pending(&PendingOps::new());
        hooks.after_save(self, SaveAction::Insert)
    }

    /// The update path of `save()`.
    fn save_update(&mut self, concern: WriteConcern) -> Result<()> {
        if self.changed.is_empty() && self.pending.is_empty() {
            return Ok(());
        }

        let hooks = self.model.get_hooks();
        hooks.before_save(self, SaveAction::Update)?;

        let changes = self.changed_values();
        let mut update = Document::new();

        if !changes.is_empty() {
            update.insert("$set", changes);
        }

        let update = merge(&update, &self.pending.to_update());
        let id = self.id().cloned().unwrap_or(Bson::Null);

        debug!("updating {} {}", self.model.name(), id);

        let options = UpdateOptions { write_concern: concern, ..UpdateOptions::default() };
        self.store()?
            .update_safe(doc!{ "_id": id }, update, options)
            .chain(|| format!("error saving {}", self.model.name()))?;

        self.changed.clear();
        self.flush_pending(&PendingOps::new());
        hooks.after_save(self, SaveAction::Update)
    }

    /// Loads by stored-name criteria, overlaying locally assigned fields.
    fn load_by(&mut self, criteria: Document) -> Result<()> {
        let hooks = self.model.get_hooks();
        hooks.before_load(self)?;

        let found = self.store()?
            .find_one(criteria, Vec::<&str>::new())
            .chain(|| format!("error loading {}", self.model.name()))?;

        match found {
            Some(mut fresh) => {
                for field in &self.changed {
                    if let Some(value) = self.stored.get(field) {
                        put(&mut fresh, field, value.clone());
                    }
                }
                self.stored = fresh;
                self.load_state = LoadState::Succeeded;
            }
            None => {
                trace!("{}: nothing found", self.model.name());
                self.load_state = LoadState::Failed;
            }
        }

        self.dirty = self.pending.fields();
        hooks.after_load(self)
    }

    /// Builds what a reference or a named search resolves to.
    fn resolve_related(&mut self, name: &str) -> Result<Related> {
        if let Some(reference) = self.model.get_reference(name).cloned() {
            return match reference {
                Reference::One { model, field } => {
                    let target = self.registry.model(&model)?;
                    let doc = match self.get(&field)? {
                        None | Some(Bson::Null) => Doc::new(self.registry.clone(), target),
                        Some(id) => Doc::with_id(self.registry.clone(), target, id),
                    };
                    Ok(Related::One(doc))
                }
                Reference::Many { model, field } => {
                    let ids: Vec<Bson> = match self.get(&field)? {
                        None | Some(Bson::Null) => Vec::new(),
                        Some(Bson::Array(ids)) => ids.into_iter().map(to_native_id).collect(),
                        Some(other) => return Err(Error::new(
                            ErrorKind::IllTypedDocumentField,
                            format!("reference field `{}` isn't an array: {}", field, other)
                        )),
                    };
                    let mut coll = self.registry.collection_of(self.registry.model(&model)?)?;
                    coll.find(doc!{ "_id": { "$in": ids } })?;
                    Ok(Related::Many(coll))
                }
                Reference::Reverse { model, foreign_field } => {
                    let id = self.id().cloned().ok_or_else(|| Error::new(
                        ErrorKind::MissingId,
                        format!("`{}` needs the id of the {}", name, self.model.name())
                    ))?;
                    let mut coll = self.registry.collection_of(self.registry.model(&model)?)?;
                    coll.find((foreign_field.as_str(), id))?;
                    Ok(Related::Many(coll))
                }
            };
        }

        if let Some(search) = self.model.get_search(name).cloned() {
            let mut coll = self.registry.collection_of(self.registry.model(&search.model)?)?;
            coll.find(search.criteria)?;
            if let Some(sort) = search.sort {
                coll.sort(sort)?;
            }
            if let Some(limit) = search.limit {
                coll.limit(limit)?;
            }
            return Ok(Related::Many(coll));
        }

        Err(Error::new(
            ErrorKind::Validation,
            format!("{} has no reference or search named `{}`", self.model.name(), name)
        ))
    }

    /// Copies the ids of cached single references into their fields.
    fn update_references(&mut self) -> Result<()> {
        let updates: Vec<(String, Bson)> = self.model
            .references()
            .filter_map(|(name, reference)| match (reference, self.related.get(name)) {
                (&Reference::One { ref field, .. }, Some(&Related::One(ref doc))) => {
                    doc.id().map(|id| (field.clone(), id.clone()))
                }
                _ => None,
            })
            .collect();

        for (field, id) in updates {
            self.set(&field, id)?;
        }

        Ok(())
    }

    /// After a successful write: the fields touched by operators are stale.
    fn flush_pending(&mut self, extra: &PendingOps) {
        self.dirty.extend(self.pending.fields());
        self.dirty.extend(extra.fields());
        self.pending.clear();
    }

    /// Records an id assigned on insert, as the first field.
    fn insert_id(&mut self, id: Bson) {
        if self.stored.contains_key(ID_FIELD) {
            put(&mut self.stored, ID_FIELD, id);
        } else {
            let mut stored = doc!{ "_id": id };
            for (field, value) in self.stored.iter() {
                stored.insert(field.clone(), value.clone());
            }
            self.stored = stored;
        }
    }

    /// Marks the top-level field of `path` as stale.
    fn mark_dirty(&mut self, path: &str) {
        self.dirty.insert(top_level(path).to_owned());
    }

    /// Forgets everything, as after a deletion.
    fn clear(&mut self) {
        self.stored = Document::new();
        self.changed.clear();
        self.pending.clear();
        self.dirty.clear();
        self.related.clear();
        self.criteria = None;
        self.load_state = LoadState::NotAttempted;
    }

    /// Whether the id is known and wasn't assigned locally.
    fn id_is_known(&self) -> bool {
        self.stored.contains_key(ID_FIELD) && !self.changed.contains(ID_FIELD)
    }

    /// Whether there's a way to find the document in the store.
    fn can_load(&self) -> bool {
        self.id_is_known() || self.criteria.is_some()
    }

    /// The criteria `reload()` uses.
    fn load_criteria(&self) -> Option<Document> {
        match self.stored.get(ID_FIELD) {
            Some(id) if self.id_is_known() => Some(doc!{ "_id": id.clone() }),
            _ => self.criteria.clone(),
        }
    }

    /// The assigned fields and their values, in field order.
    fn changed_values(&self) -> Document {
        let mut values = Document::new();

        for (field, value) in self.stored.iter() {
            if self.changed.contains(field) {
                values.insert(field.clone(), value.clone());
            }
        }

        values
    }

    /// Translates the fields inside each operator of caller-supplied operators.
    fn translate_update(&self, update: Document) -> Document {
        let mut translated = Document::new();

        for (op, operand) in update.iter() {
            let operand = match *operand {
                Bson::Document(ref fields) => Bson::Document(self.model.translate(fields)),
                ref other => other.clone(),
            };
            translated.insert(op.clone(), operand);
        }

        translated
    }

    /// The collection of the model, without alias translation.
    fn store(&self) -> Result<Collection> {
        self.registry.unbound_collection(&self.model)
    }
}

/// Looks up a dotted path in a document. Numeric segments index arrays.
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut value = doc.get(segments.next()?)?;

    for segment in segments {
        value = match *value {
            Bson::Document(ref inner) => inner.get(segment)?,
            Bson::Array(ref items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(value)
}
