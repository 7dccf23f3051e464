//! Forward-only iteration over query results.

use std::fmt::{ self, Write };
use bson::{ Bson, Document };
use crate::{
    driver::RawCursor,
    doc::Doc,
    coll::Collection,
    error::{ Error, ErrorKind, Result },
};

/// A materialized query: a single-pass sequence of result documents.
///
/// Errors are annotated with the rendered query they belong to.
pub struct Cursor {
    /// The driver's cursor.
    inner: Box<dyn RawCursor>,
    /// A result read ahead by `has_next()`.
    peeked: Option<Option<Result<Document>>>,
    /// The rendered query, for error messages.
    query: String,
}

impl Cursor {
    /// Wraps a driver cursor.
    pub(crate) fn new(inner: Box<dyn RawCursor>, query: String) -> Self {
        Cursor {
            inner,
            peeked: None,
            query,
        }
    }

    /// Checks whether there are any more documents for the cursor to yield.
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            let next = self.step();
            self.peeked = Some(next);
        }

        match self.peeked {
            Some(Some(_)) => true,
            _ => false,
        }
    }

    /// Changes the batch size of the remaining results.
    pub fn set_batch_size(&mut self, size: i32) {
        self.inner.set_batch_size(size);
    }

    /// Changes the timeout of the remaining results.
    pub fn set_timeout(&mut self, millis: i64) {
        self.inner.set_timeout(millis);
    }

    /// Advances the driver's cursor.
    fn step(&mut self) -> Option<Result<Document>> {
        let query = &self.query;

        self.inner.next().map(|result| {
            result
                .and_then(check_error_document)
                .map_err(|error| error.with_query(query.clone()))
        })
    }
}

impl Iterator for Cursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.peeked.take() {
            Some(next) => next,
            None => self.step(),
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cursor").field("query", &self.query).finish()
    }
}

/// The server sometimes hands back an error as an ordinary result document.
fn check_error_document(mut doc: Document) -> Result<Document> {
    if let Some(Bson::String(mut errmsg)) = doc.remove("$err") {
        if let Ok(code) = doc.get_i32("code") {
            write!(errmsg, " (code: {})", code).ok();
        } else if let Ok(code) = doc.get_i64("code") {
            write!(errmsg, " (code: {})", code).ok();
        }

        return Err(Error::new(ErrorKind::Driver, errmsg));
    }

    Ok(doc)
}

/// Iterates a model-bound collection, wrapping each result in a `Doc`.
/// See `Collection::docs()`.
#[derive(Debug)]
pub struct Docs<'a> {
    /// The collection being iterated.
    coll: &'a mut Collection,
}

impl<'a> Docs<'a> {
    /// Creates the iterator. The collection must be bound to a model.
    pub(crate) fn new(coll: &'a mut Collection) -> Self {
        Docs { coll }
    }
}

impl<'a> Iterator for Docs<'a> {
    type Item = Result<Doc>;

    fn next(&mut self) -> Option<Self::Item> {
        let stored = self.coll.next()?;
        Some(stored.and_then(|stored| self.coll.wrap(stored)))
    }
}
