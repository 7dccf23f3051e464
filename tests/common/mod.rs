//! An in-memory driver which records every call and replies from a script,
//! plus the models shared by the integration tests.

#![allow(dead_code)]

use std::rc::Rc;
use std::cell::RefCell;
use std::collections::VecDeque;
use bson::{ Bson, Document, oid::ObjectId };
use guava::prelude::*;
use guava::driver::{ Driver, Session, RawCursor, Namespace, FindSpec, WriteAck };

lazy_static! {
    /// An id the tests address documents by.
    pub static ref KNOWN_ID: ObjectId = ObjectId::with_string(KNOWN_HEX).expect("valid hex id");
}

/// Hex form of `KNOWN_ID`.
pub static KNOWN_HEX: &str = "5a0a4f3e2b1c0d9e8f7a6b5c";

/// A call that reached the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(String),
    Command { database: String, command: Document },
    Find { namespace: String, spec: FindSpec },
    Count { namespace: String, criteria: Document },
    Insert { namespace: String, document: Document },
    Update { namespace: String, criteria: Document, update: Document, options: UpdateOptions },
    Remove { namespace: String, criteria: Document, options: RemoveOptions },
    Close,
}

impl Call {
    /// Whether the call is a round trip other than connecting.
    pub fn is_io(&self) -> bool {
        match *self {
            Call::Connect(_) | Call::Close => false,
            _ => true,
        }
    }
}

/// Recorded calls and scripted replies. Queues that run dry fall back to
/// an empty result set, `{ ok: 1 }`, or a successful acknowledgment.
#[derive(Debug, Default)]
pub struct Script {
    calls: Vec<Call>,
    results: VecDeque<Vec<Document>>,
    replies: VecDeque<Document>,
    acks: VecDeque<WriteAck>,
    counts: VecDeque<i64>,
}

/// Clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    script: Rc<RefCell<Script>>,
}

impl MemoryDriver {
    /// Queues the results of the next query.
    pub fn results(&self, docs: Vec<Document>) -> &Self {
        self.script.borrow_mut().results.push_back(docs);
        self
    }

    /// Queues the reply to the next command.
    pub fn reply(&self, reply: Document) -> &Self {
        self.script.borrow_mut().replies.push_back(reply);
        self
    }

    /// Queues the acknowledgment of the next write.
    pub fn ack(&self, ack: WriteAck) -> &Self {
        self.script.borrow_mut().acks.push_back(ack);
        self
    }

    /// Queues the result of the next count.
    pub fn count(&self, n: i64) -> &Self {
        self.script.borrow_mut().counts.push_back(n);
        self
    }

    /// Every round trip so far, excluding connecting.
    pub fn io(&self) -> Vec<Call> {
        self.script.borrow().calls.iter().filter(|call| call.is_io()).cloned().collect()
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.script.borrow().calls.clone()
    }

    /// Forgets the calls recorded so far.
    pub fn forget(&self) {
        self.script.borrow_mut().calls.clear();
    }
}

impl Driver for MemoryDriver {
    fn connect(&self, uri: &str, _: &ConnectionConfig) -> Result<Box<dyn Session>> {
        self.script.borrow_mut().calls.push(Call::Connect(uri.to_owned()));
        Ok(Box::new(MemorySession { script: Rc::clone(&self.script) }))
    }
}

#[derive(Debug)]
struct MemorySession {
    script: Rc<RefCell<Script>>,
}

impl MemorySession {
    fn record(&self, call: Call) {
        self.script.borrow_mut().calls.push(call);
    }

    fn next_ack(&self, fallback: WriteAck) -> WriteAck {
        self.script.borrow_mut().acks.pop_front().unwrap_or(fallback)
    }
}

impl Session for MemorySession {
    fn run_command(&self, database: &str, command: Document) -> Result<Document> {
        self.record(Call::Command { database: database.to_owned(), command });
        Ok(self.script.borrow_mut().replies.pop_front().unwrap_or_else(|| doc!{ "ok": 1.0 }))
    }

    fn find(&self, namespace: &Namespace, spec: FindSpec) -> Result<Box<dyn RawCursor>> {
        self.record(Call::Find { namespace: namespace.to_string(), spec });
        let docs = self.script.borrow_mut().results.pop_front().unwrap_or_default();
        Ok(Box::new(VecCursor(docs.into_iter())))
    }

    fn count(
        &self,
        namespace: &Namespace,
        criteria: Document,
        _limit: Option<i64>,
        _skip: Option<i64>,
    ) -> Result<i64> {
        self.record(Call::Count { namespace: namespace.to_string(), criteria });
        Ok(self.script.borrow_mut().counts.pop_front().unwrap_or(0))
    }

    fn insert(&self, namespace: &Namespace, document: Document, _: WriteConcern) -> Result<WriteAck> {
        self.record(Call::Insert { namespace: namespace.to_string(), document });
        Ok(self.next_ack(WriteAck::ok(1)))
    }

    fn update(
        &self,
        namespace: &Namespace,
        criteria: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<WriteAck> {
        self.record(Call::Update { namespace: namespace.to_string(), criteria, update, options });
        Ok(self.next_ack(WriteAck { updated_existing: true, ..WriteAck::ok(1) }))
    }

    fn remove(&self, namespace: &Namespace, criteria: Document, options: RemoveOptions) -> Result<WriteAck> {
        self.record(Call::Remove { namespace: namespace.to_string(), criteria, options });
        Ok(self.next_ack(WriteAck::ok(1)))
    }

    fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}

#[derive(Debug)]
struct VecCursor(std::vec::IntoIter<Document>);

impl Iterator for VecCursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(Ok)
    }
}

impl RawCursor for VecCursor {}

/// A registry with a `default` connection to database `test`, and the
/// models `Article`, `User`, `Tag` and `Comment`.
pub fn setup() -> (Registry, MemoryDriver) {
    let driver = MemoryDriver::default();
    let registry = Registry::new(driver.clone());

    registry
        .connection("default", Some(ConnectionConfig::new("test")))
        .expect("valid configuration");

    registry.register(
        Model::new("Article", "articles")
            .alias("title", "t")
            .reference("author", Reference::One {
                model: "User".into(),
                field: "author_id".into(),
            })
            .reference("tags", Reference::Many {
                model: "Tag".into(),
                field: "tag_ids".into(),
            })
            .reference("comments", Reference::Reverse {
                model: "Comment".into(),
                foreign_field: "article_id".into(),
            })
            .search("approved", Search::new("Comment", doc!{ "approved": true })
                .sort_by("date", Order::Descending)
                .limit(5))
    );
    registry.register(Model::new("User", "users"));
    registry.register(Model::new("Tag", "tags"));
    registry.register(Model::new("Comment", "comments"));

    (registry, driver)
}

/// The id of an inserted document.
pub fn inserted_id(call: &Call) -> Option<Bson> {
    match *call {
        Call::Insert { ref document, .. } => document.get("_id").cloned(),
        _ => None,
    }
}
