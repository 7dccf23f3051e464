//! Integration tests for the change-tracking document engine: lazy loading,
//! the insert and update paths of `save()`, upserts, deletion, references
//! and hooks. Every round trip is recorded by an in-memory driver.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate bson;
extern crate guava;

mod common;

use std::rc::Rc;
use std::cell::RefCell;
use guava::prelude::*;
use guava::driver::WriteAck;
use guava::error::StoreCode;
use common::{ Call, KNOWN_ID, KNOWN_HEX, setup, inserted_id };

#[test]
fn save_without_id_inserts_exactly_once() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;

    article.set("name", "Mongo")?.set("type", "database")?;
    article.save(true)?;

    let io = driver.io();
    assert_eq!(io.len(), 1);

    let id = inserted_id(&io[0]).expect("inserted document has an id");
    match io[0] {
        Call::Insert { ref namespace, ref document } => {
            let mut rest = document.clone();
            rest.remove("_id");
            assert_eq!(namespace, "test.articles");
            assert_eq!(document.keys().next().map(String::as_str), Some("_id"));
            assert_eq!(rest, doc!{ "name": "Mongo", "type": "database" });
        }
        ref other => panic!("expected an insert, got {:?}", other),
    }

    assert_eq!(article.id(), Some(&id));
    assert_eq!(article.load_state(), LoadState::Succeeded);
    assert!(!article.is_changed("name"));

    Ok(())
}

#[test]
fn saving_an_empty_new_document_fails_without_io() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;
    let error = article.save(true).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(driver.io().is_empty());

    Ok(())
}

#[test]
fn repeated_increments_add_up_into_one_update() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    article.inc("views", 1)?.inc("views", 2)?;
    assert_eq!(article.pending().to_update(), doc!{ "$inc": { "views": 3 } });

    article.save(true)?;

    assert_eq!(driver.io(), vec![
        Call::Update {
            namespace: "test.articles".into(),
            criteria: doc!{ "_id": KNOWN_ID.clone() },
            update: doc!{ "$inc": { "views": 3 } },
            options: UpdateOptions::default(),
        }
    ]);
    assert!(!article.has_pending());

    Ok(())
}

#[test]
fn second_push_escalates_to_each() -> Result<()> {
    let (registry, _) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    article.push("labels", "a");
    assert_eq!(article.pending().to_update(), doc!{ "$push": { "labels": "a" } });

    article.push("labels", "b");
    assert_eq!(article.pending().to_update(), doc!{
        "$push": { "labels": { "$each": ["a", "b"] } }
    });

    Ok(())
}

#[test]
fn assignments_and_operators_share_one_update() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    article.set("title", "Hello")?;
    article.add_to_set("labels", "news").pull("labels", "draft");
    article.save(true)?;

    match driver.io().as_slice() {
        [Call::Update { update, .. }] => assert_eq!(update, &doc!{
            "$set": { "t": "Hello" },
            "$pull": { "labels": "draft" },
            "$addToSet": { "labels": "news" },
        }),
        other => panic!("expected a single update, got {:?}", other),
    }

    Ok(())
}

#[test]
fn saving_an_unchanged_document_does_nothing() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    article.save(true)?;
    assert!(driver.io().is_empty());

    Ok(())
}

#[test]
fn dirty_field_is_reloaded_exactly_once() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    article.inc("views", 1)?;
    article.save(true)?;
    assert!(article.is_dirty("views"));

    driver.forget();
    driver.results(vec![doc!{ "_id": KNOWN_ID.clone(), "views": 11 }]);

    assert_eq!(article.get("views")?, Some(Bson::I32(11)));
    assert_eq!(article.get("views")?, Some(Bson::I32(11)));
    assert!(!article.is_dirty("views"));

    match driver.io().as_slice() {
        [Call::Find { spec, .. }] => {
            assert_eq!(spec.criteria, doc!{ "_id": KNOWN_ID.clone() });
            assert_eq!(spec.limit, Some(1));
        }
        other => panic!("expected a single query, got {:?}", other),
    }

    Ok(())
}

#[test]
fn hex_ids_are_converted_and_loaded_lazily() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_HEX)?;

    assert_eq!(article.id(), Some(&Bson::ObjectId(KNOWN_ID.clone())));
    assert_eq!(article.get("id")?, Some(Bson::ObjectId(KNOWN_ID.clone())));
    assert!(driver.io().is_empty());

    driver.results(vec![doc!{ "_id": KNOWN_ID.clone(), "name": "Mongo", "t": "Intro" }]);

    assert_eq!(article.get("name")?, Some(Bson::from("Mongo")));
    assert_eq!(article.get("title")?, Some(Bson::from("Intro")));
    assert_eq!(article.load_state(), LoadState::Succeeded);
    assert_eq!(driver.io().len(), 1);

    Ok(())
}

#[test]
fn explicit_load_then_reads_need_no_io() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;

    driver.results(vec![doc!{ "_id": KNOWN_ID.clone(), "name": "Mongo" }]);
    article.load(doc!{ "_id": KNOWN_ID.clone() })?;
    driver.forget();

    assert_eq!(article.get("name")?, Some(Bson::from("Mongo")));
    assert_eq!(article.id(), Some(&Bson::ObjectId(KNOWN_ID.clone())));
    assert!(driver.io().is_empty());

    Ok(())
}

#[test]
fn missing_document_fails_to_load() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_criteria("Article", ("title", "Nope"))?;

    assert_eq!(article.get("name")?, None);
    assert_eq!(article.load_state(), LoadState::Failed);

    match driver.io().as_slice() {
        [Call::Find { spec, .. }] => assert_eq!(spec.criteria, doc!{ "t": "Nope" }),
        other => panic!("expected a single query, got {:?}", other),
    }

    Ok(())
}

#[test]
fn local_assignments_survive_a_load() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    article.set("name", "Local")?;
    driver.results(vec![doc!{ "_id": KNOWN_ID.clone(), "name": "Remote", "views": 2 }]);

    assert_eq!(article.get("views")?, Some(Bson::I32(2)));
    assert_eq!(article.get("name")?, Some(Bson::from("Local")));
    assert!(article.is_changed("name"));

    Ok(())
}

#[test]
fn values_round_trip_through_as_array() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;

    let values = doc!{ "_id": KNOWN_ID.clone(), "t": "Hello", "views": 3 };
    article.load_values(values.clone(), true)?;

    assert_eq!(article.as_array(true), values);
    assert_eq!(article.as_array(false), Document::new());
    assert_eq!(article.get("title")?, Some(Bson::from("Hello")));

    article.set("title", "Bye")?;
    article.load_values(doc!{ "views": 4 }, false)?;

    assert_eq!(article.as_array(false), doc!{ "t": "Bye", "views": 4 });
    assert_eq!(article.get("title")?, Some(Bson::from("Bye")));
    assert!(driver.io().is_empty());

    Ok(())
}

#[test]
fn assigning_an_equal_value_is_not_a_change() -> Result<()> {
    let (registry, _) = setup();
    let mut article = registry.doc("Article")?;

    article.load_values(doc!{ "_id": 1, "name": "Same" }, true)?;
    article.set("name", "Same")?;

    assert!(!article.is_changed("name"));

    Ok(())
}

#[test]
fn assigning_an_id_forces_an_insert() -> Result<()> {
    let (registry, driver) = setup();
    let mut user = registry.doc("User")?;

    user.set_id(42)?.set("name", "Ann")?;
    user.save(true)?;

    match driver.io().as_slice() {
        [Call::Insert { document, .. }] => assert_eq!(document, &doc!{ "_id": 42, "name": "Ann" }),
        other => panic!("expected a single insert, got {:?}", other),
    }

    Ok(())
}

#[test]
fn operators_on_a_new_document_follow_its_insert() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;

    article.set("name", "Mongo")?.inc("views", 1)?;
    article.save(true)?;

    let io = driver.io();
    let id = inserted_id(&io[0]).expect("inserted document has an id");

    assert_eq!(io.len(), 2);
    assert_eq!(io[1], Call::Update {
        namespace: "test.articles".into(),
        criteria: doc!{ "_id": id },
        update: doc!{ "$inc": { "views": 1 } },
        options: UpdateOptions::default(),
    });
    assert!(article.is_dirty("views"));

    Ok(())
}

#[test]
fn failed_save_reports_the_store_code() -> Result<()> {
    let (registry, driver) = setup();
    let mut user = registry.doc("User")?;

    driver.ack(WriteAck::failed("duplicate key", Some(11000)));
    user.set("email", "a@b.c")?;

    let error = user.save(true).unwrap_err();
    let cause = error.reason().expect("save errors have a cause");

    assert!(error.to_string().contains("error saving User"));
    assert!(cause.to_string().contains("duplicate key"));
    assert!(user.is_changed("email"));

    Ok(())
}

#[test]
fn unacknowledged_save_ignores_failures() -> Result<()> {
    let (registry, driver) = setup();
    let mut user = registry.doc("User")?;

    driver.ack(WriteAck::failed("duplicate key", Some(11000)));
    user.set("email", "a@b.c")?;
    user.save(false)?;

    assert!(!user.is_changed("email"));

    Ok(())
}

#[test]
fn dotted_assignment_is_queued_as_set() -> Result<()> {
    let (registry, _) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    article.set("title.en", "Hello")?;

    assert_eq!(article.pending().to_update(), doc!{ "$set": { "t.en": "Hello" } });
    assert!(article.is_dirty("title"));

    Ok(())
}

#[test]
fn upsert_uses_fields_as_criteria() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;

    driver.ack(WriteAck {
        upserted: Some(Bson::ObjectId(KNOWN_ID.clone())),
        ..WriteAck::ok(1)
    });

    article.set("name", "Mongo")?.inc("views", 1)?;
    article.upsert(doc!{ "$addToSet": { "title": "x" } })?;

    match driver.io().as_slice() {
        [Call::Update { criteria, update, options, .. }] => {
            assert_eq!(criteria, &doc!{ "name": "Mongo" });
            assert_eq!(update, &doc!{ "$inc": { "views": 1 }, "$addToSet": { "t": "x" } });
            assert!(options.upsert);
        }
        other => panic!("expected a single update, got {:?}", other),
    }

    assert_eq!(article.id(), Some(&Bson::ObjectId(KNOWN_ID.clone())));
    assert!(article.is_dirty("views"));
    assert!(article.is_dirty("title"));

    Ok(())
}

#[test]
fn upsert_validates_its_input() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;

    assert_eq!(article.upsert(doc!{ "$inc": { "n": 1 } }).unwrap_err().kind(), ErrorKind::Validation);

    article.set("name", "Mongo")?;
    assert_eq!(article.upsert(Document::new()).unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(article.upsert(doc!{ "$frobnicate": { "n": 1 } }).unwrap_err().kind(), ErrorKind::Validation);
    assert!(driver.io().is_empty());

    Ok(())
}

#[test]
fn delete_requires_an_id_and_clears_state() -> Result<()> {
    let (registry, driver) = setup();
    let mut fresh = registry.doc("Article")?;

    assert_eq!(fresh.delete().unwrap_err().kind(), ErrorKind::Validation);

    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;
    article.delete()?;

    match driver.io().as_slice() {
        [Call::Remove { criteria, options, .. }] => {
            assert_eq!(criteria, &doc!{ "_id": KNOWN_ID.clone() });
            assert!(options.just_one);
        }
        other => panic!("expected a single removal, got {:?}", other),
    }

    assert_eq!(article.id(), None);
    assert_eq!(article.load_state(), LoadState::NotAttempted);

    Ok(())
}

#[test]
fn unsaved_id_cannot_be_deleted() -> Result<()> {
    let (registry, driver) = setup();
    let mut user = registry.doc("User")?;

    user.set_id(42)?.set("name", "Ann")?;

    assert_eq!(user.delete().unwrap_err().kind(), ErrorKind::Validation);
    assert!(driver.io().is_empty());
    assert_eq!(user.id(), Some(&Bson::I32(42)));
    assert!(user.is_changed("name"));

    Ok(())
}

#[test]
fn field_with_queued_operator_is_not_reloaded_before_save() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    driver.results(vec![doc!{ "_id": KNOWN_ID.clone(), "views": 10 }]);
    assert_eq!(article.get("views")?, Some(Bson::I32(10)));

    article.inc("views", 1)?;
    assert_eq!(article.get("views")?, Some(Bson::I32(10)));
    assert!(article.is_dirty("views"));
    assert_eq!(driver.io().len(), 1);

    article.save(true)?;
    driver.results(vec![doc!{ "_id": KNOWN_ID.clone(), "views": 11 }]);

    assert_eq!(article.get("views")?, Some(Bson::I32(11)));
    assert!(!article.is_dirty("views"));
    assert_eq!(driver.io().len(), 3);

    Ok(())
}

#[test]
fn single_reference_resolves_lazily() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;

    article.load_values(doc!{ "_id": 1, "author_id": 7 }, true)?;

    {
        let author = article.related("author")?.as_doc_mut().expect("single reference");
        assert_eq!(author.model().name(), "User");
        assert_eq!(author.id(), Some(&Bson::I32(7)));
    }
    assert!(driver.io().is_empty());

    driver.results(vec![doc!{ "_id": 7, "name": "Ann" }]);

    let author = article.related("author")?.as_doc_mut().expect("single reference");
    assert_eq!(author.get("name")?, Some(Bson::from("Ann")));
    assert_eq!(driver.io().len(), 1);

    Ok(())
}

#[test]
fn multiple_reference_queries_by_native_ids() -> Result<()> {
    let (registry, _) = setup();
    let mut article = registry.doc("Article")?;

    article.load_values(doc!{ "_id": 1, "tag_ids": [KNOWN_HEX, "plain"] }, true)?;

    let tags = article.related("tags")?.as_collection_mut().expect("multiple reference");
    assert_eq!(tags.name(), "tags");
    assert_eq!(tags.criteria(), &doc!{
        "_id": { "$in": [Bson::ObjectId(KNOWN_ID.clone()), Bson::from("plain")] }
    });

    Ok(())
}

#[test]
fn reverse_reference_needs_an_id() -> Result<()> {
    let (registry, _) = setup();
    let mut fresh = registry.doc("Article")?;

    assert_eq!(fresh.related("comments").unwrap_err().kind(), ErrorKind::MissingId);

    let mut article = registry.doc_with_id("Article", 3)?;
    let comments = article.related("comments")?.as_collection_mut().expect("reverse reference");

    assert_eq!(comments.criteria(), &doc!{ "article_id": 3 });

    Ok(())
}

#[test]
fn named_search_carries_its_options() -> Result<()> {
    let (registry, _) = setup();
    let mut article = registry.doc_with_id("Article", 3)?;
    let approved = article.related("approved")?.as_collection_mut().expect("search");

    assert_eq!(Collection::inspect(approved),
               r#"test.comments.find({"approved":true},{}).sort({"date":-1}).limit(5)"#);

    let mut other = registry.doc("Article")?;
    assert_eq!(other.related("nonexistent").unwrap_err().kind(), ErrorKind::Validation);

    Ok(())
}

#[test]
fn referenced_ids_are_synchronized_on_save() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc("Article")?;

    article.set("name", "Mongo")?;
    article.related("author")?.as_doc_mut().expect("single reference").set_id(5)?;
    article.save(true)?;

    match driver.io().as_slice() {
        [Call::Insert { document, .. }] => {
            assert_eq!(document.get("name"), Some(&Bson::from("Mongo")));
            assert_eq!(document.get("author_id"), Some(&Bson::I32(5)));
        }
        other => panic!("expected a single insert, got {:?}", other),
    }

    Ok(())
}

#[test]
fn references_are_assigned_through_documents() -> Result<()> {
    let (registry, _) = setup();
    let mut article = registry.doc("Article")?;
    let user = registry.doc_with_id("User", 9)?;

    assert_eq!(article.set("author", 9).unwrap_err().kind(), ErrorKind::Validation);

    article.set_related("author", user)?;
    assert!(article.is_changed("author_id"));
    assert_eq!(article.as_array(false), doc!{ "author_id": 9 });

    let tags = registry.doc("Tag")?;
    assert_eq!(article.set_related("tags", tags).unwrap_err().kind(), ErrorKind::Validation);

    Ok(())
}

/// Records the hooks called, and stamps documents before they are saved.
#[derive(Debug, Clone, Default)]
struct Audit {
    events: Rc<RefCell<Vec<String>>>,
}

impl Hooks for Audit {
    fn before_save(&self, doc: &mut Doc, action: SaveAction) -> Result<()> {
        self.events.borrow_mut().push(format!("before_save {:?}", action));
        doc.set("stamp", "audited")?;
        Ok(())
    }

    fn after_save(&self, _: &mut Doc, action: SaveAction) -> Result<()> {
        self.events.borrow_mut().push(format!("after_save {:?}", action));
        Ok(())
    }

    fn before_delete(&self, _: &mut Doc) -> Result<()> {
        Err(Error::new(ErrorKind::Validation, "audited documents are forever"))
    }
}

#[test]
fn hooks_run_around_persistence() -> Result<()> {
    let (registry, driver) = setup();
    let audit = Audit::default();

    registry.register(Model::new("Entry", "entries").hooks(audit.clone()));

    let mut entry = registry.doc("Entry")?;
    entry.set("text", "hi")?;
    entry.save(true)?;

    match driver.io().as_slice() {
        [Call::Insert { document, .. }] => assert_eq!(document.get("stamp"), Some(&Bson::from("audited"))),
        other => panic!("expected a single insert, got {:?}", other),
    }
    assert_eq!(*audit.events.borrow(), vec!["before_save Insert", "after_save Insert"]);

    driver.forget();
    assert_eq!(entry.delete().unwrap_err().kind(), ErrorKind::Validation);
    assert!(driver.io().is_empty());
    assert!(entry.id().is_some());

    Ok(())
}

#[test]
fn store_code_of_failed_delete_is_kept() -> Result<()> {
    let (registry, driver) = setup();
    let mut article = registry.doc_with_id("Article", KNOWN_ID.clone())?;

    driver.ack(WriteAck::failed("not authorized", Some(13)));

    let error = article.delete().unwrap_err();
    let cause = error.reason().expect("delete errors have a cause");
    let write = cause.as_std_error().downcast_ref::<Error>().expect("cause is a guava error");

    assert_eq!(write.kind(), ErrorKind::Write);
    assert_eq!(write.context::<StoreCode>(), Some(&13));

    Ok(())
}
