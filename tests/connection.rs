//! Integration tests for the registry and for named connections: lazy
//! connecting, commands, auto-increment counters and configuration errors.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate bson;
extern crate guava;

mod common;

use guava::prelude::*;
use guava::error::StoreCode;
use common::{ Call, MemoryDriver, setup };

#[test]
fn unknown_connection_without_config_fails() {
    let (registry, _) = setup();
    let error = registry.connection("reporting", None).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn invalid_config_is_rejected() {
    let registry = Registry::new(MemoryDriver::default());
    let mut config = ConnectionConfig::new("test");
    config.password = Some(String::from("secret"));

    assert_eq!(registry.connection("default", Some(config)).unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(registry.connection("other", Some(ConnectionConfig::new(""))).unwrap_err().kind(),
               ErrorKind::Configuration);
}

#[test]
fn connects_lazily_and_once() -> Result<()> {
    let (registry, driver) = setup();
    let conn = registry.connection("default", None)?;

    assert!(!conn.is_connected());
    assert!(driver.calls().is_empty());

    conn.select_collection("a")?;
    conn.select_collection("b")?;

    assert!(conn.is_connected());
    assert_eq!(driver.calls(), vec![Call::Connect(String::from("mongodb://localhost:27017/test"))]);

    Ok(())
}

#[test]
fn models_use_their_own_connection_and_database() -> Result<()> {
    let (registry, _) = setup();

    registry.connection("archive", Some(ConnectionConfig::new("cold")))?;
    registry.register(Model::new("Log", "logs").connection("archive"));
    registry.register(Model::new("Event", "events").connection("archive").database("audit"));

    assert_eq!(registry.collection("Log")?.namespace().to_string(), "cold.logs");
    assert_eq!(registry.collection("Event")?.namespace().to_string(), "audit.events");

    registry.register(Model::new("Orphan", "orphans").connection("nowhere"));
    assert_eq!(registry.collection("Orphan").unwrap_err().kind(), ErrorKind::Configuration);

    Ok(())
}

#[test]
fn grid_storage_selects_the_file_collection() -> Result<()> {
    let (registry, _) = setup();
    let files = registry.connection("default", None)?.select_grid_storage("fs")?;

    assert_eq!(files.name(), "fs.files");
    assert!(files.is_grid_storage());

    Ok(())
}

#[test]
fn successful_command_returns_the_reply() -> Result<()> {
    let (registry, driver) = setup();
    let conn = registry.connection("default", None)?;

    driver.reply(doc!{ "ok": 1.0, "n": 4 });

    let reply = conn.execute_command_safe("{ count: 'articles' }")?;
    assert_eq!(reply.get_i32("n")?, 4);

    match driver.io().as_slice() {
        [Call::Command { database, command }] => {
            assert_eq!(database, "test");
            assert_eq!(command, &doc!{ "count": "articles" });
        }
        other => panic!("expected a single command, got {:?}", other),
    }

    Ok(())
}

#[test]
fn failed_command_is_a_command_error() -> Result<()> {
    let (registry, driver) = setup();
    let conn = registry.connection("default", None)?;

    driver.reply(doc!{ "ok": 0.0, "errmsg": "ns not found", "code": 26 });

    let error = conn.execute_command_safe(("drop", "missing")).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Command);
    assert_eq!(error.context::<StoreCode>(), Some(&26));
    assert!(error.message().contains("ns not found"));

    Ok(())
}

#[test]
fn out_of_range_error_code_is_dropped() -> Result<()> {
    let (registry, driver) = setup();
    let conn = registry.connection("default", None)?;

    driver.reply(doc!{ "ok": 0.0, "errmsg": "odd failure", "code": 1_i64 << 40 });

    let error = conn.execute_command_safe(("ping", 1)).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Command);
    assert_eq!(error.context::<StoreCode>(), None);

    Ok(())
}

#[test]
fn unknown_command_is_method_not_found() -> Result<()> {
    let (registry, driver) = setup();
    let conn = registry.connection("default", None)?;

    driver.reply(doc!{ "ok": 0.0, "errmsg": "no such command: 'frobnicate'", "code": 59 });
    driver.reply(doc!{ "ok": 0, "errmsg": "no such cmd: frobnicate" });

    let by_code = conn.execute_command_safe(("frobnicate", 1)).unwrap_err();
    let by_message = conn.execute_command_safe(("frobnicate", 1)).unwrap_err();

    assert_eq!(by_code.kind(), ErrorKind::MethodNotFound);
    assert_eq!(by_message.kind(), ErrorKind::MethodNotFound);

    Ok(())
}

#[test]
fn auto_increment_uses_find_and_modify() -> Result<()> {
    let (registry, driver) = setup();
    let conn = registry.connection("default", None)?;

    driver.reply(doc!{ "ok": 1.0, "value": { "_id": "orders", "seq": 3_i64 } });
    driver.reply(doc!{ "ok": 1.0, "value": { "_id": "invoices", "seq": 1 } });

    assert_eq!(conn.get_next_auto_increment("orders", None)?, 3);
    assert_eq!(conn.get_next_auto_increment("invoices", Some("sequences"))?, 1);

    match driver.io().as_slice() {
        [Call::Command { command: first, .. }, Call::Command { command: second, .. }] => {
            assert_eq!(first, &doc!{
                "findAndModify": "counters",
                "query": { "_id": "orders" },
                "update": { "$inc": { "seq": 1_i64 } },
                "new": true,
                "upsert": true,
            });
            assert_eq!(second.get_str("findAndModify")?, "sequences");
        }
        other => panic!("expected two commands, got {:?}", other),
    }

    Ok(())
}

#[test]
fn auto_increment_needs_a_counter() -> Result<()> {
    let (registry, driver) = setup();
    let conn = registry.connection("default", None)?;

    driver.reply(doc!{ "ok": 1.0, "value": null });

    let error = conn.get_next_auto_increment("orders", None).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::MissingDocumentField);

    Ok(())
}

#[test]
fn reset_closes_connections_and_forgets_models() -> Result<()> {
    let (registry, driver) = setup();

    registry.connection("default", None)?.select_collection("a")?;
    registry.reset()?;

    assert_eq!(driver.calls().last(), Some(&Call::Close));
    assert_eq!(registry.doc("Article").unwrap_err().kind(), ErrorKind::Configuration);

    Ok(())
}
