//! Guava, the change-tracking MongoDB document mapper
//!
//! Documents of any kind are served by a single engine, `doc::Doc`,
//! configured by a declarative `model::Model`. A `Doc` records which fields
//! were assigned and which atomic update operators were queued, and writes
//! them back in as few round trips as possible. Fields touched by operators
//! are reloaded lazily the next time they are read.
//!
//! Queries are built on a `coll::Collection`, which accumulates criteria
//! and options until its results are iterated. Connections, models and the
//! driver they talk through are owned by a `registry::Registry`.

#![doc(html_root_url = "https://docs.rs/guava/0.1.0")]
#![deny(missing_debug_implementations,
        trivial_casts,
        unsafe_code,
        unstable_features,
        unused_import_braces, missing_docs)]
#![allow(clippy::single_match, clippy::match_same_arms, clippy::match_ref_pats,
         clippy::clone_on_ref_ptr, clippy::needless_pass_by_value)]
#![deny(clippy::used_underscore_binding,
        clippy::similar_names,
        clippy::missing_docs_in_private_items,
        clippy::unicode_not_nfc,
        clippy::int_plus_one, clippy::string_add_assign,
        clippy::invalid_upcast_comparisons,
        clippy::cast_precision_loss, clippy::cast_lossless,
        clippy::cast_possible_wrap, clippy::cast_possible_truncation,
        clippy::mutex_integer, clippy::mut_mut, clippy::items_after_statements,
        clippy::print_stdout, clippy::mem_forget, clippy::maybe_infinite_iter)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate bson;
extern crate mongodb;
#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate backtrace;
extern crate typemap;
#[macro_use]
extern crate log;

pub mod registry;
pub mod connection;
pub mod config;
pub mod driver;
pub mod model;
pub mod doc;
pub mod coll;
pub mod cursor;
pub mod ops;
pub mod merge;
pub mod literal;
pub mod bsn;
pub mod id;
pub mod utils;
pub mod error;
pub mod prelude;
