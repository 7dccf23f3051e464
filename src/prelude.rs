//! The Guava prelude provides re-exports of the most commonly used traits
//! and types for convenience, including ones from crate `bson`.

pub use crate::registry::Registry;
pub use crate::connection::Connection;
pub use crate::config::ConnectionConfig;
pub use crate::coll::{ Collection, WriteOutcome };
pub use crate::doc::{ Doc, LoadState, Related };
pub use crate::model::{ Model, Reference, Search, Hooks, SaveAction };
pub use crate::driver::{ WriteConcern, UpdateOptions, RemoveOptions };
pub use crate::literal::{ Order, BitOp, CursorFlags };
pub use crate::bsn::IntoDocument;
pub use crate::merge::merge;
pub use crate::error::{ Error, ErrorKind, ErrorExt, Result, ResultExt };
pub use bson::{ Bson, Document, oid::ObjectId };
