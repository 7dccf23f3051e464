//! Primary keys.

use bson::{ Bson, oid::ObjectId };
use crate::error::Result;

/// The stored name of the primary key.
pub const ID_FIELD: &str = "_id";

/// Converts an id given as a 24-character hexadecimal string into the
/// store's native `ObjectId`. Every other value is returned unchanged.
///
/// ```
/// # extern crate bson;
/// # extern crate guava;
/// #
/// # use bson::Bson;
/// # use guava::id::to_native_id;
/// #
/// # fn main() {
/// let native = to_native_id(Bson::from("5a0a4f3e2b1c0d9e8f7a6b5c"));
/// assert!(match native { Bson::ObjectId(_) => true, _ => false });
///
/// assert_eq!(to_native_id(Bson::from("abc123")), Bson::from("abc123"));
/// assert_eq!(to_native_id(Bson::I32(42)), Bson::I32(42));
/// # }
/// ```
pub fn to_native_id(id: Bson) -> Bson {
    match id {
        Bson::String(ref s) if is_object_id_str(s) => {
            ObjectId::with_string(s).map_or_else(|_| id.clone(), Bson::ObjectId)
        }
        other => other,
    }
}

/// Generates a fresh `ObjectId` for a document about to be inserted.
pub fn new_object_id() -> Result<Bson> {
    ObjectId::new().map(Bson::ObjectId).map_err(Into::into)
}

/// Returns `true` if `s` looks like the hex representation of an `ObjectId`.
fn is_object_id_str(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
