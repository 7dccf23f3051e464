//! Merging of query criteria and update operator documents.

use bson::{ Bson, Document };

/// Operators whose operand lists combine by set union when merged:
/// requiring all of `A` and all of `B` means requiring all of `A ∪ B`
/// (and excluding `A` and `B` means excluding `A ∪ B`).
const UNION_OPERATORS: &[&str] = &["$all", "$nin"];

/// Operators whose operand lists combine by set intersection when merged:
/// being in `A` and in `B` means being in `A ∩ B`.
const INTERSECT_OPERATORS: &[&str] = &["$in"];

/// Recursively merges `incoming` into `base`.
///
/// * Keys of `incoming` overwrite keys of `base`, except when both values
///   are documents: these are merged recursively.
/// * The array operands of `$all` and `$nin` are unioned, and those of `$in`
///   are intersected, so that two criteria on the same field combine into a
///   single consistent operator without duplicates.
/// * Keys keep the order of `base`; keys new in `incoming` follow, in their
///   own order.
///
/// ```
/// # #[macro_use]
/// # extern crate bson;
/// # extern crate guava;
/// #
/// # use guava::merge::merge;
/// #
/// # fn main() {
/// let base = doc!{ "tags": { "$all": ["a", "b"] }, "n": 1 };
/// let incoming = doc!{ "tags": { "$all": ["b", "c"] }, "m": 2 };
///
/// assert_eq!(merge(&base, &incoming), doc!{
///     "tags": { "$all": ["a", "b", "c"] },
///     "n": 1,
///     "m": 2,
/// });
/// # }
/// ```
pub fn merge(base: &Document, incoming: &Document) -> Document {
    let mut merged = base.clone();

    for (key, value) in incoming.iter() {
        let combined = match (merged.get(key), value) {
            (Some(&Bson::Document(ref old)), &Bson::Document(ref new)) => {
                Bson::Document(merge(old, new))
            }
            (Some(&Bson::Array(ref old)), &Bson::Array(ref new))
                if UNION_OPERATORS.contains(&key.as_str()) => {
                Bson::Array(union(old, new))
            }
            (Some(&Bson::Array(ref old)), &Bson::Array(ref new))
                if INTERSECT_OPERATORS.contains(&key.as_str()) => {
                Bson::Array(intersect(old, new))
            }
            _ => value.clone(),
        };

        put(&mut merged, key, combined);
    }

    merged
}

/// Inserts or replaces `key` without moving an existing key to the end,
/// which is what `Document::insert()` does.
pub(crate) fn put(doc: &mut Document, key: &str, value: Bson) {
    match doc.get_mut(key) {
        Some(slot) => *slot = value,
        None => { doc.insert(key, value); }
    }
}

/// Values of `left` followed by the values of `right`, without duplicates.
fn union(left: &[Bson], right: &[Bson]) -> Vec<Bson> {
    let mut values: Vec<Bson> = Vec::with_capacity(left.len() + right.len());

    for value in left.iter().chain(right) {
        if !values.contains(value) {
            values.push(value.clone());
        }
    }

    values
}

/// Values of `left` that are also in `right`, without duplicates.
fn intersect(left: &[Bson], right: &[Bson]) -> Vec<Bson> {
    let mut values: Vec<Bson> = Vec::with_capacity(left.len());

    for value in left {
        if right.contains(value) && !values.contains(value) {
            values.push(value.clone());
        }
    }

    values
}
