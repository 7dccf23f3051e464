//! Atomic update operators, accumulated until a document is saved.
//!
//! Repeated operations on the same field are folded together instead of
//! piling up: two increments add up, a second `push` turns into a
//! `pushAll` list, and so on. The accumulated operators are compiled into a
//! single update document when they are flushed.

use std::fmt;
use std::collections::BTreeSet;
use bson::{ Bson, Document };
use crate::{
    literal::BitOp,
    merge::put,
    error::{ Error, ErrorKind, Result },
};

/// A named atomic update instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
    /// Set a (possibly nested) field.
    Set,
    /// Remove a field.
    Unset,
    /// Add a number to a numeric field.
    Inc,
    /// Append a value to an array.
    Push,
    /// Append several values to an array.
    PushAll,
    /// Remove every array element equal to a value.
    Pull,
    /// Remove every array element equal to any of several values.
    PullAll,
    /// Append values to an array unless already present.
    AddToSet,
    /// Remove the first or last element of an array.
    Pop,
    /// Bitwise update of an integer field.
    Bit,
}

impl Operator {
    /// Every operator, in the order they are compiled.
    pub const ALL: [Operator; 10] = [
        Operator::Set,
        Operator::Unset,
        Operator::Inc,
        Operator::Push,
        Operator::PushAll,
        Operator::Pull,
        Operator::PullAll,
        Operator::AddToSet,
        Operator::Pop,
        Operator::Bit,
    ];

    /// The key of this operator in an update document.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Set      => "$set",
            Operator::Unset    => "$unset",
            Operator::Inc      => "$inc",
            Operator::Push     => "$push",
            Operator::PushAll  => "$pushAll",
            Operator::Pull     => "$pull",
            Operator::PullAll  => "$pullAll",
            Operator::AddToSet => "$addToSet",
            Operator::Pop      => "$pop",
            Operator::Bit      => "$bit",
        }
    }

    /// Looks up an operator by its update document key.
    pub fn from_key(key: &str) -> Option<Operator> {
        Operator::ALL.iter().cloned().find(|op| op.as_str() == key)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The top-level field a (possibly dotted) path belongs to.
pub fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Operators queued on a document but not yet sent to the database.
///
/// Internally this is an update document keyed by operator name, each
/// mapping field paths to operands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingOps {
    /// `{ "$op": { "field": operand, ... }, ... }`
    ops: Document,
}

impl PendingOps {
    /// An empty set of pending operations.
    pub fn new() -> Self {
        PendingOps::default()
    }

    /// Validates and wraps a caller-supplied update operator document.
    pub fn from_document(ops: Document) -> Result<Self> {
        for (key, value) in ops.iter() {
            if Operator::from_key(key).is_none() {
                return Err(Error::new(
                    ErrorKind::Validation,
                    format!("unknown update operator `{}`", key)
                ));
            }
            match *value {
                Bson::Document(_) => {}
                _ => return Err(Error::new(
                    ErrorKind::Validation,
                    format!("operand of `{}` must be a document", key)
                )),
            }
        }

        Ok(PendingOps { ops })
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The raw operator document, exactly as accumulated.
    pub fn as_document(&self) -> &Document {
        &self.ops
    }

    /// The queued operand of `op` for `field`, if any.
    pub fn get(&self, op: Operator, field: &str) -> Option<&Bson> {
        self.ops.get_document(op.as_str()).ok().and_then(|fields| fields.get(field))
    }

    /// The top-level names of every field affected by a queued operator.
    pub fn fields(&self) -> BTreeSet<String> {
        self.ops
            .iter()
            .filter_map(|(_, fields)| match *fields {
                Bson::Document(ref fields) => Some(fields),
                _ => None,
            })
            .flat_map(|fields| fields.keys())
            .map(|path| top_level(path).to_owned())
            .collect()
    }

    /// Discards every queued operator.
    pub fn clear(&mut self) {
        self.ops = Document::new();
    }

    /// Sets `field` (which may be a dotted path) to `value`.
    pub fn set(&mut self, field: &str, value: Bson) {
        self.put(Operator::Set, field, value);
    }

    /// Removes `field`.
    pub fn unset(&mut self, field: &str) {
        self.remove(Operator::Set, field);
        self.put(Operator::Unset, field, Bson::I32(1));
    }

    /// Increments `field` by `amount`, adding up repeated increments.
    pub fn inc(&mut self, field: &str, amount: Bson) -> Result<()> {
        let total = match self.get(Operator::Inc, field) {
            Some(old) => add_numbers(old, &amount),
            None => add_numbers(&Bson::I32(0), &amount),
        };
        let total = total.ok_or_else(|| Error::new(
            ErrorKind::Validation,
            format!("can't increment `{}` by non-numeric {}", field, amount)
        ))?;

        self.put(Operator::Inc, field, total);
        Ok(())
    }

    /// Appends `value` to the array `field`. A second push on the same
    /// field escalates to a `pushAll` of both values.
    pub fn push(&mut self, field: &str, value: Bson) {
        self.append_escalating(Operator::Push, Operator::PushAll, field, vec![value]);
    }

    /// Appends every element of `values` to the array `field`.
    pub fn push_all(&mut self, field: &str, values: Vec<Bson>) {
        self.append_all(Operator::Push, Operator::PushAll, field, values);
    }

    /// Removes every occurrence of `value` from the array `field`.
    /// A second pull on the same field escalates to a `pullAll`.
    pub fn pull(&mut self, field: &str, value: Bson) {
        self.append_escalating(Operator::Pull, Operator::PullAll, field, vec![value]);
    }

    /// Removes every occurrence of each of `values` from the array `field`.
    pub fn pull_all(&mut self, field: &str, values: Vec<Bson>) {
        self.append_all(Operator::Pull, Operator::PullAll, field, values);
    }

    /// Adds `value` to the array `field` unless it is already present.
    /// Repeated calls collect the values into a single `$each` list.
    pub fn add_to_set(&mut self, field: &str, value: Bson) {
        let values = match self.get(Operator::AddToSet, field) {
            None => {
                self.put(Operator::AddToSet, field, value);
                return;
            }
            Some(&Bson::Document(ref each)) if each.contains_key("$each") => {
                match each.get("$each") {
                    Some(&Bson::Array(ref values)) => values.clone(),
                    _ => Vec::new(),
                }
            }
            Some(old) => vec![old.clone()],
        };

        let mut values = values;
        if !values.contains(&value) {
            values.push(value);
        }

        let mut each = Document::new();
        each.insert("$each", values);
        self.put(Operator::AddToSet, field, Bson::Document(each));
    }

    /// Removes the last element of the array `field`.
    pub fn pop(&mut self, field: &str) {
        self.put(Operator::Pop, field, Bson::I32(1));
    }

    /// Removes the first element of the array `field`.
    pub fn shift(&mut self, field: &str) {
        self.put(Operator::Pop, field, Bson::I32(-1));
    }

    /// Applies a bitwise operation to the integer `field`. Different
    /// operations on the same field are kept side by side.
    pub fn bit(&mut self, field: &str, op: BitOp, operand: Bson) {
        let mut ops = match self.get(Operator::Bit, field) {
            Some(&Bson::Document(ref ops)) => ops.clone(),
            _ => Document::new(),
        };

        put(&mut ops, op.as_str(), operand);
        self.put(Operator::Bit, field, Bson::Document(ops));
    }

    /// Compiles the queued operators into an update document for the
    /// server. `$pushAll` lists are sent as `$push` with `$each`.
    pub fn to_update(&self) -> Document {
        let mut update = Document::new();

        for op in Operator::ALL.iter().cloned() {
            let fields = match self.ops.get_document(op.as_str()) {
                Ok(fields) => fields,
                Err(_) => continue,
            };

            let (key, fields) = match op {
                Operator::PushAll => {
                    let each = fields
                        .iter()
                        .map(|(field, values)| {
                            let mut each = Document::new();
                            each.insert("$each", values.clone());
                            (field.clone(), Bson::Document(each))
                        })
                        .collect();
                    (Operator::Push.as_str(), each)
                }
                _ => (op.as_str(), fields.clone()),
            };

            let merged = match update.get_document(key) {
                Ok(existing) => crate::merge::merge(existing, &fields),
                Err(_) => fields,
            };
            put(&mut update, key, Bson::Document(merged));
        }

        update
    }

    /// Inserts or replaces the operand of `op` for `field`.
    fn put(&mut self, op: Operator, field: &str, value: Bson) {
        let mut fields = self.ops.get_document(op.as_str()).map(Clone::clone).unwrap_or_default();
        put(&mut fields, field, value);
        put(&mut self.ops, op.as_str(), Bson::Document(fields));
    }

    /// Removes the operand of `op` for `field`, and `op` itself if that
    /// leaves it without fields. Returns the removed operand.
    fn remove(&mut self, op: Operator, field: &str) -> Option<Bson> {
        let mut fields = self.ops.get_document(op.as_str()).ok()?.clone();
        let removed = fields.remove(field);

        if fields.is_empty() {
            self.ops.remove(op.as_str());
        } else {
            put(&mut self.ops, op.as_str(), Bson::Document(fields));
        }

        removed
    }

    /// Helper for `push()` and `pull()`: queues the single operator the
    /// first time, and escalates to the list operator from then on.
    fn append_escalating(&mut self, single: Operator, list: Operator, field: &str, values: Vec<Bson>) {
        let is_fresh = self.get(single, field).is_none() && self.get(list, field).is_none();

        match values.len() {
            1 if is_fresh => {
                let mut values = values;
                if let Some(value) = values.pop() {
                    self.put(single, field, value);
                }
            }
            _ => self.append_all(single, list, field, values),
        }
    }

    /// Helper for `push_all()` and `pull_all()`: folds any queued single
    /// operand and `values` into the list operator.
    fn append_all(&mut self, single: Operator, list: Operator, field: &str, values: Vec<Bson>) {
        let mut all = match self.remove(list, field) {
            Some(Bson::Array(old)) => old,
            _ => Vec::new(),
        };

        if let Some(old) = self.remove(single, field) {
            all.insert(0, old);
        }

        all.extend(values);
        self.put(list, field, Bson::Array(all));
    }
}

/// Adds two BSON numbers, widening as needed. Returns `None` if either
/// operand is not a number.
#[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
fn add_numbers(a: &Bson, b: &Bson) -> Option<Bson> {
    match (a, b) {
        (&Bson::I32(x), &Bson::I32(y)) => Some(
            x.checked_add(y).map_or_else(|| Bson::I64(i64::from(x) + i64::from(y)), Bson::I32)
        ),
        (&Bson::I32(x), &Bson::I64(y)) => Some(Bson::I64(i64::from(x).wrapping_add(y))),
        (&Bson::I64(x), &Bson::I32(y)) => Some(Bson::I64(x.wrapping_add(i64::from(y)))),
        (&Bson::I64(x), &Bson::I64(y)) => Some(Bson::I64(x.wrapping_add(y))),
        (&Bson::FloatingPoint(x), &Bson::FloatingPoint(y)) => Some(Bson::FloatingPoint(x + y)),
        (&Bson::FloatingPoint(x), &Bson::I32(y)) => Some(Bson::FloatingPoint(x + y as f64)),
        (&Bson::FloatingPoint(x), &Bson::I64(y)) => Some(Bson::FloatingPoint(x + y as f64)),
        (&Bson::I32(x), &Bson::FloatingPoint(y)) => Some(Bson::FloatingPoint(x as f64 + y)),
        (&Bson::I64(x), &Bson::FloatingPoint(y)) => Some(Bson::FloatingPoint(x as f64 + y)),
        _ => None,
    }
}
