//! BSON and (lenient) JSON conversion helpers.

use std::fmt::Write;
use serde_json::Value;
use bson::{ Bson, Document, ValueAccessError };
use crate::error::{ Error, ErrorKind, Result };

/// Methods for dynamically type-checking JSON.
pub trait JsonExt: Sized {
    /// Ensures that this tree of values doesn't contain integers
    /// which are not expressible by `i64` (e.g. too big `u64`s).
    /// Since the `bson` crate just blindly casts integers to `i64`,
    /// the presence of such values would result in over- or underflow
    /// or truncation, leading to potentially hard-to-debug errors.
    ///
    /// If this check succeeds, `self` is converted into a `Bson` tree.
    /// Extended JSON such as `{ "$oid": "..." }` is decoded into the
    /// corresponding BSON type. Preservation of the order of keys in maps
    /// is ensured by the `preserve_order` feature of the `serde_json` crate.
    fn try_into_bson(self) -> Result<Bson>;
}

/// Methods for dynamically type-checking BSON.
pub trait BsonExt: Sized {
    /// Ensures that the BSON value is a `Document` and unwraps it.
    fn try_into_doc(self) -> Result<Document>;

    /// Ensures that the BSON value can be interpreted as a boolean,
    /// and performs the conversion.
    fn try_as_bool(&self) -> Option<bool>;

    /// Interprets any integral BSON number (including integral doubles,
    /// which is how some servers report counts) as an `i64`.
    fn try_as_i64(&self) -> Option<i64>;
}

impl JsonExt for Value {
    fn try_into_bson(self) -> Result<Bson> {
        match self {
            // We need the value to be representable by either an `i64` or an `f64`.
            Value::Number(n) => if n.is_i64() || n.is_f64() {
                bson::to_bson(&n).map_err(Into::into)
            } else {
                Err(Error::new(
                    ErrorKind::BsonNumberRepr,
                    format!("Value `{}` can't be represented in BSON", n)
                ))
            },

            // Check transitively if every element of the array is correct.
            Value::Array(values) => values
                .into_iter()
                .map(JsonExt::try_into_bson)
                .collect::<Result<Vec<_>>>()
                .map(Bson::from),

            // Map keys are always OK because they're strings;
            // therefore, we only need to check the associated values.
            Value::Object(values) => values
                .into_iter()
                .map(|(k, v)| v.try_into_bson().map(|v| (k, v)))
                .collect::<Result<Document>>()
                .map(Bson::from_extended_document),

            // Anything else non-recursive is OK.
            value => Ok(value.into()),
        }
    }
}

impl BsonExt for Bson {
    #[allow(clippy::float_cmp)]
    fn try_as_bool(&self) -> Option<bool> {
        match *self {
            Bson::Boolean(b) => Some(b),
            Bson::I32(0) | Bson::I64(0) => Some(false),
            Bson::I32(1) | Bson::I64(1) => Some(true),
            Bson::FloatingPoint(x) if x == 0.0 => Some(false),
            Bson::FloatingPoint(x) if x == 1.0 => Some(true),
            _ => None,
        }
    }

    #[allow(clippy::float_cmp, clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn try_as_i64(&self) -> Option<i64> {
        match *self {
            Bson::I32(n) => Some(i64::from(n)),
            Bson::I64(n) => Some(n),
            Bson::FloatingPoint(x) if x.trunc() == x && x.abs() < 9.0e15 => Some(x as i64),
            _ => None,
        }
    }

    fn try_into_doc(self) -> Result<Document> {
        match self {
            Bson::Document(doc) => Ok(doc),
            value => Err(Error::with_cause(
                format!("expected Document, got {:?}", value.element_type()),
                ValueAccessError::UnexpectedType,
            ))
        }
    }
}

/// Values accepted wherever criteria, a command, a sort specification or
/// update operators are expected: a `Document`, a single `(key, value)`
/// pair, or a lenient JSON string (see `parse_document()`).
pub trait IntoDocument {
    /// Performs the conversion.
    fn into_document(self) -> Result<Document>;
}

impl IntoDocument for Document {
    fn into_document(self) -> Result<Document> {
        Ok(self)
    }
}

impl<'a> IntoDocument for &'a str {
    fn into_document(self) -> Result<Document> {
        parse_document(self)
    }
}

impl IntoDocument for String {
    fn into_document(self) -> Result<Document> {
        parse_document(&self)
    }
}

impl<'a, V: Into<Bson>> IntoDocument for (&'a str, V) {
    fn into_document(self) -> Result<Document> {
        let mut doc = Document::new();
        doc.insert(self.0, self.1);
        Ok(doc)
    }
}

/// Parses a criteria or command string into a `Document`.
///
/// Besides strict JSON, the shell-style leniencies commonly typed by hand
/// are accepted: unquoted keys, single-quoted strings and trailing commas.
/// ```
/// # #[macro_use]
/// # extern crate bson;
/// # extern crate guava;
/// #
/// # use guava::bsn::parse_document;
/// # use guava::error::Result;
/// #
/// # fn main() -> Result<()> {
/// let doc = parse_document("{ name: 'Mongo', tags: { $all: ['db', 'nosql'], }, }")?;
/// assert_eq!(doc, doc!{
///     "name": "Mongo",
///     "tags": { "$all": ["db", "nosql"] },
/// });
/// # Ok(())
/// # }
/// ```
pub fn parse_document(input: &str) -> Result<Document> {
    let normalized = normalize_lenient_json(input)?;
    let value: Value = serde_json::from_str(&normalized).map_err(|error| Error::new(
        ErrorKind::Parse,
        format!("{} in `{}`", error, input)
    ))?;

    match value {
        Value::Object(_) => value.try_into_bson().and_then(BsonExt::try_into_doc),
        _ => Err(Error::new(ErrorKind::Parse, format!("expected a JSON object, got `{}`", input))),
    }
}

/// Rewrites lenient JSON into strict JSON.
fn normalize_lenient_json(input: &str) -> Result<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out).ok_or_else(|| Error::new(
                    ErrorKind::Parse,
                    format!("unterminated string in `{}`", input)
                ))?;
                continue;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if next != Some(&'}') && next != Some(&']') {
                    out.push(c);
                }
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_key = chars[i..]
                    .iter()
                    .find(|ch| !ch.is_whitespace())
                    .map_or(false, |&ch| ch == ':');

                if is_key {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
                continue;
            }
            _ => out.push(c),
        }

        i += 1;
    }

    Ok(out)
}

/// Characters allowed in an unquoted key.
fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Copies a single- or double-quoted string starting at `start` as a
/// double-quoted JSON string. Returns the index just past the closing
/// quote, or `None` if the string is unterminated.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> Option<usize> {
    let quote = chars[start];
    let mut i = start + 1;

    out.push('"');

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = *chars.get(i + 1)?;
                if escaped == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(escaped);
                }
                i += 2;
            }
            c if c == quote => {
                out.push('"');
                return Some(i + 1);
            }
            '"' => {
                out.push_str("\\\"");
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    None
}

/// Renders a BSON value the way the interactive shell prints it, compactly.
pub fn render_shell(value: &Bson) -> String {
    let mut out = String::new();
    write_shell(value, &mut out);
    out
}

/// Helper for `render_shell()`.
fn write_shell(value: &Bson, out: &mut String) {
    match *value {
        Bson::Document(ref doc) => {
            out.push('{');
            for (i, (key, value)) in doc.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_str(key, out);
                out.push(':');
                write_shell(value, out);
            }
            out.push('}');
        }
        Bson::Array(ref values) => {
            out.push('[');
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_shell(value, out);
            }
            out.push(']');
        }
        Bson::String(ref s) => write_json_str(s, out),
        Bson::I32(n) => { write!(out, "{}", n).ok(); }
        Bson::I64(n) => { write!(out, "{}", n).ok(); }
        Bson::FloatingPoint(x) => { write!(out, "{}", x).ok(); }
        Bson::Boolean(b) => out.push_str(if b { "true" } else { "false" }),
        Bson::Null => out.push_str("null"),
        ref other => { write!(out, "{}", other).ok(); }
    }
}

/// Writes a JSON-escaped string literal.
fn write_json_str(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => { write!(out, "{:?}", s).ok(); }
    }
}
