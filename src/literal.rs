//! Helper types for making the construction of sort specifications, update
//! operators and cursor options a little less stringly-typed.

use std::fmt;
use bson::Bson;
use serde::{
    ser::{ Serialize, Serializer },
    de::{ Deserialize, Deserializer, Visitor },
};

/// Ordering, for specifying in which order to sort results yielded by a query.
/// ```
/// # #[macro_use]
/// # extern crate bson;
/// # extern crate guava;
/// #
/// # use guava::literal::Order;
/// #
/// # fn main() {
/// let sorting = doc! {
///     "_id": Order::Ascending,
///     "zip": Order::Descending,
/// };
/// assert_eq!(sorting, doc!{
///     "_id":  1,
///     "zip": -1,
/// });
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Order {
    /// Order smaller values first.
    Ascending  =  1,
    /// Order greater values first.
    Descending = -1,
}

/// The default ordering is `Ascending`.
impl Default for Order {
    fn default() -> Self {
        Order::Ascending
    }
}

/// This impl is provided so that you can use these more expressive ordering
/// names instead of the not very clear `1` and `-1` in sort documents.
impl From<Order> for Bson {
    fn from(order: Order) -> Self {
        Bson::I32(order as _)
    }
}

impl Serialize for Order {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_i32(*self as _)
    }
}

impl<'a> Deserialize<'a> for Order {
    fn deserialize<D: Deserializer<'a>>(de: D) -> Result<Self, D::Error> {
        de.deserialize_i32(OrderVisitor)
    }
}

/// A serde visitor that produces an `Order` from +1 or -1.
struct OrderVisitor;

impl<'a> Visitor<'a> for OrderVisitor {
    type Value = Order;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "an integer expressing ordering: {} or {}",
            Order::Ascending as i32,
            Order::Descending as i32,
        )
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        if v == Order::Ascending as i64 {
            Ok(Order::Ascending)
        } else if v == Order::Descending as i64 {
            Ok(Order::Descending)
        } else {
            Err(E::custom(format!("invalid ordering: {}", v)))
        }
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        if v == Order::Ascending as u64 {
            Ok(Order::Ascending)
        } else {
            Err(E::custom(format!("invalid ordering: {}", v)))
        }
    }
}

/// The bitwise operation performed by the `$bit` update operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitOp {
    /// Bitwise AND with the operand.
    And,
    /// Bitwise OR with the operand.
    Or,
    /// Bitwise XOR with the operand.
    Xor,
}

impl BitOp {
    /// The key of this operation inside the `$bit` operator document.
    pub fn as_str(self) -> &'static str {
        match self {
            BitOp::And => "and",
            BitOp::Or  => "or",
            BitOp::Xor => "xor",
        }
    }
}

bitflags! {
    /// Boolean cursor options, set on a `Collection` before iteration.
    ///
    /// ```
    /// # extern crate guava;
    /// #
    /// # use guava::literal::CursorFlags;
    /// #
    /// # fn main() {
    /// let flags = CursorFlags::TAILABLE | CursorFlags::IMMORTAL;
    /// assert!(flags.contains(CursorFlags::TAILABLE));
    /// assert!(!flags.contains(CursorFlags::PARTIAL));
    /// # }
    /// ```
    #[derive(Default)]
    pub struct CursorFlags: u8 {
        /// The cursor never times out on the server.
        const IMMORTAL = 0b0000_0001;
        /// The cursor stays open after the last result of a capped collection.
        const TAILABLE = 0b0000_0010;
        /// Return partial results if some shards are unavailable.
        const PARTIAL  = 0b0000_0100;
    }
}

#[cfg(test)]
mod tests {
    use bson::{ Bson, from_bson, to_bson };
    use crate::error::Result;
    use super::*;

    #[test]
    fn order_roundtrips_through_bson() -> Result<()> {
        assert_eq!(to_bson(&Order::Descending)?, Bson::from(Order::Descending));
        assert_eq!(from_bson::<Order>(Bson::I32(1))?, Order::Ascending);
        assert_eq!(from_bson::<Order>(Bson::I64(-1))?, Order::Descending);
        assert!(from_bson::<Order>(Bson::I32(0))
                .unwrap_err()
                .to_string()
                .contains("invalid ordering"));

        Ok(())
    }

    #[test]
    fn bit_op_names() {
        assert_eq!(BitOp::And.as_str(), "and");
        assert_eq!(BitOp::Xor.as_str(), "xor");
    }
}
