//! Common utility functions and types.

use crate::error::{ Error, ErrorKind, Result };

/// Converts a document count reported by the store (an `i32` or `i64`)
/// to a `usize`, naming the count as `msg` in the error if it doesn't fit.
/// ```
/// # extern crate guava;
/// #
/// # use std::i64;
/// # use guava::utils::int_to_usize_with_msg;
/// # use guava::error::Result;
/// #
/// # fn main() -> Result<()> {
/// #
/// assert!(int_to_usize_with_msg(-1 as i32, "# of removed documents")
///         .unwrap_err()
///         .to_string()
///         .contains("# of removed documents (-1) is negative"));
///
/// assert_eq!(
///     int_to_usize_with_msg(1, "# of removed documents")?,
///     1
/// );
///
/// let platform_dependent = int_to_usize_with_msg(i64::MAX, "# of removed documents");
/// if cfg!(target_pointer_width =  "8") ||
///    cfg!(target_pointer_width = "16") ||
///    cfg!(target_pointer_width = "32") {
///     assert!(platform_dependent
///             .unwrap_err()
///             .to_string()
///             .contains("overflows `usize`"));
/// } else if cfg!(target_pointer_width =  "64") ||
///           cfg!(target_pointer_width = "128") {
///     assert_eq!(platform_dependent?, i64::MAX as usize);
/// } else {
///     panic!("exotic pointer width, can't assume correct result");
/// }
/// #
/// # Ok(())
/// # }
/// ```
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation, clippy::if_same_then_else)]
pub fn int_to_usize_with_msg<T: Into<i64>>(x: T, msg: &str) -> Result<usize> {
    use std::usize;
    use std::mem::size_of;

    let n: i64 = x.into();

    // On 64-bit and wider targets every non-negative `i64` fits in a `usize`;
    // on narrower ones `usize::MAX` fits in an `i64` and bounds the value.
    if n < 0 {
        Err(Error::new(ErrorKind::IntConversionUnderflow, format!("{} ({}) is negative", msg, n)))
    } else if size_of::<usize>() >= size_of::<i64>() {
        Ok(n as usize)
    } else if n <= usize::MAX as i64 {
        Ok(n as usize)
    } else {
        Err(Error::new(ErrorKind::IntConversionOverflow, format!("{} ({}) overflows `usize`", msg, n)))
    }
}
