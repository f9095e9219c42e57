pub use nom::{
    bytes::complete::tag,
    error::{ErrorKind, ParseError},
    sequence::tuple,
    Err,
};
use nom::{InputIter, ToUsize};

use crate::{Input, Result};

/// Like `take` but it “skips” the parsed value.
pub fn skip<'a, C, E>(count: C) -> impl Fn(Input<'a>) -> Result<'a, Input<'a>, E>
where
    C: ToUsize,
    E: ParseError<Input<'a>>,
{
    let count = count.to_usize();

    move |input: Input| match input.slice_index(count) {
        Err(_needed) => Err(Err::Error(E::from_error_kind(input, ErrorKind::Eof))),
        Ok(index) => Ok((&input[index..], &[])),
    }
}

/// Get a subslice of `input`, or fail with an [`ErrorKind::Eof`] error when
/// `offset + length` runs past the end of `input`.
///
/// The codecs use it to reach the tables a file header points to, so that a
/// truncated or lying file surfaces as a parse error instead of a panic.
pub fn slice_at<'a, E>(input: Input<'a>, offset: usize, length: usize) -> Result<'a, Input<'a>, E>
where
    E: ParseError<Input<'a>>,
{
    match offset.checked_add(length) {
        Some(end) if end <= input.len() => Ok((&input[end..], &input[offset..end])),
        _ => Err(Err::Error(E::from_error_kind(input, ErrorKind::Eof))),
    }
}
