/*!
`cesil-core` provides the tokenizing heart of the `cesil` CSV library: a
table-driven state machine that turns a stream of bytes into logical CSV
events, and the symmetric field encoder that quotes values only when the
dialect requires it.

This crate never uses the standard library and never allocates. It is meant
to be driven incrementally with caller-provided buffers; the
[`cesil`](https://docs.rs/cesil) crate layers buffered I/O, header binding
and typed rows on top.

# Overview

The two primary APIs are [`Reader`], which tokenizes CSV data, and
[`Writer`], which encodes fields. Both are configured through builders that
fix a *dialect*: the separator, quote, in-quote escape and comment bytes,
the row ending, and the whitespace treatment.

# Example: counting values and records

```
use cesil_core::{Reader, ReadValueResult};

let data = "foo,bar,baz\r\na,b,c\r\n";

let mut rdr = Reader::new();
let mut bytes = data.as_bytes();
let mut out = [0; 1024];
let (mut nvalues, mut nrecords) = (0, 0);
loop {
    let (result, nin, _) = rdr.read_value(bytes, &mut out);
    bytes = &bytes[nin..];
    match result {
        ReadValueResult::InputEmpty => {}
        ReadValueResult::OutputFull => panic!("value too large"),
        ReadValueResult::Value { record_end, .. } => {
            nvalues += 1;
            if record_end {
                nrecords += 1;
            }
        }
        ReadValueResult::Comment => {}
        ReadValueResult::Error(err) => panic!("invalid CSV: {}", err),
        ReadValueResult::End => break,
    }
}
assert_eq!(6, nvalues);
assert_eq!(2, nrecords);
```
*/

#![deny(missing_docs)]
#![cfg_attr(not(test), no_std)]

pub use crate::classify::{CharClass, Classifier};
pub use crate::reader::{
    DialectError, ReadError, ReadValueResult, Reader, ReaderBuilder,
    RowEnding,
};
pub use crate::writer::{QuoteScan, WriteResult, Writer, WriterBuilder};

mod classify;
mod reader;
mod writer;
