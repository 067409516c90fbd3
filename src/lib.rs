/*!
`cesil` is a streaming CSV (de)serialization library with strict,
configurable dialects.

Where most CSV parsers prefer *a* parse over *no* parse, cesil enforces
the dialect you configure: row endings must agree (or be detected once and
then agree), quotes must close, and stray bytes after a closing quote are
errors rather than guesses. On top of that strict tokenizer sit streaming
readers and writers with header binding, comment handling, whitespace
treatments, typed row bindings, serde support and an async (tokio) API.

# Reading typed rows

Columns are bound by name: each [`Column`] pairs a parser with a setter,
and a [`RowBinding`] ties them to an instance provider.

```
use cesil::{Column, Options, ReadHeader, RowBinding};

#[derive(Debug, Default, PartialEq)]
struct City {
    name: String,
    pop: u64,
}

fn example() -> cesil::Result<()> {
    let data = "\
name,pop
Boston,4628910
Concord,42695
";
    let binding = RowBinding::new(
        City::default,
        vec![
            Column::new(
                "name",
                |text, _| Some(text.to_string()),
                |city: &mut City, v, _| {
                    city.name = v;
                    Ok(())
                },
            ),
            Column::new(
                "pop",
                |text, _| text.parse().ok(),
                |city: &mut City, v, _| {
                    city.pop = v;
                    Ok(())
                },
            )
            .required(),
        ],
    )?;
    let opts = Options::builder()
        .read_header(ReadHeader::Always)
        .build()?;
    let mut rdr = opts.row_reader(data.as_bytes(), binding)?;
    let cities = rdr.read_all()?;
    assert_eq!(
        cities,
        vec![
            City { name: "Boston".to_string(), pop: 4628910 },
            City { name: "Concord".to_string(), pop: 42695 },
        ]
    );
    Ok(())
}
example().unwrap();
```

# Reading and writing with serde

```
use cesil::Options;

#[derive(serde::Serialize, serde::Deserialize)]
struct Row {
    city: String,
    pop: u64,
}

fn example() -> cesil::Result<()> {
    let opts = Options::default();
    let mut wtr = opts.record_writer(vec![]);
    wtr.serialize(Row { city: "Boston".to_string(), pop: 4628910 })?;
    let data = wtr.into_inner()?;
    assert_eq!(&b"city,pop\r\nBoston,4628910\r\n"[..], &data[..]);
    Ok(())
}
example().unwrap();
```

# Dialects

Every grammar knob lives on [`Options`]: the separator, the quote and its
in-quote escape, the comment sigil, the row ending (fixed or detected from
the first record), header policies for both directions, whitespace
treatments and buffer size hints. Options are validated once at
[`OptionsBuilder::build`] and shared by every reader and writer built from
them.

# Errors and poisoning

All failures surface as [`Error`]. Any failure other than end-of-data
(including I/O errors and cancelled async operations) *poisons* the reader
or writer: subsequent calls fail with [`ErrorKind::Poisoned`] rather than
producing data from an inconsistent stream.
*/

#![deny(missing_docs)]

pub use cesil_core::RowEnding;

pub use crate::binding::{Column, Hold, RowBinding};
pub use crate::buffer::ReadBuffer;
pub use crate::context::{ReadContext, ReadMode, WriteContext, WriteMode};
pub use crate::de::from_record;
pub use crate::error::{Error, ErrorKind, PoisonKind, Result};
pub use crate::options::{
    Options, OptionsBuilder, ReadHeader, WhitespaceTreatment, WriteHeader,
    WriteTrailingRowEnding,
};
pub use crate::pool::{BufferPool, PooledBuf};
pub use crate::reader::{
    DeserializeIter, ReadItem, RecordItem, RecordReader, RecordsIter,
    RowIter, RowReader,
};
pub use crate::record::{Position, Record, RecordIter};
pub use crate::writer::{RecordWriter, RowWriter, WriteColumn};

#[cfg(feature = "tokio")]
pub use crate::async_impl::{
    AsyncRecordReader, AsyncRecordWriter, AsyncRowReader, AsyncRowWriter,
};

#[cfg(feature = "tokio")]
mod async_impl;
mod binding;
mod buffer;
mod context;
mod de;
mod error;
mod options;
mod pool;
mod reader;
mod record;
mod ser;
mod writer;

use std::io;

impl Options {
    /// Build a raw record reader over `rdr`.
    pub fn record_reader<R: io::Read>(
        &self,
        rdr: R,
    ) -> Result<RecordReader<R>> {
        RecordReader::new(self, rdr)
    }

    /// Build a typed row reader over `rdr`.
    pub fn row_reader<R: io::Read, T>(
        &self,
        rdr: R,
        binding: RowBinding<T>,
    ) -> Result<RowReader<R, T>> {
        RowReader::new(self, rdr, binding)
    }

    /// Build a raw record writer over `wtr`.
    pub fn record_writer<W: io::Write>(&self, wtr: W) -> RecordWriter<W> {
        RecordWriter::new(self, wtr)
    }

    /// Build a typed row writer over `wtr`.
    pub fn row_writer<W: io::Write, T>(
        &self,
        wtr: W,
        columns: Vec<WriteColumn<T>>,
    ) -> RowWriter<W, T> {
        RowWriter::new(self, wtr, columns)
    }

    /// Build an async record reader over `rdr`.
    #[cfg(feature = "tokio")]
    pub fn async_record_reader<R>(
        &self,
        rdr: R,
    ) -> Result<AsyncRecordReader<R>>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        AsyncRecordReader::new(self, rdr)
    }

    /// Build an async typed row reader over `rdr`.
    #[cfg(feature = "tokio")]
    pub fn async_row_reader<R, T>(
        &self,
        rdr: R,
        binding: RowBinding<T>,
    ) -> Result<AsyncRowReader<R, T>>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        AsyncRowReader::new(self, rdr, binding)
    }

    /// Build an async record writer over `wtr`.
    #[cfg(feature = "tokio")]
    pub fn async_record_writer<W>(&self, wtr: W) -> AsyncRecordWriter<W>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        AsyncRecordWriter::new(self, wtr)
    }

    /// Build an async typed row writer over `wtr`.
    #[cfg(feature = "tokio")]
    pub fn async_row_writer<W, T>(
        &self,
        wtr: W,
        columns: Vec<WriteColumn<T>>,
    ) -> AsyncRowWriter<W, T>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        AsyncRowWriter::new(self, wtr, columns)
    }
}
