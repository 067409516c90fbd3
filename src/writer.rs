use std::any::Any;
use std::fmt;
use std::io;

use cesil_core::WriteResult;
use log::debug;
use memchr::{memchr, memchr2};

use crate::context::{WriteContext, WriteMode};
use crate::error::{Error, ErrorKind, PoisonKind, Result};
use crate::options::{Options, WriteHeader, WriteTrailingRowEnding};

/// The I/O-free half of the write pipeline: encodes records, comments and
/// row endings into a staging buffer.
///
/// Row endings are deferred: one is written *before* each record or
/// comment after the first, and [`WriteEngine::finish`] decides whether
/// the data ends with one. This is what lets comments precede the first
/// record without producing a blank line, and what makes
/// `write_trailing_row_ending` a single decision at the end.
#[derive(Debug)]
pub(crate) struct WriteEngine {
    core: cesil_core::Writer,
    staging: Vec<u8>,
    quote: Option<u8>,
    escape: Option<u8>,
    comment: Option<u8>,
    trailing: WriteTrailingRowEnding,
    wrote_anything: bool,
}

impl WriteEngine {
    pub(crate) fn new(opts: &Options) -> WriteEngine {
        WriteEngine {
            core: opts.core_writer(),
            staging: vec![],
            quote: opts.quote(),
            escape: opts.escape(),
            comment: opts.comment(),
            trailing: opts.write_trailing_row_ending(),
            wrote_anything: false,
        }
    }

    pub(crate) fn encode_record<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.begin_line();
        let mut nvalues = 0;
        let mut all_empty = true;
        for value in values {
            let value = value.as_ref();
            self.check_encodable(value)?;
            if nvalues > 0 {
                self.run(2, |core, out| core.delimiter(out).1);
            }
            nvalues += 1;
            all_empty = all_empty && value.is_empty();
            let need = value.len().saturating_mul(2).saturating_add(2);
            self.run(need, |core, out| {
                let (res, nin, nout) = core.value(value, out);
                debug_assert_eq!(WriteResult::InputEmpty, res);
                debug_assert_eq!(value.len(), nin);
                nout
            });
        }
        self.run(1, |core, out| core.finish(out).1);
        // A record of one empty value would otherwise come out as a blank
        // line, which readers skip; quote it so it survives a round trip.
        if nvalues == 1 && all_empty {
            if let Some(q) = self.quote {
                self.staging.push(q);
                self.staging.push(q);
            }
        }
        self.wrote_anything = true;
        Ok(())
    }

    pub(crate) fn encode_comment(&mut self, text: &str) -> Result<()> {
        let sigil = match self.comment {
            Some(b) => b,
            None => {
                return Err(ErrorKind::Config(
                    "cannot write a comment: no comment byte is configured"
                        .to_string(),
                )
                .into())
            }
        };
        for segment in split_comment_lines(text) {
            self.begin_line();
            self.staging.push(sigil);
            self.staging.extend_from_slice(segment.as_bytes());
            self.wrote_anything = true;
        }
        Ok(())
    }

    /// Emit the final row ending, if configured.
    pub(crate) fn finish(&mut self) {
        if self.wrote_anything
            && self.trailing == WriteTrailingRowEnding::Always
        {
            self.terminator();
        }
    }

    /// The staged, not yet drained output.
    pub(crate) fn staging(&self) -> &[u8] {
        &self.staging
    }

    pub(crate) fn clear_staging(&mut self) {
        self.staging.clear();
    }

    fn begin_line(&mut self) {
        if self.wrote_anything {
            self.terminator();
        }
    }

    fn terminator(&mut self) {
        self.run(3, |core, out| core.terminator(out).1);
    }

    /// Reserve `need` bytes of staging and let `f` encode into them.
    fn run<F>(&mut self, need: usize, f: F)
    where
        F: FnOnce(&mut cesil_core::Writer, &mut [u8]) -> usize,
    {
        let len = self.staging.len();
        self.staging.resize(len + need, 0);
        let n = f(&mut self.core, &mut self.staging[len..]);
        self.staging.truncate(len + n);
    }

    /// Reject values the dialect cannot represent.
    fn check_encodable(&self, value: &[u8]) -> Result<()> {
        match self.quote {
            None => {
                if self.core.needs_quotes(value) {
                    return Err(ErrorKind::Serialize(format!(
                        "value {:?} needs quoting, but no quote byte is \
                         configured",
                        String::from_utf8_lossy(value)
                    ))
                    .into());
                }
            }
            Some(q) => {
                if self.escape.is_none() && memchr(q, value).is_some() {
                    return Err(ErrorKind::Serialize(format!(
                        "value {:?} contains the quote byte, but no escape \
                         byte is configured",
                        String::from_utf8_lossy(value)
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Split comment text into lines at `\r\n`, `\r` or `\n`. A single
/// trailing line break does not produce an empty final line.
fn split_comment_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut lines = vec![];
    let mut start = 0;
    while let Some(i) = memchr2(b'\r', b'\n', &bytes[start..]) {
        let at = start + i;
        lines.push(&text[start..at]);
        start = at
            + if bytes[at] == b'\r' && bytes.get(at + 1) == Some(&b'\n') {
                2
            } else {
                1
            };
    }
    if start < bytes.len() || lines.is_empty() {
        lines.push(&text[start..]);
    }
    lines
}

/// A streaming writer for raw records and comments.
///
/// Values are quoted and escaped only when the dialect requires it.
/// Output is staged in a buffer sized by the options' write buffer hint
/// and flushed as it fills; [`RecordWriter::finish`] (or dropping the
/// writer) settles the trailing row ending and flushes the rest.
pub struct RecordWriter<W: io::Write> {
    engine: WriteEngine,
    wtr: Option<W>,
    capacity: usize,
    write_header: WriteHeader,
    header_written: bool,
    poisoned: Option<PoisonKind>,
    finished: bool,
}

impl<W: io::Write> fmt::Debug for RecordWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RecordWriter")
            .field("capacity", &self.capacity)
            .field("header_written", &self.header_written)
            .field("poisoned", &self.poisoned)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<W: io::Write> RecordWriter<W> {
    /// Create a writer over `wtr` with the given options.
    pub fn new(opts: &Options, wtr: W) -> RecordWriter<W> {
        RecordWriter {
            engine: WriteEngine::new(opts),
            wtr: Some(wtr),
            capacity: opts.write_buffer_capacity(),
            write_header: opts.write_header(),
            header_written: false,
            poisoned: None,
            finished: false,
        }
    }

    /// Write one record.
    ///
    /// Raw records are written as given; a caller mixing `write_record`
    /// with [`RecordWriter::serialize`] is assumed to have written any
    /// header itself.
    pub fn write_record<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.checked(|w| {
            w.header_written = true;
            w.engine.encode_record(values)?;
            w.drain(false)
        })
    }

    /// Write a comment. Multi-line text becomes one comment line per
    /// line of input.
    pub fn write_comment(&mut self, text: &str) -> Result<()> {
        self.checked(|w| {
            w.engine.encode_comment(text)?;
            w.drain(false)
        })
    }

    /// Serialize `value` as one record.
    ///
    /// On the first call, when the options say headers are written and
    /// `value` is a struct (or map), a header record of its field names is
    /// written first.
    pub fn serialize<S: serde::Serialize>(&mut self, value: S) -> Result<()> {
        self.checked(|w| {
            if !w.header_written {
                w.header_written = true;
                if w.write_header == WriteHeader::Always {
                    if let Some(names) = crate::ser::header_record(&value)? {
                        w.engine.encode_record(&names)?;
                    }
                }
            }
            let cells = crate::ser::to_record(&value)?;
            w.engine.encode_record(&cells)?;
            w.drain(false)
        })
    }

    /// Flush all staged output to the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.checked(|w| {
            w.drain(true)?;
            if let Some(wtr) = w.wtr.as_mut() {
                wtr.flush()?;
            }
            Ok(())
        })
    }

    /// Settle the trailing row ending and flush. Further writes fail.
    /// Called automatically on drop, where errors are discarded; call it
    /// explicitly to see them.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.check_poisoned()?;
        self.finished = true;
        let result = (|| {
            self.engine.finish();
            self.drain(true)?;
            if let Some(wtr) = self.wtr.as_mut() {
                wtr.flush()?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(self.poison(err)),
        }
    }

    /// Finish and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.wtr.take().expect("writer present until into_inner"))
    }

    pub(crate) fn poison(&mut self, err: Error) -> Error {
        let kind = match err.kind() {
            ErrorKind::Cancelled => PoisonKind::Cancellation,
            _ => PoisonKind::Error,
        };
        debug!("writer poisoned by {}", kind);
        self.poisoned = Some(kind);
        err
    }

    pub(crate) fn mark_header_written(&mut self) {
        self.header_written = true;
    }

    pub(crate) fn write_header_policy(&self) -> WriteHeader {
        self.write_header
    }

    fn check_poisoned(&self) -> Result<()> {
        match self.poisoned {
            Some(kind) => Err(ErrorKind::Poisoned(kind).into()),
            None => Ok(()),
        }
    }

    fn checked<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.check_poisoned()?;
        if self.finished {
            return Err(ErrorKind::Poisoned(PoisonKind::Error).into());
        }
        match f(self) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.poison(err)),
        }
    }

    /// Move staged bytes to the underlying writer once they exceed the
    /// staging capacity (or unconditionally when `force` is set).
    fn drain(&mut self, force: bool) -> Result<()> {
        if !force && self.engine.staging.len() < self.capacity.max(1) {
            return Ok(());
        }
        if self.engine.staging.is_empty() {
            return Ok(());
        }
        let wtr = self.wtr.as_mut().expect("writer present");
        wtr.write_all(&self.engine.staging)?;
        self.engine.staging.clear();
        Ok(())
    }
}

impl<W: io::Write> Drop for RecordWriter<W> {
    fn drop(&mut self) {
        if self.wtr.is_some() && !self.finished && self.poisoned.is_none() {
            let _ = self.finish();
        }
    }
}

/// A write-side column descriptor: a name, a getter, a formatter and an
/// optional serialize predicate.
///
/// Like its read-side counterpart, the value travels between getter and
/// formatter as a `Box<dyn Any>`, so columns of different value types can
/// share one writer.
pub struct WriteColumn<T> {
    name: String,
    should_serialize: Option<Box<dyn Fn(&T, &WriteContext) -> bool>>,
    getter: Box<dyn Fn(&T, &WriteContext) -> Box<dyn Any>>,
    formatter: Box<dyn Fn(&dyn Any, &WriteContext, &mut Vec<u8>) -> Result<()>>,
}

impl<T> fmt::Debug for WriteColumn<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WriteColumn").field("name", &self.name).finish()
    }
}

impl<T> WriteColumn<T> {
    /// Bind a column to a getter and a formatter.
    pub fn new<V, G, F>(name: &str, getter: G, formatter: F) -> WriteColumn<T>
    where
        V: 'static,
        G: Fn(&T, &WriteContext) -> V + 'static,
        F: Fn(&V, &WriteContext, &mut Vec<u8>) -> Result<()> + 'static,
    {
        WriteColumn {
            name: name.to_string(),
            should_serialize: None,
            getter: Box::new(move |row, ctx| {
                Box::new(getter(row, ctx)) as Box<dyn Any>
            }),
            formatter: Box::new(move |any, ctx, out| {
                let v = any
                    .downcast_ref::<V>()
                    .expect("column value type");
                formatter(v, ctx, out)
            }),
        }
    }

    /// Bind a column whose getter may decline to produce a value; `None`
    /// becomes an empty cell.
    pub fn optional<V, G, F>(
        name: &str,
        getter: G,
        formatter: F,
    ) -> WriteColumn<T>
    where
        V: 'static,
        G: Fn(&T, &WriteContext) -> Option<V> + 'static,
        F: Fn(&V, &WriteContext, &mut Vec<u8>) -> Result<()> + 'static,
    {
        WriteColumn {
            name: name.to_string(),
            should_serialize: None,
            getter: Box::new(move |row, ctx| {
                Box::new(getter(row, ctx)) as Box<dyn Any>
            }),
            formatter: Box::new(move |any, ctx, out| {
                let v = any
                    .downcast_ref::<Option<V>>()
                    .expect("column value type");
                match v {
                    Some(v) => formatter(v, ctx, out),
                    None => Ok(()),
                }
            }),
        }
    }

    /// Bind a column formatted through its value's `Display`
    /// implementation.
    pub fn display<V, G>(name: &str, getter: G) -> WriteColumn<T>
    where
        V: fmt::Display + 'static,
        G: Fn(&T, &WriteContext) -> V + 'static,
    {
        WriteColumn::new(name, getter, |v: &V, _ctx, out: &mut Vec<u8>| {
            use std::io::Write;
            write!(out, "{}", v).map_err(Error::from)
        })
    }

    /// Skip this column (writing an empty cell) for rows where `f`
    /// returns false.
    pub fn should_serialize<F>(mut self, f: F) -> WriteColumn<T>
    where
        F: Fn(&T, &WriteContext) -> bool + 'static,
    {
        self.should_serialize = Some(Box::new(f));
        self
    }

    /// The column's name, used for the header record.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A streaming writer for typed rows described by [`WriteColumn`]s.
pub struct RowWriter<W: io::Write, T> {
    raw: RecordWriter<W>,
    columns: Vec<WriteColumn<T>>,
    cells: Vec<Vec<u8>>,
    row: u64,
}

impl<W: io::Write, T> RowWriter<W, T> {
    /// Create a typed writer over `wtr`.
    pub fn new(
        opts: &Options,
        wtr: W,
        columns: Vec<WriteColumn<T>>,
    ) -> RowWriter<W, T> {
        let cells = columns.iter().map(|_| vec![]).collect();
        RowWriter { raw: RecordWriter::new(opts, wtr), columns, cells, row: 0 }
    }

    /// Write one row. The header record is written first when the options
    /// ask for one.
    pub fn write(&mut self, row: &T) -> Result<()> {
        if !self.raw.header_written
            && self.raw.write_header_policy() == WriteHeader::Always
        {
            self.raw.mark_header_written();
            let names: Vec<&[u8]> =
                self.columns.iter().map(|c| c.name.as_bytes()).collect();
            self.raw.write_record(names)?;
        }
        match self.build_cells(row) {
            Ok(()) => {}
            Err(err) => return Err(self.raw.poison(err)),
        }
        self.raw.write_record(&self.cells)?;
        self.row += 1;
        Ok(())
    }

    /// Write every row in `rows`.
    pub fn write_all<'a, I>(&mut self, rows: I) -> Result<()>
    where
        T: 'a,
        I: IntoIterator<Item = &'a T>,
    {
        for row in rows {
            self.write(row)?;
        }
        Ok(())
    }

    /// Write a comment line (or several, for multi-line text).
    pub fn write_comment(&mut self, text: &str) -> Result<()> {
        self.raw.write_comment(text)
    }

    /// Flush all staged output.
    pub fn flush(&mut self) -> Result<()> {
        self.raw.flush()
    }

    /// Settle the trailing row ending and flush. Further writes fail.
    pub fn finish(&mut self) -> Result<()> {
        self.raw.finish()
    }

    /// Finish and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.raw.into_inner()
    }

    fn build_cells(&mut self, row: &T) -> Result<()> {
        build_cells(&self.columns, &mut self.cells, row, self.row)
    }
}

/// Format one row into reusable cells through its column descriptors.
/// Shared by the sync and async typed writers.
pub(crate) fn build_cells<T>(
    columns: &[WriteColumn<T>],
    cells: &mut Vec<Vec<u8>>,
    row: &T,
    row_number: u64,
) -> Result<()> {
    cells.resize_with(columns.len(), Vec::new);
    for (i, col) in columns.iter().enumerate() {
        let cell = &mut cells[i];
        cell.clear();
        let ctx = WriteContext::new(
            WriteMode::WritingColumn,
            row_number,
            Some((i, &col.name)),
        );
        if let Some(pred) = col.should_serialize.as_ref() {
            if !pred(row, &ctx) {
                continue;
            }
        }
        let value = (col.getter)(row, &ctx);
        (col.formatter)(&*value, &ctx, cell)?;
    }
    Ok(())
}
