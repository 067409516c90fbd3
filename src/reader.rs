use std::collections::VecDeque;
use std::io;
use std::str;

use cesil_core::ReadValueResult;
use log::debug;

use crate::binding::{Assembler, Column, RowBinding};
use crate::buffer::ReadBuffer;
use crate::error::{read_error_kind, Error, ErrorKind, PoisonKind, Result};
use crate::options::{Options, ReadHeader, WhitespaceTreatment};
use crate::record::{Position, Record};

/// One item from a [`RecordReader`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordItem {
    /// A data record was read into the caller's [`Record`].
    Record,
    /// A comment line, with its text.
    Comment(String),
    /// The data is exhausted.
    End,
}

/// One item from a [`RowReader`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadItem<T> {
    /// A data row.
    Row(T),
    /// A comment line, with its text.
    Comment(String),
    /// The data is exhausted.
    End,
}

/// The I/O-free bottom of the read pipeline: drives the tokenizer over
/// caller supplied input, accumulates value bytes, applies per-value
/// whitespace trimming and assembles [`Record`]s.
#[derive(Debug)]
struct Engine {
    /// Boxed because the tokenizer embeds its transition tables, which
    /// would otherwise sit on the stack of everything holding a reader.
    core: Box<cesil_core::Reader>,
    scratch: Vec<u8>,
    vlen: usize,
    trim_leading: bool,
    trim_trailing: bool,
    trim_after: bool,
    bytes: u64,
    records: u64,
    in_record: bool,
    start: Position,
}

/// What the engine produced, before header policy is applied.
#[derive(Debug)]
enum Raw {
    Record,
    Comment(String),
    End,
}

impl Engine {
    fn new(opts: &Options) -> Engine {
        let ws = opts.whitespace_treatment();
        Engine {
            core: Box::new(opts.core_reader()),
            scratch: vec![],
            vlen: 0,
            trim_leading: ws
                .contains(WhitespaceTreatment::TRIM_LEADING_IN_VALUES),
            trim_trailing: ws
                .contains(WhitespaceTreatment::TRIM_TRAILING_IN_VALUES),
            trim_after: ws.contains(WhitespaceTreatment::TRIM_AFTER_VALUES),
            bytes: 0,
            records: 0,
            in_record: false,
            start: Position::new(),
        }
    }

    fn position(&self) -> Position {
        let mut pos = Position::new();
        pos.set_byte(self.bytes)
            .set_line(self.core.line())
            .set_record(self.records);
        pos
    }

    /// Feed `input` (empty at end of data) and append completed values to
    /// `out`. Returns the number of bytes consumed plus an item when one
    /// completed; `Ok((_, None))` means all input was consumed mid-record
    /// and `out` holds a partial record that later calls extend.
    fn feed(
        &mut self,
        input: &[u8],
        out: &mut Record,
    ) -> Result<(usize, Option<Raw>)> {
        let mut consumed = 0;
        loop {
            if !self.in_record {
                self.start = self.position();
            }
            if self.vlen == self.scratch.len() {
                let grown = (self.scratch.len() * 2).max(64);
                self.scratch.resize(grown, 0);
            }
            let (res, nin, nout) = self
                .core
                .read_value(&input[consumed..], &mut self.scratch[self.vlen..]);
            consumed += nin;
            self.bytes += nin as u64;
            self.vlen += nout;
            if nout > 0 {
                self.in_record = true;
            }
            match res {
                ReadValueResult::InputEmpty => {
                    return Ok((consumed, None));
                }
                ReadValueResult::OutputFull => {}
                ReadValueResult::Value { record_end, quoted } => {
                    self.push_value(out, quoted);
                    if record_end {
                        out.set_position(Some(self.start));
                        self.records += 1;
                        self.in_record = false;
                        return Ok((consumed, Some(Raw::Record)));
                    }
                }
                ReadValueResult::Comment => {
                    let text = str::from_utf8(&self.scratch[..self.vlen])
                        .map_err(|_| ErrorKind::Utf8 {
                            pos: self.start,
                            field: 0,
                        })?
                        // The space conventionally written after the
                        // comment sigil is not comment content.
                        .trim_start_matches([' ', '\t'])
                        .to_string();
                    self.vlen = 0;
                    self.in_record = false;
                    return Ok((consumed, Some(Raw::Comment(text))));
                }
                ReadValueResult::Error(err) => {
                    return Err(Error::from(read_error_kind(
                        err,
                        self.position(),
                    )));
                }
                ReadValueResult::End => {
                    return Ok((consumed, Some(Raw::End)));
                }
            }
        }
    }

    fn push_value(&mut self, out: &mut Record, quoted: bool) {
        let mut v = &self.scratch[..self.vlen];
        if self.trim_leading {
            while let Some((&b, rest)) = v.split_first() {
                if b != b' ' && b != b'\t' {
                    break;
                }
                v = rest;
            }
        }
        if self.trim_trailing || (self.trim_after && !quoted) {
            while let Some((&b, rest)) = v.split_last() {
                if b != b' ' && b != b'\t' {
                    break;
                }
                v = rest;
            }
        }
        out.push_value(v, quoted);
        self.in_record = true;
        self.vlen = 0;
    }
}

/// Items buffered while the reader looks ahead for headers.
#[derive(Debug)]
enum Pending {
    Record(Record),
    Comment(String),
    End,
}

/// Everything a record reader is, except its adapter: tokenizer engine,
/// header policy, look-ahead buffering and poison state. The sync and
/// async readers are thin I/O drivers around this.
pub(crate) struct ReadState {
    engine: Engine,
    read_header: ReadHeader,
    /// Decides whether a first record is a header record under
    /// [`ReadHeader::Detect`]; installed by the typed layer, which knows
    /// the bound column names. Without one, detection never matches.
    detector: Option<Box<dyn Fn(&Record) -> bool>>,
    headers: Option<Record>,
    headers_done: bool,
    /// Partial record accumulated across [`ReadState::scan_for_headers`]
    /// calls.
    scan_rec: Record,
    pending: VecDeque<Pending>,
    poisoned: Option<PoisonKind>,
    input_done: bool,
}

impl std::fmt::Debug for ReadState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ReadState")
            .field("engine", &self.engine)
            .field("read_header", &self.read_header)
            .field("headers_done", &self.headers_done)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl ReadState {
    pub(crate) fn new(opts: &Options) -> ReadState {
        ReadState {
            engine: Engine::new(opts),
            read_header: opts.read_header(),
            detector: None,
            headers: None,
            headers_done: false,
            scan_rec: Record::new(),
            pending: VecDeque::new(),
            poisoned: None,
            input_done: false,
        }
    }

    pub(crate) fn set_header_detector(
        &mut self,
        detector: Box<dyn Fn(&Record) -> bool>,
    ) {
        self.detector = Some(detector);
    }

    pub(crate) fn position(&self) -> Position {
        self.engine.position()
    }

    pub(crate) fn headers_done(&self) -> bool {
        self.headers_done
    }

    pub(crate) fn headers(&self) -> Option<&Record> {
        self.headers.as_ref()
    }

    pub(crate) fn input_done(&self) -> bool {
        self.input_done
    }

    pub(crate) fn mark_input_done(&mut self) {
        self.input_done = true;
    }

    pub(crate) fn check_poisoned(&self) -> Result<()> {
        match self.poisoned {
            Some(kind) => Err(ErrorKind::Poisoned(kind).into()),
            None => Ok(()),
        }
    }

    pub(crate) fn poison(&mut self, err: Error) -> Error {
        let kind = match err.kind() {
            ErrorKind::Cancelled => PoisonKind::Cancellation,
            _ => PoisonKind::Error,
        };
        debug!("reader poisoned by {}", kind);
        self.poisoned = Some(kind);
        err
    }

    /// Serve an item buffered during a header scan, moving a buffered
    /// record into `rec`. Drivers call this before refilling so buffered
    /// items never wait on I/O.
    pub(crate) fn pop_pending(&mut self, rec: &mut Record) -> Option<RecordItem> {
        match self.pending.pop_front()? {
            Pending::Record(r) => {
                *rec = r;
                Some(RecordItem::Record)
            }
            Pending::Comment(text) => Some(RecordItem::Comment(text)),
            Pending::End => Some(RecordItem::End),
        }
    }

    /// Feed input and apply the header policy. `rec` must not be touched
    /// by the caller between calls that return `None`: it accumulates the
    /// partial record.
    pub(crate) fn feed(
        &mut self,
        input: &[u8],
        rec: &mut Record,
    ) -> Result<(usize, Option<RecordItem>)> {
        let (n, raw) = self.engine.feed(input, rec)?;
        let item = match raw {
            None => None,
            Some(Raw::Comment(text)) => Some(RecordItem::Comment(text)),
            Some(Raw::End) => {
                self.headers_done = true;
                Some(RecordItem::End)
            }
            Some(Raw::Record) => {
                if self.take_as_headers(rec) {
                    None
                } else {
                    Some(RecordItem::Record)
                }
            }
        };
        Ok((n, item))
    }

    /// Feed input while settling the header question, buffering whatever
    /// non-header items turn up. Done when [`ReadState::headers_done`]
    /// turns true.
    pub(crate) fn scan_for_headers(&mut self, input: &[u8]) -> Result<usize> {
        let mut rec = std::mem::take(&mut self.scan_rec);
        let result = self.engine.feed(input, &mut rec);
        let (n, raw) = match result {
            Ok(v) => v,
            Err(err) => {
                self.scan_rec = rec;
                return Err(err);
            }
        };
        match raw {
            None => {}
            Some(Raw::Comment(text)) => {
                self.pending.push_back(Pending::Comment(text));
            }
            Some(Raw::End) => {
                self.headers_done = true;
                self.pending.push_back(Pending::End);
            }
            Some(Raw::Record) => {
                if !self.take_as_headers(&mut rec) {
                    self.pending
                        .push_back(Pending::Record(std::mem::take(&mut rec)));
                }
                rec.clear();
            }
        }
        self.scan_rec = rec;
        Ok(n)
    }

    /// If `rec` is the first record and the header policy claims it,
    /// stash it as the headers and return true.
    fn take_as_headers(&mut self, rec: &mut Record) -> bool {
        if self.headers_done {
            return false;
        }
        self.headers_done = true;
        let is_header = match self.read_header {
            ReadHeader::Always => true,
            ReadHeader::Never => false,
            ReadHeader::Detect => {
                self.detector.as_ref().map_or(false, |d| d(rec))
            }
        };
        if is_header {
            debug!("first record is a header record ({} values)", rec.len());
            self.headers = Some(std::mem::take(rec));
        } else {
            debug!("first record is data; no header record");
        }
        is_header
    }
}

/// A streaming reader producing raw [`Record`]s and comments.
///
/// This is the record-level half of the read pipeline: it owns the input
/// adapter, the pushback buffer and the tokenizer, resolves the header
/// policy, and hands out records in source order. The typed [`RowReader`]
/// is a thin layer on top.
///
/// A reader is single use: once it reports [`RecordItem::End`] (or fails
/// and poisons itself) it cannot be rewound.
#[derive(Debug)]
pub struct RecordReader<R> {
    rdr: R,
    buf: ReadBuffer,
    state: ReadState,
}

impl<R: io::Read> RecordReader<R> {
    /// Create a reader over `rdr` with the given options.
    pub fn new(opts: &Options, rdr: R) -> Result<RecordReader<R>> {
        Ok(RecordReader {
            rdr,
            buf: ReadBuffer::new(
                opts.buffer_pool(),
                opts.read_buffer_capacity(),
            )?,
            state: ReadState::new(opts),
        })
    }

    pub(crate) fn set_header_detector(
        &mut self,
        detector: Box<dyn Fn(&Record) -> bool>,
    ) {
        self.state.set_header_detector(detector);
    }

    pub(crate) fn poison(&mut self, err: Error) -> Error {
        self.state.poison(err)
    }

    /// The reader's position: the byte, line and record at which the next
    /// record starts.
    pub fn position(&self) -> Position {
        self.state.position()
    }

    /// The header record, reading it (and buffering anything found before
    /// it) on first use. `None` when the configuration says the data has
    /// no header record.
    pub fn headers(&mut self) -> Result<Option<&Record>> {
        self.state.check_poisoned()?;
        while !self.state.headers_done() {
            if let Err(err) = self.refill() {
                return Err(self.state.poison(err));
            }
            let input: &[u8] = if self.state.input_done() && self.buf.is_empty()
            {
                &[]
            } else {
                self.buf.contents()
            };
            match self.state.scan_for_headers(input) {
                Ok(n) => self.buf.consume(n),
                Err(err) => return Err(self.state.poison(err)),
            }
        }
        Ok(self.state.headers())
    }

    /// Read the next item: a record (into `rec`), a comment, or the end of
    /// the data. Comments are only produced when a comment byte is
    /// configured.
    pub fn read_item(&mut self, rec: &mut Record) -> Result<RecordItem> {
        self.state.check_poisoned()?;
        rec.clear();
        loop {
            if let Some(item) = self.state.pop_pending(rec) {
                return Ok(item);
            }
            if let Err(err) = self.refill() {
                return Err(self.state.poison(err));
            }
            let input: &[u8] = if self.state.input_done() && self.buf.is_empty()
            {
                &[]
            } else {
                self.buf.contents()
            };
            match self.state.feed(input, rec) {
                Ok((n, item)) => {
                    self.buf.consume(n);
                    if let Some(item) = item {
                        return Ok(item);
                    }
                }
                Err(err) => return Err(self.state.poison(err)),
            }
        }
    }

    /// Read the next data record into `rec`, discarding comments. Returns
    /// false at the end of the data.
    pub fn read_record(&mut self, rec: &mut Record) -> Result<bool> {
        loop {
            match self.read_item(rec)? {
                RecordItem::Record => return Ok(true),
                RecordItem::Comment(_) => continue,
                RecordItem::End => return Ok(false),
            }
        }
    }

    /// An iterator over all remaining data records.
    pub fn records(&mut self) -> RecordsIter<R> {
        RecordsIter { rdr: self, rec: Record::new(), done: false }
    }

    /// An iterator that deserializes each remaining record into `D`.
    ///
    /// When the configuration produces a header record, struct fields are
    /// matched to header names; otherwise values bind by position.
    pub fn deserialize<D>(&mut self) -> DeserializeIter<R, D>
    where
        D: serde::de::DeserializeOwned,
    {
        let headers = match self.headers() {
            Ok(h) => h.cloned(),
            Err(_) => None,
        };
        DeserializeIter {
            rdr: self,
            rec: Record::new(),
            headers,
            done: false,
            _priv: std::marker::PhantomData,
        }
    }

    fn refill(&mut self) -> Result<()> {
        if self.buf.is_empty() && !self.state.input_done() {
            if self.buf.fill(&mut self.rdr)? == 0 {
                self.state.mark_input_done();
            }
        }
        Ok(())
    }
}

/// A borrowed iterator over the data records of a [`RecordReader`].
///
/// The iterator ends after the first error.
pub struct RecordsIter<'r, R> {
    rdr: &'r mut RecordReader<R>,
    rec: Record,
    done: bool,
}

impl<'r, R: io::Read> Iterator for RecordsIter<'r, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        if self.done {
            return None;
        }
        match self.rdr.read_record(&mut self.rec) {
            Ok(true) => Some(Ok(self.rec.clone())),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// A borrowed iterator deserializing each record into `D`.
///
/// The iterator ends after the first error.
pub struct DeserializeIter<'r, R, D> {
    rdr: &'r mut RecordReader<R>,
    rec: Record,
    headers: Option<Record>,
    done: bool,
    _priv: std::marker::PhantomData<D>,
}

impl<'r, R, D> Iterator for DeserializeIter<'r, R, D>
where
    R: io::Read,
    D: serde::de::DeserializeOwned,
{
    type Item = Result<D>;

    fn next(&mut self) -> Option<Result<D>> {
        if self.done {
            return None;
        }
        match self.rdr.read_record(&mut self.rec) {
            Ok(true) => Some(crate::de::deserialize_record(
                &self.rec,
                self.headers.as_ref(),
            )),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Build the header detector a typed binding uses: any value equal to a
/// bound column name marks the record as a header record.
pub(crate) fn header_detector<T>(
    binding: &RowBinding<T>,
) -> Box<dyn Fn(&Record) -> bool> {
    let names: Vec<Vec<u8>> =
        binding.column_names().map(|n| n.as_bytes().to_vec()).collect();
    Box::new(move |rec: &Record| {
        rec.iter().any(|v| names.iter().any(|n| n[..] == *v))
    })
}

/// Map each header value to the column it names, enforcing that required
/// columns appear. Without headers, columns bind by declaration order.
pub(crate) fn column_map<T>(
    headers: Option<&Record>,
    columns: &[Column<T>],
) -> Result<Vec<Option<usize>>> {
    match headers {
        Some(headers) => {
            let mut map = vec![None; headers.len()];
            for (i, value) in headers.iter().enumerate() {
                map[i] =
                    columns.iter().position(|c| c.name().as_bytes() == value);
            }
            for (ci, col) in columns.iter().enumerate() {
                if col.is_required() && !map.contains(&Some(ci)) {
                    return Err(Error::from(
                        ErrorKind::RequiredColumnMissing {
                            column: col.name().to_string(),
                            row: 0,
                        },
                    ));
                }
            }
            debug!(
                "bound {} of {} header values to columns",
                map.iter().filter(|m| m.is_some()).count(),
                map.len()
            );
            Ok(map)
        }
        None => Ok((0..columns.len()).map(Some).collect()),
    }
}

/// Apply a raw record to a row assembler through a column map. Shared by
/// the sync and async typed readers.
pub(crate) fn apply_record<T>(
    asm: &mut Assembler<T>,
    map: &[Option<usize>],
    rec: &Record,
) -> Result<()> {
    for i in 0..rec.len() {
        let Some(ci) = map.get(i).copied().flatten() else {
            continue;
        };
        let bytes = rec.get(i).expect("index in bounds");
        let text = str::from_utf8(bytes).map_err(|_| {
            let pos = rec.position().copied().unwrap_or_else(Position::new);
            Error::from(ErrorKind::Utf8 { pos, field: i })
        })?;
        asm.value(ci, text)?;
    }
    Ok(())
}

/// A streaming reader producing typed rows through a [`RowBinding`].
///
/// Column-to-value wiring follows the header policy: with a header record,
/// columns are matched to header names by exact equality; without one,
/// columns bind to values in declaration order.
pub struct RowReader<R, T> {
    raw: RecordReader<R>,
    asm: Assembler<T>,
    /// Value index -> column index, fixed once headers are resolved.
    map: Option<Vec<Option<usize>>>,
    rec: Record,
}

impl<R: io::Read, T> RowReader<R, T> {
    /// Create a typed reader over `rdr`.
    pub fn new(
        opts: &Options,
        rdr: R,
        binding: RowBinding<T>,
    ) -> Result<RowReader<R, T>> {
        let mut raw = RecordReader::new(opts, rdr)?;
        raw.set_header_detector(header_detector(&binding));
        Ok(RowReader {
            raw,
            asm: Assembler::new(binding),
            map: None,
            rec: Record::new(),
        })
    }

    /// The header record, if the configuration produced one.
    pub fn headers(&mut self) -> Result<Option<&Record>> {
        self.raw.headers()
    }

    /// Read the next row. `Ok(None)` at the end of the data.
    pub fn try_read(&mut self) -> Result<Option<T>> {
        loop {
            match self.try_read_with_comment()? {
                ReadItem::Row(row) => return Ok(Some(row)),
                ReadItem::Comment(_) => continue,
                ReadItem::End => return Ok(None),
            }
        }
    }

    /// Read the next row or comment, in source order.
    pub fn try_read_with_comment(&mut self) -> Result<ReadItem<T>> {
        self.bind()?;
        match self.raw.read_item(&mut self.rec)? {
            RecordItem::Comment(text) => Ok(ReadItem::Comment(text)),
            RecordItem::End => Ok(ReadItem::End),
            RecordItem::Record => {
                let row = self.assemble()?;
                Ok(ReadItem::Row(row))
            }
        }
    }

    /// Read the next row into an existing row object, skipping comments.
    /// Returns false (leaving `row` untouched) at the end of the data.
    pub fn try_read_with_reuse(&mut self, row: &mut T) -> Result<bool> {
        self.bind()?;
        loop {
            match self.raw.read_item(&mut self.rec)? {
                RecordItem::Comment(_) => continue,
                RecordItem::End => return Ok(false),
                RecordItem::Record => {
                    let map =
                        self.map.as_deref().expect("bound before assembling");
                    let result = apply_record(&mut self.asm, map, &self.rec)
                        .and_then(|()| self.asm.finish_into(row));
                    match result {
                        Ok(()) => return Ok(true),
                        Err(err) => return Err(self.fail(err)),
                    }
                }
            }
        }
    }

    /// Read every remaining row.
    pub fn read_all(&mut self) -> Result<Vec<T>> {
        let mut rows = vec![];
        while let Some(row) = self.try_read()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// A lazy iterator over the remaining rows. Single pass; the iterator
    /// ends after the first error.
    pub fn iter(&mut self) -> RowIter<R, T> {
        RowIter { rdr: self, done: false }
    }

    fn bind(&mut self) -> Result<()> {
        if self.map.is_some() {
            return Ok(());
        }
        let headers = self.raw.headers()?.cloned();
        match column_map(headers.as_ref(), self.asm.binding().columns()) {
            Ok(map) => {
                self.map = Some(map);
                Ok(())
            }
            Err(err) => Err(self.raw.poison(err)),
        }
    }

    fn assemble(&mut self) -> Result<T> {
        let map = self.map.as_deref().expect("bound before assembling");
        let result = apply_record(&mut self.asm, map, &self.rec)
            .and_then(|()| self.asm.finish());
        match result {
            Ok(row) => Ok(row),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Abandon the in-progress row and poison the reader.
    fn fail(&mut self, err: Error) -> Error {
        self.asm.abandon();
        self.raw.poison(err)
    }
}

/// A borrowed iterator over the rows of a [`RowReader`].
///
/// The iterator ends after the first error.
pub struct RowIter<'r, R, T> {
    rdr: &'r mut RowReader<R, T>,
    done: bool,
}

impl<'r, R: io::Read, T> Iterator for RowIter<'r, R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if self.done {
            return None;
        }
        match self.rdr.try_read() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadItem, RecordItem, RecordReader, RowReader};
    use crate::binding::{Column, RowBinding};
    use crate::error::ErrorKind;
    use crate::options::{
        Options, OptionsBuilder, ReadHeader, WhitespaceTreatment,
    };
    use crate::record::Record;

    fn opts() -> Options {
        Options::default()
    }

    fn no_headers() -> Options {
        OptionsBuilder::new()
            .read_header(ReadHeader::Never)
            .build()
            .unwrap()
    }

    fn records(opts: &Options, data: &str) -> Vec<Vec<String>> {
        let mut rdr = RecordReader::new(opts, data.as_bytes()).unwrap();
        let mut out = vec![];
        let mut rec = Record::new();
        while rdr.read_record(&mut rec).unwrap() {
            out.push(
                rec.iter()
                    .map(|v| String::from_utf8(v.to_vec()).unwrap())
                    .collect(),
            );
        }
        out
    }

    #[test]
    fn reads_records() {
        let got = records(&no_headers(), "a,b\r\nc,d\r\n");
        assert_eq!(vec![vec!["a", "b"], vec!["c", "d"]], got);
    }

    #[test]
    fn tiny_buffer_still_works() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Never)
            .read_buffer_size_hint(1)
            .build()
            .unwrap();
        let got = records(&opts, "aaa,bbb\r\n\"q,q\",d\r\n");
        assert_eq!(vec![vec!["aaa", "bbb"], vec!["q,q", "d"]], got);
    }

    #[test]
    fn headers_always() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr =
            RecordReader::new(&opts, &b"A,B\r\n1,2\r\n"[..]).unwrap();
        {
            let headers = rdr.headers().unwrap().unwrap();
            assert_eq!(*headers, vec!["A", "B"]);
        }
        let mut rec = Record::new();
        assert!(rdr.read_record(&mut rec).unwrap());
        assert_eq!(rec, vec!["1", "2"]);
        assert!(!rdr.read_record(&mut rec).unwrap());
    }

    #[test]
    fn headers_read_after_records() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr =
            RecordReader::new(&opts, &b"A,B\r\n1,2\r\n"[..]).unwrap();
        let mut rec = Record::new();
        assert!(rdr.read_record(&mut rec).unwrap());
        assert_eq!(rec, vec!["1", "2"]);
        let headers = rdr.headers().unwrap().unwrap();
        assert_eq!(*headers, vec!["A", "B"]);
    }

    #[test]
    fn comments_interleave_in_order() {
        let opts = OptionsBuilder::new()
            .comment(Some(b'#'))
            .read_header(ReadHeader::Never)
            .build()
            .unwrap();
        let mut rdr = RecordReader::new(
            &opts,
            &b"# one\r\na,b\r\n# two\r\nc,d\r\n"[..],
        )
        .unwrap();
        let mut rec = Record::new();
        assert_eq!(
            RecordItem::Comment("one".to_string()),
            rdr.read_item(&mut rec).unwrap()
        );
        assert_eq!(RecordItem::Record, rdr.read_item(&mut rec).unwrap());
        assert_eq!(rec, vec!["a", "b"]);
        assert_eq!(
            RecordItem::Comment("two".to_string()),
            rdr.read_item(&mut rec).unwrap()
        );
        assert_eq!(RecordItem::Record, rdr.read_item(&mut rec).unwrap());
        assert_eq!(RecordItem::End, rdr.read_item(&mut rec).unwrap());
    }

    #[test]
    fn comments_buffered_across_header_lookup() {
        let opts = OptionsBuilder::new()
            .comment(Some(b'#'))
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr =
            RecordReader::new(&opts, &b"# top\r\nA,B\r\n1,2\r\n"[..])
                .unwrap();
        // Asking for headers first must not lose the comment before them.
        assert_eq!(*rdr.headers().unwrap().unwrap(), vec!["A", "B"]);
        let mut rec = Record::new();
        assert_eq!(
            RecordItem::Comment("top".to_string()),
            rdr.read_item(&mut rec).unwrap()
        );
        assert_eq!(RecordItem::Record, rdr.read_item(&mut rec).unwrap());
        assert_eq!(rec, vec!["1", "2"]);
    }

    #[test]
    fn parse_errors_poison() {
        let mut rdr =
            RecordReader::new(&no_headers(), &b"\"a\"x,b\r\n"[..]).unwrap();
        let mut rec = Record::new();
        let err = rdr.read_record(&mut rec).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::UnexpectedCharInEscape { .. }
        ));
        let err = rdr.read_record(&mut rec).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Poisoned(_)));
    }

    #[test]
    fn positions_track_records() {
        let mut rdr =
            RecordReader::new(&no_headers(), &b"aa,bb\r\ncc,dd\r\n"[..])
                .unwrap();
        let mut rec = Record::new();
        assert!(rdr.read_record(&mut rec).unwrap());
        let pos = rec.position().unwrap();
        assert_eq!(0, pos.byte());
        assert_eq!(0, pos.record());
        assert!(rdr.read_record(&mut rec).unwrap());
        let pos = rec.position().unwrap();
        assert_eq!(7, pos.byte());
        assert_eq!(2, pos.line());
        assert_eq!(1, pos.record());
    }

    #[test]
    fn trims_inside_values() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Never)
            .whitespace_treatment(
                WhitespaceTreatment::TRIM_LEADING_IN_VALUES
                    | WhitespaceTreatment::TRIM_TRAILING_IN_VALUES,
            )
            .build()
            .unwrap();
        let got = records(&opts, "  a  ,\" b \"\r\n");
        assert_eq!(vec![vec!["a", "b"]], got);
    }

    #[test]
    fn trim_after_leaves_quoted_content() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Never)
            .whitespace_treatment(WhitespaceTreatment::TRIM_AFTER_VALUES)
            .build()
            .unwrap();
        // Unquoted trailing whitespace is stripped; quoted content keeps
        // its spaces.
        let got = records(&opts, "a  ,\" b \"  \r\n");
        assert_eq!(vec![vec!["a", " b "]], got);
    }

    fn pair_binding() -> RowBinding<(i64, i64)> {
        RowBinding::new(
            || (0, 0),
            vec![
                Column::new(
                    "A",
                    |s: &str, _| s.parse().ok(),
                    |row: &mut (i64, i64), v, _| {
                        row.0 = v;
                        Ok(())
                    },
                ),
                Column::new(
                    "B",
                    |s: &str, _| s.parse().ok(),
                    |row: &mut (i64, i64), v, _| {
                        row.1 = v;
                        Ok(())
                    },
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn typed_reads_with_headers() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr = RowReader::new(
            &opts,
            &b"A,B\r\n1,2\r\n3,4\r\n"[..],
            pair_binding(),
        )
        .unwrap();
        assert_eq!(vec![(1, 2), (3, 4)], rdr.read_all().unwrap());
    }

    #[test]
    fn typed_header_detection_binds_by_name() {
        // Column order in the file differs from declaration order.
        let mut rdr =
            RowReader::new(&opts(), &b"B,A\r\n2,1\r\n"[..], pair_binding())
                .unwrap();
        assert_eq!(vec![(1, 2)], rdr.read_all().unwrap());
    }

    #[test]
    fn typed_header_detection_passes_data_through() {
        // No value matches a column name, so the first record is data.
        let mut rdr =
            RowReader::new(&opts(), &b"5,6\r\n7,8\r\n"[..], pair_binding())
                .unwrap();
        assert_eq!(vec![(5, 6), (7, 8)], rdr.read_all().unwrap());
    }

    #[test]
    fn typed_parse_error_poisons() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr =
            RowReader::new(&opts, &b"A,B\r\nx,2\r\n"[..], pair_binding())
                .unwrap();
        let err = rdr.try_read().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Parse { .. }));
        let err = rdr.try_read().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Poisoned(_)));
    }

    #[test]
    fn typed_setter_failure_poisons() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let binding = RowBinding::new(
            || (0i64, 0i64),
            vec![Column::new(
                "A",
                |s: &str, _| s.parse().ok(),
                |row: &mut (i64, i64), v: i64, _| {
                    if v < 0 {
                        return Err(ErrorKind::Config(
                            "must not be negative".to_string(),
                        )
                        .into());
                    }
                    row.0 = v;
                    Ok(())
                },
            )],
        )
        .unwrap();
        let mut rdr =
            RowReader::new(&opts, &b"A\r\n1\r\n-2\r\n"[..], binding)
                .unwrap();
        assert_eq!(Some((1, 0)), rdr.try_read().unwrap());
        let err = rdr.try_read().unwrap_err();
        match err.into_kind() {
            ErrorKind::Convert { row, column, message } => {
                assert_eq!(1, row);
                assert_eq!("A", column);
                assert!(message.contains("negative"));
            }
            kind => panic!("unexpected error: {:?}", kind),
        }
        let err = rdr.try_read().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Poisoned(_)));
    }

    #[test]
    fn typed_reuse() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr = RowReader::new(
            &opts,
            &b"A,B\r\n1,2\r\n3,4\r\n"[..],
            pair_binding(),
        )
        .unwrap();
        let mut row = (0, 0);
        assert!(rdr.try_read_with_reuse(&mut row).unwrap());
        assert_eq!((1, 2), row);
        assert!(rdr.try_read_with_reuse(&mut row).unwrap());
        assert_eq!((3, 4), row);
        assert!(!rdr.try_read_with_reuse(&mut row).unwrap());
        assert_eq!((3, 4), row);
    }

    #[test]
    fn typed_comments() {
        let opts = OptionsBuilder::new()
            .comment(Some(b'#'))
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr = RowReader::new(
            &opts,
            &b"# top comment\r\nA,B\r\n1,2\r\n"[..],
            pair_binding(),
        )
        .unwrap();
        assert_eq!(
            ReadItem::Comment("top comment".to_string()),
            rdr.try_read_with_comment().unwrap()
        );
        assert_eq!(
            ReadItem::Row((1, 2)),
            rdr.try_read_with_comment().unwrap()
        );
        assert_eq!(ReadItem::End, rdr.try_read_with_comment().unwrap());
    }

    #[test]
    fn comment_only_input_never_builds_a_row() {
        let opts = OptionsBuilder::new()
            .comment(Some(b'#'))
            .read_header(ReadHeader::Never)
            .build()
            .unwrap();
        let binding = RowBinding::new(
            || -> (i64, i64) { panic!("no row should be constructed") },
            vec![Column::new(
                "A",
                |s: &str, _| s.parse().ok(),
                |row: &mut (i64, i64), v, _| {
                    row.0 = v;
                    Ok(())
                },
            )],
        )
        .unwrap();
        let mut rdr =
            RowReader::new(&opts, &b"# only\r\n# comments\r\n"[..], binding)
                .unwrap();
        assert!(rdr.try_read().unwrap().is_none());
    }

    #[test]
    fn required_column_missing_from_headers() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let binding = RowBinding::new(
            || (0i64, 0i64),
            vec![
                Column::new(
                    "A",
                    |s: &str, _| s.parse().ok(),
                    |row: &mut (i64, i64), v, _| {
                        row.0 = v;
                        Ok(())
                    },
                ),
                Column::new(
                    "B",
                    |s: &str, _| s.parse().ok(),
                    |row: &mut (i64, i64), v, _| {
                        row.1 = v;
                        Ok(())
                    },
                )
                .required(),
            ],
        )
        .unwrap();
        let mut rdr =
            RowReader::new(&opts, &b"A,C\r\n1,2\r\n"[..], binding).unwrap();
        let err = rdr.try_read().unwrap_err();
        match err.into_kind() {
            ErrorKind::RequiredColumnMissing { column, row } => {
                assert_eq!("B", column);
                assert_eq!(0, row);
            }
            kind => panic!("unexpected error: {:?}", kind),
        }
    }

    #[test]
    fn iterator_yields_rows() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr = RowReader::new(
            &opts,
            &b"A,B\r\n1,2\r\n3,4\r\n"[..],
            pair_binding(),
        )
        .unwrap();
        let rows: Vec<(i64, i64)> =
            rdr.iter().collect::<crate::Result<_>>().unwrap();
        assert_eq!(vec![(1, 2), (3, 4)], rows);
    }

    #[test]
    fn deserialize_iterator() {
        #[derive(Debug, serde::Deserialize, Eq, PartialEq)]
        struct City {
            name: String,
            pop: u64,
        }
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap();
        let mut rdr = RecordReader::new(
            &opts,
            &b"pop,name\r\n4628910,Boston\r\n"[..],
        )
        .unwrap();
        let rows: Vec<City> =
            rdr.deserialize().collect::<crate::Result<_>>().unwrap();
        assert_eq!(
            vec![City { name: "Boston".to_string(), pop: 4628910 }],
            rows
        );
    }
}
