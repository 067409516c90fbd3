/*!
Async readers and writers, mirroring the blocking API over tokio's I/O
traits.

The only suspension points are buffer refills (readers) and staging
drains (writers). Cancellation follows Rust's drop-based model: dropping
an in-flight operation's future is observed by the next call, which fails
with `Cancelled` and poisons the reader or writer for good.

Async writers have no destructor-driven finish: call
[`AsyncRecordWriter::finish`] (or `into_inner`) before dropping one, or
the trailing row ending and any staged output are lost.
*/

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::binding::{Assembler, RowBinding};
use crate::buffer::ReadBuffer;
use crate::error::{Error, ErrorKind, PoisonKind, Result};
use crate::options::{Options, WriteHeader};
use crate::reader::{
    apply_record, column_map, header_detector, ReadItem, ReadState,
    RecordItem,
};
use crate::record::{Position, Record};
use crate::writer::{build_cells, WriteColumn, WriteEngine};

/// The async twin of [`RecordReader`](crate::RecordReader).
pub struct AsyncRecordReader<R> {
    rdr: R,
    buf: ReadBuffer,
    state: ReadState,
    in_flight: bool,
}

impl<R: AsyncRead + Unpin> AsyncRecordReader<R> {
    /// Create a reader over `rdr` with the given options.
    pub fn new(opts: &Options, rdr: R) -> Result<AsyncRecordReader<R>> {
        Ok(AsyncRecordReader {
            rdr,
            buf: ReadBuffer::new(
                opts.buffer_pool(),
                opts.read_buffer_capacity(),
            )?,
            state: ReadState::new(opts),
            in_flight: false,
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

    /// The header record, reading it on first use.
    pub async fn headers(&mut self) -> Result<Option<&Record>> {
        self.begin()?;
        while !self.state.headers_done() {
            let step = self.step_headers().await;
            if let Err(err) = step {
                self.in_flight = false;
                return Err(self.state.poison(err));
            }
        }
        self.in_flight = false;
        Ok(self.state.headers())
    }

    /// Read the next item: a record (into `rec`), a comment, or the end
    /// of the data.
    pub async fn read_item(&mut self, rec: &mut Record) -> Result<RecordItem> {
        self.begin()?;
        rec.clear();
        let result = self.read_item_inner(rec).await;
        self.in_flight = false;
        result.map_err(|err| self.state.poison(err))
    }

    /// Read the next data record into `rec`, discarding comments.
    /// Returns false at the end of the data.
    pub async fn read_record(&mut self, rec: &mut Record) -> Result<bool> {
        loop {
            match self.read_item(rec).await? {
                RecordItem::Record => return Ok(true),
                RecordItem::Comment(_) => continue,
                RecordItem::End => return Ok(false),
            }
        }
    }

    /// Mark the start of an operation; a still-set flag means the
    /// previous operation's future was dropped mid-await.
    fn begin(&mut self) -> Result<()> {
        self.state.check_poisoned()?;
        if self.in_flight {
            let err = Error::from(ErrorKind::Cancelled);
            return Err(self.state.poison(err));
        }
        self.in_flight = true;
        Ok(())
    }

    async fn read_item_inner(&mut self, rec: &mut Record) -> Result<RecordItem> {
        loop {
            if let Some(item) = self.state.pop_pending(rec) {
                return Ok(item);
            }
            self.refill().await?;
            let input: &[u8] = if self.state.input_done() && self.buf.is_empty()
            {
                &[]
            } else {
                self.buf.contents()
            };
            let (n, item) = self.state.feed(input, rec)?;
            self.buf.consume(n);
            if let Some(item) = item {
                return Ok(item);
            }
        }
    }

    async fn step_headers(&mut self) -> Result<()> {
        self.refill().await?;
        let input: &[u8] = if self.state.input_done() && self.buf.is_empty() {
            &[]
        } else {
            self.buf.contents()
        };
        let n = self.state.scan_for_headers(input)?;
        self.buf.consume(n);
        Ok(())
    }

    async fn refill(&mut self) -> Result<()> {
        if self.buf.is_empty() && !self.state.input_done() {
            if self.buf.fill_async(&mut self.rdr).await? == 0 {
                self.state.mark_input_done();
            }
        }
        Ok(())
    }
}

/// The async twin of [`RowReader`](crate::RowReader).
pub struct AsyncRowReader<R, T> {
    raw: AsyncRecordReader<R>,
    asm: Assembler<T>,
    map: Option<Vec<Option<usize>>>,
    rec: Record,
}

impl<R: AsyncRead + Unpin, T> AsyncRowReader<R, T> {
    /// Create a typed reader over `rdr`.
    pub fn new(
        opts: &Options,
        rdr: R,
        binding: RowBinding<T>,
    ) -> Result<AsyncRowReader<R, T>> {
        let mut raw = AsyncRecordReader::new(opts, rdr)?;
        raw.set_header_detector(header_detector(&binding));
        Ok(AsyncRowReader {
            raw,
            asm: Assembler::new(binding),
            map: None,
            rec: Record::new(),
        })
    }

    /// The header record, if the configuration produced one.
    pub async fn headers(&mut self) -> Result<Option<&Record>> {
        self.raw.headers().await
    }

    /// Read the next row. `Ok(None)` at the end of the data.
    pub async fn try_read(&mut self) -> Result<Option<T>> {
        loop {
            match self.try_read_with_comment().await? {
                ReadItem::Row(row) => return Ok(Some(row)),
                ReadItem::Comment(_) => continue,
                ReadItem::End => return Ok(None),
            }
        }
    }

    /// Read the next row or comment, in source order.
    pub async fn try_read_with_comment(&mut self) -> Result<ReadItem<T>> {
        self.bind().await?;
        match self.raw.read_item(&mut self.rec).await? {
            RecordItem::Comment(text) => Ok(ReadItem::Comment(text)),
            RecordItem::End => Ok(ReadItem::End),
            RecordItem::Record => {
                let map = self.map.as_deref().expect("bound before assembling");
                let result = apply_record(&mut self.asm, map, &self.rec)
                    .and_then(|()| self.asm.finish());
                match result {
                    Ok(row) => Ok(ReadItem::Row(row)),
                    Err(err) => {
                        self.asm.abandon();
                        Err(self.raw.poison(err))
                    }
                }
            }
        }
    }

    /// Read the next row into an existing row object, skipping comments.
    pub async fn try_read_with_reuse(&mut self, row: &mut T) -> Result<bool> {
        self.bind().await?;
        loop {
            match self.raw.read_item(&mut self.rec).await? {
                RecordItem::Comment(_) => continue,
                RecordItem::End => return Ok(false),
                RecordItem::Record => {
                    let map =
                        self.map.as_deref().expect("bound before assembling");
                    let result = apply_record(&mut self.asm, map, &self.rec)
                        .and_then(|()| self.asm.finish_into(row));
                    match result {
                        Ok(()) => return Ok(true),
                        Err(err) => {
                            self.asm.abandon();
                            return Err(self.raw.poison(err));
                        }
                    }
                }
            }
        }
    }

    /// Read every remaining row.
    pub async fn read_all(&mut self) -> Result<Vec<T>> {
        let mut rows = vec![];
        while let Some(row) = self.try_read().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn bind(&mut self) -> Result<()> {
        if self.map.is_some() {
            return Ok(());
        }
        let headers = self.raw.headers().await?.cloned();
        match column_map(headers.as_ref(), self.asm.binding().columns()) {
            Ok(map) => {
                self.map = Some(map);
                Ok(())
            }
            Err(err) => Err(self.raw.poison(err)),
        }
    }
}

/// The async twin of [`RecordWriter`](crate::RecordWriter).
///
/// Unlike the blocking writer, dropping this one does not finish it.
pub struct AsyncRecordWriter<W> {
    engine: WriteEngine,
    wtr: W,
    capacity: usize,
    write_header: WriteHeader,
    header_written: bool,
    poisoned: Option<PoisonKind>,
    finished: bool,
    in_flight: bool,
}

impl<W: AsyncWrite + Unpin> AsyncRecordWriter<W> {
    /// Create a writer over `wtr` with the given options.
    pub fn new(opts: &Options, wtr: W) -> AsyncRecordWriter<W> {
        AsyncRecordWriter {
            engine: WriteEngine::new(opts),
            wtr,
            capacity: opts.write_buffer_capacity(),
            write_header: opts.write_header(),
            header_written: false,
            poisoned: None,
            finished: false,
            in_flight: false,
        }
    }

    /// Write one record.
    ///
    /// Raw records are written as given; a caller mixing `write_record`
    /// with [`AsyncRecordWriter::serialize`] is assumed to have written
    /// any header itself.
    pub async fn write_record<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.begin()?;
        self.header_written = true;
        let result = async {
            self.engine.encode_record(values)?;
            self.drain(false).await
        }
        .await;
        self.end(result)
    }

    /// Write a comment (one line per line of input).
    pub async fn write_comment(&mut self, text: &str) -> Result<()> {
        self.begin()?;
        let result = async {
            self.engine.encode_comment(text)?;
            self.drain(false).await
        }
        .await;
        self.end(result)
    }

    /// Serialize `value` as one record, writing a header record of its
    /// field names first when the options ask for one.
    pub async fn serialize<S: serde::Serialize>(
        &mut self,
        value: S,
    ) -> Result<()> {
        self.begin()?;
        let result = async {
            if !self.header_written {
                self.header_written = true;
                if self.write_header == WriteHeader::Always {
                    if let Some(names) = crate::ser::header_record(&value)? {
                        self.engine.encode_record(&names)?;
                    }
                }
            }
            let cells = crate::ser::to_record(&value)?;
            self.engine.encode_record(&cells)?;
            self.drain(false).await
        }
        .await;
        self.end(result)
    }

    pub(crate) fn write_typed_header(&mut self) -> bool {
        let write = !self.header_written
            && self.write_header == WriteHeader::Always;
        self.header_written = true;
        write
    }

    /// Flush all staged output to the underlying writer.
    pub async fn flush(&mut self) -> Result<()> {
        self.begin()?;
        let result = async {
            self.drain(true).await?;
            self.wtr.flush().await?;
            Ok(())
        }
        .await;
        self.end(result)
    }

    /// Settle the trailing row ending and flush. Further writes fail.
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.begin()?;
        self.finished = true;
        let result = async {
            self.engine.finish();
            self.drain(true).await?;
            self.wtr.flush().await?;
            Ok(())
        }
        .await;
        self.end(result)
    }

    /// Finish and return the underlying writer.
    pub async fn into_inner(mut self) -> Result<W> {
        self.finish().await?;
        Ok(self.wtr)
    }

    pub(crate) fn poison(&mut self, err: Error) -> Error {
        let kind = match err.kind() {
            ErrorKind::Cancelled => PoisonKind::Cancellation,
            _ => PoisonKind::Error,
        };
        self.poisoned = Some(kind);
        err
    }

    fn begin(&mut self) -> Result<()> {
        if let Some(kind) = self.poisoned {
            return Err(ErrorKind::Poisoned(kind).into());
        }
        if self.in_flight {
            let err = Error::from(ErrorKind::Cancelled);
            return Err(self.poison(err));
        }
        if self.finished {
            return Err(ErrorKind::Poisoned(PoisonKind::Error).into());
        }
        self.in_flight = true;
        Ok(())
    }

    fn end(&mut self, result: Result<()>) -> Result<()> {
        self.in_flight = false;
        result.map_err(|err| self.poison(err))
    }

    async fn drain(&mut self, force: bool) -> Result<()> {
        if !force && self.engine.staging().len() < self.capacity.max(1) {
            return Ok(());
        }
        if self.engine.staging().is_empty() {
            return Ok(());
        }
        self.wtr.write_all(self.engine.staging()).await?;
        self.engine.clear_staging();
        Ok(())
    }
}

/// The async twin of [`RowWriter`](crate::RowWriter).
pub struct AsyncRowWriter<W, T> {
    raw: AsyncRecordWriter<W>,
    columns: Vec<WriteColumn<T>>,
    cells: Vec<Vec<u8>>,
    row: u64,
}

impl<W: AsyncWrite + Unpin, T> AsyncRowWriter<W, T> {
    /// Create a typed writer over `wtr`.
    pub fn new(
        opts: &Options,
        wtr: W,
        columns: Vec<WriteColumn<T>>,
    ) -> AsyncRowWriter<W, T> {
        AsyncRowWriter {
            raw: AsyncRecordWriter::new(opts, wtr),
            columns,
            cells: vec![],
            row: 0,
        }
    }

    /// Write one row, emitting the header record first when configured.
    pub async fn write(&mut self, row: &T) -> Result<()> {
        if self.raw.write_typed_header() {
            let names: Vec<Vec<u8>> = self
                .columns
                .iter()
                .map(|c| c.name().as_bytes().to_vec())
                .collect();
            self.raw.write_record(&names).await?;
        }
        if let Err(err) = build_cells(&self.columns, &mut self.cells, row, self.row)
        {
            return Err(self.raw.poison(err));
        }
        self.raw.write_record(&self.cells).await?;
        self.row += 1;
        Ok(())
    }

    /// Write every row in `rows`.
    pub async fn write_all<'a, I>(&mut self, rows: I) -> Result<()>
    where
        T: 'a,
        I: IntoIterator<Item = &'a T>,
    {
        for row in rows {
            self.write(row).await?;
        }
        Ok(())
    }

    /// Write a comment line (or several, for multi-line text).
    pub async fn write_comment(&mut self, text: &str) -> Result<()> {
        self.raw.write_comment(text).await
    }

    /// Flush all staged output.
    pub async fn flush(&mut self) -> Result<()> {
        self.raw.flush().await
    }

    /// Settle the trailing row ending and flush. Further writes fail.
    pub async fn finish(&mut self) -> Result<()> {
        self.raw.finish().await
    }

    /// Finish and return the underlying writer.
    pub async fn into_inner(self) -> Result<W> {
        self.raw.into_inner().await
    }
}

#[cfg(test)]
mod tests {
    use super::{AsyncRecordReader, AsyncRecordWriter, AsyncRowReader};
    use crate::binding::{Column, RowBinding};
    use crate::error::ErrorKind;
    use crate::options::{Options, OptionsBuilder, ReadHeader};
    use crate::record::Record;

    fn opts_headers() -> Options {
        OptionsBuilder::new()
            .read_header(ReadHeader::Always)
            .build()
            .unwrap()
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

    #[tokio::test]
    async fn async_records() {
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Never)
            .build()
            .unwrap();
        let mut rdr =
            AsyncRecordReader::new(&opts, &b"a,b\r\nc,d\r\n"[..]).unwrap();
        let mut rec = Record::new();
        assert!(rdr.read_record(&mut rec).await.unwrap());
        assert_eq!(rec, vec!["a", "b"]);
        assert!(rdr.read_record(&mut rec).await.unwrap());
        assert_eq!(rec, vec!["c", "d"]);
        assert!(!rdr.read_record(&mut rec).await.unwrap());
    }

    #[tokio::test]
    async fn async_typed_rows() {
        let mut rdr = AsyncRowReader::new(
            &opts_headers(),
            &b"A,B\r\n1,2\r\n3,4\r\n"[..],
            pair_binding(),
        )
        .unwrap();
        assert_eq!(vec![(1, 2), (3, 4)], rdr.read_all().await.unwrap());
    }

    #[tokio::test]
    async fn async_writer_round_trip() {
        let opts = Options::default();
        let mut wtr = AsyncRecordWriter::new(&opts, vec![]);
        wtr.write_record(["a,b", "c"]).await.unwrap();
        wtr.write_record(["d", "e"]).await.unwrap();
        let out = wtr.into_inner().await.unwrap();
        assert_eq!(b"\"a,b\",c\r\nd,e\r\n".to_vec(), out);
    }

    #[tokio::test]
    async fn async_serialize_with_headers() {
        #[derive(serde::Serialize)]
        struct Row {
            a: u32,
            b: &'static str,
        }
        let opts = Options::default();
        let mut wtr = AsyncRecordWriter::new(&opts, vec![]);
        wtr.serialize(Row { a: 1, b: "x" }).await.unwrap();
        wtr.serialize(Row { a: 2, b: "y" }).await.unwrap();
        let out = wtr.into_inner().await.unwrap();
        assert_eq!(b"a,b\r\n1,x\r\n2,y\r\n".to_vec(), out);
    }

    #[tokio::test]
    async fn dropped_read_poisons_with_cancellation() {
        // An empty duplex pipe never delivers data, so the read suspends
        // until the timeout drops it mid-flight.
        let (client, _server) = tokio::io::duplex(64);
        let opts = OptionsBuilder::new()
            .read_header(ReadHeader::Never)
            .build()
            .unwrap();
        let mut rdr = AsyncRecordReader::new(&opts, client).unwrap();
        let mut rec = Record::new();
        let read = rdr.read_item(&mut rec);
        let timed =
            tokio::time::timeout(std::time::Duration::from_millis(20), read)
                .await;
        assert!(timed.is_err(), "read should still be pending");

        let err = rdr.read_item(&mut rec).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Cancelled));
        let err = rdr.read_item(&mut rec).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Poisoned(crate::PoisonKind::Cancellation)
        ));
    }
}
