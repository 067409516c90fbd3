/// Where in the read lifecycle a user callback is being invoked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadMode {
    /// Raw values are being tokenized out of the input.
    ReadingColumn,
    /// A single column's text is being parsed and applied.
    ConvertingColumn,
    /// A whole record is being turned into a row.
    ConvertingRow,
}

/// Context handed to parsers, setters and resets during reading.
#[derive(Clone, Copy, Debug)]
pub struct ReadContext<'a> {
    mode: ReadMode,
    row: u64,
    column: Option<(usize, &'a str)>,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(
        mode: ReadMode,
        row: u64,
        column: Option<(usize, &'a str)>,
    ) -> ReadContext<'a> {
        ReadContext { mode, row, column }
    }

    /// The lifecycle phase of the current callback.
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// The zero-based data record number being read.
    pub fn row_number(&self) -> u64 {
        self.row
    }

    /// The index and name of the column being converted, when there is
    /// one.
    pub fn column(&self) -> Option<(usize, &'a str)> {
        self.column
    }
}

/// Where in the write lifecycle a user callback is being invoked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteMode {
    /// Column names are being gathered for the header record.
    DiscoveringColumns,
    /// A row is being broken into cells.
    DiscoveringCells,
    /// A single column's value is being formatted.
    WritingColumn,
}

/// Context handed to getters, formatters and serialize predicates during
/// writing.
#[derive(Clone, Copy, Debug)]
pub struct WriteContext<'a> {
    mode: WriteMode,
    row: u64,
    column: Option<(usize, &'a str)>,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(
        mode: WriteMode,
        row: u64,
        column: Option<(usize, &'a str)>,
    ) -> WriteContext<'a> {
        WriteContext { mode, row, column }
    }

    /// The lifecycle phase of the current callback.
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// The zero-based row number being written.
    pub fn row_number(&self) -> u64 {
        self.row
    }

    /// The index and name of the column being written, when there is one.
    pub fn column(&self) -> Option<(usize, &'a str)> {
        self.column
    }
}
