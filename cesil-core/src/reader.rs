use core::fmt;

use crate::classify::{CharClass, Classifier, CLASS_COUNT};

/// A row (record) ending.
///
/// `Detect` adopts the first ending observed in the data: a lone `\n` locks
/// `Lf`, a `\r` followed by `\n` locks `CrLf`, and a `\r` followed by
/// anything else locks `Cr`. Once locked, later records must agree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RowEnding {
    /// `\r` terminates a record.
    Cr,
    /// `\n` terminates a record.
    Lf,
    /// `\r\n` terminates a record.
    CrLf,
    /// Infer the ending from the first record.
    Detect,
}

impl Default for RowEnding {
    fn default() -> RowEnding {
        RowEnding::Detect
    }
}

/// An error produced while tokenizing CSV data.
///
/// Once a reader reports an error it is stuck: every subsequent call
/// reports the same error until [`Reader::reset`] is called.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadError {
    /// An illegal byte followed the in-quote escape character.
    UnexpectedCharInEscape,
    /// The input ended in the middle of a quoted value.
    UnexpectedEnd,
    /// An illegal byte appeared where a separator or row ending was
    /// expected. This includes row endings that disagree with the
    /// configured (or detected) ending.
    ExpectedEndOfRecordOrValue,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ReadError::UnexpectedCharInEscape => {
                write!(f, "unexpected character in escape sequence")
            }
            ReadError::UnexpectedEnd => {
                write!(f, "unexpected end of data inside a quoted value")
            }
            ReadError::ExpectedEndOfRecordOrValue => {
                write!(f, "expected a separator or row ending")
            }
        }
    }
}

/// An error produced when a dialect cannot be built.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DialectError {
    /// The same byte was assigned to two different dialect roles.
    Conflict(u8),
    /// An in-quote escape byte was configured without a quote byte.
    EscapeWithoutQuote,
    /// `\r` or `\n` was used as a dialect byte.
    Reserved(u8),
    /// A whitespace byte was used as a dialect byte while a whitespace
    /// trimming treatment is enabled.
    Whitespace(u8),
}

impl fmt::Display for DialectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DialectError::Conflict(b) => {
                write!(f, "byte {:?} is used for two dialect roles", b as char)
            }
            DialectError::EscapeWithoutQuote => {
                write!(f, "an escape byte requires a quote byte")
            }
            DialectError::Reserved(b) => {
                write!(
                    f,
                    "byte {:?} is reserved for row endings",
                    b as char
                )
            }
            DialectError::Whitespace(b) => {
                write!(
                    f,
                    "whitespace byte {:?} cannot be a dialect byte when \
                     trimming is enabled",
                    b as char
                )
            }
        }
    }
}

/// Validate a dialect.
///
/// `trimming` is true when any whitespace treatment other than `Preserve`
/// is in effect.
pub(crate) fn validate_dialect(
    separator: u8,
    quote: Option<u8>,
    escape: Option<u8>,
    comment: Option<u8>,
    trimming: bool,
) -> Result<(), DialectError> {
    if escape.is_some() && quote.is_none() {
        return Err(DialectError::EscapeWithoutQuote);
    }
    // The escape byte may coincide with the quote byte (quote doubling),
    // but every other pair of roles must be distinct.
    let mut roles = [Some(separator), quote, comment, None];
    if escape != quote {
        roles[3] = escape;
    }
    for i in 0..roles.len() {
        for j in (i + 1)..roles.len() {
            if let (Some(a), Some(b)) = (roles[i], roles[j]) {
                if a == b {
                    return Err(DialectError::Conflict(a));
                }
            }
        }
    }
    for b in roles.iter().filter_map(|&b| b).chain(escape) {
        if b == b'\r' || b == b'\n' {
            return Err(DialectError::Reserved(b));
        }
        if trimming && (b == b' ' || b == b'\t') {
            return Err(DialectError::Whitespace(b));
        }
    }
    Ok(())
}

/// The result of parsing at most one value from CSV data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadValueResult {
    /// The caller provided input was exhausted before the end of a value
    /// was found.
    InputEmpty,
    /// The caller provided output buffer was filled before an entire value
    /// could be written to it.
    OutputFull,
    /// The end of a value was found. Its unescaped bytes are in the output
    /// buffer.
    Value {
        /// Whether this value also ends its record.
        record_end: bool,
        /// Whether the value was quoted in the input.
        quoted: bool,
    },
    /// The end of a comment line was found. The comment text is in the
    /// output buffer.
    Comment,
    /// All CSV data has been read.
    ///
    /// This is only returned once an empty input buffer is provided by the
    /// caller.
    End,
    /// The input violates the dialect grammar. The error is sticky.
    Error(ReadError),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    RecordStart = 0,
    ValueStart = 1,
    InValue = 2,
    InQuotedValue = 3,
    // A quote inside a quoted value: either the close or, when the escape
    // byte coincides with the quote byte, half of a doubled quote.
    SeenQuote = 4,
    // A distinct escape byte inside a quoted value.
    InEscape = 5,
    // Skipping whitespace between a closed quote and the next separator.
    AfterQuotedValue = 6,
    // A `\r` was seen that may end the record, pending `\n`.
    ExpectLineFeed = 7,
    ExpectLineFeedQuoted = 8,
    // A `\r` was seen at the very start of a record (possible blank line).
    ExpectLineFeedBlank = 9,
    InComment = 10,
    CommentExpectLineFeed = 11,
    Invalid = 12,
}

const STATE_COUNT: usize = 13;

const STATES: [State; STATE_COUNT] = [
    State::RecordStart,
    State::ValueStart,
    State::InValue,
    State::InQuotedValue,
    State::SeenQuote,
    State::InEscape,
    State::AfterQuotedValue,
    State::ExpectLineFeed,
    State::ExpectLineFeedQuoted,
    State::ExpectLineFeedBlank,
    State::InComment,
    State::CommentExpectLineFeed,
    State::Invalid,
];

const CLASSES: [CharClass; CLASS_COUNT] = [
    CharClass::Separator,
    CharClass::QuoteStart,
    CharClass::QuoteEscape,
    CharClass::QuoteStartAndEscape,
    CharClass::Comment,
    CharClass::CarriageReturn,
    CharClass::LineFeed,
    CharClass::Whitespace,
    CharClass::Other,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Op {
    Skip,
    // Append the current byte to the output.
    Append,
    // Append a literal `\r` that was previously held back. The current
    // byte is not consumed and is replayed against the next state.
    AppendCarriageReturn,
    FinishValue { quoted: bool },
    FinishRecord { quoted: bool },
    FinishComment,
    Error(ReadError),
}

#[derive(Clone, Copy, Debug)]
struct Transition {
    next: State,
    op: Op,
    // When set, row-ending detection locks to this ending before the
    // transition applies.
    lock: Option<RowEnding>,
    consume: bool,
}

const fn t(next: State, op: Op, consume: bool) -> Transition {
    Transition { next, op, lock: None, consume }
}

const fn locked(
    next: State,
    op: Op,
    lock: RowEnding,
    consume: bool,
) -> Transition {
    Transition { next, op, lock: Some(lock), consume }
}

const ERR_ESCAPE: Transition = t(
    State::Invalid,
    Op::Error(ReadError::UnexpectedCharInEscape),
    false,
);
const ERR_DELIM: Transition = t(
    State::Invalid,
    Op::Error(ReadError::ExpectedEndOfRecordOrValue),
    false,
);

/// The compiled transition table: one cell per `(State, CharClass)` pair.
#[derive(Clone)]
struct Table {
    cells: [Transition; STATE_COUNT * CLASS_COUNT],
}

impl Table {
    #[inline(always)]
    fn get(&self, state: State, class: CharClass) -> Transition {
        self.cells[state as usize * CLASS_COUNT + class as usize]
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Table(..)")
    }
}

/// A pull based CSV tokenizer.
///
/// This reader parses CSV data using a table-driven finite state machine.
/// Callers feed it input and drain unescaped value bytes incrementally
/// through [`Reader::read_value`].
///
/// Unlike lenient CSV parsers, this one enforces its dialect: a row ending
/// that disagrees with the configured one, a stray byte after a closing
/// quote, or an unterminated quote are reported as [`ReadError`]s rather
/// than being silently reinterpreted.
#[derive(Clone, Debug)]
pub struct Reader {
    classifier: Classifier,
    table: Table,
    state: State,
    error: Option<ReadError>,
    /// The currently effective row ending; `Detect` until locked.
    row_ending: RowEnding,
    /// The ending the reader was configured with, restored by `reset`.
    configured_row_ending: RowEnding,
    trim_before: bool,
    trim_after: bool,
    line: u64,
}

/// Builds a CSV tokenizer with various configuration knobs.
///
/// Once a [`Reader`] is built, its configuration cannot be changed.
#[derive(Clone, Debug)]
pub struct ReaderBuilder {
    separator: u8,
    quote: Option<u8>,
    escape: Option<u8>,
    comment: Option<u8>,
    row_ending: RowEnding,
    trim_before: bool,
    trim_after: bool,
}

impl Default for ReaderBuilder {
    fn default() -> ReaderBuilder {
        ReaderBuilder {
            separator: b',',
            quote: Some(b'"'),
            escape: Some(b'"'),
            comment: None,
            row_ending: RowEnding::default(),
            trim_before: false,
            trim_after: false,
        }
    }
}

impl ReaderBuilder {
    /// Create a new builder.
    pub fn new() -> ReaderBuilder {
        ReaderBuilder::default()
    }

    /// The value separator to use when parsing CSV.
    ///
    /// The default is `b','`.
    pub fn separator(&mut self, separator: u8) -> &mut ReaderBuilder {
        self.separator = separator;
        self
    }

    /// The byte that opens and closes quoted values, or `None` to disable
    /// quoting entirely.
    ///
    /// The default is `Some(b'"')`.
    pub fn quote(&mut self, quote: Option<u8>) -> &mut ReaderBuilder {
        self.quote = quote;
        self
    }

    /// The in-quote escape byte.
    ///
    /// When equal to the quote byte (the default, `Some(b'"')`), a doubled
    /// quote encodes a literal quote. When distinct (say `b'\\'`), the
    /// escape byte may precede a quote or itself inside a quoted value.
    /// `None` means quoted values cannot contain the quote byte at all.
    pub fn escape(&mut self, escape: Option<u8>) -> &mut ReaderBuilder {
        self.escape = escape;
        self
    }

    /// The comment sigil. A record starting with this byte is a comment
    /// line running to the row ending.
    ///
    /// Disabled by default.
    pub fn comment(&mut self, comment: Option<u8>) -> &mut ReaderBuilder {
        self.comment = comment;
        self
    }

    /// The row ending to expect.
    ///
    /// The default is [`RowEnding::Detect`].
    pub fn row_ending(&mut self, ending: RowEnding) -> &mut ReaderBuilder {
        self.row_ending = ending;
        self
    }

    /// Skip whitespace that precedes a value (outside quotes).
    ///
    /// Disabled by default.
    pub fn trim_before(&mut self, yes: bool) -> &mut ReaderBuilder {
        self.trim_before = yes;
        self
    }

    /// Permit (and skip) whitespace between a closing quote and the next
    /// separator or row ending.
    ///
    /// Disabled by default; without it such whitespace is an error.
    pub fn trim_after(&mut self, yes: bool) -> &mut ReaderBuilder {
        self.trim_after = yes;
        self
    }

    /// Build a tokenizer from this configuration.
    pub fn build(&self) -> Result<Reader, DialectError> {
        validate_dialect(
            self.separator,
            self.quote,
            self.escape,
            self.comment,
            self.trim_before || self.trim_after,
        )?;
        let mut rdr = Reader {
            classifier: Classifier::new(
                self.separator,
                self.quote,
                self.escape,
                self.comment,
            ),
            table: Table { cells: [ERR_DELIM; STATE_COUNT * CLASS_COUNT] },
            state: State::RecordStart,
            error: None,
            row_ending: self.row_ending,
            configured_row_ending: self.row_ending,
            trim_before: self.trim_before,
            trim_after: self.trim_after,
            line: 1,
        };
        rdr.table = rdr.build_table();
        Ok(rdr)
    }
}

impl Default for Reader {
    fn default() -> Reader {
        Reader::new()
    }
}

impl Reader {
    /// Create a new tokenizer with the default dialect: comma separated,
    /// doubled `"` quoting, no comments, row ending detection.
    pub fn new() -> Reader {
        ReaderBuilder::new()
            .build()
            .expect("default dialect is valid")
    }

    /// Reset the tokenizer so it behaves as if it had never been used,
    /// including undoing row-ending detection.
    pub fn reset(&mut self) {
        self.state = State::RecordStart;
        self.error = None;
        self.line = 1;
        if self.row_ending != self.configured_row_ending {
            self.row_ending = self.configured_row_ending;
            self.table = self.build_table();
        }
    }

    /// The current line number, measured by the number of `\n` bytes
    /// consumed. Starts at 1.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// The effective row ending. Starts as configured; when configured to
    /// `Detect`, changes to the locked ending once one is observed.
    pub fn row_ending(&self) -> RowEnding {
        self.row_ending
    }

    /// Parse CSV data in `input`, copying unescaped value bytes to
    /// `output`.
    ///
    /// At most one value (or comment line) is parsed per call. The result
    /// tells the caller what happened; the two `usize`s are the number of
    /// bytes read from `input` and written to `output`. A value's bytes
    /// may arrive across several calls (`InputEmpty` / `OutputFull`
    /// results) before the call that reports the value's end.
    ///
    /// An empty `input` signals the end of the data. Keep calling with an
    /// empty input until [`ReadValueResult::End`] is returned: final
    /// values and pending bytes are flushed out one step at a time, the
    /// way mid-stream results are.
    pub fn read_value(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> (ReadValueResult, usize, usize) {
        if let Some(err) = self.error {
            return (ReadValueResult::Error(err), 0, 0);
        }
        if input.is_empty() {
            return self.read_value_eof(output);
        }
        let (mut nin, mut nout) = (0, 0);
        loop {
            if nin >= input.len() {
                return (ReadValueResult::InputEmpty, nin, nout);
            }
            let b = input[nin];
            let trans = self.table.get(self.state, self.classifier.classify(b));
            match trans.op {
                Op::Skip => {}
                Op::Append => {
                    if nout >= output.len() {
                        return (ReadValueResult::OutputFull, nin, nout);
                    }
                    output[nout] = b;
                    nout += 1;
                }
                Op::AppendCarriageReturn => {
                    if nout >= output.len() {
                        return (ReadValueResult::OutputFull, nin, nout);
                    }
                    output[nout] = b'\r';
                    nout += 1;
                }
                Op::Error(err) => {
                    self.error = Some(err);
                    self.state = State::Invalid;
                    return (ReadValueResult::Error(err), nin, nout);
                }
                Op::FinishValue { .. }
                | Op::FinishRecord { .. }
                | Op::FinishComment => {}
            }
            if let Some(ending) = trans.lock {
                self.lock(ending);
            }
            if trans.consume {
                if b == b'\n' {
                    self.line += 1;
                }
                nin += 1;
            }
            self.state = trans.next;
            match trans.op {
                Op::FinishValue { quoted } => {
                    let res =
                        ReadValueResult::Value { record_end: false, quoted };
                    return (res, nin, nout);
                }
                Op::FinishRecord { quoted } => {
                    let res =
                        ReadValueResult::Value { record_end: true, quoted };
                    return (res, nin, nout);
                }
                Op::FinishComment => {
                    return (ReadValueResult::Comment, nin, nout);
                }
                _ => {}
            }
        }
    }

    /// Step the machine at end of input.
    fn read_value_eof(
        &mut self,
        output: &mut [u8],
    ) -> (ReadValueResult, usize, usize) {
        let mut nout = 0;
        loop {
            let trans = match self.transition_eof() {
                None => return (ReadValueResult::End, 0, nout),
                Some(trans) => trans,
            };
            match trans.op {
                Op::Skip => {}
                Op::AppendCarriageReturn => {
                    if nout >= output.len() {
                        return (ReadValueResult::OutputFull, 0, nout);
                    }
                    output[nout] = b'\r';
                    nout += 1;
                }
                Op::Error(err) => {
                    self.error = Some(err);
                    self.state = State::Invalid;
                    return (ReadValueResult::Error(err), 0, nout);
                }
                // `Append` requires a current byte; it cannot occur at EOF.
                Op::Append
                | Op::FinishValue { .. }
                | Op::FinishRecord { .. }
                | Op::FinishComment => {}
            }
            if let Some(ending) = trans.lock {
                self.lock(ending);
            }
            self.state = trans.next;
            match trans.op {
                Op::FinishValue { quoted } => {
                    let res =
                        ReadValueResult::Value { record_end: false, quoted };
                    return (res, 0, nout);
                }
                Op::FinishRecord { quoted } => {
                    let res =
                        ReadValueResult::Value { record_end: true, quoted };
                    return (res, 0, nout);
                }
                Op::FinishComment => {
                    return (ReadValueResult::Comment, 0, nout);
                }
                _ => {}
            }
        }
    }

    /// The transition taken at end of input, or `None` when the machine is
    /// already at a record boundary and the data is simply over.
    fn transition_eof(&self) -> Option<Transition> {
        use self::RowEnding::*;
        use self::State::*;

        let trans = match self.state {
            RecordStart => return None,
            ValueStart | InValue => {
                t(RecordStart, Op::FinishRecord { quoted: false }, false)
            }
            SeenQuote | AfterQuotedValue => {
                t(RecordStart, Op::FinishRecord { quoted: true }, false)
            }
            InQuotedValue | InEscape => {
                t(Invalid, Op::Error(ReadError::UnexpectedEnd), false)
            }
            ExpectLineFeed => match self.row_ending {
                Detect => locked(
                    RecordStart,
                    Op::FinishRecord { quoted: false },
                    Cr,
                    false,
                ),
                // The held `\r` turns out to be data.
                _ => t(InValue, Op::AppendCarriageReturn, false),
            },
            ExpectLineFeedQuoted => match self.row_ending {
                Detect => locked(
                    RecordStart,
                    Op::FinishRecord { quoted: true },
                    Cr,
                    false,
                ),
                _ => t(
                    Invalid,
                    Op::Error(ReadError::ExpectedEndOfRecordOrValue),
                    false,
                ),
            },
            ExpectLineFeedBlank => match self.row_ending {
                Detect => locked(RecordStart, Op::Skip, Cr, false),
                _ => t(InValue, Op::AppendCarriageReturn, false),
            },
            InComment => t(RecordStart, Op::FinishComment, false),
            CommentExpectLineFeed => match self.row_ending {
                Detect => locked(RecordStart, Op::FinishComment, Cr, false),
                _ => t(InComment, Op::AppendCarriageReturn, false),
            },
            Invalid => t(
                Invalid,
                Op::Error(
                    self.error
                        .unwrap_or(ReadError::ExpectedEndOfRecordOrValue),
                ),
                false,
            ),
        };
        Some(trans)
    }

    /// Lock row-ending detection to `ending` and recompile the table.
    fn lock(&mut self, ending: RowEnding) {
        debug_assert_eq!(self.row_ending, RowEnding::Detect);
        self.row_ending = ending;
        self.table = self.build_table();
    }

    fn build_table(&self) -> Table {
        let mut cells = [ERR_DELIM; STATE_COUNT * CLASS_COUNT];
        for &state in STATES.iter() {
            for &class in CLASSES.iter() {
                cells[state as usize * CLASS_COUNT + class as usize] =
                    self.transition(state, class);
            }
        }
        Table { cells }
    }

    /// The transition for one `(state, class)` pair under the current
    /// dialect and row ending. This is the single place the grammar is
    /// defined; the compiled table is just this function, tabulated.
    fn transition(&self, state: State, class: CharClass) -> Transition {
        use self::CharClass::*;
        use self::Op::*;
        use self::RowEnding::*;
        use self::State::*;

        let ending = self.row_ending;
        match state {
            RecordStart => match class {
                Separator => {
                    t(ValueStart, FinishValue { quoted: false }, true)
                }
                QuoteStart | QuoteStartAndEscape => {
                    t(InQuotedValue, Skip, true)
                }
                Comment => t(InComment, Skip, true),
                CarriageReturn => match ending {
                    Lf => ERR_DELIM,
                    Cr => t(RecordStart, Skip, true),
                    CrLf | Detect => t(ExpectLineFeedBlank, Skip, true),
                },
                LineFeed => match ending {
                    Lf => t(RecordStart, Skip, true),
                    Cr | CrLf => ERR_DELIM,
                    Detect => locked(RecordStart, Skip, Lf, true),
                },
                Whitespace if self.trim_before => t(RecordStart, Skip, true),
                QuoteEscape | Whitespace | Other => t(InValue, Append, true),
            },
            ValueStart => match class {
                Separator => {
                    t(ValueStart, FinishValue { quoted: false }, true)
                }
                QuoteStart | QuoteStartAndEscape => {
                    t(InQuotedValue, Skip, true)
                }
                CarriageReturn => match ending {
                    Lf => ERR_DELIM,
                    Cr => t(
                        RecordStart,
                        FinishRecord { quoted: false },
                        true,
                    ),
                    CrLf | Detect => t(ExpectLineFeed, Skip, true),
                },
                LineFeed => match ending {
                    Lf => t(
                        RecordStart,
                        FinishRecord { quoted: false },
                        true,
                    ),
                    Cr | CrLf => ERR_DELIM,
                    Detect => locked(
                        RecordStart,
                        FinishRecord { quoted: false },
                        Lf,
                        true,
                    ),
                },
                Whitespace if self.trim_before => t(ValueStart, Skip, true),
                QuoteEscape | Comment | Whitespace | Other => {
                    t(InValue, Append, true)
                }
            },
            InValue => match class {
                Separator => {
                    t(ValueStart, FinishValue { quoted: false }, true)
                }
                CarriageReturn => match ending {
                    Lf => ERR_DELIM,
                    Cr => t(
                        RecordStart,
                        FinishRecord { quoted: false },
                        true,
                    ),
                    CrLf | Detect => t(ExpectLineFeed, Skip, true),
                },
                LineFeed => match ending {
                    Lf => t(
                        RecordStart,
                        FinishRecord { quoted: false },
                        true,
                    ),
                    Cr | CrLf => ERR_DELIM,
                    Detect => locked(
                        RecordStart,
                        FinishRecord { quoted: false },
                        Lf,
                        true,
                    ),
                },
                // A quote in the middle of an unquoted value is data.
                QuoteStart | QuoteStartAndEscape | QuoteEscape | Comment
                | Whitespace | Other => t(InValue, Append, true),
            },
            InQuotedValue => match class {
                QuoteStart | QuoteStartAndEscape => t(SeenQuote, Skip, true),
                QuoteEscape => t(InEscape, Skip, true),
                // Separators, row endings and everything else are literal
                // inside quotes.
                Separator | Comment | CarriageReturn | LineFeed
                | Whitespace | Other => t(InQuotedValue, Append, true),
            },
            SeenQuote => match class {
                // A doubled quote is a literal quote, but only in the
                // doubling dialect.
                QuoteStartAndEscape => t(InQuotedValue, Append, true),
                QuoteStart => ERR_DELIM,
                Separator => {
                    t(ValueStart, FinishValue { quoted: true }, true)
                }
                CarriageReturn => match ending {
                    Lf => ERR_DELIM,
                    Cr => {
                        t(RecordStart, FinishRecord { quoted: true }, true)
                    }
                    CrLf | Detect => t(ExpectLineFeedQuoted, Skip, true),
                },
                LineFeed => match ending {
                    Lf => {
                        t(RecordStart, FinishRecord { quoted: true }, true)
                    }
                    Cr | CrLf => ERR_DELIM,
                    Detect => locked(
                        RecordStart,
                        FinishRecord { quoted: true },
                        Lf,
                        true,
                    ),
                },
                Whitespace if self.trim_after => {
                    t(AfterQuotedValue, Skip, true)
                }
                QuoteEscape | Comment | Whitespace | Other => ERR_ESCAPE,
            },
            InEscape => match class {
                QuoteStart | QuoteStartAndEscape | QuoteEscape => {
                    t(InQuotedValue, Append, true)
                }
                Separator | Comment | CarriageReturn | LineFeed
                | Whitespace | Other => ERR_ESCAPE,
            },
            AfterQuotedValue => match class {
                Whitespace => t(AfterQuotedValue, Skip, true),
                Separator => {
                    t(ValueStart, FinishValue { quoted: true }, true)
                }
                CarriageReturn => match ending {
                    Lf => ERR_DELIM,
                    Cr => {
                        t(RecordStart, FinishRecord { quoted: true }, true)
                    }
                    CrLf | Detect => t(ExpectLineFeedQuoted, Skip, true),
                },
                LineFeed => match ending {
                    Lf => {
                        t(RecordStart, FinishRecord { quoted: true }, true)
                    }
                    Cr | CrLf => ERR_DELIM,
                    Detect => locked(
                        RecordStart,
                        FinishRecord { quoted: true },
                        Lf,
                        true,
                    ),
                },
                QuoteStart | QuoteStartAndEscape | QuoteEscape | Comment
                | Other => ERR_DELIM,
            },
            ExpectLineFeed => match class {
                LineFeed => match ending {
                    Detect => locked(
                        RecordStart,
                        FinishRecord { quoted: false },
                        CrLf,
                        true,
                    ),
                    _ => t(
                        RecordStart,
                        FinishRecord { quoted: false },
                        true,
                    ),
                },
                _ => match ending {
                    // The held `\r` was data after all; replay the byte.
                    CrLf => t(InValue, AppendCarriageReturn, false),
                    Detect => locked(
                        RecordStart,
                        FinishRecord { quoted: false },
                        Cr,
                        false,
                    ),
                    Cr | Lf => ERR_DELIM,
                },
            },
            ExpectLineFeedQuoted => match class {
                LineFeed => match ending {
                    Detect => locked(
                        RecordStart,
                        FinishRecord { quoted: true },
                        CrLf,
                        true,
                    ),
                    _ => {
                        t(RecordStart, FinishRecord { quoted: true }, true)
                    }
                },
                _ => match ending {
                    Detect => locked(
                        RecordStart,
                        FinishRecord { quoted: true },
                        Cr,
                        false,
                    ),
                    // After a closing quote a held `\r` cannot be data.
                    _ => ERR_DELIM,
                },
            },
            ExpectLineFeedBlank => match class {
                LineFeed => match ending {
                    Detect => locked(RecordStart, Skip, CrLf, true),
                    _ => t(RecordStart, Skip, true),
                },
                _ => match ending {
                    CrLf => t(InValue, AppendCarriageReturn, false),
                    Detect => locked(RecordStart, Skip, Cr, false),
                    Cr | Lf => ERR_DELIM,
                },
            },
            InComment => match class {
                CarriageReturn => match ending {
                    Cr => t(RecordStart, FinishComment, true),
                    CrLf | Detect => {
                        t(CommentExpectLineFeed, Skip, true)
                    }
                    // Comments are free text; a stray `\r` is content.
                    Lf => t(InComment, Append, true),
                },
                LineFeed => match ending {
                    Lf => t(RecordStart, FinishComment, true),
                    Detect => {
                        locked(RecordStart, FinishComment, Lf, true)
                    }
                    Cr | CrLf => t(InComment, Append, true),
                },
                Separator | QuoteStart | QuoteEscape
                | QuoteStartAndEscape | Comment | Whitespace | Other => {
                    t(InComment, Append, true)
                }
            },
            CommentExpectLineFeed => match class {
                LineFeed => match ending {
                    Detect => {
                        locked(RecordStart, FinishComment, CrLf, true)
                    }
                    _ => t(RecordStart, FinishComment, true),
                },
                _ => match ending {
                    CrLf => t(InComment, AppendCarriageReturn, false),
                    Detect => {
                        locked(RecordStart, FinishComment, Cr, false)
                    }
                    Cr | Lf => ERR_DELIM,
                },
            },
            Invalid => ERR_DELIM,
        }
    }
}
