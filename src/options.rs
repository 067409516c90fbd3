use std::sync::Arc;

use cesil_core::RowEnding;

use crate::error::{ErrorKind, Result};
use crate::pool::BufferPool;

/// The default read buffer capacity, in bytes.
pub(crate) const DEFAULT_READ_BUFFER: usize = 8 * (1 << 10);
/// The default write staging capacity, in bytes.
pub(crate) const DEFAULT_WRITE_BUFFER: usize = 8 * (1 << 10);

/// Whether to treat the first record as a header record when reading.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadHeader {
    /// The first record is always the header record.
    Always,
    /// The first record is always data.
    Never,
    /// The first record is a header record if and only if any of its
    /// values matches a bound column name.
    Detect,
}

/// Whether to emit a header record before the first row when writing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteHeader {
    /// Emit a header record.
    Always,
    /// Never emit a header record.
    Never,
}

/// Whether the written data ends with a row ending after the last record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteTrailingRowEnding {
    /// Emit a final row ending when the writer is finished.
    Always,
    /// The last record is not followed by a row ending.
    Never,
}

/// A set of whitespace treatments applied while reading.
///
/// Treatments combine with `|`:
///
/// ```
/// use cesil::WhitespaceTreatment;
///
/// let trim = WhitespaceTreatment::TRIM_BEFORE_VALUES
///     | WhitespaceTreatment::TRIM_AFTER_VALUES;
/// assert!(trim.contains(WhitespaceTreatment::TRIM_BEFORE_VALUES));
/// assert!(!trim.contains(WhitespaceTreatment::TRIM_LEADING_IN_VALUES));
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WhitespaceTreatment(u8);

impl WhitespaceTreatment {
    /// Keep whitespace exactly as it appears.
    pub const PRESERVE: WhitespaceTreatment = WhitespaceTreatment(0);
    /// Skip whitespace between a separator and the start of the next
    /// value (including before an opening quote).
    pub const TRIM_BEFORE_VALUES: WhitespaceTreatment =
        WhitespaceTreatment(1 << 0);
    /// Strip whitespace between the end of a value and the next
    /// separator. For quoted values this permits whitespace after the
    /// closing quote; for unquoted values it strips the value's trailing
    /// whitespace.
    pub const TRIM_AFTER_VALUES: WhitespaceTreatment =
        WhitespaceTreatment(1 << 1);
    /// Strip leading whitespace inside each value, quoted or not.
    pub const TRIM_LEADING_IN_VALUES: WhitespaceTreatment =
        WhitespaceTreatment(1 << 2);
    /// Strip trailing whitespace inside each value, quoted or not.
    pub const TRIM_TRAILING_IN_VALUES: WhitespaceTreatment =
        WhitespaceTreatment(1 << 3);

    /// Whether every treatment in `other` is enabled in `self`.
    pub fn contains(self, other: WhitespaceTreatment) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no treatment at all is enabled.
    pub fn is_preserve(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for WhitespaceTreatment {
    type Output = WhitespaceTreatment;

    fn bitor(self, rhs: WhitespaceTreatment) -> WhitespaceTreatment {
        WhitespaceTreatment(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for WhitespaceTreatment {
    fn bitor_assign(&mut self, rhs: WhitespaceTreatment) {
        self.0 |= rhs.0;
    }
}

/// An immutable, validated CSV configuration.
///
/// Options are built once through an [`OptionsBuilder`], shared cheaply by
/// cloning, and handed to every reader and writer constructor. All readers
/// and writers built from the same options share one buffer pool.
#[derive(Clone, Debug)]
pub struct Options {
    pub(crate) separator: u8,
    pub(crate) quote: Option<u8>,
    pub(crate) escape: Option<u8>,
    pub(crate) comment: Option<u8>,
    pub(crate) row_ending: RowEnding,
    pub(crate) read_header: ReadHeader,
    pub(crate) write_header: WriteHeader,
    pub(crate) write_trailing_row_ending: WriteTrailingRowEnding,
    pub(crate) whitespace: WhitespaceTreatment,
    pub(crate) read_buffer_size_hint: usize,
    pub(crate) write_buffer_size_hint: Option<usize>,
    pub(crate) pool: Arc<BufferPool>,
}

impl Default for Options {
    fn default() -> Options {
        OptionsBuilder::new().build().expect("default options are valid")
    }
}

impl Options {
    /// Return a builder for customizing options.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    /// The value separator.
    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// The quote byte, if quoting is enabled.
    pub fn quote(&self) -> Option<u8> {
        self.quote
    }

    /// The in-quote escape byte, if any.
    pub fn escape(&self) -> Option<u8> {
        self.escape
    }

    /// The comment sigil, if comments are enabled.
    pub fn comment(&self) -> Option<u8> {
        self.comment
    }

    /// The configured row ending.
    pub fn row_ending(&self) -> RowEnding {
        self.row_ending
    }

    /// The header policy when reading.
    pub fn read_header(&self) -> ReadHeader {
        self.read_header
    }

    /// The header policy when writing.
    pub fn write_header(&self) -> WriteHeader {
        self.write_header
    }

    /// Whether written data ends with a trailing row ending.
    pub fn write_trailing_row_ending(&self) -> WriteTrailingRowEnding {
        self.write_trailing_row_ending
    }

    /// The whitespace treatments applied while reading.
    pub fn whitespace_treatment(&self) -> WhitespaceTreatment {
        self.whitespace
    }

    /// The buffer pool shared by readers and writers built from these
    /// options.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub(crate) fn read_buffer_capacity(&self) -> usize {
        match self.read_buffer_size_hint {
            0 => DEFAULT_READ_BUFFER,
            n => n,
        }
    }

    /// The write staging capacity; 0 disables staging entirely.
    pub(crate) fn write_buffer_capacity(&self) -> usize {
        self.write_buffer_size_hint.unwrap_or(DEFAULT_WRITE_BUFFER)
    }

    pub(crate) fn trimming(&self) -> bool {
        !self.whitespace.is_preserve()
    }

    /// Build the tokenizer this configuration describes.
    pub(crate) fn core_reader(&self) -> cesil_core::Reader {
        cesil_core::ReaderBuilder::new()
            .separator(self.separator)
            .quote(self.quote)
            .escape(self.escape)
            .comment(self.comment)
            .row_ending(self.row_ending)
            .trim_before(
                self.whitespace
                    .contains(WhitespaceTreatment::TRIM_BEFORE_VALUES),
            )
            .trim_after(
                self.whitespace
                    .contains(WhitespaceTreatment::TRIM_AFTER_VALUES),
            )
            .build()
            .expect("options were validated at build time")
    }

    /// Build the field encoder this configuration describes.
    pub(crate) fn core_writer(&self) -> cesil_core::Writer {
        cesil_core::WriterBuilder::new()
            .separator(self.separator)
            .quote(self.quote)
            .escape(self.escape)
            .comment(self.comment)
            .row_ending(self.row_ending)
            .quote_whitespace_edges(self.trimming())
            .build()
            .expect("options were validated at build time")
    }
}

/// A mutable builder for [`Options`].
///
/// # Example
///
/// ```
/// use cesil::{Options, ReadHeader};
/// use cesil::RowEnding;
///
/// let opts = Options::builder()
///     .separator(b';')
///     .comment(Some(b'#'))
///     .row_ending(RowEnding::Lf)
///     .read_header(ReadHeader::Always)
///     .build()
///     .unwrap();
/// assert_eq!(b';', opts.separator());
/// ```
#[derive(Clone, Debug)]
pub struct OptionsBuilder {
    separator: u8,
    quote: Option<u8>,
    escape: Option<u8>,
    comment: Option<u8>,
    row_ending: RowEnding,
    read_header: ReadHeader,
    write_header: WriteHeader,
    write_trailing_row_ending: WriteTrailingRowEnding,
    whitespace: WhitespaceTreatment,
    read_buffer_size_hint: usize,
    write_buffer_size_hint: Option<usize>,
    pool: Option<Arc<BufferPool>>,
}

impl Default for OptionsBuilder {
    fn default() -> OptionsBuilder {
        OptionsBuilder {
            separator: b',',
            quote: Some(b'"'),
            escape: Some(b'"'),
            comment: None,
            row_ending: RowEnding::Detect,
            read_header: ReadHeader::Detect,
            write_header: WriteHeader::Always,
            write_trailing_row_ending: WriteTrailingRowEnding::Always,
            whitespace: WhitespaceTreatment::PRESERVE,
            read_buffer_size_hint: 0,
            write_buffer_size_hint: None,
            pool: None,
        }
    }
}

impl OptionsBuilder {
    /// Create a builder with the default configuration: comma separated,
    /// doubled `"` quoting, no comments, row ending detection, header
    /// detection, headers and a trailing row ending written.
    pub fn new() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// The value separator. The default is `b','`.
    pub fn separator(&mut self, separator: u8) -> &mut OptionsBuilder {
        self.separator = separator;
        self
    }

    /// The quote byte, or `None` to disable quoting. The default is
    /// `Some(b'"')`.
    pub fn quote(&mut self, quote: Option<u8>) -> &mut OptionsBuilder {
        self.quote = quote;
        self
    }

    /// The in-quote escape byte. Must be absent when `quote` is absent.
    /// The default is `Some(b'"')`, i.e. quote doubling.
    pub fn escape(&mut self, escape: Option<u8>) -> &mut OptionsBuilder {
        self.escape = escape;
        self
    }

    /// The comment sigil. Disabled by default.
    pub fn comment(&mut self, comment: Option<u8>) -> &mut OptionsBuilder {
        self.comment = comment;
        self
    }

    /// The row ending. The default is [`RowEnding::Detect`], which infers
    /// the ending from the first record when reading and writes `\r\n`.
    pub fn row_ending(&mut self, ending: RowEnding) -> &mut OptionsBuilder {
        self.row_ending = ending;
        self
    }

    /// The header policy when reading. The default is
    /// [`ReadHeader::Detect`].
    pub fn read_header(&mut self, policy: ReadHeader) -> &mut OptionsBuilder {
        self.read_header = policy;
        self
    }

    /// The header policy when writing. The default is
    /// [`WriteHeader::Always`].
    pub fn write_header(
        &mut self,
        policy: WriteHeader,
    ) -> &mut OptionsBuilder {
        self.write_header = policy;
        self
    }

    /// Whether written data ends with a trailing row ending. The default
    /// is [`WriteTrailingRowEnding::Always`].
    pub fn write_trailing_row_ending(
        &mut self,
        policy: WriteTrailingRowEnding,
    ) -> &mut OptionsBuilder {
        self.write_trailing_row_ending = policy;
        self
    }

    /// The whitespace treatments applied while reading. The default is
    /// [`WhitespaceTreatment::PRESERVE`].
    pub fn whitespace_treatment(
        &mut self,
        treatment: WhitespaceTreatment,
    ) -> &mut OptionsBuilder {
        self.whitespace = treatment;
        self
    }

    /// The read buffer capacity in bytes; 0 picks the default.
    pub fn read_buffer_size_hint(
        &mut self,
        hint: usize,
    ) -> &mut OptionsBuilder {
        self.read_buffer_size_hint = hint;
        self
    }

    /// The write staging capacity in bytes; `Some(0)` disables write
    /// buffering, `None` picks the default.
    pub fn write_buffer_size_hint(
        &mut self,
        hint: Option<usize>,
    ) -> &mut OptionsBuilder {
        self.write_buffer_size_hint = hint;
        self
    }

    /// Use a specific buffer pool instead of a fresh one.
    pub fn buffer_pool(
        &mut self,
        pool: Arc<BufferPool>,
    ) -> &mut OptionsBuilder {
        self.pool = Some(pool);
        self
    }

    /// Validate this configuration and build an immutable [`Options`].
    pub fn build(&self) -> Result<Options> {
        let trimming = !self.whitespace.is_preserve();
        // The tokenizer builder owns dialect validation; reuse it so the
        // two layers can never disagree about what is legal.
        cesil_core::ReaderBuilder::new()
            .separator(self.separator)
            .quote(self.quote)
            .escape(self.escape)
            .comment(self.comment)
            .row_ending(self.row_ending)
            .trim_before(trimming)
            .trim_after(trimming)
            .build()
            .map_err(|err| ErrorKind::Config(err.to_string()))?;
        let pool = self
            .pool
            .clone()
            .unwrap_or_else(|| Arc::new(BufferPool::new(usize::MAX)));
        Ok(Options {
            separator: self.separator,
            quote: self.quote,
            escape: self.escape,
            comment: self.comment,
            row_ending: self.row_ending,
            read_header: self.read_header,
            write_header: self.write_header,
            write_trailing_row_ending: self.write_trailing_row_ending,
            whitespace: self.whitespace,
            read_buffer_size_hint: self.read_buffer_size_hint,
            write_buffer_size_hint: self.write_buffer_size_hint,
            pool,
        })
    }
}
