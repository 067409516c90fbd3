use std::fmt;
use std::io;
use std::result;

use thiserror::Error as ThisError;

use crate::record::Position;

/// A type alias for `Result<T, cesil::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// An error that can occur when reading or writing CSV data.
///
/// The error kind is boxed so that `Result<T>` stays one word wide on the
/// happy path.
#[derive(Debug, ThisError)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    /// Return the specific kind of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwrap this error into its underlying kind.
    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Returns true if and only if this is an I/O error.
    pub fn is_io_error(&self) -> bool {
        matches!(*self.0, ErrorKind::Io(_))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Box::new(kind))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::from(ErrorKind::Io(err))
    }
}

/// The specific kind of an error.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The options could not be built.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error from the underlying adapter.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A value was not valid UTF-8 when text was required.
    #[error("{pos}: invalid UTF-8 in value {field}")]
    Utf8 {
        /// The position of the offending record.
        pos: Position,
        /// The index of the offending value within the record.
        field: usize,
    },

    /// A column parser produced no value.
    #[error("record {row}: column {column:?}: cannot parse {input:?}")]
    Parse {
        /// The zero-based data record number.
        row: u64,
        /// The column name.
        column: String,
        /// The text that failed to parse.
        input: String,
    },

    /// A setter, reset or row constructor failed.
    #[error("record {row}: column {column:?}: {message}")]
    Convert {
        /// The zero-based data record number.
        row: u64,
        /// The column name, or an empty string for whole-row failures.
        column: String,
        /// What went wrong.
        message: String,
    },

    /// A required column received no value in a record.
    #[error("record {row}: required column {column:?} received no value")]
    RequiredColumnMissing {
        /// The column name.
        column: String,
        /// The zero-based data record number.
        row: u64,
    },

    /// An illegal byte followed the in-quote escape character.
    #[error("{pos}: unexpected character in escape sequence")]
    UnexpectedCharInEscape {
        /// Where in the input the byte appeared.
        pos: Position,
    },

    /// The data ended in the middle of a quoted value.
    #[error("{pos}: unexpected end of data inside a quoted value")]
    UnexpectedEnd {
        /// Where the data ended.
        pos: Position,
    },

    /// An illegal byte appeared where a separator or row ending was
    /// expected, including a row ending that disagrees with the configured
    /// or detected one.
    #[error("{pos}: expected a separator or row ending")]
    ExpectedEndOfRecordOrValue {
        /// Where the byte appeared.
        pos: Position,
    },

    /// A buffer could not grow because it hit the pool's maximum size.
    #[error("a buffer of {requested} bytes exceeds the pool maximum of {max}")]
    BufferTooSmall {
        /// The size that was requested.
        requested: usize,
        /// The pool's configured maximum.
        max: usize,
    },

    /// An in-flight operation was abandoned before it completed.
    #[error("the operation was cancelled")]
    Cancelled,

    /// The reader or writer failed earlier and refuses further work.
    #[error("unusable after a previous {0}")]
    Poisoned(PoisonKind),

    /// Deserializing a record into a Rust type failed.
    #[error("record {row}: field {field}: {message}")]
    Deserialize {
        /// The zero-based data record number.
        row: u64,
        /// The index of the offending value within the record.
        field: usize,
        /// What went wrong.
        message: String,
    },

    /// Serializing a Rust value into a record failed.
    #[error("cannot serialize: {0}")]
    Serialize(String),
}

/// What poisoned a reader or writer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoisonKind {
    /// A previous operation returned an error.
    Error,
    /// A previous operation was cancelled.
    Cancellation,
}

impl fmt::Display for PoisonKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PoisonKind::Error => write!(f, "error"),
            PoisonKind::Cancellation => write!(f, "cancellation"),
        }
    }
}

/// Translate a tokenizer error into an [`ErrorKind`] carrying a position.
pub(crate) fn read_error_kind(
    err: cesil_core::ReadError,
    pos: Position,
) -> ErrorKind {
    match err {
        cesil_core::ReadError::UnexpectedCharInEscape => {
            ErrorKind::UnexpectedCharInEscape { pos }
        }
        cesil_core::ReadError::UnexpectedEnd => ErrorKind::UnexpectedEnd { pos },
        cesil_core::ReadError::ExpectedEndOfRecordOrValue => {
            ErrorKind::ExpectedEndOfRecordOrValue { pos }
        }
    }
}
