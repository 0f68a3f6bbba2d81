use std::fmt;

use crate::storage::base::{PageId, RecordId, TableId};
use crate::transaction::TransactionId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Backing store read/write failure
    Io(std::io::Error),
    /// Bytes that do not form a valid page or field
    Decode { page: Option<PageId>, reason: String },
    Encode(String),
    /// Delete targeted a record that is not live in this table
    TupleNotFound { table_id: TableId, record_id: Option<RecordId> },
    /// The cache refused the fetch and the transaction must abort
    TransactionAborted { tid: TransactionId, page: PageId },
    PageFull(PageId),
    SlotEmpty { page: PageId, slot: u16 },
    SchemaMismatch(String),
    BufferFull { capacity: usize },
    UnknownTable(TableId),
    NoSuchElement,
    InvalidConfig(String),
    Parse { line: usize, message: String },
}

impl Error {
    pub(crate) fn decode(page: Option<PageId>, reason: impl Into<String>) -> Self {
        Error::Decode {
            page,
            reason: reason.into(),
        }
    }

    /// True for failures that end the calling transaction.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::TransactionAborted { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Decode { page: Some(pid), reason } => {
                write!(f, "decode error on page {}: {}", pid, reason)
            }
            Error::Decode { page: None, reason } => write!(f, "decode error: {}", reason),
            Error::Encode(msg) => write!(f, "encode error: {}", msg),
            Error::TupleNotFound { table_id, record_id } => match record_id {
                Some(rid) => write!(f, "tuple {} not found in table {}", rid, table_id),
                None => write!(f, "tuple without record id not found in table {}", table_id),
            },
            Error::TransactionAborted { tid, page } => {
                write!(f, "transaction {} aborted while fetching page {}", tid, page)
            }
            Error::PageFull(pid) => write!(f, "page {} has no free slot", pid),
            Error::SlotEmpty { page, slot } => write!(f, "slot {} of page {} is empty", slot, page),
            Error::SchemaMismatch(msg) => write!(f, "schema mismatch: {}", msg),
            Error::BufferFull { capacity } => {
                write!(f, "buffer pool full: all {} cached pages are dirty", capacity)
            }
            Error::UnknownTable(id) => write!(f, "no heap file attached for table {}", id),
            Error::NoSuchElement => write!(f, "iterator has no more tuples"),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Error::Parse { line, message } => write!(f, "parse error on line {}: {}", line, message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Encode(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::decode(None, err.to_string())
    }
}
