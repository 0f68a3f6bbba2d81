//! Page-organized heap storage for fixed-width tuples.

pub mod config;
pub mod error;
pub mod storage;
pub mod transaction;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use storage::{BufferPool, HeapFile, HeapFileIterator, PageCache, PageId, RecordId};
pub use transaction::{Permissions, TransactionId};
pub use types::{Column, Field, FieldType, Schema, Tuple};
