//! Heap storage: fixed-size slotted pages in one flat file per table,
//! reached through a transaction-aware page cache.
//!
//! ```text
//! +-------------------+      get_page(tid, pid, perm)
//! | HeapFile          | -------------------------------+
//! | HeapFileIterator  |                                v
//! +-------------------+                      +-----------------+
//!          ^                                 | PageCache       |
//!          | read_page / write_page          | (BufferPool)    |
//!          +-------------------------------- +-----------------+
//!                     PageStore
//! ```

pub mod base;
pub mod buffer;
pub mod encoder;
pub mod heap;
pub mod io;
pub mod iterator;
pub mod page;

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::Result;
use crate::transaction::{Permissions, TransactionId};

pub use base::{PageId, PageNumber, RecordId, SlotId, TableId};
pub use buffer::BufferPool;
pub use heap::HeapFile;
pub use iterator::HeapFileIterator;
pub use page::{HeapPage, PageLayout};

/// Shared handle to a cached page. Callers lock it only for the duration of
/// one operation and never keep the guard.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// Source and sink of a table's on-disk pages
pub trait PageStore: Send + Sync {
    fn table_id(&self) -> TableId;

    /// Read and decode one page from the backing file
    fn read_page(&self, pid: PageId) -> Result<HeapPage>;

    /// Overwrite one page-size window in the backing file
    fn write_page(&self, page: &HeapPage) -> Result<()>;
}

/// Permission-checked, transaction-scoped access to pages
pub trait PageCache: Send + Sync {
    /// Fetch `pid` for `tid`. Fails with `TransactionAborted` when the
    /// transaction cannot be granted `perm`.
    fn get_page(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> Result<PageRef>;

    /// Register the store that serves misses (and flushes) for its table
    fn attach(&self, store: Weak<dyn PageStore>);
}
