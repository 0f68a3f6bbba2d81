use tracing::trace;

use crate::error::{Error, Result};
use crate::storage::heap::HeapFile;
use crate::storage::PageRef;
use crate::transaction::{Permissions, TransactionId};
use crate::types::Tuple;

enum Cursor {
    Closed,
    Open { page: PageRef, next_slot: usize },
    Exhausted,
}

/// Forward-only scan over every live tuple of a heap file, in page then
/// slot order.
///
/// Starts closed; `open` fetches page 0 read-only. The page count is re-read
/// each time the scan moves to a new page, so pages appended mid-scan are
/// visited.
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    tid: TransactionId,
    cursor: Cursor,
    lookahead: Option<Tuple>,
}

impl<'a> HeapFileIterator<'a> {
    pub(crate) fn new(file: &'a HeapFile, tid: TransactionId) -> Self {
        HeapFileIterator {
            file,
            tid,
            cursor: Cursor::Closed,
            lookahead: None,
        }
    }

    pub fn open(&mut self) -> Result<()> {
        self.lookahead = None;
        self.cursor = if self.file.num_pages() == 0 {
            Cursor::Exhausted
        } else {
            let page = self.file.fetch_page(self.tid, 0, Permissions::ReadOnly)?;
            Cursor::Open { page, next_slot: 0 }
        };
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.cursor, Cursor::Closed)
    }

    fn advance(&mut self) -> Result<Option<Tuple>> {
        loop {
            let (page, next_slot) = match &mut self.cursor {
                Cursor::Open { page, next_slot } => (page, next_slot),
                Cursor::Closed | Cursor::Exhausted => return Ok(None),
            };

            let next_pid = {
                let guard = page.read();
                if let Some(slot) = guard.next_occupied(*next_slot) {
                    *next_slot = slot as usize + 1;
                    return Ok(guard.tuple(slot).cloned());
                }
                guard.next_page(self.file.num_pages())
            };

            match next_pid {
                Some(pid) => {
                    trace!(page = %pid, "scan moving to next page");
                    let page = self.file.fetch_page(self.tid, pid.page_number, Permissions::ReadOnly)?;
                    self.cursor = Cursor::Open { page, next_slot: 0 };
                }
                None => {
                    self.cursor = Cursor::Exhausted;
                    return Ok(None);
                }
            }
        }
    }

    /// Whether another tuple remains. Always false when not open.
    pub fn has_next(&mut self) -> Result<bool> {
        if self.lookahead.is_none() {
            self.lookahead = self.advance()?;
        }
        Ok(self.lookahead.is_some())
    }

    /// Next tuple, or `NoSuchElement` once the scan is exhausted or closed
    pub fn next_tuple(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(Error::NoSuchElement);
        }
        self.lookahead.take().ok_or(Error::NoSuchElement)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    /// Drop the current page reference. Cached pages and locks are untouched.
    pub fn close(&mut self) {
        self.cursor = Cursor::Closed;
        self.lookahead = None;
    }
}

impl Iterator for HeapFileIterator<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => self.lookahead.take().map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
