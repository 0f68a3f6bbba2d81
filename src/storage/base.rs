use std::fmt;
use std::path::Path;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Stable table identity, derived from the backing file's canonical path
pub type TableId = u32;

/// Page number within one table (file offset = page_number * page_size)
pub type PageNumber = u32;

/// Slot number within a page
pub type SlotId = u16;

/// Identifies one fixed-size page of one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize)]
pub struct PageId {
    pub table_id: TableId,
    pub page_number: PageNumber,
}

impl PageId {
    pub fn new(table_id: TableId, page_number: PageNumber) -> Self {
        PageId {
            table_id,
            page_number,
        }
    }

    /// Byte offset of this page in its backing file
    pub fn offset(&self, page_size: usize) -> u64 {
        self.page_number as u64 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_number)
    }
}

/// Stable tuple address: page plus slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: SlotId,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: SlotId) -> Self {
        RecordId { page_id, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

/// Derive a table id from a path. Callers pass the canonical path so the
/// same file always maps to the same id.
pub fn table_id_for(path: &Path) -> TableId {
    let hash = path
        .as_os_str()
        .as_encoded_bytes()
        .iter()
        .fold(0u64, |acc, &byte| acc.wrapping_mul(31).wrapping_add(byte as u64));
    (hash ^ (hash >> 32)) as TableId
}
