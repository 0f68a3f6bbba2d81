use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::base::{table_id_for, PageId, PageNumber, RecordId, TableId};
use crate::storage::io::{is_short_read, Disk};
use crate::storage::iterator::HeapFileIterator;
use crate::storage::page::{HeapPage, PageLayout};
use crate::storage::{PageCache, PageRef, PageStore};
use crate::transaction::{Permissions, TransactionId};
use crate::types::{Schema, Tuple};

/// Unordered, page-organized storage for one table's tuples.
///
/// The backing file is a flat run of `page_size` windows, page `i` at byte
/// offset `i * page_size`, with no file header. All page access except the
/// write of a freshly appended blank page goes through the page cache.
pub struct HeapFile {
    disk: Disk,
    path: PathBuf,
    table_id: TableId,
    schema: Arc<Schema>,
    layout: PageLayout,
    /// Pages in the file. Only grows, and only after the new page is on disk.
    num_pages: Mutex<usize>,
    cache: Arc<dyn PageCache>,
}

impl HeapFile {
    /// Open or create the heap file at `path` and attach it to `cache`
    pub fn open<P: AsRef<Path>>(
        path: P,
        schema: Schema,
        cache: Arc<dyn PageCache>,
        config: &Config,
    ) -> Result<Arc<Self>> {
        Self::open_with(path, schema, cache, config, true)
    }

    /// Like [`HeapFile::open`], but a missing file is an I/O `NotFound` error
    pub fn open_existing<P: AsRef<Path>>(
        path: P,
        schema: Schema,
        cache: Arc<dyn PageCache>,
        config: &Config,
    ) -> Result<Arc<Self>> {
        Self::open_with(path, schema, cache, config, false)
    }

    fn open_with<P: AsRef<Path>>(
        path: P,
        schema: Schema,
        cache: Arc<dyn PageCache>,
        config: &Config,
        create: bool,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let layout = PageLayout::new(&schema, config.page_size)?;

        let disk = if create {
            Disk::open(&path)?
        } else {
            Disk::open_existing(&path)?
        };
        let path = std::fs::canonicalize(path.as_ref())?;
        let table_id = table_id_for(&path);
        let num_pages = disk.len()?.div_ceil(config.page_size as u64) as usize;

        debug!(
            table_id,
            path = %path.display(),
            num_pages,
            slots_per_page = layout.slots,
            "opened heap file"
        );

        let file = Arc::new(HeapFile {
            disk,
            path,
            table_id,
            schema: Arc::new(schema),
            layout,
            num_pages: Mutex::new(num_pages),
            cache,
        });

        let store: Arc<dyn PageStore> = file.clone();
        file.cache.attach(Arc::downgrade(&store));
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable table identity
    pub fn id(&self) -> TableId {
        self.table_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Current page count. No I/O.
    pub fn num_pages(&self) -> usize {
        *self.num_pages.lock()
    }

    pub fn page_size(&self) -> usize {
        self.layout.page_size
    }

    pub fn slots_per_page(&self) -> usize {
        self.layout.slots
    }

    pub(crate) fn fetch_page(
        &self,
        tid: TransactionId,
        page_number: PageNumber,
        perm: Permissions,
    ) -> Result<PageRef> {
        self.cache
            .get_page(tid, PageId::new(self.table_id, page_number), perm)
    }

    /// Insert `tuple` into the first page, by ascending page number, with a
    /// free slot, appending a blank page when none has room. Sets the tuple's
    /// record id and returns the one page it dirtied.
    pub fn insert_tuple(&self, tid: TransactionId, tuple: &mut Tuple) -> Result<Vec<PageRef>> {
        if tuple.schema().as_ref() != self.schema.as_ref() {
            return Err(Error::SchemaMismatch(format!(
                "tuple schema ({}) differs from table {} schema ({})",
                tuple.schema(),
                self.table_id,
                self.schema
            )));
        }

        let mut page_number: PageNumber = 0;
        while (page_number as usize) < self.num_pages() {
            let page = self.fetch_page(tid, page_number, Permissions::ReadWrite)?;
            if self.place(tid, &page, tuple)? {
                return Ok(vec![page]);
            }
            page_number += 1;
        }

        // Another writer may fill the new page between append and fetch
        loop {
            let pid = self.append_empty_page()?;
            let page = self.cache.get_page(tid, pid, Permissions::ReadWrite)?;
            if self.place(tid, &page, tuple)? {
                return Ok(vec![page]);
            }
        }
    }

    fn place(&self, tid: TransactionId, page: &PageRef, tuple: &mut Tuple) -> Result<bool> {
        let mut page = page.write();
        if page.free_slots() == 0 {
            return Ok(false);
        }
        let rid = page.insert_tuple(tuple)?;
        page.mark_dirty(Some(tid));
        debug!(table_id = self.table_id, %rid, %tid, "inserted tuple");
        Ok(true)
    }

    /// Write a blank page at the end of the file, sync it, then publish the
    /// new page count.
    fn append_empty_page(&self) -> Result<PageId> {
        let mut num_pages = self.num_pages.lock();
        let pid = PageId::new(self.table_id, *num_pages as PageNumber);
        let data = HeapPage::empty_page_data(self.layout.page_size);
        self.disk.write_at(pid.offset(self.layout.page_size), &data)?;
        self.disk.sync()?;
        *num_pages += 1;
        info!(table_id = self.table_id, page = pid.page_number, num_pages = *num_pages, "appended page");
        Ok(pid)
    }

    /// Free the slot named by `tuple`'s record id and clear that id.
    /// The slot must still hold `tuple`'s fields; a stale id whose slot was
    /// reused by another tuple is not found. Returns the one page it dirtied.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &mut Tuple) -> Result<Vec<PageRef>> {
        let rid = match tuple.record_id() {
            Some(rid) => rid,
            None => return Err(self.not_found(None)),
        };
        if rid.page_id.table_id != self.table_id || rid.page_id.page_number as usize >= self.num_pages() {
            return Err(self.not_found(Some(rid)));
        }

        let page = self.cache.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        {
            let mut guard = page.write();
            let matches = guard
                .tuple(rid.slot)
                .is_some_and(|stored| stored.fields() == tuple.fields());
            if !matches {
                return Err(self.not_found(Some(rid)));
            }
            match guard.delete_slot(rid.slot) {
                Ok(_) => {}
                Err(Error::SlotEmpty { .. }) => return Err(self.not_found(Some(rid))),
                Err(e) => return Err(e),
            }
            guard.mark_dirty(Some(tid));
        }
        debug!(table_id = self.table_id, %rid, %tid, "deleted tuple");

        tuple.set_record_id(None);
        Ok(vec![page])
    }

    fn not_found(&self, record_id: Option<RecordId>) -> Error {
        Error::TupleNotFound {
            table_id: self.table_id,
            record_id,
        }
    }

    /// Unopened scan cursor over every tuple, bound to `tid`
    pub fn iterator(&self, tid: TransactionId) -> HeapFileIterator<'_> {
        HeapFileIterator::new(self, tid)
    }
}

impl PageStore for HeapFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        if pid.table_id != self.table_id {
            return Err(Error::UnknownTable(pid.table_id));
        }
        let mut buf = vec![0u8; self.layout.page_size];
        match self.disk.read_at(pid.offset(self.layout.page_size), &mut buf) {
            Ok(()) => {}
            Err(e) if is_short_read(&e) => {
                return Err(Error::decode(Some(pid), "page extends past end of file"));
            }
            Err(e) => return Err(e.into()),
        }
        HeapPage::decode(pid, self.schema.clone(), self.layout, &buf)
    }

    fn write_page(&self, page: &HeapPage) -> Result<()> {
        let pid = page.id();
        if pid.table_id != self.table_id {
            return Err(Error::UnknownTable(pid.table_id));
        }
        let data = page.encode()?;
        self.disk.write_at(pid.offset(self.layout.page_size), &data)?;
        Ok(())
    }
}
