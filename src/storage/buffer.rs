use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::base::{PageId, TableId};
use crate::storage::{PageCache, PageRef, PageStore};
use crate::transaction::{Permissions, TransactionId};

/// Page-level lock held by one or more transactions
#[derive(Debug)]
enum PageLock {
    Shared(HashSet<TransactionId>),
    Exclusive(TransactionId),
}

/// No-wait page lock table: a conflicting request is refused at once and
/// the requester aborts, so waits (and deadlocks) never form.
#[derive(Debug, Default)]
struct LockTable {
    locks: Mutex<HashMap<PageId, PageLock>>,
}

impl LockTable {
    fn acquire(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> bool {
        let mut locks = self.locks.lock();
        let granted = match locks.get(&pid) {
            None => true,
            Some(PageLock::Exclusive(owner)) => *owner == tid,
            Some(PageLock::Shared(holders)) => {
                perm == Permissions::ReadOnly || (holders.len() == 1 && holders.contains(&tid))
            }
        };
        if !granted {
            return false;
        }

        match perm {
            Permissions::ReadWrite => {
                locks.insert(pid, PageLock::Exclusive(tid));
            }
            Permissions::ReadOnly => {
                // an exclusive holder already covers reads
                if let PageLock::Shared(holders) =
                    locks.entry(pid).or_insert_with(|| PageLock::Shared(HashSet::new()))
                {
                    holders.insert(tid);
                }
            }
        }
        true
    }

    fn release(&self, tid: TransactionId, pid: PageId) {
        let mut locks = self.locks.lock();
        let now_free = match locks.get_mut(&pid) {
            Some(PageLock::Exclusive(owner)) => *owner == tid,
            Some(PageLock::Shared(holders)) => {
                holders.remove(&tid);
                holders.is_empty()
            }
            None => false,
        };
        if now_free {
            locks.remove(&pid);
        }
    }

    fn release_all(&self, tid: TransactionId) {
        self.locks.lock().retain(|_, lock| match lock {
            PageLock::Exclusive(owner) => *owner != tid,
            PageLock::Shared(holders) => {
                holders.remove(&tid);
                !holders.is_empty()
            }
        });
    }

    fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        match self.locks.lock().get(&pid) {
            Some(PageLock::Exclusive(owner)) => *owner == tid,
            Some(PageLock::Shared(holders)) => holders.contains(&tid),
            None => false,
        }
    }
}

#[derive(Default)]
struct PoolState {
    pages: HashMap<PageId, PageRef>,
    /// Load order, oldest first
    order: VecDeque<PageId>,
}

impl PoolState {
    fn remove(&mut self, pid: PageId) -> Option<PageRef> {
        self.order.retain(|p| *p != pid);
        self.pages.remove(&pid)
    }
}

/// Fixed-capacity page cache with page-level locking.
///
/// Dirty pages are never evicted (no steal): they leave the pool only when
/// their transaction commits (flush) or aborts (discard).
pub struct BufferPool {
    capacity: usize,
    state: Mutex<PoolState>,
    locks: LockTable,
    stores: RwLock<HashMap<TableId, Weak<dyn PageStore>>>,
}

impl BufferPool {
    pub fn new(config: &Config) -> Self {
        Self::with_capacity(config.buffer_pool_pages)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BufferPool {
            capacity: capacity.max(1),
            state: Mutex::new(PoolState::default()),
            locks: LockTable::default(),
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_cached(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_cached(&self, pid: PageId) -> bool {
        self.state.lock().pages.contains_key(&pid)
    }

    fn store(&self, table_id: TableId) -> Result<Arc<dyn PageStore>> {
        self.stores
            .read()
            .get(&table_id)
            .and_then(Weak::upgrade)
            .ok_or(Error::UnknownTable(table_id))
    }

    /// Drop the oldest clean page that no caller still holds. A handed-out
    /// `PageRef` may be written at any moment, so only the pool's own
    /// reference may remain.
    fn evict(&self, state: &mut PoolState) -> Result<()> {
        let victim = state.order.iter().copied().find(|pid| {
            state
                .pages
                .get(pid)
                .filter(|page| Arc::strong_count(page) == 1)
                .and_then(|page| page.try_read().map(|p| !p.is_dirty()))
                .unwrap_or(false)
        });
        match victim {
            Some(pid) => {
                state.remove(pid);
                debug!(page = %pid, "evicted page");
                Ok(())
            }
            None => Err(Error::BufferFull {
                capacity: self.capacity,
            }),
        }
    }

    /// Write `pid` back if dirty and mark it clean. Uncached pages are a no-op.
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        let page = self.state.lock().pages.get(&pid).cloned();
        let Some(page) = page else {
            return Ok(());
        };
        let mut page = page.write();
        if let Some(tid) = page.dirtied_by() {
            self.store(pid.table_id)?.write_page(&page)?;
            page.mark_dirty(None);
            debug!(page = %pid, %tid, "flushed page");
        }
        Ok(())
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let pids: Vec<PageId> = self.state.lock().pages.keys().copied().collect();
        for pid in pids {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    fn dirtied_by(&self, tid: TransactionId) -> Vec<PageId> {
        self.state
            .lock()
            .pages
            .iter()
            .filter(|(_, page)| page.read().dirtied_by() == Some(tid))
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// Flush every page dirtied by `tid`
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        for pid in self.dirtied_by(tid) {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Remove `pid` from the pool without writing it
    pub fn discard_page(&self, pid: PageId) {
        if self.state.lock().remove(pid).is_some() {
            debug!(page = %pid, "discarded page");
        }
    }

    /// Drop `tid`'s lock on `pid` before the transaction ends
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.locks.release(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.locks.holds(tid, pid)
    }

    /// End `tid`: on commit its dirty pages are written back, on abort they
    /// are dropped so the next fetch sees the on-disk image. Locks are
    /// released either way.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let result = if commit {
            self.flush_pages(tid)
        } else {
            for pid in self.dirtied_by(tid) {
                self.discard_page(pid);
            }
            Ok(())
        };
        self.locks.release_all(tid);
        info!(%tid, commit, "transaction complete");
        result
    }
}

impl PageCache for BufferPool {
    fn get_page(&self, tid: TransactionId, pid: PageId, perm: Permissions) -> Result<PageRef> {
        if !self.locks.acquire(tid, pid, perm) {
            warn!(%tid, page = %pid, ?perm, "lock conflict, aborting");
            return Err(Error::TransactionAborted { tid, page: pid });
        }

        let mut state = self.state.lock();
        if let Some(page) = state.pages.get(&pid) {
            return Ok(page.clone());
        }

        if state.pages.len() >= self.capacity {
            self.evict(&mut state)?;
        }

        let page = self.store(pid.table_id)?.read_page(pid)?;
        let page = Arc::new(RwLock::new(page));
        state.pages.insert(pid, page.clone());
        state.order.push_back(pid);
        debug!(page = %pid, cached = state.pages.len(), "loaded page");
        Ok(page)
    }

    fn attach(&self, store: Weak<dyn PageStore>) {
        if let Some(live) = store.upgrade() {
            self.stores.write().insert(live.table_id(), store);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{HeapPage, PageLayout};
    use crate::types::{FieldType, Schema};

    /// In-memory store counting reads and writes
    struct MemStore {
        table_id: TableId,
        schema: Arc<Schema>,
        layout: PageLayout,
        pages: Mutex<HashMap<PageId, Vec<u8>>>,
        writes: Mutex<usize>,
    }

    impl MemStore {
        fn new(table_id: TableId) -> Arc<Self> {
            let schema = Arc::new(Schema::from_types(&[FieldType::Int]));
            let layout = PageLayout::new(&schema, 64).unwrap();
            Arc::new(MemStore {
                table_id,
                schema,
                layout,
                pages: Mutex::new(HashMap::new()),
                writes: Mutex::new(0),
            })
        }
    }

    impl PageStore for MemStore {
        fn table_id(&self) -> TableId {
            self.table_id
        }

        fn read_page(&self, pid: PageId) -> Result<HeapPage> {
            let data = self
                .pages
                .lock()
                .get(&pid)
                .cloned()
                .unwrap_or_else(|| HeapPage::empty_page_data(self.layout.page_size));
            HeapPage::decode(pid, self.schema.clone(), self.layout, &data)
        }

        fn write_page(&self, page: &HeapPage) -> Result<()> {
            self.pages.lock().insert(page.id(), page.encode()?);
            *self.writes.lock() += 1;
            Ok(())
        }
    }

    fn pool_with_store(capacity: usize) -> (BufferPool, Arc<MemStore>) {
        let pool = BufferPool::with_capacity(capacity);
        let store = MemStore::new(1);
        let dyn_store: Arc<dyn PageStore> = store.clone();
        pool.attach(Arc::downgrade(&dyn_store));
        (pool, store)
    }

    #[test]
    fn test_shared_locks_coexist_exclusive_conflicts() {
        let (pool, _store) = pool_with_store(4);
        let pid = PageId::new(1, 0);
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        pool.get_page(t1, pid, Permissions::ReadOnly).unwrap();
        pool.get_page(t2, pid, Permissions::ReadOnly).unwrap();
        assert!(pool.holds_lock(t1, pid) && pool.holds_lock(t2, pid));

        let err = pool.get_page(t1, pid, Permissions::ReadWrite).unwrap_err();
        assert!(err.is_abort());

        pool.transaction_complete(t2, true).unwrap();
        // sole shared holder may upgrade
        pool.get_page(t1, pid, Permissions::ReadWrite).unwrap();
        assert!(pool.get_page(t2, pid, Permissions::ReadOnly).unwrap_err().is_abort());
    }

    #[test]
    fn test_release_page_drops_lock() {
        let (pool, _store) = pool_with_store(4);
        let pid = PageId::new(1, 0);
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        pool.get_page(t1, pid, Permissions::ReadWrite).unwrap();
        pool.release_page(t1, pid);
        assert!(!pool.holds_lock(t1, pid));
        pool.get_page(t2, pid, Permissions::ReadWrite).unwrap();
    }

    #[test]
    fn test_clean_pages_evicted_dirty_pages_kept() {
        let (pool, _store) = pool_with_store(2);
        let tid = TransactionId::new();
        let p0 = pool.get_page(tid, PageId::new(1, 0), Permissions::ReadWrite).unwrap();
        p0.write().mark_dirty(Some(tid));
        pool.get_page(tid, PageId::new(1, 1), Permissions::ReadOnly).unwrap();

        // page 1 is the only clean victim
        pool.get_page(tid, PageId::new(1, 2), Permissions::ReadOnly).unwrap();
        assert!(pool.is_cached(PageId::new(1, 0)));
        assert!(!pool.is_cached(PageId::new(1, 1)));
        assert_eq!(pool.num_cached(), 2);

        pool.get_page(tid, PageId::new(1, 2), Permissions::ReadOnly)
            .unwrap()
            .write()
            .mark_dirty(Some(tid));
        let err = pool.get_page(tid, PageId::new(1, 3), Permissions::ReadOnly).unwrap_err();
        assert!(matches!(err, Error::BufferFull { capacity: 2 }));
    }

    #[test]
    fn test_held_pages_are_not_evicted() {
        let (pool, _store) = pool_with_store(2);
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        let held = pool.get_page(t1, PageId::new(1, 0), Permissions::ReadWrite).unwrap();
        assert!(!held.read().is_dirty());

        pool.get_page(t2, PageId::new(1, 1), Permissions::ReadOnly).unwrap();
        pool.get_page(t2, PageId::new(1, 2), Permissions::ReadOnly).unwrap();
        assert!(pool.is_cached(PageId::new(1, 0)));
        assert!(!pool.is_cached(PageId::new(1, 1)));

        // both cached pages are held now
        let _also_held = pool.get_page(t2, PageId::new(1, 2), Permissions::ReadOnly).unwrap();
        let err = pool.get_page(t2, PageId::new(1, 3), Permissions::ReadOnly).unwrap_err();
        assert!(matches!(err, Error::BufferFull { capacity: 2 }));

        drop(held);
        pool.get_page(t2, PageId::new(1, 3), Permissions::ReadOnly).unwrap();
        assert!(!pool.is_cached(PageId::new(1, 0)));
    }

    #[test]
    fn test_commit_flushes_abort_discards() {
        let (pool, store) = pool_with_store(4);
        let t1 = TransactionId::new();
        let pid = PageId::new(1, 0);
        pool.get_page(t1, pid, Permissions::ReadWrite).unwrap().write().mark_dirty(Some(t1));
        pool.transaction_complete(t1, true).unwrap();
        assert_eq!(*store.writes.lock(), 1);
        assert!(!pool.get_page(t1, pid, Permissions::ReadOnly).unwrap().read().is_dirty());
        pool.transaction_complete(t1, true).unwrap();

        let t2 = TransactionId::new();
        pool.get_page(t2, pid, Permissions::ReadWrite).unwrap().write().mark_dirty(Some(t2));
        pool.transaction_complete(t2, false).unwrap();
        assert!(!pool.is_cached(pid));
        assert_eq!(*store.writes.lock(), 1);
        assert!(!pool.holds_lock(t2, pid));
    }

    #[test]
    fn test_flush_all_writes_dirty_only() {
        let (pool, store) = pool_with_store(4);
        let tid = TransactionId::new();
        pool.get_page(tid, PageId::new(1, 0), Permissions::ReadWrite).unwrap().write().mark_dirty(Some(tid));
        pool.get_page(tid, PageId::new(1, 1), Permissions::ReadOnly).unwrap();
        pool.flush_all_pages().unwrap();
        assert_eq!(*store.writes.lock(), 1);
        pool.flush_all_pages().unwrap();
        assert_eq!(*store.writes.lock(), 1);
    }

    #[test]
    fn test_unknown_table() {
        let pool = BufferPool::with_capacity(2);
        let err = pool.get_page(TransactionId::new(), PageId::new(42, 0), Permissions::ReadOnly).unwrap_err();
        assert!(matches!(err, Error::UnknownTable(42)));
    }

    #[test]
    fn test_dropped_store_is_forgotten() {
        let pool = BufferPool::with_capacity(2);
        {
            let store: Arc<dyn PageStore> = MemStore::new(5);
            pool.attach(Arc::downgrade(&store));
        }
        let err = pool.get_page(TransactionId::new(), PageId::new(5, 0), Permissions::ReadOnly).unwrap_err();
        assert!(matches!(err, Error::UnknownTable(5)));
    }
}
