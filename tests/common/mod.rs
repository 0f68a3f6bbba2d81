#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use heapdb::{BufferPool, Config, Field, FieldType, HeapFile, HeapFileIterator, Schema, TransactionId, Tuple};

/// Isolated temp directory holding one heap file, removed on drop
pub struct TestTable {
    dir: PathBuf,
    pub config: Config,
    pub pool: Arc<BufferPool>,
    pub file: Arc<HeapFile>,
}

impl TestTable {
    /// One int column. `page_size` 12 gives two slots per page.
    pub fn ints(page_size: usize) -> Self {
        Self::with_schema(Schema::from_types(&[FieldType::Int]), Config::with_page_size(page_size))
    }

    pub fn with_schema(schema: Schema, config: Config) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let dir = std::env::temp_dir().join(format!("heapdb-test-{}-{}", std::process::id(), now.as_nanos()));
        fs::create_dir_all(&dir).expect("failed to create temp dir");

        let pool = Arc::new(BufferPool::new(&config));
        let file = HeapFile::open(dir.join("table.dat"), schema, pool.clone(), &config).expect("failed to open heap file");
        TestTable { dir, config, pool, file }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Drop the cache and reopen the file from disk
    pub fn reopen(&mut self) {
        let schema = self.file.schema().as_ref().clone();
        self.pool = Arc::new(BufferPool::new(&self.config));
        self.file = HeapFile::open(self.dir.join("table.dat"), schema, self.pool.clone(), &self.config)
            .expect("failed to reopen heap file");
    }

    pub fn tuple(&self, v: i32) -> Tuple {
        Tuple::new(self.file.schema().clone(), vec![Field::Int(v)]).unwrap()
    }

    pub fn insert(&self, tid: TransactionId, v: i32) -> Tuple {
        let mut t = self.tuple(v);
        self.file.insert_tuple(tid, &mut t).expect("insert failed");
        t
    }

    /// First-column ints of a full scan
    pub fn scan(&self, tid: TransactionId) -> Vec<i32> {
        let mut iter = self.file.iterator(tid);
        iter.open().expect("open failed");
        ints(&mut iter)
    }

    pub fn file_len(&self) -> u64 {
        fs::metadata(self.path()).unwrap().len()
    }
}

pub fn ints(iter: &mut HeapFileIterator<'_>) -> Vec<i32> {
    iter.map(|t| match t.expect("scan failed").field(0) {
        Some(Field::Int(v)) => *v,
        other => panic!("unexpected field {:?}", other),
    })
    .collect()
}

impl Drop for TestTable {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}
