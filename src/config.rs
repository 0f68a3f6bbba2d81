use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Default page size (4KB), shared by every heap file unless overridden
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default buffer pool capacity in pages
pub const DEFAULT_POOL_PAGES: usize = 50;

const PAGE_SIZE_VAR: &str = "HEAPDB_PAGE_SIZE";
const POOL_PAGES_VAR: &str = "HEAPDB_POOL_PAGES";

/// Storage configuration. The page size is fixed for the lifetime of every
/// heap file and page built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub page_size: usize,
    pub buffer_pool_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: DEFAULT_POOL_PAGES,
        }
    }
}

impl Config {
    pub fn with_page_size(page_size: usize) -> Self {
        Config {
            page_size,
            ..Config::default()
        }
    }

    /// Defaults overridden by `HEAPDB_PAGE_SIZE` / `HEAPDB_POOL_PAGES`.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(size) = read_var(PAGE_SIZE_VAR) {
            config.page_size = size;
        }
        if let Some(pages) = read_var(POOL_PAGES_VAR) {
            config.buffer_pool_pages = pages;
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("page size must be positive".to_string()));
        }
        if self.buffer_pool_pages == 0 {
            return Err(Error::InvalidConfig(
                "buffer pool must hold at least one page".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_var(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}
