use std::fs::{File, OpenOptions};
use std::io::{self, Result};
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Positional I/O over one backing file. Every call addresses an absolute
/// offset, so a shared `&Disk` needs no seek cursor.
pub struct Disk {
    file: File,
}

impl Disk {
    /// Open or create the file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, true)
    }

    /// Open the file at `path`, failing with `NotFound` if it does not exist
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, false)
    }

    fn open_with<P: AsRef<Path>>(path: P, create: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;
        Ok(Disk { file })
    }

    /// Fill `buf` from `offset`. A window extending past end of file fails
    /// with `UnexpectedEof` and leaves `buf` unspecified.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    /// Write all of `buf` at `offset`, extending the file if needed
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset)
    }

    /// Flush file data to the device
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// True when `err` means the requested window lies (partly) past end of file
pub fn is_short_read(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}
