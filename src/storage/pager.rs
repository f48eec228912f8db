//! Pager: maps page numbers to in-memory page images, with transactional
//! write-and-rollback and ref-counted eviction.
//!
//! §4.1 treats the Pager as an external collaborator specified only at the
//! level of guarantees. This module is a working implementation of that
//! interface: durability is a rollback journal holding pre-write page
//! images, not the byte-exact on-disk journal format of any particular
//! lineage (the spec explicitly declines to make that format normative).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::types::Pgno;

/// Nominal page size (§3.1): small and fixed at compile time.
pub const PAGE_SIZE: usize = 1024;

/// Page 1 is reserved for the database header.
pub const HEADER_PAGE: Pgno = 1;

const MAGIC1: u32 = 0x5752_4e53; // "WRNS"
const MAGIC2: u32 = 0x514c_4442; // "QLDB"

struct CachedPage {
    data: Vec<u8>,
    dirty: bool,
    pins: u32,
}

struct Inner {
    file: Option<File>,
    path: Option<PathBuf>,
    cache: HashMap<Pgno, CachedPage>,
    file_page_count: Pgno,
    /// Pre-write images of pages touched since `begin_write`, used to
    /// answer `rollback` and to recover from a crash between `begin_write`
    /// and `commit`.
    shadow: HashMap<Pgno, Vec<u8>>,
    journal: Option<File>,
    in_transaction: bool,
    destructor: Option<Box<dyn FnMut(Pgno)>>,
}

/// A disk-backed or in-memory page cache with rollback-journal semantics.
///
/// Cloning a `Pager` shares the same underlying cache (it is a thin handle
/// around `Rc<RefCell<Inner>>`), matching how a B-tree and its cursors all
/// need a reference to the same pager.
#[derive(Clone)]
pub struct Pager {
    inner: Rc<RefCell<Inner>>,
}

/// A pinned, possibly-dirty page. Dropping it releases the pin; when the
/// pin count reaches zero the page becomes eligible for eviction and the
/// pager's destructor callback (if any) fires exactly once.
pub struct PageRef {
    pager: Pager,
    pgno: Pgno,
}

impl PageRef {
    pub fn pgno(&self) -> Pgno {
        self.pgno
    }

    pub fn read(&self) -> Vec<u8> {
        let inner = self.pager.inner.borrow();
        inner.cache.get(&self.pgno).expect("pinned page missing").data.clone()
    }

    pub fn with_data<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        let inner = self.pager.inner.borrow();
        f(&inner.cache.get(&self.pgno).expect("pinned page missing").data)
    }

    /// Mark the page dirty and run `f` against its mutable buffer. Saves a
    /// pre-image into the active transaction's shadow set on first touch.
    pub fn with_data_mut<T>(&self, f: impl FnOnce(&mut [u8]) -> T) -> Result<T> {
        self.pager.mark_dirty(self.pgno)?;
        let mut inner = self.pager.inner.borrow_mut();
        let page = inner.cache.get_mut(&self.pgno).expect("pinned page missing");
        Ok(f(&mut page.data))
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        self.pager.release(self.pgno);
    }
}

impl Pager {
    /// Open an in-memory pager (used for temp tables and tests).
    pub fn open_memory() -> Self {
        let inner = Inner {
            file: None,
            path: None,
            cache: HashMap::new(),
            file_page_count: 0,
            shadow: HashMap::new(),
            journal: None,
            in_transaction: false,
            destructor: None,
        };
        let pager = Pager { inner: Rc::new(RefCell::new(inner)) };
        pager.init_header_if_new();
        pager
    }

    /// Open (creating if absent) a disk-backed database file. Replays a
    /// leftover rollback journal from a prior crash before returning, so
    /// callers always observe a consistent snapshot.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let journal_path = journal_path_for(&path);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        if journal_path.exists() {
            warn!("replaying leftover rollback journal for {}", path.display());
            replay_journal(&mut file, &journal_path)?;
            std::fs::remove_file(&journal_path)?;
        }

        let len = file.seek(SeekFrom::End(0))?;
        let file_page_count = (len as usize / PAGE_SIZE) as Pgno;

        let inner = Inner {
            file: Some(file),
            path: Some(path),
            cache: HashMap::new(),
            file_page_count,
            shadow: HashMap::new(),
            journal: None,
            in_transaction: false,
            destructor: None,
        };
        let pager = Pager { inner: Rc::new(RefCell::new(inner)) };
        pager.init_header_if_new();
        Ok(pager)
    }

    fn init_header_if_new(&self) {
        let needs_init = {
            let inner = self.inner.borrow();
            inner.file_page_count == 0 && !inner.cache.contains_key(&HEADER_PAGE)
        };
        if needs_init {
            let page = self.acquire(HEADER_PAGE).expect("allocate header page");
            // Bypass mark_dirty/with_data_mut here: this runs before any
            // transaction exists, as part of opening the pager itself.
            {
                let mut inner = self.inner.borrow_mut();
                let cached = inner.cache.get_mut(&HEADER_PAGE).expect("header page cached");
                cached.data[0..4].copy_from_slice(&MAGIC1.to_be_bytes());
                cached.data[4..8].copy_from_slice(&MAGIC2.to_be_bytes());
                cached.dirty = true;
                // The header page itself counts toward page_count.
                inner.file_page_count = inner.file_page_count.max(1);
            }
            // Dropping the pin evicts the page, which flushes it (dirty)
            // to the backing file as a side effect of release().
            drop(page);
        }
    }

    pub fn set_destructor(&self, f: impl FnMut(Pgno) + 'static) {
        self.inner.borrow_mut().destructor = Some(Box::new(f));
    }

    pub fn is_memdb(&self) -> bool {
        self.inner.borrow().file.is_none()
    }

    pub fn page_count(&self) -> Pgno {
        self.inner.borrow().file_page_count
    }

    /// Validate the two header magic numbers (contract: `Corrupt` on a
    /// foreign or truncated file).
    pub fn check_header(&self) -> Result<()> {
        let page = self.acquire(HEADER_PAGE)?;
        let ok = page.with_data(|buf| {
            buf.len() >= 8
                && u32::from_be_bytes(buf[0..4].try_into().unwrap()) == MAGIC1
                && u32::from_be_bytes(buf[4..8].try_into().unwrap()) == MAGIC2
        });
        if ok {
            Ok(())
        } else {
            Err(Error::corrupt("bad page-1 magic"))
        }
    }

    /// Pin and return page `pgno`, loading it from disk (or zero-filling a
    /// fresh page past the current end of file) if it is not cached.
    pub fn acquire(&self, pgno: Pgno) -> Result<PageRef> {
        if pgno == 0 {
            return Err(Error::internal("page 0 is not a valid page number"));
        }
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(cached) = inner.cache.get_mut(&pgno) {
                cached.pins += 1;
                return Ok(PageRef { pager: self.clone(), pgno });
            }
        }
        let data = self.load_from_file(pgno)?;
        let mut inner = self.inner.borrow_mut();
        inner.cache.insert(pgno, CachedPage { data, dirty: false, pins: 1 });
        inner.file_page_count = inner.file_page_count.max(pgno);
        Ok(PageRef { pager: self.clone(), pgno })
    }

    /// Pages that were logically allocated (bumping `file_page_count`) but
    /// never written are zero-filled: `read_exact` would otherwise hit a
    /// short file, since allocation does not eagerly extend the file.
    fn load_from_file(&self, pgno: Pgno) -> Result<Vec<u8>> {
        let mut inner = self.inner.borrow_mut();
        let Some(file) = inner.file.as_mut() else {
            return Ok(vec![0u8; PAGE_SIZE]);
        };
        let on_disk_len = file.metadata()?.len();
        let offset = (pgno as u64 - 1) * PAGE_SIZE as u64;
        if offset + PAGE_SIZE as u64 > on_disk_len {
            return Ok(vec![0u8; PAGE_SIZE]);
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Allocate a brand-new page at the end of the file (the B-tree only
    /// calls this once the per-table free-page list is exhausted).
    pub fn allocate_new_page(&self) -> Result<PageRef> {
        let pgno = {
            let mut inner = self.inner.borrow_mut();
            inner.file_page_count += 1;
            inner.file_page_count
        };
        let page = self.acquire(pgno)?;
        page.with_data_mut(|buf| buf.iter_mut().for_each(|b| *b = 0))?;
        Ok(page)
    }

    fn release(&self, pgno: Pgno) {
        let mut inner = self.inner.borrow_mut();
        let evict = if let Some(cached) = inner.cache.get_mut(&pgno) {
            cached.pins = cached.pins.saturating_sub(1);
            cached.pins == 0
        } else {
            false
        };
        if evict {
            // Flush before eviction: the pre-image already lives in the
            // shadow set (or the page was never touched this txn), so it
            // is always safe to push dirty bytes to the file immediately.
            let mut flushed = false;
            if let Some(cached) = inner.cache.get(&pgno) {
                if cached.dirty {
                    let data = cached.data.clone();
                    if let Some(file) = inner.file.as_mut() {
                        match write_page(file, pgno, &data) {
                            Ok(()) => flushed = true,
                            Err(e) => debug!("failed to flush page {pgno} on eviction: {e}"),
                        }
                    }
                } else {
                    flushed = true;
                }
            }
            // A page backed by no file (an in-memory database) has nowhere
            // else to live: keep it cached even once unpinned, so eviction
            // there is a no-op save for the destructor notification.
            if flushed && inner.file.is_some() {
                inner.cache.remove(&pgno);
            }
            if let Some(cb) = inner.destructor.as_mut() {
                cb(pgno);
            }
        }
    }

    /// Begin a write transaction: subsequent `mark_dirty` calls capture
    /// pre-images so `rollback` can undo them.
    pub fn begin_write(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.in_transaction {
            return Err(Error::sql("a write transaction is already active"));
        }
        inner.in_transaction = true;
        inner.shadow.clear();
        if let Some(path) = inner.path.clone() {
            let jpath = journal_path_for(&path);
            inner.journal = Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(jpath)?,
            );
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.borrow().in_transaction
    }

    fn mark_dirty(&self, pgno: Pgno) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.in_transaction {
            return Err(Error::ReadOnly);
        }
        if !inner.shadow.contains_key(&pgno) {
            let preimage = inner
                .cache
                .get(&pgno)
                .map(|p| p.data.clone())
                .unwrap_or_else(|| vec![0u8; PAGE_SIZE]);
            if let Some(journal) = inner.journal.as_mut() {
                append_journal_record(journal, pgno, &preimage)?;
            }
            inner.shadow.insert(pgno, preimage);
        }
        if let Some(cached) = inner.cache.get_mut(&pgno) {
            cached.dirty = true;
        }
        Ok(())
    }

    /// Commit: dirty pages become durable, the journal is discarded.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.in_transaction {
            return Err(Error::sql("no active write transaction"));
        }
        let dirty: Vec<(Pgno, Vec<u8>)> = inner
            .cache
            .iter()
            .filter(|(_, p)| p.dirty)
            .map(|(&pgno, p)| (pgno, p.data.clone()))
            .collect();
        if let Some(file) = inner.file.as_mut() {
            for (pgno, data) in &dirty {
                write_page(file, *pgno, data)?;
            }
            file.sync_all()?;
        }
        for cached in inner.cache.values_mut() {
            cached.dirty = false;
        }
        inner.shadow.clear();
        if let Some(journal) = inner.journal.take() {
            drop(journal);
            if let Some(path) = &inner.path {
                let _ = std::fs::remove_file(journal_path_for(path));
            }
        }
        inner.in_transaction = false;
        Ok(())
    }

    /// Roll back: every shadowed page is restored to its pre-write image.
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.in_transaction {
            return Ok(());
        }
        let shadow = std::mem::take(&mut inner.shadow);
        for (pgno, preimage) in shadow {
            if let Some(cached) = inner.cache.get_mut(&pgno) {
                cached.data = preimage;
                cached.dirty = false;
            }
        }
        if let Some(journal) = inner.journal.take() {
            drop(journal);
            if let Some(path) = &inner.path {
                let _ = std::fs::remove_file(journal_path_for(path));
            }
        }
        inner.in_transaction = false;
        Ok(())
    }
}

fn journal_path_for(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push("-journal");
    PathBuf::from(p)
}

fn write_page(file: &mut File, pgno: Pgno, data: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start((pgno as u64 - 1) * PAGE_SIZE as u64))?;
    file.write_all(data)?;
    Ok(())
}

/// Journal record: `[pgno: u32][page bytes]`, repeated. Not a normative
/// format (§1): only the guarantees in §4.1 are specified.
fn append_journal_record(journal: &mut File, pgno: Pgno, preimage: &[u8]) -> Result<()> {
    journal.seek(SeekFrom::End(0))?;
    journal.write_all(&pgno.to_le_bytes())?;
    journal.write_all(preimage)?;
    Ok(())
}

fn replay_journal(file: &mut File, journal_path: &Path) -> Result<()> {
    let mut journal = File::open(journal_path)?;
    let record_size = 4 + PAGE_SIZE;
    let mut buf = vec![0u8; record_size];
    loop {
        match journal.read_exact(&mut buf) {
            Ok(()) => {
                let pgno = u32::from_le_bytes(buf[0..4].try_into().unwrap());
                write_page(file, pgno, &buf[4..])?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_commit_read_back() {
        let pager = Pager::open_memory();
        {
            pager.begin_write().unwrap();
            let page = pager.allocate_new_page().unwrap();
            page.with_data_mut(|buf| buf[0] = 42).unwrap();
            pager.commit().unwrap();
        }
        let pgno = pager.page_count();
        let page = pager.acquire(pgno).unwrap();
        assert_eq!(page.read()[0], 42);
    }

    #[test]
    fn rollback_restores_preimage() {
        let pager = Pager::open_memory();
        pager.begin_write().unwrap();
        let page = pager.allocate_new_page().unwrap();
        page.with_data_mut(|buf| buf[0] = 7).unwrap();
        pager.commit().unwrap();
        let pgno = page.pgno();
        drop(page);

        pager.begin_write().unwrap();
        let page = pager.acquire(pgno).unwrap();
        page.with_data_mut(|buf| buf[0] = 99).unwrap();
        pager.rollback().unwrap();
        assert_eq!(page.read()[0], 7);
    }

    #[test]
    fn eviction_fires_destructor_once() {
        use std::cell::Cell;
        use std::rc::Rc;

        let pager = Pager::open_memory();
        let fired = Rc::new(Cell::new(0u32));
        let fired2 = fired.clone();
        pager.set_destructor(move |_pgno| fired2.set(fired2.get() + 1));

        pager.begin_write().unwrap();
        let page = pager.allocate_new_page().unwrap();
        pager.commit().unwrap();
        drop(page);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn crash_recovery_replays_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.wrensql");
        let pgno;
        {
            let pager = Pager::open(&path).unwrap();
            pager.begin_write().unwrap();
            let page = pager.allocate_new_page().unwrap();
            page.with_data_mut(|buf| buf[0] = 1).unwrap();
            pager.commit().unwrap();
            pgno = page.pgno();

            pager.begin_write().unwrap();
            let page = pager.acquire(pgno).unwrap();
            page.with_data_mut(|buf| buf[0] = 2).unwrap();
            // Simulate a crash: the journal on disk still holds the
            // pre-image, but we never call commit() or rollback().
            drop(page);
        }
        let pager = Pager::open(&path).unwrap();
        let page = pager.acquire(pgno).unwrap();
        assert_eq!(page.read()[0], 1);
    }
}
