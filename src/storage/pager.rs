use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use log::debug;
use lru::LruCache;

use crate::error::{DbError, DbResult};
use crate::storage::page::{CACHE_CAPACITY, FILE_HEADER_SIZE, PAGE_SIZE, PageBuf, TABLE_MAX_PAGES};

/// Owns the file handle, the bounded page cache, dirty tracking, and the
/// file header (root page + freelist head). Nothing above this module ever
/// touches the file directly; everything goes through `get_page`,
/// `mark_dirty`, `get_unused_page_num`, and `free_page`.
pub struct Pager {
    file: File,
    cache: LruCache<u32, Box<PageBuf>>,
    dirty: HashSet<u32>,
    /// Highest page number handed out (by read or allocation) + 1.
    num_pages: u32,
    /// Number of pages actually present in the backing file.
    file_pages: u32,
    pub root_page: u32,
    pub free_list_head: u32,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Pager> {
        let is_new = !path.as_ref().exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let cache = LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap());

        if is_new || file.metadata()?.len() == 0 {
            return Ok(Pager {
                file,
                cache,
                dirty: HashSet::new(),
                num_pages: 0,
                file_pages: 0,
                root_page: 0,
                free_list_head: 0,
            });
        }

        let mut header = [0u8; FILE_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let root_page = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let free_list_head = u32::from_le_bytes(header[4..8].try_into().unwrap());

        let file_len = file.metadata()?.len();
        let body_len = file_len
            .checked_sub(FILE_HEADER_SIZE as u64)
            .ok_or_else(|| DbError::Corrupt("file is shorter than the file header".into()))?;
        if body_len % PAGE_SIZE as u64 != 0 {
            return Err(DbError::Corrupt("file length is not page-aligned".into()));
        }
        let num_pages = (body_len / PAGE_SIZE as u64) as u32;

        Ok(Pager {
            file,
            cache,
            dirty: HashSet::new(),
            num_pages,
            file_pages: num_pages,
            root_page,
            free_list_head,
        })
    }

    /// True for a freshly created, never-initialized file: the caller is
    /// responsible for setting up page 0 as an empty leaf root.
    pub fn is_empty(&self) -> bool {
        self.num_pages == 0
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Returns a mutable view of `page_number`, loading it from disk (or
    /// zero-filling it, if it has never been written) on a cache miss. A
    /// miss that finds the cache full evicts the least-recently-used page,
    /// flushing it first if dirty.
    pub fn get_page(&mut self, page_number: u32) -> DbResult<&mut PageBuf> {
        if page_number >= TABLE_MAX_PAGES {
            return Err(DbError::PageOutOfBounds(page_number));
        }
        if !self.cache.contains(&page_number) {
            let mut buf = Box::new([0u8; PAGE_SIZE]);
            if page_number < self.file_pages {
                self.read_page_from_disk(page_number, &mut buf)?;
            }
            if page_number >= self.num_pages {
                self.num_pages = page_number + 1;
            }
            if let Some((evicted_number, evicted_buf)) = self.cache.push(page_number, buf) {
                if self.dirty.remove(&evicted_number) {
                    debug!("evicting dirty page {evicted_number} from cache, flushing first");
                    self.write_page_to_disk(evicted_number, &evicted_buf)?;
                    if evicted_number + 1 > self.file_pages {
                        self.file_pages = evicted_number + 1;
                    }
                }
            }
        }
        Ok(self.cache.get_mut(&page_number).expect("page was just loaded into cache"))
    }

    pub fn mark_dirty(&mut self, page_number: u32) {
        self.dirty.insert(page_number);
    }

    /// Writes a page back to disk if it is dirty, then clears its dirty bit.
    pub fn flush_page(&mut self, page_number: u32) -> DbResult<()> {
        if !self.dirty.contains(&page_number) {
            return Ok(());
        }
        let bytes: PageBuf = match self.cache.peek(&page_number) {
            Some(buf) => **buf,
            None => return Ok(()),
        };
        self.write_page_to_disk(page_number, &bytes)?;
        if page_number + 1 > self.file_pages {
            self.file_pages = page_number + 1;
        }
        self.dirty.remove(&page_number);
        Ok(())
    }

    pub fn flush_all(&mut self) -> DbResult<()> {
        let dirty_pages: Vec<u32> = self.dirty.iter().copied().collect();
        for page_number in dirty_pages {
            self.flush_page(page_number)?;
        }
        Ok(())
    }

    /// Flushes every dirty page, persists the file header, and syncs the
    /// file to disk. Idempotent: safe to call more than once.
    pub fn close(&mut self) -> DbResult<()> {
        self.flush_all()?;
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn write_header(&mut self) -> DbResult<()> {
        let mut header = [0u8; FILE_HEADER_SIZE];
        header[0..4].copy_from_slice(&self.root_page.to_le_bytes());
        header[4..8].copy_from_slice(&self.free_list_head.to_le_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        Ok(())
    }

    fn read_page_from_disk(&mut self, page_number: u32, buf: &mut PageBuf) -> DbResult<()> {
        let offset = FILE_HEADER_SIZE as u64 + page_number as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page_to_disk(&mut self, page_number: u32, buf: &PageBuf) -> DbResult<()> {
        let offset = FILE_HEADER_SIZE as u64 + page_number as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Pops a page off the freelist if one is available, zeroing it before
    /// handing it back; otherwise grows the file by one page.
    pub fn get_unused_page_num(&mut self) -> DbResult<u32> {
        if self.free_list_head != 0 {
            let page_number = self.free_list_head;
            let next = {
                let buf = self.get_page(page_number)?;
                u32::from_le_bytes(buf[0..4].try_into().unwrap())
            };
            self.free_list_head = next;
            let buf = self.get_page(page_number)?;
            *buf = [0u8; PAGE_SIZE];
            self.mark_dirty(page_number);
            debug!("reused freelist page {page_number}, new freelist head {next}");
            Ok(page_number)
        } else {
            let page_number = self.num_pages;
            if page_number >= TABLE_MAX_PAGES {
                return Err(DbError::PageOutOfBounds(page_number));
            }
            self.num_pages += 1;
            debug!("allocated new page {page_number}");
            Ok(page_number)
        }
    }

    /// Prepends `page_number` to the freelist: its first 4 bytes become the
    /// current freelist head, and it becomes the new head. Flushed
    /// immediately so the freelist survives even without a clean close.
    pub fn free_page(&mut self, page_number: u32) -> DbResult<()> {
        let next = self.free_list_head;
        {
            let buf = self.get_page(page_number)?;
            buf[0..4].copy_from_slice(&next.to_le_bytes());
        }
        self.mark_dirty(page_number);
        self.flush_page(page_number)?;
        self.free_list_head = page_number;
        debug!("freed page {page_number}, freelist head now {page_number}");
        Ok(())
    }

    /// Walks the freelist chain looking for cycles, duplicates, or entries
    /// outside the allocated page range.
    pub fn validate_freelist(&mut self) -> Result<(), String> {
        let mut seen = HashSet::new();
        let mut page = self.free_list_head;
        while page != 0 {
            if page >= self.num_pages {
                return Err(format!("freelist page {page} is out of range"));
            }
            if !seen.insert(page) {
                return Err(format!("freelist contains a cycle or duplicate at page {page}"));
            }
            let next = {
                let buf = self
                    .get_page(page)
                    .map_err(|e| format!("reading freelist page {page}: {e}"))?;
                u32::from_le_bytes(buf[0..4].try_into().unwrap())
            };
            page = next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> std::path::PathBuf {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        file.close().unwrap();
        path
    }

    #[test]
    fn fresh_file_starts_empty() {
        let path = temp_path();
        let pager = Pager::open(&path).unwrap();
        assert!(pager.is_empty());
        assert_eq!(pager.root_page, 0);
        assert_eq!(pager.free_list_head, 0);
    }

    #[test]
    fn dirty_pages_survive_close_and_reopen() {
        let path = temp_path();
        {
            let mut pager = Pager::open(&path).unwrap();
            pager.root_page = 0;
            let buf = pager.get_page(0).unwrap();
            buf[10] = 42;
            pager.mark_dirty(0);
            pager.close().unwrap();
        }
        {
            let mut pager = Pager::open(&path).unwrap();
            assert_eq!(pager.num_pages(), 1);
            let buf = pager.get_page(0).unwrap();
            assert_eq!(buf[10], 42);
        }
    }

    #[test]
    fn freelist_reuses_pages() {
        let path = temp_path();
        let mut pager = Pager::open(&path).unwrap();
        let a = pager.get_unused_page_num().unwrap();
        let b = pager.get_unused_page_num().unwrap();
        assert_ne!(a, b);
        pager.free_page(a).unwrap();
        let c = pager.get_unused_page_num().unwrap();
        assert_eq!(c, a);
        assert!(pager.validate_freelist().is_ok());
    }

    #[test]
    fn eviction_flushes_dirty_pages_before_reuse() {
        let path = temp_path();
        let mut pager = Pager::open(&path).unwrap();
        for i in 0..(CACHE_CAPACITY as u32 + 5) {
            let buf = pager.get_page(i).unwrap();
            buf[0] = (i % 251) as u8;
            pager.mark_dirty(i);
        }
        pager.close().unwrap();

        let mut reopened = Pager::open(&path).unwrap();
        for i in 0..(CACHE_CAPACITY as u32 + 5) {
            let buf = reopened.get_page(i).unwrap();
            assert_eq!(buf[0], (i % 251) as u8);
        }
    }
}
