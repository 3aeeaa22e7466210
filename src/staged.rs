//! Working storage for tables under construction.
//!
//! A staged table holds one value per table index and flips between two
//! modes. In write mode workers pull output pages from a sequential
//! dispenser, fill them and commit them back. In read mode the finished
//! generation is immutable and `value_at` is lock free. Disk backing
//! additionally checkpoints every committed generation in page files, so
//! an interrupted generation leaves a consistent `.old` snapshot behind.

use std::{
    fs,
    fs::File,
    io::{self, BufReader, BufWriter},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use rayon::prelude::*;

use crate::{errors::GenResult, pagefile, types::Value};

pub const PAGE_SHIFT: u32 = 20;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Mode {
    Write,
    Read,
}

/// Where committed generations live.
#[derive(Debug, Clone)]
pub enum Storage {
    Memory,
    Disk { directory: PathBuf, stem: String },
}

/// One page handed to a worker. Values are prefilled from the previous
/// generation, so a worker only has to store the indices it recomputed.
#[derive(Debug)]
pub struct OutputPage {
    page_index: usize,
    first_index: u64,
    values: Vec<Value>,
}

impl OutputPage {
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, offset: usize) -> Value {
        self.values[offset]
    }

    pub fn set(&mut self, offset: usize, value: Value) {
        self.values[offset] = value;
    }
}

#[derive(Debug)]
pub struct StagedTable {
    index_count: u64,
    page_count: usize,
    mode: Mode,
    storage: Storage,
    /// Current generation in read mode, previous generation in write mode.
    pages: Vec<Vec<Value>>,
    committed: Mutex<Vec<Option<Vec<Value>>>>,
    next_page: AtomicUsize,
}

impl StagedTable {
    /// Creates an empty table in write mode.
    pub fn new(index_count: u64, storage: Storage) -> StagedTable {
        let page_count = (index_count as usize + PAGE_SIZE - 1) >> PAGE_SHIFT;
        StagedTable {
            index_count,
            page_count,
            mode: Mode::Write,
            storage,
            pages: Vec::new(),
            committed: Mutex::new((0..page_count).map(|_| None).collect()),
            next_page: AtomicUsize::new(0),
        }
    }

    pub fn index_count(&self) -> u64 {
        self.index_count
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_len(&self, page_index: usize) -> usize {
        let first = (page_index as u64) << PAGE_SHIFT;
        PAGE_SIZE.min((self.index_count - first) as usize)
    }

    fn page_path(&self, page_index: usize, suffix: &str) -> PathBuf {
        match &self.storage {
            Storage::Memory => unreachable!("memory tables have no page files"),
            Storage::Disk { directory, stem } => {
                directory.join(format!("{}.{:04}.{}", stem, page_index, suffix))
            }
        }
    }

    /// Makes the current generation the previous one and starts a new
    /// write pass.
    pub fn switch_to_write(&mut self) {
        if self.mode == Mode::Write {
            return;
        }
        self.mode = Mode::Write;
        let committed = self.committed.get_mut().unwrap_or_else(PoisonError::into_inner);
        committed.clear();
        committed.extend((0..self.page_count).map(|_| None));
        self.next_page.store(0, Ordering::SeqCst);
    }

    /// Publishes the committed generation for reading. All pages must have
    /// been committed.
    pub fn switch_to_read(&mut self) -> GenResult<()> {
        if self.mode == Mode::Read {
            return Ok(());
        }
        let committed = self.committed.get_mut().unwrap_or_else(PoisonError::into_inner);
        assert!(
            committed.iter().all(|page| page.is_some()),
            "page not committed"
        );

        match &self.storage {
            Storage::Memory => {
                self.pages = committed.drain(..).flatten().collect();
            }
            Storage::Disk { .. } => {
                committed.clear();
                self.retire()?;
                self.pages = (0..self.page_count)
                    .into_par_iter()
                    .map(|page_index| self.read_page_file(page_index))
                    .collect::<io::Result<Vec<_>>>()?;
            }
        }

        self.mode = Mode::Read;
        Ok(())
    }

    /// Replaces the `.old` checkpoint with the just written generation.
    fn retire(&self) -> io::Result<()> {
        for page_index in 0..self.page_count {
            let old = self.page_path(page_index, "old");
            match fs::remove_file(&old) {
                Ok(()) => (),
                Err(error) if error.kind() == io::ErrorKind::NotFound => (),
                Err(error) => return Err(error),
            }
            fs::rename(self.page_path(page_index, "new"), &old)?;
        }
        Ok(())
    }

    fn read_page_file(&self, page_index: usize) -> io::Result<Vec<Value>> {
        let mut reader = BufReader::new(File::open(self.page_path(page_index, "old"))?);
        let mut values = vec![Value::ILLEGAL; self.page_len(page_index)];
        pagefile::read_page(&mut reader, &mut values)?;
        Ok(values)
    }

    /// Hands out the next page of the current write pass, or `None` when
    /// the table is exhausted.
    pub fn next_output_page(&self) -> Option<OutputPage> {
        assert_eq!(self.mode, Mode::Write, "table not in write mode");
        let page_index = self.next_page.fetch_add(1, Ordering::SeqCst);
        if page_index >= self.page_count {
            return None;
        }
        let values = match self.pages.get(page_index) {
            Some(previous) => previous.clone(),
            None => vec![Value::ILLEGAL; self.page_len(page_index)],
        };
        Some(OutputPage {
            page_index,
            first_index: (page_index as u64) << PAGE_SHIFT,
            values,
        })
    }

    pub fn commit(&self, page: OutputPage) -> GenResult<()> {
        assert_eq!(self.mode, Mode::Write, "table not in write mode");
        if let Storage::Disk { .. } = self.storage {
            let path = self.page_path(page.page_index, "new");
            let mut writer = BufWriter::new(File::create(path)?);
            pagefile::write_page(&mut writer, &page.values)?;
        }
        let mut committed = self
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        committed[page.page_index] = Some(page.values);
        Ok(())
    }

    pub fn value_at(&self, index: u64) -> Value {
        assert_eq!(self.mode, Mode::Read, "table not in read mode");
        let page = (index >> PAGE_SHIFT) as usize;
        let offset = (index & (PAGE_SIZE as u64 - 1)) as usize;
        self.pages[page][offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(table: &StagedTable, value_of: impl Fn(u64) -> Value) {
        while let Some(mut page) = table.next_output_page() {
            for offset in 0..page.len() {
                page.set(offset, value_of(page.first_index() + offset as u64));
            }
            table.commit(page).unwrap();
        }
    }

    fn pattern(index: u64) -> Value {
        match index % 3 {
            0 => Value::DRAW,
            1 => Value::win_in((index % 100) as u16),
            _ => Value::ILLEGAL,
        }
    }

    #[test]
    fn test_memory_write_read_cycle() {
        let mut table = StagedTable::new(1000, Storage::Memory);
        fill(&table, pattern);
        table.switch_to_read().unwrap();
        for index in 0..1000 {
            assert_eq!(table.value_at(index), pattern(index));
        }

        // Second generation sees the first one as prefill.
        table.switch_to_write();
        while let Some(mut page) = table.next_output_page() {
            for offset in 0..page.len() {
                assert_eq!(page.get(offset), pattern(page.first_index() + offset as u64));
                if (page.first_index() + offset as u64) % 7 == 0 {
                    page.set(offset, Value::lose_in(4));
                }
            }
            table.commit(page).unwrap();
        }
        table.switch_to_read().unwrap();
        for index in 0..1000 {
            let expected = if index % 7 == 0 {
                Value::lose_in(4)
            } else {
                pattern(index)
            };
            assert_eq!(table.value_at(index), expected);
        }
    }

    #[test]
    fn test_disk_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = StagedTable::new(5000, Storage::Disk {
            directory: dir.path().to_path_buf(),
            stem: "kr-k.w".to_owned(),
        });
        fill(&table, pattern);
        table.switch_to_read().unwrap();
        assert!(dir.path().join("kr-k.w.0000.old").exists());
        assert!(!dir.path().join("kr-k.w.0000.new").exists());
        for index in (0..5000).step_by(17) {
            assert_eq!(table.value_at(index), pattern(index));
        }
    }

    #[test]
    fn test_dispenser_hands_each_page_once() {
        let table = StagedTable::new((PAGE_SIZE as u64) * 2 + 5, Storage::Memory);
        assert_eq!(table.page_count(), 3);
        let mut seen = Vec::new();
        while let Some(page) = table.next_output_page() {
            seen.push(page.first_index());
            table.commit(page).unwrap();
        }
        assert_eq!(seen, vec![0, PAGE_SIZE as u64, (PAGE_SIZE as u64) * 2]);
        assert!(table.next_output_page().is_none());
    }
}
