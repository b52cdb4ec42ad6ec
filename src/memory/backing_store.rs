// Backing store for the MCOS emulator.
//
// A keyed byte-page container addressed by `(pid, page_num)`. Pages absent
// from the store are defined to be zero; entries appear on dirty eviction and
// are never deleted during a run. The on-disk dump is a redundant
// human-readable snapshot, not a correctness requirement.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::process::Pid;

/// Non-resident page contents, one fixed-size byte page per key.
#[derive(Debug, Default)]
pub struct BackingStore {
    pages: BTreeMap<(Pid, usize), Vec<u8>>,
}

impl BackingStore {
    pub fn new() -> Self {
        Self { pages: BTreeMap::new() }
    }

    /// The stored bytes for `(pid, page_num)`, or `None` for a zero page.
    pub fn page(&self, pid: Pid, page_num: usize) -> Option<&[u8]> {
        self.pages.get(&(pid, page_num)).map(Vec::as_slice)
    }

    /// Store a page's bytes, replacing any previous contents.
    pub fn store(&mut self, pid: Pid, page_num: usize, data: Vec<u8>) {
        self.pages.insert((pid, page_num), data);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Write the human-readable dump: one `Page: <pid>:<page> Data: ...` line
    /// per stored page, in key order.
    pub fn dump(&self, writer: &mut impl Write) -> io::Result<()> {
        for ((pid, page_num), data) in &self.pages {
            write!(writer, "Page: {pid}:{page_num} Data:")?;
            for byte in data {
                write!(writer, " {byte}")?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Rewrite the dump file at `path` from scratch.
    pub fn dump_to(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.dump(&mut writer)?;
        writer.flush()
    }
}
