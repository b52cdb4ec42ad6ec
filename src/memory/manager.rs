// Memory manager for the MCOS emulator.
//
// Owns physical RAM (a flat byte array of `frames * frame_size`), the frame
// table, the backing store, and the paging counters. Serves virtual-address
// reads and writes on behalf of any process; page faults, global-LRU
// eviction, and dirty write-back are internal.
//
// Lock discipline: callers already hold the scheduler lock and pass the
// process table in by reference, so page tables are resolved without any
// pointer sharing; the manager's own `spin::Mutex` guards RAM, the frame
// table, the store, and the counters beneath it. The manager never calls
// back up into the interpreter or scheduler.

use std::fmt;
use std::path::{Path, PathBuf};

use spin::Mutex;

use crate::memory::backing_store::BackingStore;
use crate::process::{PageTableEntry, Pid, ProcessTable};

/// Per physical frame: the owning `(pid, page_num)`, or `None` when free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTableEntry {
    pub owner: Option<(Pid, usize)>,
}

impl FrameTableEntry {
    pub fn occupied(&self) -> bool {
        self.owner.is_some()
    }
}

/// Paging counters reported by vmstat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounters {
    pub pages_paged_in: u64,
    pub pages_paged_out: u64,
}

struct MemoryInner {
    ram: Vec<u8>,
    frames: Vec<FrameTableEntry>,
    store: BackingStore,
    counters: PageCounters,
}

/// The shared physical-memory tier.
pub struct MemoryManager {
    frame_size: usize,
    total_frames: usize,
    /// Dump file for the backing store; `None` disables file output.
    dump_path: Option<PathBuf>,
    inner: Mutex<MemoryInner>,
}

impl MemoryManager {
    pub fn new(total_frames: usize, frame_size: usize, dump_path: Option<PathBuf>) -> Self {
        // Start each run with an empty dump file, matching the in-memory store.
        if let Some(path) = &dump_path {
            if let Err(err) = std::fs::File::create(path) {
                log::error!("could not reset backing store dump {}: {err}", path.display());
            }
        }
        Self {
            frame_size,
            total_frames,
            dump_path,
            inner: Mutex::new(MemoryInner {
                ram: vec![0; total_frames * frame_size],
                frames: vec![FrameTableEntry::default(); total_frames],
                store: BackingStore::new(),
                counters: PageCounters::default(),
            }),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn free_frames(&self) -> usize {
        self.inner.lock().frames.iter().filter(|f| !f.occupied()).count()
    }

    /// Bytes of RAM currently claimed by resident pages.
    pub fn used_bytes(&self) -> usize {
        (self.total_frames - self.free_frames()) * self.frame_size
    }

    pub fn counters(&self) -> PageCounters {
        self.inner.lock().counters
    }

    /// Frame ownership snapshot, in frame order.
    pub fn frame_owners(&self) -> Vec<Option<(Pid, usize)>> {
        self.inner.lock().frames.iter().map(|f| f.owner).collect()
    }

    /// Whether the page holding `vaddr` is currently resident.
    pub fn is_page_resident(&self, table: &ProcessTable, pid: Pid, vaddr: usize) -> bool {
        table
            .by_pid(pid)
            .and_then(|p| p.page_table.get(&(vaddr / self.frame_size)))
            .is_some_and(|entry| entry.valid)
    }

    /// Read the 16-bit word at `vaddr` (little-endian across two bytes). A
    /// high byte that would fall outside the address space reads as zero, so
    /// the documented boundary access at `memory_required - 1` succeeds.
    pub fn read_word(
        &self,
        table: &mut ProcessTable,
        pid: Pid,
        vaddr: usize,
        clock: u64,
    ) -> Result<u16, MemoryError> {
        let lo = self.access_byte(table, pid, vaddr, None, clock)?;
        let hi = match self.access_byte(table, pid, vaddr + 1, None, clock) {
            Ok(byte) => byte,
            Err(MemoryError::SegmentationFault { .. }) => 0,
            Err(other) => return Err(other),
        };
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Write the 16-bit word at `vaddr`; the page (or pages) touched become
    /// dirty. A high byte outside the address space is dropped, mirroring
    /// `read_word`.
    pub fn write_word(
        &self,
        table: &mut ProcessTable,
        pid: Pid,
        vaddr: usize,
        value: u16,
        clock: u64,
    ) -> Result<(), MemoryError> {
        let [lo, hi] = value.to_le_bytes();
        self.access_byte(table, pid, vaddr, Some(lo), clock)?;
        match self.access_byte(table, pid, vaddr + 1, Some(hi), clock) {
            Ok(_) | Err(MemoryError::SegmentationFault { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// Read a word without touching LRU stamps or dirty bits, for snapshot
    /// views. `None` when the address is out of range or not resident.
    pub fn peek_word(&self, table: &ProcessTable, pid: Pid, vaddr: usize) -> Option<u16> {
        let proc = table.by_pid(pid)?;
        if vaddr >= proc.memory_required {
            return None;
        }
        let inner = self.inner.lock();
        let lo = self.peek_byte(&inner, proc.page_table.get(&(vaddr / self.frame_size)), vaddr)?;
        let hi = if vaddr + 1 >= proc.memory_required {
            0
        } else {
            let next = vaddr + 1;
            self.peek_byte(&inner, proc.page_table.get(&(next / self.frame_size)), next)?
        };
        Some(u16::from_le_bytes([lo, hi]))
    }

    fn peek_byte(
        &self,
        inner: &MemoryInner,
        entry: Option<&PageTableEntry>,
        vaddr: usize,
    ) -> Option<u8> {
        let frame = entry.filter(|e| e.valid)?.frame_num?;
        Some(inner.ram[frame * self.frame_size + vaddr % self.frame_size])
    }

    /// Touch one byte of `pid`'s address space, faulting the page in if
    /// needed. The whole operation is one critical section of the manager
    /// lock; `last_accessed` is stamped with `clock` on success.
    fn access_byte(
        &self,
        table: &mut ProcessTable,
        pid: Pid,
        vaddr: usize,
        write: Option<u8>,
        clock: u64,
    ) -> Result<u8, MemoryError> {
        let frame_size = self.frame_size;
        {
            let proc = table.by_pid(pid).ok_or(MemoryError::ProcessVanished(pid))?;
            if vaddr >= proc.memory_required {
                return Err(MemoryError::SegmentationFault { pid, addr: vaddr });
            }
        }
        let page_num = vaddr / frame_size;
        let offset = vaddr % frame_size;

        let mut inner = self.inner.lock();

        let resident = table
            .by_pid(pid)
            .and_then(|p| p.page_table.get(&page_num))
            .is_some_and(|entry| entry.valid);
        if !resident {
            Self::fault_in(&mut inner, table, pid, page_num, clock, frame_size, self.dump_path.as_deref())?;
        }

        let proc = table.by_pid_mut(pid).ok_or(MemoryError::ProcessVanished(pid))?;
        let entry = proc.page_table.entry(page_num).or_default();
        let frame = entry.frame_num.ok_or(MemoryError::AllocationFailure)?;
        entry.last_accessed = clock;

        let phys = frame * frame_size + offset;
        match write {
            Some(byte) => {
                entry.dirty = true;
                inner.ram[phys] = byte;
                Ok(byte)
            }
            None => Ok(inner.ram[phys]),
        }
    }

    /// Service a page fault: claim a frame, fill it from the backing store
    /// (or zeros for a new page), and mark the page-table entry resident.
    fn fault_in(
        inner: &mut MemoryInner,
        table: &mut ProcessTable,
        pid: Pid,
        page_num: usize,
        clock: u64,
        frame_size: usize,
        dump_path: Option<&Path>,
    ) -> Result<(), MemoryError> {
        let frame = Self::allocate_frame(inner, table, frame_size, dump_path)?;

        let MemoryInner { ram, frames, store, counters } = inner;
        let frame_slice = &mut ram[frame * frame_size..(frame + 1) * frame_size];
        match store.page(pid, page_num) {
            Some(data) => {
                let len = data.len().min(frame_size);
                frame_slice[..len].copy_from_slice(&data[..len]);
                frame_slice[len..].fill(0);
            }
            None => frame_slice.fill(0),
        }
        counters.pages_paged_in += 1;
        frames[frame].owner = Some((pid, page_num));

        let proc = table.by_pid_mut(pid).ok_or(MemoryError::ProcessVanished(pid))?;
        let entry = proc.page_table.entry(page_num).or_default();
        *entry = PageTableEntry {
            frame_num: Some(frame),
            valid: true,
            dirty: false,
            last_accessed: clock,
        };

        log::debug!("paged in {pid}:{page_num} -> frame {frame}");
        Ok(())
    }

    /// First unoccupied frame in ascending order, or an evicted one.
    fn allocate_frame(
        inner: &mut MemoryInner,
        table: &mut ProcessTable,
        frame_size: usize,
        dump_path: Option<&Path>,
    ) -> Result<usize, MemoryError> {
        if let Some(free) = inner.frames.iter().position(|f| !f.occupied()) {
            return Ok(free);
        }
        Self::evict_victim(inner, table, frame_size, dump_path)
    }

    /// Evict the occupied frame whose owning page-table entry was least
    /// recently accessed, ties broken by smaller frame index. Dirty victims
    /// are written back to the backing store first. A frame referencing a
    /// pid that is no longer in the table is reclaimed outright.
    fn evict_victim(
        inner: &mut MemoryInner,
        table: &mut ProcessTable,
        frame_size: usize,
        dump_path: Option<&Path>,
    ) -> Result<usize, MemoryError> {
        let mut victim: Option<(usize, u64)> = None;
        for index in 0..inner.frames.len() {
            let Some((pid, page_num)) = inner.frames[index].owner else { continue };
            let stamp = match table.by_pid(pid).and_then(|p| p.page_table.get(&page_num)) {
                Some(entry) => entry.last_accessed,
                None => {
                    // Owner vanished: reclaim without write-back.
                    inner.frames[index].owner = None;
                    log::warn!("reclaimed frame {index} from vanished process {pid}");
                    return Ok(index);
                }
            };
            if victim.map_or(true, |(_, best)| stamp < best) {
                victim = Some((index, stamp));
            }
        }

        let Some((frame, _)) = victim else {
            return Err(MemoryError::AllocationFailure);
        };
        let Some((victim_pid, victim_page)) = inner.frames[frame].owner else {
            return Err(MemoryError::AllocationFailure);
        };

        let dirty = table
            .by_pid(victim_pid)
            .and_then(|p| p.page_table.get(&victim_page))
            .is_some_and(|entry| entry.dirty);
        if dirty {
            let start = frame * frame_size;
            let data = inner.ram[start..start + frame_size].to_vec();
            inner.store.store(victim_pid, victim_page, data);
            inner.counters.pages_paged_out += 1;
            if let Some(path) = dump_path {
                if let Err(err) = inner.store.dump_to(path) {
                    log::error!("could not flush backing store dump: {err}");
                }
            }
        }

        if let Some(proc) = table.by_pid_mut(victim_pid) {
            if let Some(entry) = proc.page_table.get_mut(&victim_page) {
                entry.valid = false;
                entry.frame_num = None;
                entry.dirty = false;
            }
        }
        inner.frames[frame].owner = None;
        log::debug!("evicted {victim_pid}:{victim_page} from frame {frame} (dirty: {dirty})");
        Ok(frame)
    }
}

/// Memory access failures surfaced to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// Access at or beyond the process's allocation.
    SegmentationFault { pid: Pid, addr: usize },
    /// The pid has no entry in the process table.
    ProcessVanished(Pid),
    /// No frame could be produced. Impossible once one frame exists, but
    /// representable for defensive testing.
    AllocationFailure,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::SegmentationFault { pid, addr } => {
                write!(f, "segmentation fault (pid {pid}, addr {addr:#x})")
            }
            MemoryError::ProcessVanished(pid) => write!(f, "process {pid} not in table"),
            MemoryError::AllocationFailure => write!(f, "no frame available"),
        }
    }
}

impl std::error::Error for MemoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 16;

    fn table_with(memory: usize) -> (ProcessTable, Pid) {
        let mut table = ProcessTable::new();
        let pages = memory.div_ceil(FRAME);
        let pid = table.spawn("p".to_string(), memory, pages, Vec::new());
        (table, pid)
    }

    /// Frame table and page tables must agree in both directions.
    fn assert_consistent(manager: &MemoryManager, table: &ProcessTable) {
        let owners = manager.frame_owners();
        for (frame, owner) in owners.iter().enumerate() {
            if let Some((pid, page_num)) = owner {
                let entry = table
                    .by_pid(*pid)
                    .and_then(|p| p.page_table.get(page_num))
                    .copied()
                    .unwrap_or_default();
                assert!(entry.valid, "frame {frame} owner has invalid entry");
                assert_eq!(entry.frame_num, Some(frame));
            }
        }
        for proc in table.iter() {
            for (page_num, entry) in &proc.page_table {
                if entry.valid {
                    let frame = entry.frame_num.expect("valid entry without frame");
                    assert_eq!(owners[frame], Some((proc.pid, *page_num)));
                }
            }
        }
        // No two frames share an owner.
        let mut seen: Vec<_> = owners.iter().flatten().collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), owners.iter().flatten().count());
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let manager = MemoryManager::new(4, FRAME, None);
        let (mut table, pid) = table_with(64);

        manager.write_word(&mut table, pid, 0, 1234, 1).unwrap();
        assert_eq!(manager.read_word(&mut table, pid, 0, 2).unwrap(), 1234);
        // Unwritten addresses read as zero.
        assert_eq!(manager.read_word(&mut table, pid, 8, 3).unwrap(), 0);
        assert_consistent(&manager, &table);
    }

    #[test]
    fn test_round_trip_survives_eviction() {
        let manager = MemoryManager::new(1, FRAME, None);
        let (mut table, pid) = table_with(64);

        manager.write_word(&mut table, pid, 0, 7, 1).unwrap();
        manager.write_word(&mut table, pid, 16, 9, 2).unwrap();
        // Page 0 was evicted dirty and must reload from the store.
        assert_eq!(manager.read_word(&mut table, pid, 0, 3).unwrap(), 7);
        assert_eq!(manager.counters(), PageCounters { pages_paged_in: 3, pages_paged_out: 2 });
        assert_consistent(&manager, &table);
    }

    #[test]
    fn test_clean_eviction_skips_write_back() {
        let manager = MemoryManager::new(1, FRAME, None);
        let (mut table, pid) = table_with(64);

        manager.read_word(&mut table, pid, 0, 1).unwrap();
        manager.read_word(&mut table, pid, 16, 2).unwrap();
        let counters = manager.counters();
        assert_eq!(counters.pages_paged_in, 2);
        assert_eq!(counters.pages_paged_out, 0);
    }

    #[test]
    fn test_lru_victim_selection() {
        let manager = MemoryManager::new(2, FRAME, None);
        let (mut table, pid) = table_with(64);

        manager.write_word(&mut table, pid, 0, 1, 1).unwrap(); // page 0, tick 1
        manager.write_word(&mut table, pid, 16, 2, 2).unwrap(); // page 1, tick 2
        manager.read_word(&mut table, pid, 0, 3).unwrap(); // page 0 now newest
        manager.write_word(&mut table, pid, 32, 3, 4).unwrap(); // faults: evicts page 1

        let proc = table.by_pid(pid).unwrap();
        assert!(proc.page_table[&0].valid);
        assert!(!proc.page_table[&1].valid);
        assert!(proc.page_table[&2].valid);
        assert_consistent(&manager, &table);
    }

    #[test]
    fn test_bounds_checking() {
        let manager = MemoryManager::new(2, FRAME, None);
        let (mut table, pid) = table_with(32);

        // Last byte of the allocation is accessible; the word's high byte is
        // silently dropped.
        assert!(manager.write_word(&mut table, pid, 31, 0xabcd, 1).is_ok());
        assert_eq!(manager.read_word(&mut table, pid, 31, 2).unwrap(), 0x00cd);
        assert!(matches!(
            manager.read_word(&mut table, pid, 32, 3),
            Err(MemoryError::SegmentationFault { addr: 32, .. })
        ));
    }

    #[test]
    fn test_straddling_write_touches_both_pages() {
        let manager = MemoryManager::new(2, FRAME, None);
        let (mut table, pid) = table_with(64);

        manager.write_word(&mut table, pid, 15, 0x0201, 1).unwrap();
        let proc = table.by_pid(pid).unwrap();
        assert!(proc.page_table[&0].dirty);
        assert!(proc.page_table[&1].dirty);
        assert_eq!(manager.read_word(&mut table, pid, 15, 2).unwrap(), 0x0201);
    }

    #[test]
    fn test_access_updates_lru_stamp() {
        let manager = MemoryManager::new(2, FRAME, None);
        let (mut table, pid) = table_with(64);

        manager.read_word(&mut table, pid, 0, 5).unwrap();
        assert_eq!(table.by_pid(pid).unwrap().page_table[&0].last_accessed, 5);
        manager.read_word(&mut table, pid, 0, 9).unwrap();
        assert_eq!(table.by_pid(pid).unwrap().page_table[&0].last_accessed, 9);
    }

    #[test]
    fn test_self_healing_reclaims_vanished_owner() {
        let manager = MemoryManager::new(1, FRAME, None);
        let mut table = ProcessTable::new();
        let _a = table.spawn("a".to_string(), 16, 1, Vec::new());
        let b = table.spawn("b".to_string(), 16, 1, Vec::new());
        // The single frame ends up dirty and owned by pid 2.
        manager.write_word(&mut table, b, 0, 3, 1).unwrap();

        // Present a table that never had pid 2. A well-behaved table never
        // removes processes; this guards the defensive path only.
        let mut fresh = ProcessTable::new();
        let c = fresh.spawn("c".to_string(), 16, 1, Vec::new());
        manager.write_word(&mut fresh, c, 0, 4, 2).unwrap();
        assert_eq!(manager.counters().pages_paged_out, 0, "dangling frame must not write back");
        assert_eq!(manager.read_word(&mut fresh, c, 0, 3).unwrap(), 4);
    }

    #[test]
    fn test_peek_word_does_not_disturb_state() {
        let manager = MemoryManager::new(2, FRAME, None);
        let (mut table, pid) = table_with(64);
        manager.write_word(&mut table, pid, 0, 77, 1).unwrap();

        assert_eq!(manager.peek_word(&table, pid, 0), Some(77));
        assert_eq!(table.by_pid(pid).unwrap().page_table[&0].last_accessed, 1);
        // Non-resident pages are not faulted in by a peek.
        assert_eq!(manager.peek_word(&table, pid, 32), None);
        assert_eq!(manager.counters().pages_paged_in, 1);
    }

    #[test]
    fn test_usage_queries() {
        let manager = MemoryManager::new(4, FRAME, None);
        let (mut table, pid) = table_with(64);
        assert_eq!(manager.free_frames(), 4);
        assert_eq!(manager.used_bytes(), 0);

        manager.write_word(&mut table, pid, 0, 1, 1).unwrap();
        manager.write_word(&mut table, pid, 16, 1, 2).unwrap();
        assert_eq!(manager.free_frames(), 2);
        assert_eq!(manager.used_bytes(), 32);
        assert!(manager.is_page_resident(&table, pid, 0));
        assert!(!manager.is_page_resident(&table, pid, 32));
    }
}
