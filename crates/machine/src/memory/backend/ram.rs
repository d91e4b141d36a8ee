//! Sparse-tree main memory.
//!
//! Physical memory is modeled as a hierarchical sparse tree keyed by the high
//! address bits: a configurable number of levels of fixed fan-out with leaves
//! being contiguous byte sections. Sections are allocated on the first write;
//! reads of unallocated sections return zeros, so a fresh multi-gigabyte
//! address space costs nothing until touched.

use crate::common::error::{SimResult, SimulatorError};
use crate::config::Xlen;
use crate::memory::backend::{
    AccessOptions, BackendMemory, Offset, WriteResult,
};

/// Bits of the address covered by one leaf section (64 KiB sections).
const MEMORY_SECTION_BITS: u32 = 16;
/// Size of one leaf section in bytes.
const MEMORY_SECTION_SIZE: usize = 1 << MEMORY_SECTION_BITS;
/// Bits of the address consumed by one tree level.
const MEMORY_TREE_BITS: u32 = 4;
/// Fan-out of one tree row.
const MEMORY_TREE_ROW_SIZE: usize = 1 << MEMORY_TREE_BITS;

const _: () = assert!(
    (32 - MEMORY_SECTION_BITS) % MEMORY_TREE_BITS == 0,
    "tree rows must exactly divide the address bits above the section"
);

/// One contiguous allocated span of bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MemorySection {
    data: Vec<u8>,
}

impl MemorySection {
    /// Creates a zero-filled section of `length_bytes`.
    pub fn new(length_bytes: usize) -> Self {
        Self {
            data: vec![0; length_bytes],
        }
    }

    /// Section length in bytes.
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Writes into the section; accepts at most the bytes up to its end.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::OutOfMemoryAccess`] when the offset starts
    /// beyond the section.
    pub fn write(&mut self, offset: usize, source: &[u8]) -> SimResult<WriteResult> {
        if offset >= self.length() {
            return Err(SimulatorError::OutOfMemoryAccess(format!(
                "write outside of memory section, offset {offset:#x}"
            )));
        }
        let available = (self.length() - offset).min(source.len());
        let target = &mut self.data[offset..offset + available];
        let changed = target != &source[..available];
        if changed {
            target.copy_from_slice(&source[..available]);
        }
        Ok(WriteResult {
            n_bytes: available,
            changed,
        })
    }

    /// Reads from the section; produces at most the bytes up to its end.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::OutOfMemoryAccess`] when the offset starts
    /// beyond the section.
    pub fn read(&self, destination: &mut [u8], offset: usize) -> SimResult<usize> {
        if offset >= self.length() {
            return Err(SimulatorError::OutOfMemoryAccess(format!(
                "read outside of memory section, offset {offset:#x}"
            )));
        }
        let available = (self.length() - offset).min(destination.len());
        destination[..available].copy_from_slice(&self.data[offset..offset + available]);
        Ok(available)
    }
}

/// Node of the sparse memory tree.
#[derive(Clone)]
enum TreeNode {
    /// Interior row indexing the next address bits.
    Subtree(Vec<Option<TreeNode>>),
    /// Allocated leaf section.
    Leaf(MemorySection),
}

fn empty_row() -> Vec<Option<TreeNode>> {
    let mut row = Vec::with_capacity(MEMORY_TREE_ROW_SIZE);
    row.resize_with(MEMORY_TREE_ROW_SIZE, || None);
    row
}

/// Sparse-tree backed main memory.
#[derive(Clone)]
pub struct Memory {
    root: Vec<Option<TreeNode>>,
    address_bits: u32,
}

impl Memory {
    /// Creates an empty memory covering a `2^XLEN`-byte address space.
    pub fn new(xlen: Xlen) -> Self {
        Self {
            root: empty_row(),
            address_bits: xlen.bits(),
        }
    }

    /// Drops every allocated section.
    pub fn reset(&mut self) {
        self.root = empty_row();
    }

    /// Number of tree levels between the root row and the leaf sections.
    fn tree_depth(&self) -> u32 {
        (self.address_bits - MEMORY_SECTION_BITS) / MEMORY_TREE_BITS
    }

    /// Row index of `offset` at tree level `level` (0 = root).
    fn row_index(&self, offset: u64, level: u32) -> usize {
        let shift = self.address_bits - MEMORY_TREE_BITS * (level + 1);
        ((offset >> shift) & (MEMORY_TREE_ROW_SIZE as u64 - 1)) as usize
    }

    /// Walks the tree to the section containing `offset`, without allocating.
    fn section(&self, offset: u64) -> Option<&MemorySection> {
        let depth = self.tree_depth();
        let mut row = &self.root;
        for level in 0..depth {
            let index = self.row_index(offset, level);
            match row[index].as_ref()? {
                TreeNode::Subtree(next) => row = next,
                TreeNode::Leaf(section) => return Some(section),
            }
        }
        None
    }

    /// Walks the tree to the section containing `offset`, allocating interior
    /// rows and the leaf section on the way.
    fn section_mut(&mut self, offset: u64) -> &mut MemorySection {
        let depth = self.tree_depth();
        let address_bits = self.address_bits;
        let mut row = &mut self.root;
        for level in 0..depth {
            let shift = address_bits - MEMORY_TREE_BITS * (level + 1);
            let index = ((offset >> shift) & (MEMORY_TREE_ROW_SIZE as u64 - 1)) as usize;
            let is_last = level + 1 == depth;
            let slot = &mut row[index];
            if slot.is_none() {
                *slot = Some(if is_last {
                    TreeNode::Leaf(MemorySection::new(MEMORY_SECTION_SIZE))
                } else {
                    TreeNode::Subtree(empty_row())
                });
            }
            match slot.as_mut().expect("slot was just filled") {
                TreeNode::Subtree(next) => row = next,
                TreeNode::Leaf(section) => return section,
            }
        }
        unreachable!("memory tree depth is at least one level")
    }

    /// Whether the section containing `offset` has been allocated.
    pub fn is_allocated(&self, offset: u64) -> bool {
        self.section(offset).is_some()
    }

    fn check_extent(&self, offset: u64) -> SimResult<()> {
        if self.address_bits < 64 && (offset >> self.address_bits) != 0 {
            return Err(SimulatorError::OutOfMemoryAccess(format!(
                "address {offset:#x} outside the {}-bit physical space",
                self.address_bits
            )));
        }
        Ok(())
    }
}

impl BackendMemory for Memory {
    fn as_ram_mut(&mut self) -> Option<&mut Memory> {
        Some(self)
    }

    fn write(
        &mut self,
        offset: Offset,
        source: &[u8],
        _options: AccessOptions,
    ) -> SimResult<WriteResult> {
        self.check_extent(offset)?;
        let mut done = 0usize;
        let mut changed = false;
        while done < source.len() {
            let address = offset + done as u64;
            let in_section = (address & (MEMORY_SECTION_SIZE as u64 - 1)) as usize;
            let section = self.section_mut(address);
            let result = section.write(in_section, &source[done..])?;
            changed |= result.changed;
            done += result.n_bytes;
        }
        Ok(WriteResult {
            n_bytes: done,
            changed,
        })
    }

    fn read(
        &mut self,
        destination: &mut [u8],
        offset: Offset,
        _options: AccessOptions,
    ) -> SimResult<usize> {
        self.check_extent(offset)?;
        let length = destination.len();
        let mut done = 0usize;
        while done < length {
            let address = offset + done as u64;
            let in_section = (address & (MEMORY_SECTION_SIZE as u64 - 1)) as usize;
            let take = (MEMORY_SECTION_SIZE - in_section).min(length - done);
            match self.section(address) {
                Some(section) => {
                    let taken = section.read(&mut destination[done..done + take], in_section)?;
                    done += taken;
                }
                None => {
                    // Unallocated sections read as zeros.
                    destination[done..done + take].fill(0);
                    done += take;
                }
            }
        }
        Ok(length)
    }
}
