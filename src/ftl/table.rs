//! Mapping-table construction: the tag scan that rebuilds logical→physical
//! state from flash after power loss.
//!
//! Each bank keeps its own table: `physical[i]` is the bank-relative block
//! backing logical index `i` (or [`UNMAPPED`]), plus a pool of spare blocks
//! beyond the logical requirement. A partial build stops a bank's scan at the
//! first never-written tag so open stays cheap on a mostly-blank device; the
//! full build walks every block and is run lazily the first time a lookup
//! misses.

use log::{debug, warn};

use crate::error::{FtlError, Result};
use crate::ftl::FtlLite;
use crate::nand::NandDriver;
use crate::tag::{BlockTag, UNMAPPED};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum BuildState {
    Uninitialized,
    PartiallyBuilt,
    FullyBuilt,
}

/// One bank's view of the mapping
#[derive(Debug)]
pub(crate) struct BankMap {
    /// Logical index → bank-relative physical block
    pub physical: Vec<u32>,
    /// Good blocks beyond the logical requirement, in scan order
    pub spares: Vec<u32>,
    /// Live entries at the front of `spares`
    pub spare_count: usize,
}

impl BankMap {
    fn allocate(logical: usize, spare_slots: usize) -> Result<Self> {
        let mut physical = Vec::new();
        physical
            .try_reserve_exact(logical)
            .map_err(|_| FtlError::InsufficientMemory)?;
        physical.resize(logical, UNMAPPED);

        let mut spares = Vec::new();
        spares
            .try_reserve_exact(spare_slots)
            .map_err(|_| FtlError::InsufficientMemory)?;
        spares.resize(spare_slots, UNMAPPED);

        Ok(Self {
            physical,
            spares,
            spare_count: 0,
        })
    }

    fn reset(&mut self) {
        self.physical.fill(UNMAPPED);
        self.spares.fill(UNMAPPED);
        self.spare_count = 0;
    }

    /// Squeeze consumed slots out of the spare pool. Returns false when the
    /// live entries found disagree with `spare_count`.
    pub fn compact_spares(&mut self) -> bool {
        let mut live = 0;
        for i in 0..self.spares.len() {
            if self.spares[i] != UNMAPPED {
                self.spares.swap(live, i);
                live += 1;
            }
        }
        for slot in &mut self.spares[live..] {
            *slot = UNMAPPED;
        }
        live == self.spare_count
    }
}

#[derive(Debug)]
pub(crate) struct MappingTable {
    pub banks: Vec<BankMap>,
    pub state: BuildState,
}

impl MappingTable {
    pub fn allocate(bank_count: usize, logical: usize, spare_slots: usize) -> Result<Self> {
        let mut banks = Vec::new();
        banks
            .try_reserve_exact(bank_count)
            .map_err(|_| FtlError::InsufficientMemory)?;
        for _ in 0..bank_count {
            banks.push(BankMap::allocate(logical, spare_slots)?);
        }
        Ok(Self {
            banks,
            state: BuildState::Uninitialized,
        })
    }
}

impl<N: NandDriver> FtlLite<N> {
    /// Rebuild the mapping by scanning block tags, bank by bank.
    ///
    /// The first non-sentinel tag seen anywhere flips the whole scan into
    /// tag-directed mode: from then on blocks land at the index their tag
    /// names rather than in scan order. The flag is shared across banks, so
    /// a bank scanned before any tagged block was seen keeps its scan-order
    /// assignment; interleaved writes tag all banks in step, which keeps the
    /// banks consistent in practice.
    pub(crate) fn build_table(&mut self, partial: bool) -> Result<()> {
        let required = self.props.total_logical_blocks;
        let bank_count = self.props.interleave_bank_count;
        let geometry = self.geometry;

        for bank in &mut self.table.banks {
            bank.reset();
        }

        let mut use_tag_info = false;

        for bank in 0..bank_count {
            // Blocks mapped or accounted for so far in this bank
            let mut assigned: u32 = 0;

            'blocks: for block_num in 0..self.props.total_physical_blocks {
                let relative_block = self.props.start_physical_block + block_num;
                let (chip, pba) = self.btl.resolve(bank, relative_block)?;

                // One extra pass when a stale tag forces an erase-and-reprobe
                loop {
                    let info = self.nand.block_info(chip, pba)?;
                    if !info.factory_good {
                        debug!("skipping factory bad block: chip {chip} block {pba}");
                        continue 'blocks;
                    }
                    if !info.runtime_good() {
                        debug!("skipping runtime bad block: chip {chip} block {pba}");
                        continue 'blocks;
                    }

                    let tag = BlockTag::decode(info.tag_area(&geometry)?)
                        .ok_or(FtlError::BadValue)?;

                    if tag.is_unwritten() && partial {
                        // Sequential writes mean nothing beyond this point in
                        // the bank carries a tag either
                        break 'blocks;
                    }

                    if assigned >= required {
                        let slot = self.table.banks[bank as usize].spare_count;
                        self.table.banks[bank as usize].spares[slot] = relative_block;
                        self.table.banks[bank as usize].spare_count = slot + 1;
                        continue 'blocks;
                    }

                    if !tag.is_unwritten() {
                        use_tag_info = true;
                    }

                    if !use_tag_info {
                        self.table.banks[bank as usize].physical[assigned as usize] =
                            relative_block;
                        assigned += 1;
                        continue 'blocks;
                    }

                    if !tag.is_unwritten() && tag.logical_block < self.props.start_logical_block {
                        // Leftover from a previous layout; erase and look at
                        // the block again as blank
                        warn!(
                            "stale tag {} below region start {}: erasing chip {chip} block {pba}",
                            tag.logical_block, self.props.start_logical_block
                        );
                        let _ = self.nand.erase_block(chip, pba);
                        continue;
                    }

                    if tag.is_unwritten() {
                        // Blank block inside a tag-directed scan: leave it
                        // unmapped but count it toward the requirement
                        assigned += 1;
                        continue 'blocks;
                    }

                    let index = tag.logical_block - self.props.start_logical_block;
                    let occupied = (index as usize) < self.table.banks[bank as usize].physical.len()
                        && self.table.banks[bank as usize].physical[index as usize] != UNMAPPED;

                    if index >= required || occupied {
                        // Tag points outside the table or at a taken slot;
                        // reclaim the block if it still works
                        warn!(
                            "unusable tag {} (chip {chip} block {pba}): testing block",
                            tag.logical_block
                        );
                        if self.erase_and_test_block(chip, pba) {
                            assigned += 1;
                        } else {
                            let _ = self.mark_block_bad(chip, pba);
                        }
                        continue 'blocks;
                    }

                    self.table.banks[bank as usize].physical[index as usize] = relative_block;
                    assigned += 1;
                    continue 'blocks;
                }
            }

            if !partial && assigned < required && !self.props.is_unbounded {
                warn!(
                    "bank {bank}: only {assigned} of {required} required blocks are usable"
                );
            }
        }

        self.table.state = if partial {
            BuildState::PartiallyBuilt
        } else {
            let unassigned = self
                .table
                .banks
                .iter()
                .any(|b| b.physical.contains(&UNMAPPED));
            if unassigned {
                BuildState::PartiallyBuilt
            } else {
                BuildState::FullyBuilt
            }
        };

        Ok(())
    }

    pub(crate) fn ensure_full_table(&mut self) -> Result<()> {
        if self.table.state != BuildState::FullyBuilt {
            self.build_table(false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compact_spares_squeezes_consumed_slots() {
        let mut bank = BankMap::allocate(4, 4).unwrap();
        bank.spares = vec![UNMAPPED, 7, UNMAPPED, 9];
        bank.spare_count = 2;
        assert!(bank.compact_spares());
        assert_eq!(bank.spares, vec![7, 9, UNMAPPED, UNMAPPED]);
    }

    #[test]
    fn compact_spares_detects_count_mismatch() {
        let mut bank = BankMap::allocate(4, 4).unwrap();
        bank.spares = vec![7, UNMAPPED, UNMAPPED, UNMAPPED];
        bank.spare_count = 2;
        assert!(!bank.compact_spares());
    }
}
