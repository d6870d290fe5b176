//! Bad-block handling: runtime marking, data salvage, and the two
//! replacement strategies (write-failure probing and read-failure spare
//! consumption), plus the logical/physical erase sweeps they fall back on.

use log::{debug, info, warn};

use crate::error::{FtlError, Result};
use crate::ftl::FtlLite;
use crate::nand::{NandDriver, PageUtil, RUNTIME_BAD_BYTE_OFFSET};
use crate::tag::UNMAPPED;

impl<N: NandDriver> FtlLite<N> {
    /// Retire a block: erase it (best effort) and clear the spare area from
    /// the runtime marker onward, which zeroes both the bad-block byte and
    /// the tag.
    pub(crate) fn mark_block_bad(&mut self, chip: u32, block: u32) -> Result<()> {
        warn!("marking block bad: chip {chip} block {block}");
        if let Err(err) = self.nand.erase_block(chip, block) {
            warn!("erase before bad-mark failed (chip {chip} block {block}): {err}");
        }
        let zeros = vec![0u8; self.geometry.spare_bytes_per_page - RUNTIME_BAD_BYTE_OFFSET];
        self.nand.write_spare(
            chip,
            self.geometry.first_page(block),
            RUNTIME_BAD_BYTE_OFFSET,
            &zeros,
        )
    }

    /// Erase a block and prove it can hold data: program a pattern into its
    /// first page, read it back, and erase again. Returns true when the
    /// block passes.
    pub(crate) fn erase_and_test_block(&mut self, chip: u32, block: u32) -> bool {
        if self.nand.erase_block(chip, block).is_err() {
            return false;
        }
        let page = self.geometry.first_page(block);
        let pattern = vec![0x5Au8; self.geometry.page_size];
        if self
            .nand
            .program_pages(chip, page, Some(&pattern), None, 1)
            .is_err()
        {
            return false;
        }
        let mut check = vec![0u8; self.geometry.page_size];
        if self
            .nand
            .read_pages(chip, page, Some(&mut check), None, 1, true)
            .is_err()
            || check != pattern
        {
            return false;
        }
        self.nand.erase_block(chip, block).is_ok()
    }

    /// Copy the first `pages` pages of `src` to `dst` (both bank-relative),
    /// skipping pages still in the erased state. The source's tag moves with
    /// its first page. On a program failure the destination is marked bad
    /// and the error returned so the caller can pick another block.
    pub(crate) fn copyback(
        &mut self,
        bank: u32,
        src_block: u32,
        dst_block: u32,
        pages: u32,
    ) -> Result<()> {
        let (src_chip, src_pba) = self.btl.resolve(bank, src_block)?;
        let (dst_chip, dst_pba) = self.btl.resolve(bank, dst_block)?;
        let src_page = self.geometry.first_page(src_pba);
        let dst_page = self.geometry.first_page(dst_pba);

        let mut data = vec![0u8; self.geometry.page_size];
        let mut tag = vec![0u8; self.geometry.tag_size];

        for page in 0..pages {
            // Source read errors are tolerated; the block is being retired
            // and a torn page is better than none
            let _ = self.nand.read_pages(
                src_chip,
                src_page + page,
                Some(&mut data),
                Some(&mut tag),
                1,
                false,
            );
            if data.is_erased() {
                continue;
            }
            let tag_bytes = (page == 0).then_some(tag.as_slice());
            if let Err(err) =
                self.nand
                    .program_pages(dst_chip, dst_page + page, Some(&data), tag_bytes, 1)
            {
                warn!(
                    "copyback target failed at page {page}: chip {dst_chip} block {dst_pba}"
                );
                let _ = self.mark_block_bad(dst_chip, dst_pba);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Replace the block at `index` after a program failure, preserving the
    /// `pages_written` pages already committed to it.
    ///
    /// Probes the physical blocks after the failed one until a good block
    /// accepts the salvaged data, then rethreads the bank's table: every
    /// mapping from the chosen block onward slides down one slot and the
    /// tail is refilled from the spare pool. Works because both the table
    /// and the pool are in scan order.
    pub(crate) fn replace_after_write_failure(
        &mut self,
        bank: u32,
        index: u32,
        pages_written: u32,
    ) -> Result<()> {
        let bad_block = self.table.banks[bank as usize].physical[index as usize];
        let limit = self.props.start_physical_block + self.props.total_physical_blocks;

        let mut chosen = None;
        let mut candidate = bad_block + 1;
        while candidate < limit {
            let (chip, pba) = self.btl.resolve(bank, candidate)?;
            match self.block_status(chip, pba) {
                Err(err) => {
                    warn!("block status failed during probe (chip {chip} block {pba}): {err}");
                    let _ = self.mark_block_bad(chip, pba);
                }
                Ok(status) if status.is_good() => {
                    if self.copyback(bank, bad_block, candidate, pages_written).is_ok() {
                        chosen = Some(candidate);
                        break;
                    }
                    // Copyback marked the candidate bad; keep probing
                }
                Ok(_) => {
                    debug!("probe skipping bad block: chip {chip} block {pba}");
                }
            }
            candidate += 1;
        }
        let chosen = chosen.ok_or(FtlError::NandNoFreeBlock)?;
        info!(
            "replaced block for logical index {index} bank {bank}: {bad_block} -> {chosen}"
        );

        let required = self.props.total_logical_blocks as usize;
        let bank_map = &mut self.table.banks[bank as usize];

        // The chosen block may already back a later logical index (or sit in
        // the spare pool): slide every mapping from its slot onward down by
        // one, then top up the tail from the pool.
        let mut from = index as usize + 1;
        while from < required && bank_map.physical[from] != chosen {
            from += 1;
        }
        let mut to = index as usize;
        while from < required {
            bank_map.physical[to] = bank_map.physical[from];
            to += 1;
            from += 1;
        }

        let mut consumed = 0;
        while to < required && consumed < bank_map.spare_count {
            bank_map.physical[to] = bank_map.spares[consumed];
            bank_map.spares[consumed] = UNMAPPED;
            to += 1;
            consumed += 1;
        }
        if to < required {
            warn!("bank {bank}: spare pool exhausted while rethreading the table");
            return Err(FtlError::NandNoFreeBlock);
        }
        bank_map.spare_count -= consumed;
        if !bank_map.compact_spares() {
            return Err(FtlError::CountMismatch);
        }
        Ok(())
    }

    /// Replace the block at `index` after a read failure, moving its full
    /// contents to a block taken from the spare pool.
    pub(crate) fn replace_after_read_failure(&mut self, bank: u32, index: u32) -> Result<()> {
        // The spare pool is only complete after a full scan
        self.ensure_full_table()?;

        let bad_block = self.table.banks[bank as usize].physical[index as usize];
        let pages = self.geometry.pages_per_block;

        let mut consumed = 0;
        let replacement = loop {
            if consumed >= self.table.banks[bank as usize].spare_count {
                warn!("bank {bank}: no spare block left to replace {bad_block}");
                return Err(FtlError::NandNoFreeBlock);
            }
            let free = self.table.banks[bank as usize].spares[consumed];
            self.table.banks[bank as usize].spares[consumed] = UNMAPPED;
            consumed += 1;

            let (chip, pba) = self.btl.resolve(bank, free)?;
            info!("trying spare block: chip {chip} block {pba}");
            if self.nand.erase_block(chip, pba).is_err() {
                let _ = self.mark_block_bad(chip, pba);
                continue;
            }
            if self.copyback(bank, bad_block, free, pages).is_err() {
                continue;
            }
            break free;
        };

        let bank_map = &mut self.table.banks[bank as usize];
        bank_map.physical[index as usize] = replacement;
        bank_map.spare_count -= consumed;
        if !bank_map.compact_spares() {
            return Err(FtlError::CountMismatch);
        }
        info!(
            "replaced block for logical index {index} bank {bank}: {bad_block} -> {replacement}"
        );
        Ok(())
    }

    /// Erase the mapped blocks for logical indices `[start_block, end_block)`
    /// in every bank. Any unmapped entry or unrecoverable erase failure falls
    /// back to a sweep of the whole physical range plus a full rebuild.
    pub(crate) fn erase_logical_blocks(&mut self, start_block: u32, end_block: u32) -> Result<()> {
        if start_block > end_block || end_block > self.props.total_logical_blocks {
            return Err(FtlError::BadParameter);
        }

        let mut fall_back = false;
        'banks: for bank in 0..self.props.interleave_bank_count {
            for index in start_block..end_block {
                let mapped = self.table.banks[bank as usize].physical[index as usize];
                if mapped == UNMAPPED {
                    fall_back = true;
                    break 'banks;
                }
                let (chip, pba) = self.btl.resolve(bank, mapped)?;
                if self.nand.erase_block(chip, pba).is_err() {
                    warn!("erase failed: chip {chip} block {pba}");
                    if self.mark_block_bad(chip, pba).is_err() {
                        fall_back = true;
                        break 'banks;
                    }
                }
            }
        }

        if fall_back {
            info!("erasing every physical block and rebuilding the mapping");
            self.erase_all_blocks();
            self.build_table(false)?;
        }
        Ok(())
    }

    /// Erase every usable physical block in the region, spares included.
    /// Failures mark the block bad and move on; the sweep itself cannot fail.
    pub(crate) fn erase_all_blocks(&mut self) {
        for bank in 0..self.props.interleave_bank_count {
            for block_num in 0..self.props.total_physical_blocks {
                let relative_block = self.props.start_physical_block + block_num;
                let Ok((chip, pba)) = self.btl.resolve(bank, relative_block) else {
                    continue;
                };
                match self.nand.block_info(chip, pba) {
                    Err(err) => {
                        warn!("block info failed (chip {chip} block {pba}): {err}");
                    }
                    Ok(info) if !info.factory_good || !info.runtime_good() => {
                        debug!("sweep skipping bad block: chip {chip} block {pba}");
                    }
                    Ok(_) => {
                        if self.nand.erase_block(chip, pba).is_err() {
                            let _ = self.mark_block_bad(chip, pba);
                        }
                    }
                }
            }
        }
    }
}
