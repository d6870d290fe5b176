//! The sector read/write path: pointer discipline, chunking across blocks
//! and banks, tag placement, and the retry loops that hide bad blocks from
//! callers.

use log::{info, warn};

use crate::error::{FtlError, Result};
use crate::ftl::{FtlLite, SectorAddr};
use crate::nand::NandDriver;
use crate::tag::{BlockTag, UNMAPPED};

impl<N: NandDriver> FtlLite<N> {
    /// Write `sector_count` sectors starting at `sector_number`.
    ///
    /// Writes are append-only within a session: rewinding behind the write
    /// pointer is rejected. The first write of a session erases every mapped
    /// block first, and skipped-over superblocks get tag-only updates so the
    /// mapping survives a rebuild.
    pub fn write_sector(
        &mut self,
        sector_number: u32,
        buffer: &[u8],
        sector_count: u32,
    ) -> Result<()> {
        if sector_count == 0
            || buffer.len() != sector_count as usize * self.geometry.page_size
        {
            return Err(FtlError::BadParameter);
        }
        if self.write_pointer != 0 && sector_number < self.write_pointer {
            warn!(
                "write rewind: sector {sector_number} behind pointer {}",
                self.write_pointer
            );
            return Err(FtlError::NandProgramFailed);
        }
        let end = sector_number
            .checked_add(sector_count)
            .filter(|&end| end <= self.total_sectors)
            .ok_or(FtlError::BadParameter)?;

        if self.write_pointer == 0 {
            info!("first write of the session: erasing mapped blocks");
            self.erase_logical_blocks(0, self.props.total_logical_blocks)
                .map_err(|_| FtlError::NandBlockDriverEraseFailure)?;
        }

        let previous_pointer = self.write_pointer;
        self.write_pointer = end;
        let last_skipped = if sector_number > 0 {
            sector_number - 1
        } else {
            sector_number
        };
        self.tag_update(previous_pointer, last_skipped)?;

        let bank_count = self.props.interleave_bank_count;
        let pages_per_block = self.geometry.pages_per_block;
        let mut sector = sector_number;
        let mut remaining = sector_count;
        let mut buffer = buffer;
        while remaining > 0 {
            let addr = self.locate(sector);
            if addr.index >= self.props.total_logical_blocks {
                return Err(FtlError::NandWriteFailed);
            }
            let chunk = if bank_count == 1 {
                if addr.offset + remaining > pages_per_block {
                    pages_per_block - addr.offset
                } else if addr.offset == 0 && remaining > 1 {
                    // The tag rides with page 0; commit it alone so a
                    // mid-transfer failure cannot leave a tagged block with
                    // torn data
                    1
                } else {
                    remaining
                }
            } else {
                // Interleaved regions advance one page per bank
                1
            };
            let bytes = chunk as usize * self.geometry.page_size;
            self.write_data(addr, Some(&buffer[..bytes]), chunk)?;
            sector += chunk;
            remaining -= chunk;
            buffer = &buffer[bytes..];
        }
        Ok(())
    }

    /// Read `sector_count` sectors starting at `sector_number`. Reads past
    /// the write pointer are rejected; sectors in blocks never written read
    /// as erased flash (all ones).
    pub fn read_sector(
        &mut self,
        sector_number: u32,
        buffer: &mut [u8],
        sector_count: u32,
    ) -> Result<()> {
        if sector_count == 0
            || buffer.len() != sector_count as usize * self.geometry.page_size
        {
            return Err(FtlError::BadParameter);
        }
        let end = sector_number
            .checked_add(sector_count)
            .filter(|&end| end <= self.total_sectors)
            .ok_or(FtlError::BadParameter)?;
        if self.write_pointer != 0 && sector_number > self.write_pointer {
            warn!(
                "read overrun: sector {sector_number} past pointer {}",
                self.write_pointer
            );
            return Err(FtlError::NandReadFailed);
        }
        self.read_pointer = end;

        let bank_count = self.props.interleave_bank_count;
        let pages_per_block = self.geometry.pages_per_block;
        let mut sector = sector_number;
        let mut remaining = sector_count;
        let mut done = 0usize;
        while remaining > 0 {
            let addr = self.locate(sector);
            if addr.index >= self.props.total_logical_blocks {
                return Err(FtlError::NandReadFailed);
            }
            let chunk = if bank_count == 1 {
                remaining.min(pages_per_block - addr.offset)
            } else {
                1
            };
            let bytes = chunk as usize * self.geometry.page_size;
            self.read_data(addr, &mut buffer[done..done + bytes], chunk)?;
            sector += chunk;
            remaining -= chunk;
            done += bytes;
        }
        Ok(())
    }

    /// Program `count` pages at `addr`, retrying on a fresh block until the
    /// write sticks or no replacement is left. `data` of `None` programs the
    /// tag alone. The original device error surfaces if replacement fails.
    pub(crate) fn write_data(
        &mut self,
        addr: SectorAddr,
        data: Option<&[u8]>,
        count: u32,
    ) -> Result<()> {
        loop {
            let mapped = self.table.banks[addr.bank as usize].physical[addr.index as usize];
            if mapped == UNMAPPED {
                warn!(
                    "no physical block for logical index {} bank {}",
                    addr.index, addr.bank
                );
                return Err(FtlError::NandWriteFailed);
            }
            let (chip, pba) = self.btl.resolve(addr.bank, mapped)?;
            let page = self.geometry.first_page(pba) + addr.offset;

            let tag = if addr.offset == 0 {
                let mut bytes = vec![0xFFu8; self.geometry.tag_size];
                BlockTag::new(self.props.start_logical_block + addr.index)
                    .encode(&mut bytes)?;
                Some(bytes)
            } else {
                None
            };

            let mut outcome = self
                .nand
                .program_pages(chip, page, data, tag.as_deref(), count);
            if outcome.is_ok() && self.read_verify {
                if let Some(data) = data {
                    outcome = self.read_verify_pages(chip, page, data, count);
                }
            }
            let err = match outcome {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            warn!(
                "write failed at chip {chip} page {page} ({err}); replacing block {mapped}"
            );
            let replaced = self.replace_after_write_failure(addr.bank, addr.index, addr.offset);
            let _ = self.mark_block_bad(chip, pba);
            if replaced.is_err() {
                return Err(err);
            }
            // The mapping now points at the replacement; retry there
        }
    }

    /// Read `count` pages at `addr`. A miss on a partially built table
    /// triggers the full scan; a still-unmapped block reads as erased flash.
    /// Device errors trigger replacement (the data already transferred is
    /// kept) unless the region is sequential-read-only.
    pub(crate) fn read_data(
        &mut self,
        addr: SectorAddr,
        buffer: &mut [u8],
        count: u32,
    ) -> Result<()> {
        let mut mapped = self.table.banks[addr.bank as usize].physical[addr.index as usize];
        if mapped == UNMAPPED {
            self.ensure_full_table()?;
            mapped = self.table.banks[addr.bank as usize].physical[addr.index as usize];
            if mapped == UNMAPPED {
                buffer.fill(0xFF);
                return Ok(());
            }
        }
        let (chip, pba) = self.btl.resolve(addr.bank, mapped)?;
        let page = self.geometry.first_page(pba) + addr.offset;

        match self
            .nand
            .read_pages(chip, page, Some(buffer), None, count, true)
        {
            Ok(()) => Ok(()),
            Err(err) if self.props.sequential_read_only => {
                warn!(
                    "read failed at chip {chip} page {page} ({err}); remap suppressed"
                );
                Err(err)
            }
            Err(err) => {
                warn!(
                    "read failed at chip {chip} page {page} ({err}); replacing block {mapped}"
                );
                let replaced = self.replace_after_read_failure(addr.bank, addr.index);
                let _ = self.mark_block_bad(chip, pba);
                // Whatever the device managed to transfer is returned as-is;
                // the salvage copy is for future reads
                replaced.map_err(|_| err)
            }
        }
    }

    /// Write bare tags into the first page of every superblock the write
    /// pointer jumped over, so tag-directed rebuilds still see those blocks
    /// as owned.
    pub(crate) fn tag_update(&mut self, from_sector: u32, to_sector: u32) -> Result<()> {
        if from_sector == 0 && to_sector == 0 {
            return Ok(());
        }
        let bank_count = self.props.interleave_bank_count;
        let superblock_sectors = self.sectors_per_superblock();

        let mut sector = from_sector;
        while sector <= to_sector {
            let addr = self.locate(sector);
            if addr.offset == 0 {
                self.write_data(addr, None, 1)?;
                if addr.bank == bank_count - 1 {
                    // All banks of this superblock are tagged; jump to the
                    // head of the next one
                    sector += superblock_sectors - (bank_count - 1);
                    continue;
                }
            }
            sector += 1;
        }
        Ok(())
    }

    /// Read back `count` just-programmed pages one at a time and compare
    /// against what was written.
    fn read_verify_pages(&mut self, chip: u32, start_page: u32, data: &[u8], count: u32) -> Result<()> {
        let page_size = self.geometry.page_size;
        let mut check = vec![0u8; page_size];
        for page in 0..count {
            self.nand
                .read_pages(chip, start_page + page, Some(&mut check), None, 1, true)?;
            if check != data[page as usize * page_size..][..page_size] {
                warn!("read-verify mismatch at chip {chip} page {}", start_page + page);
                return Err(FtlError::WriteVerifyFailed);
            }
        }
        Ok(())
    }
}
