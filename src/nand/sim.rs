//! A simulated in-memory NAND flash, for testing purposes.
//!
//! Program semantics follow real NAND: programming can only clear bits
//! (new contents are ANDed into the page), and only an erase restores the
//! all-1s pattern. Faults are armed one-shot, so a retried operation after a
//! replacement sees a healthy device again. Operation counters allow tests to
//! probe erase/program/read activity.

use std::collections::HashSet;

use crate::error::{FtlError, Result};

use super::{BlockInfo, NandDriver, NandGeometry};

/// Running totals of device operations performed
#[derive(Debug, Default, Copy, Clone)]
pub struct SimCounters {
    pub erases: u64,
    pub programs: u64,
    pub reads: u64,
}

/// One-shot fault triggers, keyed by (chip, page) or (chip, block)
#[derive(Debug, Default)]
struct FaultPlan {
    fail_program: HashSet<(u32, u32)>,
    fail_read: HashSet<(u32, u32)>,
    fail_erase: HashSet<(u32, u32)>,
    corrupt_program: HashSet<(u32, u32)>,
}

#[derive(Debug, Clone)]
struct SimBlock {
    data: Vec<u8>,
    spare: Vec<u8>,
    factory_bad: bool,
}

impl SimBlock {
    fn new(geometry: &NandGeometry) -> Self {
        Self {
            data: vec![0xFF; geometry.block_bytes()],
            spare: vec![0xFF; geometry.spare_bytes_per_page * geometry.pages_per_block as usize],
            factory_bad: false,
        }
    }

    fn erase(&mut self) {
        self.data.fill(0xFF);
        self.spare.fill(0xFF);
    }
}

#[derive(Debug, Clone)]
struct SimChip {
    blocks: Vec<SimBlock>,
}

/// In-memory implementation of [`NandDriver`]
#[derive(Debug)]
pub struct SimNand {
    geometry: NandGeometry,
    chips: Vec<SimChip>,
    faults: FaultPlan,
    counters: SimCounters,
}

impl SimNand {
    /// Create a fully-erased simulated device with the specified geometry
    pub fn new(geometry: NandGeometry) -> Self {
        let blocks = vec![SimBlock::new(&geometry); geometry.blocks_per_chip as usize];
        let chips = vec![SimChip { blocks }; geometry.chips as usize];

        Self {
            geometry,
            chips,
            faults: FaultPlan::default(),
            counters: SimCounters::default(),
        }
    }

    pub fn counters(&self) -> SimCounters {
        self.counters
    }

    /// Arm a one-shot program failure for a (chip, absolute page)
    pub fn arm_program_failure(&mut self, chip: u32, page: u32) {
        self.faults.fail_program.insert((chip, page));
    }

    /// Arm a one-shot read failure for a (chip, absolute page)
    pub fn arm_read_failure(&mut self, chip: u32, page: u32) {
        self.faults.fail_read.insert((chip, page));
    }

    /// Arm a one-shot erase failure for a (chip, block)
    pub fn arm_erase_failure(&mut self, chip: u32, block: u32) {
        self.faults.fail_erase.insert((chip, block));
    }

    /// Arm a one-shot silent corruption: the program succeeds but the stored
    /// data differs from what was written
    pub fn arm_program_corruption(&mut self, chip: u32, page: u32) {
        self.faults.corrupt_program.insert((chip, page));
    }

    /// Mark a block factory-bad (as if shipped that way)
    pub fn mark_factory_bad(&mut self, chip: u32, block: u32) {
        self.chips[chip as usize].blocks[block as usize].factory_bad = true;
    }

    /// Test probe: current contents of one page's data area
    pub fn page_data(&self, chip: u32, block: u32, offset: u32) -> &[u8] {
        let block = &self.chips[chip as usize].blocks[block as usize];
        let begin = offset as usize * self.geometry.page_size;
        &block.data[begin..begin + self.geometry.page_size]
    }

    fn block_mut(&mut self, chip: u32, block: u32) -> Result<&mut SimBlock> {
        self.chips
            .get_mut(chip as usize)
            .and_then(|c| c.blocks.get_mut(block as usize))
            .ok_or(FtlError::BadParameter)
    }

    fn split_page(&self, page: u32) -> Result<(u32, u32)> {
        let block = page / self.geometry.pages_per_block;
        if block >= self.geometry.blocks_per_chip {
            return Err(FtlError::BadParameter);
        }
        Ok((block, page % self.geometry.pages_per_block))
    }
}

impl NandDriver for SimNand {
    fn geometry(&self) -> NandGeometry {
        self.geometry
    }

    fn erase_block(&mut self, chip: u32, block: u32) -> Result<()> {
        self.counters.erases += 1;
        if self.faults.fail_erase.remove(&(chip, block)) {
            return Err(FtlError::NandEraseFailed);
        }
        self.block_mut(chip, block)?.erase();
        Ok(())
    }

    fn read_pages(
        &mut self,
        chip: u32,
        start_page: u32,
        mut data: Option<&mut [u8]>,
        tag: Option<&mut [u8]>,
        pages: u32,
        _check_ecc: bool,
    ) -> Result<()> {
        let geometry = self.geometry;
        if let Some(data) = data.as_ref() {
            if data.len() != geometry.page_size * pages as usize {
                return Err(FtlError::BadParameter);
            }
        }
        if let Some(tag) = tag.as_ref() {
            if tag.len() != geometry.tag_size {
                return Err(FtlError::BadParameter);
            }
        }

        let mut failed = false;
        for i in 0..pages {
            let page = start_page + i;
            let (block_num, offset) = self.split_page(page)?;
            self.counters.reads += 1;

            let block = &self.chips[chip as usize].blocks[block_num as usize];
            if let Some(data) = data.as_mut() {
                let begin = offset as usize * geometry.page_size;
                data[i as usize * geometry.page_size..][..geometry.page_size]
                    .copy_from_slice(&block.data[begin..begin + geometry.page_size]);
            }
            // A failing page still transfers its (uncorrected) data.
            if self.faults.fail_read.remove(&(chip, page)) {
                failed = true;
            }
        }

        if let Some(tag) = tag {
            let (block_num, offset) = self.split_page(start_page)?;
            let block = &self.chips[chip as usize].blocks[block_num as usize];
            let begin = offset as usize * geometry.spare_bytes_per_page + geometry.tag_offset;
            tag.copy_from_slice(&block.spare[begin..begin + geometry.tag_size]);
        }

        if failed {
            return Err(FtlError::NandReadFailed);
        }
        Ok(())
    }

    fn program_pages(
        &mut self,
        chip: u32,
        start_page: u32,
        data: Option<&[u8]>,
        tag: Option<&[u8]>,
        pages: u32,
    ) -> Result<()> {
        let geometry = self.geometry;
        if let Some(data) = data {
            if data.len() != geometry.page_size * pages as usize {
                return Err(FtlError::BadParameter);
            }
        }
        if let Some(tag) = tag {
            if tag.len() != geometry.tag_size {
                return Err(FtlError::BadParameter);
            }
        }

        for i in 0..pages {
            let page = start_page + i;
            let (block_num, offset) = self.split_page(page)?;
            self.counters.programs += 1;

            if self.faults.fail_program.remove(&(chip, page)) {
                return Err(FtlError::NandProgramFailed);
            }

            let corrupt = self.faults.corrupt_program.remove(&(chip, page));
            let block = self.block_mut(chip, block_num)?;
            if let Some(data) = data {
                let src = &data[i as usize * geometry.page_size..][..geometry.page_size];
                let begin = offset as usize * geometry.page_size;
                for (dst, &s) in block.data[begin..].iter_mut().zip(src) {
                    *dst &= s;
                }
                if corrupt {
                    block.data[begin] = !block.data[begin];
                }
            }
            if i == 0 {
                if let Some(tag) = tag {
                    let begin =
                        offset as usize * geometry.spare_bytes_per_page + geometry.tag_offset;
                    for (dst, &s) in block.spare[begin..].iter_mut().zip(tag) {
                        *dst &= s;
                    }
                }
            }
        }
        Ok(())
    }

    fn block_info(&mut self, chip: u32, block: u32) -> Result<BlockInfo> {
        let spare_size = self.geometry.spare_bytes_per_page;
        let block = self
            .chips
            .get(chip as usize)
            .and_then(|c| c.blocks.get(block as usize))
            .ok_or(FtlError::BadParameter)?;

        Ok(BlockInfo {
            factory_good: !block.factory_bad,
            spare: block.spare[..spare_size].to_vec(),
        })
    }

    fn read_spare(
        &mut self,
        chip: u32,
        page: u32,
        byte_offset: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let spare_size = self.geometry.spare_bytes_per_page;
        let (block_num, offset) = self.split_page(page)?;
        if byte_offset + buf.len() > spare_size {
            return Err(FtlError::BadParameter);
        }
        let block = &self.chips[chip as usize].blocks[block_num as usize];
        let begin = offset as usize * spare_size + byte_offset;
        buf.copy_from_slice(&block.spare[begin..begin + buf.len()]);
        Ok(())
    }

    fn write_spare(&mut self, chip: u32, page: u32, byte_offset: usize, buf: &[u8]) -> Result<()> {
        let spare_size = self.geometry.spare_bytes_per_page;
        let (block_num, offset) = self.split_page(page)?;
        if byte_offset + buf.len() > spare_size {
            return Err(FtlError::BadParameter);
        }
        let block = self.block_mut(chip, block_num)?;
        let begin = offset as usize * spare_size + byte_offset;
        for (dst, &s) in block.spare[begin..].iter_mut().zip(buf) {
            *dst &= s;
        }
        Ok(())
    }
}
