//! The FTL-Lite region: a sequential-write logical block device over raw NAND.
//!
//! A region covers a contiguous range of physical blocks and exposes a
//! contiguous range of logical blocks backed by them. The logical→physical
//! mapping lives only in RAM and is rebuilt at every open by scanning the
//! per-block tags ([`crate::tag::BlockTag`]); bad blocks discovered at
//! runtime are replaced transparently from a spare pool and marked in the
//! spare area so they are never reused.
//!
//! Access is sequential within a session: the write pointer only moves
//! forward, and reads may not overtake it. The first write of a session
//! erases every mapped block (regions are rewritten whole, never patched).

mod io;
mod replace;
mod table;
#[cfg(test)]
mod tests;

use log::warn;

use crate::bank::BankTranslator;
use crate::error::{FtlError, Result};
use crate::nand::{NandDriver, NandGeometry};
use crate::tag::TAG_BYTES;

pub(crate) use table::{BuildState, MappingTable};

/// Sector count meaning "through the end of the region" in erase requests
pub const ALL_SECTORS: u32 = u32::MAX;

/// Immutable description of a region, supplied at open
#[derive(Debug, Copy, Clone)]
pub struct RegionProperties {
    /// First logical block number owned by the region
    pub start_logical_block: u32,
    /// Number of logical blocks exposed
    pub total_logical_blocks: u32,
    /// First physical block (bank-relative) backing the region
    pub start_physical_block: u32,
    /// Number of physical blocks backing the region, per bank
    pub total_physical_blocks: u32,
    /// Interleave banks the region stripes across; power of two
    pub interleave_bank_count: u32,
    /// Tolerate fewer good blocks than the logical requirement
    pub is_unbounded: bool,
    /// Suppress read-triggered remapping (consumers that rely on stable
    /// physical ordering)
    pub sequential_read_only: bool,
}

/// Geometry of the region as seen by callers
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RegionInfo {
    pub bytes_per_sector: usize,
    pub sectors_per_block: u32,
    pub total_blocks: u32,
}

/// Factory/runtime health of one physical block
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockStatus {
    pub factory_good: bool,
    pub runtime_good: bool,
}

impl BlockStatus {
    pub fn is_good(&self) -> bool {
        self.factory_good && self.runtime_good
    }
}

/// Management operations dispatched through [`FtlLite::ioctl`].
///
/// These mirror the block-device opcodes the enclosing dispatcher issues;
/// the lite policy implements the subset below and answers anything else
/// with [`FtlError::NotSupported`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IoctlRequest {
    /// Accepted no-op under this policy
    MapLogicalToPhysical,
    /// Erase a range of logical sectors (`ALL_SECTORS` → whole region)
    EraseLogicalSectors { start_sector: u32, sector_count: u32 },
    /// Sweep every physical block (spares included) and rebuild the mapping
    ForceBlockRemap,
    /// Toggle read-back verification of every payload write
    WriteVerifyMode { enable: bool },
    /// Report factory/runtime health of one physical block
    IsGoodBlock { chip: u32, block: u32 },
    /// Erase the whole partition; the stated bounds must match the region's
    ErasePartition { start_sector: u32, sector_count: u32 },
    /// Not implemented by the lite policy
    FormatDevice,
    /// Not implemented by the lite policy
    QueryPhysicalBlockStatus { block: u32 },
}

/// Results carried back from [`FtlLite::ioctl`]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IoctlResponse {
    None,
    GoodBlock(BlockStatus),
}

/// An open FTL-Lite region. Exclusively owns its driver and mapping; the
/// enclosing block-device manager serializes access.
#[derive(Debug)]
pub struct FtlLite<N: NandDriver> {
    pub(crate) nand: N,
    pub(crate) btl: BankTranslator,
    pub(crate) geometry: NandGeometry,
    pub(crate) props: RegionProperties,
    pub(crate) table: MappingTable,
    pub(crate) total_sectors: u32,
    pub(crate) pages_per_block_log2: u32,
    pub(crate) bank_count_log2: u32,
    pub(crate) write_pointer: u32,
    pub(crate) read_pointer: u32,
    pub(crate) read_verify: bool,
}

impl<N: NandDriver> FtlLite<N> {
    /// Open a region: validate the requested geometry, allocate the per-bank
    /// mapping tables, and build a partial mapping so open stays fast.
    pub fn open(nand: N, btl: BankTranslator, props: RegionProperties) -> Result<Self> {
        let geometry = nand.geometry();

        if props.total_physical_blocks < props.total_logical_blocks
            || props.total_logical_blocks == 0
            || props.interleave_bank_count == 0
            || !props.interleave_bank_count.is_power_of_two()
            || props.interleave_bank_count > btl.interleave()
        {
            return Err(FtlError::BadParameter);
        }
        if !geometry.pages_per_block.is_power_of_two()
            || geometry.page_size == 0
            || geometry.tag_size < TAG_BYTES
            || geometry.tag_offset + geometry.tag_size > geometry.spare_bytes_per_page
        {
            return Err(FtlError::BadParameter);
        }

        let total_sectors = props
            .total_logical_blocks
            .checked_mul(geometry.pages_per_block)
            .and_then(|s| s.checked_mul(props.interleave_bank_count))
            .ok_or(FtlError::BadParameter)?;

        let table = MappingTable::allocate(
            props.interleave_bank_count as usize,
            props.total_logical_blocks as usize,
            (props.total_physical_blocks - props.total_logical_blocks) as usize,
        )?;

        let mut region = Self {
            nand,
            btl,
            geometry,
            props,
            table,
            total_sectors,
            pages_per_block_log2: geometry.pages_per_block.trailing_zeros(),
            bank_count_log2: props.interleave_bank_count.trailing_zeros(),
            write_pointer: 0,
            read_pointer: 0,
            read_verify: false,
        };

        region.build_table(true)?;
        Ok(region)
    }

    /// Close the region, handing the driver back. The mapping is discarded;
    /// everything needed for the next open is already on flash.
    pub fn close(self) -> N {
        self.nand
    }

    pub fn region_info(&self) -> RegionInfo {
        RegionInfo {
            bytes_per_sector: self.geometry.page_size,
            sectors_per_block: self.geometry.pages_per_block * self.props.interleave_bank_count,
            total_blocks: self.props.total_logical_blocks,
        }
    }

    /// Sector the next sequential write should target
    pub fn write_pointer(&self) -> u32 {
        self.write_pointer
    }

    /// One past the last sector handed back to the caller
    pub fn read_pointer(&self) -> u32 {
        self.read_pointer
    }

    /// Nothing to flush: every write is committed before returning
    pub fn flush(&mut self) {}

    /// Dispatch a management operation
    pub fn ioctl(&mut self, request: IoctlRequest) -> Result<IoctlResponse> {
        match request {
            IoctlRequest::MapLogicalToPhysical => Ok(IoctlResponse::None),

            IoctlRequest::EraseLogicalSectors {
                start_sector,
                sector_count,
            } => {
                let spb = self.sectors_per_superblock();
                let start_block = start_sector / spb;
                let end_block = if sector_count == ALL_SECTORS {
                    self.props.total_logical_blocks
                } else {
                    start_block + sector_count / spb
                };
                self.erase_logical_blocks(start_block, end_block)
                    .map_err(|_| FtlError::NandEraseFailed)?;
                Ok(IoctlResponse::None)
            }

            IoctlRequest::ForceBlockRemap => {
                self.erase_all_blocks();
                self.build_table(false)?;
                Ok(IoctlResponse::None)
            }

            IoctlRequest::WriteVerifyMode { enable } => {
                self.read_verify = enable;
                Ok(IoctlResponse::None)
            }

            IoctlRequest::IsGoodBlock { chip, block } => {
                Ok(IoctlResponse::GoodBlock(self.block_status(chip, block)?))
            }

            IoctlRequest::ErasePartition {
                start_sector,
                sector_count,
            } => {
                let spb = self.sectors_per_superblock();
                let start_block = start_sector / spb;
                if start_block != self.props.start_logical_block {
                    warn!(
                        "erase partition: start {} does not match region start {}",
                        start_block, self.props.start_logical_block
                    );
                    return Err(FtlError::NandEraseFailed);
                }
                let block_count = sector_count / spb;
                if block_count != self.props.total_logical_blocks {
                    warn!(
                        "erase partition: count {} does not match region size {}",
                        block_count, self.props.total_logical_blocks
                    );
                    return Err(FtlError::NandEraseFailed);
                }
                self.erase_logical_blocks(0, block_count)
                    .map_err(|_| FtlError::NandEraseFailed)?;
                Ok(IoctlResponse::None)
            }

            IoctlRequest::FormatDevice | IoctlRequest::QueryPhysicalBlockStatus { .. } => {
                Err(FtlError::NotSupported)
            }
        }
    }

    /// Factory and runtime health of a resolved (chip, block) pair
    pub fn block_status(&mut self, chip: u32, block: u32) -> Result<BlockStatus> {
        let info = self.nand.block_info(chip, block)?;
        let status = BlockStatus {
            factory_good: info.factory_good,
            runtime_good: info.runtime_good(),
        };
        if !status.factory_good {
            warn!("factory bad block: chip {chip} block {block}");
        }
        if !status.runtime_good {
            warn!("runtime bad block: chip {chip} block {block}");
        }
        Ok(status)
    }

    pub(crate) fn sectors_per_superblock(&self) -> u32 {
        self.geometry.pages_per_block << self.bank_count_log2
    }

    /// Break a region-relative sector number into its bank, logical block
    /// index, and page offset within the block.
    pub(crate) fn locate(&self, sector: u32) -> SectorAddr {
        let within_bank = sector / self.props.interleave_bank_count;
        SectorAddr {
            bank: sector % self.props.interleave_bank_count,
            index: within_bank >> self.pages_per_block_log2,
            offset: within_bank & (self.geometry.pages_per_block - 1),
        }
    }

    #[cfg(test)]
    pub(crate) fn nand(&self) -> &N {
        &self.nand
    }
}

/// Resolved position of one sector within the region
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct SectorAddr {
    pub bank: u32,
    pub index: u32,
    pub offset: u32,
}
