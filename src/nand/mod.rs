//! Abstractions for the raw NAND device driver the FTL sits on.
//!
//! The FTL never touches hardware directly; everything goes through the
//! [`NandDriver`] trait. Pages are addressed per chip by absolute page number
//! (`block * pages_per_block + offset`). Each page carries a spare area; a
//! fixed `tag_size`-byte window at `tag_offset` inside it is the tag area the
//! FTL uses to persist block ownership.

use crate::error::{FtlError, Result};

pub mod sim;

/// Byte offset of the runtime bad-block marker within a page's spare area.
/// `0xFF` means good; anything else means the block failed in the field.
pub const RUNTIME_BAD_BYTE_OFFSET: usize = 1;

/// Spare-byte value of a runtime-good block.
pub const RUNTIME_GOOD: u8 = 0xFF;

/// Convenience methods for `[u8]`s that represent page contents
pub trait PageUtil {
    /// Does this page contain the all-1s (erased) bit pattern?
    fn is_erased(&self) -> bool;
}

impl PageUtil for [u8] {
    fn is_erased(&self) -> bool {
        self.iter().all(|&x| x == 0xFF)
    }
}

/// A pub-fields struct describing the data layout of a NAND flash device
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NandGeometry {
    /// Data bytes per page (one sector == one page at this layer)
    pub page_size: usize,
    /// Pages per erase block; must be a power of two
    pub pages_per_block: u32,
    /// Spare (out-of-band) bytes per page
    pub spare_bytes_per_page: usize,
    /// Byte offset of the tag area within the spare area
    pub tag_offset: usize,
    /// Size of the tag area in bytes
    pub tag_size: usize,
    /// Number of chips behind the driver
    pub chips: u32,
    /// Physical erase blocks per chip
    pub blocks_per_chip: u32,
}

impl NandGeometry {
    /// Bytes in one block's data area
    pub fn block_bytes(&self) -> usize {
        self.page_size * self.pages_per_block as usize
    }

    /// Absolute page number of the first page of `block`
    pub fn first_page(&self, block: u32) -> u32 {
        block * self.pages_per_block
    }
}

/// Factory flag and spare-area snapshot for one block, as returned by
/// [`NandDriver::block_info`]. The spare snapshot is taken from the block's
/// first page and includes the tag area.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub factory_good: bool,
    pub spare: Vec<u8>,
}

impl BlockInfo {
    /// Is the runtime bad-block marker still in its erased (good) state?
    pub fn runtime_good(&self) -> bool {
        self.spare
            .get(RUNTIME_BAD_BYTE_OFFSET)
            .is_some_and(|&b| b == RUNTIME_GOOD)
    }

    /// The tag area bytes, given the device geometry
    pub fn tag_area(&self, geometry: &NandGeometry) -> Result<&[u8]> {
        self.spare
            .get(geometry.tag_offset..geometry.tag_offset + geometry.tag_size)
            .ok_or(FtlError::BadValue)
    }
}

/// The raw NAND primitives consumed by the FTL.
///
/// Data buffers must be a whole number of pages. Tag buffers are exactly
/// `tag_size` bytes and apply to the first page of the transfer only (the FTL
/// tags page 0 of a block and nothing else). Either buffer may be omitted:
/// a tag-only program updates block metadata without touching data.
pub trait NandDriver {
    /// Layout of the device(s) behind this driver
    fn geometry(&self) -> NandGeometry;

    /// Erase one block
    fn erase_block(&mut self, chip: u32, block: u32) -> Result<()>;

    /// Read `pages` pages starting at `start_page`
    fn read_pages(
        &mut self,
        chip: u32,
        start_page: u32,
        data: Option<&mut [u8]>,
        tag: Option<&mut [u8]>,
        pages: u32,
        check_ecc: bool,
    ) -> Result<()>;

    /// Program `pages` pages starting at `start_page`
    fn program_pages(
        &mut self,
        chip: u32,
        start_page: u32,
        data: Option<&[u8]>,
        tag: Option<&[u8]>,
        pages: u32,
    ) -> Result<()>;

    /// Factory bad-block flag plus a spare-area snapshot of the block's
    /// first page
    fn block_info(&mut self, chip: u32, block: u32) -> Result<BlockInfo>;

    /// Read raw spare-area bytes of one page
    fn read_spare(
        &mut self,
        chip: u32,
        page: u32,
        byte_offset: usize,
        buf: &mut [u8],
    ) -> Result<()>;

    /// Program raw spare-area bytes of one page
    fn write_spare(&mut self, chip: u32, page: u32, byte_offset: usize, buf: &[u8]) -> Result<()>;
}
