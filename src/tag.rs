//! The on-flash block tag: the one structure this layer persists.
//!
//! The tag lives in the tag area of a block's first page and names the
//! logical block that owns the physical block. It is written whenever page 0
//! is programmed (or by an explicit tag-only update when a block is skipped),
//! and is the sole input to mapping-table reconstruction after power loss.

use deku::prelude::*;

use crate::error::FtlError;

/// Sentinel for an unmapped PBA, an unused spare-pool slot, and the logical
/// number read from a never-written tag area (all-ones erased state).
pub const UNMAPPED: u32 = 0xFFFF_FFFF;

/// Encoded size of [`BlockTag`]; the device tag area must be at least this big.
pub const TAG_BYTES: usize = 8;

/// Tag record persisted at page offset 0 of every owned block
#[derive(Debug, Copy, Clone, Eq, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct BlockTag {
    /// Absolute logical block number owning this physical block
    pub logical_block: u32,
    /// Reserved; stays in the erased state
    reserved: u32,
}

impl BlockTag {
    pub fn new(logical_block: u32) -> Self {
        Self {
            logical_block,
            reserved: UNMAPPED,
        }
    }

    /// Has this tag never been written? (erased flash reads all-ones)
    pub fn is_unwritten(&self) -> bool {
        self.logical_block == UNMAPPED
    }

    /// Parse a tag from the raw tag-area bytes
    pub fn decode(tag_area: &[u8]) -> Option<Self> {
        let (_, tag) = Self::from_bytes((tag_area, 0)).ok()?;
        Some(tag)
    }

    /// Write this tag into the first [`TAG_BYTES`] of a tag-area buffer
    pub fn encode(self, out_bytes: &mut [u8]) -> crate::error::Result<()> {
        let bytes = self.to_bytes().map_err(|_| FtlError::BadValue)?;
        let out_bytes = out_bytes
            .get_mut(..bytes.len())
            .ok_or(FtlError::BadValue)?;
        out_bytes.copy_from_slice(&bytes);
        Ok(())
    }
}
