//! ftl-lite: a lightweight flash translation layer for raw NAND.
//!
//! This crate maps a contiguous logical block space onto a range of physical
//! NAND blocks, hiding factory and runtime bad blocks from the caller. It is
//! "lite" because it targets sequentially written regions (boot images,
//! firmware partitions): there is no wear leveling and no journaling. All
//! mapping state lives in RAM and is reconstructed at open time from per-block
//! tags stored in the spare area, so the layer survives power loss without a
//! commit step.
//!
//! The entry point is [`FtlLite::open`], which takes any [`NandDriver`]
//! implementation; [`SimNand`] provides an in-memory device for tests.

pub mod bank;
pub mod error;
pub mod ftl;
pub mod nand;
pub mod tag;

pub use bank::BankTranslator;
pub use error::{FtlError, Result};
pub use ftl::{
    BlockStatus, FtlLite, IoctlRequest, IoctlResponse, RegionInfo, RegionProperties, ALL_SECTORS,
};
pub use nand::sim::SimNand;
pub use nand::{BlockInfo, NandDriver, NandGeometry};
