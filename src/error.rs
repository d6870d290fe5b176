//! The error taxonomy shared by every layer of the crate.

use thiserror::Error;

/// Failures reported by the FTL and by the NAND driver underneath it.
///
/// Device-reported single-block faults (`NandReadFailed`, `NandProgramFailed`,
/// `NandEraseFailed`) are usually recovered internally via block replacement;
/// the remaining variants surface to the caller unmodified.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum FtlError {
    /// Caller passed an argument outside the region's bounds or contract.
    #[error("bad parameter")]
    BadParameter,

    /// An internal value check failed (programming error, not a device fault).
    #[error("bad value")]
    BadValue,

    /// Allocation of the per-bank mapping tables failed at open.
    #[error("insufficient memory for mapping tables")]
    InsufficientMemory,

    /// The device reported an uncorrectable read error.
    #[error("NAND read failed")]
    NandReadFailed,

    /// A write was attempted against an unmapped or out-of-table logical block.
    #[error("NAND write failed")]
    NandWriteFailed,

    /// The device reported a program failure, or sequential-write order was
    /// violated.
    #[error("NAND program failed")]
    NandProgramFailed,

    /// The device reported an erase failure.
    #[error("NAND erase failed")]
    NandEraseFailed,

    /// A block could neither be erased nor marked bad.
    #[error("NAND block driver erase failure")]
    NandBlockDriverEraseFailure,

    /// The spare pool (or the remaining physical range) is exhausted; a failed
    /// block could not be replaced.
    #[error("no free NAND block for replacement")]
    NandNoFreeBlock,

    /// Spare-pool bookkeeping disagrees with the pool contents.
    #[error("spare pool count mismatch")]
    CountMismatch,

    /// Read-back verification after a write found differing data.
    #[error("write verify mismatch")]
    WriteVerifyFailed,

    /// The bank translator could not resolve a bank/block pair.
    #[error("bank translation not initialized for this address")]
    NotInitialized,

    /// The management opcode is not implemented by this FTL policy.
    #[error("operation not supported")]
    NotSupported,
}

pub type Result<T> = std::result::Result<T, FtlError>;
