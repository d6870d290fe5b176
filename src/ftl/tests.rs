//! End-to-end tests of the FTL over the simulated NAND: round trips,
//! pointer discipline, power-loss rebuilds, and bad-block replacement under
//! injected faults.

use std::collections::HashSet;

use crate::bank::BankTranslator;
use crate::error::FtlError;
use crate::ftl::{
    BuildState, FtlLite, IoctlRequest, IoctlResponse, RegionProperties, ALL_SECTORS,
};
use crate::nand::sim::SimNand;
use crate::nand::{NandDriver, NandGeometry, PageUtil};
use crate::tag::{BlockTag, UNMAPPED};

const GEOMETRY: NandGeometry = NandGeometry {
    page_size: 32,
    pages_per_block: 8,
    spare_bytes_per_page: 16,
    tag_offset: 4,
    tag_size: 8,
    chips: 2,
    blocks_per_chip: 16,
};

fn props(logical: u32, physical: u32, banks: u32) -> RegionProperties {
    RegionProperties {
        start_logical_block: 0,
        total_logical_blocks: logical,
        start_physical_block: 0,
        total_physical_blocks: physical,
        interleave_bank_count: banks,
        is_unbounded: false,
        sequential_read_only: false,
    }
}

fn open_region(nand: SimNand, logical: u32, physical: u32, banks: u32) -> FtlLite<SimNand> {
    let btl = BankTranslator::new(GEOMETRY.chips, GEOMETRY.blocks_per_chip, banks).unwrap();
    FtlLite::open(nand, btl, props(logical, physical, banks)).unwrap()
}

fn pattern(sectors: u32, seed: u8) -> Vec<u8> {
    (0..sectors as usize * GEOMETRY.page_size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// No physical block may back two logical indices (or an index and a pool
/// slot), and the live spare entries must agree with the recorded count.
fn check_mapping_invariants(ftl: &FtlLite<SimNand>) {
    for bank in &ftl.table.banks {
        let mut seen = HashSet::new();
        for &block in bank.physical.iter().chain(bank.spares.iter()) {
            if block != UNMAPPED {
                assert!(seen.insert(block), "block {block} referenced twice");
            }
        }
        for (slot, &entry) in bank.spares.iter().enumerate() {
            assert_eq!(entry == UNMAPPED, slot >= bank.spare_count);
        }
    }
}

#[test]
fn whole_region_round_trip() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    let data = pattern(32, 1);
    ftl.write_sector(0, &data, 32)?;

    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 32)?;
    assert_eq!(out, data);

    // Unaligned read in the middle
    let mut out = vec![0u8; 5 * GEOMETRY.page_size];
    ftl.read_sector(6, &mut out, 5)?;
    assert_eq!(out, data[6 * GEOMETRY.page_size..][..out.len()]);

    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn region_info_reports_caller_geometry() {
    let ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 2);
    let info = ftl.region_info();
    assert_eq!(info.bytes_per_sector, GEOMETRY.page_size);
    assert_eq!(info.sectors_per_block, 16);
    assert_eq!(info.total_blocks, 4);
}

#[test]
fn open_rejects_bad_properties() {
    let btl = BankTranslator::new(2, 16, 1).unwrap();
    // Fewer physical blocks than logical
    assert!(matches!(
        FtlLite::open(SimNand::new(GEOMETRY), btl, props(6, 4, 1)),
        Err(FtlError::BadParameter)
    ));
    // More banks than the translator provides
    assert!(matches!(
        FtlLite::open(SimNand::new(GEOMETRY), btl, props(4, 6, 2)),
        Err(FtlError::BadParameter)
    ));
}

#[test]
fn write_pointer_rejects_rewind() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    ftl.write_sector(0, &pattern(4, 2), 4)?;
    assert_eq!(
        ftl.write_sector(1, &pattern(1, 3), 1),
        Err(FtlError::NandProgramFailed)
    );
    // Appending at the pointer is fine
    ftl.write_sector(4, &pattern(1, 3), 1)?;
    Ok(())
}

#[test]
fn read_pointer_rejects_overrun() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    ftl.write_sector(0, &pattern(3, 4), 3)?;
    let mut out = vec![0u8; GEOMETRY.page_size];
    assert_eq!(
        ftl.read_sector(4, &mut out, 1),
        Err(FtlError::NandReadFailed)
    );
    assert_eq!(ftl.write_pointer(), 3);

    ftl.read_sector(1, &mut out, 1)?;
    assert_eq!(ftl.read_pointer(), 2);
    Ok(())
}

#[test]
fn rejects_out_of_range_and_empty_transfers() {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    let mut buf = vec![0u8; GEOMETRY.page_size];
    assert_eq!(ftl.write_sector(0, &buf, 0), Err(FtlError::BadParameter));
    assert_eq!(ftl.write_sector(32, &buf, 1), Err(FtlError::BadParameter));
    // Buffer length must match the sector count
    assert_eq!(ftl.write_sector(0, &buf, 2), Err(FtlError::BadParameter));
    assert_eq!(
        ftl.read_sector(31, &mut buf, 2),
        Err(FtlError::BadParameter)
    );
}

#[test]
fn first_write_sweeps_then_reopen_erases_only_mapped() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    assert_eq!(ftl.nand().counters().erases, 0);

    let data = pattern(32, 5);
    ftl.write_sector(0, &data, 32)?;
    // A blank region has no mapping to erase, so the first write sweeps
    // every usable physical block
    let after_sweep = ftl.nand().counters().erases;
    assert_eq!(after_sweep, 6);

    let nand = ftl.close();
    let mut ftl = open_region(nand, 4, 6, 1);
    ftl.write_sector(0, &data, 32)?;
    // This time the tags mapped every block, so only those get erased
    assert_eq!(ftl.nand().counters().erases, after_sweep + 4);
    Ok(())
}

#[test]
fn mapping_survives_reopen() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    let data = pattern(32, 6);
    ftl.write_sector(0, &data, 32)?;

    let mut ftl = open_region(ftl.close(), 4, 6, 1);
    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 32)?;
    assert_eq!(out, data);
    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn skipped_blocks_get_tags_and_survive_reopen() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    let head = pattern(1, 7);
    let tail = pattern(1, 8);
    ftl.write_sector(0, &head, 1)?;
    // Jump over blocks 1 and 2 entirely
    ftl.write_sector(24, &tail, 1)?;

    let mut ftl = open_region(ftl.close(), 4, 6, 1);
    let mut out = vec![0u8; GEOMETRY.page_size];
    ftl.read_sector(0, &mut out, 1)?;
    assert_eq!(out, head);
    ftl.read_sector(24, &mut out, 1)?;
    assert_eq!(out, tail);
    // The skipped block is owned (tagged) but blank
    ftl.read_sector(8, &mut out, 1)?;
    assert!(out.is_erased());
    Ok(())
}

#[test]
fn program_failure_is_transparent() -> anyhow::Result<()> {
    let mut nand = SimNand::new(GEOMETRY);
    // Fails inside logical block 1 (physical block 1 after the fresh scan)
    nand.arm_program_failure(0, 11);
    let mut ftl = open_region(nand, 4, 6, 1);

    let data = pattern(16, 9);
    ftl.write_sector(0, &data, 16)?;

    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 16)?;
    assert_eq!(out, data);

    // The failed block is retired and its slot rethreaded from the pool
    assert_eq!(ftl.table.banks[0].physical, vec![0, 2, 3, 4]);
    assert_eq!(ftl.table.banks[0].spare_count, 1);
    assert!(!ftl.block_status(0, 1)?.runtime_good);
    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn mid_block_write_failure_preserves_earlier_pages() -> anyhow::Result<()> {
    // Full-size geometry: one block of 64 pages of 2048 bytes
    const LARGE: NandGeometry = NandGeometry {
        page_size: 2048,
        pages_per_block: 64,
        spare_bytes_per_page: 64,
        tag_offset: 4,
        tag_size: 8,
        chips: 1,
        blocks_per_chip: 8,
    };
    let mut nand = SimNand::new(LARGE);
    nand.arm_program_failure(0, 10);
    let btl = BankTranslator::new(LARGE.chips, LARGE.blocks_per_chip, 1).unwrap();
    let mut ftl = FtlLite::open(nand, btl, props(4, 6, 1))?;

    // Write logical block 0 in full; the device dies partway through
    let data: Vec<u8> = (0..64 * LARGE.page_size)
        .map(|i| (i % 251) as u8)
        .collect();
    ftl.write_sector(0, &data, 64)?;

    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 64)?;
    assert!(out == data, "read-back differs from the written buffer");

    // The data lives on the replacement; the failed block is retired
    assert_eq!(ftl.table.banks[0].physical[0], 1);
    assert!(!ftl.block_status(0, 0)?.runtime_good);
    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn pool_accounting_survives_repeated_replacements() -> anyhow::Result<()> {
    let mut nand = SimNand::new(GEOMETRY);
    nand.arm_program_failure(0, 11);
    let mut ftl = open_region(nand, 4, 8, 1);

    let data = pattern(32, 21);
    ftl.write_sector(0, &data, 32)?;
    check_mapping_invariants(&ftl);
    assert_eq!(ftl.table.banks[0].spare_count, 3);

    ftl.nand.arm_read_failure(0, 2);
    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 32)?;
    assert_eq!(out, data);
    check_mapping_invariants(&ftl);
    assert_eq!(ftl.table.banks[0].spare_count, 2);

    let mut again = vec![0u8; data.len()];
    ftl.read_sector(0, &mut again, 32)?;
    assert_eq!(again, data);
    Ok(())
}

#[test]
fn read_failure_moves_block_to_spare() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    let data = pattern(32, 10);
    ftl.write_sector(0, &data, 32)?;

    // Physical block 2 backs logical block 2; fail one of its pages
    ftl.nand.arm_read_failure(0, 19);
    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 32)?;
    // The device still transferred the page, so the caller sees good data
    assert_eq!(out, data);

    // Contents moved to the first spare; the source is retired
    assert_eq!(ftl.table.banks[0].physical, vec![0, 1, 4, 3]);
    assert_eq!(ftl.table.banks[0].spare_count, 1);
    assert!(!ftl.block_status(0, 2)?.runtime_good);

    let mut again = vec![0u8; data.len()];
    ftl.read_sector(0, &mut again, 32)?;
    assert_eq!(again, data);
    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn sequential_read_only_suppresses_remap() -> anyhow::Result<()> {
    let btl = BankTranslator::new(GEOMETRY.chips, GEOMETRY.blocks_per_chip, 1).unwrap();
    let mut props = props(4, 6, 1);
    props.sequential_read_only = true;
    let mut ftl = FtlLite::open(SimNand::new(GEOMETRY), btl, props)?;

    let data = pattern(32, 11);
    ftl.write_sector(0, &data, 32)?;

    ftl.nand.arm_read_failure(0, 19);
    let mut out = vec![0u8; data.len()];
    assert_eq!(
        ftl.read_sector(0, &mut out, 32),
        Err(FtlError::NandReadFailed)
    );
    // Nothing was replaced or retired
    assert_eq!(ftl.table.banks[0].physical, vec![0, 1, 2, 3]);
    assert!(ftl.block_status(0, 2)?.is_good());
    Ok(())
}

#[test]
fn read_verify_catches_silent_corruption() -> anyhow::Result<()> {
    let mut nand = SimNand::new(GEOMETRY);
    nand.arm_program_corruption(0, 11);
    let mut ftl = open_region(nand, 4, 6, 1);
    ftl.ioctl(IoctlRequest::WriteVerifyMode { enable: true })?;

    let data = pattern(16, 12);
    ftl.write_sector(0, &data, 16)?;

    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 16)?;
    assert_eq!(out, data);
    // The silently corrupted block was caught and retired
    assert!(!ftl.block_status(0, 1)?.runtime_good);
    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn replacement_fails_cleanly_without_spares() -> anyhow::Result<()> {
    let mut nand = SimNand::new(GEOMETRY);
    nand.arm_program_failure(0, 3);
    let mut ftl = open_region(nand, 2, 2, 1);

    // No spare pool: the original device error surfaces
    assert_eq!(
        ftl.write_sector(0, &pattern(16, 13), 16),
        Err(FtlError::NandProgramFailed)
    );
    Ok(())
}

#[test]
fn read_exhaustion_returns_device_error() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 2, 2, 1);
    let data = pattern(16, 14);
    ftl.write_sector(0, &data, 16)?;

    ftl.nand.arm_read_failure(0, 3);
    let mut out = vec![0u8; data.len()];
    assert_eq!(
        ftl.read_sector(0, &mut out, 16),
        Err(FtlError::NandReadFailed)
    );
    Ok(())
}

#[test]
fn factory_bad_blocks_are_never_mapped() -> anyhow::Result<()> {
    let mut nand = SimNand::new(GEOMETRY);
    nand.mark_factory_bad(0, 1);
    let mut ftl = open_region(nand, 4, 6, 1);

    let data = pattern(32, 15);
    ftl.write_sector(0, &data, 32)?;
    assert_eq!(ftl.table.banks[0].physical, vec![0, 2, 3, 4]);

    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 32)?;
    assert_eq!(out, data);
    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn interleaved_region_stripes_across_chips() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 2);
    let data = pattern(64, 16);
    ftl.write_sector(0, &data, 64)?;

    // Even sectors land on chip 0, odd sectors on chip 1
    assert_eq!(ftl.nand().page_data(0, 0, 0), &data[..GEOMETRY.page_size]);
    assert_eq!(
        ftl.nand().page_data(1, 0, 0),
        &data[GEOMETRY.page_size..2 * GEOMETRY.page_size]
    );

    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 64)?;
    assert_eq!(out, data);
    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn interleaved_mapping_survives_reopen() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 2);
    let data = pattern(10, 17);
    ftl.write_sector(0, &data, 10)?;

    let mut ftl = open_region(ftl.close(), 4, 6, 2);
    let mut out = vec![0u8; data.len()];
    ftl.read_sector(0, &mut out, 10)?;
    assert_eq!(out, data);
    Ok(())
}

#[test]
fn erase_logical_sectors_clears_one_block() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    let data = pattern(32, 18);
    ftl.write_sector(0, &data, 32)?;

    ftl.ioctl(IoctlRequest::EraseLogicalSectors {
        start_sector: 8,
        sector_count: 8,
    })?;

    let mut out = vec![0u8; 8 * GEOMETRY.page_size];
    ftl.read_sector(8, &mut out, 8)?;
    assert!(out.is_erased());
    // Neighbors untouched
    ftl.read_sector(0, &mut out, 8)?;
    assert_eq!(out, data[..out.len()]);
    Ok(())
}

#[test]
fn erase_all_sectors_and_force_remap() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    ftl.write_sector(0, &pattern(32, 19), 32)?;

    ftl.ioctl(IoctlRequest::EraseLogicalSectors {
        start_sector: 0,
        sector_count: ALL_SECTORS,
    })?;
    let mut out = vec![0u8; 8 * GEOMETRY.page_size];
    ftl.read_sector(0, &mut out, 8)?;
    assert!(out.is_erased());

    ftl.ioctl(IoctlRequest::ForceBlockRemap)?;
    assert_eq!(ftl.table.state, BuildState::FullyBuilt);
    check_mapping_invariants(&ftl);
    Ok(())
}

#[test]
fn erase_partition_requires_exact_bounds() -> anyhow::Result<()> {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    ftl.write_sector(0, &pattern(32, 20), 32)?;

    assert_eq!(
        ftl.ioctl(IoctlRequest::ErasePartition {
            start_sector: 8,
            sector_count: 24,
        }),
        Err(FtlError::NandEraseFailed)
    );
    assert_eq!(
        ftl.ioctl(IoctlRequest::ErasePartition {
            start_sector: 0,
            sector_count: 24,
        }),
        Err(FtlError::NandEraseFailed)
    );
    ftl.ioctl(IoctlRequest::ErasePartition {
        start_sector: 0,
        sector_count: 32,
    })?;
    Ok(())
}

#[test]
fn unimplemented_ioctls_are_refused() {
    let mut ftl = open_region(SimNand::new(GEOMETRY), 4, 6, 1);
    assert_eq!(
        ftl.ioctl(IoctlRequest::FormatDevice),
        Err(FtlError::NotSupported)
    );
    assert_eq!(
        ftl.ioctl(IoctlRequest::QueryPhysicalBlockStatus { block: 0 }),
        Err(FtlError::NotSupported)
    );
    assert_eq!(
        ftl.ioctl(IoctlRequest::MapLogicalToPhysical),
        Ok(IoctlResponse::None)
    );
}

#[test]
fn is_good_block_reports_factory_state() -> anyhow::Result<()> {
    let mut nand = SimNand::new(GEOMETRY);
    nand.mark_factory_bad(0, 9);
    let mut ftl = open_region(nand, 4, 6, 1);

    match ftl.ioctl(IoctlRequest::IsGoodBlock { chip: 0, block: 9 })? {
        IoctlResponse::GoodBlock(status) => {
            assert!(!status.factory_good);
            assert!(status.runtime_good);
            assert!(!status.is_good());
        }
        other => panic!("unexpected response: {other:?}"),
    }
    Ok(())
}

#[test]
fn stale_tags_from_other_layouts_are_erased() -> anyhow::Result<()> {
    let mut nand = SimNand::new(GEOMETRY);
    // Block 0 carries a tag for a logical block below this region's range
    let mut tag = [0xFFu8; 8];
    BlockTag::new(0).encode(&mut tag)?;
    nand.program_pages(0, 0, None, Some(&tag), 1)?;

    let btl = BankTranslator::new(GEOMETRY.chips, GEOMETRY.blocks_per_chip, 1).unwrap();
    let mut props = props(4, 6, 1);
    props.start_logical_block = 2;
    let ftl = FtlLite::open(nand, btl, props)?;

    // The scan erased the block and treated it as blank
    assert_eq!(ftl.nand().counters().erases, 1);
    assert!(ftl.table.banks[0].physical.iter().all(|&b| b == UNMAPPED));
    Ok(())
}

#[test]
fn duplicate_tags_leave_only_one_mapping() -> anyhow::Result<()> {
    let mut nand = SimNand::new(GEOMETRY);
    let mut tag = [0xFFu8; 8];
    BlockTag::new(0).encode(&mut tag)?;
    // Two blocks claim logical block 0 (interrupted replacement)
    nand.program_pages(0, 0, None, Some(&tag), 1)?;
    nand.program_pages(0, 8, None, Some(&tag), 1)?;

    let mut ftl = open_region(nand, 2, 4, 1);
    assert_eq!(ftl.table.banks[0].physical, vec![0, UNMAPPED]);
    // The losing block was erased and tested, not mapped
    assert!(ftl.nand().page_data(0, 1, 0).is_erased());

    // Logical block 1 never got a block assigned; it reads as blank, and a
    // full rebuild that cannot fill every slot stays partial
    let mut out = vec![0u8; GEOMETRY.page_size];
    ftl.read_sector(8, &mut out, 1)?;
    assert!(out.is_erased());
    assert_eq!(ftl.table.state, BuildState::PartiallyBuilt);
    Ok(())
}
