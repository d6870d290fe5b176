//! Interleave-bank to chip/block translation.
//!
//! A logical block's data is striped across `interleave` banks; each bank is
//! backed by an equal share of the chips, and a bank's relative block space
//! runs linearly through its chips. The translator is configured once and
//! passed by value into every region that needs it — there is no process-wide
//! state.

use crate::error::{FtlError, Result};

#[derive(Debug, Copy, Clone)]
pub struct BankTranslator {
    chip_count: u32,
    blocks_per_chip: u32,
    interleave: u32,
}

impl BankTranslator {
    /// Configure the translation for a device of `chip_count` chips with
    /// `blocks_per_chip` blocks each, striped across `interleave` banks.
    ///
    /// `interleave` must be a nonzero power of two dividing the chip count.
    pub fn new(chip_count: u32, blocks_per_chip: u32, interleave: u32) -> Result<Self> {
        if chip_count == 0
            || blocks_per_chip == 0
            || interleave == 0
            || !interleave.is_power_of_two()
            || chip_count % interleave != 0
        {
            return Err(FtlError::BadParameter);
        }

        Ok(Self {
            chip_count,
            blocks_per_chip,
            interleave,
        })
    }

    /// The configured interleave factor (bank count)
    pub fn interleave(&self) -> u32 {
        self.interleave
    }

    /// Resolve a bank-relative block number to a concrete (chip, physical
    /// block) pair.
    pub fn resolve(&self, bank: u32, relative_block: u32) -> Result<(u32, u32)> {
        if bank >= self.interleave {
            return Err(FtlError::NotInitialized);
        }

        let chips_per_bank = self.chip_count / self.interleave;
        let chip_in_bank = relative_block / self.blocks_per_chip;
        if chip_in_bank >= chips_per_bank {
            return Err(FtlError::NotInitialized);
        }

        Ok((
            bank * chips_per_bank + chip_in_bank,
            relative_block % self.blocks_per_chip,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_chip_identity() {
        let btl = BankTranslator::new(1, 128, 1).unwrap();
        assert_eq!(btl.resolve(0, 0).unwrap(), (0, 0));
        assert_eq!(btl.resolve(0, 127).unwrap(), (0, 127));
        assert_eq!(btl.resolve(0, 128), Err(FtlError::NotInitialized));
        assert_eq!(btl.resolve(1, 0), Err(FtlError::NotInitialized));
    }

    #[test]
    fn banks_partition_chips() {
        // 4 chips, 2 banks: bank 0 spans chips 0-1, bank 1 spans chips 2-3
        let btl = BankTranslator::new(4, 64, 2).unwrap();
        assert_eq!(btl.resolve(0, 10).unwrap(), (0, 10));
        assert_eq!(btl.resolve(0, 70).unwrap(), (1, 6));
        assert_eq!(btl.resolve(1, 10).unwrap(), (2, 10));
        assert_eq!(btl.resolve(1, 127).unwrap(), (3, 63));
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(BankTranslator::new(0, 64, 1).is_err());
        assert!(BankTranslator::new(4, 64, 3).is_err());
        assert!(BankTranslator::new(2, 64, 4).is_err());
    }
}
