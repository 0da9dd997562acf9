use super::error::Error;

/// Program storage reached by the update session.
///
/// Erase granularity must be nonzero. The session never programs a range it
/// did not erase first.
pub trait Flash {
    /// Smallest erasable unit in bytes.
    fn erase_granularity(&self) -> u32;

    /// Erase `length` bytes starting at `base`, both aligned to the erase
    /// granularity.
    fn erase(&mut self, base: u32, length: u32) -> Result<(), Error>;

    /// Program `data` starting at `base`.
    fn program(&mut self, base: u32, data: &[u8]) -> Result<(), Error>;
}

const SECTOR_LENGTH: u32 = 4096;
const ERASED_BYTE: u8 = 0xFF;

/// In-memory flash with 4096 byte sectors that records every erase and
/// program call. Programming a range that was not erased beforehand is an
/// error, like on the real part.
pub struct MemoryFlash {
    data: Vec<u8>,
    erased: Vec<bool>,
    erase_log: Vec<(u32, u32)>,
    program_log: Vec<(u32, u32)>,
}

impl MemoryFlash {
    pub fn new(capacity: u32) -> Self {
        MemoryFlash {
            data: vec![0u8; capacity as usize],
            erased: vec![false; capacity as usize],
            erase_log: vec![],
            program_log: vec![],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn erase_operations(&self) -> &[(u32, u32)] {
        &self.erase_log
    }

    pub fn program_operations(&self) -> &[(u32, u32)] {
        &self.program_log
    }

    fn range(&self, base: u32, length: u32) -> Result<(usize, usize), Error> {
        let start = base as usize;
        let end = match start.checked_add(length as usize) {
            Some(end) => end,
            None => return Err(Error::new("Flash address range overflow")),
        };
        if end > self.data.len() {
            return Err(Error::new("Flash address range outside device capacity"));
        }
        Ok((start, end))
    }
}

impl Flash for MemoryFlash {
    fn erase_granularity(&self) -> u32 {
        SECTOR_LENGTH
    }

    fn erase(&mut self, base: u32, length: u32) -> Result<(), Error> {
        if base % SECTOR_LENGTH != 0 || length % SECTOR_LENGTH != 0 {
            return Err(Error::new("Erase range not aligned to sector length"));
        }
        let (start, end) = self.range(base, length)?;
        self.data[start..end].fill(ERASED_BYTE);
        self.erased[start..end].fill(true);
        self.erase_log.push((base, length));
        Ok(())
    }

    fn program(&mut self, base: u32, data: &[u8]) -> Result<(), Error> {
        let (start, end) = self.range(base, data.len() as u32)?;
        if !self.erased[start..end].iter().all(|erased| *erased) {
            return Err(Error::new("Program range was not erased"));
        }
        self.data[start..end].copy_from_slice(data);
        self.erased[start..end].fill(false);
        self.program_log.push((base, data.len() as u32));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_fills_sectors_and_is_recorded() {
        let mut flash = MemoryFlash::new(4 * SECTOR_LENGTH);
        flash.erase(SECTOR_LENGTH, 2 * SECTOR_LENGTH).unwrap();
        assert!(flash.data()[0..SECTOR_LENGTH as usize]
            .iter()
            .all(|byte| *byte == 0x00));
        assert!(flash.data()[SECTOR_LENGTH as usize..3 * SECTOR_LENGTH as usize]
            .iter()
            .all(|byte| *byte == ERASED_BYTE));
        assert_eq!(flash.erase_operations(), &[(SECTOR_LENGTH, 2 * SECTOR_LENGTH)]);
    }

    #[test]
    fn erase_rejects_unaligned_ranges() {
        let mut flash = MemoryFlash::new(4 * SECTOR_LENGTH);
        assert!(flash.erase(100, SECTOR_LENGTH).is_err());
        assert!(flash.erase(0, 100).is_err());
        assert!(flash.erase_operations().is_empty());
    }

    #[test]
    fn erase_rejects_out_of_range() {
        let mut flash = MemoryFlash::new(2 * SECTOR_LENGTH);
        assert!(flash.erase(0, 3 * SECTOR_LENGTH).is_err());
        assert!(flash.erase(2 * SECTOR_LENGTH, SECTOR_LENGTH).is_err());
    }

    #[test]
    fn program_requires_a_prior_erase() {
        let mut flash = MemoryFlash::new(SECTOR_LENGTH);
        assert!(flash.program(0, &[0x12, 0x34]).is_err());
        flash.erase(0, SECTOR_LENGTH).unwrap();
        flash.program(0, &[0x12, 0x34]).unwrap();
        assert_eq!(&flash.data()[0..2], &[0x12, 0x34]);
        assert_eq!(flash.program_operations(), &[(0, 2)]);
    }

    #[test]
    fn program_rejects_already_programmed_ranges() {
        let mut flash = MemoryFlash::new(SECTOR_LENGTH);
        flash.erase(0, SECTOR_LENGTH).unwrap();
        flash.program(16, &[0xAB; 16]).unwrap();
        assert!(flash.program(16, &[0xCD; 16]).is_err());
        assert!(flash.program(31, &[0xCD]).is_err());
        flash.program(32, &[0xCD]).unwrap();
    }

    #[test]
    fn program_rejects_out_of_range() {
        let mut flash = MemoryFlash::new(SECTOR_LENGTH);
        flash.erase(0, SECTOR_LENGTH).unwrap();
        assert!(flash
            .program(SECTOR_LENGTH - 1, &[0x00, 0x11])
            .is_err());
    }

    #[test]
    fn reerasing_restores_the_sector() {
        let mut flash = MemoryFlash::new(SECTOR_LENGTH);
        flash.erase(0, SECTOR_LENGTH).unwrap();
        flash.program(0, &[0x55; 64]).unwrap();
        flash.erase(0, SECTOR_LENGTH).unwrap();
        assert!(flash.data()[0..64].iter().all(|byte| *byte == ERASED_BYTE));
        flash.program(0, &[0x66; 64]).unwrap();
        assert_eq!(flash.erase_operations().len(), 2);
        assert_eq!(flash.program_operations().len(), 2);
    }
}
