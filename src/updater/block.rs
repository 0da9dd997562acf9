use super::error::Error;
use std::fmt::Display;

pub const BLOCK_LENGTH: usize = 512;
pub const DATA_LENGTH: usize = 476;

pub const MAGIC_START_0: u32 = 0x0A32_4655;
pub const MAGIC_START_1: u32 = 0x9E5D_5157;
pub const MAGIC_END: u32 = 0x0AB1_6F30;

pub const FLAG_NOT_MAIN_FLASH: u32 = 0x0000_0001;
pub const FLAG_FILE_CONTAINER: u32 = 0x0000_1000;
pub const FLAG_FAMILY_ID_PRESENT: u32 = 0x0000_2000;
pub const FLAG_MD5_CHECKSUM_PRESENT: u32 = 0x0000_4000;
pub const FLAG_EXTENSION_TAGS_PRESENT: u32 = 0x0000_8000;

pub const RP2040_FAMILY_ID: u32 = 0xE48B_FF56;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Info {
    Unused,
    FileSize(u32),
    Family(u32),
}

impl Display for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Info::Unused => f.write_str("Not present"),
            Info::FileSize(length) => f.write_fmt(format_args!("File size [{} bytes]", length)),
            Info::Family(RP2040_FAMILY_ID) => f.write_str("Family [RP2040]"),
            Info::Family(id) => f.write_fmt(format_args!("Family [0x{id:08X}]")),
        }
    }
}

/// Borrowed view over a single 512 byte UF2 block.
///
/// Parsing checks the buffer length and the three sentinel words, nothing
/// else. Numeric fields are decoded as-is, judging them is left to the
/// update session and the whole-file verifier.
pub struct Block<'a> {
    pub flags: u32,
    pub target_address: u32,
    pub payload_length: u32,
    pub block_index: u32,
    pub total_blocks: u32,
    pub info: Info,
    pub data: &'a [u8; DATA_LENGTH],
}

fn u32_field(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

impl<'a> TryFrom<&'a [u8]> for Block<'a> {
    type Error = Error;
    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        if value.len() != BLOCK_LENGTH {
            return Err(Error::new("Invalid data length for UF2 block"));
        }
        if u32_field(value, 0) != MAGIC_START_0 {
            return Err(Error::new("Invalid first start sentinel in UF2 block"));
        }
        if u32_field(value, 4) != MAGIC_START_1 {
            return Err(Error::new("Invalid second start sentinel in UF2 block"));
        }
        if u32_field(value, 508) != MAGIC_END {
            return Err(Error::new("Invalid end sentinel in UF2 block"));
        }
        let flags = u32_field(value, 8);
        let raw_info = u32_field(value, 28);
        let info = if (flags & FLAG_FAMILY_ID_PRESENT) != 0 {
            Info::Family(raw_info)
        } else if raw_info != 0 {
            Info::FileSize(raw_info)
        } else {
            Info::Unused
        };
        Ok(Block {
            flags,
            target_address: u32_field(value, 12),
            payload_length: u32_field(value, 16),
            block_index: u32_field(value, 20),
            total_blocks: u32_field(value, 24),
            info,
            data: value[32..508].try_into().unwrap(),
        })
    }
}
