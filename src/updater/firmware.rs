use super::{
    block::{
        Block, Info, BLOCK_LENGTH, DATA_LENGTH, FLAG_EXTENSION_TAGS_PRESENT,
        FLAG_FAMILY_ID_PRESENT, FLAG_FILE_CONTAINER, FLAG_MD5_CHECKSUM_PRESENT,
        FLAG_NOT_MAIN_FLASH,
    },
    Error,
};
use std::fmt::Display;

pub struct Firmware {
    block_count: u32,
    payload_length: u32,
    image_length: u32,
    target_address: u32,
    flags: u32,
    info: Info,
    payload_crc: u32,
    payload_md5: md5::Digest,
}

impl Firmware {
    pub fn image_length(&self) -> u32 {
        self.image_length
    }
}

fn describe_flags(flags: u32) -> String {
    let mut names = vec![];
    if (flags & FLAG_NOT_MAIN_FLASH) != 0 {
        names.push("not main flash");
    }
    if (flags & FLAG_FILE_CONTAINER) != 0 {
        names.push("file container");
    }
    if (flags & FLAG_FAMILY_ID_PRESENT) != 0 {
        names.push("family id");
    }
    if (flags & FLAG_MD5_CHECKSUM_PRESENT) != 0 {
        names.push("md5 checksum");
    }
    if (flags & FLAG_EXTENSION_TAGS_PRESENT) != 0 {
        names.push("extension tags");
    }
    if names.is_empty() {
        String::new()
    } else {
        format!(" [{}]", names.join(", "))
    }
}

impl Display for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(" Blocks:         {}", self.block_count))?;
        f.write_fmt(format_args!(
            "\n Payload length: {} bytes",
            self.payload_length
        ))?;
        f.write_fmt(format_args!(
            "\n Image length:   {} bytes (0x{:X})",
            self.image_length, self.image_length
        ))?;
        f.write_fmt(format_args!(
            "\n Target address: 0x{:08X}",
            self.target_address
        ))?;
        f.write_fmt(format_args!(
            "\n Flags:          0x{:08X}{}",
            self.flags,
            describe_flags(self.flags)
        ))?;
        f.write_fmt(format_args!("\n Info:           {}", self.info))?;
        f.write_fmt(format_args!("\n Payload CRC32:  0x{:08X}", self.payload_crc))?;
        f.write_fmt(format_args!(
            "\n Payload MD5:    {}",
            hex::encode_upper(self.payload_md5.0)
        ))?;
        Ok(())
    }
}

/// Whole-file check of a UF2 firmware image.
///
/// This is stricter than the byte stream update path on purpose. A file that
/// passes here flashes cleanly, so sequencing and declaration consistency
/// are verified across all blocks, not just the sentinels.
pub fn verify(data: &[u8]) -> Result<Firmware, Error> {
    if data.is_empty() {
        return Err(Error::new("Firmware file is empty"));
    }
    if data.len() % BLOCK_LENGTH != 0 {
        return Err(Error::new(
            "Firmware file length is not a multiple of the UF2 block length",
        ));
    }

    let mut total_blocks = 0u32;
    let mut payload_length = 0u32;
    let mut target_address = 0u32;
    let mut flags = 0u32;
    let mut info = Info::Unused;

    let mut crc = crc32fast::Hasher::new();
    let mut md5_context = md5::Context::new();

    for (index, raw) in data.chunks_exact(BLOCK_LENGTH).enumerate() {
        let block = match Block::try_from(raw) {
            Ok(block) => block,
            Err(error) => return Err(Error::new(format!("Block {index}: {error}").as_str())),
        };

        if block.block_index != index as u32 {
            return Err(Error::new(
                format!(
                    "Block {index} carries out of order index [{}]",
                    block.block_index
                )
                .as_str(),
            ));
        }

        if index == 0 {
            if block.payload_length as usize > DATA_LENGTH {
                return Err(Error::new(
                    "Block 0 declares a payload larger than the data area",
                ));
            }
            total_blocks = block.total_blocks;
            payload_length = block.payload_length;
            target_address = block.target_address;
            flags = block.flags;
            info = block.info;
        } else {
            if block.total_blocks != total_blocks {
                return Err(Error::new(
                    format!("Block {index} declares a different total block count").as_str(),
                ));
            }
            if block.payload_length != payload_length {
                return Err(Error::new(
                    format!("Block {index} declares a different payload length").as_str(),
                ));
            }
        }

        let payload = &block.data[0..payload_length as usize];
        crc.update(payload);
        md5_context.consume(payload);
    }

    let actual_blocks = data.len() / BLOCK_LENGTH;
    if total_blocks as usize != actual_blocks {
        return Err(Error::new(
            format!("Firmware file declares {total_blocks} blocks but contains {actual_blocks}")
                .as_str(),
        ));
    }

    let image_length = (total_blocks as u64) * (payload_length as u64);
    if image_length > u32::MAX as u64 {
        return Err(Error::new("Declared image size exceeds the addressable range"));
    }

    Ok(Firmware {
        block_count: total_blocks,
        payload_length,
        image_length: image_length as u32,
        target_address,
        flags,
        info,
        payload_crc: crc.finalize(),
        payload_md5: md5_context.compute(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_block(block_index: u32, total_blocks: u32, payload_length: u32, fill: u8) -> Vec<u8> {
        let mut block = vec![0u8; BLOCK_LENGTH];
        block[0..4].copy_from_slice(&0x0A32_4655u32.to_le_bytes());
        block[4..8].copy_from_slice(&0x9E5D_5157u32.to_le_bytes());
        block[16..20].copy_from_slice(&payload_length.to_le_bytes());
        block[20..24].copy_from_slice(&block_index.to_le_bytes());
        block[24..28].copy_from_slice(&total_blocks.to_le_bytes());
        for byte in block[32..32 + payload_length as usize].iter_mut() {
            *byte = fill;
        }
        block[508..512].copy_from_slice(&0x0AB1_6F30u32.to_le_bytes());
        block
    }

    fn two_block_file() -> Vec<u8> {
        let mut file = raw_block(0, 2, 256, 0xAA);
        file.extend(raw_block(1, 2, 256, 0xBB));
        file
    }

    #[test]
    fn reports_image_metadata() {
        let firmware = verify(&two_block_file()).unwrap();
        assert_eq!(firmware.block_count, 2);
        assert_eq!(firmware.payload_length, 256);
        assert_eq!(firmware.image_length(), 512);
        assert_eq!(firmware.target_address, 0);
        assert_eq!(firmware.info, Info::Unused);
        assert_eq!(firmware.payload_crc, 0x1EB5_67C6);
        assert_eq!(
            hex::encode_upper(firmware.payload_md5.0),
            "4221A6CC203DD9EA558410F07CBE8E65"
        );
    }

    #[test]
    fn report_names_flags_and_family() {
        let mut file = raw_block(0, 1, 16, 0x77);
        file[8..12].copy_from_slice(&0x0000_6000u32.to_le_bytes());
        file[28..32].copy_from_slice(&0xE48B_FF56u32.to_le_bytes());

        let report = verify(&file).unwrap().to_string();
        assert!(report.contains("0x00006000 [family id, md5 checksum]"));
        assert!(report.contains("Family [RP2040]"));
    }

    #[test]
    fn rejects_empty_and_ragged_files() {
        assert!(verify(&[]).is_err());
        assert!(verify(&[0u8; 100]).is_err());
        let mut file = two_block_file();
        file.push(0x00);
        assert!(verify(&file).is_err());
    }

    #[test]
    fn rejects_corrupted_blocks() {
        let mut file = two_block_file();
        file[512 + 508] ^= 0xFF;
        assert!(verify(&file).is_err());
    }

    #[test]
    fn rejects_out_of_order_blocks() {
        let mut file = raw_block(0, 2, 256, 0xAA);
        file.extend(raw_block(0, 2, 256, 0xBB));
        assert!(verify(&file).is_err());

        let mut file = raw_block(1, 2, 256, 0xAA);
        file.extend(raw_block(0, 2, 256, 0xBB));
        assert!(verify(&file).is_err());
    }

    #[test]
    fn rejects_inconsistent_declarations() {
        let mut file = raw_block(0, 2, 256, 0xAA);
        file.extend(raw_block(1, 3, 256, 0xBB));
        assert!(verify(&file).is_err());

        let mut file = raw_block(0, 2, 256, 0xAA);
        file.extend(raw_block(1, 2, 128, 0xBB));
        assert!(verify(&file).is_err());
    }

    #[test]
    fn rejects_wrong_declared_block_count() {
        let mut file = raw_block(0, 3, 256, 0xAA);
        file.extend(raw_block(1, 3, 256, 0xBB));
        assert!(verify(&file).is_err());

        let file = raw_block(0, 0, 256, 0xAA);
        assert!(verify(&file).is_err());
    }

    #[test]
    fn rejects_oversized_payload_declaration() {
        let mut file = raw_block(0, 1, 476, 0xAA);
        file[16..20].copy_from_slice(&500u32.to_le_bytes());
        assert!(verify(&file).is_err());
    }

    #[test]
    fn digests_cover_the_payload_only() {
        let plain = two_block_file();
        let mut padded = two_block_file();
        for block_offset in [0, 512] {
            for byte in padded[block_offset + 32 + 256..block_offset + 508].iter_mut() {
                *byte = 0xE7;
            }
        }

        let first = verify(&plain).unwrap();
        let second = verify(&padded).unwrap();
        assert_eq!(first.payload_crc, second.payload_crc);
        assert_eq!(first.payload_md5.0, second.payload_md5.0);
    }
}
