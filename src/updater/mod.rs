mod block;
mod error;
pub mod firmware;
mod flash;
mod link;

pub use self::{
    error::Error,
    flash::{Flash, MemoryFlash},
    link::{list_devices, DeviceInfo, SerialLink},
};

use self::block::{Block, BLOCK_LENGTH, DATA_LENGTH};
use std::fmt::Display;

pub const FIRMWARE_BASE_ADDRESS: u32 = 0x0000_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Idle,
    Writing,
    Error,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Idle => "Idle",
            Status::Writing => "Writing",
            Status::Error => "Error",
        })
    }
}

/// Outcome of ingesting firmware bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteEvent {
    Buffered,
    BlockWritten { index: u32 },
    Complete,
}

/// Firmware update session fed one byte at a time.
///
/// Bytes accumulate into 512 byte UF2 blocks. Every block is sentinel
/// checked, the first one additionally sizes the single whole-image erase,
/// and each payload is programmed at the next sequential address starting
/// from [`FIRMWARE_BASE_ADDRESS`]. The final block yields
/// [`WriteEvent::Complete`], the request to restart the device. Any
/// malformed block or storage fault latches [`Status::Error`] until
/// [`Updater::reset`] is called.
pub struct Updater<F: Flash> {
    flash: F,
    status: Status,
    buffer: [u8; BLOCK_LENGTH],
    buffer_offset: usize,
    current_block: u32,
    total_blocks: u32,
    payload_length: u32,
}

impl<F: Flash> Updater<F> {
    pub fn new(flash: F) -> Self {
        Updater {
            flash,
            status: Status::Idle,
            buffer: [0u8; BLOCK_LENGTH],
            buffer_offset: 0,
            current_block: 0,
            total_blocks: 0,
            payload_length: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Abandon the current session and return to [`Status::Idle`]. This is
    /// the only way out of [`Status::Error`].
    pub fn reset(&mut self) {
        self.status = Status::Idle;
        self.buffer_offset = 0;
        self.current_block = 0;
        self.total_blocks = 0;
        self.payload_length = 0;
    }

    /// Ingest one byte of the firmware image stream.
    pub fn write(&mut self, byte: u8) -> Result<WriteEvent, Error> {
        match self.status {
            Status::Idle => self.status = Status::Writing,
            Status::Writing => {}
            Status::Error => {
                return Err(Error::new("Previous update failed, reset is required"));
            }
        }
        self.buffer[self.buffer_offset] = byte;
        self.buffer_offset += 1;
        if self.buffer_offset < BLOCK_LENGTH {
            return Ok(WriteEvent::Buffered);
        }
        self.buffer_offset = 0;
        match self.process_block() {
            Ok(event) => Ok(event),
            Err(error) => {
                self.status = Status::Error;
                Err(error)
            }
        }
    }

    /// Ingest a chunk of the firmware image stream, stopping right after the
    /// final block. Returns the last observed event.
    pub fn feed(&mut self, data: &[u8]) -> Result<WriteEvent, Error> {
        let mut event = WriteEvent::Buffered;
        for byte in data {
            event = self.write(*byte)?;
            if event == WriteEvent::Complete {
                break;
            }
        }
        Ok(event)
    }

    fn process_block(&mut self) -> Result<WriteEvent, Error> {
        let block = Block::try_from(&self.buffer[..])?;

        if self.current_block == 0 {
            if block.total_blocks == 0 {
                return Err(Error::new("First UF2 block declared an empty image"));
            }
            if block.payload_length as usize > DATA_LENGTH {
                return Err(Error::new(
                    "First UF2 block declared a payload larger than the data area",
                ));
            }
            self.total_blocks = block.total_blocks;
            self.payload_length = block.payload_length;

            let granularity = self.flash.erase_granularity() as u64;
            let image_length = (self.total_blocks as u64) * (self.payload_length as u64);
            let erase_length = image_length.div_ceil(granularity) * granularity;
            if erase_length > u32::MAX as u64 {
                return Err(Error::new("Declared image size exceeds the addressable range"));
            }
            self.flash.erase(FIRMWARE_BASE_ADDRESS, erase_length as u32)?;
        }

        // Wire block_index and target_address are deliberately ignored,
        // payloads land at the next sequential address and are sliced by the
        // session's payload length regardless of what later blocks declare.
        let payload = &block.data[0..self.payload_length as usize];
        let address = FIRMWARE_BASE_ADDRESS + self.current_block * self.payload_length;
        self.flash.program(address, payload)?;

        let index = self.current_block;
        self.current_block += 1;
        if self.current_block == self.total_blocks {
            self.reset();
            return Ok(WriteEvent::Complete);
        }
        Ok(WriteEvent::BlockWritten { index })
    }
}
