//! The fixed 12-byte frame header: magic, command code, body length.
//! All three fields are big-endian `u32`s.

use crate::config::MAX_BODY_SIZE;
use crate::error::GearError;
use crate::message::{Command, Magic};

/// Size of an encoded header in bytes.
pub const HEADER_SIZE: usize = 12;

pub type HeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    magic: Magic,
    command: Command,
    body_length: u32,
}

impl PacketHeader {
    pub fn new(magic: Magic, command: Command, body_length: u32) -> Self {
        Self {
            magic,
            command,
            body_length,
        }
    }

    pub fn magic(&self) -> Magic {
        self.magic
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn body_length(&self) -> usize {
        self.body_length as usize
    }

    pub fn to_bytes(&self) -> HeaderBytes {
        let mut out: HeaderBytes = [0; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_bytes());
        out[4..8].copy_from_slice(&self.command.code().to_be_bytes());
        out[8..12].copy_from_slice(&self.body_length.to_be_bytes());
        out
    }

    /// Parse a header, rejecting unknown magic or command codes and
    /// bodies larger than [`MAX_BODY_SIZE`].
    pub fn from_bytes(bytes: &HeaderBytes) -> Result<Self, GearError> {
        let word = |i: usize| u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        let magic = Magic::try_from(word(0))?;
        let command = Command::try_from(word(4))?;
        let body_length = word(8);
        if body_length as usize > MAX_BODY_SIZE {
            return Err(GearError::FrameTooLarge {
                size: body_length as usize,
                max: MAX_BODY_SIZE,
            });
        }

        Ok(Self {
            magic,
            command,
            body_length,
        })
    }
}
