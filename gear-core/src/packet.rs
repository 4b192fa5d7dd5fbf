//! Binary job-protocol frames.
//!
//! A frame is a [`PacketHeader`] followed by the command's arguments
//! joined with NUL bytes. Every argument except the last is a text token
//! and may not contain NUL; the last one is the opaque payload.

use bytes::BufMut;

use crate::config::MAX_BODY_SIZE;
use crate::error::GearError;
use crate::header::{HEADER_SIZE, HeaderBytes, PacketHeader};
use crate::message::{Command, Magic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    magic: Magic,
    command: Command,
    args: Vec<Vec<u8>>,
}

impl Packet {
    /// Build a packet, checking the argument count and that no text
    /// argument contains a NUL.
    pub fn new(magic: Magic, command: Command, args: Vec<Vec<u8>>) -> Result<Self, GearError> {
        if args.len() != command.arg_count() {
            return Err(GearError::InvalidArgument(format!(
                "{command} takes {} arguments, got {}",
                command.arg_count(),
                args.len()
            )));
        }
        if let Some((_, text)) = args.split_last() {
            if text.iter().any(|arg| arg.contains(&0)) {
                return Err(GearError::InvalidArgument(format!(
                    "{command} text argument contains NUL"
                )));
            }
        }

        let packet = Self {
            magic,
            command,
            args,
        };
        let size = packet.body_length();
        if size > MAX_BODY_SIZE {
            return Err(GearError::PayloadTooLarge {
                size,
                max: MAX_BODY_SIZE,
            });
        }
        Ok(packet)
    }

    /// A packet travelling to the server.
    pub fn request(command: Command, args: &[&[u8]]) -> Result<Self, GearError> {
        Self::new(Magic::Request, command, args.iter().map(|a| a.to_vec()).collect())
    }

    /// A packet travelling from the server.
    pub fn response(command: Command, args: &[&[u8]]) -> Result<Self, GearError> {
        Self::new(Magic::Response, command, args.iter().map(|a| a.to_vec()).collect())
    }

    pub fn magic(&self) -> Magic {
        self.magic
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Vec<u8>> {
        self.args
    }

    /// Argument `index`, or an empty slice past the end.
    pub fn arg(&self, index: usize) -> &[u8] {
        self.args.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    /// Argument `index` as UTF-8 text.
    pub fn arg_str(&self, index: usize) -> Result<&str, GearError> {
        Ok(std::str::from_utf8(self.arg(index))?)
    }

    /// The trailing opaque argument; empty for argument-less commands.
    pub fn payload(&self) -> &[u8] {
        self.args.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// Encoded body size: the arguments plus one separator between each.
    pub fn body_length(&self) -> usize {
        let data: usize = self.args.iter().map(Vec::len).sum();
        data + self.args.len().saturating_sub(1)
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader::new(self.magic, self.command, self.body_length() as u32)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body_length());
        out.extend_from_slice(&self.header().to_bytes());
        self.write_body(&mut out);
        out
    }

    pub(crate) fn write_body(&self, out: &mut impl BufMut) {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                out.put_u8(0);
            }
            out.put_slice(arg);
        }
    }

    /// Decode exactly one frame; `bytes` must hold nothing else.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GearError> {
        let header_bytes: &HeaderBytes = bytes
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                GearError::MalformedPacket(format!(
                    "frame of {} bytes is shorter than a header",
                    bytes.len()
                ))
            })?;
        let header = PacketHeader::from_bytes(header_bytes)?;

        let body = &bytes[HEADER_SIZE..];
        if body.len() != header.body_length() {
            return Err(GearError::MalformedPacket(format!(
                "declared body length {} but {} bytes available",
                header.body_length(),
                body.len()
            )));
        }
        Self::from_parts(header, body)
    }

    /// Split `body` into the argument count `header.command()` expects.
    pub(crate) fn from_parts(header: PacketHeader, body: &[u8]) -> Result<Self, GearError> {
        let command = header.command();
        let count = command.arg_count();

        let args: Vec<Vec<u8>> = if count == 0 {
            if !body.is_empty() {
                return Err(GearError::MalformedPacket(format!(
                    "{command} carries no arguments but has a {} byte body",
                    body.len()
                )));
            }
            Vec::new()
        } else {
            body.splitn(count, |b| *b == 0).map(<[u8]>::to_vec).collect()
        };

        if args.len() != count {
            return Err(GearError::MalformedPacket(format!(
                "{command} expects {count} arguments, found {}",
                args.len()
            )));
        }

        Ok(Self {
            magic: header.magic(),
            command,
            args,
        })
    }
}

/// Encode a request frame.
pub fn encode(command: Command, args: &[&[u8]]) -> Result<Vec<u8>, GearError> {
    Ok(Packet::request(command, args)?.to_bytes())
}

/// Decode one complete frame into its command and arguments.
pub fn decode(bytes: &[u8]) -> Result<(Command, Vec<Vec<u8>>), GearError> {
    let packet = Packet::from_bytes(bytes)?;
    Ok((packet.command(), packet.into_args()))
}

// ── Tests ────────────────────────────────────────────────────────
