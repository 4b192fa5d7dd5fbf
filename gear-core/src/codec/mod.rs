//! `tokio_util` framings for both wire sub-protocols.
//!
//! [`PacketCodec`] carries binary job-protocol frames, [`LineCodec`] the
//! newline-terminated admin text protocol.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_LINE_LENGTH;
use crate::error::GearError;
use crate::header::{HEADER_SIZE, HeaderBytes, PacketHeader};
use crate::packet::Packet;

/// Binary frame codec. Decodes either magic, so the same codec serves
/// clients, workers and test servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = GearError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, GearError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header_bytes: HeaderBytes = [0; HEADER_SIZE];
        header_bytes.copy_from_slice(&src[..HEADER_SIZE]);
        let header = PacketHeader::from_bytes(&header_bytes)?;

        let frame_len = HEADER_SIZE + header.body_length();
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(header.body_length());
        Packet::from_parts(header, &body).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = GearError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), GearError> {
        dst.reserve(HEADER_SIZE + item.body_length());
        dst.put_slice(&item.header().to_bytes());
        item.write_body(dst);
        Ok(())
    }
}

// ── LineCodec ────────────────────────────────────────────────────

/// Admin protocol codec: one `String` per `\n`-terminated line, with a
/// trailing `\r` stripped on read.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCodec {
    /// Bytes already scanned for a newline.
    scanned: usize,
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = GearError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, GearError> {
        let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = src.len();
            if src.len() > MAX_LINE_LENGTH {
                return Err(GearError::FrameTooLarge {
                    size: src.len(),
                    max: MAX_LINE_LENGTH,
                });
            }
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;
        let mut line = src.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        Ok(Some(String::from_utf8(line.to_vec())?))
    }
}

impl Encoder<String> for LineCodec {
    type Error = GearError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), GearError> {
        if item.contains('\n') {
            return Err(GearError::InvalidArgument(format!(
                "admin command {item:?} contains a newline"
            )));
        }
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = PacketCodec;
        let packet = Packet::response(Command::JobAssignUniq, &[b"H:1", b"reverse", b"u", b"data"]).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_message() {
        let mut codec = PacketCodec;
        let bytes = Packet::request(Command::EchoReq, &[b"hello"]).unwrap().to_bytes();

        let mut buf = BytesMut::from(&bytes[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[5..HEADER_SIZE + 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[HEADER_SIZE + 2..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload(), b"hello");
    }

    #[test]
    fn back_to_back_frames() {
        let mut codec = PacketCodec;
        let mut buf = BytesMut::new();
        codec.encode(Packet::response(Command::NoJob, &[]).unwrap(), &mut buf).unwrap();
        codec.encode(Packet::response(Command::Noop, &[]).unwrap(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command(), Command::NoJob);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command(), Command::Noop);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn garbage_header_is_error() {
        let mut codec = PacketCodec;
        let mut buf = BytesMut::from(&b"status\nworkers\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(GearError::MalformedPacket(_))));
    }

    #[test]
    fn lines_split_and_strip_cr() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"OK 1.1.19\r\nrev"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("OK 1.1.19"));
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"erse\t0\t0\t1\n.\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("reverse\t0\t0\t1"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("."));
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_line() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn line_encode() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::new();
        codec.encode("maxqueue reverse 10".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"maxqueue reverse 10\n");
        assert!(codec.encode("a\nb".to_string(), &mut buf).is_err());
    }

    #[test]
    fn overlong_line_rejected() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(matches!(codec.decode(&mut buf), Err(GearError::FrameTooLarge { .. })));
    }
}
