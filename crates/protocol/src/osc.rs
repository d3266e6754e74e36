//! OSC 1.0 binary decoding.
//!
//! All values are big-endian; strings are null-terminated and padded to a
//! four-byte boundary. `#bundle` containers are flattened, their timetags
//! ignored (TUIO senders timestamp frames through `fseq` instead).

use crate::ProtocolError;
use bytes::{Buf, Bytes};

/// A reader for parsing OSC-encoded binary data.
#[derive(Debug)]
pub struct OscReader {
    buf: Bytes,
}

impl OscReader {
    /// Create a new reader from raw bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { buf: data.into() }
    }

    /// Returns remaining bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        if self.buf.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(self.buf.get_i32())
    }

    #[inline]
    pub fn get_i64(&mut self) -> Result<i64, ProtocolError> {
        if self.buf.remaining() < 8 {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(self.buf.get_i64())
    }

    #[inline]
    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        if self.buf.remaining() < 8 {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(self.buf.get_u64())
    }

    #[inline]
    pub fn get_f32(&mut self) -> Result<f32, ProtocolError> {
        if self.buf.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(self.buf.get_f32())
    }

    #[inline]
    pub fn get_f64(&mut self) -> Result<f64, ProtocolError> {
        if self.buf.remaining() < 8 {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(self.buf.get_f64())
    }

    /// Read `n` raw bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<Bytes, ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(self.buf.split_to(n))
    }

    /// Read a null-terminated, four-byte-aligned OSC string.
    pub fn get_str(&mut self) -> Result<String, ProtocolError> {
        let mut bytes = Vec::new();
        loop {
            if !self.buf.has_remaining() {
                return Err(ProtocolError::UnexpectedEof);
            }
            let b = self.buf.get_u8();
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        // consumed = contents + terminator, padded to a multiple of four
        let consumed = bytes.len() + 1;
        let pad = (4 - consumed % 4) % 4;
        if self.buf.remaining() < pad {
            return Err(ProtocolError::UnexpectedEof);
        }
        self.buf.advance(pad);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// A single decoded OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

impl OscArg {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            OscArg::Int(v) => Some(*v),
            OscArg::Float(v) => Some(*v as i32),
            OscArg::Str(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            OscArg::Int(v) => Some(*v as f32),
            OscArg::Float(v) => Some(*v),
            OscArg::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A decoded OSC message: address pattern plus typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

/// Parse a raw datagram into its OSC messages, flattening bundles.
pub fn parse_packet(data: &[u8]) -> Result<Vec<OscMessage>, ProtocolError> {
    let mut out = Vec::new();
    parse_element(Bytes::copy_from_slice(data), &mut out)?;
    Ok(out)
}

fn parse_element(data: Bytes, out: &mut Vec<OscMessage>) -> Result<(), ProtocolError> {
    if data.starts_with(b"#bundle\0") {
        let mut reader = OscReader::new(data.slice(8..));
        reader.get_u64()?; // timetag
        while reader.remaining() > 0 {
            let len = reader.get_i32()?;
            if len < 0 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let element = reader.get_bytes(len as usize)?;
            parse_element(element, out)?;
        }
        Ok(())
    } else {
        out.push(parse_message(data)?);
        Ok(())
    }
}

fn parse_message(data: Bytes) -> Result<OscMessage, ProtocolError> {
    let mut reader = OscReader::new(data);
    let address = reader.get_str()?;
    if reader.remaining() == 0 {
        // argument-less message without a type tag string; tolerated
        return Ok(OscMessage { address, args: Vec::new() });
    }
    let tags = reader.get_str()?;
    let tags = tags
        .strip_prefix(',')
        .ok_or(ProtocolError::MissingTypeTags)?;

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        match tag {
            'i' => args.push(OscArg::Int(reader.get_i32()?)),
            'f' => args.push(OscArg::Float(reader.get_f32()?)),
            's' | 'S' => args.push(OscArg::Str(reader.get_str()?)),
            'h' => args.push(OscArg::Int(reader.get_i64()? as i32)),
            'd' => args.push(OscArg::Float(reader.get_f64()? as f32)),
            'T' => args.push(OscArg::Int(1)),
            'F' => args.push(OscArg::Int(0)),
            // consumed but not surfaced; a stray one must not poison the
            // rest of a datagram
            'b' => {
                let len = reader.get_i32()?;
                if len < 0 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let padded = (len as usize).div_ceil(4) * 4;
                reader.get_bytes(padded)?;
            }
            't' => {
                reader.get_u64()?;
            }
            'N' | 'I' => {}
            other => return Err(ProtocolError::UnsupportedTypeTag(other)),
        }
    }
    Ok(OscMessage { address, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_padded_str(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    fn encode_message(address: &str, args: &[OscArg]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_padded_str(&mut buf, address);
        let mut tags = String::from(",");
        for arg in args {
            tags.push(match arg {
                OscArg::Int(_) => 'i',
                OscArg::Float(_) => 'f',
                OscArg::Str(_) => 's',
            });
        }
        push_padded_str(&mut buf, &tags);
        for arg in args {
            match arg {
                OscArg::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
                OscArg::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
                OscArg::Str(s) => push_padded_str(&mut buf, s),
            }
        }
        buf
    }

    fn encode_bundle(elements: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"#bundle\0");
        buf.extend_from_slice(&[0u8; 8]); // immediate timetag
        for element in elements {
            buf.extend_from_slice(&(element.len() as i32).to_be_bytes());
            buf.extend_from_slice(element);
        }
        buf
    }

    #[test]
    fn parse_plain_message() {
        let data = encode_message(
            "/tuio/2Dcur",
            &[
                OscArg::Str("set".into()),
                OscArg::Int(42),
                OscArg::Float(0.5),
            ],
        );
        let messages = parse_packet(&data).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].address, "/tuio/2Dcur");
        assert_eq!(messages[0].args[0], OscArg::Str("set".into()));
        assert_eq!(messages[0].args[1], OscArg::Int(42));
        assert_eq!(messages[0].args[2], OscArg::Float(0.5));
    }

    #[test]
    fn parse_bundle_flattens_messages() {
        let alive = encode_message(
            "/tuio/2Dcur",
            &[OscArg::Str("alive".into()), OscArg::Int(1), OscArg::Int(2)],
        );
        let fseq = encode_message(
            "/tuio/2Dcur",
            &[OscArg::Str("fseq".into()), OscArg::Int(100)],
        );
        let bundle = encode_bundle(&[alive, fseq]);
        let messages = parse_packet(&bundle).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].args[0], OscArg::Str("alive".into()));
        assert_eq!(messages[1].args[0], OscArg::Str("fseq".into()));
    }

    #[test]
    fn string_padding_is_consumed() {
        // "hi" pads to 4 bytes, "/ab" pads to 4 bytes
        let data = encode_message("/ab", &[OscArg::Str("hi".into()), OscArg::Int(7)]);
        let messages = parse_packet(&data).unwrap();
        assert_eq!(messages[0].args[1], OscArg::Int(7));
    }

    #[test]
    fn truncated_message_fails() {
        let mut data = encode_message("/tuio/2Dcur", &[OscArg::Int(1), OscArg::Int(2)]);
        data.truncate(data.len() - 4);
        assert!(matches!(
            parse_packet(&data),
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[test]
    fn skippable_type_tags_are_consumed() {
        // blob, timetag, nil and impulse wrap a real int argument
        let mut data = Vec::new();
        push_padded_str(&mut data, "/tuio/2Dcur");
        push_padded_str(&mut data, ",btNIi");
        data.extend_from_slice(&3i32.to_be_bytes()); // blob size
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0x00]); // blob + pad
        data.extend_from_slice(&[0u8; 8]); // timetag
        data.extend_from_slice(&7i32.to_be_bytes());

        let messages = parse_packet(&data).unwrap();
        assert_eq!(messages[0].args, vec![OscArg::Int(7)]);
    }

    #[test]
    fn skippable_tag_does_not_poison_a_bundle() {
        let mut nil_msg = Vec::new();
        push_padded_str(&mut nil_msg, "/tuio/2Dcur");
        push_padded_str(&mut nil_msg, ",N");
        let fseq = encode_message(
            "/tuio/2Dcur",
            &[OscArg::Str("fseq".into()), OscArg::Int(77)],
        );

        let bundle = encode_bundle(&[nil_msg, fseq]);
        let messages = parse_packet(&bundle).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].args.is_empty());
        assert_eq!(messages[1].args[1], OscArg::Int(77));
    }

    #[test]
    fn truncated_blob_fails() {
        let mut data = Vec::new();
        push_padded_str(&mut data, "/x");
        push_padded_str(&mut data, ",b");
        data.extend_from_slice(&16i32.to_be_bytes()); // claims 16 bytes
        data.extend_from_slice(&[0u8; 4]); // delivers 4
        assert!(matches!(
            parse_packet(&data),
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[test]
    fn unknown_type_tag_fails() {
        let mut buf = Vec::new();
        push_padded_str(&mut buf, "/x");
        push_padded_str(&mut buf, ",q");
        assert!(matches!(
            parse_packet(&buf),
            Err(ProtocolError::UnsupportedTypeTag('q'))
        ));
    }
}
