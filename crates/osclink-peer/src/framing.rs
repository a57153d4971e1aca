//! Stream framing
//!
//! OSC 1.0 prefixes every packet on a stream with its length as a 32-bit
//! big-endian integer. OSC 1.1 uses SLIP (RFC 1055) with an END byte on
//! both sides of each packet. Datagrams are never framed.

use crate::error::{PeerError, Result};

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

/// Largest length prefix accepted on an OSC 1.0 stream
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Stream framing flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Length-prefixed packets
    #[default]
    Osc10,
    /// SLIP-delimited packets
    Osc11,
}

impl Framing {
    /// Wrap one encoded packet for a stream
    pub fn encode(&self, packet: &[u8]) -> Result<Vec<u8>> {
        match self {
            Framing::Osc10 => {
                let len = u32::try_from(packet.len())
                    .ok()
                    .filter(|&len| len as usize <= MAX_FRAME_LEN)
                    .ok_or_else(|| {
                        PeerError::Encode(format!("packet of {} bytes is too large", packet.len()))
                    })?;
                let mut out = Vec::with_capacity(packet.len() + 4);
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(packet);
                Ok(out)
            }
            Framing::Osc11 => {
                let mut out = Vec::with_capacity(packet.len() + 2);
                out.push(END);
                for &byte in packet {
                    match byte {
                        END => out.extend_from_slice(&[ESC, ESC_END]),
                        ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
                        b => out.push(b),
                    }
                }
                out.push(END);
                Ok(out)
            }
        }
    }
}

/// Reassembles packets from stream reads of arbitrary size
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
        }
    }

    /// Feed bytes read from the stream and return every packet completed by
    /// them. An error leaves the stream unsynchronised.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);
        match self.framing {
            Framing::Osc10 => self.drain_length_prefixed(),
            Framing::Osc11 => self.drain_slip(),
        }
    }

    /// Bytes received but not yet part of a complete packet
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn drain_length_prefixed(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();
        let mut offset = 0;
        while self.buf.len() - offset >= 4 {
            let mut prefix = [0u8; 4];
            prefix.copy_from_slice(&self.buf[offset..offset + 4]);
            let len = u32::from_be_bytes(prefix) as usize;
            if len > MAX_FRAME_LEN {
                return Err(PeerError::Decode(format!(
                    "frame length {} exceeds {}",
                    len, MAX_FRAME_LEN
                )));
            }
            if self.buf.len() - offset - 4 < len {
                break;
            }
            let start = offset + 4;
            packets.push(self.buf[start..start + len].to_vec());
            offset = start + len;
        }
        self.buf.drain(..offset);
        Ok(packets)
    }

    fn drain_slip(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();
        while let Some(end) = self.buf.iter().position(|&b| b == END) {
            let raw: Vec<u8> = self.buf.drain(..=end).collect();
            let body = &raw[..raw.len() - 1];
            if body.is_empty() {
                continue;
            }
            packets.push(unescape(body)?);
        }
        Ok(packets)
    }
}

fn unescape(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESC {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(&ESC_END) => out.push(END),
            Some(&ESC_ESC) => out.push(ESC),
            Some(&other) => {
                return Err(PeerError::Decode(format!(
                    "invalid SLIP escape 0x{:02X}",
                    other
                )))
            }
            None => return Err(PeerError::Decode("truncated SLIP escape".to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_layout() {
        let framed = Framing::Osc10.encode(b"abcd").unwrap();
        assert_eq!(framed, vec![0, 0, 0, 4, b'a', b'b', b'c', b'd']);
    }

    #[test]
    fn test_length_prefixed_split_reads() {
        let mut stream = Framing::Osc10.encode(b"first___").unwrap();
        stream.extend(Framing::Osc10.encode(b"second__").unwrap());

        let mut decoder = FrameDecoder::new(Framing::Osc10);
        assert!(decoder.push(&stream[..3]).unwrap().is_empty());
        assert_eq!(decoder.push(&stream[3..14]).unwrap(), vec![b"first___".to_vec()]);
        assert_eq!(decoder.push(&stream[14..]).unwrap(), vec![b"second__".to_vec()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new(Framing::Osc10);
        let err = decoder.push(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, PeerError::Decode(_)));
    }

    #[test]
    fn test_slip_escapes_delimiters() {
        let framed = Framing::Osc11.encode(&[1, END, 2, ESC, 3]).unwrap();
        assert_eq!(framed, vec![END, 1, ESC, ESC_END, 2, ESC, ESC_ESC, 3, END]);

        let mut decoder = FrameDecoder::new(Framing::Osc11);
        assert_eq!(decoder.push(&framed).unwrap(), vec![vec![1, END, 2, ESC, 3]]);
    }

    #[test]
    fn test_slip_packets_across_reads() {
        let mut stream = Framing::Osc11.encode(b"one").unwrap();
        stream.extend(Framing::Osc11.encode(b"two").unwrap());

        let mut decoder = FrameDecoder::new(Framing::Osc11);
        assert_eq!(decoder.push(&stream[..5]).unwrap(), vec![b"one".to_vec()]);
        assert!(decoder.push(&stream[5..8]).unwrap().is_empty());
        assert_eq!(decoder.push(&stream[8..]).unwrap(), vec![b"two".to_vec()]);
    }

    #[test]
    fn test_slip_bad_escape() {
        let mut decoder = FrameDecoder::new(Framing::Osc11);
        assert!(decoder.push(&[END, ESC, 0x01, END]).is_err());
    }
}
