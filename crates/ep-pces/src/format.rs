//! # Segment File Format
//!
//! Exactly the wire format :
//!
//! ```text
//! Header: magic(4) | formatVersion(u32) | firstSeqNum(u64) | minAncientId(u64) | ancientMode(u8)
//! Records: repeat { len(u32) | event-proto-bytes(len) | seqNum(u64) | crc32(u32) }
//! Footer (on clean close): recordCount(u64) | maxAncientId(u64) | crc32(u32)
//! ```
//!
//! All integers big-endian. A missing footer indicates a crash; replay
//! tolerates a truncated final record by stopping at the first
//! CRC/length mismatch rather than erroring.

use std::io::{self, Read, Write};

use ep_types::{AncientMode, Event};

pub const MAGIC: [u8; 4] = *b"EPCS";
pub const FORMAT_VERSION: u32 = ep_types::PROTOCOL_VERSION as u32;

#[derive(Debug, Clone, Copy)]
pub struct SegmentHeader {
    pub first_seq_num: u64,
    pub min_ancient_id: u64,
    pub ancient_mode: AncientMode,
}

fn ancient_mode_to_byte(mode: AncientMode) -> u8 {
    match mode {
        AncientMode::Generation => 0,
        AncientMode::BirthRound => 1,
    }
}

fn byte_to_ancient_mode(byte: u8) -> io::Result<AncientMode> {
    match byte {
        0 => Ok(AncientMode::Generation),
        1 => Ok(AncientMode::BirthRound),
        other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown ancient mode byte {other}"))),
    }
}

impl SegmentHeader {
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_be_bytes())?;
        w.write_all(&self.first_seq_num.to_be_bytes())?;
        w.write_all(&self.min_ancient_id.to_be_bytes())?;
        w.write_all(&[ancient_mode_to_byte(self.ancient_mode)])?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad segment magic"));
        }
        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        let version = u32::from_be_bytes(buf4);
        if version != FORMAT_VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unsupported segment format version {version}")));
        }
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let first_seq_num = u64::from_be_bytes(buf8);
        r.read_exact(&mut buf8)?;
        let min_ancient_id = u64::from_be_bytes(buf8);
        let mut mode_byte = [0u8; 1];
        r.read_exact(&mut mode_byte)?;
        let ancient_mode = byte_to_ancient_mode(mode_byte[0])?;
        Ok(Self { first_seq_num, min_ancient_id, ancient_mode })
    }

    pub const ENCODED_LEN: usize = 4 + 4 + 8 + 8 + 1;
}

/// Writes one record: `len | event bytes | seqNum | crc32`. The CRC
/// covers the event bytes and the sequence number, so a corrupted
/// sequence number is caught just as a corrupted payload would be.
pub fn write_record(w: &mut impl Write, event: &Event, seq_num: u64) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let mut crc_input = payload.clone();
    crc_input.extend_from_slice(&seq_num.to_be_bytes());
    let crc = crc32fast::hash(&crc_input);

    w.write_all(&len.to_be_bytes())?;
    w.write_all(&payload)?;
    w.write_all(&seq_num.to_be_bytes())?;
    w.write_all(&crc.to_be_bytes())?;
    Ok(())
}

/// Reads one record. Returns `Ok(None)` on a clean EOF (no bytes
/// remain) or on a truncated/corrupt final record — both are treated
/// as "stop here", never as a hard error
pub fn read_record(r: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if r.read_exact(&mut payload).is_err() {
        return Ok(None);
    }
    let mut seq_buf = [0u8; 8];
    if r.read_exact(&mut seq_buf).is_err() {
        return Ok(None);
    }
    let seq_num = u64::from_be_bytes(seq_buf);
    let mut crc_buf = [0u8; 4];
    if r.read_exact(&mut crc_buf).is_err() {
        return Ok(None);
    }
    let stored_crc = u32::from_be_bytes(crc_buf);

    let mut crc_input = payload.clone();
    crc_input.extend_from_slice(&seq_num.to_be_bytes());
    if crc32fast::hash(&crc_input) != stored_crc {
        return Ok(None);
    }

    let event: Event = bincode::deserialize(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some((event, seq_num)))
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentFooter {
    pub record_count: u64,
    pub max_ancient_id: u64,
}

impl SegmentFooter {
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        let mut crc_input = Vec::with_capacity(16);
        crc_input.extend_from_slice(&self.record_count.to_be_bytes());
        crc_input.extend_from_slice(&self.max_ancient_id.to_be_bytes());
        let crc = crc32fast::hash(&crc_input);

        w.write_all(&self.record_count.to_be_bytes())?;
        w.write_all(&self.max_ancient_id.to_be_bytes())?;
        w.write_all(&crc.to_be_bytes())?;
        Ok(())
    }

    /// Returns `None` if the footer is absent or corrupt (a crash
    /// during the last write), matching its "a missing footer
    /// indicates a crash".
    pub fn read(r: &mut impl Read) -> Option<Self> {
        let mut record_count_buf = [0u8; 8];
        r.read_exact(&mut record_count_buf).ok()?;
        let mut max_ancient_buf = [0u8; 8];
        r.read_exact(&mut max_ancient_buf).ok()?;
        let mut crc_buf = [0u8; 4];
        r.read_exact(&mut crc_buf).ok()?;

        let record_count = u64::from_be_bytes(record_count_buf);
        let max_ancient_id = u64::from_be_bytes(max_ancient_buf);
        let stored_crc = u32::from_be_bytes(crc_buf);

        let mut crc_input = Vec::with_capacity(16);
        crc_input.extend_from_slice(&record_count_buf);
        crc_input.extend_from_slice(&max_ancient_buf);
        if crc32fast::hash(&crc_input) != stored_crc {
            return None;
        }
        Some(Self { record_count, max_ancient_id })
    }
}
