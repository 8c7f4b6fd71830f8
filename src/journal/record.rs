//! On-disk journal framing
//!
//! Header (fixed, at offset 0):
//! - Magic (8 bytes, `OBJSJRNL`)
//! - Version (u32 LE)
//! - Store fsid (16 bytes, uuid)
//! - Trimmed-through seq (u64 LE)
//! - Checksum (u32 LE) over the fields above
//!
//! Record:
//! - Record Length (u32 LE), total including this field and the checksum
//! - Seq (u64 LE)
//! - Payload (variable)
//! - Checksum (u32 LE) over length, seq and payload

use uuid::Uuid;

use super::checksum::{compute_checksum, verify_checksum};
use super::errors::{JournalError, JournalResult};

pub const MAGIC: [u8; 8] = *b"OBJSJRNL";
pub const VERSION: u32 = 1;
pub const HEADER_LEN: usize = 8 + 4 + 16 + 8 + 4;

/// len + seq + checksum
pub const MIN_RECORD_LEN: usize = 4 + 8 + 4;

/// Journal file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    pub version: u32,
    pub fsid: Uuid,
    /// Every record with seq at or below this is reclaimable
    pub trimmed_thru: u64,
}

impl JournalHeader {
    pub fn new(fsid: Uuid) -> Self {
        Self {
            version: VERSION,
            fsid,
            trimmed_thru: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..28].copy_from_slice(self.fsid.as_bytes());
        buf[28..36].copy_from_slice(&self.trimmed_thru.to_le_bytes());
        let checksum = compute_checksum(&buf[0..36]);
        buf[36..40].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> JournalResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(JournalError::corruption(format!(
                "Journal header truncated: {} bytes, need {}",
                data.len(),
                HEADER_LEN
            )));
        }
        if data[0..8] != MAGIC {
            return Err(JournalError::corruption("Bad journal magic"));
        }
        let stored = u32::from_le_bytes([data[36], data[37], data[38], data[39]]);
        if !verify_checksum(&data[0..36], stored) {
            return Err(JournalError::corruption("Journal header checksum mismatch"));
        }

        let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        if version != VERSION {
            return Err(JournalError::corruption(format!(
                "Unsupported journal version {}",
                version
            )));
        }
        let mut fsid = [0u8; 16];
        fsid.copy_from_slice(&data[12..28]);
        let mut trimmed = [0u8; 8];
        trimmed.copy_from_slice(&data[28..36]);

        Ok(Self {
            version,
            fsid: Uuid::from_bytes(fsid),
            trimmed_thru: u64::from_le_bytes(trimmed),
        })
    }
}

/// One journaled op
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub seq: u64,
    pub payload: Vec<u8>,
}

/// Outcome of decoding the bytes at one position
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// A valid record and the bytes it spans
    Record(JournalRecord, usize),
    /// An incomplete trailing record, never acknowledged
    Torn,
    /// A complete record that fails validation
    Corrupt(String),
}

impl JournalRecord {
    pub fn new(seq: u64, payload: Vec<u8>) -> Self {
        Self { seq, payload }
    }

    pub fn encoded_len(&self) -> usize {
        MIN_RECORD_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let record_len = self.encoded_len() as u32;
        let mut buf = Vec::with_capacity(record_len as usize);
        buf.extend_from_slice(&record_len.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        let checksum = compute_checksum(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decode the record at the start of `data`
    pub fn decode(data: &[u8]) -> Frame {
        if data.len() < 4 {
            return Frame::Torn;
        }
        let record_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        // A zeroed tail is space that was never written.
        if record_len == 0 {
            return Frame::Torn;
        }
        if record_len < MIN_RECORD_LEN {
            return Frame::Corrupt(format!("Invalid record length: {}", record_len));
        }
        if data.len() < record_len {
            return Frame::Torn;
        }

        let checksum_offset = record_len - 4;
        let stored = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed = compute_checksum(&data[0..checksum_offset]);
        if computed != stored {
            return Frame::Corrupt(format!(
                "Checksum mismatch: computed {:08x}, stored {:08x}",
                computed, stored
            ));
        }

        let mut seq = [0u8; 8];
        seq.copy_from_slice(&data[4..12]);
        Frame::Record(
            JournalRecord {
                seq: u64::from_le_bytes(seq),
                payload: data[12..checksum_offset].to_vec(),
            },
            record_len,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let record = JournalRecord::new(7, b"abc".to_vec());
        let bytes = record.encode();
        assert_eq!(bytes.len(), MIN_RECORD_LEN + 3);
        assert_eq!(&bytes[0..4], &(19u32).to_le_bytes());
        assert_eq!(&bytes[4..12], &7u64.to_le_bytes());
        assert_eq!(&bytes[12..15], b"abc");
        assert_eq!(JournalRecord::decode(&bytes), Frame::Record(record, 19));
    }

    #[test]
    fn test_truncated_record_is_torn() {
        let bytes = JournalRecord::new(1, vec![9u8; 32]).encode();
        assert_eq!(JournalRecord::decode(&bytes[..bytes.len() - 1]), Frame::Torn);
        assert_eq!(JournalRecord::decode(&bytes[..2]), Frame::Torn);
        assert_eq!(JournalRecord::decode(&[0u8; 64]), Frame::Torn);
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let mut bytes = JournalRecord::new(1, vec![9u8; 32]).encode();
        bytes[20] ^= 0xff;
        assert!(matches!(JournalRecord::decode(&bytes), Frame::Corrupt(_)));
    }

    #[test]
    fn test_short_length_is_corrupt() {
        let mut bytes = vec![0u8; 32];
        bytes[0] = 5;
        assert!(matches!(JournalRecord::decode(&bytes), Frame::Corrupt(_)));
    }

    #[test]
    fn test_header_validation() {
        let fsid = Uuid::new_v4();
        let mut header = JournalHeader::new(fsid);
        header.trimmed_thru = 99;
        let mut bytes = header.encode();
        assert_eq!(JournalHeader::decode(&bytes).unwrap(), header);

        bytes[30] ^= 1;
        let err = JournalHeader::decode(&bytes).unwrap_err();
        assert!(err.is_fatal());

        assert!(JournalHeader::decode(b"OBJSJRNL").is_err());
        assert!(JournalHeader::decode(&[0u8; HEADER_LEN]).is_err());
    }
}
