use std::collections::BTreeMap;

use thiserror::Error;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"VPSN";
pub const SNAPSHOT_FORMAT_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

const HEADER_LEN: usize = 4 + 4 + 4 + 4;
const FIELD_HEADER_LEN: usize = 2 + 4;

pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("unexpected end of snapshot data")]
    UnexpectedEof,

    #[error("invalid snapshot magic")]
    InvalidMagic,

    #[error("unsupported snapshot format version {0}")]
    UnsupportedFormatVersion(SnapshotVersion),

    #[error("device id mismatch (expected {expected:?}, found {found:?})")]
    DeviceIdMismatch { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported device major version {found} (supported: {supported})")]
    UnsupportedDeviceMajorVersion { found: u16, supported: u16 },

    #[error("duplicate field tag {0}")]
    DuplicateFieldTag(u16),

    #[error("invalid field encoding: {0}")]
    InvalidFieldEncoding(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotVersion {
    pub major: u16,
    pub minor: u16,
}

impl SnapshotVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub format_version: SnapshotVersion,
    pub device_id: [u8; 4],
    pub device_version: SnapshotVersion,
}

/// Builds a device snapshot. Fields are emitted sorted by tag regardless of insertion order.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    device_id: [u8; 4],
    device_version: SnapshotVersion,
    fields: BTreeMap<u16, Vec<u8>>,
}

impl SnapshotWriter {
    pub fn new(device_id: [u8; 4], device_version: SnapshotVersion) -> Self {
        Self {
            device_id,
            device_version,
            fields: BTreeMap::new(),
        }
    }

    /// Adds a raw field. Writing the same tag twice keeps the last value.
    pub fn field_bytes(&mut self, tag: u16, bytes: Vec<u8>) {
        self.fields.insert(tag, bytes);
    }

    pub fn field_u8(&mut self, tag: u16, v: u8) {
        self.field_bytes(tag, vec![v]);
    }

    pub fn field_bool(&mut self, tag: u16, v: bool) {
        self.field_u8(tag, u8::from(v));
    }

    pub fn field_u16(&mut self, tag: u16, v: u16) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_u32(&mut self, tag: u16, v: u32) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn field_u64(&mut self, tag: u16, v: u64) {
        self.field_bytes(tag, v.to_le_bytes().to_vec());
    }

    pub fn finish(self) -> Vec<u8> {
        let body_len: usize = self
            .fields
            .values()
            .map(|v| FIELD_HEADER_LEN + v.len())
            .sum();
        let mut out = Vec::with_capacity(HEADER_LEN + body_len);
        out.extend_from_slice(&SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.major.to_le_bytes());
        out.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.minor.to_le_bytes());
        out.extend_from_slice(&self.device_id);
        out.extend_from_slice(&self.device_version.major.to_le_bytes());
        out.extend_from_slice(&self.device_version.minor.to_le_bytes());
        for (tag, value) in self.fields {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(&value);
        }
        out
    }
}

/// Parsed view over a device snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotReader<'a> {
    header: SnapshotHeader,
    fields: BTreeMap<u16, &'a [u8]>,
}

impl<'a> SnapshotReader<'a> {
    pub fn parse(bytes: &'a [u8], expected_device_id: [u8; 4]) -> SnapshotResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(SnapshotError::UnexpectedEof);
        }
        if bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let format_version = SnapshotVersion::new(le_u16(&bytes[4..6]), le_u16(&bytes[6..8]));
        if format_version.major != SNAPSHOT_FORMAT_VERSION.major {
            return Err(SnapshotError::UnsupportedFormatVersion(format_version));
        }
        let mut device_id = [0u8; 4];
        device_id.copy_from_slice(&bytes[8..12]);
        if device_id != expected_device_id {
            return Err(SnapshotError::DeviceIdMismatch {
                expected: expected_device_id,
                found: device_id,
            });
        }
        let device_version = SnapshotVersion::new(le_u16(&bytes[12..14]), le_u16(&bytes[14..16]));

        let mut fields = BTreeMap::new();
        let mut rest = &bytes[HEADER_LEN..];
        while !rest.is_empty() {
            if rest.len() < FIELD_HEADER_LEN {
                return Err(SnapshotError::UnexpectedEof);
            }
            let tag = le_u16(&rest[0..2]);
            let len = u32::from_le_bytes([rest[2], rest[3], rest[4], rest[5]]) as usize;
            rest = &rest[FIELD_HEADER_LEN..];
            if rest.len() < len {
                return Err(SnapshotError::UnexpectedEof);
            }
            let (value, tail) = rest.split_at(len);
            if fields.insert(tag, value).is_some() {
                return Err(SnapshotError::DuplicateFieldTag(tag));
            }
            rest = tail;
        }

        Ok(Self {
            header: SnapshotHeader {
                format_version,
                device_id,
                device_version,
            },
            fields,
        })
    }

    pub fn header(&self) -> SnapshotHeader {
        self.header
    }

    pub fn ensure_device_major(&self, supported: u16) -> SnapshotResult<()> {
        let found = self.header.device_version.major;
        if found != supported {
            return Err(SnapshotError::UnsupportedDeviceMajorVersion { found, supported });
        }
        Ok(())
    }

    pub fn bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields.get(&tag).copied()
    }

    pub fn u8(&self, tag: u16) -> SnapshotResult<Option<u8>> {
        self.fixed::<1>(tag, "u8").map(|v| v.map(|b| b[0]))
    }

    pub fn bool(&self, tag: u16) -> SnapshotResult<Option<bool>> {
        match self.u8(tag)? {
            None => Ok(None),
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            Some(_) => Err(SnapshotError::InvalidFieldEncoding("bool")),
        }
    }

    pub fn u16(&self, tag: u16) -> SnapshotResult<Option<u16>> {
        self.fixed::<2>(tag, "u16").map(|v| v.map(u16::from_le_bytes))
    }

    pub fn u32(&self, tag: u16) -> SnapshotResult<Option<u32>> {
        self.fixed::<4>(tag, "u32").map(|v| v.map(u32::from_le_bytes))
    }

    pub fn u64(&self, tag: u16) -> SnapshotResult<Option<u64>> {
        self.fixed::<8>(tag, "u64").map(|v| v.map(u64::from_le_bytes))
    }

    fn fixed<const N: usize>(&self, tag: u16, what: &'static str) -> SnapshotResult<Option<[u8; N]>> {
        let Some(bytes) = self.bytes(tag) else {
            return Ok(None);
        };
        let arr: [u8; N] = bytes
            .try_into()
            .map_err(|_| SnapshotError::InvalidFieldEncoding(what))?;
        Ok(Some(arr))
    }
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: [u8; 4] = *b"TEST";
    const V1: SnapshotVersion = SnapshotVersion::new(1, 2);

    #[test]
    fn fields_are_emitted_in_tag_order() {
        let mut a = SnapshotWriter::new(ID, V1);
        a.field_u8(2, 0xAA);
        a.field_u16(1, 0x1234);

        let mut b = SnapshotWriter::new(ID, V1);
        b.field_u16(1, 0x1234);
        b.field_u8(2, 0xAA);

        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn reader_returns_typed_fields_and_skips_missing() {
        let mut w = SnapshotWriter::new(ID, V1);
        w.field_u64(1, u64::MAX - 3);
        w.field_bool(2, true);
        w.field_bytes(9, vec![1, 2, 3]);
        let bytes = w.finish();

        let r = SnapshotReader::parse(&bytes, ID).unwrap();
        assert_eq!(r.header().device_version, V1);
        assert_eq!(r.u64(1).unwrap(), Some(u64::MAX - 3));
        assert_eq!(r.bool(2).unwrap(), Some(true));
        assert_eq!(r.bytes(9), Some(&[1u8, 2, 3][..]));
        assert_eq!(r.u32(42).unwrap(), None);
    }

    #[test]
    fn wrong_width_is_an_encoding_error() {
        let mut w = SnapshotWriter::new(ID, V1);
        w.field_u8(1, 7);
        let bytes = w.finish();

        let r = SnapshotReader::parse(&bytes, ID).unwrap();
        assert_eq!(
            r.u16(1).unwrap_err(),
            SnapshotError::InvalidFieldEncoding("u16")
        );
    }

    #[test]
    fn header_is_validated() {
        let bytes = SnapshotWriter::new(ID, V1).finish();

        assert_eq!(
            SnapshotReader::parse(&bytes, *b"OTHR").unwrap_err(),
            SnapshotError::DeviceIdMismatch {
                expected: *b"OTHR",
                found: ID
            }
        );

        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 0xFF;
        assert_eq!(
            SnapshotReader::parse(&bad_magic, ID).unwrap_err(),
            SnapshotError::InvalidMagic
        );

        assert_eq!(
            SnapshotReader::parse(&bytes[..HEADER_LEN - 1], ID).unwrap_err(),
            SnapshotError::UnexpectedEof
        );

        let r = SnapshotReader::parse(&bytes, ID).unwrap();
        assert!(r.ensure_device_major(1).is_ok());
        assert_eq!(
            r.ensure_device_major(2).unwrap_err(),
            SnapshotError::UnsupportedDeviceMajorVersion {
                found: 1,
                supported: 2
            }
        );
    }

    #[test]
    fn truncated_field_is_rejected() {
        let mut w = SnapshotWriter::new(ID, V1);
        w.field_u32(1, 5);
        let bytes = w.finish();
        assert_eq!(
            SnapshotReader::parse(&bytes[..bytes.len() - 1], ID).unwrap_err(),
            SnapshotError::UnexpectedEof
        );
    }
}
