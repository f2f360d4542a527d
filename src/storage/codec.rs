//! Wire codec for the flat credential store layout.
//!
//! Little-endian, fixed-width fields for compatibility with
//! already-provisioned devices:
//!
//! ```text
//! count:u8
//! per record: ssid[33] (zero-padded), cipher_len:u16, cipher[64],
//!             gateway:u32, subnet:u32, address:u32
//! ```
//!
//! Every read is bounds-checked; a record whose fields cannot be fully
//! read, or whose ciphertext length violates the block invariant, decodes
//! to `None`.

use std::net::Ipv4Addr;

use crate::creds::{
    ciphertext_len_is_valid, CredentialRecord, StaticIpConfig, CIPHERTEXT_FIELD_LEN, MAX_SSID_LEN,
};

/// SSID field width: 32 name bytes plus a terminating zero.
pub(crate) const SSID_FIELD_LEN: usize = MAX_SSID_LEN + 1;

/// Serialized record width in bytes.
pub(crate) const RECORD_WIRE_LEN: usize = SSID_FIELD_LEN + 2 + CIPHERTEXT_FIELD_LEN + 4 + 4 + 4;

/// Addresses are persisted as raw 32-bit integers in octet order.
pub(crate) fn ip_to_raw(ip: Ipv4Addr) -> u32 {
    u32::from_le_bytes(ip.octets())
}

pub(crate) fn raw_to_ip(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_le_bytes())
}

/// Bounds-checked sequential reader over a byte buffer.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn read_u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub(crate) fn read_u16_le(&mut self) -> Option<u16> {
        let bytes = self.read_bytes(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32_le(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }
}

/// Sequential writer producing the little-endian layout.
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn push_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn push_u16_le(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn push_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Append one record in wire format.
pub(crate) fn encode_record(record: &CredentialRecord, writer: &mut ByteWriter) {
    let mut ssid_field = [0u8; SSID_FIELD_LEN];
    let ssid = record.ssid().as_bytes();
    let ssid_len = ssid.len().min(MAX_SSID_LEN);
    ssid_field[..ssid_len].copy_from_slice(&ssid[..ssid_len]);
    writer.push_bytes(&ssid_field);

    let mut cipher_field = [0u8; CIPHERTEXT_FIELD_LEN];
    let cipher = record.ciphertext();
    let cipher_len = cipher.len().min(CIPHERTEXT_FIELD_LEN);
    cipher_field[..cipher_len].copy_from_slice(&cipher[..cipher_len]);
    writer.push_u16_le(cipher_len as u16);
    writer.push_bytes(&cipher_field);

    let ip = record.ip_config();
    writer.push_u32_le(ip_to_raw(ip.gateway));
    writer.push_u32_le(ip_to_raw(ip.subnet));
    writer.push_u32_le(ip_to_raw(ip.address));
}

/// Decode one record. `None` the instant any field cannot be fully read
/// or fails validation, so partial-record corruption never cascades.
pub(crate) fn decode_record(reader: &mut ByteReader<'_>) -> Option<CredentialRecord> {
    let ssid_field = reader.read_bytes(SSID_FIELD_LEN)?;
    let name_len = ssid_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(MAX_SSID_LEN)
        .min(MAX_SSID_LEN);
    let ssid = std::str::from_utf8(&ssid_field[..name_len]).ok()?;
    if ssid.is_empty() {
        return None;
    }

    let cipher_len = reader.read_u16_le()? as usize;
    let cipher_field = reader.read_bytes(CIPHERTEXT_FIELD_LEN)?;
    if !ciphertext_len_is_valid(cipher_len) {
        return None;
    }
    let cipher = cipher_field[..cipher_len].to_vec();

    let gateway = raw_to_ip(reader.read_u32_le()?);
    let subnet = raw_to_ip(reader.read_u32_le()?);
    let address = raw_to_ip(reader.read_u32_le()?);

    Some(CredentialRecord::from_parts(
        ssid.to_string(),
        cipher,
        StaticIpConfig::new(address, gateway, subnet),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> CredentialRecord {
        CredentialRecord::from_parts(
            "Office".to_string(),
            vec![0xC3; 32],
            StaticIpConfig::new(
                Ipv4Addr::new(192, 168, 1, 50),
                Ipv4Addr::new(192, 168, 1, 1),
                Ipv4Addr::new(255, 255, 255, 0),
            ),
        )
    }

    #[test]
    fn test_record_wire_length() {
        let mut writer = ByteWriter::new();
        encode_record(&sample_record(), &mut writer);
        assert_eq!(writer.into_inner().len(), RECORD_WIRE_LEN);
    }

    #[test]
    fn test_record_roundtrip() {
        let record = sample_record();
        let mut writer = ByteWriter::new();
        encode_record(&record, &mut writer);
        let bytes = writer.into_inner();

        let mut reader = ByteReader::new(&bytes);
        let decoded = decode_record(&mut reader).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_ip_raw_octet_order() {
        let ip = Ipv4Addr::new(192, 168, 4, 1);
        let raw = ip_to_raw(ip);
        assert_eq!(raw.to_le_bytes(), [192, 168, 4, 1]);
        assert_eq!(raw_to_ip(raw), ip);
    }

    #[test]
    fn test_truncated_record_decodes_to_none() {
        let mut writer = ByteWriter::new();
        encode_record(&sample_record(), &mut writer);
        let bytes = writer.into_inner();

        // Every proper prefix must fail rather than yield a partial record.
        for cut in [1, SSID_FIELD_LEN, SSID_FIELD_LEN + 2, RECORD_WIRE_LEN - 1] {
            let mut reader = ByteReader::new(&bytes[..cut]);
            assert!(decode_record(&mut reader).is_none(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_invalid_cipher_len_rejected() {
        for bad_len in [0u16, 15, 17, 65] {
            let mut writer = ByteWriter::new();
            encode_record(&sample_record(), &mut writer);
            let mut bytes = writer.into_inner();
            bytes[SSID_FIELD_LEN..SSID_FIELD_LEN + 2].copy_from_slice(&bad_len.to_le_bytes());
            let mut reader = ByteReader::new(&bytes);
            assert!(decode_record(&mut reader).is_none(), "cipher_len {}", bad_len);
        }
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut writer = ByteWriter::new();
        encode_record(&sample_record(), &mut writer);
        let mut bytes = writer.into_inner();
        bytes[0] = 0; // zero-length name
        let mut reader = ByteReader::new(&bytes);
        assert!(decode_record(&mut reader).is_none());
    }

    #[test]
    fn test_reader_bounds() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u16_le(), Some(0x0201));
        assert_eq!(reader.read_u16_le(), None);
        assert_eq!(reader.read_u8(), Some(3));
        assert_eq!(reader.read_u8(), None);
    }
}
