use super::{KeytabEntry, KeytabError};
use crate::{Enctype, Keyblock, NameType, Principal};
use nom::{
    bytes::complete::take,
    number::{complete as number, Endianness},
};

const FILE_FIRST_BYTE: u8 = 5;

type NomError<'a> = nom::error::Error<&'a [u8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormatVersion {
    V1 = 1,
    V2,
}

impl TryFrom<u8> for FileFormatVersion {
    type Error = KeytabError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            _ => Err(KeytabError::UnsupportedVersion),
        }
    }
}

// There are two versions of the file format used by the FILE keytab type.
// The first byte of the file always has the value 5, and the value of the
// second byte contains the version number (1 or 2).
fn read_version(input: &[u8]) -> Result<(FileFormatVersion, &[u8]), KeytabError> {
    match input {
        [FILE_FIRST_BYTE, version, rest @ ..] => Ok((FileFormatVersion::try_from(*version)?, rest)),
        [_, _, ..] => Err(KeytabError::UnsupportedVersion),
        _ => Err(KeytabError::Truncated),
    }
}

// Version 1 of the file format uses native byte order for integer
// representations. Version 2 always uses big-endian byte order.
fn endianness(version: FileFormatVersion) -> Endianness {
    match version {
        FileFormatVersion::V1 => Endianness::Native,
        FileFormatVersion::V2 => Endianness::Big,
    }
}

/// Parses a keytab blob. The input is untrusted: every length is checked
/// against the bytes that remain before it is used.
///
/// After the two-byte version indicator, the file contains a sequence of
/// signed 32-bit record lengths followed by key records or holes. A positive
/// record length indicates a key entry whose size is equal to or less than the
/// record length. A negative length indicates a zero-filled hole whose size is
/// the inverse of the length. A length of 0 indicates the end of the file.
pub fn parse(bytes: &[u8]) -> Result<Vec<KeytabEntry>, KeytabError> {
    let (version, mut input) = read_version(bytes)?;
    let endianness = endianness(version);
    let mut entries = vec![];
    while !input.is_empty() {
        let mut reader = Reader::new(input, endianness);
        let size = reader.read_i32()?;
        input = reader.input;
        match size {
            0 => break,
            i32::MIN => return Err(KeytabError::MalformedEntry),
            size if size < 0 => {
                let hole = size.unsigned_abs() as usize;
                if hole > input.len() {
                    return Err(KeytabError::Truncated);
                }
                input = &input[hole..];
            }
            size => {
                let size = size as usize;
                if size > input.len() {
                    return Err(KeytabError::Truncated);
                }
                let (record, rest) = input.split_at(size);
                let entry = read_entry(record, version).map_err(|e| match e {
                    KeytabError::Truncated => KeytabError::MalformedEntry,
                    e => e,
                })?;
                entries.push(entry);
                input = rest;
            }
        }
    }
    Ok(entries)
}

// Key entries use the following informal grammar:
//
// entry ::=
//     principal
//     timestamp (32 bits)
//     key version (8 bits)
//     enctype (16 bits)
//     key length (16 bits)
//     key contents
//     key version (32 bits) [in release 1.14 and later]
// principal ::=
//     count of components (16 bits) [includes realm in version 1]
//     realm (data)
//     component1 (data)
//     component2 (data)
//     ...
//     name type (32 bits) [omitted in version 1]
// data ::=
//     length (16 bits)
//     value (length bytes)
//
// The 32-bit key version overrides the 8-bit key version. It is present when
// at least 4 bytes remain in the record and its value is non-zero.
fn read_entry(record: &[u8], version: FileFormatVersion) -> Result<KeytabEntry, KeytabError> {
    let mut reader = Reader::new(record, endianness(version));

    let principal = reader.read_principal(version)?;
    let timestamp = reader.read_u32()?;
    let mut vno = reader.read_u8()? as u32;
    let enctype = Enctype(reader.read_i16()?.into());
    let contents = reader.read_data()?;

    if reader.input.len() >= 4 {
        let vno32 = reader.read_u32()?;
        if vno32 != 0 {
            vno = vno32;
        }
    }

    Ok(KeytabEntry {
        principal,
        timestamp,
        vno,
        key: Keyblock { enctype, contents },
    })
}

/// Writes entries in format version 2.
pub fn serialize(entries: &[KeytabEntry]) -> Result<Vec<u8>, KeytabError> {
    let mut buf = vec![FILE_FIRST_BYTE, FileFormatVersion::V2 as u8];
    for entry in entries {
        let record = write_entry(entry)?;
        let size = i32::try_from(record.len()).map_err(|_| KeytabError::MalformedEntry)?;
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(&record);
    }
    Ok(buf)
}

fn write_entry(entry: &KeytabEntry) -> Result<Vec<u8>, KeytabError> {
    let mut record = vec![];
    let count =
        u16::try_from(entry.principal.components.len()).map_err(|_| KeytabError::MalformedEntry)?;
    record.extend_from_slice(&count.to_be_bytes());
    write_data(&mut record, &entry.principal.realm)?;
    for component in &entry.principal.components {
        write_data(&mut record, component)?;
    }
    record.extend_from_slice(&entry.principal.name_type.0.to_be_bytes());
    record.extend_from_slice(&entry.timestamp.to_be_bytes());
    record.push(u8::try_from(entry.vno).unwrap_or(0));
    let enctype = i16::try_from(entry.key.enctype.0).map_err(|_| KeytabError::MalformedEntry)?;
    record.extend_from_slice(&enctype.to_be_bytes());
    write_data(&mut record, &entry.key.contents)?;
    record.extend_from_slice(&entry.vno.to_be_bytes());
    Ok(record)
}

fn write_data(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), KeytabError> {
    let length = u16::try_from(data.len()).map_err(|_| KeytabError::MalformedEntry)?;
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

struct Reader<'a> {
    input: &'a [u8],
    endianness: Endianness,
}

macro_rules! read_int {
    ($fn:ident, $type:ident) => {
        fn $fn(&mut self) -> Result<$type, KeytabError> {
            let (rest, value) = number::$type::<_, NomError<'_>>(self.endianness)(self.input)
                .map_err(|_| KeytabError::Truncated)?;
            self.input = rest;
            Ok(value)
        }
    };
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8], endianness: Endianness) -> Self {
        Self { input, endianness }
    }

    read_int!(read_u16, u16);
    read_int!(read_i16, i16);
    read_int!(read_u32, u32);
    read_int!(read_i32, i32);

    fn read_u8(&mut self) -> Result<u8, KeytabError> {
        let (rest, value) =
            number::u8::<_, NomError<'_>>(self.input).map_err(|_| KeytabError::Truncated)?;
        self.input = rest;
        Ok(value)
    }

    fn read_data(&mut self) -> Result<Vec<u8>, KeytabError> {
        let size = match self.read_u16()? {
            0 => return Err(KeytabError::MalformedEntry),
            size => size as usize,
        };
        let (rest, data) =
            take::<_, _, NomError<'_>>(size)(self.input).map_err(|_| KeytabError::Truncated)?;
        self.input = rest;
        Ok(data.to_vec())
    }

    fn read_principal(&mut self, version: FileFormatVersion) -> Result<Principal, KeytabError> {
        let component_count = match (self.read_u16()?, version) {
            (count, FileFormatVersion::V1) if count > 1 => count - 1,
            (count, FileFormatVersion::V2) if count > 0 => count,
            _ => return Err(KeytabError::MalformedEntry),
        };

        let realm = self.read_data()?;
        let mut components = vec![];
        for _ in 0..component_count {
            components.push(self.read_data()?);
        }

        let name_type = match version {
            FileFormatVersion::V1 => NameType::UNKNOWN,
            FileFormatVersion::V2 => NameType(self.read_i32()?),
        };

        Ok(Principal {
            realm,
            components,
            name_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(components: &[&str], vno: u32, enctype: Enctype, key: &[u8]) -> KeytabEntry {
        KeytabEntry {
            principal: Principal::new(components, "EXAMPLE.COM"),
            timestamp: 1_700_000_000,
            vno,
            key: Keyblock::new(enctype, key.to_vec()),
        }
    }

    fn sample_entries() -> Vec<KeytabEntry> {
        vec![
            entry(
                &["HTTP", "vault.example.com"],
                3,
                Enctype::AES256_CTS_HMAC_SHA1_96,
                &[0x11; 32],
            ),
            entry(
                &["HTTP", "vault.example.com"],
                3,
                Enctype::ARCFOUR_HMAC,
                &[0x22; 16],
            ),
            entry(&["HOST$"], 300, Enctype::AES128_CTS_HMAC_SHA1_96, &[0x33; 16]),
        ]
    }

    #[test]
    fn test_serialize_then_parse_is_identity() {
        let entries = sample_entries();
        let bytes = serialize(&entries).unwrap();
        assert_eq!(&bytes[..2], &[5, 2]);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, entries);
        assert_eq!(serialize(&parsed).unwrap(), bytes);
    }

    #[test]
    fn test_parse_version_1_native_order() {
        let mut record = vec![];
        // V1 counts the realm as a component
        record.extend_from_slice(&3u16.to_ne_bytes());
        for data in [&b"EXAMPLE.COM"[..], b"HTTP", b"vault.example.com"] {
            record.extend_from_slice(&(data.len() as u16).to_ne_bytes());
            record.extend_from_slice(data);
        }
        record.extend_from_slice(&1_700_000_000u32.to_ne_bytes());
        record.push(7);
        record.extend_from_slice(&0x17i16.to_ne_bytes());
        record.extend_from_slice(&16u16.to_ne_bytes());
        record.extend_from_slice(&[0x44; 16]);

        let mut bytes = vec![5, 1];
        bytes.extend_from_slice(&(record.len() as i32).to_ne_bytes());
        bytes.extend_from_slice(&record);

        let entries = parse(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].vno, 7);
        assert_eq!(entries[0].key.enctype, Enctype::ARCFOUR_HMAC);
        assert_eq!(entries[0].principal.name_type, NameType::UNKNOWN);
        assert_eq!(
            entries[0].principal.to_string(),
            "HTTP/vault.example.com@EXAMPLE.COM"
        );
    }

    #[test]
    fn test_parse_skips_holes_and_stops_at_zero_length() {
        let entries = sample_entries();
        let bytes = serialize(&entries[..1]).unwrap();
        let mut holed = bytes[..2].to_vec();
        holed.extend_from_slice(&(-6i32).to_be_bytes());
        holed.extend_from_slice(&[0; 6]);
        holed.extend_from_slice(&bytes[2..]);
        holed.extend_from_slice(&0i32.to_be_bytes());
        holed.extend_from_slice(b"trailing garbage after end marker");
        assert_eq!(parse(&holed).unwrap(), entries[..1].to_vec());
    }

    #[test]
    fn test_parse_record_larger_than_entry() {
        let entries = sample_entries();
        let bytes = serialize(&entries[..1]).unwrap();
        let size = i32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let mut padded = bytes[..2].to_vec();
        padded.extend_from_slice(&(size + 8).to_be_bytes());
        padded.extend_from_slice(&bytes[6..]);
        padded.extend_from_slice(&[0; 8]);
        assert_eq!(parse(&padded).unwrap(), entries[..1].to_vec());
    }

    #[test]
    fn test_zero_vno32_keeps_8_bit_vno() {
        let mut bytes = serialize(&sample_entries()[..1]).unwrap();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&0u32.to_be_bytes());
        assert_eq!(parse(&bytes).unwrap()[0].vno, 3);
    }

    #[test]
    fn test_bad_version() {
        assert_eq!(parse(&[5, 3, 0, 0]), Err(KeytabError::UnsupportedVersion));
        assert_eq!(parse(&[4, 2]), Err(KeytabError::UnsupportedVersion));
        assert_eq!(parse(&[5]), Err(KeytabError::Truncated));
        assert_eq!(parse(&[]), Err(KeytabError::Truncated));
    }

    #[test]
    fn test_every_truncation_is_rejected_or_ends_on_a_record_boundary() {
        let entries = sample_entries();
        let bytes = serialize(&entries).unwrap();
        let mut boundaries = vec![2];
        let mut offset = 2;
        while offset < bytes.len() {
            let size = i32::from_be_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]);
            offset += 4 + size as usize;
            boundaries.push(offset);
        }
        for cut in 0..bytes.len() {
            let result = parse(&bytes[..cut]);
            if let Some(n) = boundaries.iter().position(|b| *b == cut) {
                assert_eq!(result.unwrap().len(), n, "cut at {}", cut);
            } else {
                assert!(result.is_err(), "cut at {}", cut);
            }
        }
    }

    #[test]
    fn test_corrupted_lengths_never_read_out_of_bounds() {
        let bytes = serialize(&sample_entries()).unwrap();
        for position in 2..bytes.len() {
            for value in [0x00, 0x01, 0x7f, 0x80, 0xff] {
                let mut corrupted = bytes.clone();
                corrupted[position] = value;
                let _ = parse(&corrupted);
            }
        }
        for _ in 0..256 {
            let mut noise = vec![5, 2];
            noise.extend((0..rand::random::<u8>()).map(|_| rand::random::<u8>()));
            let _ = parse(&noise);
        }
    }

    #[test]
    fn test_zero_length_key_is_malformed() {
        let mut entry = sample_entries().remove(0);
        entry.key.contents.clear();
        let bytes = serialize(&[entry]).unwrap();
        assert_eq!(parse(&bytes), Err(KeytabError::MalformedEntry));
    }
}
