use super::{PacError, Sid};
use chrono::{DateTime, TimeZone, Utc};
use nom::{bytes::complete::take, number::complete as number};

type NomError<'a> = nom::error::Error<&'a [u8]>;

// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;
const FILETIME_NEVER: u64 = 0x7fff_ffff_ffff_ffff;
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;
const MAX_SUB_AUTHORITIES: u8 = 15;

pub(crate) fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 || filetime >= FILETIME_NEVER {
        return None;
    }
    let ticks = filetime as i64 - FILETIME_UNIX_EPOCH;
    let secs = ticks.div_euclid(FILETIME_TICKS_PER_SEC);
    let nanos = ticks.rem_euclid(FILETIME_TICKS_PER_SEC) * 100;
    Utc.timestamp_opt(secs, nanos as u32).single()
}

pub(super) fn datetime_to_filetime(time: Option<DateTime<Utc>>) -> u64 {
    match time {
        Some(time) => {
            let ticks = time.timestamp() * FILETIME_TICKS_PER_SEC
                + i64::from(time.timestamp_subsec_nanos() / 100);
            (ticks + FILETIME_UNIX_EPOCH).max(0) as u64
        }
        None => FILETIME_NEVER,
    }
}

/// RPC_UNICODE_STRING as it appears inline: lengths and a referent pointer.
/// The characters follow later, in the deferred part of the stream.
#[derive(Debug, Clone, Copy)]
pub(super) struct UnicodeStringHeader {
    length: u16,
    pointer: u32,
}

/// Little-endian NDR reader over one PAC buffer. Alignment is relative to the
/// start of the buffer.
pub(super) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

macro_rules! read_int {
    ($fn:ident, $parser:ident, $type:ident) => {
        pub fn $fn(&mut self) -> Result<$type, PacError> {
            let (_, value) = number::$parser::<_, NomError<'_>>(&self.buf[self.pos..])
                .map_err(|_| PacError::Malformed(self.what))?;
            self.pos += std::mem::size_of::<$type>();
            Ok(value)
        }
    };
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    read_int!(u8, u8, u8);
    read_int!(u16, le_u16, u16);
    read_int!(u32, le_u32, u32);
    read_int!(u64, le_u64, u64);

    pub fn malformed(&self) -> PacError {
        PacError::Malformed(self.what)
    }

    pub fn take(&mut self, count: usize) -> Result<&'a [u8], PacError> {
        let (_, bytes) = take::<_, _, NomError<'_>>(count)(&self.buf[self.pos..])
            .map_err(|_| PacError::Malformed(self.what))?;
        self.pos += count;
        Ok(bytes)
    }

    pub fn align(&mut self, alignment: usize) -> Result<(), PacError> {
        let padding = (alignment - self.pos % alignment) % alignment;
        self.take(padding).map(|_| ())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn filetime(&mut self) -> Result<Option<DateTime<Utc>>, PacError> {
        let low = self.u32()?;
        let high = self.u32()?;
        Ok(filetime_to_datetime(u64::from(high) << 32 | u64::from(low)))
    }

    pub fn unicode_string_header(&mut self) -> Result<UnicodeStringHeader, PacError> {
        let length = self.u16()?;
        let _maximum_length = self.u16()?;
        let pointer = self.u32()?;
        if length % 2 != 0 {
            return Err(self.malformed());
        }
        Ok(UnicodeStringHeader { length, pointer })
    }

    /// The conformant varying array behind a non-null RPC_UNICODE_STRING.
    pub fn deferred_string(&mut self, header: UnicodeStringHeader) -> Result<String, PacError> {
        if header.pointer == 0 {
            return Ok(String::new());
        }
        self.align(4)?;
        let max_count = self.u32()?;
        let offset = self.u32()?;
        let actual_count = self.u32()?;
        if offset != 0
            || actual_count > max_count
            || u64::from(actual_count) * 2 != u64::from(header.length)
        {
            return Err(self.malformed());
        }
        let bytes = self.take(actual_count as usize * 2)?;
        let string = utf16le(bytes).ok_or_else(|| self.malformed())?;
        self.align(4)?;
        Ok(string)
    }

    /// A conformant array of `count` elements, `element_size` bytes each.
    pub fn conformant_array(&mut self, count: u32, element_size: usize) -> Result<&'a [u8], PacError> {
        self.align(4)?;
        if self.u32()? != count {
            return Err(self.malformed());
        }
        let length = (count as usize)
            .checked_mul(element_size)
            .ok_or_else(|| self.malformed())?;
        self.take(length)
    }

    /// RPC_SID preceded by its conformance count.
    pub fn deferred_sid(&mut self) -> Result<Sid, PacError> {
        self.align(4)?;
        let max_count = self.u32()?;
        let sid = self.sid()?;
        if max_count != sid.sub_authorities.len() as u32 {
            return Err(self.malformed());
        }
        Ok(sid)
    }

    /// The self-relative binary SID layout (MS-DTYP 2.4.2.2).
    pub fn sid(&mut self) -> Result<Sid, PacError> {
        let revision = self.u8()?;
        let count = self.u8()?;
        if revision != 1 || count > MAX_SUB_AUTHORITIES {
            return Err(self.malformed());
        }
        let authority = self
            .take(6)?
            .iter()
            .fold(0u64, |acc, byte| acc << 8 | u64::from(*byte));
        let mut sub_authorities = vec![];
        for _ in 0..count {
            sub_authorities.push(self.u32()?);
        }
        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }
}

pub(super) fn utf16le(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

pub(super) fn to_utf16le(string: &str) -> Vec<u8> {
    string.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

pub(super) fn sid_bytes(sid: &Sid) -> Vec<u8> {
    let mut buf = vec![sid.revision, sid.sub_authorities.len() as u8];
    buf.extend_from_slice(&sid.authority.to_be_bytes()[2..]);
    for sub_authority in &sid.sub_authorities {
        buf.extend_from_slice(&sub_authority.to_le_bytes());
    }
    buf
}

/// Little-endian NDR writer that hands out referent ids for pointers and
/// queues the pointed-to data for the deferred part of the stream.
#[derive(Default)]
pub(super) struct Writer {
    pub buf: Vec<u8>,
    next_referent: u32,
}

impl Writer {
    pub fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn align(&mut self, alignment: usize) {
        while self.buf.len() % alignment != 0 {
            self.buf.push(0);
        }
    }

    pub fn filetime(&mut self, time: Option<DateTime<Utc>>) {
        let filetime = datetime_to_filetime(time);
        self.u32(filetime as u32);
        self.u32((filetime >> 32) as u32);
    }

    /// Writes a referent id, or null when `present` is false.
    pub fn pointer(&mut self, present: bool) {
        if present {
            self.next_referent += 4;
            let referent = 0x0002_0000 + self.next_referent;
            self.u32(referent);
        } else {
            self.u32(0);
        }
    }

    pub fn unicode_string_header(&mut self, string: &str) {
        let length = (string.encode_utf16().count() * 2) as u16;
        self.u16(length);
        self.u16(length);
        self.pointer(!string.is_empty());
    }

    pub fn deferred_string(&mut self, string: &str) {
        if string.is_empty() {
            return;
        }
        let chars = string.encode_utf16().count() as u32;
        self.align(4);
        self.u32(chars);
        self.u32(0);
        self.u32(chars);
        self.bytes(&to_utf16le(string));
        self.align(4);
    }

    pub fn deferred_sid(&mut self, sid: &Sid) {
        self.align(4);
        self.u32(sid.sub_authorities.len() as u32);
        self.bytes(&sid_bytes(sid));
    }
}
