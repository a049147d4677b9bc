use super::TicketError;
use crate::{NameType, Principal};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use der_parser::{
    asn1_rs::{Any, Class, FromDer, Tag},
    ber::BerObjectContent,
    der::{parse_der_generalstring, parse_der_i32, parse_der_octetstring, parse_der_u32},
};

const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

pub(super) type DerResult<T> = Result<T, TicketError>;

fn next_any<'a>(input: &'a [u8], what: &'static str) -> DerResult<(&'a [u8], Any<'a>)> {
    Any::from_der(input).map_err(|_| TicketError::Malformed(what))
}

/// The members of a SEQUENCE whose fields carry explicit context tags, the
/// shape of every Kerberos message.
pub(super) struct Fields<'a> {
    fields: Vec<(u32, &'a [u8])>,
    what: &'static str,
}

impl<'a> Fields<'a> {
    /// `[APPLICATION tag] SEQUENCE { ... }`
    pub fn application(input: &'a [u8], tag: u32, what: &'static str) -> DerResult<Self> {
        let (_, any) = next_any(input, what)?;
        if any.class() != Class::Application || any.tag() != Tag(tag) {
            return Err(TicketError::Malformed(what));
        }
        Self::sequence(any.data, what)
    }

    pub fn sequence(input: &'a [u8], what: &'static str) -> DerResult<Self> {
        let (_, any) = next_any(input, what)?;
        if any.class() != Class::Universal || any.tag() != Tag::Sequence {
            return Err(TicketError::Malformed(what));
        }
        let mut body = any.data;
        let mut fields: Vec<(u32, &'a [u8])> = vec![];
        while !body.is_empty() {
            let (rest, field) = next_any(body, what)?;
            let tag = field.tag().0;
            // DER: context tags appear once each, in ascending order
            let in_order = fields.last().map(|(last, _)| tag > *last).unwrap_or(true);
            if field.class() != Class::ContextSpecific || !field.header.is_constructed() || !in_order
            {
                return Err(TicketError::Malformed(what));
            }
            fields.push((tag, field.data));
            body = rest;
        }
        Ok(Self { fields, what })
    }

    pub fn optional(&self, tag: u32) -> Option<&'a [u8]> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, data)| *data)
    }

    pub fn required(&self, tag: u32) -> DerResult<&'a [u8]> {
        self.optional(tag).ok_or(TicketError::Malformed(self.what))
    }
}

/// The raw TLVs of a SEQUENCE OF.
pub(super) fn sequence_of<'a>(input: &'a [u8], what: &'static str) -> DerResult<Vec<&'a [u8]>> {
    let (_, any) = next_any(input, what)?;
    if any.class() != Class::Universal || any.tag() != Tag::Sequence {
        return Err(TicketError::Malformed(what));
    }
    let mut body = any.data;
    let mut elements = vec![];
    while !body.is_empty() {
        let (rest, _) = next_any(body, what)?;
        elements.push(&body[..body.len() - rest.len()]);
        body = rest;
    }
    Ok(elements)
}

pub(super) fn int(data: &[u8], what: &'static str) -> DerResult<i32> {
    let (_, value) = parse_der_i32(data).map_err(|_| TicketError::Malformed(what))?;
    Ok(value)
}

pub(super) fn uint(data: &[u8], what: &'static str) -> DerResult<u32> {
    let (_, value) = parse_der_u32(data).map_err(|_| TicketError::Malformed(what))?;
    Ok(value)
}

pub(super) fn string(data: &[u8], what: &'static str) -> DerResult<String> {
    let (_, string) = parse_der_generalstring(data).map_err(|_| TicketError::Malformed(what))?;
    let string = string.as_str().map_err(|_| TicketError::Malformed(what))?;
    Ok(string.to_owned())
}

pub(super) fn octets(data: &[u8], what: &'static str) -> DerResult<Vec<u8>> {
    let (_, octets) = parse_der_octetstring(data).map_err(|_| TicketError::Malformed(what))?;
    match octets.content {
        BerObjectContent::OctetString(content) => Ok(content.to_owned()),
        _ => Err(TicketError::Malformed(what)),
    }
}

pub(super) fn time(data: &[u8], what: &'static str) -> DerResult<DateTime<Utc>> {
    let (_, any) = next_any(data, what)?;
    if any.tag() != Tag::GeneralizedTime {
        return Err(TicketError::Malformed(what));
    }
    let time = std::str::from_utf8(any.data).map_err(|_| TicketError::Malformed(what))?;
    let time = NaiveDateTime::parse_from_str(time, GENERALIZED_TIME_FORMAT)
        .map_err(|_| TicketError::Malformed(what))?;
    Ok(Utc.from_utc_datetime(&time))
}

/// KerberosFlags: a BIT STRING read as a big-endian u32, bit 0 being the MSB.
pub(super) fn flags(data: &[u8], what: &'static str) -> DerResult<u32> {
    let (_, any) = next_any(data, what)?;
    if any.tag() != Tag::BitString || any.data.is_empty() {
        return Err(TicketError::Malformed(what));
    }
    let mut bytes = [0u8; 4];
    for (byte, value) in bytes.iter_mut().zip(&any.data[1..]) {
        *byte = *value;
    }
    Ok(u32::from_be_bytes(bytes))
}

/// PrincipalName ::= SEQUENCE { name-type [0] Int32, name-string [1] SEQUENCE OF KerberosString }
pub(super) fn principal(data: &[u8], realm: &str, what: &'static str) -> DerResult<Principal> {
    let fields = Fields::sequence(data, what)?;
    let name_type = NameType(int(fields.required(0)?, what)?);
    let mut components = vec![];
    for component in sequence_of(fields.required(1)?, what)? {
        components.push(string(component, what)?.into_bytes());
    }
    if components.is_empty() {
        return Err(TicketError::Malformed(what));
    }
    Ok(Principal {
        realm: realm.as_bytes().to_owned(),
        components,
        name_type,
    })
}

pub(super) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(content.len() + 6);
    buf.push(tag);
    match content.len() {
        len if len < 0x80 => buf.push(len as u8),
        len => {
            let bytes = (len as u64).to_be_bytes();
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            buf.push(0x80 | (bytes.len() - skip) as u8);
            buf.extend_from_slice(&bytes[skip..]);
        }
    }
    buf.extend_from_slice(content);
    buf
}

pub(super) fn sequence<I: IntoIterator<Item = Vec<u8>>>(parts: I) -> Vec<u8> {
    tlv(0x30, &parts.into_iter().flatten().collect::<Vec<u8>>())
}

pub(super) fn explicit(tag: u8, inner: Vec<u8>) -> Vec<u8> {
    tlv(0xa0 | tag, &inner)
}

pub(super) fn application(tag: u8, inner: Vec<u8>) -> Vec<u8> {
    tlv(0x60 | tag, &inner)
}

pub(super) fn integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // drop sign-extension bytes that the next byte already implies
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    tlv(0x02, &bytes[start..])
}

pub(super) fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(0x04, content)
}

pub(super) fn general_string(content: &[u8]) -> Vec<u8> {
    tlv(0x1b, content)
}

pub(super) fn generalized_time(time: DateTime<Utc>) -> Vec<u8> {
    tlv(0x18, time.format(GENERALIZED_TIME_FORMAT).to_string().as_bytes())
}

pub(super) fn bit_string(flags: u32) -> Vec<u8> {
    let mut content = vec![0];
    content.extend_from_slice(&flags.to_be_bytes());
    tlv(0x03, &content)
}

pub(super) fn principal_name(principal: &Principal) -> Vec<u8> {
    sequence([
        explicit(0, integer(principal.name_type.0.into())),
        explicit(
            1,
            sequence(principal.components.iter().map(|c| general_string(c))),
        ),
    ])
}
