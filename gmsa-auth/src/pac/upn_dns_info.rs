use super::{
    ndr::{self, Reader, Writer},
    PacError, Sid,
};

const WHAT: &str = "UPN_DNS_INFO";

pub const UPN_DNS_FLAG_NO_UPN: u32 = 0x1;
pub const UPN_DNS_FLAG_EXTENDED: u32 = 0x2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpnDnsInfo {
    pub upn: String,
    pub dns_domain: String,
    pub flags: u32,
    pub sam_name: Option<String>,
    pub sid: Option<Sid>,
}

impl UpnDnsInfo {
    pub fn parse(data: &[u8]) -> Result<Self, PacError> {
        let mut r = Reader::new(data, WHAT);
        let upn = (r.u16()?, r.u16()?);
        let dns_domain = (r.u16()?, r.u16()?);
        let flags = r.u32()?;
        let mut info = Self {
            upn: string_at(data, upn)?,
            dns_domain: string_at(data, dns_domain)?,
            flags,
            sam_name: None,
            sid: None,
        };
        if flags & UPN_DNS_FLAG_EXTENDED != 0 {
            let sam_name = (r.u16()?, r.u16()?);
            let (sid_length, sid_offset) = (r.u16()?, r.u16()?);
            info.sam_name = Some(string_at(data, sam_name)?);
            let sid_bytes = slice_at(data, (sid_length, sid_offset))?;
            let mut sid_reader = Reader::new(sid_bytes, WHAT);
            let sid = sid_reader.sid()?;
            if sid_reader.remaining() != 0 {
                return Err(PacError::Malformed(WHAT));
            }
            info.sid = Some(sid);
        }
        Ok(info)
    }

    pub fn encode(&self) -> Vec<u8> {
        let extended = self.sam_name.is_some() || self.sid.is_some();
        let flags = match extended {
            true => self.flags | UPN_DNS_FLAG_EXTENDED,
            false => self.flags & !UPN_DNS_FLAG_EXTENDED,
        };
        let mut payloads = vec![ndr::to_utf16le(&self.upn), ndr::to_utf16le(&self.dns_domain)];
        if extended {
            payloads.push(ndr::to_utf16le(self.sam_name.as_deref().unwrap_or_default()));
            payloads.push(self.sid.as_ref().map(ndr::sid_bytes).unwrap_or_default());
        }

        let header_length = if extended { 20 } else { 12 };
        let mut offset = header_length;
        let mut locations = vec![];
        for payload in &payloads {
            offset = (offset + 7) / 8 * 8;
            locations.push((payload.len() as u16, offset as u16));
            offset += payload.len();
        }

        let mut w = Writer::default();
        for (length, offset) in &locations[..2] {
            w.u16(*length);
            w.u16(*offset);
        }
        w.u32(flags);
        for (length, offset) in &locations[2..] {
            w.u16(*length);
            w.u16(*offset);
        }
        for payload in &payloads {
            w.align(8);
            w.bytes(payload);
        }
        w.align(8);
        w.buf
    }
}

fn slice_at(data: &[u8], (length, offset): (u16, u16)) -> Result<&[u8], PacError> {
    let start = usize::from(offset);
    data.get(start..start + usize::from(length))
        .ok_or(PacError::Malformed(WHAT))
}

fn string_at(data: &[u8], location: (u16, u16)) -> Result<String, PacError> {
    ndr::utf16le(slice_at(data, location)?).ok_or(PacError::Malformed(WHAT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let info = UpnDnsInfo {
            upn: "vault$@example.com".to_owned(),
            dns_domain: "EXAMPLE.COM".to_owned(),
            flags: 0,
            sam_name: None,
            sid: None,
        };
        assert_eq!(UpnDnsInfo::parse(&info.encode()).unwrap(), info);
    }

    #[test]
    fn test_parse_extended() {
        let info = UpnDnsInfo {
            upn: "vault$@example.com".to_owned(),
            dns_domain: "EXAMPLE.COM".to_owned(),
            flags: UPN_DNS_FLAG_NO_UPN | UPN_DNS_FLAG_EXTENDED,
            sam_name: Some("vault$".to_owned()),
            sid: Some("S-1-5-21-1-2-3-1104".parse().unwrap()),
        };
        assert_eq!(UpnDnsInfo::parse(&info.encode()).unwrap(), info);
    }

    #[test]
    fn test_rejects_out_of_bounds_offsets() {
        let info = UpnDnsInfo {
            upn: "a@b".to_owned(),
            dns_domain: "B".to_owned(),
            ..Default::default()
        };
        let mut encoded = info.encode();
        encoded[6] = 0xff;
        assert_eq!(UpnDnsInfo::parse(&encoded), Err(PacError::Malformed(WHAT)));
        assert!(UpnDnsInfo::parse(&encoded[..10]).is_err());
    }
}
