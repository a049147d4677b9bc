use super::{
    ndr::{self, Reader, Writer},
    PacError,
};
use chrono::{DateTime, Utc};

const WHAT: &str = "PAC_CLIENT_INFO";

/// PAC_CLIENT_INFO: the client's authtime and name, as the KDC saw them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: Option<DateTime<Utc>>,
    pub name: String,
}

impl ClientInfo {
    pub fn parse(data: &[u8]) -> Result<Self, PacError> {
        let mut r = Reader::new(data, WHAT);
        let client_id = r.filetime()?;
        let name_length = r.u16()?;
        let name = ndr::utf16le(r.take(name_length.into())?).ok_or_else(|| r.malformed())?;
        Ok(Self { client_id, name })
    }

    pub fn encode(&self) -> Vec<u8> {
        let name = ndr::to_utf16le(&self.name);
        let mut w = Writer::default();
        w.filetime(self.client_id);
        w.u16(name.len() as u16);
        w.bytes(&name);
        w.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse() {
        let info = ClientInfo {
            client_id: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            name: "vault$".to_owned(),
        };
        let encoded = info.encode();
        assert_eq!(encoded.len(), 8 + 2 + 12);
        assert_eq!(ClientInfo::parse(&encoded).unwrap(), info);
    }

    #[test]
    fn test_rejects_bad_name_length() {
        let mut encoded = ClientInfo {
            client_id: None,
            name: "a".to_owned(),
        }
        .encode();
        encoded[8] = 3;
        assert_eq!(ClientInfo::parse(&encoded), Err(PacError::Malformed(WHAT)));
        encoded[8] = 1;
        assert_eq!(ClientInfo::parse(&encoded), Err(PacError::Malformed(WHAT)));
    }
}
