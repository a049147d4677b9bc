mod builder;
mod der;
mod spnego;

pub use self::{
    builder::TicketBuilder,
    spnego::{unwrap_ap_req, wrap_spnego},
};
pub(crate) use self::builder::{GSS_CHECKSUM_BND_LENGTH, GSS_CHECKSUM_TYPE};
use self::der::Fields;
use crate::{Enctype, Keyblock, Kvno, Principal};
use chrono::{DateTime, Utc};
use thiserror::Error;

const KRB5_PVNO: i32 = 5;
const KRB5_AP_REQ: i32 = 14;

const APPLICATION_TICKET: u8 = 1;
const APPLICATION_AUTHENTICATOR: u8 = 2;
const APPLICATION_ENC_TICKET_PART: u8 = 3;
const APPLICATION_AP_REQ: u8 = 14;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error("unsupported protocol version {0}")]
    Version(i32),
    #[error("unexpected message type {0}")]
    MessageType(i32),
    #[error("unsupported GSS-API mechanism")]
    Mechanism,
}

pub struct AdType;

macro_rules! ad_type {
    ($name:ident, $int:expr) => {
        pub const $name: i32 = $int;
    };
}

impl AdType {
    ad_type!(IF_RELEVANT, 1);
    ad_type!(WIN2K_PAC, 128);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthData {
    pub ad_type: i32,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub enctype: Enctype,
    pub kvno: Option<Kvno>,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub cksumtype: i32,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub server: Principal,
    pub enc_part: EncryptedData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApReq {
    pub ap_options: u32,
    pub ticket: Ticket,
    pub authenticator: EncryptedData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncTicketPart {
    pub flags: u32,
    pub session_key: Keyblock,
    pub client: Principal,
    pub auth_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub renew_till: Option<DateTime<Utc>>,
    pub authorization_data: Vec<AuthData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticator {
    pub client: Principal,
    pub checksum: Option<Checksum>,
    pub cusec: u32,
    pub ctime: DateTime<Utc>,
    pub subkey: Option<Keyblock>,
    pub seq_number: Option<u32>,
}

impl EncryptedData {
    fn decode(data: &[u8]) -> der::DerResult<Self> {
        let fields = Fields::sequence(data, "EncryptedData")?;
        let enctype = Enctype(der::int(fields.required(0)?, "etype")?);
        let kvno = match fields.optional(1) {
            Some(kvno) => Some(der::uint(kvno, "kvno")?),
            None => None,
        };
        let ciphertext = der::octets(fields.required(2)?, "cipher")?;
        Ok(Self {
            enctype,
            kvno,
            ciphertext,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut parts = vec![der::explicit(0, der::integer(self.enctype.0.into()))];
        if let Some(kvno) = self.kvno {
            parts.push(der::explicit(1, der::integer(kvno.into())));
        }
        parts.push(der::explicit(2, der::octet_string(&self.ciphertext)));
        der::sequence(parts)
    }
}

fn decode_keyblock(data: &[u8]) -> der::DerResult<Keyblock> {
    let fields = Fields::sequence(data, "EncryptionKey")?;
    let enctype = Enctype(der::int(fields.required(0)?, "keytype")?);
    let contents = der::octets(fields.required(1)?, "keyvalue")?;
    Ok(Keyblock { enctype, contents })
}

fn encode_keyblock(key: &Keyblock) -> Vec<u8> {
    der::sequence([
        der::explicit(0, der::integer(key.enctype.0.into())),
        der::explicit(1, der::octet_string(&key.contents)),
    ])
}

fn decode_authorization_data(data: &[u8]) -> der::DerResult<Vec<AuthData>> {
    let mut authorization_data = vec![];
    for element in der::sequence_of(data, "AuthorizationData")? {
        let fields = Fields::sequence(element, "AuthorizationData")?;
        authorization_data.push(AuthData {
            ad_type: der::int(fields.required(0)?, "ad-type")?,
            contents: der::octets(fields.required(1)?, "ad-data")?,
        });
    }
    Ok(authorization_data)
}

fn encode_authorization_data(authorization_data: &[AuthData]) -> Vec<u8> {
    der::sequence(authorization_data.iter().map(|ad| {
        der::sequence([
            der::explicit(0, der::integer(ad.ad_type.into())),
            der::explicit(1, der::octet_string(&ad.contents)),
        ])
    }))
}

fn check_version(data: &[u8]) -> der::DerResult<()> {
    match der::int(data, "pvno")? {
        KRB5_PVNO => Ok(()),
        version => Err(TicketError::Version(version)),
    }
}

impl Ticket {
    pub fn decode(data: &[u8]) -> Result<Self, TicketError> {
        let fields = Fields::application(data, APPLICATION_TICKET.into(), "Ticket")?;
        check_version(fields.required(0)?)?;
        let realm = der::string(fields.required(1)?, "realm")?;
        let server = der::principal(fields.required(2)?, &realm, "sname")?;
        let enc_part = EncryptedData::decode(fields.required(3)?)?;
        Ok(Self { server, enc_part })
    }

    pub fn encode(&self) -> Vec<u8> {
        der::application(
            APPLICATION_TICKET,
            der::sequence([
                der::explicit(0, der::integer(KRB5_PVNO.into())),
                der::explicit(1, der::general_string(&self.server.realm)),
                der::explicit(2, der::principal_name(&self.server)),
                der::explicit(3, self.enc_part.encode()),
            ]),
        )
    }
}

impl ApReq {
    pub fn decode(data: &[u8]) -> Result<Self, TicketError> {
        let fields = Fields::application(data, APPLICATION_AP_REQ.into(), "AP-REQ")?;
        check_version(fields.required(0)?)?;
        match der::int(fields.required(1)?, "msg-type")? {
            KRB5_AP_REQ => (),
            msg_type => return Err(TicketError::MessageType(msg_type)),
        }
        let ap_options = der::flags(fields.required(2)?, "ap-options")?;
        let ticket = Ticket::decode(fields.required(3)?)?;
        let authenticator = EncryptedData::decode(fields.required(4)?)?;
        Ok(Self {
            ap_options,
            ticket,
            authenticator,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        der::application(
            APPLICATION_AP_REQ,
            der::sequence([
                der::explicit(0, der::integer(KRB5_PVNO.into())),
                der::explicit(1, der::integer(KRB5_AP_REQ.into())),
                der::explicit(2, der::bit_string(self.ap_options)),
                der::explicit(3, self.ticket.encode()),
                der::explicit(4, self.authenticator.encode()),
            ]),
        )
    }
}

impl EncTicketPart {
    pub fn decode(data: &[u8]) -> Result<Self, TicketError> {
        let fields = Fields::application(data, APPLICATION_ENC_TICKET_PART.into(), "EncTicketPart")?;
        let flags = der::flags(fields.required(0)?, "flags")?;
        let session_key = decode_keyblock(fields.required(1)?)?;
        let realm = der::string(fields.required(2)?, "crealm")?;
        let client = der::principal(fields.required(3)?, &realm, "cname")?;
        fields.required(4)?;
        let auth_time = der::time(fields.required(5)?, "authtime")?;
        let start_time = match fields.optional(6) {
            Some(time) => Some(der::time(time, "starttime")?),
            None => None,
        };
        let end_time = der::time(fields.required(7)?, "endtime")?;
        let renew_till = match fields.optional(8) {
            Some(time) => Some(der::time(time, "renew-till")?),
            None => None,
        };
        let authorization_data = match fields.optional(10) {
            Some(data) => decode_authorization_data(data)?,
            None => vec![],
        };
        Ok(Self {
            flags,
            session_key,
            client,
            auth_time,
            start_time,
            end_time,
            renew_till,
            authorization_data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        // empty TransitedEncoding: domain-X500-compress with no realms
        let transited = der::sequence([
            der::explicit(0, der::integer(1)),
            der::explicit(1, der::octet_string(&[])),
        ]);
        let mut parts = vec![
            der::explicit(0, der::bit_string(self.flags)),
            der::explicit(1, encode_keyblock(&self.session_key)),
            der::explicit(2, der::general_string(&self.client.realm)),
            der::explicit(3, der::principal_name(&self.client)),
            der::explicit(4, transited),
            der::explicit(5, der::generalized_time(self.auth_time)),
        ];
        if let Some(start_time) = self.start_time {
            parts.push(der::explicit(6, der::generalized_time(start_time)));
        }
        parts.push(der::explicit(7, der::generalized_time(self.end_time)));
        if let Some(renew_till) = self.renew_till {
            parts.push(der::explicit(8, der::generalized_time(renew_till)));
        }
        if !self.authorization_data.is_empty() {
            parts.push(der::explicit(
                10,
                encode_authorization_data(&self.authorization_data),
            ));
        }
        der::application(APPLICATION_ENC_TICKET_PART, der::sequence(parts))
    }

    /// The PAC from AD-WIN2K-PAC, looking inside AD-IF-RELEVANT containers.
    pub fn pac(&self) -> Result<Option<Vec<u8>>, TicketError> {
        find_pac(&self.authorization_data)
    }
}

fn find_pac(authorization_data: &[AuthData]) -> Result<Option<Vec<u8>>, TicketError> {
    for ad in authorization_data {
        match ad.ad_type {
            AdType::WIN2K_PAC => return Ok(Some(ad.contents.clone())),
            AdType::IF_RELEVANT => {
                let inner = decode_authorization_data(&ad.contents)?;
                // AD-IF-RELEVANT never nests another container around the PAC
                if let Some(pac) = inner
                    .into_iter()
                    .find(|ad| ad.ad_type == AdType::WIN2K_PAC)
                {
                    return Ok(Some(pac.contents));
                }
            }
            _ => (),
        }
    }
    Ok(None)
}

impl Authenticator {
    pub fn decode(data: &[u8]) -> Result<Self, TicketError> {
        let fields = Fields::application(data, APPLICATION_AUTHENTICATOR.into(), "Authenticator")?;
        check_version(fields.required(0)?)?;
        let realm = der::string(fields.required(1)?, "crealm")?;
        let client = der::principal(fields.required(2)?, &realm, "cname")?;
        let checksum = match fields.optional(3) {
            Some(data) => {
                let checksum = Fields::sequence(data, "Checksum")?;
                Some(Checksum {
                    cksumtype: der::int(checksum.required(0)?, "cksumtype")?,
                    contents: der::octets(checksum.required(1)?, "checksum")?,
                })
            }
            None => None,
        };
        let cusec = der::uint(fields.required(4)?, "cusec")?;
        let ctime = der::time(fields.required(5)?, "ctime")?;
        let subkey = match fields.optional(6) {
            Some(data) => Some(decode_keyblock(data)?),
            None => None,
        };
        let seq_number = match fields.optional(7) {
            Some(data) => Some(der::uint(data, "seq-number")?),
            None => None,
        };
        Ok(Self {
            client,
            checksum,
            cusec,
            ctime,
            subkey,
            seq_number,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut parts = vec![
            der::explicit(0, der::integer(KRB5_PVNO.into())),
            der::explicit(1, der::general_string(&self.client.realm)),
            der::explicit(2, der::principal_name(&self.client)),
        ];
        if let Some(checksum) = &self.checksum {
            parts.push(der::explicit(
                3,
                der::sequence([
                    der::explicit(0, der::integer(checksum.cksumtype.into())),
                    der::explicit(1, der::octet_string(&checksum.contents)),
                ]),
            ));
        }
        parts.push(der::explicit(4, der::integer(self.cusec.into())));
        parts.push(der::explicit(5, der::generalized_time(self.ctime)));
        if let Some(subkey) = &self.subkey {
            parts.push(der::explicit(6, encode_keyblock(subkey)));
        }
        if let Some(seq_number) = self.seq_number {
            parts.push(der::explicit(7, der::integer(seq_number.into())));
        }
        der::application(APPLICATION_AUTHENTICATOR, der::sequence(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn client() -> Principal {
        Principal::new(&["HOST$"], "EXAMPLE.COM")
    }

    #[test]
    fn test_ap_req_decodes_what_it_encodes() {
        let ap_req = ApReq {
            ap_options: 0x2000_0000,
            ticket: Ticket {
                server: Principal::new(&["HTTP", "vault.example.com"], "EXAMPLE.COM"),
                enc_part: EncryptedData {
                    enctype: Enctype::AES256_CTS_HMAC_SHA1_96,
                    kvno: Some(3),
                    ciphertext: vec![0xab; 80],
                },
            },
            authenticator: EncryptedData {
                enctype: Enctype::AES256_CTS_HMAC_SHA1_96,
                kvno: None,
                ciphertext: vec![0xcd; 60],
            },
        };
        assert_eq!(ApReq::decode(&ap_req.encode()).unwrap(), ap_req);
    }

    #[test]
    fn test_enc_ticket_part_finds_pac_inside_if_relevant() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let pac = AuthData {
            ad_type: AdType::WIN2K_PAC,
            contents: vec![1, 2, 3],
        };
        let part = EncTicketPart {
            flags: 0x4081_0000,
            session_key: Keyblock::new(Enctype::AES256_CTS_HMAC_SHA1_96, vec![9; 32]),
            client: client(),
            auth_time: now,
            start_time: Some(now),
            end_time: now + chrono::Duration::hours(10),
            renew_till: None,
            authorization_data: vec![AuthData {
                ad_type: AdType::IF_RELEVANT,
                contents: encode_authorization_data(&[pac]),
            }],
        };
        let decoded = EncTicketPart::decode(&part.encode()).unwrap();
        assert_eq!(decoded, part);
        assert_eq!(decoded.pac().unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_rejects_wrong_version_and_message_type() {
        let authenticator = Authenticator {
            client: client(),
            checksum: None,
            cusec: 0,
            ctime: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            subkey: None,
            seq_number: Some(7),
        };
        let encoded = authenticator.encode();
        assert_eq!(Authenticator::decode(&encoded).unwrap(), authenticator);
        assert!(matches!(
            ApReq::decode(&encoded),
            Err(TicketError::Malformed("AP-REQ"))
        ));

        let bad_version = der::application(
            APPLICATION_AP_REQ,
            der::sequence([
                der::explicit(0, der::integer(4)),
                der::explicit(1, der::integer(14)),
            ]),
        );
        assert_eq!(ApReq::decode(&bad_version), Err(TicketError::Version(4)));
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        let ticket = Ticket {
            server: Principal::new(&["HTTP", "vault.example.com"], "EXAMPLE.COM"),
            enc_part: EncryptedData {
                enctype: Enctype::ARCFOUR_HMAC,
                kvno: Some(1),
                ciphertext: vec![1; 40],
            },
        };
        let encoded = ticket.encode();
        for cut in 0..encoded.len() {
            assert!(Ticket::decode(&encoded[..cut]).is_err());
        }
    }
}
