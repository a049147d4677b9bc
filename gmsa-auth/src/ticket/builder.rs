use super::{
    wrap_spnego, AdType, ApReq, AuthData, Authenticator, Checksum, EncTicketPart, EncryptedData,
    Ticket,
};
use crate::{
    validator::channel_binding_digest, CryptoError, KeyUsage, Keyblock, KeytabEntry, Principal,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};

const DEFAULT_LIFETIME_HOURS: i64 = 10;
// forwardable, renewable, pre-authent
const DEFAULT_TICKET_FLAGS: u32 = 0x4081_0000;
// mutual-required
const DEFAULT_AP_OPTIONS: u32 = 0x2000_0000;

pub(crate) const GSS_CHECKSUM_TYPE: i32 = 0x8003;
pub(crate) const GSS_CHECKSUM_BND_LENGTH: u32 = 16;
// GSS_C_MUTUAL_FLAG | GSS_C_INTEG_FLAG | GSS_C_CONF_FLAG
const GSS_CHECKSUM_FLAGS: u32 = 0x02 | 0x20 | 0x10;

/// Mints the AP-REQ a client would send after a TGS exchange, encrypting the
/// ticket with a service key from a keytab. Used by the rotation self-test to
/// prove a freshly generated keytab can accept tickets.
#[derive(Debug, Clone)]
pub struct TicketBuilder {
    service_key: Keyblock,
    kvno: u32,
    server: Principal,
    client: Principal,
    authenticator_client: Option<Principal>,
    auth_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: DateTime<Utc>,
    ctime: DateTime<Utc>,
    pac: Option<Vec<u8>>,
    channel_binding: Option<Vec<u8>>,
    omit_kvno: bool,
}

impl TicketBuilder {
    pub fn new(service: &KeytabEntry, client: Principal) -> Self {
        let now = Utc::now();
        Self {
            service_key: service.key.clone(),
            kvno: service.vno,
            server: service.principal.clone(),
            client,
            authenticator_client: None,
            auth_time: now,
            start_time: None,
            end_time: now + Duration::hours(DEFAULT_LIFETIME_HOURS),
            ctime: now,
            pac: None,
            channel_binding: None,
            omit_kvno: false,
        }
    }

    /// Sets authtime and the authenticator time together, with the default
    /// lifetime from there.
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.auth_time = time;
        self.ctime = time;
        self.end_time = time + Duration::hours(DEFAULT_LIFETIME_HOURS);
        self
    }

    pub fn auth_time(mut self, time: DateTime<Utc>) -> Self {
        self.auth_time = time;
        self
    }

    pub fn start_time(mut self, time: DateTime<Utc>) -> Self {
        self.start_time = Some(time);
        self
    }

    pub fn end_time(mut self, time: DateTime<Utc>) -> Self {
        self.end_time = time;
        self
    }

    pub fn authenticator_time(mut self, time: DateTime<Utc>) -> Self {
        self.ctime = time;
        self
    }

    pub fn authenticator_client(mut self, client: Principal) -> Self {
        self.authenticator_client = Some(client);
        self
    }

    pub fn pac(mut self, pac: Vec<u8>) -> Self {
        self.pac = Some(pac);
        self
    }

    /// Binds the authenticator to a TLS server certificate hash.
    pub fn channel_binding(mut self, certificate_hash: &[u8]) -> Self {
        self.channel_binding = Some(certificate_hash.to_owned());
        self
    }

    /// Leaves kvno out of the ticket enc-part, as some KDCs do.
    pub fn without_kvno(mut self) -> Self {
        self.omit_kvno = true;
        self
    }

    pub fn build_ap_req(&self) -> Result<Vec<u8>, CryptoError> {
        let session_key = Keyblock::random(self.service_key.enctype)?;
        let authorization_data = match &self.pac {
            Some(pac) => {
                let if_relevant = super::encode_authorization_data(&[AuthData {
                    ad_type: AdType::WIN2K_PAC,
                    contents: pac.clone(),
                }]);
                vec![AuthData {
                    ad_type: AdType::IF_RELEVANT,
                    contents: if_relevant,
                }]
            }
            None => vec![],
        };
        let enc_ticket_part = EncTicketPart {
            flags: DEFAULT_TICKET_FLAGS,
            session_key: session_key.clone(),
            client: self.client.clone(),
            auth_time: self.auth_time,
            start_time: self.start_time,
            end_time: self.end_time,
            renew_till: None,
            authorization_data,
        };
        let ticket = Ticket {
            server: self.server.clone(),
            enc_part: EncryptedData {
                enctype: self.service_key.enctype,
                kvno: (!self.omit_kvno).then_some(self.kvno),
                ciphertext: self
                    .service_key
                    .encrypt(KeyUsage::TICKET, &enc_ticket_part.encode())?,
            },
        };

        let authenticator = Authenticator {
            client: self
                .authenticator_client
                .clone()
                .unwrap_or_else(|| self.client.clone()),
            checksum: Some(self.gss_checksum()),
            cusec: 0,
            ctime: self.ctime,
            subkey: None,
            seq_number: Some(rand::random::<u32>() & 0x7fff_ffff),
        };
        let ap_req = ApReq {
            ap_options: DEFAULT_AP_OPTIONS,
            ticket,
            authenticator: EncryptedData {
                enctype: session_key.enctype,
                kvno: None,
                ciphertext: session_key
                    .encrypt(KeyUsage::AP_REQ_AUTHENTICATOR, &authenticator.encode())?,
            },
        };
        Ok(ap_req.encode())
    }

    pub fn build_spnego(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(wrap_spnego(&self.build_ap_req()?))
    }

    pub fn build_base64(&self) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.build_spnego()?))
    }

    // RFC 4121 4.1.1: Lgth, Bnd, Flags, all little-endian
    fn gss_checksum(&self) -> Checksum {
        let bnd = match &self.channel_binding {
            Some(hash) => channel_binding_digest(hash),
            None => [0; 16],
        };
        let mut contents = Vec::with_capacity(24);
        contents.extend_from_slice(&GSS_CHECKSUM_BND_LENGTH.to_le_bytes());
        contents.extend_from_slice(&bnd);
        contents.extend_from_slice(&GSS_CHECKSUM_FLAGS.to_le_bytes());
        Checksum {
            cksumtype: GSS_CHECKSUM_TYPE,
            contents,
        }
    }
}
