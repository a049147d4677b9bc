use crate::{
    config::{skew_window, Config},
    error,
    pac::{self, PacCheck, PacError},
    ticket::{
        self, ApReq, Authenticator, EncTicketPart, TicketError, GSS_CHECKSUM_BND_LENGTH,
        GSS_CHECKSUM_TYPE,
    },
    CryptoError, Enctype, KeyUsage, Kvno, Principal,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use thiserror::Error;

pub const MAX_TOKEN_LENGTH: usize = 64 * 1024;

const TLS_SERVER_END_POINT: &[u8] = b"tls-server-end-point:";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is not valid base64")]
    InvalidEncoding,
    #[error("token exceeds {} bytes", MAX_TOKEN_LENGTH)]
    TokenTooLarge,
    #[error("malformed SPNEGO token: {0}")]
    MalformedSpnego(#[from] TicketError),
    #[error("no keytab entry for {0}")]
    NoMatchingKey(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(#[from] CryptoError),
    #[error("clock skew too great")]
    ClockSkewExceeded,
    #[error("ticket expired")]
    TicketExpired,
    #[error("channel binding mismatch")]
    ChannelBindingMismatch,
    #[error("authenticator client does not match the ticket")]
    PrincipalMismatch,
    #[error("PAC rejected: {0}")]
    Pac(#[from] PacError),
}

impl AuthError {
    /// The MIT krb5 code for this failure, when one exists.
    pub fn code(&self) -> Option<&'static error::Error> {
        match self {
            Self::MalformedSpnego(TicketError::Version(_)) => {
                Some(error::KRB5KRB_AP_ERR_BADVERSION)
            }
            Self::MalformedSpnego(TicketError::MessageType(_)) => {
                Some(error::KRB5KRB_AP_ERR_MSG_TYPE)
            }
            Self::NoMatchingKey(_) => Some(error::KRB5KRB_AP_ERR_NOKEY),
            Self::DecryptionFailed(CryptoError::UnsupportedEnctype(_)) => {
                Some(error::KRB5_BAD_ENCTYPE)
            }
            Self::DecryptionFailed(_) => Some(error::KRB5KRB_AP_ERR_BAD_INTEGRITY),
            Self::ClockSkewExceeded => Some(error::KRB5KRB_AP_ERR_SKEW),
            Self::TicketExpired => Some(error::KRB5KRB_AP_ERR_TKT_EXPIRED),
            Self::ChannelBindingMismatch => Some(error::KRB5KRB_AP_ERR_MODIFIED),
            Self::PrincipalMismatch => Some(error::KRB5KRB_AP_ERR_BADMATCH),
            Self::InvalidEncoding | Self::TokenTooLarge | Self::MalformedSpnego(_) | Self::Pac(_) => {
                None
            }
        }
    }

    /// Failures caused by the shape of the request rather than by the
    /// credential it carries.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidEncoding | Self::TokenTooLarge | Self::MalformedSpnego(_)
        )
    }
}

/// An authenticated client, per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// `name@REALM` of the client.
    pub principal: String,
    pub realm: String,
    /// The service the ticket was issued for, without its realm.
    pub spn: String,
    pub pac: Option<Vec<u8>>,
    pub group_sids: BTreeSet<String>,
    pub channel_binding_verified: bool,
    pub pac_present: bool,
    pub kvno: Kvno,
    pub enctype: Enctype,
}

/// Accepts SPNEGO/Kerberos tokens against one configuration snapshot.
#[derive(Debug, Clone)]
pub struct Validator {
    config: Arc<Config>,
}

impl Validator {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn validate(
        &self,
        token: &str,
        channel_binding: Option<&[u8]>,
    ) -> Result<ValidationResult, AuthError> {
        self.validate_at(token, channel_binding, Utc::now())
    }

    pub fn validate_at(
        &self,
        token: &str,
        channel_binding: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<ValidationResult, AuthError> {
        let token = decode_token(token)?;
        let ap_req = ApReq::decode(ticket::unwrap_ap_req(&token)?)?;

        let server = &ap_req.ticket.server;
        let enc_part = &ap_req.ticket.enc_part;
        let entry = self
            .config
            .keytab
            .select_key(server, enc_part.kvno, &[enc_part.enctype])
            .ok_or_else(|| AuthError::NoMatchingKey(server.to_string()))?;
        tracing::debug!(
            spn = %server,
            kvno = entry.vno,
            enctype = %entry.key.enctype,
            "selected service key"
        );

        let ticket = EncTicketPart::decode(
            &entry
                .key
                .decrypt(KeyUsage::TICKET, &enc_part.ciphertext)?,
        )?;
        let authenticator = Authenticator::decode(
            &ticket
                .session_key
                .decrypt(KeyUsage::AP_REQ_AUTHENTICATOR, &ap_req.authenticator.ciphertext)?,
        )?;
        if !authenticator
            .client
            .compare_with_flags(&ticket.client, Principal::COMPARE_CASEFOLD)
        {
            return Err(AuthError::PrincipalMismatch);
        }

        check_times(&ticket, &authenticator, now, self.config.clock_skew)?;

        let channel_binding_verified = match channel_binding {
            Some(hash) if self.config.allow_channel_binding => {
                check_channel_binding(&authenticator, hash)?;
                true
            }
            _ => false,
        };

        let pac = ticket.pac()?;
        let group_sids = match &pac {
            Some(raw) => {
                let check = PacCheck {
                    realm: &self.config.realm,
                    now,
                    clock_skew: self.config.clock_skew,
                    auth_time: Some(ticket.auth_time),
                };
                pac::extract_with(raw, &check)?.group_sids
            }
            None => BTreeSet::new(),
        };

        Ok(ValidationResult {
            principal: ticket.client.unparse_name(0),
            realm: ticket.client.realm_str(),
            spn: server.unparse_name(Principal::UNPARSE_NO_REALM),
            pac_present: pac.is_some(),
            pac,
            group_sids,
            channel_binding_verified,
            kvno: entry.vno,
            enctype: entry.key.enctype,
        })
    }
}

fn decode_token(token: &str) -> Result<Vec<u8>, AuthError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidEncoding);
    }
    if token.len() > MAX_TOKEN_LENGTH / 3 * 4 + 4 {
        return Err(AuthError::TokenTooLarge);
    }
    let token = STANDARD
        .decode(token)
        .map_err(|_| AuthError::InvalidEncoding)?;
    if token.is_empty() {
        return Err(AuthError::InvalidEncoding);
    }
    if token.len() > MAX_TOKEN_LENGTH {
        return Err(AuthError::TokenTooLarge);
    }
    Ok(token)
}

// Bounds are inclusive: a time exactly `skew` away is accepted.
fn check_times(
    ticket: &EncTicketPart,
    authenticator: &Authenticator,
    now: DateTime<Utc>,
    skew: Duration,
) -> Result<(), AuthError> {
    let (earliest, latest) = skew_window(now, skew);
    let start_time = ticket.start_time.unwrap_or(ticket.auth_time);
    if start_time > latest {
        return Err(AuthError::ClockSkewExceeded);
    }
    if authenticator.ctime > latest || authenticator.ctime < earliest {
        return Err(AuthError::ClockSkewExceeded);
    }
    if ticket.end_time < earliest {
        return Err(AuthError::TicketExpired);
    }
    Ok(())
}

fn check_channel_binding(authenticator: &Authenticator, hash: &[u8]) -> Result<(), AuthError> {
    let checksum = authenticator
        .checksum
        .as_ref()
        .filter(|checksum| checksum.cksumtype == GSS_CHECKSUM_TYPE)
        .ok_or(AuthError::ChannelBindingMismatch)?;
    match checksum.contents.as_slice() {
        [l0, l1, l2, l3, bnd @ ..]
            if u32::from_le_bytes([*l0, *l1, *l2, *l3]) == GSS_CHECKSUM_BND_LENGTH
                && bnd.len() >= 20
                && bnd[..16] == channel_binding_digest(hash) =>
        {
            Ok(())
        }
        _ => Err(AuthError::ChannelBindingMismatch),
    }
}

/// MD5 of the serialized gss_channel_bindings_struct with no addresses and
/// `tls-server-end-point:<hash>` as application data (RFC 4121 4.1.1.2,
/// RFC 5929).
pub fn channel_binding_digest(certificate_hash: &[u8]) -> [u8; 16] {
    let application_data_length = TLS_SERVER_END_POINT.len() + certificate_hash.len();
    let mut hasher = Md5::new();
    // initiator and acceptor: address type and empty address
    hasher.update([0u8; 16]);
    hasher.update((application_data_length as u32).to_le_bytes());
    hasher.update(TLS_SERVER_END_POINT);
    hasher.update(certificate_hash);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::record, pac::tests::builder, Keyblock, Keytab, KeytabEntry, TicketBuilder,
    };
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn config(allow_channel_binding: bool) -> Arc<Config> {
        let mut record = record();
        record.allow_channel_binding = allow_channel_binding;
        Arc::new(Config::from_record(record).unwrap())
    }

    fn client() -> Principal {
        Principal::new(&["VAULT$"], "EXAMPLE.COM")
    }

    fn ticket(config: &Config) -> TicketBuilder {
        let spn = config.service_principal().unwrap();
        TicketBuilder::new(config.keytab.best_key(&spn).unwrap(), client()).at(now())
    }

    #[test]
    fn test_accepts_valid_ticket() {
        let config = config(false);
        let validator = Validator::new(config.clone());
        let token = ticket(&config).build_base64().unwrap();
        let result = validator.validate_at(&token, None, now()).unwrap();
        assert_eq!(result.principal, "VAULT$@EXAMPLE.COM");
        assert_eq!(result.realm, "EXAMPLE.COM");
        assert_eq!(result.spn, "HTTP/vault.example.com");
        assert_eq!(result.kvno, 3);
        assert_eq!(result.enctype, Enctype::AES256_CTS_HMAC_SHA1_96);
        assert!(!result.pac_present);
        assert!(result.group_sids.is_empty());
        assert!(!result.channel_binding_verified);
    }

    #[test]
    fn test_extracts_pac_groups() {
        let config = config(false);
        let validator = Validator::new(config.clone());
        let token = ticket(&config)
            .pac(builder(&[513, 1110]).build())
            .build_base64()
            .unwrap();
        let result = validator.validate_at(&token, None, now()).unwrap();
        assert!(result.pac_present);
        assert_eq!(result.group_sids.len(), 2);
        assert!(result
            .group_sids
            .contains("S-1-5-21-3623811015-3361044348-30300820-1110"));
    }

    #[test]
    fn test_rejects_bad_encoding_and_size() {
        let validator = Validator::new(config(false));
        assert!(matches!(
            validator.validate_at("", None, now()),
            Err(AuthError::InvalidEncoding)
        ));
        assert!(matches!(
            validator.validate_at("not*base64", None, now()),
            Err(AuthError::InvalidEncoding)
        ));
        let huge = STANDARD.encode(vec![0u8; MAX_TOKEN_LENGTH + 1]);
        assert!(matches!(
            validator.validate_at(&huge, None, now()),
            Err(AuthError::TokenTooLarge)
        ));
        let garbage = STANDARD.encode(b"definitely not spnego");
        let err = validator.validate_at(&garbage, None, now()).unwrap_err();
        assert!(matches!(err, AuthError::MalformedSpnego(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_no_matching_key() {
        let config = config(false);
        let validator = Validator::new(config);
        let other = Keytab::from_entries(vec![KeytabEntry {
            principal: Principal::new(&["HTTP", "other.example.com"], "EXAMPLE.COM"),
            timestamp: 1_700_000_000,
            vno: 3,
            key: Keyblock::random(Enctype::AES256_CTS_HMAC_SHA1_96).unwrap(),
        }])
        .unwrap();
        let token = TicketBuilder::new(&other.entries()[0], client())
            .at(now())
            .build_base64()
            .unwrap();
        let err = validator.validate_at(&token, None, now()).unwrap_err();
        assert!(matches!(err, AuthError::NoMatchingKey(_)));
        assert_eq!(err.code(), Some(error::KRB5KRB_AP_ERR_NOKEY));
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let config = config(false);
        let validator = Validator::new(config.clone());
        let mut impostor = config.keytab.entries()[0].clone();
        impostor.key = Keyblock::random(Enctype::AES256_CTS_HMAC_SHA1_96).unwrap();
        let token = TicketBuilder::new(&impostor, client())
            .at(now())
            .build_base64()
            .unwrap();
        assert!(matches!(
            validator.validate_at(&token, None, now()),
            Err(AuthError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_clock_skew_boundaries() {
        let config = config(false);
        let validator = Validator::new(config.clone());
        let skew = Duration::seconds(300);

        let token = ticket(&config).at(now() + skew).build_base64().unwrap();
        assert!(validator.validate_at(&token, None, now()).is_ok());

        let token = ticket(&config)
            .at(now() + skew + Duration::seconds(1))
            .build_base64()
            .unwrap();
        assert!(matches!(
            validator.validate_at(&token, None, now()),
            Err(AuthError::ClockSkewExceeded)
        ));

        let token = ticket(&config)
            .authenticator_time(now() - skew - Duration::seconds(1))
            .build_base64()
            .unwrap();
        assert!(matches!(
            validator.validate_at(&token, None, now()),
            Err(AuthError::ClockSkewExceeded)
        ));
    }

    #[test]
    fn test_huge_skew_saturates_instead_of_overflowing() {
        let mut config = (*config(false)).clone();
        config.clock_skew = std::time::Duration::from_secs(10_000_000_000_000);
        let config = Arc::new(config);
        let validator = Validator::new(config.clone());
        let token = ticket(&config)
            .at(now() + Duration::days(365))
            .build_base64()
            .unwrap();
        assert!(validator.validate_at(&token, None, now()).is_ok());
    }

    #[test]
    fn test_expired_ticket() {
        let config = config(false);
        let validator = Validator::new(config.clone());
        let token = ticket(&config)
            .auth_time(now() - Duration::hours(11))
            .end_time(now() - Duration::seconds(301))
            .build_base64()
            .unwrap();
        let err = validator.validate_at(&token, None, now()).unwrap_err();
        assert!(matches!(err, AuthError::TicketExpired));
        assert_eq!(err.code(), Some(error::KRB5KRB_AP_ERR_TKT_EXPIRED));

        let token = ticket(&config)
            .end_time(now() - Duration::seconds(300))
            .build_base64()
            .unwrap();
        assert!(validator.validate_at(&token, None, now()).is_ok());
    }

    #[test]
    fn test_principal_mismatch() {
        let config = config(false);
        let validator = Validator::new(config.clone());
        let token = ticket(&config)
            .authenticator_client(Principal::new(&["MALLORY$"], "EXAMPLE.COM"))
            .build_base64()
            .unwrap();
        assert!(matches!(
            validator.validate_at(&token, None, now()),
            Err(AuthError::PrincipalMismatch)
        ));
    }

    #[test]
    fn test_channel_binding() {
        let hash = [0x42; 32];
        let config = config(true);
        let validator = Validator::new(config.clone());
        let bound = ticket(&config).channel_binding(&hash).build_base64().unwrap();

        let result = validator.validate_at(&bound, Some(&hash), now()).unwrap();
        assert!(result.channel_binding_verified);
        assert!(matches!(
            validator.validate_at(&bound, Some(&[0x43; 32]), now()),
            Err(AuthError::ChannelBindingMismatch)
        ));
        // no binding presented by the caller
        assert!(!validator
            .validate_at(&bound, None, now())
            .unwrap()
            .channel_binding_verified);

        let unbound = ticket(&config).build_base64().unwrap();
        assert!(matches!(
            validator.validate_at(&unbound, Some(&hash), now()),
            Err(AuthError::ChannelBindingMismatch)
        ));

        // binding ignored unless enabled
        let disabled = Validator::new(Arc::new(Config {
            allow_channel_binding: false,
            ..(*config).clone()
        }));
        assert!(!disabled
            .validate_at(&unbound, Some(&hash), now())
            .unwrap()
            .channel_binding_verified);
    }

    #[test]
    fn test_pac_errors_propagate() {
        let config = config(false);
        let validator = Validator::new(config.clone());
        let token = ticket(&config)
            .pac(builder(&[513]).without_kdc_checksum().build())
            .build_base64()
            .unwrap();
        assert!(matches!(
            validator.validate_at(&token, None, now()),
            Err(AuthError::Pac(PacError::MissingSignature))
        ));
    }
}
