mod client_info;
mod encode;
mod logon_info;
mod ndr;
mod sid;
mod signature;
mod upn_dns_info;

pub use self::{
    client_info::ClientInfo,
    encode::PacBuilder,
    logon_info::{ExtraSid, GroupMembership, LogonInfo},
    sid::{Sid, SidParseError},
    signature::{PacSignature, SignatureType},
    upn_dns_info::UpnDnsInfo,
};
#[cfg(windows)]
pub(crate) use self::ndr::filetime_to_datetime;
use self::ndr::Reader;
use crate::config::skew_window;
use chrono::{DateTime, Utc};
use std::{collections::BTreeSet, time::Duration};
use thiserror::Error;

const PAC_VERSION: u32 = 0;
const PAC_ALIGNMENT: u64 = 8;
const PAC_INFO_BUFFER_LENGTH: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacError {
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error("PAC is missing a server or KDC signature")]
    MissingSignature,
    #[error("PAC signature is not well formed")]
    InvalidSignature,
    #[error("PAC timestamp is outside the allowed clock skew")]
    StaleTimestamp,
    #[error("PAC domain {0} does not match the configured realm")]
    RealmMismatch(String),
}

pub struct PacType;

macro_rules! pac_type {
    ($name:ident, $int:expr) => {
        pub const $name: u32 = $int;
    };
}

impl PacType {
    pac_type!(LOGON_INFO, 1);
    pac_type!(SERVER_CHECKSUM, 6);
    pac_type!(PRIVSVR_CHECKSUM, 7);
    pac_type!(CLIENT_INFO, 10);
    pac_type!(UPN_DNS_INFO, 12);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacBuffer {
    LogonInfo(LogonInfo),
    ServerChecksum(PacSignature),
    KdcChecksum(PacSignature),
    ClientInfo(ClientInfo),
    UpnDnsInfo(UpnDnsInfo),
    Unknown { buffer_type: u32, data: Vec<u8> },
}

impl PacBuffer {
    pub fn buffer_type(&self) -> u32 {
        match self {
            Self::LogonInfo(_) => PacType::LOGON_INFO,
            Self::ServerChecksum(_) => PacType::SERVER_CHECKSUM,
            Self::KdcChecksum(_) => PacType::PRIVSVR_CHECKSUM,
            Self::ClientInfo(_) => PacType::CLIENT_INFO,
            Self::UpnDnsInfo(_) => PacType::UPN_DNS_INFO,
            Self::Unknown { buffer_type, .. } => *buffer_type,
        }
    }

    fn parse(buffer_type: u32, data: &[u8]) -> Result<Self, PacError> {
        Ok(match buffer_type {
            PacType::LOGON_INFO => Self::LogonInfo(LogonInfo::parse(data)?),
            PacType::SERVER_CHECKSUM => Self::ServerChecksum(PacSignature::parse(data)?),
            PacType::PRIVSVR_CHECKSUM => Self::KdcChecksum(PacSignature::parse(data)?),
            PacType::CLIENT_INFO => Self::ClientInfo(ClientInfo::parse(data)?),
            PacType::UPN_DNS_INFO => Self::UpnDnsInfo(UpnDnsInfo::parse(data)?),
            buffer_type => Self::Unknown {
                buffer_type,
                data: data.to_owned(),
            },
        })
    }
}

/// A decoded PACTYPE (MS-PAC 2.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pac {
    pub buffers: Vec<PacBuffer>,
}

impl Pac {
    pub fn parse(data: &[u8]) -> Result<Self, PacError> {
        let mut r = Reader::new(data, "PACTYPE");
        let count = r.u32()?;
        let version = r.u32()?;
        if version != PAC_VERSION {
            return Err(r.malformed());
        }
        if (count as usize).saturating_mul(PAC_INFO_BUFFER_LENGTH) > r.remaining() {
            return Err(r.malformed());
        }

        let mut seen = BTreeSet::new();
        let mut buffers = vec![];
        for _ in 0..count {
            let buffer_type = r.u32()?;
            let size = r.u32()?;
            let offset = r.u64()?;
            if offset % PAC_ALIGNMENT != 0 {
                return Err(r.malformed());
            }
            let data = usize::try_from(offset)
                .ok()
                .and_then(|start| data.get(start..start.checked_add(size as usize)?))
                .ok_or_else(|| r.malformed())?;
            let buffer = PacBuffer::parse(buffer_type, data)?;
            if !matches!(buffer, PacBuffer::Unknown { .. }) && !seen.insert(buffer_type) {
                return Err(r.malformed());
            }
            buffers.push(buffer);
        }
        Ok(Self { buffers })
    }

    pub fn logon_info(&self) -> Option<&LogonInfo> {
        self.buffers.iter().find_map(|buffer| match buffer {
            PacBuffer::LogonInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn client_info(&self) -> Option<&ClientInfo> {
        self.buffers.iter().find_map(|buffer| match buffer {
            PacBuffer::ClientInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn upn_dns_info(&self) -> Option<&UpnDnsInfo> {
        self.buffers.iter().find_map(|buffer| match buffer {
            PacBuffer::UpnDnsInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn server_checksum(&self) -> Option<&PacSignature> {
        self.buffers.iter().find_map(|buffer| match buffer {
            PacBuffer::ServerChecksum(signature) => Some(signature),
            _ => None,
        })
    }

    pub fn kdc_checksum(&self) -> Option<&PacSignature> {
        self.buffers.iter().find_map(|buffer| match buffer {
            PacBuffer::KdcChecksum(signature) => Some(signature),
            _ => None,
        })
    }
}

/// What a PAC is checked against.
#[derive(Debug, Clone)]
pub struct PacCheck<'a> {
    pub realm: &'a str,
    pub now: DateTime<Utc>,
    pub clock_skew: Duration,
    /// The ticket's authtime, which PAC_CLIENT_INFO must agree with.
    pub auth_time: Option<DateTime<Utc>>,
}

impl<'a> PacCheck<'a> {
    pub fn new(realm: &'a str) -> Self {
        Self {
            realm,
            now: Utc::now(),
            clock_skew: crate::config::DEFAULT_CLOCK_SKEW,
            auth_time: None,
        }
    }
}

/// The identity facts authorization needs from a PAC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacInfo {
    pub group_sids: BTreeSet<String>,
    pub user_sid: Option<String>,
    pub logon_name: Option<String>,
    pub logon_domain: Option<String>,
    pub upn: Option<String>,
    pub dns_domain: Option<String>,
    pub logon_time: Option<DateTime<Utc>>,
}

pub fn extract(raw: &[u8], realm: &str) -> Result<PacInfo, PacError> {
    extract_with(raw, &PacCheck::new(realm))
}

pub fn extract_with(raw: &[u8], check: &PacCheck<'_>) -> Result<PacInfo, PacError> {
    let pac = Pac::parse(raw)?;
    if pac.server_checksum().is_none() || pac.kdc_checksum().is_none() {
        return Err(PacError::MissingSignature);
    }
    let logon_info = pac
        .logon_info()
        .ok_or(PacError::Malformed("PAC without KERB_VALIDATION_INFO"))?;

    let (_, latest) = skew_window(check.now, check.clock_skew);
    if matches!(logon_info.logon_time, Some(logon_time) if logon_time > latest) {
        return Err(PacError::StaleTimestamp);
    }
    if let (Some(client_info), Some(auth_time)) = (pac.client_info(), check.auth_time) {
        let (earliest, latest) = skew_window(auth_time, check.clock_skew);
        match client_info.client_id {
            Some(client_id) if client_id >= earliest && client_id <= latest => (),
            _ => return Err(PacError::StaleTimestamp),
        }
    }
    if let Some(upn_dns_info) = pac.upn_dns_info() {
        if !upn_dns_info.dns_domain.eq_ignore_ascii_case(check.realm) {
            return Err(PacError::RealmMismatch(upn_dns_info.dns_domain.clone()));
        }
    }

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());
    Ok(PacInfo {
        group_sids: logon_info
            .group_sids()
            .iter()
            .map(Sid::to_string)
            .collect(),
        user_sid: logon_info.user_sid().map(|sid| sid.to_string()),
        logon_name: non_empty(&logon_info.effective_name),
        logon_domain: non_empty(&logon_info.logon_domain_name),
        upn: pac.upn_dns_info().and_then(|info| non_empty(&info.upn)),
        dns_domain: pac.upn_dns_info().and_then(|info| non_empty(&info.dns_domain)),
        logon_time: logon_info.logon_time,
    })
}
