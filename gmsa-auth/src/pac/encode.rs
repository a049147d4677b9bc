use super::{
    ClientInfo, ExtraSid, GroupMembership, LogonInfo, PacSignature, PacType, Sid, SignatureType,
    UpnDnsInfo,
};
use chrono::{DateTime, Utc};

const PAC_HEADER_LENGTH: usize = 8;

/// Assembles a PAC the way a domain controller lays one out: logon info,
/// client info, UPN and DNS info, then the server and KDC signatures.
/// Signatures are filled with placeholder bytes.
#[derive(Debug, Clone)]
pub struct PacBuilder {
    logon_info: LogonInfo,
    client_time: Option<DateTime<Utc>>,
    upn_dns_info: Option<UpnDnsInfo>,
    server_checksum: Option<PacSignature>,
    kdc_checksum: Option<PacSignature>,
    duplicate_logon_info: bool,
    extra_buffers: Vec<(u32, Vec<u8>)>,
}

fn placeholder_signature(signature_type: i32) -> PacSignature {
    let length = SignatureType::signature_length(signature_type).unwrap_or(0);
    PacSignature {
        signature_type,
        signature: vec![0x5a; length],
        rodc_identifier: None,
    }
}

impl PacBuilder {
    pub fn new(domain_sid: Sid, user_rid: u32, account_name: &str, dns_domain: &str) -> Self {
        Self {
            logon_info: LogonInfo {
                effective_name: account_name.to_owned(),
                user_id: user_rid,
                primary_group_id: 515,
                logon_domain_name: dns_domain
                    .split('.')
                    .next()
                    .unwrap_or_default()
                    .to_uppercase(),
                logon_domain_id: Some(domain_sid),
                ..Default::default()
            },
            client_time: None,
            upn_dns_info: Some(UpnDnsInfo {
                upn: format!("{}@{}", account_name, dns_domain.to_lowercase()),
                dns_domain: dns_domain.to_owned(),
                ..Default::default()
            }),
            server_checksum: Some(placeholder_signature(SignatureType::HMAC_SHA1_96_AES256)),
            kdc_checksum: Some(placeholder_signature(SignatureType::HMAC_SHA1_96_AES256)),
            duplicate_logon_info: false,
            extra_buffers: vec![],
        }
    }

    /// Domain-relative group RIDs.
    pub fn groups(mut self, rids: &[u32]) -> Self {
        self.logon_info.group_ids = rids.iter().copied().map(GroupMembership::new).collect();
        self
    }

    pub fn extra_sid(mut self, sid: Sid) -> Self {
        self.logon_info.extra_sids.push(ExtraSid {
            sid,
            attributes: super::logon_info::DEFAULT_GROUP_ATTRIBUTES,
        });
        self
    }

    pub fn resource_groups(mut self, domain_sid: Sid, rids: &[u32]) -> Self {
        self.logon_info.resource_group_domain_sid = Some(domain_sid);
        self.logon_info.resource_group_ids =
            rids.iter().copied().map(GroupMembership::new).collect();
        self
    }

    /// Logon time, and the client info time unless set separately.
    pub fn logon_time(mut self, time: DateTime<Utc>) -> Self {
        self.logon_info.logon_time = Some(time);
        self
    }

    pub fn client_time(mut self, time: DateTime<Utc>) -> Self {
        self.client_time = Some(time);
        self
    }

    pub fn without_upn_dns_info(mut self) -> Self {
        self.upn_dns_info = None;
        self
    }

    pub fn server_checksum(mut self, signature_type: i32, signature: Vec<u8>) -> Self {
        self.server_checksum = Some(PacSignature {
            signature_type,
            signature,
            rodc_identifier: None,
        });
        self
    }

    pub fn without_server_checksum(mut self) -> Self {
        self.server_checksum = None;
        self
    }

    pub fn without_kdc_checksum(mut self) -> Self {
        self.kdc_checksum = None;
        self
    }

    pub fn duplicate_logon_info(mut self) -> Self {
        self.duplicate_logon_info = true;
        self
    }

    pub fn buffer(mut self, buffer_type: u32, data: Vec<u8>) -> Self {
        self.extra_buffers.push((buffer_type, data));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let logon_info = self.logon_info.encode();
        let mut buffers = vec![(PacType::LOGON_INFO, logon_info.clone())];
        if self.duplicate_logon_info {
            buffers.push((PacType::LOGON_INFO, logon_info));
        }
        let client_info = ClientInfo {
            client_id: self.client_time.or(self.logon_info.logon_time),
            name: self.logon_info.effective_name.clone(),
        };
        buffers.push((PacType::CLIENT_INFO, client_info.encode()));
        if let Some(upn_dns_info) = &self.upn_dns_info {
            buffers.push((PacType::UPN_DNS_INFO, upn_dns_info.encode()));
        }
        if let Some(signature) = &self.server_checksum {
            buffers.push((PacType::SERVER_CHECKSUM, signature.encode()));
        }
        if let Some(signature) = &self.kdc_checksum {
            buffers.push((PacType::PRIVSVR_CHECKSUM, signature.encode()));
        }
        buffers.extend(self.extra_buffers.iter().cloned());

        let mut offset = PAC_HEADER_LENGTH + 16 * buffers.len();
        let mut header = Vec::with_capacity(offset);
        header.extend_from_slice(&(buffers.len() as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        let mut body = vec![];
        for (buffer_type, data) in &buffers {
            header.extend_from_slice(&buffer_type.to_le_bytes());
            header.extend_from_slice(&(data.len() as u32).to_le_bytes());
            header.extend_from_slice(&(offset as u64).to_le_bytes());
            body.extend_from_slice(data);
            while body.len() % 8 != 0 {
                body.push(0);
            }
            offset = PAC_HEADER_LENGTH + 16 * buffers.len() + body.len();
        }
        header.extend(body);
        header
    }
}
