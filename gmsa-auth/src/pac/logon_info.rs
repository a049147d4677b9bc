use super::{
    ndr::{Reader, Writer},
    PacError, Sid,
};
use chrono::{DateTime, Utc};

const WHAT: &str = "KERB_VALIDATION_INFO";
const NDR_VERSION: u8 = 1;
const NDR_LITTLE_ENDIAN: u8 = 0x10;
const NDR_COMMON_HEADER_LENGTH: u16 = 8;
const NDR_FILLER: u32 = 0xcccc_cccc;
const GROUP_MEMBERSHIP_SIZE: usize = 8;
const SID_AND_ATTRIBUTES_SIZE: usize = 8;

// SE_GROUP_MANDATORY | SE_GROUP_ENABLED_BY_DEFAULT | SE_GROUP_ENABLED
pub const DEFAULT_GROUP_ATTRIBUTES: u32 = 0x7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMembership {
    pub relative_id: u32,
    pub attributes: u32,
}

impl GroupMembership {
    pub fn new(relative_id: u32) -> Self {
        Self {
            relative_id,
            attributes: DEFAULT_GROUP_ATTRIBUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraSid {
    pub sid: Sid,
    pub attributes: u32,
}

/// The parts of KERB_VALIDATION_INFO this crate consumes. Fields the
/// authorization path never looks at are skipped on parse and zeroed on
/// encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogonInfo {
    pub logon_time: Option<DateTime<Utc>>,
    pub password_last_set: Option<DateTime<Utc>>,
    pub effective_name: String,
    pub full_name: String,
    pub logon_count: u16,
    pub user_id: u32,
    pub primary_group_id: u32,
    pub group_ids: Vec<GroupMembership>,
    pub user_flags: u32,
    pub logon_server: String,
    pub logon_domain_name: String,
    pub logon_domain_id: Option<Sid>,
    pub user_account_control: u32,
    pub extra_sids: Vec<ExtraSid>,
    pub resource_group_domain_sid: Option<Sid>,
    pub resource_group_ids: Vec<GroupMembership>,
}

impl LogonInfo {
    pub fn parse(data: &[u8]) -> Result<Self, PacError> {
        let mut r = Reader::new(data, WHAT);

        // common type header
        let version = r.u8()?;
        let endianness = r.u8()?;
        let header_length = r.u16()?;
        let _filler = r.u32()?;
        if version != NDR_VERSION
            || endianness != NDR_LITTLE_ENDIAN
            || header_length != NDR_COMMON_HEADER_LENGTH
        {
            return Err(r.malformed());
        }
        // private header
        let object_length = r.u32()?;
        let _filler = r.u32()?;
        if object_length as usize > r.remaining() {
            return Err(r.malformed());
        }
        if r.u32()? == 0 {
            return Err(r.malformed());
        }

        let logon_time = r.filetime()?;
        let _logoff_time = r.filetime()?;
        let _kick_off_time = r.filetime()?;
        let password_last_set = r.filetime()?;
        let _password_can_change = r.filetime()?;
        let _password_must_change = r.filetime()?;
        let effective_name = r.unicode_string_header()?;
        let full_name = r.unicode_string_header()?;
        let logon_script = r.unicode_string_header()?;
        let profile_path = r.unicode_string_header()?;
        let home_directory = r.unicode_string_header()?;
        let home_directory_drive = r.unicode_string_header()?;
        let logon_count = r.u16()?;
        let _bad_password_count = r.u16()?;
        let user_id = r.u32()?;
        let primary_group_id = r.u32()?;
        let group_count = r.u32()?;
        let group_ids_pointer = r.u32()?;
        let user_flags = r.u32()?;
        let _user_session_key = r.take(16)?;
        let logon_server = r.unicode_string_header()?;
        let logon_domain_name = r.unicode_string_header()?;
        let logon_domain_id_pointer = r.u32()?;
        let _reserved1 = r.take(8)?;
        let user_account_control = r.u32()?;
        let _sub_auth_status = r.u32()?;
        let _last_successful_i_logon = r.filetime()?;
        let _last_failed_i_logon = r.filetime()?;
        let _failed_i_logon_count = r.u32()?;
        let _reserved3 = r.u32()?;
        let sid_count = r.u32()?;
        let extra_sids_pointer = r.u32()?;
        let resource_group_domain_sid_pointer = r.u32()?;
        let resource_group_count = r.u32()?;
        let resource_group_ids_pointer = r.u32()?;

        // deferred referents, in declaration order
        let effective_name = r.deferred_string(effective_name)?;
        let full_name = r.deferred_string(full_name)?;
        for header in [logon_script, profile_path, home_directory, home_directory_drive] {
            r.deferred_string(header)?;
        }
        let group_ids = group_memberships(&mut r, group_ids_pointer, group_count)?;
        let logon_server = r.deferred_string(logon_server)?;
        let logon_domain_name = r.deferred_string(logon_domain_name)?;
        let logon_domain_id = match logon_domain_id_pointer {
            0 => None,
            _ => Some(r.deferred_sid()?),
        };
        let extra_sids = extra_sids(&mut r, extra_sids_pointer, sid_count)?;
        let resource_group_domain_sid = match resource_group_domain_sid_pointer {
            0 => None,
            _ => Some(r.deferred_sid()?),
        };
        let resource_group_ids =
            group_memberships(&mut r, resource_group_ids_pointer, resource_group_count)?;

        Ok(Self {
            logon_time,
            password_last_set,
            effective_name,
            full_name,
            logon_count,
            user_id,
            primary_group_id,
            group_ids,
            user_flags,
            logon_server,
            logon_domain_name,
            logon_domain_id,
            user_account_control,
            extra_sids,
            resource_group_domain_sid,
            resource_group_ids,
        })
    }

    pub fn user_sid(&self) -> Option<Sid> {
        self.logon_domain_id
            .as_ref()
            .map(|domain| domain.with_rid(self.user_id))
    }

    /// Every group SID the logon carries: domain groups, extra SIDs, and
    /// resource groups.
    pub fn group_sids(&self) -> Vec<Sid> {
        let mut sids = vec![];
        if let Some(domain) = &self.logon_domain_id {
            sids.extend(self.group_ids.iter().map(|g| domain.with_rid(g.relative_id)));
        }
        sids.extend(self.extra_sids.iter().map(|extra| extra.sid.clone()));
        if let Some(domain) = &self.resource_group_domain_sid {
            sids.extend(
                self.resource_group_ids
                    .iter()
                    .map(|g| domain.with_rid(g.relative_id)),
            );
        }
        sids
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.pointer(true);
        w.filetime(self.logon_time);
        for _ in 0..2 {
            w.filetime(None);
        }
        w.filetime(self.password_last_set);
        for _ in 0..2 {
            w.filetime(None);
        }
        w.unicode_string_header(&self.effective_name);
        w.unicode_string_header(&self.full_name);
        for _ in 0..4 {
            w.unicode_string_header("");
        }
        w.u16(self.logon_count);
        w.u16(0);
        w.u32(self.user_id);
        w.u32(self.primary_group_id);
        w.u32(self.group_ids.len() as u32);
        w.pointer(!self.group_ids.is_empty());
        w.u32(self.user_flags);
        w.bytes(&[0; 16]);
        w.unicode_string_header(&self.logon_server);
        w.unicode_string_header(&self.logon_domain_name);
        w.pointer(self.logon_domain_id.is_some());
        w.bytes(&[0; 8]);
        w.u32(self.user_account_control);
        w.u32(0);
        w.filetime(None);
        w.filetime(None);
        w.u32(0);
        w.u32(0);
        w.u32(self.extra_sids.len() as u32);
        w.pointer(!self.extra_sids.is_empty());
        w.pointer(self.resource_group_domain_sid.is_some());
        w.u32(self.resource_group_ids.len() as u32);
        w.pointer(!self.resource_group_ids.is_empty());

        w.deferred_string(&self.effective_name);
        w.deferred_string(&self.full_name);
        write_group_memberships(&mut w, &self.group_ids);
        w.deferred_string(&self.logon_server);
        w.deferred_string(&self.logon_domain_name);
        if let Some(sid) = &self.logon_domain_id {
            w.deferred_sid(sid);
        }
        if !self.extra_sids.is_empty() {
            w.align(4);
            w.u32(self.extra_sids.len() as u32);
            for extra in &self.extra_sids {
                w.pointer(true);
                w.u32(extra.attributes);
            }
            for extra in &self.extra_sids {
                w.deferred_sid(&extra.sid);
            }
        }
        if let Some(sid) = &self.resource_group_domain_sid {
            w.deferred_sid(sid);
        }
        write_group_memberships(&mut w, &self.resource_group_ids);
        w.align(8);

        let body = w.buf;
        let mut buf = Vec::with_capacity(16 + body.len());
        buf.extend_from_slice(&[NDR_VERSION, NDR_LITTLE_ENDIAN]);
        buf.extend_from_slice(&NDR_COMMON_HEADER_LENGTH.to_le_bytes());
        buf.extend_from_slice(&NDR_FILLER.to_le_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend(body);
        buf
    }
}

fn group_memberships(
    r: &mut Reader<'_>,
    pointer: u32,
    count: u32,
) -> Result<Vec<GroupMembership>, PacError> {
    if pointer == 0 {
        return match count {
            0 => Ok(vec![]),
            _ => Err(r.malformed()),
        };
    }
    let array = r.conformant_array(count, GROUP_MEMBERSHIP_SIZE)?;
    Ok(array
        .chunks_exact(GROUP_MEMBERSHIP_SIZE)
        .map(|chunk| GroupMembership {
            relative_id: u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            attributes: u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
        })
        .collect())
}

fn extra_sids(r: &mut Reader<'_>, pointer: u32, count: u32) -> Result<Vec<ExtraSid>, PacError> {
    if pointer == 0 {
        return match count {
            0 => Ok(vec![]),
            _ => Err(r.malformed()),
        };
    }
    let array = r.conformant_array(count, SID_AND_ATTRIBUTES_SIZE)?;
    let mut headers = vec![];
    for chunk in array.chunks_exact(SID_AND_ATTRIBUTES_SIZE) {
        let sid_pointer = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let attributes = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        headers.push((sid_pointer, attributes));
    }
    let mut sids = vec![];
    for (sid_pointer, attributes) in headers {
        if sid_pointer == 0 {
            continue;
        }
        sids.push(ExtraSid {
            sid: r.deferred_sid()?,
            attributes,
        });
    }
    Ok(sids)
}

fn write_group_memberships(w: &mut Writer, groups: &[GroupMembership]) {
    if groups.is_empty() {
        return;
    }
    w.align(4);
    w.u32(groups.len() as u32);
    for group in groups {
        w.u32(group.relative_id);
        w.u32(group.attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn domain() -> Sid {
        "S-1-5-21-3623811015-3361044348-30300820".parse().unwrap()
    }

    fn logon_info() -> LogonInfo {
        LogonInfo {
            logon_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            effective_name: "alice".to_owned(),
            full_name: "Alice Example".to_owned(),
            logon_count: 12,
            user_id: 1104,
            primary_group_id: 513,
            group_ids: vec![GroupMembership::new(513), GroupMembership::new(1110)],
            user_flags: 0x20,
            logon_server: "DC01".to_owned(),
            logon_domain_name: "EXAMPLE".to_owned(),
            logon_domain_id: Some(domain()),
            extra_sids: vec![ExtraSid {
                sid: "S-1-18-1".parse().unwrap(),
                attributes: DEFAULT_GROUP_ATTRIBUTES,
            }],
            resource_group_domain_sid: Some("S-1-5-21-1-2-3".parse().unwrap()),
            resource_group_ids: vec![GroupMembership::new(2000)],
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_what_encode_writes() {
        let info = logon_info();
        let encoded = info.encode();
        assert_eq!(encoded.len() % 8, 0);
        assert_eq!(LogonInfo::parse(&encoded).unwrap(), info);
    }

    #[test]
    fn test_group_sids() {
        let info = logon_info();
        let sids: Vec<String> = info.group_sids().iter().map(Sid::to_string).collect();
        assert_eq!(
            sids,
            [
                "S-1-5-21-3623811015-3361044348-30300820-513",
                "S-1-5-21-3623811015-3361044348-30300820-1110",
                "S-1-18-1",
                "S-1-5-21-1-2-3-2000",
            ]
        );
        assert_eq!(
            info.user_sid().unwrap().to_string(),
            "S-1-5-21-3623811015-3361044348-30300820-1104"
        );
    }

    #[test]
    fn test_minimal_logon_info() {
        let info = LogonInfo::default();
        assert_eq!(LogonInfo::parse(&info.encode()).unwrap(), info);
        assert!(info.group_sids().is_empty());
    }

    #[test]
    fn test_rejects_truncated_or_mislabeled() {
        let encoded = logon_info().encode();
        for cut in [0, 7, 16, 20, 100, encoded.len() / 2, encoded.len() - 12] {
            assert!(LogonInfo::parse(&encoded[..cut]).is_err(), "cut at {}", cut);
        }
        let mut big_endian = encoded.clone();
        big_endian[1] = 0x00;
        assert_eq!(LogonInfo::parse(&big_endian), Err(PacError::Malformed(WHAT)));
    }
}
