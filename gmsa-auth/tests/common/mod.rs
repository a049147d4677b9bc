#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use gmsa_auth::{
    pac::PacBuilder, ConfigRecord, Enctype, Keyblock, Keytab, KeytabEntry, Kvno, Principal,
    TicketBuilder,
};

pub const DOMAIN_SID: &str = "S-1-5-21-3623811015-3361044348-30300820";
pub const REALM: &str = "EXAMPLE.COM";
pub const SPN: &str = "HTTP/vault.example.com";
pub const CLIENT: &str = "HOST$@EXAMPLE.COM";

/// One AES256 and one RC4 key for the service at `vno`.
pub fn keytab(vno: Kvno) -> Keytab {
    let principal = Principal::parse_name(&format!("{}@{}", SPN, REALM), None, 0).unwrap();
    let entries = [Enctype::AES256_CTS_HMAC_SHA1_96, Enctype::ARCFOUR_HMAC]
        .into_iter()
        .map(|enctype| KeytabEntry {
            principal: principal.clone(),
            timestamp: 1_700_000_000,
            vno,
            key: Keyblock::random(enctype).unwrap(),
        })
        .collect();
    Keytab::from_entries(entries).unwrap()
}

pub fn record(keytab: &Keytab) -> ConfigRecord {
    ConfigRecord {
        realm: REALM.to_owned(),
        kdcs: vec!["dc1.example.com".to_owned()],
        spn: SPN.to_owned(),
        keytab: STANDARD.encode(keytab.to_bytes().unwrap()),
        ..Default::default()
    }
}

pub fn sid(rid: u32) -> String {
    format!("{}-{}", DOMAIN_SID, rid)
}

/// A ticket for `CLIENT` from the first keytab entry, carrying a PAC with the
/// given group RIDs.
pub fn ticket(keytab: &Keytab, rids: &[u32], now: DateTime<Utc>) -> TicketBuilder {
    let pac = PacBuilder::new(DOMAIN_SID.parse().unwrap(), 1104, "HOST$", REALM)
        .groups(rids)
        .logon_time(now)
        .build();
    TicketBuilder::new(
        &keytab.entries()[0],
        Principal::parse_name(CLIENT, None, 0).unwrap(),
    )
    .at(now)
    .pac(pac)
}

pub fn token(keytab: &Keytab, rids: &[u32]) -> String {
    ticket(keytab, rids, Utc::now()).build_base64().unwrap()
}
