mod file_data;
mod keytab_entry;

pub use self::{
    file_data::{parse, serialize},
    keytab_entry::{KeytabEntry, Kvno},
};
use crate::{error, Enctype, Keytype, Principal, Timestamp};
use std::cmp::Reverse;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KeytabError {
    #[error("keytab is truncated")]
    Truncated,
    #[error("unsupported keytab format version")]
    UnsupportedVersion,
    #[error("malformed keytab entry")]
    MalformedEntry,
    #[error("keytab contains no entries")]
    NoEntries,
}

impl KeytabError {
    pub fn code(&self) -> &'static error::Error {
        match self {
            Self::UnsupportedVersion => error::KRB5_KEYTAB_BADVNO,
            Self::NoEntries => error::KRB5_KT_NOTFOUND,
            Self::Truncated | Self::MalformedEntry => error::KRB5_KT_END,
        }
    }
}

/// A parsed, non-empty keytab. Entry order is the order of the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keytab {
    entries: Vec<KeytabEntry>,
}

impl Keytab {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeytabError> {
        Self::from_entries(parse(bytes)?)
    }

    pub fn from_entries(entries: Vec<KeytabEntry>) -> Result<Self, KeytabError> {
        if entries.is_empty() {
            return Err(KeytabError::NoEntries);
        }
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, KeytabError> {
        serialize(&self.entries)
    }

    pub fn entries(&self) -> &[KeytabEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct key versions, ascending.
    pub fn kvnos(&self) -> Vec<Kvno> {
        let mut kvnos: Vec<Kvno> = self.entries.iter().map(|e| e.vno).collect();
        kvnos.sort_unstable();
        kvnos.dedup();
        kvnos
    }

    pub fn max_kvno(&self) -> Option<Kvno> {
        self.entries.iter().map(|e| e.vno).max()
    }

    /// Newest entry timestamp; approximates when the account password was last set.
    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        self.entries.iter().map(|e| e.timestamp).max()
    }

    /// Picks the decryption key for a ticket.
    ///
    /// Entries must match `spn` (components and realm compared case-insensitively)
    /// and carry an enctype listed in `candidates`. An entry with exactly
    /// `kvno_hint` wins; otherwise the highest kvno is used. Ties go to the
    /// enctype listed first in `candidates`, then to the newest entry (latest
    /// timestamp, then latest position).
    pub fn select_key(
        &self,
        spn: &Principal,
        kvno_hint: Option<Kvno>,
        candidates: &[Enctype],
    ) -> Option<&KeytabEntry> {
        let matching = || {
            self.entries.iter().enumerate().filter_map(|(index, entry)| {
                let rank = candidates.iter().position(|e| *e == entry.key.enctype)?;
                entry
                    .principal
                    .compare_with_flags(spn, Principal::COMPARE_CASEFOLD)
                    .then_some((index, rank, entry))
            })
        };

        if let Some(kvno) = kvno_hint {
            let exact = matching()
                .filter(|(_, _, entry)| entry.vno == kvno)
                .max_by_key(|(index, rank, entry)| (Reverse(*rank), entry.timestamp, *index));
            if let Some((_, _, entry)) = exact {
                return Some(entry);
            }
        }
        matching()
            .max_by_key(|(index, rank, entry)| (entry.vno, Reverse(*rank), entry.timestamp, *index))
            .map(|(_, _, entry)| entry)
    }

    /// The key a client would be issued for `spn`: strongest supported enctype
    /// at the highest kvno.
    pub fn best_key(&self, spn: &Principal) -> Option<&KeytabEntry> {
        let candidates = supported_enctypes();
        self.select_key(spn, None, &candidates)
    }
}

/// Enctypes that can decrypt tickets, strongest first.
pub fn supported_enctypes() -> Vec<Enctype> {
    Keytype::all()
        .filter(|keytype| keytype.is_supported())
        .map(|keytype| keytype.enctype())
        .collect()
}
