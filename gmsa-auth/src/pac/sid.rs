use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

const MAX_SUB_AUTHORITIES: usize = 15;
const MAX_AUTHORITY: u64 = (1 << 48) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid SID: {0}")]
pub struct SidParseError(String);

/// A Windows security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid {
    pub revision: u8,
    pub authority: u64,
    pub sub_authorities: Vec<u32>,
}

impl Sid {
    pub fn new(authority: u64, sub_authorities: &[u32]) -> Self {
        Self {
            revision: 1,
            authority,
            sub_authorities: sub_authorities.to_owned(),
        }
    }

    /// The SID of an account or group in this domain.
    pub fn with_rid(&self, rid: u32) -> Self {
        let mut sid = self.clone();
        sid.sub_authorities.push(rid);
        sid
    }

    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }
}

// MS-DTYP 2.4.2.1: authorities below 2^32 print in decimal, larger ones in hex.
impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", self.revision)?;
        if self.authority >> 32 == 0 {
            write!(f, "{}", self.authority)?;
        } else {
            write!(f, "0x{:012X}", self.authority)?;
        }
        for sub_authority in &self.sub_authorities {
            write!(f, "-{}", sub_authority)?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = SidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || SidParseError(s.to_owned());
        let mut parts = s.trim().split('-');
        match parts.next() {
            Some(prefix) if prefix.eq_ignore_ascii_case("S") => (),
            _ => return Err(error()),
        }
        let revision = parts
            .next()
            .and_then(|r| r.parse::<u8>().ok())
            .filter(|r| *r == 1)
            .ok_or_else(error)?;
        let authority = match parts.next() {
            Some(hex) if hex.get(..2).map_or(false, |p| p.eq_ignore_ascii_case("0x")) => {
                u64::from_str_radix(&hex[2..], 16).map_err(|_| error())?
            }
            Some(decimal) => decimal.parse::<u64>().map_err(|_| error())?,
            None => return Err(error()),
        };
        if authority > MAX_AUTHORITY {
            return Err(error());
        }
        let sub_authorities = parts
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| error())?;
        if sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(error());
        }
        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }
}

impl Serialize for Sid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Sid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
