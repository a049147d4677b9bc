use super::keytype::Keytype;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! unsupported_enctype {
    ($enctype:ident, $name:expr) => {
        UnsupportedEnctype {
            enctype: Enctype::$enctype,
            name: $name,
        }
    };
}

const UNSUPPORTED_ENCTYPES: [UnsupportedEnctype; 5] = [
    unsupported_enctype!(DES_CBC_CRC, "des-cbc-crc"),
    unsupported_enctype!(DES_CBC_MD4, "des-cbc-md4"),
    unsupported_enctype!(DES_CBC_MD5, "des-cbc-md5"),
    unsupported_enctype!(DES_CBC_RAW, "des-cbc-raw"),
    unsupported_enctype!(DES_HMAC_SHA1, "des-hmac-sha1"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Enctype(pub i32);

macro_rules! enctype {
    ($enctype:ident, $int:expr) => {
        pub const $enctype: Enctype = Enctype($int);
    };
}

impl Enctype {
    enctype!(NULL, 0x0000);
    // @deprecated no longer supported
    enctype!(DES_CBC_CRC, 0x0001);
    // @deprecated no longer supported
    enctype!(DES_CBC_MD4, 0x0002);
    // @deprecated no longer supported
    enctype!(DES_CBC_MD5, 0x0003);
    // @deprecated no longer supported
    enctype!(DES_CBC_RAW, 0x0004);
    // @deprecated no longer supported
    enctype!(DES_HMAC_SHA1, 0x0008);

    enctype!(DES3_CBC_SHA1, 0x0010);
    // RFC 3962
    enctype!(AES128_CTS_HMAC_SHA1_96, 0x0011);
    // RFC 3962
    enctype!(AES256_CTS_HMAC_SHA1_96, 0x0012);
    // RFC 8009
    enctype!(AES128_CTS_HMAC_SHA256_128, 0x0013);
    // RFC 8009
    enctype!(AES256_CTS_HMAC_SHA384_192, 0x0014);
    // RFC 4757
    enctype!(ARCFOUR_HMAC, 0x0017);
    // RFC 4757
    enctype!(ARCFOUR_HMAC_EXP, 0x0018);
    // RFC 6803
    enctype!(CAMELLIA128_CTS_CMAC, 0x0019);
    // RFC 6803
    enctype!(CAMELLIA256_CTS_CMAC, 0x001a);
    enctype!(UNKNOWN, 0x01ff);

    pub fn is_deprecated(self) -> bool {
        Keytype::find_enctype(self)
            .map(|keytype| keytype.is_deprecated())
            .unwrap_or(true)
    }

    pub fn is_supported(self) -> bool {
        Keytype::find_enctype(self)
            .map(|keytype| keytype.is_supported())
            .unwrap_or(false)
    }

    pub fn key_length(self) -> Option<usize> {
        Keytype::find_enctype(self).map(|keytype| keytype.key_length())
    }

    pub fn name(self, shortest: bool) -> Option<&'static str> {
        UnsupportedEnctype::find_name(self)
            .or_else(|| Keytype::find_enctype(self).map(|keytype| keytype.name(shortest)))
    }

    pub fn deprecated_name(self, shortest: bool) -> String {
        match self.name(shortest) {
            Some(name) if self.is_deprecated() => format!("DEPRECATED:{}", name),
            Some(name) => name.to_owned(),
            None => format!("etype {}", self.0),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Keytype::find_name(name).map(|keytype| keytype.enctype())
    }
}

impl fmt::Display for Enctype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name(false) {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "etype {}", self.0),
        }
    }
}

struct UnsupportedEnctype {
    enctype: Enctype,
    name: &'static str,
}

impl UnsupportedEnctype {
    fn find_name(enctype: Enctype) -> Option<&'static str> {
        UNSUPPORTED_ENCTYPES
            .iter()
            .find(|e| e.enctype == enctype)
            .map(|e| e.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deprecated_name() {
        assert_eq!(
            Enctype::ARCFOUR_HMAC.deprecated_name(false),
            "DEPRECATED:arcfour-hmac"
        );
        assert_eq!(
            Enctype::AES256_CTS_HMAC_SHA1_96.deprecated_name(true),
            "aes256-cts"
        );
        assert_eq!(Enctype(0x7f).deprecated_name(false), "etype 127");
    }

    #[test]
    fn test_supported_enctypes() {
        assert!(Enctype::AES256_CTS_HMAC_SHA1_96.is_supported());
        assert!(Enctype::AES128_CTS_HMAC_SHA1_96.is_supported());
        assert!(Enctype::ARCFOUR_HMAC.is_supported());
        assert!(!Enctype::DES_CBC_MD5.is_supported());
        assert!(!Enctype::CAMELLIA256_CTS_CMAC.is_supported());
    }
}
