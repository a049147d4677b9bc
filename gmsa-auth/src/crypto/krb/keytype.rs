use super::Enctype;
use crate::Flags;

const MAX_ENCTYPE_ALIASES: usize = 2;
const ENCTYPE_WEAK: Flags = 1 << 0;
const ENCTYPE_DEPRECATED: Flags = 1 << 1;
// Backed by the cipher library; other enctypes parse but cannot decrypt.
const ENCTYPE_SUPPORTED: Flags = 1 << 2;

macro_rules! keytype {
    ($enctype:ident, $name:expr, $aliases:expr, $key_length:expr, $flags:expr) => {
        Keytype {
            enctype: Enctype::$enctype,
            name: $name,
            aliases: $aliases,
            key_length: $key_length,
            flags: $flags,
        }
    };
}

// Ordered strongest first; the position is the enctype preference.
const KEYTYPES: [Keytype; 9] = [
    keytype!(
        AES256_CTS_HMAC_SHA384_192,
        "aes256-cts-hmac-sha384-192",
        [Some("aes256-sha2"), None],
        32,
        0
    ),
    keytype!(
        AES128_CTS_HMAC_SHA256_128,
        "aes128-cts-hmac-sha256-128",
        [Some("aes128-sha2"), None],
        16,
        0
    ),
    keytype!(
        AES256_CTS_HMAC_SHA1_96,
        "aes256-cts-hmac-sha1-96",
        [Some("aes256-cts"), Some("aes256-sha1")],
        32,
        ENCTYPE_SUPPORTED
    ),
    keytype!(
        AES128_CTS_HMAC_SHA1_96,
        "aes128-cts-hmac-sha1-96",
        [Some("aes128-cts"), Some("aes128-sha1")],
        16,
        ENCTYPE_SUPPORTED
    ),
    keytype!(
        CAMELLIA256_CTS_CMAC,
        "camellia256-cts-cmac",
        [Some("camellia256-cts"), None],
        32,
        0
    ),
    keytype!(
        CAMELLIA128_CTS_CMAC,
        "camellia128-cts-cmac",
        [Some("camellia128-cts"), None],
        16,
        0
    ),
    keytype!(
        DES3_CBC_SHA1,
        "des3-cbc-sha1",
        [Some("des3-hmac-sha1"), Some("des3-cbc-sha1-kd")],
        24,
        ENCTYPE_DEPRECATED
    ),
    keytype!(
        ARCFOUR_HMAC,
        "arcfour-hmac",
        [Some("rc4-hmac"), Some("arcfour-hmac-md5")],
        16,
        ENCTYPE_DEPRECATED | ENCTYPE_SUPPORTED
    ),
    keytype!(
        ARCFOUR_HMAC_EXP,
        "arcfour-hmac-exp",
        [Some("rc4-hmac-exp"), Some("arcfour-hmac-md5-exp")],
        16,
        ENCTYPE_WEAK | ENCTYPE_DEPRECATED
    ),
];

#[derive(Debug)]
pub struct Keytype {
    enctype: Enctype,
    name: &'static str,
    aliases: [Option<&'static str>; MAX_ENCTYPE_ALIASES],
    key_length: usize,
    flags: Flags,
}

impl Keytype {
    pub fn all() -> impl Iterator<Item = &'static Self> {
        KEYTYPES.iter()
    }

    pub fn find_enctype(enctype: Enctype) -> Option<&'static Self> {
        KEYTYPES.iter().find(|ktp| ktp.enctype == enctype)
    }

    pub fn find_name(name: &str) -> Option<&'static Self> {
        KEYTYPES.iter().find(|ktp| {
            ktp.name.eq_ignore_ascii_case(name)
                || ktp
                    .aliases
                    .iter()
                    .flatten()
                    .any(|alias| alias.eq_ignore_ascii_case(name))
        })
    }

    pub fn rank(enctype: Enctype) -> usize {
        KEYTYPES
            .iter()
            .position(|ktp| ktp.enctype == enctype)
            .unwrap_or(KEYTYPES.len())
    }

    pub fn enctype(&self) -> Enctype {
        self.enctype
    }

    pub fn name(&self, shortest: bool) -> &'static str {
        let mut name = self.name;
        if shortest {
            self.aliases.iter().flatten().for_each(|alias| {
                if alias.len() < name.len() {
                    name = alias
                }
            });
        }
        name
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    pub fn is_deprecated(&self) -> bool {
        self.flags & ENCTYPE_DEPRECATED != 0
    }

    pub fn is_weak(&self) -> bool {
        self.flags & ENCTYPE_WEAK != 0
    }

    pub fn is_supported(&self) -> bool {
        self.flags & ENCTYPE_SUPPORTED != 0
    }
}
