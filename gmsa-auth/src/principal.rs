use crate::Flags;
use std::fmt;
use thiserror::Error;

const REALM_SEP: u8 = b'@';
const COMPONENT_SEP: u8 = b'/';
const KRB5_TGS_NAME: &str = "krbtgt";
const KRB5_WELLKNOWN_NAMESTR: &str = "WELLKNOWN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("malformed principal name")]
    Malformed,
    #[error("principal name has no realm")]
    NoRealm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub realm: Vec<u8>,
    pub components: Vec<Vec<u8>>,
    pub name_type: NameType,
}

macro_rules! principal_flag {
    ($name:ident, $value:expr) => {
        pub const $name: Flags = $value;
    };
}

impl Principal {
    principal_flag!(PARSE_NO_REALM, 0x1);
    principal_flag!(PARSE_REQUIRE_REALM, 0x2);
    principal_flag!(PARSE_ENTERPRISE, 0x4);

    principal_flag!(UNPARSE_NO_REALM, 0x2);

    principal_flag!(COMPARE_IGNORE_REALM, 1);
    principal_flag!(COMPARE_CASEFOLD, 4);

    pub fn new(components: &[&str], realm: &str) -> Self {
        let components: Vec<Vec<u8>> = components
            .iter()
            .map(|c| c.as_bytes().to_owned())
            .collect();
        let name_type = Self::infer_principal_type(&components);
        Self {
            realm: realm.as_bytes().to_owned(),
            components,
            name_type,
        }
    }

    /// Parses `comp1/comp2@REALM`. Without a realm in `name`, `default_realm`
    /// is used unless `PARSE_NO_REALM` is set.
    pub fn parse_name(
        name: &str,
        default_realm: Option<&str>,
        flags: Flags,
    ) -> Result<Self, PrincipalError> {
        if name.is_empty() || name.ends_with('\\') {
            return Err(PrincipalError::Malformed);
        }
        let enterprise = flags & Self::PARSE_ENTERPRISE != 0;
        let require_realm = flags & Self::PARSE_REQUIRE_REALM != 0;
        let no_realm = flags & Self::PARSE_NO_REALM != 0;

        let find_realm_from = if enterprise {
            name.find('@').map(|i| i + 1).unwrap_or_default()
        } else {
            0
        };
        let (components, realm) = match name[find_realm_from..].find('@') {
            None => (name, None),
            Some(i) => (
                &name[..find_realm_from + i],
                Some(&name[find_realm_from + i + 1..]),
            ),
        };

        let components: Vec<Vec<u8>> = if enterprise {
            vec![components.as_bytes().to_owned()]
        } else {
            components
                .split('/')
                .map(|c| c.as_bytes().to_owned())
                .collect()
        };
        if components.iter().any(|c| c.is_empty()) {
            return Err(PrincipalError::Malformed);
        }

        let realm = match realm {
            Some(realm) => {
                if no_realm || realm.is_empty() || realm.contains('/') || realm.contains('@') {
                    return Err(PrincipalError::Malformed);
                }
                realm.as_bytes().to_owned()
            }
            None => {
                if require_realm {
                    return Err(PrincipalError::NoRealm);
                }
                match (no_realm, default_realm) {
                    (true, _) | (false, None) => vec![],
                    (false, Some(realm)) => realm.as_bytes().to_owned(),
                }
            }
        };

        let name_type = if enterprise {
            NameType::ENTERPRISE_PRINCIPAL
        } else {
            Self::infer_principal_type(&components)
        };

        Ok(Principal {
            realm,
            components,
            name_type,
        })
    }

    fn infer_principal_type(components: &[Vec<u8>]) -> NameType {
        if components.len() == 2 && components[0].eq(KRB5_TGS_NAME.as_bytes()) {
            NameType::SRV_INST
        } else if components.len() >= 2 && components[0].eq(KRB5_WELLKNOWN_NAMESTR.as_bytes()) {
            NameType::WELLKNOWN
        } else {
            NameType::PRINCIPAL
        }
    }

    pub fn unparse_name(&self, flags: Flags) -> String {
        let mut name = self.components.join(&COMPONENT_SEP);
        if flags & Self::UNPARSE_NO_REALM == 0 && !self.realm.is_empty() {
            name = [name, self.realm.clone()].join(&REALM_SEP);
        }
        String::from_utf8_lossy(&name).into_owned()
    }

    pub fn realm_str(&self) -> String {
        String::from_utf8_lossy(&self.realm).into_owned()
    }

    pub fn compare_with_flags(&self, other: &Self, flags: Flags) -> bool {
        let casefold = flags & Self::COMPARE_CASEFOLD != 0;
        if self.components.len() != other.components.len() {
            return false;
        }
        if flags & Self::COMPARE_IGNORE_REALM == 0
            && !Self::compare_realm_with_flags(&self.realm, &other.realm, flags)
        {
            return false;
        }
        self.components
            .iter()
            .zip(other.components.iter())
            .all(|(component_1, component_2)| {
                if casefold {
                    component_1.eq_ignore_ascii_case(component_2)
                } else {
                    component_1.eq(component_2)
                }
            })
    }

    pub fn compare_realm_with_flags(realm_1: &[u8], realm_2: &[u8], flags: Flags) -> bool {
        if flags & Self::COMPARE_CASEFOLD != 0 {
            realm_1.eq_ignore_ascii_case(realm_2)
        } else {
            realm_1.eq(realm_2)
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unparse_name(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameType(pub i32);

macro_rules! name_type {
    ($name_type:ident, $int:expr) => {
        pub const $name_type: NameType = NameType($int);
    };
}

impl NameType {
    // Name type not known
    name_type!(UNKNOWN, 0);
    // Just the name of the principal as in DCE, or for users
    name_type!(PRINCIPAL, 1);
    // Service and other unique instance (krbtgt)
    name_type!(SRV_INST, 2);
    // Service with host name as instance (telnet, rcommands)
    name_type!(SRV_HST, 3);
    // Windows 2000 UPN
    name_type!(ENTERPRISE_PRINCIPAL, 10);
    // Well-known (special) principal
    name_type!(WELLKNOWN, 11);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_service_principal() {
        let principal = Principal::parse_name("HTTP/vault.example.com@EXAMPLE.COM", None, 0).unwrap();
        assert_eq!(principal.components.len(), 2);
        assert_eq!(principal.realm, b"EXAMPLE.COM");
        assert_eq!(principal.name_type, NameType::PRINCIPAL);
        assert_eq!(principal.to_string(), "HTTP/vault.example.com@EXAMPLE.COM");
        assert_eq!(
            principal.unparse_name(Principal::UNPARSE_NO_REALM),
            "HTTP/vault.example.com"
        );
    }

    #[test]
    fn test_parse_uses_default_realm() {
        let principal = Principal::parse_name("HOST$", Some("EXAMPLE.COM"), 0).unwrap();
        assert_eq!(principal.to_string(), "HOST$@EXAMPLE.COM");
        assert_eq!(
            Principal::parse_name("HOST$", None, Principal::PARSE_REQUIRE_REALM),
            Err(PrincipalError::NoRealm)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for name in ["", "a//b@R", "a@R/x", "a@", "a\\"] {
            assert_eq!(
                Principal::parse_name(name, None, 0),
                Err(PrincipalError::Malformed),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_compare_casefold() {
        let a = Principal::new(&["HTTP", "Vault.Example.com"], "example.com");
        let b = Principal::new(&["http", "vault.example.com"], "EXAMPLE.COM");
        assert!(!a.compare_with_flags(&b, 0));
        assert!(a.compare_with_flags(&b, Principal::COMPARE_CASEFOLD));
    }
}
