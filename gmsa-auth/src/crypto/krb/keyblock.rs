use super::{CryptoError, Enctype};
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct Keyblock {
    pub enctype: Enctype,
    pub contents: Vec<u8>,
}

impl Keyblock {
    pub fn new(enctype: Enctype, contents: Vec<u8>) -> Self {
        Self { enctype, contents }
    }

    /// Fresh random key material, used for session keys of minted tickets.
    pub fn random(enctype: Enctype) -> Result<Self, CryptoError> {
        let length = enctype
            .key_length()
            .ok_or(CryptoError::UnsupportedEnctype(enctype))?;
        let contents = (0..length).map(|_| rand::random::<u8>()).collect();
        Ok(Self { enctype, contents })
    }
}

// Key bytes never reach logs.
impl fmt::Debug for Keyblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyblock")
            .field("enctype", &self.enctype)
            .field("contents", &format_args!("<{} bytes>", self.contents.len()))
            .finish()
    }
}
