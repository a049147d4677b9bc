use super::{Enctype, Keyblock};
use kerberos_crypto::{new_kerberos_cipher, KerberosCipher};
use thiserror::Error;

// RFC 3962 confounder + truncated HMAC-SHA1
const AES_MIN_CIPHERTEXT: usize = 16 + 12;
// RFC 4757 HMAC-MD5 checksum + confounder
const RC4_MIN_CIPHERTEXT: usize = 16 + 8;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported enctype: {0}")]
    UnsupportedEnctype(Enctype),
    #[error("key length {actual} does not match {enctype}")]
    KeyLength { enctype: Enctype, actual: usize },
    #[error("ciphertext too short")]
    ShortCiphertext,
    #[error("decrypt integrity check failed")]
    Integrity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage(pub i32);

macro_rules! key_usage {
    ($name:ident, $int:expr) => {
        pub const $name: KeyUsage = KeyUsage($int);
    };
}

impl KeyUsage {
    // Ticket enc-part, encrypted with the service key
    key_usage!(TICKET, 2);
    // AP-REQ Authenticator, encrypted with the ticket session key
    key_usage!(AP_REQ_AUTHENTICATOR, 11);
}

impl Keyblock {
    pub fn decrypt(&self, usage: KeyUsage, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check_length()?;
        let min_length = if self.enctype == Enctype::ARCFOUR_HMAC {
            RC4_MIN_CIPHERTEXT
        } else {
            AES_MIN_CIPHERTEXT
        };
        if ciphertext.len() < min_length {
            return Err(CryptoError::ShortCiphertext);
        }
        let cipher = new_kerberos_cipher(self.enctype.0)
            .map_err(|_| CryptoError::UnsupportedEnctype(self.enctype))?;
        cipher
            .decrypt(&self.contents, usage.0, ciphertext)
            .map_err(|_| CryptoError::Integrity)
    }

    pub fn encrypt(&self, usage: KeyUsage, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check_length()?;
        let cipher = new_kerberos_cipher(self.enctype.0)
            .map_err(|_| CryptoError::UnsupportedEnctype(self.enctype))?;
        Ok(cipher.encrypt(&self.contents, usage.0, plaintext))
    }

    fn check_length(&self) -> Result<(), CryptoError> {
        if !self.enctype.is_supported() {
            return Err(CryptoError::UnsupportedEnctype(self.enctype));
        }
        match self.enctype.key_length() {
            Some(length) if length == self.contents.len() => Ok(()),
            _ => Err(CryptoError::KeyLength {
                enctype: self.enctype,
                actual: self.contents.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt_with_each_supported_enctype() {
        for enctype in [
            Enctype::AES256_CTS_HMAC_SHA1_96,
            Enctype::AES128_CTS_HMAC_SHA1_96,
            Enctype::ARCFOUR_HMAC,
        ] {
            let key = Keyblock::random(enctype).unwrap();
            let ciphertext = key.encrypt(KeyUsage::TICKET, b"enc-ticket-part").unwrap();
            let plaintext = key.decrypt(KeyUsage::TICKET, &ciphertext).unwrap();
            assert_eq!(plaintext, b"enc-ticket-part");
        }
    }

    #[test]
    fn test_decrypt_with_wrong_key_usage_fails() {
        let key = Keyblock::random(Enctype::AES256_CTS_HMAC_SHA1_96).unwrap();
        let ciphertext = key.encrypt(KeyUsage::TICKET, b"payload").unwrap();
        assert!(matches!(
            key.decrypt(KeyUsage::AP_REQ_AUTHENTICATOR, &ciphertext),
            Err(CryptoError::Integrity)
        ));
    }

    #[test]
    fn test_rejects_mismatched_key_length_and_short_input() {
        let key = Keyblock::new(Enctype::AES256_CTS_HMAC_SHA1_96, vec![0; 16]);
        assert!(matches!(
            key.decrypt(KeyUsage::TICKET, &[0; 64]),
            Err(CryptoError::KeyLength { .. })
        ));
        let key = Keyblock::new(Enctype::AES128_CTS_HMAC_SHA1_96, vec![0; 16]);
        assert!(matches!(
            key.decrypt(KeyUsage::TICKET, &[0; 10]),
            Err(CryptoError::ShortCiphertext)
        ));
        let key = Keyblock::new(Enctype::DES_CBC_MD5, vec![0; 8]);
        assert!(matches!(
            key.encrypt(KeyUsage::TICKET, b"x"),
            Err(CryptoError::UnsupportedEnctype(_))
        ));
    }
}
