use super::PacError;

pub struct SignatureType;

macro_rules! signature_type {
    ($name:ident, $int:expr) => {
        pub const $name: i32 = $int;
    };
}

impl SignatureType {
    signature_type!(HMAC_MD5, -138);
    signature_type!(HMAC_SHA1_96_AES128, 15);
    signature_type!(HMAC_SHA1_96_AES256, 16);

    pub fn signature_length(signature_type: i32) -> Option<usize> {
        match signature_type {
            Self::HMAC_MD5 => Some(16),
            Self::HMAC_SHA1_96_AES128 | Self::HMAC_SHA1_96_AES256 => Some(12),
            _ => None,
        }
    }
}

/// PAC_SIGNATURE_DATA, used by both the server and the KDC checksum buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacSignature {
    pub signature_type: i32,
    pub signature: Vec<u8>,
    pub rodc_identifier: Option<u16>,
}

impl PacSignature {
    pub fn parse(data: &[u8]) -> Result<Self, PacError> {
        let (signature_type, rest) = match data {
            [a, b, c, d, rest @ ..] => (i32::from_le_bytes([*a, *b, *c, *d]), rest),
            _ => return Err(PacError::InvalidSignature),
        };
        let length =
            SignatureType::signature_length(signature_type).ok_or(PacError::InvalidSignature)?;
        let rodc_identifier = match rest.len() {
            n if n == length => None,
            n if n == length + 2 => Some(u16::from_le_bytes([rest[length], rest[length + 1]])),
            _ => return Err(PacError::InvalidSignature),
        };
        Ok(Self {
            signature_type,
            signature: rest[..length].to_owned(),
            rodc_identifier,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.signature_type.to_le_bytes().to_vec();
        buf.extend_from_slice(&self.signature);
        if let Some(rodc_identifier) = self.rodc_identifier {
            buf.extend_from_slice(&rodc_identifier.to_le_bytes());
        }
        buf
    }
}
