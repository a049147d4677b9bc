mod cipher;
mod enctype;
mod keyblock;
mod keytype;

pub use self::{
    cipher::{CryptoError, KeyUsage},
    enctype::Enctype,
    keyblock::Keyblock,
    keytype::Keytype,
};
