mod krb5_error;

pub use self::krb5_error::*;

pub type ErrorCode = i32;

/// A krb5 com_err style code with its message, attached to Kerberos failures
/// so audit logs line up with MIT tooling output.
#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    pub code: ErrorCode,
    pub message: &'static str,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

macro_rules! error {
    ($error:ident, $code:expr, $message:expr) => {
        pub const $error: &Error = &Error {
            code: $code,
            message: $message,
        };
    };
}

pub(self) use error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_message() {
        assert_eq!(
            KRB5KRB_AP_ERR_SKEW.to_string(),
            "Clock skew too great"
        );
        assert_eq!(KRB5_KEYTAB_BADVNO.code, -1765328171);
    }
}
