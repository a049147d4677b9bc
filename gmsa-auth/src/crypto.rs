pub mod krb;
