use super::{error, Error};

error!(
    KRB5KRB_AP_ERR_BAD_INTEGRITY,
    -1765328353, "Decrypt integrity check failed"
);
error!(KRB5KRB_AP_ERR_TKT_EXPIRED, -1765328352, "Ticket expired");
error!(
    KRB5KRB_AP_ERR_BADMATCH,
    -1765328348, "Ticket/authenticator don't match"
);
error!(KRB5KRB_AP_ERR_SKEW, -1765328347, "Clock skew too great");
error!(
    KRB5KRB_AP_ERR_BADVERSION,
    -1765328345, "Protocol version mismatch"
);
error!(KRB5KRB_AP_ERR_MSG_TYPE, -1765328344, "Invalid message type");
error!(KRB5KRB_AP_ERR_MODIFIED, -1765328343, "Message stream modified");
error!(KRB5KRB_AP_ERR_NOKEY, -1765328339, "Service key not available");
error!(KRB5_BAD_ENCTYPE, -1765328196, "Bad encryption type");
error!(KRB5_KT_NOTFOUND, -1765328203, "Key table entry not found");
error!(KRB5_KT_END, -1765328202, "End of key table reached");
error!(
    KRB5_KEYTAB_BADVNO,
    -1765328171, "Unsupported key table format version number"
);
