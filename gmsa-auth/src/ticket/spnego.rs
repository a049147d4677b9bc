use super::{
    der::{self, DerResult, Fields},
    TicketError,
};
use der_parser::asn1_rs::{Any, Class, FromDer, Tag};

// DER contents (without tag and length) of the mechanism OIDs.
const OID_SPNEGO: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
const OID_KRB5: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];
// Windows clients advertise this alias of the Kerberos OID
const OID_MS_KRB5: &[u8] = &[0x2a, 0x86, 0x48, 0x82, 0xf7, 0x12, 0x01, 0x02, 0x02];

const TOK_ID_KRB_AP_REQ: [u8; 2] = [0x01, 0x00];
const AP_REQ_FIRST_BYTE: u8 = 0x6e;

/// Returns the DER AP-REQ inside a GSS-API token: either SPNEGO NegTokenInit
/// carrying a Kerberos mechToken, or a bare Kerberos initial context token.
pub fn unwrap_ap_req(token: &[u8]) -> Result<&[u8], TicketError> {
    let (oid, inner) = initial_context_token(token)?;
    match oid {
        OID_SPNEGO => {
            let mech_token = neg_token_init_mech_token(inner)?;
            // Some clients place the AP-REQ in mechToken without the GSS framing
            if mech_token.first() == Some(&AP_REQ_FIRST_BYTE) {
                return Ok(mech_token);
            }
            match initial_context_token(mech_token)? {
                (OID_KRB5 | OID_MS_KRB5, inner) => krb5_ap_req(inner),
                _ => Err(TicketError::Mechanism),
            }
        }
        OID_KRB5 | OID_MS_KRB5 => krb5_ap_req(inner),
        _ => Err(TicketError::Mechanism),
    }
}

// InitialContextToken ::= [APPLICATION 0] IMPLICIT SEQUENCE {
//     thisMech MechType,
//     innerContextToken ANY DEFINED BY thisMech
// }
fn initial_context_token(token: &[u8]) -> DerResult<(&[u8], &[u8])> {
    const WHAT: &str = "InitialContextToken";
    let (_, any) = Any::from_der(token).map_err(|_| TicketError::Malformed(WHAT))?;
    if any.class() != Class::Application || any.tag() != Tag(0) {
        return Err(TicketError::Malformed(WHAT));
    }
    let (inner, oid) = Any::from_der(any.data).map_err(|_| TicketError::Malformed(WHAT))?;
    if oid.tag() != Tag::Oid {
        return Err(TicketError::Malformed(WHAT));
    }
    Ok((oid.data, inner))
}

fn krb5_ap_req(inner: &[u8]) -> DerResult<&[u8]> {
    match inner {
        [tok_id_0, tok_id_1, ap_req @ ..] if [*tok_id_0, *tok_id_1] == TOK_ID_KRB_AP_REQ => {
            Ok(ap_req)
        }
        _ => Err(TicketError::Malformed("Kerberos GSS token")),
    }
}

// NegotiationToken ::= CHOICE { negTokenInit [0] NegTokenInit, ... }
// NegTokenInit ::= SEQUENCE {
//     mechTypes   [0] MechTypeList,
//     reqFlags    [1] ContextFlags OPTIONAL,
//     mechToken   [2] OCTET STRING OPTIONAL,
//     mechListMIC [3] OCTET STRING OPTIONAL
// }
fn neg_token_init_mech_token(inner: &[u8]) -> DerResult<&[u8]> {
    const WHAT: &str = "NegTokenInit";
    let (_, choice) = Any::from_der(inner).map_err(|_| TicketError::Malformed(WHAT))?;
    if choice.class() != Class::ContextSpecific || choice.tag() != Tag(0) {
        return Err(TicketError::Malformed(WHAT));
    }
    let fields = Fields::sequence(choice.data, WHAT)?;
    let offers_kerberos = der::sequence_of(fields.required(0)?, WHAT)?
        .into_iter()
        .any(|mech| matches!(Any::from_der(mech), Ok((_, oid)) if oid.data == OID_KRB5 || oid.data == OID_MS_KRB5));
    if !offers_kerberos {
        return Err(TicketError::Mechanism);
    }
    let mech_token = fields.required(2)?;
    let (_, octets) = Any::from_der(mech_token).map_err(|_| TicketError::Malformed(WHAT))?;
    if octets.tag() != Tag::OctetString {
        return Err(TicketError::Malformed(WHAT));
    }
    Ok(octets.data)
}

/// Frames an AP-REQ as a SPNEGO NegTokenInit offering Kerberos.
pub fn wrap_spnego(ap_req: &[u8]) -> Vec<u8> {
    let mut krb5_token = der::tlv(0x06, OID_KRB5);
    krb5_token.extend_from_slice(&TOK_ID_KRB_AP_REQ);
    krb5_token.extend_from_slice(ap_req);
    let krb5_token = der::application(0, krb5_token);

    let neg_token_init = der::explicit(
        0,
        der::sequence([
            der::explicit(0, der::sequence([der::tlv(0x06, OID_KRB5)])),
            der::explicit(2, der::octet_string(&krb5_token)),
        ]),
    );
    let mut spnego = der::tlv(0x06, OID_SPNEGO);
    spnego.extend(neg_token_init);
    der::application(0, spnego)
}
