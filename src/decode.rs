//! Structural decoders for supported credential encodings
//!
//! Decoders extract only the fields this subsystem needs to track validity:
//! the expiration instant encoded in the credential itself. Signature
//! verification is deliberately out of scope; the service is the party that
//! validates authenticity when a token is presented.

use aliri_base64::Base64Url;
use aliri_clock::UnixTime;
use serde::Deserialize;
use thiserror::Error;

use crate::{Audience, RawCredential, SecurityToken, TokenKind};

/// The scheme prefix of a shared-access-signature credential
const SAS_SCHEME: &str = "SharedAccessSignature";

/// A raw credential could not be parsed by the decoder matching its encoding
///
/// Decode failures indicate a configuration or issuance problem rather than
/// a transient outage; they are never retried and never install a cache
/// entry.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The credential is not structured as three dot-separated segments
    #[error("signed-claims token is not structured as three dot-separated segments")]
    JwtStructure,

    /// The claims segment is not valid base64url data
    #[error("signed-claims token claims segment is not valid base64url")]
    JwtClaimsEncoding(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The claims segment is not a valid JSON object
    #[error("signed-claims token claims segment is not a valid JSON object")]
    JwtClaimsJson(#[source] serde_json::Error),

    /// The claims carry no `exp` claim to derive a validity window from
    #[error("signed-claims token carries no `exp` claim")]
    JwtMissingExpiry,

    /// The credential does not use the `SharedAccessSignature` scheme
    #[error("credential does not begin with the `SharedAccessSignature` scheme")]
    SasScheme,

    /// The signature carries no `se` expiry parameter
    #[error("shared access signature carries no `se` expiry parameter")]
    SasMissingExpiry,

    /// The `se` expiry parameter is not a Unix timestamp in seconds
    #[error("shared access signature expiry `{0}` is not a Unix timestamp")]
    SasInvalidExpiry(String),
}

/// The subset of registered JWT claims this subsystem reads
#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<u64>,
}

/// Decodes a raw credential of the given encoding into a token for `audience`
///
/// The expiration instant is read from the credential's own claims or
/// parameters; it is never defaulted. Both supported encodings carry an
/// explicit expiry, so a credential missing one is malformed.
pub fn decode(
    kind: TokenKind,
    raw: RawCredential,
    audience: Audience,
) -> Result<SecurityToken, DecodeError> {
    let expires_at = match kind {
        TokenKind::SignedClaims => signed_claims_expiry(raw.as_str())?,
        TokenKind::SharedAccessSignature => shared_access_signature_expiry(raw.as_str())?,
    };

    Ok(SecurityToken::new(raw, audience, kind, expires_at))
}

fn signed_claims_expiry(raw: &str) -> Result<UnixTime, DecodeError> {
    let mut segments = raw.split('.');
    let (_header, claims) = match (segments.next(), segments.next(), segments.next()) {
        (Some(h), Some(c), Some(_sig)) if !h.is_empty() && !c.is_empty() => (h, c),
        _ => return Err(DecodeError::JwtStructure),
    };
    if segments.next().is_some() {
        return Err(DecodeError::JwtStructure);
    }

    let claims_raw = Base64Url::from_encoded(claims)
        .map_err(|err| DecodeError::JwtClaimsEncoding(Box::new(err)))?;
    let claims: Claims =
        serde_json::from_slice(claims_raw.as_slice()).map_err(DecodeError::JwtClaimsJson)?;

    claims
        .exp
        .map(UnixTime)
        .ok_or(DecodeError::JwtMissingExpiry)
}

fn shared_access_signature_expiry(raw: &str) -> Result<UnixTime, DecodeError> {
    let params = raw
        .strip_prefix(SAS_SCHEME)
        .filter(|rest| rest.starts_with(' '))
        .ok_or(DecodeError::SasScheme)?;

    let expiry = params
        .trim_start()
        .split('&')
        .find_map(|pair| pair.strip_prefix("se="))
        .ok_or(DecodeError::SasMissingExpiry)?;

    expiry
        .parse::<u64>()
        .map(UnixTime)
        .map_err(|_| DecodeError::SasInvalidExpiry(expiry.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audience() -> Audience {
        Audience::from_static("sb://ns.example.net/hub")
    }

    /// Builds an unsigned-but-structurally-valid JWT around the given claims
    fn jwt(claims: &str) -> RawCredential {
        let header = Base64Url::from_raw(br#"{"alg":"none"}"#.to_vec()).to_string();
        let payload = Base64Url::from_raw(claims.as_bytes().to_vec()).to_string();
        RawCredential::from(format!("{header}.{payload}.c2ln"))
    }

    #[test]
    fn signed_claims_expiry_matches_exp_claim_exactly() {
        let raw = jwt(r#"{"sub":"sender","exp":1982714400}"#);
        let token = decode(TokenKind::SignedClaims, raw, audience()).unwrap();
        assert_eq!(token.expires_at(), UnixTime(1_982_714_400));
        assert_eq!(token.kind(), TokenKind::SignedClaims);
    }

    #[test]
    fn truncated_jwt_is_malformed() {
        let raw = RawCredential::from_static("eyJhbGciOiJub25lIn0.eyJleH");
        let err = decode(TokenKind::SignedClaims, raw, audience()).unwrap_err();
        assert!(matches!(err, DecodeError::JwtStructure));
    }

    #[test]
    fn jwt_with_four_segments_is_malformed() {
        let raw = RawCredential::from_static("a.b.c.d");
        let err = decode(TokenKind::SignedClaims, raw, audience()).unwrap_err();
        assert!(matches!(err, DecodeError::JwtStructure));
    }

    #[test]
    fn jwt_claims_must_be_base64url() {
        let raw = RawCredential::from_static("eyJhbGciOiJub25lIn0.!!!not-base64!!!.c2ln");
        let err = decode(TokenKind::SignedClaims, raw, audience()).unwrap_err();
        assert!(matches!(err, DecodeError::JwtClaimsEncoding(_)));
    }

    #[test]
    fn jwt_claims_must_be_json() {
        let raw = jwt("this is not json");
        let err = decode(TokenKind::SignedClaims, raw, audience()).unwrap_err();
        assert!(matches!(err, DecodeError::JwtClaimsJson(_)));
    }

    #[test]
    fn jwt_without_exp_is_rejected() {
        let raw = jwt(r#"{"sub":"sender"}"#);
        let err = decode(TokenKind::SignedClaims, raw, audience()).unwrap_err();
        assert!(matches!(err, DecodeError::JwtMissingExpiry));
    }

    #[test]
    fn sas_expiry_matches_se_parameter_exactly() {
        let raw = RawCredential::from_static(
            "SharedAccessSignature sr=sb%3A%2F%2Fns.example.net%2Fhub&sig=oVU=&se=1712000000&skn=send-rule",
        );
        let token = decode(TokenKind::SharedAccessSignature, raw, audience()).unwrap();
        assert_eq!(token.expires_at(), UnixTime(1_712_000_000));
    }

    #[test]
    fn sas_requires_scheme_prefix() {
        let raw = RawCredential::from_static("sr=sb%3A%2F%2Fns&sig=oVU=&se=1712000000&skn=rule");
        let err = decode(TokenKind::SharedAccessSignature, raw, audience()).unwrap_err();
        assert!(matches!(err, DecodeError::SasScheme));
    }

    #[test]
    fn sas_without_expiry_parameter_is_rejected() {
        let raw = RawCredential::from_static("SharedAccessSignature sr=sb%3A%2F%2Fns&sig=oVU=&skn=rule");
        let err = decode(TokenKind::SharedAccessSignature, raw, audience()).unwrap_err();
        assert!(matches!(err, DecodeError::SasMissingExpiry));
    }

    #[test]
    fn sas_with_non_numeric_expiry_is_rejected() {
        let raw = RawCredential::from_static("SharedAccessSignature sr=x&sig=y&se=tomorrow&skn=rule");
        let err = decode(TokenKind::SharedAccessSignature, raw, audience()).unwrap_err();
        assert!(matches!(err, DecodeError::SasInvalidExpiry(_)));
    }
}
