use std::fmt;

use aliri_clock::{Clock, DurationSecs, System, UnixTime};

use crate::{Audience, RawCredential, RawCredentialRef};

/// The encoding of a raw credential
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A JSON Web Token whose claims carry the validity window
    SignedClaims,
    /// A shared-access-signature whose query-style parameters carry the
    /// validity window
    SharedAccessSignature,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::SignedClaims => f.write_str("signed-claims"),
            TokenKind::SharedAccessSignature => f.write_str("shared-access-signature"),
        }
    }
}

/// A token's lifecycle status relative to a safety margin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and far enough from expiry to be handed out
    Fresh,
    /// The token is still valid, but within the safety margin of expiry
    /// and should be replaced before use
    Stale,
    /// The token is no longer valid
    Expired,
}

/// An immutable security token scoped to a single audience
///
/// The expiration instant is always the one encoded in the credential
/// itself, extracted by the matching decoder at construction time. A token
/// is never mutated once constructed; renewal produces a replacement
/// instance for the same audience.
#[derive(Debug)]
pub struct SecurityToken {
    value: RawCredential,
    audience: Audience,
    kind: TokenKind,
    expires_at: UnixTime,
}

impl SecurityToken {
    pub(crate) fn new(
        value: RawCredential,
        audience: Audience,
        kind: TokenKind,
        expires_at: UnixTime,
    ) -> Self {
        Self {
            value,
            audience,
            kind,
            expires_at,
        }
    }

    /// The raw credential, suitable for presentation to the service
    #[inline]
    pub fn value(&self) -> &RawCredentialRef {
        &self.value
    }

    /// The audience this token authorizes access to
    #[inline]
    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// The credential's encoding
    #[inline]
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// The instant at which the credential itself says it expires
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// The instant at which renewal should begin, `margin` ahead of expiry
    pub fn renew_at(&self, margin: DurationSecs) -> UnixTime {
        if self.expires_at > UnixTime(margin.0) {
            self.expires_at - margin
        } else {
            UnixTime(0)
        }
    }

    /// The token's status as reported by the system clock
    #[inline]
    pub fn status(&self, margin: DurationSecs) -> TokenStatus {
        self.status_at(System.now(), margin)
    }

    /// The token's status as of the provided instant
    pub fn status_at(&self, time: UnixTime, margin: DurationSecs) -> TokenStatus {
        if time + margin < self.expires_at {
            TokenStatus::Fresh
        } else if time < self.expires_at {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// How much longer the token remains valid as of the provided instant
    pub fn until_expiry_at(&self, time: UnixTime) -> DurationSecs {
        if time < self.expires_at {
            self.expires_at - time
        } else {
            DurationSecs(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: u64) -> SecurityToken {
        SecurityToken::new(
            RawCredential::from_static("opaque"),
            Audience::from_static("sb://ns.example.net/hub"),
            TokenKind::SharedAccessSignature,
            UnixTime(expires_at),
        )
    }

    #[test]
    fn status_respects_safety_margin() {
        let t = token(3_600);
        let margin = DurationSecs(300);
        assert_eq!(t.status_at(UnixTime(0), margin), TokenStatus::Fresh);
        assert_eq!(t.status_at(UnixTime(3_299), margin), TokenStatus::Fresh);
        assert_eq!(t.status_at(UnixTime(3_300), margin), TokenStatus::Stale);
        assert_eq!(t.status_at(UnixTime(3_599), margin), TokenStatus::Stale);
        assert_eq!(t.status_at(UnixTime(3_600), margin), TokenStatus::Expired);
        assert_eq!(t.status_at(UnixTime(10_000), margin), TokenStatus::Expired);
    }

    #[test]
    fn renew_at_leads_expiry_by_margin() {
        let t = token(3_600);
        assert_eq!(t.renew_at(DurationSecs(300)), UnixTime(3_300));
    }

    #[test]
    fn renew_at_clamps_to_epoch_when_margin_exceeds_expiry() {
        let t = token(100);
        assert_eq!(t.renew_at(DurationSecs(300)), UnixTime(0));
    }

    #[test]
    fn until_expiry_saturates_at_zero() {
        let t = token(50);
        assert_eq!(t.until_expiry_at(UnixTime(20)), DurationSecs(30));
        assert_eq!(t.until_expiry_at(UnixTime(80)), DurationSecs(0));
    }
}
