//! A source that locally signs shared access signatures

use std::convert::Infallible;

use aliri_base64::Base64;
use aliri_clock::{Clock, DurationSecs, System};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use ring::hmac;

use super::{AsyncCredentialSource, IssuedCredential};
use crate::{AudienceRef, RawCredential, SharedAccessKey, SharedAccessKeyName, TokenKind};

/// Default validity window for locally-signed signatures
const DEFAULT_VALIDITY: DurationSecs = DurationSecs(3600);

/// Signs shared access signatures from a shared access authorization rule
///
/// No network round trip is involved: the signature is an HMAC-SHA256 over
/// the percent-encoded audience and the expiry instant, keyed by the rule's
/// secret. Each request produces a signature valid for the configured
/// window from the current instant.
#[derive(Debug)]
pub struct SharedAccessSigner<C = System> {
    key_name: SharedAccessKeyName,
    key: SharedAccessKey,
    validity: DurationSecs,
    clock: C,
}

impl SharedAccessSigner {
    /// Constructs a signer for the given authorization rule
    ///
    /// Signatures are valid for one hour by default.
    pub fn new(key_name: SharedAccessKeyName, key: SharedAccessKey) -> Self {
        Self {
            key_name,
            key,
            validity: DEFAULT_VALIDITY,
            clock: System,
        }
    }
}

impl<C> SharedAccessSigner<C> {
    /// Sets the validity window of produced signatures
    pub fn with_validity(mut self, validity: DurationSecs) -> Self {
        self.validity = validity;
        self
    }

    /// Substitutes the clock used to stamp expiry instants
    pub fn with_clock<D>(self, clock: D) -> SharedAccessSigner<D> {
        SharedAccessSigner {
            key_name: self.key_name,
            key: self.key,
            validity: self.validity,
            clock,
        }
    }
}

impl<C: Clock> SharedAccessSigner<C> {
    fn sign(&self, audience: &AudienceRef) -> RawCredential {
        let expiry = self.clock.now() + self.validity;
        let resource = utf8_percent_encode(audience.as_str(), NON_ALPHANUMERIC).to_string();
        let message = format!("{resource}\n{}", expiry.0);

        let key = hmac::Key::new(hmac::HMAC_SHA256, self.key.as_str().as_bytes());
        let tag = hmac::sign(&key, message.as_bytes());
        let signature = Base64::from_raw(tag.as_ref().to_vec()).to_string();
        let signature = utf8_percent_encode(&signature, NON_ALPHANUMERIC);

        RawCredential::from(format!(
            "SharedAccessSignature sr={resource}&sig={signature}&se={}&skn={}",
            expiry.0, self.key_name
        ))
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> AsyncCredentialSource for SharedAccessSigner<C> {
    type Error = Infallible;

    async fn request_credential(
        &self,
        audience: &AudienceRef,
    ) -> Result<IssuedCredential, Self::Error> {
        Ok(IssuedCredential {
            value: self.sign(audience),
            kind: TokenKind::SharedAccessSignature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aliri_clock::{TestClock, UnixTime};

    use crate::{decode, Audience};

    #[tokio::test]
    async fn signed_credential_decodes_with_the_stamped_expiry() {
        let signer = SharedAccessSigner::new(
            SharedAccessKeyName::from_static("send-rule"),
            SharedAccessKey::from_static("not-a-real-key"),
        )
        .with_validity(DurationSecs(1200))
        .with_clock(TestClock::new(UnixTime(1_700_000_000)));

        let audience = Audience::from_static("sb://ns.example.net/hub");
        let issued = signer.request_credential(&audience).await.unwrap();
        assert_eq!(issued.kind, TokenKind::SharedAccessSignature);

        let token = decode::decode(issued.kind, issued.value, audience.clone()).unwrap();
        assert_eq!(token.expires_at(), UnixTime(1_700_001_200));
        assert_eq!(token.audience(), &audience);
    }

    #[tokio::test]
    async fn signature_names_the_authorization_rule() {
        let signer = SharedAccessSigner::new(
            SharedAccessKeyName::from_static("listen-rule"),
            SharedAccessKey::from_static("not-a-real-key"),
        )
        .with_clock(TestClock::new(UnixTime(1_700_000_000)));

        let issued = signer
            .request_credential(&Audience::from_static("sb://ns.example.net/hub"))
            .await
            .unwrap();
        assert!(issued.value.as_str().ends_with("&skn=listen-rule"));
        assert!(issued.value.as_str().starts_with("SharedAccessSignature sr=sb%3A%2F%2F"));
    }
}
