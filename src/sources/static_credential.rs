//! A source that hands out a pre-issued credential

use std::convert::Infallible;

use async_trait::async_trait;

use super::{AsyncCredentialSource, IssuedCredential};
use crate::{AudienceRef, RawCredential, TokenKind};

/// A credential source wrapping a credential issued out of band
///
/// Useful when the caller already holds a complete shared access signature
/// or signed-claims token. The credential is handed out unchanged for every
/// request; its validity window is whatever was encoded at issuance, so a
/// renewal cycle against this source will keep receiving the same
/// credential until it is replaced.
#[derive(Clone, Debug)]
pub struct StaticCredentialSource {
    credential: IssuedCredential,
}

impl StaticCredentialSource {
    /// Wraps a pre-issued credential of the given encoding
    pub fn new(value: RawCredential, kind: TokenKind) -> Self {
        Self {
            credential: IssuedCredential { value, kind },
        }
    }
}

#[async_trait]
impl AsyncCredentialSource for StaticCredentialSource {
    type Error = Infallible;

    async fn request_credential(
        &self,
        _audience: &AudienceRef,
    ) -> Result<IssuedCredential, Self::Error> {
        Ok(self.credential.clone())
    }
}
