//! Credential sources
//!
//! A credential source is the capability that produces raw credentials for
//! an audience. It may sign locally or reach out to an authorization
//! endpoint; the provider treats it as opaque, bounds it with a timeout,
//! and leaves retrying to the renewal scheduler.

use std::error;

use async_trait::async_trait;

use crate::{AudienceRef, RawCredential, TokenKind};

#[cfg(feature = "sas")]
pub mod sas;
pub mod static_credential;

#[cfg(feature = "sas")]
pub use sas::SharedAccessSigner;
pub use static_credential::StaticCredentialSource;

/// A raw credential paired with the encoding it uses
#[derive(Clone, Debug)]
pub struct IssuedCredential {
    /// The encoded credential
    pub value: RawCredential,
    /// The encoding, which selects the decoder to apply
    pub kind: TokenKind,
}

/// An asynchronous producer of raw credentials
#[async_trait]
pub trait AsyncCredentialSource: Send + Sync {
    /// The error returned when a credential cannot be produced
    type Error: error::Error + Send + Sync + 'static;

    /// Produces a credential scoped to `audience`
    async fn request_credential(
        &self,
        audience: &AudienceRef,
    ) -> Result<IssuedCredential, Self::Error>;
}
