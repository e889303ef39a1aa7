//! Claims-based-security token management for event-streaming client links
//!
//! Transport links to the service are authorized by presenting a
//! time-bounded credential rather than signing every message. This crate
//! owns that credential's lifecycle on the client side: decoding raw
//! credentials into tokens whose expiry comes from the credential's own
//! claims, caching one current token per audience, and renewing tokens in
//! the background so long-lived links never stall waiting for a fresh
//! credential and never present an expired one.
//!
//! Link-authentication code interacts with two entry points. Before opening
//! a link it asks the [`TokenProvider`] for a current token; the provider
//! answers from its per-audience cache and refreshes synchronously only
//! when the cached token is within the configured safety margin of expiry,
//! with at most one refresh in flight per audience. For the link's
//! lifetime it holds a [`TokenWatch`] from the [`RenewalScheduler`], which
//! refreshes proactively ahead of expiry and publishes each replacement
//! token to every watch on the audience. Dropping the watch deregisters
//! the link; when the last watch for an audience goes away its renewal
//! timer is cancelled.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use streambus_tokens::sources::SharedAccessSigner;
//! use streambus_tokens::{Audience, RenewalScheduler, SharedAccessKey, SharedAccessKeyName, TokenProvider};
//!
//! # async fn open_link() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = SharedAccessSigner::new(
//!     SharedAccessKeyName::from_static("send-rule"),
//!     SharedAccessKey::from_static("<key material>"),
//! );
//!
//! let provider = Arc::new(TokenProvider::new(signer));
//! let scheduler = RenewalScheduler::new(Arc::clone(&provider));
//!
//! let audience = Audience::from_static("sb://namespace.example.net/hub");
//! let watch = scheduler.register(&audience).await?;
//!
//! // Present `watch.token()` when opening the link, then renew the link's
//! // authorization each time `watch.changed()` completes.
//! # Ok(())
//! # }
//! ```
//!
//! Renewal timing can be jittered ([`jitter`]) so many links do not hit the
//! credential source at once, and failed renewals back off ([`backoff`])
//! while the previous still-valid token stays in place.
//!
//! # Features
//!
//! * `sas`: a credential source that locally signs shared access
//!   signatures (enabled by default).
//! * `rand`: a random jitter source (enabled by default).

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
pub mod decode;
pub mod jitter;
mod provider;
mod scheduler;
pub mod sources;
mod tokens;

pub use braids::*;
pub use decode::DecodeError;
pub use provider::{AcquireError, ProviderConfig, TokenProvider};
pub use scheduler::{RenewalScheduler, RenewalStreamClosed, TokenWatch};
pub use tokens::{SecurityToken, TokenKind, TokenStatus};
