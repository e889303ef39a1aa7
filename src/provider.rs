use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::decode::{self, DecodeError};
use crate::sources::AsyncCredentialSource;
use crate::{Audience, AudienceRef, SecurityToken, TokenStatus};

/// Tuning for how eagerly tokens are replaced and how long the credential
/// source is given to respond
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    safety_margin: DurationSecs,
    acquire_timeout: Duration,
}

impl Default for ProviderConfig {
    /// A five minute safety margin and a thirty second acquisition timeout
    fn default() -> Self {
        Self {
            safety_margin: DurationSecs(300),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl ProviderConfig {
    /// Sets the lead time before expiry at which a cached token stops being
    /// handed out
    pub fn with_safety_margin(mut self, margin: DurationSecs) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Sets the bound on how long a single credential-source call may take
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// The configured safety margin
    pub fn safety_margin(&self) -> DurationSecs {
        self.safety_margin
    }

    /// The configured acquisition timeout
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }
}

/// A current token could not be produced for an audience
///
/// The `Malformed` variant indicates a configuration or issuance problem
/// that retrying will not fix; the others are transient acquisition
/// failures that background renewal retries with backoff.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The credential source reported a failure
    #[error("credential source failed for audience {audience}")]
    Source {
        /// The audience the credential was requested for
        audience: Audience,
        /// The underlying failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The credential source did not respond within the configured bound
    #[error("credential source timed out after {timeout:?} for audience {audience}")]
    Timeout {
        /// The audience the credential was requested for
        audience: Audience,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// The credential could not be decoded; no cache entry was installed
    #[error("credential for audience {audience} is malformed")]
    Malformed {
        /// The audience the credential was requested for
        audience: Audience,
        /// What the decoder rejected
        #[source]
        source: DecodeError,
    },

    /// The source produced a credential that had already expired
    #[error("credential for audience {audience} expired at {} before it could be used", .expired_at.0)]
    ExpiredOnArrival {
        /// The audience the credential was requested for
        audience: Audience,
        /// The expiry stamped in the credential
        expired_at: UnixTime,
    },
}

#[derive(Debug, Default)]
struct AudienceEntry {
    current: RwLock<Option<Arc<SecurityToken>>>,
    refresh: Mutex<()>,
}

impl AudienceEntry {
    async fn snapshot(&self) -> Option<Arc<SecurityToken>> {
        self.current.read().await.clone()
    }
}

/// Produces and caches current tokens, one entry per audience
///
/// The cached token for an audience is returned as long as it remains
/// outside the safety margin of its expiry. Once inside the margin, the
/// next caller refreshes it synchronously; at most one refresh is in
/// flight per audience, and concurrent callers wait for that refresh and
/// share its result. Audiences never contend with one another.
///
/// Failed refreshes leave any previous cache entry in place, so a later
/// call retries rather than finding the audience poisoned.
#[derive(Debug)]
pub struct TokenProvider<S, C = System> {
    source: S,
    entries: Mutex<HashMap<Audience, Arc<AudienceEntry>>>,
    config: ProviderConfig,
    clock: C,
}

impl<S> TokenProvider<S> {
    /// Constructs a provider over the given credential source with default
    /// configuration
    pub fn new(source: S) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
            config: ProviderConfig::default(),
            clock: System,
        }
    }
}

impl<S, C> TokenProvider<S, C> {
    /// Replaces the provider configuration
    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Substitutes the clock used for freshness decisions
    pub fn with_clock<D>(self, clock: D) -> TokenProvider<S, D> {
        TokenProvider {
            source: self.source,
            entries: self.entries,
            config: self.config,
            clock,
        }
    }

    /// The lead time before expiry at which tokens are refreshed
    pub fn safety_margin(&self) -> DurationSecs {
        self.config.safety_margin
    }

    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }
}

impl<S, C> TokenProvider<S, C>
where
    S: AsyncCredentialSource,
    C: Clock + Send + Sync,
{
    /// Returns a current token for `audience`
    ///
    /// Returns the cached token while it is fresh; otherwise refreshes
    /// synchronously before returning. Concurrent callers during a refresh
    /// suspend until it completes and receive its result.
    pub async fn get_token(
        &self,
        audience: &AudienceRef,
    ) -> Result<Arc<SecurityToken>, AcquireError> {
        let entry = self.entry(audience).await;

        if let Some(token) = entry.snapshot().await {
            if let TokenStatus::Fresh =
                token.status_at(self.clock.now(), self.config.safety_margin)
            {
                return Ok(token);
            }
        }

        self.refresh_entry(audience, &entry).await
    }

    /// Forces the refresh path for `audience`, installing and returning a
    /// replacement token
    ///
    /// If another refresh completed while waiting for the per-audience
    /// refresh lock and its token is still fresh, that token is returned
    /// instead of issuing a duplicate credential-source call.
    pub async fn refresh(
        &self,
        audience: &AudienceRef,
    ) -> Result<Arc<SecurityToken>, AcquireError> {
        let entry = self.entry(audience).await;
        self.refresh_entry(audience, &entry).await
    }

    async fn refresh_entry(
        &self,
        audience: &AudienceRef,
        entry: &AudienceEntry,
    ) -> Result<Arc<SecurityToken>, AcquireError> {
        let _refreshing = entry.refresh.lock().await;

        // A concurrent caller may have refreshed while we waited for the lock.
        if let Some(token) = entry.snapshot().await {
            if let TokenStatus::Fresh =
                token.status_at(self.clock.now(), self.config.safety_margin)
            {
                tracing::trace!(audience = %audience, "refresh already completed by concurrent caller");
                return Ok(token);
            }
        }

        tracing::debug!(audience = %audience, "requesting new credential");

        let issued = tokio::time::timeout(
            self.config.acquire_timeout,
            self.source.request_credential(audience),
        )
        .await
        .map_err(|_| AcquireError::Timeout {
            audience: audience.to_owned(),
            timeout: self.config.acquire_timeout,
        })?
        .map_err(|err| AcquireError::Source {
            audience: audience.to_owned(),
            source: Box::new(err),
        })?;

        let token = decode::decode(issued.kind, issued.value, audience.to_owned()).map_err(
            |err| AcquireError::Malformed {
                audience: audience.to_owned(),
                source: err,
            },
        )?;

        if let TokenStatus::Expired = token.status_at(self.clock.now(), DurationSecs(0)) {
            return Err(AcquireError::ExpiredOnArrival {
                audience: audience.to_owned(),
                expired_at: token.expires_at(),
            });
        }

        tracing::debug!(
            audience = %audience,
            expires_at = token.expires_at().0,
            kind = %token.kind(),
            "installed replacement token"
        );

        let token = Arc::new(token);
        *entry.current.write().await = Some(Arc::clone(&token));
        Ok(token)
    }

    // The map lock is held only to locate or insert the entry, never across
    // a credential-source call, so audiences do not contend.
    async fn entry(&self, audience: &AudienceRef) -> Arc<AudienceEntry> {
        let mut entries = self.entries.lock().await;
        Arc::clone(
            entries
                .entry(audience.to_owned())
                .or_default(),
        )
    }
}
