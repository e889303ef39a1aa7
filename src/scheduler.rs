use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use thiserror::Error as ThisError;
use tokio::sync::{watch, Mutex};

use crate::backoff::{ErrorBackoffConfig, ErrorBackoffHandler, WithBackoff};
use crate::jitter::{JitterSource, NullJitter};
use crate::provider::{AcquireError, TokenProvider};
use crate::sources::AsyncCredentialSource;
use crate::{Audience, AudienceRef, SecurityToken};

/// The renewal task for this audience has stopped publishing tokens
///
/// This happens when the credential turned out to be malformed, which
/// retrying cannot fix. Holders should tear down or re-register their
/// links.
#[derive(Clone, Copy, Debug, ThisError)]
#[error("the renewal task stopped publishing replacement tokens")]
pub struct RenewalStreamClosed;

/// A subscription to replacement tokens for one audience
///
/// Dropping every watch for an audience deregisters it: the renewal timer
/// is cancelled and the registration entry is removed. Cloning a watch
/// joins the same registration rather than creating a second timer, so
/// deregistration happens on every exit path that drops the watch.
#[derive(Debug)]
pub struct TokenWatch {
    rx: watch::Receiver<Arc<SecurityToken>>,
    _seed: Arc<WatchSeed>,
}

#[derive(Debug)]
struct WatchSeed {
    rx: watch::Receiver<Arc<SecurityToken>>,
}

impl TokenWatch {
    fn join(seed: &Arc<WatchSeed>) -> Self {
        Self {
            rx: seed.rx.clone(),
            _seed: Arc::clone(seed),
        }
    }

    /// Snapshots the most recently published token
    pub fn token(&self) -> Arc<SecurityToken> {
        Arc::clone(&self.rx.borrow())
    }

    /// Waits until a replacement token has been published
    pub async fn changed(&mut self) -> Result<(), RenewalStreamClosed> {
        self.rx.changed().await.map_err(|_| RenewalStreamClosed)
    }
}

impl Clone for TokenWatch {
    fn clone(&self) -> Self {
        Self::join(&self._seed)
    }
}

struct Registration {
    id: u64,
    seed: Weak<WatchSeed>,
}

/// Proactively renews tokens for registered audiences in the background
///
/// Each registered audience gets one timer armed for the jittered
/// `expires_at - safety_margin` of its current token. When the timer
/// fires, the scheduler drives the provider's refresh path, publishes the
/// replacement to every watch for that audience, and re-arms from the new
/// expiry. Transient failures are retried with bounded backoff while the
/// previous token stays in place; if the backoff configuration caps the
/// number of attempts, exhausting the cap halts renewal and closes the
/// stream.
pub struct RenewalScheduler<S, C = System> {
    inner: Arc<SchedulerInner<S, C>>,
}

struct SchedulerInner<S, C> {
    provider: Arc<TokenProvider<S, C>>,
    registrations: Mutex<HashMap<Audience, Registration>>,
    jitter: Mutex<Box<dyn JitterSource + Send>>,
    backoff: ErrorBackoffConfig,
    next_id: AtomicU64,
}

impl<S, C> Clone for RenewalScheduler<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, C> std::fmt::Debug for RenewalScheduler<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler").finish_non_exhaustive()
    }
}

impl<S, C> RenewalScheduler<S, C> {
    /// Constructs a scheduler with no renewal jitter and default backoff
    pub fn new(provider: Arc<TokenProvider<S, C>>) -> Self {
        Self::with(provider, NullJitter, ErrorBackoffConfig::default())
    }

    /// Constructs a scheduler with the given jitter and backoff behavior
    pub fn with(
        provider: Arc<TokenProvider<S, C>>,
        jitter: impl JitterSource + Send + 'static,
        backoff: ErrorBackoffConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                provider,
                registrations: Mutex::new(HashMap::new()),
                jitter: Mutex::new(Box::new(jitter)),
                backoff,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The number of audiences currently registered for renewal
    pub async fn registration_count(&self) -> usize {
        self.inner.registrations.lock().await.len()
    }
}

impl<S, C> RenewalScheduler<S, C>
where
    S: AsyncCredentialSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Registers interest in replacement tokens for `audience`
    ///
    /// Ensures a current token exists before arming the renewal timer, so
    /// the returned watch always starts with a usable token. A second
    /// registration for an already-registered audience joins the existing
    /// registration: one timer, one refresh cycle, every watch notified.
    pub async fn register(&self, audience: &AudienceRef) -> Result<TokenWatch, AcquireError> {
        if let Some(watch) = self.try_join(audience).await {
            return Ok(watch);
        }

        let initial = self.inner.provider.get_token(audience).await?;

        let mut registrations = self.inner.registrations.lock().await;
        // Another caller may have registered while the initial token was
        // being acquired.
        if let Some(reg) = registrations.get(audience) {
            if let Some(seed) = reg.seed.upgrade() {
                return Ok(TokenWatch::join(&seed));
            }
        }

        let renew_at = initial.renew_at(self.inner.provider.safety_margin());
        let (tx, rx) = watch::channel(initial);
        let seed = Arc::new(WatchSeed { rx });
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        registrations.insert(
            audience.to_owned(),
            Registration {
                id,
                seed: Arc::downgrade(&seed),
            },
        );
        drop(registrations);

        tracing::debug!(audience = %audience, renew_at = renew_at.0, "registered audience for renewal");

        tokio::spawn(renew_loop(
            Arc::clone(&self.inner),
            audience.to_owned(),
            tx,
            renew_at,
            id,
        ));

        Ok(TokenWatch::join(&seed))
    }

    async fn try_join(&self, audience: &AudienceRef) -> Option<TokenWatch> {
        let registrations = self.inner.registrations.lock().await;
        let seed = registrations.get(audience)?.seed.upgrade()?;
        Some(TokenWatch::join(&seed))
    }
}

enum NextFire {
    At(UnixTime),
    In(Duration),
}

async fn renew_loop<S, C>(
    inner: Arc<SchedulerInner<S, C>>,
    audience: Audience,
    tx: watch::Sender<Arc<SecurityToken>>,
    first_renew_at: UnixTime,
    id: u64,
) where
    S: AsyncCredentialSource,
    C: Clock + Send + Sync,
{
    const HEARTBEAT: DurationSecs = DurationSecs(30);

    let margin = inner.provider.safety_margin();
    let mut backoff = ErrorBackoffHandler::new(inner.backoff.clone());
    let mut next = NextFire::At(inner.jitter.lock().await.jitter(first_renew_at));

    'renew: loop {
        match next {
            NextFire::In(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    // All watches were dropped; cancel the timer. An
                    // acquisition already underway in the provider is left
                    // to complete there.
                    _ = tx.closed() => break 'renew,
                }
            }
            // Sleep in short slices, re-checking the wall clock each time.
            // The timer does not advance while a system is suspended, so a
            // single sleep computed up front could wake long after the
            // renewal instant has passed.
            NextFire::At(at) => loop {
                let now = inner.provider.clock().now();
                if now >= at {
                    break;
                }
                let slice = (at - now).min(HEARTBEAT);
                tokio::select! {
                    _ = tokio::time::sleep(slice.into()) => {}
                    _ = tx.closed() => break 'renew,
                }
            },
        }

        tracing::debug!(audience = %audience, "renewing token");

        next = match inner
            .provider
            .refresh(&audience)
            .await
            .with_backoff(&mut backoff)
        {
            Ok(token) => {
                let renew_at = token.renew_at(margin);
                if tx.send(token).is_err() {
                    tracing::info!(audience = %audience, "all watches dropped, halting renewal");
                    break;
                }
                NextFire::At(inner.jitter.lock().await.jitter(renew_at))
            }
            Err((err, delay)) => {
                let error: &dyn Error = &err;
                if let AcquireError::Malformed { .. } = err {
                    tracing::error!(
                        audience = %audience,
                        error,
                        "credential is malformed, halting renewal"
                    );
                    break;
                }
                if backoff.exhausted() {
                    tracing::error!(
                        audience = %audience,
                        error,
                        "renewal attempts exhausted, halting renewal"
                    );
                    break;
                }
                tracing::warn!(
                    audience = %audience,
                    error,
                    delay_ms = delay.as_millis() as u64,
                    "renewal failed, will retry"
                );
                NextFire::In(delay)
            }
        };
    }

    let mut registrations = inner.registrations.lock().await;
    if registrations.get(&audience).map(|reg| reg.id) == Some(id) {
        registrations.remove(&audience);
    }
    tracing::debug!(audience = %audience, "renewal registration removed");
}
