//! Expiry-aware bearer token caching with single-flight refresh
//!
//! A [`CredentialCache`] belongs to exactly one provider client. Reads of a
//! still-valid token take a shared lock and never touch the network. When the
//! token is missing or inside its safety margin, the first caller starts a
//! refresh and every concurrent caller awaits that same refresh.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{AbortHandle, Abortable, BoxFuture, FutureExt, Shared};

use crate::http::{
    ErrorClassifier, ErrorEnvelope, ErrorKind, Outcome, RawResponse, RequestExecutor, RequestSpec,
    RetryPolicy,
};

/// Safety margin used when a provider does not configure one
pub const DEFAULT_MARGIN: Duration = Duration::from_secs(60);

/// A bearer token and its lifetime
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    refresh_expires_at: Option<DateTime<Utc>>,
    scope: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at,
            refresh_expires_at: None,
            scope: None,
        }
    }

    /// Attach a refresh token and, if known, its own expiry
    pub fn with_refresh_token(
        mut self,
        token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.refresh_token = Some(token.into());
        self.refresh_expires_at = expires_at;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn refresh_expires_at(&self) -> Option<DateTime<Utc>> {
        self.refresh_expires_at
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// `now < expires_at - margin`
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match (self.expires_at - now).to_std() {
            Ok(remaining) => remaining > margin,
            Err(_) => false,
        }
    }

    /// Whether the refresh token may still be used at `now`. A refresh token
    /// without a known expiry is assumed usable.
    pub fn can_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some() && self.refresh_expires_at.map_or(true, |at| now < at)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Source of the current time for expiry checks
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How a provider issues tokens
pub trait TokenSource: Send + Sync {
    /// Build the token request. `previous` is the last credential, if any,
    /// so a provider can use its refresh token instead of full credentials.
    fn token_request(
        &self,
        previous: Option<&Credential>,
        now: DateTime<Utc>,
    ) -> crate::Result<RequestSpec>;

    /// Turn a successful token response into a credential
    fn parse_token(
        &self,
        response: &RawResponse,
        now: DateTime<Utc>,
        classifier: &ErrorClassifier,
    ) -> Result<Credential, ErrorEnvelope>;
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, ErrorEnvelope>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
    abort: AbortHandle,
    waiters: usize,
}

struct Inner {
    source: Box<dyn TokenSource>,
    executor: RequestExecutor,
    policy: RetryPolicy,
    margin: Duration,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Credential>>,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

impl Inner {
    fn valid_credential(&self) -> Option<Credential> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .filter(|credential| credential.is_valid_at(self.clock.now(), self.margin))
            .cloned()
    }

    async fn refresh(&self, previous: Option<Credential>) -> Result<Credential, ErrorEnvelope> {
        let classifier = self.executor.classifier();
        let spec = self
            .source
            .token_request(previous.as_ref(), self.clock.now())
            .map_err(|e| classifier.classify(&Outcome::Local(&e)))?;

        tracing::debug!(
            provider = classifier.provider(),
            using_refresh_token = previous.as_ref().map_or(false, |p| p.refresh_token.is_some()),
            "refreshing credential"
        );

        let result = match self.executor.execute(&spec, &self.policy).await {
            Ok(response) => self.source.parse_token(&response, self.clock.now(), classifier),
            Err(envelope) => Err(envelope),
        };

        match result {
            Ok(credential) => {
                *self.current.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(credential.clone());
                tracing::debug!(
                    provider = classifier.provider(),
                    expires_at = %credential.expires_at,
                    "credential refreshed"
                );
                Ok(credential)
            }
            Err(envelope) => {
                tracing::warn!(
                    provider = classifier.provider(),
                    error = %envelope,
                    "credential refresh failed"
                );
                // A rejected refresh token must not be offered again. Clearing the
                // slot makes the next fetch log in with full credentials, since
                // `can_refresh_at` only sees a refresh token on a cached credential.
                if envelope.kind() == ErrorKind::Unauthorized {
                    if let Some(previous) = &previous {
                        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
                        if current
                            .as_ref()
                            .map_or(false, |c| c.access_token == previous.access_token)
                        {
                            *current = None;
                        }
                    }
                }
                Err(envelope)
            }
        }
    }
}

/// What a caller does after looking at the in-flight slot
enum Join<'a> {
    Ready(Credential),
    Wait(Waiter<'a>, RefreshFuture),
}

/// A caller's registration on an in-flight refresh. The last waiter to leave
/// clears the slot, aborting the refresh if it has not finished.
struct Waiter<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let abandoned = {
            let mut slot = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_mut() {
                Some(in_flight) if in_flight.id == self.id => {
                    in_flight.waiters = in_flight.waiters.saturating_sub(1);
                    if in_flight.waiters == 0 {
                        slot.take()
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(in_flight) = abandoned {
            if in_flight.future.peek().is_none() {
                tracing::debug!(
                    provider = self.inner.executor.provider(),
                    "credential refresh abandoned by every waiter"
                );
                in_flight.abort.abort();
            }
        }
    }
}

/// Builder for [`CredentialCache`]
pub struct CredentialCacheBuilder {
    source: Box<dyn TokenSource>,
    executor: RequestExecutor,
    policy: RetryPolicy,
    margin: Duration,
    clock: Arc<dyn Clock>,
}

impl CredentialCacheBuilder {
    /// Safety margin subtracted from the token expiry
    pub fn margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Retry policy for token requests
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> CredentialCache {
        CredentialCache {
            inner: Arc::new(Inner {
                source: self.source,
                executor: self.executor,
                policy: self.policy,
                margin: self.margin,
                clock: self.clock,
                current: RwLock::new(None),
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

/// Per-provider-client token cache with single-flight refresh
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("provider", &self.inner.executor.provider())
            .field("margin", &self.inner.margin)
            .finish_non_exhaustive()
    }
}

impl CredentialCache {
    /// Cache with the default margin, retry policy and system clock
    pub fn new<S>(source: S, executor: RequestExecutor) -> Self
    where
        S: TokenSource + 'static,
    {
        Self::builder(source, executor).build()
    }

    pub fn builder<S>(source: S, executor: RequestExecutor) -> CredentialCacheBuilder
    where
        S: TokenSource + 'static,
    {
        CredentialCacheBuilder {
            source: Box::new(source),
            executor,
            policy: RetryPolicy::default(),
            margin: DEFAULT_MARGIN,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn margin(&self) -> Duration {
        self.inner.margin
    }

    /// The cached credential regardless of validity
    pub fn current(&self) -> Option<Credential> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A credential valid for at least the margin, refreshing if necessary
    pub async fn get_valid_token(&self) -> Result<Credential, ErrorEnvelope> {
        if let Some(credential) = self.inner.valid_credential() {
            tracing::trace!(provider = self.inner.executor.provider(), "credential cache hit");
            return Ok(credential);
        }

        match self.join_or_start() {
            Join::Ready(credential) => Ok(credential),
            Join::Wait(_waiter, refresh) => refresh.await,
        }
    }

    /// Drop the cached credential so the next call re-authenticates
    pub fn invalidate(&self) {
        let mut current = self.inner.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.take().is_some() {
            tracing::debug!(provider = self.inner.executor.provider(), "credential invalidated");
        }
    }

    /// Drop the cached credential only if it is still `access_token`. A
    /// caller that was rejected with an old token must not discard a newer one.
    pub fn invalidate_token(&self, access_token: &str) -> bool {
        let mut current = self.inner.current.write().unwrap_or_else(PoisonError::into_inner);
        let matches = current
            .as_ref()
            .map_or(false, |credential| credential.access_token == access_token);
        if matches {
            *current = None;
            tracing::debug!(provider = self.inner.executor.provider(), "credential invalidated");
        }
        matches
    }

    /// Abort an in-flight refresh; every waiter receives a TIMEOUT envelope
    pub fn cancel_refresh(&self) {
        let slot = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = slot.as_ref() {
            tracing::debug!(provider = self.inner.executor.provider(), "credential refresh cancelled");
            in_flight.abort.abort();
        }
    }

    fn join_or_start(&self) -> Join<'_> {
        let mut slot = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        // A refresh may have completed between the fast-path check and the lock.
        if let Some(credential) = self.inner.valid_credential() {
            return Join::Ready(credential);
        }
        if let Some(in_flight) = slot.as_mut() {
            if in_flight.future.peek().is_none() {
                in_flight.waiters += 1;
                let waiter = Waiter {
                    inner: &self.inner,
                    id: in_flight.id,
                };
                return Join::Wait(waiter, in_flight.future.clone());
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (abort, registration) = AbortHandle::new_pair();
        let released = self.inner.executor.classifier().clone();
        // The slot owns this future, so it must not keep `Inner` alive itself.
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let previous = self.current();
        let work = async move {
            match inner.upgrade() {
                Some(inner) => inner.refresh(previous).await,
                None => Err(released.classify(&Outcome::Cancelled)),
            }
        };
        let cancelled = self.inner.executor.classifier().clone();
        let refresh = Abortable::new(work, registration)
            .map(move |result| match result {
                Ok(outcome) => outcome,
                Err(_aborted) => Err(cancelled.classify(&Outcome::Cancelled)),
            })
            .boxed()
            .shared();

        *slot = Some(InFlight {
            id,
            future: refresh.clone(),
            abort,
            waiters: 1,
        });
        Join::Wait(
            Waiter {
                inner: &self.inner,
                id,
            },
            refresh,
        )
    }
}
