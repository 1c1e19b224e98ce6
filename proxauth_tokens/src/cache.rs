//! Per-scope token caching with background refresh

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::Duration,
};

use dashmap::DashMap;
use proxauth_clock::{Clock, System};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::{
    sources::TokenSource, AuthError, IssuedToken, ScopeSet, TokenEntry, TokenLifetimeConfig,
    TokenStatus,
};

type FetchOutcome = Result<Arc<TokenEntry>, AuthError>;

/// Serializes fetches for a single scope set
///
/// Besides mutual exclusion, the lock remembers the outcome of the last
/// completed fetch so that callers queued behind it can take that outcome
/// instead of going to the source again.
#[derive(Default)]
struct RefreshLock {
    completed: AtomicU64,
    last: tokio::sync::Mutex<Option<FetchOutcome>>,
}

struct Shared<S, C> {
    source: S,
    lifetime: TokenLifetimeConfig<C>,
    fetch_timeout: Duration,
    runtime: Handle,
    entries: DashMap<ScopeSet, Arc<TokenEntry>>,
    locks: DashMap<ScopeSet, Arc<RefreshLock>>,
    background: Mutex<CancellationToken>,
    epoch: RwLock<u64>,
}

/// A cache of access tokens keyed by scope set
///
/// The cache serves tokens from memory while they are fresh, hands out a
/// stale token while refreshing it in the background, and blocks only when
/// no usable token exists. At most one fetch per scope set is in flight at
/// any time; callers that queue behind a fetch share its outcome.
///
/// Clones share the same underlying state.
///
/// ```
/// use proxauth_tokens::{sources::ConstTokenSource, ScopeSet, TokenCache};
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let cache = TokenCache::builder(ConstTokenSource::new("token"))
///     .build()
///     .unwrap();
///
/// let scopes = ScopeSet::single("https://proxy.example.com/user_impersonation");
/// let token = cache.acquire(&scopes).await.unwrap();
/// assert_eq!(token.access_token().as_str(), "token");
/// # }
/// ```
pub struct TokenCache<S, C = System> {
    shared: Arc<Shared<S, C>>,
}

impl<S, C> Clone for TokenCache<S, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, C> fmt::Debug for TokenCache<S, C>
where
    S: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("source", &self.shared.source)
            .field("lifetime", &self.shared.lifetime)
            .field("fetch_timeout", &self.shared.fetch_timeout)
            .field("entries", &self.shared.entries.len())
            .field("epoch", &self.shared.epoch())
            .finish()
    }
}

/// Builder for a [`TokenCache`]
#[derive(Debug)]
pub struct TokenCacheBuilder<S, C = System> {
    source: S,
    lifetime: TokenLifetimeConfig<C>,
    fetch_timeout: Duration,
    runtime: Option<Handle>,
}

impl<S> TokenCache<S, System> {
    /// Starts building a cache on top of `source`
    ///
    /// Defaults to [`TokenLifetimeConfig::default()`] and a fetch timeout
    /// of three seconds.
    pub fn builder(source: S) -> TokenCacheBuilder<S, System> {
        TokenCacheBuilder {
            source,
            lifetime: TokenLifetimeConfig::default(),
            fetch_timeout: Duration::from_secs(3),
            runtime: None,
        }
    }
}

impl<S, C> TokenCacheBuilder<S, C> {
    /// Sets the margins used to decide when tokens are stale or expired
    pub fn with_lifetime_config<D>(self, lifetime: TokenLifetimeConfig<D>) -> TokenCacheBuilder<S, D> {
        TokenCacheBuilder {
            source: self.source,
            lifetime,
            fetch_timeout: self.fetch_timeout,
            runtime: self.runtime,
        }
    }

    /// Sets how long a single fetch may take before it is abandoned
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Sets the runtime used for background refreshes and blocking callers
    ///
    /// Defaults to the runtime that is current when [`build()`][Self::build()]
    /// is called.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the cache
    ///
    /// Fails with [`AuthError::NotInitialized`] if no runtime was provided
    /// and none is current.
    pub fn build(self) -> Result<TokenCache<S, C>, AuthError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| AuthError::NotInitialized)?,
        };

        Ok(TokenCache {
            shared: Arc::new(Shared {
                source: self.source,
                lifetime: self.lifetime,
                fetch_timeout: self.fetch_timeout,
                runtime,
                entries: DashMap::new(),
                locks: DashMap::new(),
                background: Mutex::new(CancellationToken::new()),
                epoch: RwLock::new(0),
            }),
        })
    }
}

impl<S, C> TokenCache<S, C> {
    /// The underlying token source
    #[inline]
    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// The runtime on which background refreshes run
    #[inline]
    pub fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }

    /// The lifetime configuration used to evaluate cached tokens
    #[inline]
    pub fn lifetime_config(&self) -> &TokenLifetimeConfig<C> {
        &self.shared.lifetime
    }

    /// Looks up the cached entry for `scopes` without any side effects
    pub fn cached(&self, scopes: &ScopeSet) -> Option<Arc<TokenEntry>> {
        self.shared.cached(scopes)
    }

    /// Drops every cached token and cancels background refreshes
    ///
    /// Must be called on sign-out, when switching accounts and at shutdown so
    /// that tokens for one account are never served to another. Fetches
    /// already in flight still complete for their callers but their results
    /// are not cached.
    pub fn clear(&self) {
        let cancelled = {
            let mut background = self
                .shared
                .background
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *background, CancellationToken::new())
        };
        cancelled.cancel();

        {
            let mut epoch = self
                .shared
                .epoch
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *epoch = epoch.wrapping_add(1);
            self.shared.entries.clear();
            self.shared.locks.clear();
        }

        tracing::debug!("token cache cleared");
    }
}

impl<S, C: Clock> TokenCache<S, C> {
    /// Caches a token that was obtained outside the cache, such as through an
    /// interactive flow
    ///
    /// Any existing entry for `scopes` is replaced. Like a fetch, the token
    /// is not cached if [`clear()`][Self::clear()] runs concurrently.
    pub fn insert(&self, scopes: &ScopeSet, token: IssuedToken) -> Arc<TokenEntry> {
        let entry = Arc::new(TokenEntry::new(
            token,
            scopes.clone(),
            self.shared.lifetime.clock().now(),
        ));

        if self.shared.insert_if_current(self.shared.epoch(), scopes, &entry) {
            tracing::info!(%scopes, expires_at = entry.expires_at().0, "cached externally obtained token");
        }
        entry
    }
}

impl<S, C> TokenCache<S, C>
where
    S: TokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Obtains a usable token for `scopes`
    ///
    /// * A fresh cached token is returned as is.
    /// * A stale cached token is returned immediately, and a background
    ///   refresh is started.
    /// * Otherwise a token is fetched from the source, bounded by the fetch
    ///   timeout, and its outcome returned.
    pub async fn acquire(&self, scopes: &ScopeSet) -> Result<Arc<TokenEntry>, AuthError> {
        if let Some(entry) = self.shared.cached(scopes) {
            match self.shared.lifetime.token_status(&entry) {
                TokenStatus::Fresh => {
                    tracing::trace!(%scopes, "serving fresh cached token");
                    return Ok(entry);
                }
                TokenStatus::Stale => {
                    tracing::debug!(
                        %scopes,
                        expires_at = entry.expires_at().0,
                        "serving stale cached token, refreshing in background"
                    );
                    self.spawn_refresh(scopes.clone());
                    return Ok(entry);
                }
                TokenStatus::Expired => {
                    tracing::debug!(
                        %scopes,
                        expires_at = entry.expires_at().0,
                        "cached token expired, fetching"
                    );
                }
            }
        }

        self.shared.fetch_with_timeout(scopes).await
    }

    /// Obtains a usable token for `scopes` from a blocking thread
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context. The
    /// cache's runtime must be driven by other threads (as a multi-threaded
    /// runtime is) for timers to fire while the caller blocks.
    pub fn acquire_blocking(&self, scopes: &ScopeSet) -> Result<Arc<TokenEntry>, AuthError> {
        self.shared.runtime.block_on(self.acquire(scopes))
    }

    fn spawn_refresh(&self, scopes: ScopeSet) {
        let cancel = self.shared.background_token();
        let shared = Arc::clone(&self.shared);

        self.shared.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(%scopes, "background refresh cancelled");
                }
                outcome = shared.fetch_with_timeout(&scopes) => match outcome {
                    Ok(entry) => {
                        tracing::debug!(
                            %scopes,
                            expires_at = entry.expires_at().0,
                            "background refresh complete"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(
                            %scopes,
                            %error,
                            "background refresh failed, serving cached token until it expires"
                        );
                    }
                }
            }
        });
    }
}

impl<S, C> Shared<S, C> {
    fn cached(&self, scopes: &ScopeSet) -> Option<Arc<TokenEntry>> {
        self.entries.get(scopes).map(|e| Arc::clone(e.value()))
    }

    fn refresh_lock(&self, scopes: &ScopeSet) -> Arc<RefreshLock> {
        Arc::clone(self.locks.entry(scopes.clone()).or_default().value())
    }

    fn background_token(&self) -> CancellationToken {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn epoch(&self) -> u64 {
        *self.epoch.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caches `entry` unless the cache was cleared since `epoch` was read
    ///
    /// The epoch stays read-locked across the insert, so a concurrent
    /// `clear()` either runs before the check or wipes the new entry.
    fn insert_if_current(&self, epoch: u64, scopes: &ScopeSet, entry: &Arc<TokenEntry>) -> bool {
        let current = self.epoch.read().unwrap_or_else(PoisonError::into_inner);
        if *current != epoch {
            return false;
        }

        self.entries.insert(scopes.clone(), Arc::clone(entry));
        true
    }
}

impl<S, C> Shared<S, C>
where
    S: TokenSource,
    C: Clock,
{
    async fn fetch_with_timeout(&self, scopes: &ScopeSet) -> FetchOutcome {
        match tokio::time::timeout(self.fetch_timeout, self.fetch_and_cache(scopes)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    %scopes,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "token fetch timed out"
                );
                Err(AuthError::Timeout)
            }
        }
    }

    async fn fetch_and_cache(&self, scopes: &ScopeSet) -> FetchOutcome {
        let lock = self.refresh_lock(scopes);
        let seen = lock.completed.load(Ordering::Acquire);
        let mut last = lock.last.lock().await;

        if lock.completed.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last.as_ref() {
                tracing::trace!(%scopes, "sharing outcome of concurrent fetch");
                return outcome.clone();
            }
        }

        if let Some(entry) = self.cached(scopes) {
            if self.lifetime.token_status(&entry).is_fresh() {
                tracing::trace!(%scopes, "token was refreshed while waiting");
                return Ok(entry);
            }
        }

        let epoch = self.epoch();
        let outcome = self.fetch(scopes).await.map(|token| {
            Arc::new(TokenEntry::new(
                token,
                scopes.clone(),
                self.lifetime.clock().now(),
            ))
        });

        if let Ok(entry) = &outcome {
            if self.insert_if_current(epoch, scopes, entry) {
                tracing::info!(
                    %scopes,
                    expires_at = entry.expires_at().0,
                    "cached new access token"
                );
            } else {
                tracing::debug!(%scopes, "cache cleared during fetch, discarding token");
            }
        }

        *last = Some(outcome.clone());
        lock.completed.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    #[tracing::instrument(level = "debug", err, skip(self, scopes), fields(scopes = %scopes))]
    async fn fetch(&self, scopes: &ScopeSet) -> Result<IssuedToken, AuthError> {
        let account = self
            .source
            .current_account()
            .await?
            .ok_or(AuthError::NoAccount)?;

        tracing::debug!(account = %account.username, "requesting token from source");
        self.source.acquire_silent(&account, scopes).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use async_trait::async_trait;
    use proxauth_clock::{DurationSecs, TestClock, UnixTime};

    use super::*;
    use crate::sources::Account;

    struct CountingSource {
        calls: AtomicUsize,
        finished: AtomicUsize,
        delay: Duration,
        failing: AtomicBool,
        clock: TestClock,
    }

    impl CountingSource {
        fn new(clock: TestClock) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                delay: Duration::ZERO,
                failing: AtomicBool::new(false),
                clock,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }

        fn fail(&self) {
            self.failing.store(true, Ordering::SeqCst);
        }
    }

    fn account() -> Account {
        Account {
            id: "id".into(),
            username: "user@example.com".into(),
            tenant_id: "tenant".into(),
            authority: "https://login.example.com/tenant".into(),
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn current_account(&self) -> Result<Option<Account>, AuthError> {
            Ok(Some(account()))
        }

        async fn acquire_silent(
            &self,
            _: &Account,
            _: &ScopeSet,
        ) -> Result<IssuedToken, AuthError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.finished.fetch_add(1, Ordering::SeqCst);

            if self.failing.load(Ordering::SeqCst) {
                Err(AuthError::unknown("authority unavailable"))
            } else {
                Ok(IssuedToken::new(
                    format!("token-{}", call),
                    self.clock.now() + DurationSecs::from_mins(60),
                ))
            }
        }

        async fn sign_out(&self, _: &Account) -> Result<(), AuthError> {
            Ok(())
        }
    }

    const START: UnixTime = UnixTime(1_700_000_000);

    fn cache_with(source: CountingSource, clock: &TestClock) -> TokenCache<CountingSource, TestClock> {
        TokenCache::builder(source)
            .with_lifetime_config(TokenLifetimeConfig::default().with_clock(clock.clone()))
            .build()
            .unwrap()
    }

    fn scopes() -> ScopeSet {
        ScopeSet::parse("https://proxy.example/user_impersonation openid")
    }

    async fn wait_for_calls(source: &CountingSource, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while source.calls() < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("source was not called in time");
    }

    #[tokio::test]
    async fn scope_order_does_not_create_a_new_entry() {
        let clock = TestClock::new(START);
        let cache = cache_with(CountingSource::new(clock.clone()), &clock);

        let a: ScopeSet = ["openid", "profile"].into_iter().collect();
        let b: ScopeSet = ["profile", "openid"].into_iter().collect();

        let first = cache.acquire(&a).await.unwrap();
        let second = cache.acquire(&b).await.unwrap();

        assert_eq!(cache.source().calls(), 1);
        assert_eq!(first.access_token(), second.access_token());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_a_single_fetch() {
        let clock = TestClock::new(START);
        let cache = cache_with(
            CountingSource::new(clock.clone()).with_delay(Duration::from_millis(100)),
            &clock,
        );

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.acquire(&scopes()).await })
            })
            .collect();

        for task in tasks {
            let entry = task.await.unwrap().unwrap();
            assert_eq!(entry.access_token().as_str(), "token-1");
        }

        assert_eq!(cache.source().calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_a_single_failure() {
        let clock = TestClock::new(START);
        let source = CountingSource::new(clock.clone()).with_delay(Duration::from_millis(100));
        source.fail();
        let cache = cache_with(source, &clock);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.acquire(&scopes()).await })
            })
            .collect();

        for task in tasks {
            let result = task.await.unwrap();
            assert!(matches!(result, Err(AuthError::Unknown(_))));
        }

        assert_eq!(cache.source().calls(), 1);
    }

    mod when_a_token_is_cached {
        use super::*;

        #[tokio::test]
        async fn fresh_token_is_served_without_fetching() {
            let clock = TestClock::new(START);
            let cache = cache_with(CountingSource::new(clock.clone()), &clock);
            cache.acquire(&scopes()).await.unwrap();

            clock.advance(DurationSecs::from_mins(50));
            let entry = cache.acquire(&scopes()).await.unwrap();

            assert_eq!(entry.access_token().as_str(), "token-1");
            tokio::task::yield_now().await;
            assert_eq!(cache.source().calls(), 1);
        }

        #[tokio::test]
        async fn stale_token_is_served_and_refreshed_once_in_background() {
            let clock = TestClock::new(START);
            let cache = cache_with(
                CountingSource::new(clock.clone()).with_delay(Duration::from_millis(50)),
                &clock,
            );
            cache.acquire(&scopes()).await.unwrap();

            clock.advance(DurationSecs::from_mins(56));
            let entry = cache.acquire(&scopes()).await.unwrap();
            assert_eq!(entry.access_token().as_str(), "token-1");

            wait_for_calls(cache.source(), 2).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(cache.source().calls(), 2);

            let entry = cache.acquire(&scopes()).await.unwrap();
            assert_eq!(entry.access_token().as_str(), "token-2");
            assert_eq!(cache.source().calls(), 2);
        }

        #[tokio::test]
        async fn expired_token_blocks_on_a_new_fetch() {
            let clock = TestClock::new(START);
            let cache = cache_with(CountingSource::new(clock.clone()), &clock);
            cache.acquire(&scopes()).await.unwrap();

            clock.advance(DurationSecs::from_mins(58));
            let entry = cache.acquire(&scopes()).await.unwrap();

            assert_eq!(entry.access_token().as_str(), "token-2");
            assert_eq!(cache.source().calls(), 2);
        }

        #[tokio::test]
        async fn failed_background_refresh_keeps_serving_the_stale_token() {
            let clock = TestClock::new(START);
            let cache = cache_with(CountingSource::new(clock.clone()), &clock);
            cache.acquire(&scopes()).await.unwrap();

            cache.source().fail();
            clock.advance(DurationSecs::from_mins(56));
            let entry = cache.acquire(&scopes()).await.unwrap();
            assert_eq!(entry.access_token().as_str(), "token-1");

            wait_for_calls(cache.source(), 2).await;
            tokio::time::sleep(Duration::from_millis(20)).await;

            let cached = cache.cached(&scopes()).unwrap();
            assert_eq!(cached.access_token().as_str(), "token-1");
        }

        #[tokio::test]
        async fn clear_forces_a_fresh_fetch() {
            let clock = TestClock::new(START);
            let cache = cache_with(CountingSource::new(clock.clone()), &clock);
            cache.acquire(&scopes()).await.unwrap();

            cache.clear();
            assert!(cache.cached(&scopes()).is_none());

            let entry = cache.acquire(&scopes()).await.unwrap();
            assert_eq!(entry.access_token().as_str(), "token-2");
            assert_eq!(cache.source().calls(), 2);
        }

        #[tokio::test]
        async fn inserted_tokens_are_served_without_fetching() {
            let clock = TestClock::new(START);
            let cache = cache_with(CountingSource::new(clock.clone()), &clock);

            cache.insert(
                &scopes(),
                IssuedToken::new("interactive", START + DurationSecs::from_mins(60)),
            );

            let entry = cache.acquire(&scopes()).await.unwrap();
            assert_eq!(entry.access_token().as_str(), "interactive");
            assert_eq!(cache.source().calls(), 0);
        }

        #[tokio::test]
        async fn clear_cancels_a_background_refresh() {
            let clock = TestClock::new(START);
            let cache = cache_with(
                CountingSource::new(clock.clone()).with_delay(Duration::from_millis(200)),
                &clock,
            );
            cache.acquire(&scopes()).await.unwrap();
            assert_eq!(cache.source().finished(), 1);

            clock.advance(DurationSecs::from_mins(56));
            cache.acquire(&scopes()).await.unwrap();
            wait_for_calls(cache.source(), 2).await;

            cache.clear();
            tokio::time::sleep(Duration::from_millis(400)).await;

            assert_eq!(cache.source().calls(), 2);
            assert_eq!(cache.source().finished(), 1);
            assert!(cache.cached(&scopes()).is_none());
        }
    }

    mod when_fetching_fails {
        use super::*;

        #[tokio::test]
        async fn slow_source_times_out() {
            let clock = TestClock::new(START);
            let cache = TokenCache::builder(
                CountingSource::new(clock.clone()).with_delay(Duration::from_millis(500)),
            )
            .with_lifetime_config(TokenLifetimeConfig::default().with_clock(clock.clone()))
            .with_fetch_timeout(Duration::from_millis(20))
            .build()
            .unwrap();

            let result = cache.acquire(&scopes()).await;
            assert!(matches!(result, Err(AuthError::Timeout)));
        }

        #[tokio::test]
        async fn missing_account_is_reported() {
            let cache = TokenCache::builder(crate::sources::ConstTokenSource::new("t").signed_out())
                .build()
                .unwrap();

            let result = cache.acquire(&scopes()).await;
            assert!(matches!(result, Err(AuthError::NoAccount)));
        }

        #[tokio::test]
        async fn failures_are_not_cached() {
            let clock = TestClock::new(START);
            let cache = cache_with(CountingSource::new(clock.clone()), &clock);
            cache.source().fail();

            assert!(cache.acquire(&scopes()).await.is_err());
            assert!(cache.cached(&scopes()).is_none());

            cache.source().failing.store(false, Ordering::SeqCst);
            let entry = cache.acquire(&scopes()).await.unwrap();
            assert_eq!(entry.access_token().as_str(), "token-2");
        }
    }

    #[tokio::test]
    async fn clear_during_fetch_discards_the_result() {
        let clock = TestClock::new(START);
        let cache = cache_with(
            CountingSource::new(clock.clone()).with_delay(Duration::from_millis(100)),
            &clock,
        );

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.acquire(&scopes()).await })
        };

        wait_for_calls(cache.source(), 1).await;
        cache.clear();

        let entry = pending.await.unwrap().unwrap();
        assert_eq!(entry.access_token().as_str(), "token-1");
        assert!(cache.cached(&scopes()).is_none());
    }

    #[tokio::test]
    async fn inserts_from_before_a_clear_are_rejected() {
        let clock = TestClock::new(START);
        let cache = cache_with(CountingSource::new(clock.clone()), &clock);
        let entry = Arc::new(TokenEntry::new(
            IssuedToken::new("previous-account", START + DurationSecs::from_mins(60)),
            scopes(),
            START,
        ));

        let epoch = cache.shared.epoch();
        cache.clear();

        assert!(!cache.shared.insert_if_current(epoch, &scopes(), &entry));
        assert!(cache.cached(&scopes()).is_none());

        assert!(cache.shared.insert_if_current(cache.shared.epoch(), &scopes(), &entry));
        assert!(cache.cached(&scopes()).is_some());
    }

    struct SwitchingSource {
        account: AtomicUsize,
        clock: TestClock,
    }

    #[async_trait]
    impl TokenSource for SwitchingSource {
        async fn current_account(&self) -> Result<Option<Account>, AuthError> {
            let mut account = account();
            account.id = self.account.load(Ordering::SeqCst).to_string();
            Ok(Some(account))
        }

        async fn acquire_silent(
            &self,
            account: &Account,
            _: &ScopeSet,
        ) -> Result<IssuedToken, AuthError> {
            tokio::task::yield_now().await;
            Ok(IssuedToken::new(
                format!("account-{}", account.id),
                self.clock.now() + DurationSecs::from_mins(60),
            ))
        }

        async fn sign_out(&self, _: &Account) -> Result<(), AuthError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn clear_never_leaves_a_previous_accounts_token() {
        let clock = TestClock::new(START);
        let cache = TokenCache::builder(SwitchingSource {
            account: AtomicUsize::new(0),
            clock: clock.clone(),
        })
        .with_lifetime_config(TokenLifetimeConfig::default().with_clock(clock.clone()))
        .build()
        .unwrap();

        let stop = CancellationToken::new();
        let callers: Vec<_> = (0..3)
            .map(|_| {
                let cache = cache.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    while !stop.is_cancelled() {
                        let _ = cache.acquire(&scopes()).await;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for account in 1..300 {
            cache.source().account.store(account, Ordering::SeqCst);
            cache.clear();

            if let Some(entry) = cache.cached(&scopes()) {
                assert_eq!(entry.access_token().as_str(), format!("account-{}", account));
            }
            tokio::task::yield_now().await;
        }

        stop.cancel();
        for caller in callers {
            caller.await.unwrap();
        }
    }

    #[test]
    fn build_without_runtime_is_not_initialized() {
        let result = TokenCache::builder(crate::sources::ConstTokenSource::new("t")).build();
        assert!(matches!(result, Err(AuthError::NotInitialized)));
    }

    #[test]
    fn blocking_callers_can_acquire_from_plain_threads() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let cache = TokenCache::builder(crate::sources::ConstTokenSource::new("blocking"))
            .with_runtime(runtime.handle().clone())
            .build()
            .unwrap();

        let worker = {
            let cache = cache.clone();
            std::thread::spawn(move || cache.acquire_blocking(&scopes()))
        };

        let entry = worker.join().unwrap().unwrap();
        assert_eq!(entry.access_token().as_str(), "blocking");
    }
}
