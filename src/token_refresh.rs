//! # Token Refresh
//!
//! [`RefreshCoordinator`] serializes refreshes per authorization id so two
//! callers that see the same expired token burn the refresh token only once.
//! [`TokenRefreshService`] is the background task that proactively refreshes
//! authorizations nearing expiry and purges expired pending states.

use chrono::{Duration, Utc};
use metrics::{counter, gauge, histogram};
use scopeguard::ScopeGuard;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard as SyncMutexGuard};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::TokenRefreshConfig;
use crate::oauth::{Authorization, OAuthClient, OAuthClientFactory, OAuthError};
use crate::repositories::AppRepository;

/// Per-authorization refresh serialization
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// What a coordinated refresh did
#[derive(Debug)]
pub struct RefreshOutcome {
    pub authorization: Authorization,
    /// False when the predicate no longer held once the lock was taken
    pub refreshed: bool,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> SyncMutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn lock_for(&self, authorization_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks()
                .entry(authorization_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn release(&self, authorization_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks();
        // Only the map and this caller hold it: nobody is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(authorization_id);
        }
    }

    /// Lock entry for `authorization_id`, released when the guard drops even
    /// if the caller's future is cancelled mid-refresh
    fn entry<'a>(
        &'a self,
        authorization_id: &'a str,
    ) -> ScopeGuard<Arc<Mutex<()>>, impl FnOnce(Arc<Mutex<()>>) + 'a> {
        scopeguard::guard(self.lock_for(authorization_id), move |lock| {
            self.release(authorization_id, lock)
        })
    }

    /// Refresh `authorization_id` if `predicate` holds for the stored record.
    ///
    /// The record is re-read after the lock is taken, so a caller that waited
    /// behind another refresh sees the new token and skips its own.
    pub async fn refresh_when<F>(
        &self,
        client: &OAuthClient,
        authorization_id: &str,
        predicate: F,
    ) -> Result<RefreshOutcome, OAuthError>
    where
        F: Fn(&Authorization) -> bool,
    {
        let entry = self.entry(authorization_id);
        let _held = entry.lock().await;
        match client.get_authorization(authorization_id).await {
            Ok(Some(current)) if predicate(&current) => client
                .refresh(authorization_id)
                .await
                .map(|authorization| RefreshOutcome {
                    authorization,
                    refreshed: true,
                }),
            Ok(Some(current)) => Ok(RefreshOutcome {
                authorization: current,
                refreshed: false,
            }),
            Ok(None) => Err(OAuthError::AuthorizationNotFound {
                authorization_id: authorization_id.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    pub async fn refresh_if_expired(
        &self,
        client: &OAuthClient,
        authorization_id: &str,
    ) -> Result<RefreshOutcome, OAuthError> {
        let now = Utc::now();
        self.refresh_when(client, authorization_id, |a| a.has_expired_at(now))
            .await
    }

    /// Refresh regardless of expiry, still serialized with other refreshes
    pub async fn refresh_now(
        &self,
        client: &OAuthClient,
        authorization_id: &str,
    ) -> Result<Authorization, OAuthError> {
        self.refresh_when(client, authorization_id, |_| true)
            .await
            .map(|outcome| outcome.authorization)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks().len()
    }
}

/// Classification of token refresh errors for appropriate handling
#[derive(Debug, PartialEq)]
pub enum RefreshErrorClassification {
    /// The grant is dead (revoked, wrong client); an operator must re-authorize
    Permanent,
    /// Temporary failures that the next tick retries
    Transient,
    /// Rate limiting errors that should trigger backoff
    RateLimited,
}

/// Classify token refresh errors for appropriate handling strategy
pub fn classify_refresh_error(err: &OAuthError) -> RefreshErrorClassification {
    if err.is_transient() {
        return RefreshErrorClassification::Transient;
    }

    let code = match err {
        OAuthError::TokenRefresh { error, .. } | OAuthError::TokenExchange { error, .. } => {
            error.to_lowercase()
        }
        other => other.to_string().to_lowercase(),
    };

    if code.contains("invalid_grant")
        || code.contains("invalid_client")
        || code.contains("unauthorized_client")
        || code.contains("access_denied")
        || code.contains("unsupported_grant_type")
    {
        return RefreshErrorClassification::Permanent;
    }

    if code.contains("rate_limit")
        || code.contains("too_many_requests")
        || code.contains("temporarily_unavailable")
        || code == "429"
    {
        return RefreshErrorClassification::RateLimited;
    }

    RefreshErrorClassification::Transient
}

#[derive(Debug, Default)]
struct RefreshStats {
    authorizations_polled: u64,
    refreshes_succeeded: u64,
    refreshes_skipped: u64,
    refreshes_failed: u64,
}

enum TickResult {
    Refreshed,
    Skipped,
}

/// Background token refresh service
#[derive(Clone)]
pub struct TokenRefreshService {
    config: TokenRefreshConfig,
    apps: AppRepository,
    clients: OAuthClientFactory,
    coordinator: Arc<RefreshCoordinator>,
}

impl TokenRefreshService {
    pub fn new(
        config: TokenRefreshConfig,
        apps: AppRepository,
        clients: OAuthClientFactory,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            config,
            apps,
            clients,
            coordinator,
        }
    }

    /// Run the token refresh loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.tick_seconds,
            lead_time_seconds = self.config.lead_time_seconds,
            "Starting token refresh service"
        );
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Token refresh tick failed");
                    }
                }
            }
        }

        info!("Token refresh service stopped");
    }

    /// Execute one tick: refresh everything expiring within the lead time
    #[instrument(skip_all)]
    pub async fn tick(&self) -> anyhow::Result<()> {
        let _timer = scopeguard::guard(std::time::Instant::now(), |started| {
            histogram!("token_refresh_tick_duration_ms")
                .record(started.elapsed().as_secs_f64() * 1_000.0);
        });

        let now = Utc::now();
        let lead = Duration::seconds(self.config.lead_time_seconds as i64);
        let mut stats = RefreshStats::default();

        match self.clients.state_cache().purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired authorization states"),
            Err(err) => warn!(error = %err, "Failed to purge expired authorization states"),
        }

        let due = self
            .clients
            .authorizations()
            .find_expiring_before(now + lead)
            .await?;
        stats.authorizations_polled = due.len() as u64;

        info!(
            found_authorizations = due.len(),
            lead_time_seconds = self.config.lead_time_seconds,
            "Found authorizations due for token refresh"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency as usize));
        let mut handles = Vec::with_capacity(due.len());

        for authorization in due {
            let semaphore = Arc::clone(&semaphore);
            let service = self.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                service.refresh_one(authorization, lead).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(TickResult::Refreshed)) => stats.refreshes_succeeded += 1,
                Ok(Ok(TickResult::Skipped)) => stats.refreshes_skipped += 1,
                Ok(Err(err)) => {
                    stats.refreshes_failed += 1;
                    debug!(error = %err, "Authorization refresh failed");
                }
                Err(err) => {
                    stats.refreshes_failed += 1;
                    error!(error = ?err, "Refresh task panicked or was cancelled");
                }
            }
        }

        gauge!("token_refresh_authorizations_polled_gauge").set(stats.authorizations_polled as f64);
        counter!("token_refresh_success_total").increment(stats.refreshes_succeeded);
        counter!("token_refresh_failure_total").increment(stats.refreshes_failed);

        debug!(
            authorizations_polled = stats.authorizations_polled,
            refreshes_succeeded = stats.refreshes_succeeded,
            refreshes_skipped = stats.refreshes_skipped,
            refreshes_failed = stats.refreshes_failed,
            "Token refresh tick completed"
        );

        Ok(())
    }

    #[instrument(skip_all, fields(authorization_id = %authorization.authorization_id))]
    async fn refresh_one(
        &self,
        authorization: Authorization,
        lead: Duration,
    ) -> anyhow::Result<TickResult> {
        // An authorization is only refreshed while an app still points at it
        let Some(app) = self.apps.find_one_by_name(&authorization.service_name).await? else {
            debug!(service = %authorization.service_name, "No app for authorization, skipping");
            return Ok(TickResult::Skipped);
        };
        if app.authorization_id != authorization.authorization_id {
            debug!(app = %app.name, "Authorization is no longer active for app, skipping");
            return Ok(TickResult::Skipped);
        }
        let Some((app, Some(provider))) = self.apps.find_with_provider(&app.id).await? else {
            warn!(app = %app.name, "App has no provider, skipping refresh");
            return Ok(TickResult::Skipped);
        };

        let client = self.clients.for_app(&app, &provider);
        let now = Utc::now();
        let started = std::time::Instant::now();

        match self
            .coordinator
            .refresh_when(&client, &authorization.authorization_id, |current| {
                current.refresh_token.is_some() && current.expires_within(now, lead)
            })
            .await
        {
            Ok(outcome) if outcome.refreshed => {
                histogram!("token_refresh_latency_ms")
                    .record(started.elapsed().as_secs_f64() * 1_000.0);
                info!(
                    app = %app.name,
                    kind = %client.kind(),
                    expires_at = ?outcome.authorization.expires_at,
                    "Proactively refreshed authorization"
                );
                Ok(TickResult::Refreshed)
            }
            Ok(_) => Ok(TickResult::Skipped),
            Err(err) => {
                match classify_refresh_error(&err) {
                    RefreshErrorClassification::Permanent => {
                        error!(
                            app = %app.name,
                            error = %err,
                            "Permanent token refresh failure; app must be re-authorized"
                        );
                        counter!("token_refresh_permanent_failure_total").increment(1);
                    }
                    RefreshErrorClassification::Transient => {
                        warn!(app = %app.name, error = %err, "Transient token refresh failure - will retry later");
                        counter!("token_refresh_transient_failure_total").increment(1);
                    }
                    RefreshErrorClassification::RateLimited => {
                        warn!(app = %app.name, error = %err, "Rate limited during token refresh");
                        counter!("token_refresh_rate_limited_total").increment(1);
                    }
                }
                Err(err.into())
            }
        }
    }
}
