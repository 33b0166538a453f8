//! Connection state machine with reconnection and health probing

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::error::ConnectionError;
use super::state::{ConnectionInfo, ConnectionState};
use crate::broker::ConnectionConfig;

/// Upper bound for a single health probe
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Source-specific connection work
#[async_trait]
pub trait ConnectionHooks: Send + Sync {
    /// Establish the underlying connection
    async fn on_connect(&self) -> Result<(), ConnectionError>;

    /// Tear down the underlying connection
    async fn on_disconnect(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Notification for every error passed to [`ConnectionManager::handle_error`]
    async fn on_error(&self, _error: &ConnectionError) {}
}

/// Timing and retry settings for a [`ConnectionManager`]
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub health_check_interval: Option<Duration>,
}

impl ConnectionSettings {
    fn effective_reconnect_delay(&self) -> Duration {
        if self.reconnect_delay.is_zero() {
            DEFAULT_RECONNECT_DELAY
        } else {
            self.reconnect_delay
        }
    }
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: config.timeout,
            reconnect_delay: config.reconnect_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
            health_check_interval: config.health_check_interval,
        }
    }
}

/// Drives one broker connection through its lifecycle
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    broker_id: String,
    settings: ConnectionSettings,
    hooks: Arc<dyn ConnectionHooks>,
    info: Mutex<ConnectionInfo>,
    /// Serializes connect, disconnect and reconnect attempts
    transition: tokio::sync::Mutex<()>,
    /// Scope of the pending reconnect and health-check tasks; replaced on disconnect
    scope: Mutex<CancellationToken>,
    health: Mutex<Option<CancellationToken>>,
    /// Set while a reconnect task owns recovery; only changed under the `info` lock
    reconnect_pending: AtomicBool,
    tasks: TaskTracker,
}

impl ConnectionManager {
    pub fn new(
        broker_id: impl Into<String>,
        settings: ConnectionSettings,
        hooks: Arc<dyn ConnectionHooks>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker_id: broker_id.into(),
                settings,
                hooks,
                info: Mutex::new(ConnectionInfo::default()),
                transition: tokio::sync::Mutex::new(()),
                scope: Mutex::new(CancellationToken::new()),
                health: Mutex::new(None),
                reconnect_pending: AtomicBool::new(false),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.inner.broker_id
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.info.lock().state
    }

    /// Copy of the current connection info
    pub fn info(&self) -> ConnectionInfo {
        self.inner.info.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connect, or do nothing if already connected
    ///
    /// A failed attempt leaves the manager in `Error` and returns the cause;
    /// no reconnect is scheduled for it.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let _guard = self.inner.transition.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            debug!("Broker {} already connected", self.inner.broker_id);
            return Ok(());
        }

        self.inner.info.lock().state = ConnectionState::Connecting;
        info!("Connecting broker {}", self.inner.broker_id);

        let connect_timeout = self.inner.settings.connect_timeout;
        let result = match timeout(connect_timeout, self.inner.hooks.on_connect()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(connect_timeout)),
        };

        let mut info = self.inner.info.lock();
        match result {
            Ok(()) => {
                info.state = ConnectionState::Connected;
                info.connected_at = Some(Utc::now());
                info.reconnect_count = 0;
                info!("Broker {} connected", self.inner.broker_id);
                Ok(())
            }
            Err(e) => {
                info.state = ConnectionState::Error;
                info.last_error = Some(e.to_string());
                warn!("Broker {} failed to connect: {}", self.inner.broker_id, e);
                Err(e)
            }
        }
    }

    /// Cancel pending reconnects and health checks, then tear down the connection
    ///
    /// Idempotent. A failing `on_disconnect` hook is logged and recorded, never returned.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.inner.scope.lock().cancel();

        let _guard = self.inner.transition.lock().await;
        *self.inner.scope.lock() = CancellationToken::new();

        if self.state() == ConnectionState::Disconnected {
            debug!("Broker {} already disconnected", self.inner.broker_id);
            return Ok(());
        }

        if let Err(e) = self.inner.hooks.on_disconnect().await {
            warn!("Broker {} disconnect hook failed: {}", self.inner.broker_id, e);
            self.inner.info.lock().last_error = Some(e.to_string());
        }

        {
            let mut info = self.inner.info.lock();
            info.state = ConnectionState::Disconnected;
            info.connected_at = None;
        }
        info!("Broker {} disconnected", self.inner.broker_id);
        Ok(())
    }

    /// Record a connection failure and schedule a reconnect if attempts remain
    ///
    /// At most one reconnect task runs at a time. Errors reported while it is
    /// pending are recorded and folded into that task.
    pub async fn handle_error(&self, error: ConnectionError) {
        let scheduled = {
            let mut info = self.inner.info.lock();
            if info.state == ConnectionState::Disconnected {
                debug!(
                    "Broker {} ignoring error while disconnected: {}",
                    self.inner.broker_id, error
                );
                return;
            }
            info.last_error = Some(error.to_string());
            self.claim_reconnect(&mut info)
        };

        warn!("Broker {} connection error: {}", self.inner.broker_id, error);
        self.inner.hooks.on_error(&error).await;

        if let Some(token) = scheduled {
            let delay = self.inner.settings.effective_reconnect_delay();
            let manager = self.clone();
            self.inner.tasks.spawn(async move {
                manager.reconnect_loop(token, delay).await;
            });
        }
    }

    /// Decide under the info lock whether this error starts a reconnect task
    ///
    /// Returns the task's cancellation token when it does.
    fn claim_reconnect(&self, info: &mut ConnectionInfo) -> Option<CancellationToken> {
        if self.inner.reconnect_pending.load(Ordering::SeqCst) {
            if info.state == ConnectionState::Connected {
                // The pending task reconnected just now; it re-checks this state
                info.state = ConnectionState::Error;
            }
            return None;
        }

        let max_attempts = self.inner.settings.max_reconnect_attempts;
        if info.reconnect_count >= max_attempts {
            error!(
                "Broker {} reached max reconnect attempts ({})",
                self.inner.broker_id, max_attempts
            );
            info.state = ConnectionState::Error;
            return None;
        }

        info.state = ConnectionState::Reconnecting;
        self.inner.reconnect_pending.store(true, Ordering::SeqCst);
        Some(self.inner.scope.lock().clone())
    }

    /// Release the reconnect slot; caller holds the info lock
    fn release_reconnect(&self, _info: &mut ConnectionInfo) {
        self.inner.reconnect_pending.store(false, Ordering::SeqCst);
    }

    async fn reconnect_loop(&self, token: CancellationToken, delay: Duration) {
        let broker_id = &self.inner.broker_id;
        let max_attempts = self.inner.settings.max_reconnect_attempts;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Broker {} reconnect cancelled", broker_id);
                    self.release_reconnect(&mut self.inner.info.lock());
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let _guard = self.inner.transition.lock().await;
            let attempt = {
                let mut info = self.inner.info.lock();
                if token.is_cancelled() || info.state == ConnectionState::Connected {
                    self.release_reconnect(&mut info);
                    return;
                }
                if info.reconnect_count >= max_attempts {
                    error!(
                        "Broker {} giving up after {} reconnect attempts",
                        broker_id, info.reconnect_count
                    );
                    info.state = ConnectionState::Error;
                    self.release_reconnect(&mut info);
                    return;
                }
                info.reconnect_count += 1;
                info.last_reconnect_at = Some(Utc::now());
                info.reconnect_count
            };
            info!(
                "Broker {} reconnect attempt {}/{}",
                broker_id, attempt, max_attempts
            );

            let connected = self.connect_locked().await.is_ok();

            let mut info = self.inner.info.lock();
            if connected && info.state == ConnectionState::Connected {
                info!("Broker {} reconnected after {} attempt(s)", broker_id, attempt);
                self.release_reconnect(&mut info);
                return;
            }
            if connected {
                // An error arrived right after the connect succeeded
                info.reconnect_count = attempt;
            }
            if info.reconnect_count >= max_attempts {
                error!(
                    "Broker {} giving up after {} reconnect attempts",
                    broker_id, info.reconnect_count
                );
                info.state = ConnectionState::Error;
                self.release_reconnect(&mut info);
                return;
            }
            info.state = ConnectionState::Reconnecting;
        }
    }

    /// Start the periodic health probe
    ///
    /// Does nothing when no interval is configured or a probe loop is already
    /// running. The loop stops on the next `disconnect`.
    pub fn start_health_check<F, Fut>(&self, probe: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ConnectionError>> + Send + 'static,
    {
        let Some(interval) = self.inner.settings.health_check_interval else {
            debug!("Health check disabled for broker {}", self.inner.broker_id);
            return;
        };

        let token = {
            let scope = self.inner.scope.lock().clone();
            let mut health = self.inner.health.lock();
            if health.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return;
            }
            let token = scope.child_token();
            *health = Some(token.clone());
            token
        };

        let manager = self.clone();
        self.inner.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Health check stopped for broker {}", manager.inner.broker_id);
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                if !manager.is_connected() {
                    continue;
                }

                let result = match timeout(HEALTH_PROBE_TIMEOUT, probe()).await {
                    Ok(result) => result,
                    Err(_) => Err(ConnectionError::HealthCheck(format!(
                        "probe timed out after {:?}",
                        HEALTH_PROBE_TIMEOUT
                    ))),
                };

                if let Err(e) = result {
                    if token.is_cancelled() {
                        break;
                    }
                    manager.handle_error(e).await;
                }
            }
        });
    }

    /// Disconnect and wait for every background task to finish
    pub async fn shutdown(&self) {
        if let Err(e) = self.disconnect().await {
            warn!("Broker {} disconnect during shutdown failed: {}", self.inner.broker_id, e);
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
        debug!("Connection manager for broker {} shut down", self.inner.broker_id);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("broker_id", &self.inner.broker_id)
            .field("info", &self.info())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Mock hooks: the first `succeed_first` connects work, later ones fail
    struct MockHooks {
        succeed_first: u32,
        connect_calls: AtomicU32,
        disconnect_calls: AtomicU32,
        error_calls: AtomicU32,
        probe_healthy: AtomicBool,
    }

    impl MockHooks {
        fn new(succeed_first: u32) -> Arc<Self> {
            Arc::new(Self {
                succeed_first,
                connect_calls: AtomicU32::new(0),
                disconnect_calls: AtomicU32::new(0),
                error_calls: AtomicU32::new(0),
                probe_healthy: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl ConnectionHooks for MockHooks {
        async fn on_connect(&self) -> Result<(), ConnectionError> {
            let call = self.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.succeed_first {
                Ok(())
            } else {
                Err(ConnectionError::Failed("refused".to_string()))
            }
        }

        async fn on_disconnect(&self) -> Result<(), ConnectionError> {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            Err(ConnectionError::Failed("socket already gone".to_string()))
        }

        async fn on_error(&self, _error: &ConnectionError) {
            self.error_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
        }
    }

    fn settings(max_attempts: u32, delay_ms: u64) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_millis(delay_ms),
            max_reconnect_attempts: max_attempts,
            health_check_interval: None,
        }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let hooks = MockHooks::new(u32::MAX);
        let manager = ConnectionManager::new("test", settings(3, 10), hooks.clone());

        assert!(!manager.is_connected());
        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert!(manager.is_connected());
        assert_eq!(hooks.connect_calls.load(Ordering::SeqCst), 1);
        assert!(manager.info().connected_at.is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error_state() {
        let hooks = MockHooks::new(0);
        let manager = ConnectionManager::new("test", settings(3, 10), hooks.clone());

        let err = manager.connect().await.unwrap_err();
        assert_eq!(err, ConnectionError::Failed("refused".to_string()));

        let info = manager.info();
        assert_eq!(info.state, ConnectionState::Error);
        assert_eq!(info.last_error.as_deref(), Some("Connection failed: refused"));

        // No automatic retry for a direct connect failure
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hooks.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        struct SlowHooks;

        #[async_trait]
        impl ConnectionHooks for SlowHooks {
            async fn on_connect(&self) -> Result<(), ConnectionError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let mut config = settings(0, 10);
        config.connect_timeout = Duration::from_millis(20);
        let manager = ConnectionManager::new("slow", config, Arc::new(SlowHooks));

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));
        assert_eq!(manager.state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_tolerates_hook_failure() {
        let hooks = MockHooks::new(u32::MAX);
        let manager = ConnectionManager::new("test", settings(3, 10), hooks.clone());

        manager.disconnect().await.unwrap();
        assert_eq!(hooks.disconnect_calls.load(Ordering::SeqCst), 0);

        manager.connect().await.unwrap();
        manager.disconnect().await.unwrap();
        manager.disconnect().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(hooks.disconnect_calls.load(Ordering::SeqCst), 1);
        assert!(manager.info().last_error.is_some());
    }

    #[tokio::test]
    async fn test_reconnect_succeeds_and_resets_counter() {
        // Initial connect, one failed reconnect, then success
        struct FlakyHooks {
            calls: AtomicU32,
        }

        #[async_trait]
        impl ConnectionHooks for FlakyHooks {
            async fn on_connect(&self) -> Result<(), ConnectionError> {
                match self.calls.fetch_add(1, Ordering::SeqCst) {
                    1 => Err(ConnectionError::Failed("flaky".to_string())),
                    _ => Ok(()),
                }
            }
        }

        let hooks = Arc::new(FlakyHooks {
            calls: AtomicU32::new(0),
        });
        let manager = ConnectionManager::new("flaky", settings(5, 10), hooks.clone());
        manager.connect().await.unwrap();

        manager
            .handle_error(ConnectionError::Lost("reset by peer".to_string()))
            .await;
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_millis(200)).await;

        let info = manager.info();
        assert_eq!(info.state, ConnectionState::Connected);
        assert_eq!(info.reconnect_count, 0);
        assert!(info.last_reconnect_at.is_some());
        assert_eq!(hooks.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_errors_share_one_reconnect() {
        let hooks = MockHooks::new(1);
        let manager = ConnectionManager::new("test", settings(3, 10), hooks.clone());
        manager.connect().await.unwrap();

        tokio::join!(
            manager.handle_error(ConnectionError::Lost("feed closed".to_string())),
            manager.handle_error(ConnectionError::HealthCheck("stale feed".to_string())),
        );
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let info = manager.info();
        assert_eq!(info.state, ConnectionState::Error);
        assert_eq!(info.reconnect_count, 3);
        assert_eq!(hooks.error_calls.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.connect_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_error_at_ceiling_does_not_reconnect() {
        let hooks = MockHooks::new(1);
        let manager = ConnectionManager::new("test", settings(2, 10), hooks.clone());
        manager.connect().await.unwrap();

        manager
            .handle_error(ConnectionError::Lost("eof".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.info().reconnect_count, 2);

        manager
            .handle_error(ConnectionError::Lost("eof again".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let info = manager.info();
        assert_eq!(info.state, ConnectionState::Error);
        assert_eq!(info.reconnect_count, 2);
        assert_eq!(info.last_error.as_deref(), Some("Connection lost: eof again"));
        assert_eq!(hooks.connect_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let hooks = MockHooks::new(1);
        let manager = ConnectionManager::new("test", settings(3, 100), hooks.clone());
        manager.connect().await.unwrap();

        manager
            .handle_error(ConnectionError::Lost("eof".to_string()))
            .await;
        manager.disconnect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(hooks.connect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.info().reconnect_count, 0);
    }

    #[tokio::test]
    async fn test_handle_error_ignored_while_disconnected() {
        let hooks = MockHooks::new(u32::MAX);
        let manager = ConnectionManager::new("test", settings(3, 10), hooks.clone());

        manager
            .handle_error(ConnectionError::Lost("eof".to_string()))
            .await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(hooks.error_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_health_check_failure_triggers_reconnect() {
        let hooks = MockHooks::new(u32::MAX);
        let mut config = settings(3, 10);
        config.health_check_interval = Some(Duration::from_millis(20));
        let manager = ConnectionManager::new("probed", config, hooks.clone());
        manager.connect().await.unwrap();

        let probe_hooks = hooks.clone();
        manager.start_health_check(move || {
            let healthy = probe_hooks.probe_healthy.swap(true, Ordering::SeqCst);
            async move {
                if healthy {
                    Ok(())
                } else {
                    Err(ConnectionError::HealthCheck("stale feed".to_string()))
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hooks.error_calls.load(Ordering::SeqCst), 0);

        hooks.probe_healthy.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(hooks.error_calls.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected());
        assert_eq!(hooks.connect_calls.load(Ordering::SeqCst), 2);

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_zero_reconnect_delay_falls_back_to_default() {
        let config = settings(3, 0);
        assert_eq!(config.effective_reconnect_delay(), DEFAULT_RECONNECT_DELAY);
        assert_eq!(
            settings(3, 10).effective_reconnect_delay(),
            Duration::from_millis(10)
        );
    }
}
