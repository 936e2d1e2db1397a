//! Database access: a process-wide connection cache in front of the diesel pool.
//!
//! The pool is dialed lazily on first use, or eagerly at startup. Concurrent
//! callers that arrive while a dial is in flight share that dial and its
//! outcome. A failed dial leaves the cache empty so the next request retries.

use async_trait::async_trait;
use deadpool::managed::{Object, Pool};
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncPgConnection};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};

pub type DbPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;
pub type DbConn = Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("timed out after {0:?} waiting for the database")]
    Timeout(Duration),
    #[error("failed to connect to the database: {0}")]
    Connect(String),
}

/// Dials a shareable database handle.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Handle, ConnectionError>;

    fn is_healthy(&self, _handle: &Self::Handle) -> bool {
        true
    }

    fn close(&self, _handle: &Self::Handle) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type Attempt<H> = Shared<BoxFuture<'static, Result<H, ConnectionError>>>;

enum Slot<H> {
    Empty,
    Connecting { attempt_id: u64, attempt: Attempt<H> },
    Ready(H),
}

pub struct ConnectionCache<C: Connector> {
    connector: Arc<C>,
    timeout: Duration,
    slot: Mutex<Slot<C::Handle>>,
    attempts: AtomicU64,
}

impl<C: Connector> ConnectionCache<C> {
    pub fn new(connector: C, timeout: Duration) -> Self {
        Self {
            connector: Arc::new(connector),
            timeout,
            slot: Mutex::new(Slot::Empty),
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns the cached handle, dialing at most once across concurrent callers.
    pub async fn ensure_connection(&self) -> Result<C::Handle, ConnectionError> {
        let (attempt_id, attempt) = {
            let mut slot = self.slot.lock().await;

            let in_flight = match &*slot {
                Slot::Ready(handle) if self.connector.is_healthy(handle) => {
                    return Ok(handle.clone());
                }
                Slot::Ready(_) => {
                    tracing::warn!("cached database handle is unhealthy, reconnecting");
                    None
                }
                Slot::Connecting {
                    attempt_id,
                    attempt,
                } => Some((*attempt_id, attempt.clone())),
                Slot::Empty => None,
            };

            match in_flight {
                Some(in_flight) => in_flight,
                None => {
                    let attempt_id = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    let attempt = self.dial(attempt_id);
                    *slot = Slot::Connecting {
                        attempt_id,
                        attempt: attempt.clone(),
                    };
                    (attempt_id, attempt)
                }
            }
        };

        let result = attempt.await;

        let mut slot = self.slot.lock().await;
        if matches!(&*slot, Slot::Connecting { attempt_id: current, .. } if *current == attempt_id)
        {
            *slot = match &result {
                Ok(handle) => Slot::Ready(handle.clone()),
                Err(_) => Slot::Empty,
            };
        }

        result
    }

    /// Starts a dial on its own task. The dial and its timeout keep running
    /// even when every caller waiting on it is cancelled.
    fn dial(&self, attempt_id: u64) -> Attempt<C::Handle> {
        let connector = Arc::clone(&self.connector);
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            tracing::info!(attempt = attempt_id, "connecting to database");
            let result = match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(timeout)),
            };
            match &result {
                Ok(_) => tracing::info!(attempt = attempt_id, "database connected"),
                Err(err) => tracing::warn!(attempt = attempt_id, error = %err, "database connection failed"),
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(ConnectionError::Connect(format!("dial task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }

    /// Forgets the cached handle so the next caller dials again.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if matches!(&*slot, Slot::Ready(_)) {
            *slot = Slot::Empty;
        }
    }

    pub async fn state(&self) -> ConnectionState {
        match &*self.slot.lock().await {
            Slot::Empty => ConnectionState::Disconnected,
            Slot::Connecting { .. } => ConnectionState::Connecting,
            Slot::Ready(_) => ConnectionState::Connected,
        }
    }

    /// Number of dials started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Closes and drops the cached handle.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Slot::Ready(handle) = &*slot {
            self.connector.close(handle);
        }
        *slot = Slot::Empty;
    }
}

pub struct PgConnector {
    url: String,
    pool_size: usize,
}

impl PgConnector {
    pub fn new(url: impl Into<String>, pool_size: usize) -> Self {
        Self {
            url: url.into(),
            pool_size,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = DbPool;

    async fn connect(&self) -> Result<DbPool, ConnectionError> {
        use diesel_async::RunQueryDsl;

        let db_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&self.url);
        let pool = Pool::builder(db_config)
            .max_size(self.pool_size)
            .build()
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        // the pool dials lazily; make sure the server actually answers
        let conn: &mut DbConn = &mut pool
            .get()
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        diesel::sql_query("SELECT 1")
            .execute(conn)
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        Ok(pool)
    }

    fn is_healthy(&self, pool: &DbPool) -> bool {
        !pool.is_closed()
    }

    fn close(&self, pool: &DbPool) {
        pool.close();
    }
}

/// Handle passed to every request through an `Extension`.
#[derive(Clone)]
pub struct Database {
    cache: Arc<ConnectionCache<PgConnector>>,
}

impl Database {
    pub fn new(url: &str, pool_size: usize, connect_timeout: Duration) -> Self {
        Self {
            cache: Arc::new(ConnectionCache::new(
                PgConnector::new(url, pool_size),
                connect_timeout,
            )),
        }
    }

    /// Checks out a pooled connection, dialing the database first if needed.
    pub async fn conn(&self) -> AppResult<DbConn> {
        let pool = self
            .cache
            .ensure_connection()
            .await
            .map_err(AppError::upstream)?;

        match pool.get().await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                self.cache.invalidate().await;
                Err(AppError::upstream(ConnectionError::Connect(err.to_string())))
            }
        }
    }

    pub async fn warm_up(&self) -> Result<(), ConnectionError> {
        self.cache.ensure_connection().await.map(|_| ())
    }

    pub async fn state(&self) -> ConnectionState {
        self.cache.state().await
    }

    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeConnector {
        dials: AtomicU64,
        failures_left: AtomicU64,
        delay: Duration,
        steps: u32,
        unhealthy: AtomicBool,
    }

    impl FakeConnector {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Handle = u64;

        async fn connect(&self) -> Result<u64, ConnectionError> {
            let dial = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
            // each step only starts once the previous one is polled to completion
            for _ in 0..self.steps.max(1) {
                tokio::time::sleep(self.delay).await;
            }
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ConnectionError::Connect("connection refused".to_string()));
            }
            Ok(dial)
        }

        fn is_healthy(&self, _handle: &u64) -> bool {
            !self.unhealthy.load(Ordering::SeqCst)
        }
    }

    fn cache(connector: FakeConnector) -> Arc<ConnectionCache<FakeConnector>> {
        Arc::new(ConnectionCache::new(connector, Duration::from_secs(5)))
    }

    async fn ensure_concurrently(
        cache: &Arc<ConnectionCache<FakeConnector>>,
        callers: usize,
    ) -> Vec<Result<u64, ConnectionError>> {
        let handles = (0..callers)
            .map(|_| {
                let cache = Arc::clone(cache);
                tokio::spawn(async move { cache.ensure_connection().await })
            })
            .collect::<Vec<_>>();

        let mut results = Vec::with_capacity(callers);
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_dial() {
        let cache = cache(FakeConnector::with_delay(Duration::from_millis(50)));

        let results = ensure_concurrently(&cache, 16).await;

        assert!(results.iter().all(|r| matches!(r, Ok(1))));
        assert_eq!(cache.attempts(), 1);
        assert_eq!(cache.connector.dials.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn established_handle_is_reused() {
        let cache = cache(FakeConnector::default());

        assert_eq!(cache.ensure_connection().await.unwrap(), 1);
        assert_eq!(cache.ensure_connection().await.unwrap(), 1);
        assert_eq!(cache.attempts(), 1);
    }

    #[tokio::test]
    async fn failed_dial_is_shared_then_retried_once() {
        let connector = FakeConnector::with_delay(Duration::from_millis(50));
        connector.failures_left.store(1, Ordering::SeqCst);
        let cache = cache(connector);

        let results = ensure_concurrently(&cache, 8).await;
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(cache.attempts(), 1);
        assert_eq!(cache.state().await, ConnectionState::Disconnected);

        assert_eq!(cache.ensure_connection().await.unwrap(), 2);
        assert_eq!(cache.attempts(), 2);
        assert_eq!(cache.connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_dial_times_out() {
        let cache = Arc::new(ConnectionCache::new(
            FakeConnector::with_delay(Duration::from_millis(500)),
            Duration::from_millis(20),
        ));

        let err = cache.ensure_connection().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));
        assert_eq!(cache.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn dial_outlives_a_cancelled_caller() {
        let connector = FakeConnector {
            delay: Duration::from_millis(20),
            steps: 5,
            ..FakeConnector::default()
        };
        let cache = Arc::new(ConnectionCache::new(connector, Duration::from_millis(300)));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), cache.ensure_connection()).await;
        assert!(abandoned.is_err());

        // well past the connect timeout; an unpolled dial would have stalled and timed out
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(cache.ensure_connection().await.unwrap(), 1);
        assert_eq!(cache.attempts(), 1);
        assert_eq!(cache.connector.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unhealthy_handle_is_redialed() {
        let cache = cache(FakeConnector::default());
        assert_eq!(cache.ensure_connection().await.unwrap(), 1);

        cache.connector.unhealthy.store(true, Ordering::SeqCst);
        assert_eq!(cache.ensure_connection().await.unwrap(), 2);
        assert_eq!(cache.attempts(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_dial() {
        let cache = cache(FakeConnector::default());
        cache.ensure_connection().await.unwrap();

        cache.invalidate().await;
        assert_eq!(cache.state().await, ConnectionState::Disconnected);
        assert_eq!(cache.ensure_connection().await.unwrap(), 2);
    }
}
