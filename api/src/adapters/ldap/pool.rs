//! Bounded LDAP connection pool
//!
//! Long-lived admin-bound sessions handed out one caller at a time.
//! Acquisition either returns a cached session, blocks up to the
//! configured timeout, fails with pool-exhausted, or fails with
//! cancelled when the caller's own deadline elapses first; a closed
//! pool fails every acquisition. Cached sessions get a cheap RootDSE
//! probe before reuse so idle-connection drops never reach callers.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope};
use metrics::counter;

use crate::domain::Deadline;
use crate::error::DirectoryError;

/// Observable pool counters
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_flight: usize,
    pub total_acquired: u64,
}

struct PoolInner {
    url: String,
    bind_dn: String,
    bind_password: String,
    capacity: usize,
    acquire_timeout: Duration,
    conn_timeout: Duration,
    sem: Arc<tokio::sync::Semaphore>,
    idle: Mutex<Vec<Ldap>>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    total_acquired: AtomicU64,
}

/// Pool of admin-bound directory sessions
#[derive(Clone)]
pub struct LdapPool {
    inner: Arc<PoolInner>,
}

/// A session checked out of the pool.
///
/// Deref gives the underlying `Ldap` handle. Dropping the guard returns
/// the session to the pool, or closes it when the pool is full or closed.
pub struct PooledConn {
    ldap: Option<Ldap>,
    pool: Arc<PoolInner>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledConn {
    type Target = Ldap;

    fn deref(&self) -> &Ldap {
        self.ldap.as_ref().expect("session taken")
    }
}

impl std::ops::DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Ldap {
        self.ldap.as_mut().expect("session taken")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        let Some(ldap) = self.ldap.take() else {
            return;
        };
        self.pool.in_flight.fetch_sub(1, Ordering::Relaxed);

        if !self.pool.closed.load(Ordering::Acquire) {
            let mut idle = self.pool.idle.lock().expect("pool lock poisoned");
            if idle.len() < self.pool.capacity {
                idle.push(ldap);
                return;
            }
        }
        // Pool closed or already full after transient shrinkage: the
        // handle is dropped, which terminates the connection driver.
    }
}

impl LdapPool {
    pub fn new(
        url: String,
        bind_dn: String,
        bind_password: String,
        capacity: usize,
        acquire_timeout: Duration,
        conn_timeout: Duration,
    ) -> Self {
        LdapPool {
            inner: Arc::new(PoolInner {
                url,
                bind_dn,
                bind_password,
                capacity,
                acquire_timeout,
                conn_timeout,
                sem: Arc::new(tokio::sync::Semaphore::new(capacity)),
                idle: Mutex::new(Vec::with_capacity(capacity)),
                closed: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                total_acquired: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire a session, blocking up to the pool's acquisition timeout.
    ///
    /// The caller's `deadline` is raced alongside the pool's own
    /// timeout: if it elapses first the acquisition fails with
    /// cancelled, distinct from pool-exhausted.
    pub async fn acquire(&self, deadline: Deadline) -> Result<PooledConn, DirectoryError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(DirectoryError::PoolClosed);
        }
        if deadline.expired() {
            counter!("directory_pool_cancelled_total").increment(1);
            return Err(DirectoryError::Cancelled);
        }

        let permit = tokio::select! {
            permit = inner.sem.clone().acquire_owned() => {
                permit.map_err(|_| DirectoryError::PoolClosed)?
            }
            _ = tokio::time::sleep(inner.acquire_timeout) => {
                counter!("directory_pool_exhausted_total").increment(1);
                return Err(DirectoryError::PoolExhausted);
            }
            _ = deadline.elapsed() => {
                counter!("directory_pool_cancelled_total").increment(1);
                return Err(DirectoryError::Cancelled);
            }
        };

        // Re-check after the wait: a shutdown may have raced the permit.
        if inner.closed.load(Ordering::Acquire) {
            return Err(DirectoryError::PoolClosed);
        }

        // Try cached sessions first; discard any that fail the probe.
        loop {
            let cached = inner.idle.lock().expect("pool lock poisoned").pop();
            let Some(mut ldap) = cached else { break };
            if Self::probe(&mut ldap, inner.conn_timeout).await {
                return Ok(self.checked_out(ldap, permit));
            }
            tracing::debug!("Discarding stale directory session");
            counter!("directory_pool_discarded_total").increment(1);
        }

        let ldap = self.dial().await?;
        Ok(self.checked_out(ldap, permit))
    }

    fn checked_out(&self, ldap: Ldap, permit: tokio::sync::OwnedSemaphorePermit) -> PooledConn {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        self.inner.total_acquired.fetch_add(1, Ordering::Relaxed);
        counter!("directory_pool_acquired_total").increment(1);
        PooledConn {
            ldap: Some(ldap),
            pool: self.inner.clone(),
            _permit: permit,
        }
    }

    /// Dial a fresh admin-bound session.
    async fn dial(&self) -> Result<Ldap, DirectoryError> {
        let inner = &self.inner;
        let settings = LdapConnSettings::new().set_conn_timeout(inner.conn_timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &inner.url).await?;
        ldap3::drive!(conn);
        ldap.with_timeout(inner.conn_timeout)
            .simple_bind(&inner.bind_dn, &inner.bind_password)
            .await?
            .success()?;
        Ok(ldap)
    }

    /// Dial a session outside the pool, without the admin bind. Used for
    /// user authentication checks, which must never consume pool slots.
    pub async fn dial_unbound(&self) -> Result<Ldap, DirectoryError> {
        let inner = &self.inner;
        let settings = LdapConnSettings::new().set_conn_timeout(inner.conn_timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &inner.url).await?;
        ldap3::drive!(conn);
        Ok(ldap)
    }

    /// Cheap liveness check: base-scope RootDSE search, no attributes.
    async fn probe(ldap: &mut Ldap, timeout: Duration) -> bool {
        ldap.with_timeout(timeout)
            .search("", Scope::Base, "(objectClass=*)", vec!["1.1"])
            .await
            .and_then(|r| r.success())
            .is_ok()
    }

    /// Close the pool: all subsequent acquisitions fail, idle sessions
    /// are unbound, and in-flight sessions close on release.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.sem.close();
        let drained: Vec<Ldap> = {
            let mut idle = self.inner.idle.lock().expect("pool lock poisoned");
            idle.drain(..).collect()
        };
        for mut ldap in drained {
            if let Err(e) = ldap.unbind().await {
                tracing::debug!(error = %e, "Unbind on pool close failed");
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.inner.capacity,
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            total_acquired: self.inner.total_acquired.load(Ordering::Relaxed),
        }
    }

    pub fn conn_timeout(&self) -> Duration {
        self.inner.conn_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(capacity: usize) -> LdapPool {
        LdapPool::new(
            "ldap://localhost:1".to_string(),
            "cn=admin,dc=example,dc=org".to_string(),
            "secret".to_string(),
            capacity,
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquisition() {
        let pool = test_pool(2);
        pool.close().await;
        match pool.acquire(Deadline::none()).await {
            Err(DirectoryError::PoolClosed) => {}
            other => panic!("expected PoolClosed, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn expired_caller_deadline_is_cancelled() {
        let pool = test_pool(2);
        match pool.acquire(Deadline::after(Duration::ZERO)).await {
            Err(DirectoryError::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn caller_deadline_beats_pool_timeout() {
        // Zero capacity: acquisition can never succeed, so the two
        // timers race cleanly.
        let pool = LdapPool::new(
            "ldap://localhost:1".to_string(),
            "cn=admin,dc=example,dc=org".to_string(),
            "secret".to_string(),
            0,
            Duration::from_secs(10),
            Duration::from_millis(50),
        );
        match pool.acquire(Deadline::after(Duration::from_millis(20))).await {
            Err(DirectoryError::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn pool_timeout_without_caller_deadline_is_exhausted() {
        let pool = LdapPool::new(
            "ldap://localhost:1".to_string(),
            "cn=admin,dc=example,dc=org".to_string(),
            "secret".to_string(),
            0,
            Duration::from_millis(20),
            Duration::from_millis(50),
        );
        match pool.acquire(Deadline::none()).await {
            Err(DirectoryError::PoolExhausted) => {}
            other => panic!("expected PoolExhausted, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let pool = test_pool(4);
        let stats = pool.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.total_acquired, 0);
    }
}
