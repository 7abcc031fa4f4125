//! Session-id pool.
//!
//! A bounded pool hands out at most `capacity` ids at a time; callers beyond
//! that wait until a lease is returned. With sizing disabled every acquire
//! mints a fresh id and nothing is ever reused.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tracing::{trace, warn};

use crate::error::{ClickhouseError, Result};
use crate::ids::IdGenerator;

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPoolStatus {
    /// `None` in stateless mode.
    pub capacity: Option<usize>,
    pub available: usize,
    pub checked_out: usize,
}

#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

enum PoolInner {
    Stateless {
        ids: Arc<IdGenerator>,
    },
    Bounded {
        capacity: usize,
        available: Mutex<VecDeque<String>>,
        permits: Semaphore,
    },
}

impl SessionPool {
    /// Bounded pool pre-filled with `capacity` fresh ids.
    ///
    /// # Errors
    /// `ConfigError` when `capacity` is zero.
    pub fn bounded(capacity: usize, ids: &IdGenerator) -> Result<Self> {
        if capacity == 0 {
            return Err(ClickhouseError::ConfigError(
                "session pool size must be at least 1".to_string(),
            ));
        }
        let available: VecDeque<String> = (0..capacity).map(|_| ids.next_id()).collect();
        Ok(Self {
            inner: Arc::new(PoolInner::Bounded {
                capacity,
                available: Mutex::new(available),
                permits: Semaphore::new(capacity),
            }),
        })
    }

    /// Pool that never reuses ids.
    #[must_use]
    pub fn stateless(ids: Arc<IdGenerator>) -> Self {
        Self {
            inner: Arc::new(PoolInner::Stateless { ids }),
        }
    }

    /// Build from an optional capacity: `None` selects stateless mode.
    ///
    /// # Errors
    /// `ConfigError` when the capacity is zero.
    pub fn with_capacity(capacity: Option<usize>, ids: Arc<IdGenerator>) -> Result<Self> {
        match capacity {
            Some(capacity) => Self::bounded(capacity, &ids),
            None => Ok(Self::stateless(ids)),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        match &*self.inner {
            PoolInner::Stateless { .. } => None,
            PoolInner::Bounded { capacity, .. } => Some(*capacity),
        }
    }

    /// Check out a session id, waiting while every id is in use.
    ///
    /// The returned lease gives the id back when dropped, so an early return
    /// or a failed request cannot leak it.
    ///
    /// # Errors
    /// `NotOpen` if the pool was closed while waiting.
    pub async fn acquire(&self) -> Result<SessionLease> {
        let id = match &*self.inner {
            PoolInner::Stateless { ids } => ids.next_id(),
            PoolInner::Bounded {
                available, permits, ..
            } => {
                let permit = permits
                    .acquire()
                    .await
                    .map_err(|_| ClickhouseError::NotOpen)?;
                permit.forget();
                let id = lock(available).pop_front();
                match id {
                    Some(id) => id,
                    None => {
                        // Permits never exceed queued ids; restore the permit we took.
                        permits.add_permits(1);
                        return Err(ClickhouseError::ConnectionError(
                            "session pool is empty despite an available permit".to_string(),
                        ));
                    }
                }
            }
        };
        trace!(session_id = %id, "session acquired");
        Ok(SessionLease {
            id: Some(id),
            pool: self.clone(),
        })
    }

    /// Return `id` to the pool. A no-op in stateless mode.
    pub fn release(&self, id: String) {
        match &*self.inner {
            PoolInner::Stateless { .. } => {}
            PoolInner::Bounded {
                capacity,
                available,
                permits,
            } => {
                {
                    let mut available = lock(available);
                    if available.len() >= *capacity {
                        warn!(session_id = %id, "dropping session id returned to a full pool");
                        return;
                    }
                    available.push_back(id);
                }
                permits.add_permits(1);
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> SessionPoolStatus {
        match &*self.inner {
            PoolInner::Stateless { .. } => SessionPoolStatus {
                capacity: None,
                available: 0,
                checked_out: 0,
            },
            PoolInner::Bounded {
                capacity,
                available,
                ..
            } => {
                let available = lock(available).len();
                SessionPoolStatus {
                    capacity: Some(*capacity),
                    available,
                    checked_out: capacity.saturating_sub(available),
                }
            }
        }
    }

    /// Wake every waiter with `NotOpen`; outstanding leases may still be
    /// returned but no new ones are handed out.
    pub fn close(&self) {
        if let PoolInner::Bounded { permits, .. } = &*self.inner {
            permits.close();
        }
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("status", &self.status())
            .finish()
    }
}

fn lock(available: &Mutex<VecDeque<String>>) -> MutexGuard<'_, VecDeque<String>> {
    available
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A checked-out session id. Returned to its pool on drop.
pub struct SessionLease {
    id: Option<String>,
    pool: SessionPool,
}

impl SessionLease {
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Detach the id from the lease; the caller becomes responsible for
    /// handing it back via [`SessionPool::release`].
    #[must_use]
    pub fn into_id(mut self) -> String {
        self.id.take().unwrap_or_default()
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionLease").field(&self.id()).finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            trace!(session_id = %id, "session released");
            self.pool.release(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn ids() -> Arc<IdGenerator> {
        Arc::new(IdGenerator::new())
    }

    #[tokio::test]
    async fn concurrent_leases_are_distinct() {
        let pool = SessionPool::bounded(4, &ids()).unwrap();
        let mut leases = Vec::new();
        for _ in 0..4 {
            leases.push(pool.acquire().await.unwrap());
        }
        let distinct: HashSet<&str> = leases.iter().map(SessionLease::id).collect();
        assert_eq!(distinct.len(), 4);
        assert_eq!(pool.status().available, 0);
        assert_eq!(pool.status().checked_out, 4);
    }

    #[tokio::test]
    async fn acquire_waits_for_release_when_exhausted() {
        let pool = SessionPool::bounded(1, &ids()).unwrap();
        let first = pool.acquire().await.unwrap();
        let first_id = first.id().to_string();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(SessionLease::into_id) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second_id = waiter.await.unwrap().unwrap();
        assert_eq!(second_id, first_id);
    }

    #[tokio::test]
    async fn ids_are_reused_oldest_idle_first() {
        let pool = SessionPool::bounded(3, &ids()).unwrap();
        let a = pool.acquire().await.unwrap().into_id();
        let b = pool.acquire().await.unwrap().into_id();
        let c = pool.acquire().await.unwrap().into_id();
        pool.release(b.clone());
        pool.release(a.clone());
        pool.release(c.clone());
        assert_eq!(pool.acquire().await.unwrap().into_id(), b);
        assert_eq!(pool.acquire().await.unwrap().into_id(), a);
        assert_eq!(pool.acquire().await.unwrap().into_id(), c);
    }

    #[tokio::test]
    async fn release_after_acquire_restores_size() {
        let pool = SessionPool::bounded(8, &ids()).unwrap();
        let before = pool.status();
        let lease = pool.acquire().await.unwrap();
        assert_eq!(pool.status().available, before.available - 1);
        drop(lease);
        assert_eq!(pool.status(), before);
    }

    #[tokio::test]
    async fn release_never_overfills() {
        let pool = SessionPool::bounded(2, &ids()).unwrap();
        pool.release("stranger".to_string());
        assert_eq!(pool.status().available, 2);
    }

    #[tokio::test]
    async fn stateless_mode_mints_fresh_ids() {
        let pool = SessionPool::with_capacity(None, ids()).unwrap();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.capacity(), None);
        drop(a);
        drop(b);
        assert_eq!(pool.status().available, 0);
    }

    #[tokio::test]
    async fn close_wakes_waiters_with_not_open() {
        let pool = SessionPool::bounded(1, &ids()).unwrap();
        let _held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.close();
        let res = waiter.await.unwrap();
        assert!(matches!(res, Err(ClickhouseError::NotOpen)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = SessionPool::bounded(0, &IdGenerator::new()).unwrap_err();
        assert!(matches!(err, ClickhouseError::ConfigError(_)));
    }
}
