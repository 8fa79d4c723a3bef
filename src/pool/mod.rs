//! Per-origin blocking HTTP connection pool.
//!
//! Mirrors a Meyer's-singleton-style registry keyed by origin: each origin gets
//! its own mutex/condvar-guarded pool state. This subsystem is intentionally
//! `std::sync`-based rather than tokio-async, since it presents a synchronous
//! borrow/return surface to the worker threads in [`crate::transport`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_pool_size: usize,
    pub borrow_timeout: Duration,
    pub max_idle_time: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_pool_size: 8,
            borrow_timeout: Duration::from_millis(100),
            max_idle_time: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(20),
        }
    }
}

struct IdleEntry {
    client: Client,
    last_used: Instant,
}

struct PoolState {
    config: PoolConfig,
    idle: VecDeque<IdleEntry>,
    total_outstanding: usize,
}

/// A borrowed connection handle. Must be returned via [`ConnectionPoolRegistry::return_connection`]
/// or destroyed via [`ConnectionPoolRegistry::discard`] — dropping it without either leaks the
/// outstanding-count accounting in the same way the original implementation requires an explicit
/// return/discard call.
pub struct PooledConnection {
    pub client: Client,
}

/// Registry of per-origin pool states, each guarded by its own mutex/condvar pair.
#[derive(Default)]
pub struct ConnectionPoolRegistry {
    origins: Mutex<HashMap<String, Arc<(Mutex<PoolState>, Condvar)>>>,
}

impl ConnectionPoolRegistry {
    pub fn new() -> Self {
        ConnectionPoolRegistry::default()
    }

    /// Creates or updates the configuration for `origin`. Existing idle
    /// connections are kept; only future borrows observe the new config.
    pub fn set_config(&self, origin: &str, config: PoolConfig) {
        let mut origins = self.origins.lock().unwrap();
        let entry = origins
            .entry(origin.to_string())
            .or_insert_with(|| {
                Arc::new((
                    Mutex::new(PoolState {
                        config,
                        idle: VecDeque::new(),
                        total_outstanding: 0,
                    }),
                    Condvar::new(),
                ))
            });
        entry.0.lock().unwrap().config = config;
    }

    fn state_for(&self, origin: &str) -> Arc<(Mutex<PoolState>, Condvar)> {
        let mut origins = self.origins.lock().unwrap();
        origins
            .entry(origin.to_string())
            .or_insert_with(|| {
                Arc::new((
                    Mutex::new(PoolState {
                        config: PoolConfig::default(),
                        idle: VecDeque::new(),
                        total_outstanding: 0,
                    }),
                    Condvar::new(),
                ))
            })
            .clone()
    }

    /// Borrows a connection for `origin`, waiting up to the configured
    /// `borrow_timeout` before giving up.
    pub fn borrow(&self, origin: &str) -> Option<PooledConnection> {
        let state = self.state_for(origin);
        let (mutex, condvar) = &*state;
        let mut guard = mutex.lock().unwrap();
        let deadline = Instant::now() + guard.config.borrow_timeout;

        loop {
            prune_idle(&mut guard);

            if let Some(entry) = guard.idle.pop_front() {
                return Some(PooledConnection { client: entry.client });
            }

            if guard.total_outstanding < guard.config.max_pool_size {
                guard.total_outstanding += 1;
                let config = guard.config;
                drop(guard);
                let client = build_client(&config);
                return Some(PooledConnection { client });
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (g, timeout_result) = condvar.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
            if timeout_result.timed_out() {
                prune_idle(&mut guard);
                if guard.idle.is_empty() && guard.total_outstanding >= guard.config.max_pool_size {
                    return None;
                }
            }
        }
    }

    /// Returns a healthy connection to the pool.
    pub fn return_connection(&self, origin: &str, connection: PooledConnection) {
        let state = self.state_for(origin);
        let (mutex, condvar) = &*state;
        let mut guard = mutex.lock().unwrap();
        guard.idle.push_back(IdleEntry {
            client: connection.client,
            last_used: Instant::now(),
        });
        condvar.notify_one();
    }

    /// Destroys an unhealthy connection and frees its slot.
    pub fn discard(&self, origin: &str, connection: PooledConnection) {
        drop(connection);
        let state = self.state_for(origin);
        let (mutex, condvar) = &*state;
        let mut guard = mutex.lock().unwrap();
        guard.total_outstanding = guard.total_outstanding.saturating_sub(1);
        condvar.notify_one();
    }
}

fn prune_idle(state: &mut PoolState) {
    let max_idle = state.config.max_idle_time;
    let now = Instant::now();
    while let Some(front) = state.idle.front() {
        if now.duration_since(front.last_used) > max_idle {
            state.idle.pop_front();
            state.total_outstanding = state.total_outstanding.saturating_sub(1);
        } else {
            break;
        }
    }
}

fn build_client(config: &PoolConfig) -> Client {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout.max(config.write_timeout))
        .build()
        .expect("reqwest client construction with validated timeouts cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_creates_up_to_max_pool_size() {
        let registry = ConnectionPoolRegistry::new();
        registry.set_config(
            "http://origin-a",
            PoolConfig {
                max_pool_size: 1,
                borrow_timeout: Duration::from_millis(30),
                ..Default::default()
            },
        );
        let first = registry.borrow("http://origin-a");
        assert!(first.is_some());
        let second = registry.borrow("http://origin-a");
        assert!(second.is_none(), "pool is exhausted, borrow should time out");
    }

    #[test]
    fn return_then_borrow_reuses_slot() {
        let registry = ConnectionPoolRegistry::new();
        registry.set_config(
            "http://origin-b",
            PoolConfig {
                max_pool_size: 1,
                borrow_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let conn = registry.borrow("http://origin-b").unwrap();
        registry.return_connection("http://origin-b", conn);
        assert!(registry.borrow("http://origin-b").is_some());
    }

    #[test]
    fn discard_frees_outstanding_slot() {
        let registry = ConnectionPoolRegistry::new();
        registry.set_config(
            "http://origin-c",
            PoolConfig {
                max_pool_size: 1,
                borrow_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let conn = registry.borrow("http://origin-c").unwrap();
        registry.discard("http://origin-c", conn);
        assert!(registry.borrow("http://origin-c").is_some());
    }

    #[test]
    fn borrow_waits_near_the_deadline_before_giving_up() {
        let registry = ConnectionPoolRegistry::new();
        registry.set_config(
            "http://origin-d",
            PoolConfig {
                max_pool_size: 1,
                borrow_timeout: Duration::from_millis(30),
                ..Default::default()
            },
        );
        let _held = registry.borrow("http://origin-d").unwrap();
        let start = Instant::now();
        assert!(registry.borrow("http://origin-d").is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
