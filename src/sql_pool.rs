//! Fixed-size pool of SQL connection handles.
//!
//! Availability is tracked with a counting semaphore sized to the pool;
//! handles themselves live in a lock-free queue. `get()` blocks on the
//! semaphore before touching the queue, so a waiter is guaranteed a
//! handle is present by the time it pops. `PooledConn` is a scope guard
//! in the same shape as a zero-mysql `PooledConn`: acquire on
//! construction, return to the pool on `Drop`, so every exit path —
//! including an early `?` return — releases the handle exactly once.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder};
use std_semaphore::Semaphore;

use crate::error::{CleanError, Result};

pub struct SqlPoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db: String,
    pub pool_size: usize,
}

pub struct SqlPool {
    conns: ArrayQueue<Conn>,
    sem: Semaphore,
}

impl SqlPool {
    /// Opens `pool_size` handles eagerly. A handle that fails to connect is
    /// logged and discarded; the pool may end up smaller than requested
    /// rather than failing startup outright.
    pub fn init(cfg: &SqlPoolConfig) -> Result<Arc<Self>> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(cfg.host.clone()))
            .tcp_port(cfg.port)
            .user(Some(cfg.user.clone()))
            .pass(Some(cfg.password.clone()))
            .db_name(Some(cfg.db.clone()))
            .into();

        let conns = ArrayQueue::new(cfg.pool_size.max(1));
        let mut opened = 0usize;
        for _ in 0..cfg.pool_size {
            match Conn::new(opts.clone()) {
                Ok(conn) => {
                    let _ = conns.push(conn);
                    opened += 1;
                }
                Err(e) => {
                    proxy_log::warn!("sql pool: failed to open connection: {e}");
                }
            }
        }
        proxy_log::info!("sql pool: opened {opened}/{} connections", cfg.pool_size);

        Ok(Arc::new(SqlPool {
            conns,
            sem: Semaphore::new(opened as isize),
        }))
    }

    /// Waits for an available handle, then hands out a scope guard that
    /// returns it to the pool on drop.
    pub fn get(self: &Arc<Self>) -> Result<PooledConn> {
        self.sem.acquire();
        let conn = self
            .conns
            .pop()
            .ok_or_else(|| CleanError::from("sql pool: semaphore permit without a queued connection"))?;
        Ok(PooledConn {
            pool: Arc::clone(self),
            conn: ManuallyDrop::new(conn),
        })
    }

    fn check_in(&self, conn: Conn) {
        if self.conns.push(conn).is_err() {
            proxy_log::warn!("sql pool: queue unexpectedly full on check-in, dropping connection");
            return;
        }
        self.sem.release();
    }

    /// Drains and closes every handle currently queued. Handles lent out
    /// at the moment of shutdown are closed individually as their
    /// `PooledConn` guards drop.
    pub fn close(&self) {
        while let Some(conn) = self.conns.pop() {
            drop(conn);
        }
    }
}

pub struct PooledConn {
    pool: Arc<SqlPool>,
    conn: ManuallyDrop<Conn>,
}

impl Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Conn {
        &self.conn
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Conn {
        &mut self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // SAFETY: `conn` is only taken once, here, and the struct is
        // dropped immediately after — no further access follows.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.check_in(conn);
    }
}

/// Looks up the stored password for `username` and compares it directly;
/// returns `Ok(true)` on a match. Used for login.
pub fn verify_login(conn: &mut PooledConn, username: &str, password: &str) -> Result<bool> {
    let stored: Option<String> = conn
        .exec_first("SELECT password FROM user WHERE username = ?", (username,))
        .map_err(CleanError::from)?;
    Ok(stored.as_deref() == Some(password))
}

/// Inserts `(username, password)` iff the username is not already taken.
/// Returns `Ok(true)` on success, `Ok(false)` on a uniqueness conflict.
pub fn register_user(conn: &mut PooledConn, username: &str, password: &str) -> Result<bool> {
    let exists: Option<String> = conn
        .exec_first("SELECT username FROM user WHERE username = ?", (username,))
        .map_err(CleanError::from)?;
    if exists.is_some() {
        return Ok(false);
    }
    conn.exec_drop(
        "INSERT INTO user(username, password) VALUES (?, ?)",
        (username, password),
    )
    .map_err(CleanError::from)?;
    Ok(true)
}
