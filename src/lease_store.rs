//! Durable, concurrency-safe lease + static reservation table.
//!
//! Backed by an embedded SQLite database so the on-disk schema is the one
//! an external dashboard observes directly. A single mutex around the
//! connection gives every operation, and critically the
//! allocate-then-commit sequence driven from `allocator`, serializable
//! semantics: no two concurrent REQUESTs can observe the same
//! "first available IP" snapshot and both commit it.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub mac: String,
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub lease_start: f64,
    pub lease_end: f64,
    pub last_seen: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub mac: String,
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct LeaseStore {
    conn: Arc<Mutex<Connection>>,
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

impl LeaseStore {
    /// Open (or create) the lease database at `path` and ensure both
    /// tables exist.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS leases (
                mac_address TEXT PRIMARY KEY,
                ip_address  TEXT NOT NULL,
                hostname    TEXT NULL,
                lease_start REAL NOT NULL,
                lease_end   REAL NOT NULL,
                last_seen   REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS static_reservations (
                mac_address TEXT PRIMARY KEY,
                ip_address  TEXT NOT NULL,
                hostname    TEXT NULL,
                description TEXT NULL
            );",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("lease store mutex poisoned")
    }

    pub fn get_lease(&self, mac: &str) -> Result<Option<Lease>> {
        let conn = self.lock();
        get_lease_locked(&conn, mac)
    }

    pub fn get_static(&self, mac: &str) -> Result<Option<Reservation>> {
        let conn = self.lock();
        get_static_locked(&conn, mac)
    }

    pub fn upsert_lease(
        &self,
        mac: &str,
        ip: Ipv4Addr,
        hostname: Option<&str>,
        lease_seconds: u32,
    ) -> Result<Lease> {
        let conn = self.lock();
        upsert_lease_locked(&conn, mac, ip, hostname, lease_seconds)
    }

    pub fn all_active_leases(&self) -> Result<Vec<Lease>> {
        let conn = self.lock();
        all_active_leases_locked(&conn)
    }

    pub fn delete_lease(&self, mac: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM leases WHERE mac_address = ?1", params![mac])?;
        Ok(())
    }

    /// Delete all records with lease_end <= now. Returns the number removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        let conn = self.lock();
        sweep_expired_locked(&conn)
    }

    pub fn insert_static(&self, r: &Reservation) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO static_reservations (mac_address, ip_address, hostname, description)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(mac_address) DO UPDATE SET
                ip_address = excluded.ip_address,
                hostname = excluded.hostname,
                description = excluded.description",
            params![r.mac, r.ip.to_string(), r.hostname, r.description],
        )?;
        Ok(())
    }

    /// Run `f` with the raw connection held under the store's single
    /// mutex, so every statement `f` issues is part of one atomic
    /// section. Used by `allocator` to run the full
    /// {get_static, get_lease, sweep_expired, all_active_leases,
    /// upsert_lease} sequence for one REQUEST without interleaving.
    pub fn with_locked_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }
}

pub(crate) fn get_lease_locked(conn: &Connection, mac: &str) -> Result<Option<Lease>> {
    let now = now_secs();
    let row = conn
        .query_row(
            "SELECT mac_address, ip_address, hostname, lease_start, lease_end, last_seen
             FROM leases WHERE mac_address = ?1 AND lease_end > ?2",
            params![mac, now],
            row_to_lease,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn get_static_locked(conn: &Connection, mac: &str) -> Result<Option<Reservation>> {
    let row = conn
        .query_row(
            "SELECT mac_address, ip_address, hostname, description
             FROM static_reservations WHERE mac_address = ?1",
            params![mac],
            row_to_reservation,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn all_active_leases_locked(conn: &Connection) -> Result<Vec<Lease>> {
    let now = now_secs();
    let mut stmt = conn.prepare(
        "SELECT mac_address, ip_address, hostname, lease_start, lease_end, last_seen
         FROM leases WHERE lease_end > ?1",
    )?;
    let rows = stmt.query_map(params![now], row_to_lease)?;
    let mut leases = Vec::new();
    for row in rows {
        leases.push(row?);
    }
    Ok(leases)
}

pub(crate) fn sweep_expired_locked(conn: &Connection) -> Result<usize> {
    let now = now_secs();
    let n = conn.execute("DELETE FROM leases WHERE lease_end <= ?1", params![now])?;
    Ok(n)
}

pub(crate) fn upsert_lease_locked(
    conn: &Connection,
    mac: &str,
    ip: Ipv4Addr,
    hostname: Option<&str>,
    lease_seconds: u32,
) -> Result<Lease> {
    let now = now_secs();
    let lease_end = now + lease_seconds as f64;
    conn.execute(
        "INSERT INTO leases (mac_address, ip_address, hostname, lease_start, lease_end, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(mac_address) DO UPDATE SET
            ip_address = excluded.ip_address,
            hostname = excluded.hostname,
            lease_start = excluded.lease_start,
            lease_end = excluded.lease_end,
            last_seen = excluded.last_seen",
        params![mac, ip.to_string(), hostname, now, lease_end, now],
    )?;
    Ok(Lease {
        mac: mac.to_string(),
        ip,
        hostname: hostname.map(|s| s.to_string()),
        lease_start: now,
        lease_end,
        last_seen: now,
    })
}

fn row_to_lease(row: &rusqlite::Row) -> rusqlite::Result<Lease> {
    let ip_str: String = row.get(1)?;
    let ip = Ipv4Addr::from_str(&ip_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Lease {
        mac: row.get(0)?,
        ip,
        hostname: row.get(2)?,
        lease_start: row.get(3)?,
        lease_end: row.get(4)?,
        last_seen: row.get(5)?,
    })
}

fn row_to_reservation(row: &rusqlite::Row) -> rusqlite::Result<Reservation> {
    let ip_str: String = row.get(1)?;
    let ip = Ipv4Addr::from_str(&ip_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Reservation {
        mac: row.get(0)?,
        ip,
        hostname: row.get(2)?,
        description: row.get(3)?,
    })
}
