//! Address allocation: deterministic IP selection over a pool,
//! honoring static reservations and existing dynamic leases.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{DhcpError, Result};
use crate::lease_store::{self, LeaseStore};

/// The dynamic address pool: a CIDR plus an exclusion set.
#[derive(Debug, Clone)]
pub struct Pool {
    pub cidr: Ipv4Net,
    pub excluded: HashSet<Ipv4Addr>,
}

impl Pool {
    pub fn new(cidr: Ipv4Net, excluded: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        Self { cidr, excluded: excluded.into_iter().collect() }
    }

    fn host_range_ascending(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.cidr.hosts()
    }
}

/// Look up (without committing) the IP that would be offered/bound to
/// `mac`, following the required precedence: static reservation, then
/// existing lease, then first free address in the pool.
pub fn allocate(store: &LeaseStore, pool: &Pool, mac: &str) -> Result<Ipv4Addr> {
    store.with_locked_conn(|conn| allocate_locked(conn, pool, mac))
}

/// Same precedence as `allocate`, but also commits a lease on success.
/// This is the atomic "allocate-plus-upsert" critical section required
/// for REQUEST, run under the lease store's single mutex.
pub fn allocate_and_commit(
    store: &LeaseStore,
    pool: &Pool,
    mac: &str,
    hostname: Option<&str>,
    lease_seconds: u32,
) -> Result<Ipv4Addr> {
    store.with_locked_conn(|conn| {
        let ip = allocate_locked(conn, pool, mac)?;
        lease_store::upsert_lease_locked(conn, mac, ip, hostname, lease_seconds)?;
        Ok(ip)
    })
}

fn allocate_locked(conn: &rusqlite::Connection, pool: &Pool, mac: &str) -> Result<Ipv4Addr> {
    // 1. Static reservation takes absolute precedence.
    if let Some(reservation) = lease_store::get_static_locked(conn, mac)? {
        return Ok(reservation.ip);
    }

    // 2. Renewal path: same client, same IP.
    if let Some(lease) = lease_store::get_lease_locked(conn, mac)? {
        return Ok(lease.ip);
    }

    // 3. Sweep, then scan the pool in ascending numeric order.
    lease_store::sweep_expired_locked(conn)?;
    let active: HashSet<Ipv4Addr> =
        lease_store::all_active_leases_locked(conn)?.into_iter().map(|l| l.ip).collect();

    for candidate in pool.host_range_ascending() {
        if !pool.excluded.contains(&candidate) && !active.contains(&candidate) {
            return Ok(candidate);
        }
    }

    Err(DhcpError::PoolExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease_store::Reservation;
    use std::str::FromStr;
    use std::sync::Arc;

    fn pool(cidr: &str, excluded: &[&str]) -> Pool {
        Pool::new(
            Ipv4Net::from_str(cidr).unwrap(),
            excluded.iter().map(|s| s.parse().unwrap()),
        )
    }

    #[test]
    fn fresh_client_gets_first_free_address() {
        let store = LeaseStore::open_in_memory().unwrap();
        let pool = pool("192.168.1.0/24", &["192.168.1.0", "192.168.1.1", "192.168.1.255"]);
        let ip = allocate(&store, &pool, "aa:bb:cc:dd:ee:01").unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 2));
    }

    #[test]
    fn renewal_returns_same_ip_and_advances_lease_end() {
        let store = LeaseStore::open_in_memory().unwrap();
        let pool = pool("192.168.1.0/24", &["192.168.1.0", "192.168.1.1", "192.168.1.255"]);
        let first = allocate_and_commit(&store, &pool, "aa:bb:cc:dd:ee:01", None, 3600).unwrap();
        let lease1 = store.get_lease("aa:bb:cc:dd:ee:01").unwrap().unwrap();
        let second = allocate_and_commit(&store, &pool, "aa:bb:cc:dd:ee:01", None, 3600).unwrap();
        let lease2 = store.get_lease("aa:bb:cc:dd:ee:01").unwrap().unwrap();
        assert_eq!(first, second);
        assert!(lease2.lease_end >= lease1.lease_end);
    }

    #[test]
    fn static_reservation_overrides_prior_dynamic_history() {
        let store = LeaseStore::open_in_memory().unwrap();
        let pool = pool("192.168.1.0/24", &["192.168.1.0", "192.168.1.1", "192.168.1.255"]);
        allocate_and_commit(&store, &pool, "aa:bb:cc:dd:ee:ff", None, 3600).unwrap();

        store
            .insert_static(&Reservation {
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
                ip: Ipv4Addr::new(192, 168, 1, 50),
                hostname: None,
                description: None,
            })
            .unwrap();

        let ip = allocate(&store, &pool, "aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 50));
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let store = LeaseStore::open_in_memory().unwrap();
        let pool = pool("192.168.1.0/30", &["192.168.1.0", "192.168.1.3"]);
        allocate_and_commit(&store, &pool, "aa:bb:cc:dd:ee:01", None, 3600).unwrap();
        allocate_and_commit(&store, &pool, "aa:bb:cc:dd:ee:02", None, 3600).unwrap();
        let err = allocate_and_commit(&store, &pool, "aa:bb:cc:dd:ee:03", None, 3600).unwrap_err();
        assert!(matches!(err, DhcpError::PoolExhausted));
    }

    /// Concurrent REQUESTs from distinct clients must never double-allocate
    /// the same address. `with_locked_conn` is what has to make this true:
    /// every task's allocate-then-upsert sequence runs under one mutex.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_from_distinct_macs_never_collide() {
        const N: u32 = 32;
        let store = LeaseStore::open_in_memory().unwrap();
        let pool = Arc::new(pool("192.168.1.0/24", &["192.168.1.0", "192.168.1.255"]));

        let mut handles = Vec::with_capacity(N as usize);
        for i in 0..N {
            let store = store.clone();
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mac = format!("aa:bb:cc:dd:ee:{i:02x}");
                allocate_and_commit(&store, &pool, &mac, None, 3600).unwrap()
            }));
        }

        let mut ips = HashSet::new();
        for h in handles {
            ips.insert(h.await.unwrap());
        }

        assert_eq!(ips.len(), N as usize, "every client must get a distinct address");
    }
}
