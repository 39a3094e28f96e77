//! Loader for the operator-maintained static reservations file.
//!
//! One reservation per line: `mac,ip[,hostname]`. Blank lines and
//! lines starting with `#` are ignored. The allocator never writes to
//! the static_reservations table itself; this loader is how an
//! operator's file becomes rows in it at startup.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use mac_address::MacAddress;
use tracing::warn;

use crate::error::{DhcpError, Result};
use crate::lease_store::{LeaseStore, Reservation};
use crate::packet::mac_to_string;

pub fn load_into(store: &LeaseStore, path: &str) -> Result<usize> {
    let path = Path::new(path);
    if !path.exists() {
        return Ok(0);
    }

    let file = File::open(path).map_err(|e| DhcpError::Config(e.to_string()))?;
    let reader = BufReader::new(file);
    let mut count = 0;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| DhcpError::Config(e.to_string()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 2 {
            warn!(line = lineno + 1, "skipping malformed static reservation line");
            continue;
        }

        let mac = match MacAddress::from_str(parts[0]) {
            Ok(m) => mac_to_string(&m.bytes()),
            Err(_) => {
                warn!(line = lineno + 1, mac = parts[0], "skipping unparseable MAC");
                continue;
            }
        };
        let ip = match parts[1].parse() {
            Ok(ip) => ip,
            Err(_) => {
                warn!(line = lineno + 1, ip = parts[1], "skipping unparseable IP");
                continue;
            }
        };
        let hostname = parts.get(2).filter(|h| !h.is_empty()).map(|h| h.to_string());

        store.insert_static(&Reservation { mac, ip, hostname, description: None })?;
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_well_formed_lines_and_skips_bad_ones() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "# comment").unwrap();
        writeln!(tmp, "aa:bb:cc:dd:ee:ff, 192.168.1.50, printer").unwrap();
        writeln!(tmp, "garbage-line").unwrap();
        writeln!(tmp, "").unwrap();
        tmp.flush().unwrap();

        let store = LeaseStore::open_in_memory().unwrap();
        let n = load_into(&store, tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(n, 1);

        let r = store.get_static("aa:bb:cc:dd:ee:ff").unwrap().unwrap();
        assert_eq!(r.ip, "192.168.1.50".parse::<std::net::Ipv4Addr>().unwrap());
        assert_eq!(r.hostname.as_deref(), Some("printer"));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let store = LeaseStore::open_in_memory().unwrap();
        let n = load_into(&store, "/nonexistent/path/leases.csv").unwrap();
        assert_eq!(n, 0);
    }
}
