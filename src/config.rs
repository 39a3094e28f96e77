//! Static configuration surface.

use std::fs::File;
use std::io::BufReader;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::error::{DhcpError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigFile {
    pub interface: Option<String>,
    pub listen_addr: Ipv4Addr,
    pub pool_cidr: String,
    #[serde(default)]
    pub excluded_ips: Vec<Ipv4Addr>,
    pub lease_time: String,
    #[serde(default)]
    pub static_reservations_file: Option<String>,
    #[serde(default = "default_lease_db_path")]
    pub lease_db_path: String,
    pub option_router: Ipv4Addr,
    #[serde(default)]
    pub option_dns: Vec<Ipv4Addr>,
    #[serde(default)]
    pub option_ntp: Vec<Ipv4Addr>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

fn default_lease_db_path() -> String {
    "/var/lib/rdhcpd/leases.db".to_string()
}

fn default_sweep_interval() -> String {
    "60s".to_string()
}

/// Validated, ready-to-use configuration. Invalid config is fatal at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub interface: Option<String>,
    pub listen_addr: Ipv4Addr,
    pub pool_cidr: Ipv4Net,
    pub excluded_ips: Vec<Ipv4Addr>,
    pub lease_seconds: u32,
    pub static_reservations_file: Option<String>,
    pub lease_db_path: String,
    pub option_router: Ipv4Addr,
    pub option_dns: Vec<Ipv4Addr>,
    pub option_ntp: Vec<Ipv4Addr>,
    pub sweep_interval_secs: u64,
}

pub fn read_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| DhcpError::Config(format!("cannot open {}: {e}", path.display())))?;
    let reader = BufReader::new(file);
    let raw: ConfigFile = serde_yaml::from_reader(reader)
        .map_err(|e| DhcpError::Config(format!("cannot parse {}: {e}", path.display())))?;
    validate(raw)
}

fn validate(raw: ConfigFile) -> Result<ServerConfig> {
    let pool_cidr = Ipv4Net::from_str(&raw.pool_cidr)
        .map_err(|e| DhcpError::Config(format!("invalid pool_cidr {}: {e}", raw.pool_cidr)))?;

    let lease_duration = duration_str::parse(&raw.lease_time)
        .map_err(|e| DhcpError::Config(format!("invalid lease_time {}: {e}", raw.lease_time)))?;
    let sweep_duration = duration_str::parse(&raw.sweep_interval)
        .map_err(|e| DhcpError::Config(format!("invalid sweep_interval {}: {e}", raw.sweep_interval)))?;

    // Sweeper rate is an operator choice but never tighter than 30s.
    let sweep_interval_secs = sweep_duration.as_secs().max(30);

    Ok(ServerConfig {
        interface: raw.interface,
        listen_addr: raw.listen_addr,
        pool_cidr,
        excluded_ips: raw.excluded_ips,
        lease_seconds: lease_duration.as_secs() as u32,
        static_reservations_file: raw.static_reservations_file,
        lease_db_path: raw.lease_db_path,
        option_router: raw.option_router,
        option_dns: raw.option_dns,
        option_ntp: raw.option_ntp,
        sweep_interval_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_a_minimal_config() {
        let raw = ConfigFile {
            interface: None,
            listen_addr: "192.168.1.1".parse().unwrap(),
            pool_cidr: "192.168.1.0/24".to_string(),
            excluded_ips: vec!["192.168.1.1".parse().unwrap()],
            lease_time: "1h".to_string(),
            static_reservations_file: None,
            lease_db_path: default_lease_db_path(),
            option_router: "192.168.1.1".parse().unwrap(),
            option_dns: vec![],
            option_ntp: vec![],
            sweep_interval: default_sweep_interval(),
        };
        let cfg = validate(raw).unwrap();
        assert_eq!(cfg.lease_seconds, 3600);
        assert_eq!(cfg.sweep_interval_secs, 60);
    }

    #[test]
    fn rejects_bad_cidr() {
        let raw = ConfigFile {
            interface: None,
            listen_addr: "192.168.1.1".parse().unwrap(),
            pool_cidr: "not-a-cidr".to_string(),
            excluded_ips: vec![],
            lease_time: "1h".to_string(),
            static_reservations_file: None,
            lease_db_path: default_lease_db_path(),
            option_router: "192.168.1.1".parse().unwrap(),
            option_dns: vec![],
            option_ntp: vec![],
            sweep_interval: default_sweep_interval(),
        };
        assert!(validate(raw).is_err());
    }

    #[test]
    fn floors_sweep_interval_at_30s() {
        let raw = ConfigFile {
            interface: None,
            listen_addr: "192.168.1.1".parse().unwrap(),
            pool_cidr: "192.168.1.0/24".to_string(),
            excluded_ips: vec![],
            lease_time: "1h".to_string(),
            static_reservations_file: None,
            lease_db_path: default_lease_db_path(),
            option_router: "192.168.1.1".parse().unwrap(),
            option_dns: vec![],
            option_ntp: vec![],
            sweep_interval: "5s".to_string(),
        };
        let cfg = validate(raw).unwrap();
        assert_eq!(cfg.sweep_interval_secs, 30);
    }
}
