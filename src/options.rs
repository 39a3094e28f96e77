//! DHCP option tags and the tag-length-value codec (RFC 2132 subset).

use std::net::Ipv4Addr;

pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_NTP_SERVER: u8 = 42;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAM_REQUEST: u8 = 55;
pub const OPT_CLIENT_ID: u8 = 61;
pub const OPT_END: u8 = 255;

/// DHCP message types (option 53 values).
pub const DHCPDISCOVER: u8 = 1;
pub const DHCPOFFER: u8 = 2;
pub const DHCPREQUEST: u8 = 3;
pub const DHCPDECLINE: u8 = 4;
pub const DHCPACK: u8 = 5;
pub const DHCPNAK: u8 = 6;
pub const DHCPRELEASE: u8 = 7;
pub const DHCPINFORM: u8 = 8;

/// A single parsed DHCP option (tag-length-value, length implicit in `data.len()`).
#[derive(Debug, Clone)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpOption {
    pub fn new(code: u8, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    pub fn msg_type(t: u8) -> Self {
        Self::new(OPT_MSG_TYPE, vec![t])
    }

    pub fn server_id(ip: Ipv4Addr) -> Self {
        Self::new(OPT_SERVER_ID, ip.octets().to_vec())
    }

    pub fn lease_time(secs: u32) -> Self {
        Self::new(OPT_LEASE_TIME, secs.to_be_bytes().to_vec())
    }

    pub fn subnet_mask(mask: Ipv4Addr) -> Self {
        Self::new(OPT_SUBNET_MASK, mask.octets().to_vec())
    }

    pub fn router(ip: Ipv4Addr) -> Self {
        Self::new(OPT_ROUTER, ip.octets().to_vec())
    }

    pub fn dns_servers(ips: &[Ipv4Addr]) -> Self {
        let mut data = Vec::with_capacity(ips.len() * 4);
        for ip in ips {
            data.extend_from_slice(&ip.octets());
        }
        Self::new(OPT_DNS_SERVER, data)
    }

    pub fn ntp_servers(ips: &[Ipv4Addr]) -> Self {
        let mut data = Vec::with_capacity(ips.len() * 4);
        for ip in ips {
            data.extend_from_slice(&ip.octets());
        }
        Self::new(OPT_NTP_SERVER, data)
    }

    pub fn hostname(name: &str) -> Self {
        Self::new(OPT_HOSTNAME, name.as_bytes().to_vec())
    }

    pub fn requested_ip(ip: Ipv4Addr) -> Self {
        Self::new(OPT_REQUESTED_IP, ip.octets().to_vec())
    }

    /// First four bytes interpreted as an IPv4 address.
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        if self.data.len() == 4 {
            Some(Ipv4Addr::new(self.data[0], self.data[1], self.data[2], self.data[3]))
        } else {
            None
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        if self.data.len() == 4 {
            Some(u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]))
        } else {
            None
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Hostnames are display-only: never error, replace invalid bytes.
    pub fn as_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Parse the TLV options region following the magic cookie.
///
/// Tag 0 is padding and length-less. Tag 255 terminates parsing. Any
/// other tag is followed by a one-byte length and that many value
/// bytes; a length that would overrun `data` is reported to the caller
/// so it can be turned into `DhcpError::MalformedPacket`.
pub fn parse_options(data: &[u8]) -> Result<Vec<DhcpOption>, &'static str> {
    let mut options = Vec::new();
    let mut i = 0;
    let mut saw_end = false;

    while i < data.len() {
        let code = data[i];
        if code == OPT_END {
            saw_end = true;
            break;
        }
        if code == OPT_PAD {
            i += 1;
            continue;
        }

        i += 1;
        if i >= data.len() {
            return Err("option tag truncated before length byte");
        }

        let len = data[i] as usize;
        i += 1;

        if i + len > data.len() {
            return Err("option length overruns buffer");
        }

        options.push(DhcpOption::new(code, data[i..i + len].to_vec()));
        i += len;
    }

    if !saw_end {
        return Err("options region missing end tag (255)");
    }

    Ok(options)
}

/// Encode options in the order given, terminated by tag 255.
pub fn encode_options(options: &[DhcpOption]) -> Vec<u8> {
    let mut buf = Vec::new();
    for opt in options {
        buf.push(opt.code);
        buf.push(opt.data.len() as u8);
        buf.extend_from_slice(&opt.data);
    }
    buf.push(OPT_END);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_handful_of_options() {
        let opts = vec![
            DhcpOption::msg_type(DHCPOFFER),
            DhcpOption::server_id(Ipv4Addr::new(192, 168, 1, 1)),
            DhcpOption::lease_time(3600),
        ];
        let bytes = encode_options(&opts);
        let parsed = parse_options(&bytes).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].as_u8(), Some(DHCPOFFER));
        assert_eq!(parsed[1].as_ipv4(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(parsed[2].as_u32(), Some(3600));
    }

    #[test]
    fn missing_end_tag_is_rejected() {
        let bytes = [OPT_MSG_TYPE, 1, DHCPDISCOVER];
        assert!(parse_options(&bytes).is_err());
    }

    #[test]
    fn overrunning_length_is_rejected() {
        let bytes = [OPT_HOSTNAME, 10, b'h', b'i', OPT_END];
        assert!(parse_options(&bytes).is_err());
    }

    #[test]
    fn padding_is_skipped() {
        let bytes = [OPT_PAD, OPT_PAD, OPT_MSG_TYPE, 1, DHCPACK, OPT_END];
        let parsed = parse_options(&bytes).unwrap();
        assert_eq!(parsed.len(), 1);
    }
}
