//! BOOTP-framed DHCPv4 message codec (RFC 2131 §2).
//!
//! Pure parse/serialize: no I/O, no lease-table access.

use std::net::Ipv4Addr;

use crate::error::DhcpError;
use crate::options::{self, DhcpOption, OPT_CLIENT_ID, OPT_HOSTNAME, OPT_MSG_TYPE, OPT_REQUESTED_IP, OPT_SERVER_ID};

pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
const FIXED_HEADER_LEN: usize = 240;

#[derive(Debug, Clone)]
pub struct DhcpMessage {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<DhcpOption>,
}

impl DhcpMessage {
    /// Parse an inbound datagram.
    pub fn parse(data: &[u8]) -> Result<Self, DhcpError> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(DhcpError::MalformedPacket(format!(
                "packet too short: {} bytes (minimum {FIXED_HEADER_LEN})",
                data.len()
            )));
        }

        if data[236..240] != MAGIC_COOKIE {
            return Err(DhcpError::MalformedPacket("bad magic cookie".into()));
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        let options = options::parse_options(&data[FIXED_HEADER_LEN..])
            .map_err(|e| DhcpError::MalformedPacket(e.to_string()))?;

        let msg = DhcpMessage {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            options,
        };

        // A message with no type tag can't be dispatched; reject it here.
        if msg.message_type().is_none() {
            return Err(DhcpError::MalformedPacket("missing option 53 (message type)".into()));
        }

        Ok(msg)
    }

    /// Build an outbound BOOTREPLY with the given message type and options.
    #[allow(clippy::too_many_arguments)]
    pub fn build_reply(
        message_type: u8,
        xid: u32,
        your_ip: Ipv4Addr,
        client_mac: &[u8; 6],
        server_ip: Ipv4Addr,
        extra_options: Vec<DhcpOption>,
    ) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(client_mac);

        let mut opts = Vec::with_capacity(extra_options.len() + 2);
        opts.push(DhcpOption::msg_type(message_type));
        opts.push(DhcpOption::server_id(server_ip));
        opts.extend(extra_options);

        DhcpMessage {
            op: 2, // BOOTREPLY
            htype: 1,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: your_ip,
            siaddr: server_ip,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: opts,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(300);
        buf.push(self.op);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr);
        buf.extend_from_slice(&self.sname);
        buf.extend_from_slice(&self.file);
        buf.extend_from_slice(&MAGIC_COOKIE);
        buf.extend_from_slice(&options::encode_options(&self.options));
        buf
    }

    pub fn get_option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|o| o.code == code)
    }

    pub fn message_type(&self) -> Option<u8> {
        self.get_option(OPT_MSG_TYPE)?.as_u8()
    }

    pub fn client_mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        mac
    }

    pub fn mac_string(&self) -> String {
        mac_to_string(&self.client_mac())
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_REQUESTED_IP)?.as_ipv4()
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_SERVER_ID)?.as_ipv4()
    }

    pub fn hostname(&self) -> Option<String> {
        self.get_option(OPT_HOSTNAME).map(|o| o.as_str_lossy())
    }

    pub fn client_identifier(&self) -> Option<&[u8]> {
        self.get_option(OPT_CLIENT_ID).map(|o| o.data.as_slice())
    }
}

/// Canonical string form: six lowercase hex octets joined by colons.
pub fn mac_to_string(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DHCPDISCOVER;

    fn discover_bytes(xid: u32, mac: [u8; 6]) -> Vec<u8> {
        let mut pkt = vec![0u8; 240];
        pkt[0] = 1; // BOOTREQUEST
        pkt[1] = 1;
        pkt[2] = 6;
        pkt[4..8].copy_from_slice(&xid.to_be_bytes());
        pkt[28..34].copy_from_slice(&mac);
        pkt[236..240].copy_from_slice(&MAGIC_COOKIE);
        pkt.extend_from_slice(&[options::OPT_MSG_TYPE, 1, DHCPDISCOVER, options::OPT_END]);
        pkt
    }

    #[test]
    fn parses_a_discover() {
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
        let data = discover_bytes(0x1234_5678, mac);
        let msg = DhcpMessage::parse(&data).unwrap();
        assert_eq!(msg.xid, 0x1234_5678);
        assert_eq!(msg.mac_string(), "aa:bb:cc:dd:ee:01");
        assert_eq!(msg.message_type(), Some(DHCPDISCOVER));
    }

    #[test]
    fn rejects_short_buffers() {
        let data = vec![0u8; 100];
        let err = DhcpMessage::parse(&data).unwrap_err();
        assert!(matches!(err, DhcpError::MalformedPacket(_)));
    }

    #[test]
    fn rejects_bad_magic_cookie() {
        let mut data = discover_bytes(1, [0; 6]);
        data[236] = 0;
        assert!(DhcpMessage::parse(&data).is_err());
    }

    #[test]
    fn rejects_missing_message_type() {
        let mut pkt = vec![0u8; 240];
        pkt[236..240].copy_from_slice(&MAGIC_COOKIE);
        pkt.push(options::OPT_END);
        assert!(DhcpMessage::parse(&pkt).is_err());
    }

    #[test]
    fn round_trip_preserves_recognized_fields() {
        let mac = [1, 2, 3, 4, 5, 6];
        let data = discover_bytes(42, mac);
        let msg = DhcpMessage::parse(&data).unwrap();
        let bytes = msg.to_bytes();
        let msg2 = DhcpMessage::parse(&bytes).unwrap();
        assert_eq!(msg.xid, msg2.xid);
        assert_eq!(msg.client_mac(), msg2.client_mac());
        assert_eq!(msg.message_type(), msg2.message_type());
        assert_eq!(msg.ciaddr, msg2.ciaddr);
        assert_eq!(msg.yiaddr, msg2.yiaddr);
    }

    #[test]
    fn build_reply_has_expected_shape() {
        let reply = DhcpMessage::build_reply(
            options::DHCPOFFER,
            7,
            Ipv4Addr::new(192, 168, 1, 2),
            &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01],
            Ipv4Addr::new(192, 168, 1, 1),
            vec![DhcpOption::lease_time(3600)],
        );
        assert_eq!(reply.op, 2);
        assert_eq!(reply.yiaddr, Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(reply.message_type(), Some(options::DHCPOFFER));
        assert_eq!(reply.server_identifier(), Some(Ipv4Addr::new(192, 168, 1, 1)));
    }
}
