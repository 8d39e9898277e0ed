//! PROXY protocol v1 framing.
//!
//! Forwarded connections to a listener that requires the PROXY protocol are
//! prefixed with a single human readable line:
//!
//! ```text
//! PROXY TCP4 <src ip> <dst ip> <src port> <dst port>\r\n
//! PROXY TCP6 <src ip> <dst ip> <src port> <dst port>\r\n
//! PROXY UNKNOWN\r\n
//! ```
//!
//! The host server uses [`read_header`] to strip the same line from inbound
//! connections.

use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Prefix every v1 header starts with.
pub const PROXY_V1_PREFIX: &[u8] = b"PROXY ";

/// Longest legal v1 line, CRLF included.
pub const MAX_V1_HEADER_LEN: usize = 107;

/// A parsed or to-be-sent PROXY v1 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyHeaderV1 {
    /// Addresses of the original connection
    Tcp {
        source: SocketAddr,
        destination: SocketAddr,
    },
    /// Address information is not available
    Unknown,
}

impl ProxyHeaderV1 {
    /// Header describing a connection from `source` to `destination`.
    ///
    /// Mixed address families cannot be expressed and yield `UNKNOWN`.
    pub fn new(source: SocketAddr, destination: SocketAddr) -> Self {
        if source.is_ipv4() == destination.is_ipv4() {
            ProxyHeaderV1::Tcp {
                source,
                destination,
            }
        } else {
            ProxyHeaderV1::Unknown
        }
    }

    /// Source address, if known
    pub fn source(&self) -> Option<SocketAddr> {
        match self {
            ProxyHeaderV1::Tcp { source, .. } => Some(*source),
            ProxyHeaderV1::Unknown => None,
        }
    }

    /// Render the header line, CRLF included
    pub fn encode(&self) -> String {
        match self {
            ProxyHeaderV1::Tcp {
                source,
                destination,
            } => {
                let family = if source.is_ipv4() { "TCP4" } else { "TCP6" };
                format!(
                    "PROXY {} {} {} {} {}\r\n",
                    family,
                    source.ip(),
                    destination.ip(),
                    source.port(),
                    destination.port()
                )
            }
            ProxyHeaderV1::Unknown => "PROXY UNKNOWN\r\n".to_string(),
        }
    }

    /// Parse a header line, with or without the trailing CRLF
    pub fn parse(line: &str) -> io::Result<Self> {
        let line = line.strip_suffix("\r\n").unwrap_or(line);
        let mut parts = line.split(' ');

        if parts.next() != Some("PROXY") {
            return Err(invalid("missing PROXY prefix"));
        }

        match parts.next() {
            Some("UNKNOWN") => Ok(ProxyHeaderV1::Unknown),
            Some(family @ ("TCP4" | "TCP6")) => {
                let fields: Vec<&str> = parts.collect();
                if fields.len() != 4 {
                    return Err(invalid("expected four address fields"));
                }

                let src_ip: IpAddr = fields[0].parse().map_err(|_| invalid("bad source ip"))?;
                let dst_ip: IpAddr = fields[1]
                    .parse()
                    .map_err(|_| invalid("bad destination ip"))?;
                let src_port: u16 = fields[2].parse().map_err(|_| invalid("bad source port"))?;
                let dst_port: u16 = fields[3]
                    .parse()
                    .map_err(|_| invalid("bad destination port"))?;

                let v4 = family == "TCP4";
                if src_ip.is_ipv4() != v4 || dst_ip.is_ipv4() != v4 {
                    return Err(invalid("address family mismatch"));
                }

                Ok(ProxyHeaderV1::Tcp {
                    source: SocketAddr::new(src_ip, src_port),
                    destination: SocketAddr::new(dst_ip, dst_port),
                })
            }
            _ => Err(invalid("unknown protocol family")),
        }
    }
}

/// Read one v1 header from the front of a stream.
///
/// Reads byte by byte so nothing past the CRLF is consumed.
pub async fn read_header<R>(reader: &mut R) -> io::Result<ProxyHeaderV1>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(MAX_V1_HEADER_LEN);

    loop {
        let byte = reader.read_u8().await?;
        line.push(byte);

        if line.ends_with(b"\r\n") {
            break;
        }
        if line.len() >= MAX_V1_HEADER_LEN {
            return Err(invalid("header too long"));
        }
    }

    if !line.starts_with(PROXY_V1_PREFIX) {
        return Err(invalid("missing PROXY prefix"));
    }

    let text = std::str::from_utf8(&line).map_err(|_| invalid("header is not ASCII"))?;
    ProxyHeaderV1::parse(text)
}

fn invalid(reason: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("invalid PROXY v1 header: {}", reason),
    )
}
