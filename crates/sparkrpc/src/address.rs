//! # Endpoint Addresses
//!
//! An endpoint is located by a single canonical string:
//!
//! ```text
//! spark://{name}@{host}:{port}
//! ```
//!
//! ## Invariants
//!
//! - **Strict**: the scheme must be `spark`, and the name, host and port are all
//!   mandatory. A path, query or fragment is rejected outright.
//! - **Canonical**: `Address::parse(s)?.to_string() == s` for every accepted `s`.
//! - **Whole**: an `Address` is only ever built from validated parts.

use std::fmt;

/// The only scheme accepted in a locator.
pub const SCHEME: &str = "spark";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The locator does not follow `spark://{name}@{host}:{port}`.
    MalformedAddress { locator: String, reason: &'static str },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedAddress { locator, reason } => {
                write!(f, "Malformed address '{}': {}", locator, reason)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The network half of an [`Address`]: where a process listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    host: String,
    port: u16,
}

impl TransportAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A fully qualified endpoint locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
    name: String,
}

impl Address {
    /// Builds an address from its parts, applying the same checks as [`Address::parse`].
    pub fn new(host: impl Into<String>, port: u16, name: impl Into<String>) -> Result<Self> {
        let host = host.into();
        let name = name.into();
        let malformed = |reason| Error::MalformedAddress {
            locator: format!("{}://{}@{}:{}", SCHEME, name, host, port),
            reason,
        };

        check_name(&name).map_err(malformed)?;
        check_host(&host).map_err(malformed)?;

        Ok(Self { host, port, name })
    }

    /// Parses a locator of the form `spark://{name}@{host}:{port}`.
    pub fn parse(locator: &str) -> Result<Self> {
        let malformed = |reason| Error::MalformedAddress {
            locator: locator.to_string(),
            reason,
        };

        let (scheme, rest) = locator.split_once("://").ok_or(malformed("missing scheme"))?;
        if scheme != SCHEME {
            return Err(malformed("scheme must be 'spark'"));
        }

        if rest.contains('?') {
            return Err(malformed("query is not allowed"));
        }
        if rest.contains('#') {
            return Err(malformed("fragment is not allowed"));
        }
        if rest.contains('/') {
            return Err(malformed("path is not allowed"));
        }

        let (name, authority) = rest.split_once('@').ok_or(malformed("missing endpoint name"))?;
        check_name(name).map_err(malformed)?;

        let (host, port) = split_host_port(authority).map_err(malformed)?;
        check_host(host).map_err(malformed)?;
        let port = parse_port(port).map_err(malformed)?;

        Ok(Self {
            host: host.to_string(),
            port,
            name: name.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drops the endpoint name, keeping only what the network layer needs.
    pub fn to_transport_address(&self) -> TransportAddress {
        TransportAddress::new(self.host.clone(), self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}@{}:{}", SCHEME, self.name, self.host, self.port)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Splits `host:port`, keeping bracketed IPv6 hosts intact.
fn split_host_port(authority: &str) -> std::result::Result<(&str, &str), &'static str> {
    if authority.starts_with('[') {
        let close = authority.find(']').ok_or("unterminated IPv6 host")?;
        let (host, rest) = authority.split_at(close + 1);
        let port = rest.strip_prefix(':').ok_or("missing port")?;
        return Ok((host, port));
    }

    authority.rsplit_once(':').ok_or("missing port")
}

fn check_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("missing endpoint name");
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control() || "@/?#".contains(c)) {
        return Err("endpoint name contains a reserved character");
    }
    Ok(())
}

fn check_host(host: &str) -> std::result::Result<(), &'static str> {
    if host.is_empty() {
        return Err("missing host");
    }

    if let Some(inner) = host.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or("unterminated IPv6 host")?;
        let ipv6 = |c: char| c.is_ascii_hexdigit() || c == ':' || c == '.';
        if inner.is_empty() || !inner.chars().all(ipv6) {
            return Err("invalid IPv6 host");
        }
        return Ok(());
    }

    if !host.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_') {
        return Err("invalid host");
    }
    Ok(())
}

fn parse_port(port: &str) -> std::result::Result<u16, &'static str> {
    if port.is_empty() {
        return Err("missing port");
    }
    if !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err("port must be a non-negative integer");
    }
    if port.len() > 1 && port.starts_with('0') {
        return Err("port must be canonical");
    }
    port.parse().map_err(|_| "port out of range")
}
