//! Minimal WHOIS (RFC 3912) client used for domain-age lookups.
//!
//! A lookup asks the root server which registry is authoritative for the
//! domain's TLD, queries that registry and, for thin registries, follows the
//! registrar referral once. Every socket operation is bounded by the client
//! timeout.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::extract::domain::RegistrationLookup;

pub const DEFAULT_WHOIS_SERVER: &str = "whois.iana.org";
pub const WHOIS_PORT: u16 = 43;

/// Responses larger than this are truncated; registries answer in a few KiB.
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;

const CREATION_KEYS: [&str; 8] = [
    "creation date",
    "created",
    "created on",
    "registered on",
    "registration time",
    "domain registration date",
    "domain create date",
    "registered",
];

#[derive(Debug, thiserror::Error)]
pub enum WhoisError {
    #[error("cannot resolve WHOIS server {0}")]
    Resolve(String),
    #[error("WHOIS exchange with {server} failed: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lookup of {0} exceeded the time budget")]
    Timeout(String),
    #[error("no WHOIS server is registered for {0}")]
    NoReferral(String),
}

#[derive(Clone, Debug)]
pub struct WhoisClient {
    root_server: String,
    port: u16,
    timeout: Duration,
}

impl Default for WhoisClient {
    fn default() -> Self {
        Self::new(DEFAULT_WHOIS_SERVER, Duration::from_secs(10))
    }
}

impl WhoisClient {
    pub fn new(root_server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            root_server: root_server.into(),
            port: WHOIS_PORT,
            timeout,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the raw record served by the authoritative registry.
    ///
    /// The whole exchange, referral hops included, shares one deadline.
    pub fn lookup(&self, domain: &str) -> Result<String, WhoisError> {
        let deadline = Instant::now() + self.timeout;
        let root = self.query(&self.root_server, domain, deadline)?;
        let registry =
            parse_referral(&root).ok_or_else(|| WhoisError::NoReferral(domain.to_string()))?;
        trace!(target: "phishnet_ml::whois", "{domain}: root refers to {registry}");

        let record = self.query(&registry, domain, deadline)?;
        if !parse_creation_dates(&record).is_empty() {
            return Ok(record);
        }

        match parse_registrar_server(&record) {
            Some(registrar) if !registrar.eq_ignore_ascii_case(&registry) => {
                trace!(target: "phishnet_ml::whois", "{domain}: following registrar {registrar}");
                self.query(&registrar, domain, deadline)
            }
            _ => Ok(record),
        }
    }

    fn query(&self, server: &str, domain: &str, deadline: Instant) -> Result<String, WhoisError> {
        let io_error = |source| WhoisError::Io {
            server: server.to_string(),
            source,
        };
        let remaining = || {
            deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
                .ok_or_else(|| WhoisError::Timeout(domain.to_string()))
        };

        let address = resolve(server, self.port, remaining()?)
            .map_err(|err| match err {
                ResolveFailure::Unknown => WhoisError::Resolve(server.to_string()),
                ResolveFailure::TimedOut => WhoisError::Timeout(domain.to_string()),
            })?;

        let mut stream = TcpStream::connect_timeout(&address, remaining()?).map_err(io_error)?;
        stream.set_write_timeout(Some(remaining()?)).map_err(io_error)?;
        stream
            .write_all(format!("{domain}\r\n").as_bytes())
            .map_err(io_error)?;

        // Each read gets only what is left of the shared deadline, so a server
        // trickling bytes cannot stretch the lookup.
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        while (raw.len() as u64) < MAX_RESPONSE_BYTES {
            stream.set_read_timeout(Some(remaining()?)).map_err(io_error)?;
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => raw.extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(WhoisError::Timeout(domain.to_string()));
                }
                Err(err) => return Err(io_error(err)),
            }
        }
        raw.truncate(MAX_RESPONSE_BYTES as usize);
        debug!(
            target: "phishnet_ml::whois",
            "{server} answered {} bytes for {domain}",
            raw.len()
        );
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

enum ResolveFailure {
    Unknown,
    TimedOut,
}

/// Resolves `server` on a helper thread so a stalled resolver cannot outlive
/// `budget`. The thread is abandoned on timeout.
fn resolve(server: &str, port: u16, budget: Duration) -> Result<SocketAddr, ResolveFailure> {
    let (sender, receiver) = mpsc::channel();
    let target = (server.to_string(), port);
    thread::spawn(move || {
        let first = target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addresses| addresses.next());
        let _ = sender.send(first);
    });
    match receiver.recv_timeout(budget) {
        Ok(Some(address)) => Ok(address),
        Ok(None) => Err(ResolveFailure::Unknown),
        Err(RecvTimeoutError::Timeout) => Err(ResolveFailure::TimedOut),
        Err(RecvTimeoutError::Disconnected) => Err(ResolveFailure::Unknown),
    }
}

impl RegistrationLookup for WhoisClient {
    fn creation_dates(&self, domain: &str) -> Result<Vec<OffsetDateTime>, WhoisError> {
        let record = self.lookup(domain)?;
        Ok(parse_creation_dates(&record))
    }
}

fn fields(record: &str) -> impl Iterator<Item = (String, &str)> + '_ {
    record.lines().filter_map(|line| {
        let line = line.trim();
        if line.starts_with('%') || line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (!value.is_empty()).then(|| (key.trim().to_ascii_lowercase(), value))
    })
}

/// Authoritative server named by a root (IANA) response.
pub fn parse_referral(record: &str) -> Option<String> {
    fields(record)
        .find(|(key, _)| key == "refer" || key == "whois")
        .map(|(_, value)| value.to_string())
}

/// Registrar WHOIS server named by a thin registry response.
pub fn parse_registrar_server(record: &str) -> Option<String> {
    fields(record)
        .find(|(key, _)| key == "registrar whois server")
        .map(|(_, value)| {
            value
                .trim_start_matches("whois://")
                .trim_end_matches('/')
                .to_string()
        })
}

/// Every creation date found in a WHOIS record, in record order.
pub fn parse_creation_dates(record: &str) -> Vec<OffsetDateTime> {
    fields(record)
        .filter(|(key, _)| CREATION_KEYS.contains(&key.as_str()))
        .filter_map(|(_, value)| parse_timestamp(value))
        .collect()
}

/// Parses the timestamp layouts registries commonly use. Dates without a
/// time or offset are taken as midnight UTC.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }

    let head = value.split_whitespace().next().unwrap_or(value);
    let datetime_formats = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ];
    let timestamp = value.trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == ' ');
    for format in datetime_formats {
        if let Ok(parsed) = PrimitiveDateTime::parse(timestamp, format) {
            return Some(parsed.assume_utc());
        }
    }

    let date_formats = [
        format_description!("[year]-[month]-[day]"),
        format_description!("[year].[month].[day]"),
        format_description!("[year]/[month]/[day]"),
        format_description!("[day].[month].[year]"),
        format_description!("[day]-[month repr:short case_sensitive:false]-[year]"),
    ];
    let head = head.split('T').next().unwrap_or(head);
    date_formats
        .into_iter()
        .find_map(|format| Date::parse(head, format).ok())
        .map(|date| date.midnight().assume_utc())
}
