// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! UDL parsing.
//!
//! ```text
//! [cMsg:]cMsg://<host>[:<port>]/[<subdomain>/][<remainder>][?key=value[&key=value...]]
//! ```
//!
//! Recognized keys (case-insensitive, each at most once):
//!
//! | Key            | Value                         |
//! |----------------|-------------------------------|
//! | `cmsgpassword` | password sent to the server   |
//! | `multicastTO`  | discovery timeout, seconds    |
//! | `domainPort`   | proxy port override           |
//! | `subnet`       | preferred subnet, dotted quad |
//! | `regime`       | `low`, `medium`, `high`       |
//! | `failover`     | `any`, `cloud`, `cloudonly`   |
//! | `cloud`        | `any`, `local`                |
//!
//! Unknown keys are ignored.

use crate::config::{
    DEFAULT_MULTICAST_ADDR, DEFAULT_MULTICAST_TIMEOUT, DEFAULT_NAME_SERVER_TCP_PORT,
    DEFAULT_NAME_SERVER_UDP_PORT, DEFAULT_SUBDOMAIN, MAX_PASSWORD_LEN, MAX_PROXY_PORT, MIN_USER_PORT,
};
use crate::error::{Error, Result};
use crate::netif;
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

const SCHEME: &str = "cmsg://";
const DOUBLE_SCHEME: &str = "cmsg:cmsg://";
const MULTICAST_HOST: &str = "multicast";

/// Expected traffic level of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Regime {
    /// Few, large messages.
    Low,
    /// Ordinary traffic.
    #[default]
    Medium,
    /// Many small messages.
    High,
}

/// Which servers a client may fail over to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailoverPolicy {
    /// Any candidate in the list.
    #[default]
    Any,
    /// Prefer cloud members, then any candidate.
    Cloud,
    /// Cloud members only.
    CloudOnly,
}

/// Which cloud members a client may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloudPolicy {
    /// Any member.
    #[default]
    Any,
    /// Members on the local host first.
    Local,
}

macro_rules! keyword_enum {
    ($ty:ident, $what:literal, { $($word:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                $(
                    if s.eq_ignore_ascii_case($word) {
                        return Ok($ty::$variant);
                    }
                )+
                Err(Error::InvalidUdl(format!("{} must be one of {}, got {:?}",
                    $what, [$($word),+].join("/"), s)))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let word = match self {
                    $($ty::$variant => $word,)+
                };
                f.write_str(word)
            }
        }
    };
}

keyword_enum!(Regime, "regime", { "low" => Low, "medium" => Medium, "high" => High });
keyword_enum!(FailoverPolicy, "failover", {
    "any" => Any,
    "cloud" => Cloud,
    "cloudonly" => CloudOnly,
});
keyword_enum!(CloudPolicy, "cloud", { "any" => Any, "local" => Local });

/// One parsed UDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUdl {
    /// The UDL as given.
    pub udl: String,
    /// Server host, or the multicast group in multicast mode.
    pub host: String,
    /// Name-server TCP port.
    pub tcp_port: u16,
    /// Name-server UDP port (multicast discovery).
    pub udp_port: u16,
    /// Locate the server by multicast discovery.
    pub must_multicast: bool,
    /// Sub-domain after the host.
    pub subdomain: String,
    /// Everything after the sub-domain, query excluded.
    pub remainder: String,
    /// Password, if any.
    pub password: Option<String>,
    /// Bound on the discovery wait; `None` waits forever.
    pub multicast_timeout: Option<Duration>,
    /// Proxy port overriding the one the server advertises.
    pub domain_port: Option<u16>,
    /// Preferred subnet for the server's addresses.
    pub subnet: Option<Ipv4Addr>,
    /// Traffic regime.
    pub regime: Regime,
    /// Failover policy.
    pub failover: FailoverPolicy,
    /// Cloud policy.
    pub cloud: CloudPolicy,
}

impl ParsedUdl {
    /// Parse one UDL.
    pub fn parse(udl: &str) -> Result<Self> {
        parse_udl(udl)
    }
}

impl FromStr for ParsedUdl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_udl(s)
    }
}

impl fmt::Display for ParsedUdl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.udl)
    }
}

/// Parse a `;`-separated failover list.
///
/// Any invalid entry fails the whole list.
pub fn parse_udl_list(list: &str) -> Result<Vec<ParsedUdl>> {
    let candidates = list
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_udl)
        .collect::<Result<Vec<_>>>()?;
    if candidates.is_empty() {
        return Err(Error::InvalidUdl("empty UDL list".into()));
    }
    Ok(candidates)
}

/// Parse one UDL.
pub fn parse_udl(udl: &str) -> Result<ParsedUdl> {
    let udl = udl.trim();
    let lower = udl.to_ascii_lowercase();
    let rest = if lower.starts_with(DOUBLE_SCHEME) {
        &udl[DOUBLE_SCHEME.len()..]
    } else if lower.starts_with(SCHEME) {
        &udl[SCHEME.len()..]
    } else {
        return Err(Error::InvalidUdl(format!(
            "{:?} does not start with cMsg://",
            udl
        )));
    };

    let (body, query) = match rest.split_once('?') {
        Some((body, query)) => (body, query),
        None => (rest, ""),
    };
    let (authority, path) = match body.split_once('/') {
        Some((authority, path)) => (authority, path),
        None => (body, ""),
    };

    let (host, port) = parse_authority(authority)?;
    let (subdomain, remainder) = match path.split_once('/') {
        Some((subdomain, remainder)) => (subdomain, remainder),
        None => (path, ""),
    };
    let subdomain = if subdomain.is_empty() {
        DEFAULT_SUBDOMAIN
    } else {
        subdomain
    };

    let must_multicast =
        host.eq_ignore_ascii_case(MULTICAST_HOST) || host == DEFAULT_MULTICAST_ADDR.to_string();
    let host = if must_multicast {
        DEFAULT_MULTICAST_ADDR.to_string()
    } else if host.eq_ignore_ascii_case("localhost") {
        netif::hostname()
    } else {
        host.to_string()
    };
    let (tcp_port, udp_port) = match (must_multicast, port) {
        (true, Some(port)) => (DEFAULT_NAME_SERVER_TCP_PORT, port),
        (false, Some(port)) => (port, DEFAULT_NAME_SERVER_UDP_PORT),
        (_, None) => (DEFAULT_NAME_SERVER_TCP_PORT, DEFAULT_NAME_SERVER_UDP_PORT),
    };

    let mut parsed = ParsedUdl {
        udl: udl.to_string(),
        host,
        tcp_port,
        udp_port,
        must_multicast,
        subdomain: subdomain.to_string(),
        remainder: remainder.to_string(),
        password: None,
        multicast_timeout: Some(DEFAULT_MULTICAST_TIMEOUT),
        domain_port: None,
        subnet: None,
        regime: Regime::default(),
        failover: FailoverPolicy::default(),
        cloud: CloudPolicy::default(),
    };
    apply_query(&mut parsed, query)?;
    Ok(parsed)
}

fn parse_authority(authority: &str) -> Result<(&str, Option<u16>)> {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };
    if host.is_empty() {
        return Err(Error::InvalidUdl("missing host".into()));
    }
    let port = match port {
        Some(port) => Some(parse_port(port, "port")?),
        None => None,
    };
    Ok((host, port))
}

fn parse_port(value: &str, what: &str) -> Result<u16> {
    let port: u32 = value
        .parse()
        .map_err(|_| Error::InvalidUdl(format!("{} {:?} is not a number", what, value)))?;
    if port < u32::from(MIN_USER_PORT) || port > u32::from(u16::MAX) {
        return Err(Error::InvalidUdl(format!(
            "{} {} outside {}..={}",
            what,
            port,
            MIN_USER_PORT,
            u16::MAX
        )));
    }
    Ok(port as u16)
}

fn apply_query(parsed: &mut ParsedUdl, query: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        let known = matches!(
            key.as_str(),
            "cmsgpassword" | "multicastto" | "domainport" | "subnet" | "regime" | "failover" | "cloud"
        );
        if !known {
            log::debug!("[udl] ignoring unknown key {:?}", key);
            continue;
        }
        if !seen.insert(key.clone()) {
            return Err(Error::InvalidUdl(format!("{} given more than once", key)));
        }

        match key.as_str() {
            "cmsgpassword" => {
                if value.len() > MAX_PASSWORD_LEN {
                    return Err(Error::InvalidUdl("password too long".into()));
                }
                parsed.password = Some(value.to_string());
            }
            "multicastto" => {
                let secs: u64 = value.parse().map_err(|_| {
                    Error::InvalidUdl(format!("multicastTO {:?} is not a number of seconds", value))
                })?;
                parsed.multicast_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            "domainport" => {
                let port = parse_port(value, "domainPort")?;
                if port > MAX_PROXY_PORT {
                    return Err(Error::InvalidUdl(format!(
                        "domainPort {} above {}, its control port would not fit",
                        port, MAX_PROXY_PORT
                    )));
                }
                parsed.domain_port = Some(port);
            }
            "subnet" => {
                let subnet = value
                    .parse()
                    .map_err(|_| Error::InvalidUdl(format!("subnet {:?} is not a dotted quad", value)))?;
                parsed.subnet = Some(subnet);
            }
            "regime" => parsed.regime = value.parse()?,
            "failover" => parsed.failover = value.parse()?,
            "cloud" => parsed.cloud = value.parse()?,
            _ => {}
        }
    }
    Ok(())
}
