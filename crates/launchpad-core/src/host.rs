//! Engine endpoint parsing and host classification.
//!
//! An execution record stores the base address of the engine host it runs
//! on. Records that refer to the same engine must store the same value, so
//! the address is derived from a classification of the endpoint rather than
//! from the raw endpoint string: an engine reachable through a local socket,
//! a loopback address, or the backend's own public host is "local"; anything
//! else is "remote" and addressed by its host.

use crate::config::{AddressingConfig, LaunchpadConfig};
use crate::core_types::Platform;
use crate::errors::EngineError;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEndpoint {
    UnixSocket(PathBuf),
    NamedPipe(String),
    Network {
        scheme: String,
        host: String,
        port: Option<u16>,
    },
}

impl EngineEndpoint {
    /// Parse `unix://`, `npipe://`, `tcp://`, `http://`, `https://`
    /// endpoints, or a bare `host[:port]`.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        let invalid = || EngineError::InvalidEndpoint(raw.to_string());

        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("tcp".to_string(), raw),
        };

        match scheme.as_str() {
            "unix" => {
                if rest.is_empty() {
                    return Err(invalid());
                }
                Ok(EngineEndpoint::UnixSocket(PathBuf::from(rest)))
            }
            "npipe" => {
                if rest.is_empty() {
                    return Err(invalid());
                }
                Ok(EngineEndpoint::NamedPipe(rest.to_string()))
            }
            "tcp" | "http" | "https" => {
                let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
                let authority = authority
                    .rsplit_once('@')
                    .map(|(_, host_port)| host_port)
                    .unwrap_or(authority);
                let (host, port) = split_host_port(authority).ok_or_else(invalid)?;
                if host.is_empty() {
                    return Err(invalid());
                }
                Ok(EngineEndpoint::Network {
                    scheme,
                    host: host.to_ascii_lowercase(),
                    port,
                })
            }
            _ => Err(invalid()),
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            EngineEndpoint::Network { host, .. } => Some(host),
            _ => None,
        }
    }

    /// True for IPC endpoints and loopback network addresses.
    pub fn is_local_form(&self) -> bool {
        match self {
            EngineEndpoint::UnixSocket(_) | EngineEndpoint::NamedPipe(_) => true,
            EngineEndpoint::Network { host, .. } => is_loopback_host(host),
        }
    }
}

fn split_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(port) => Some(port.parse().ok()?),
            None if after.is_empty() => None,
            None => return None,
        };
        return Some((host, port));
    }
    match authority.rsplit_once(':') {
        // A second colon means an unbracketed IPv6 literal without a port.
        Some((host, _)) if host.contains(':') => Some((authority, None)),
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((authority, None)),
    }
}

fn is_loopback_host(host: &str) -> bool {
    host == "localhost"
        || host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostLocation {
    Local,
    Remote(String),
}

impl HostLocation {
    /// Base address stored as `engine_host_url`.
    pub fn base_url(&self, addressing: &AddressingConfig) -> String {
        match self {
            HostLocation::Local => addressing.local_base_url.clone(),
            HostLocation::Remote(host) => {
                let host = if host.contains(':') {
                    format!("[{}]", host)
                } else {
                    host.clone()
                };
                addressing.remote_base_url.replace("{host}", &host)
            }
        }
    }
}

/// Decide whether an engine is co-located with the backend. `None` means the
/// engine client's local defaults, which are local by definition.
pub fn classify(engine: Option<&EngineEndpoint>, backend: &EngineEndpoint) -> HostLocation {
    let Some(engine) = engine else {
        return HostLocation::Local;
    };
    if engine.is_local_form() {
        return HostLocation::Local;
    }
    match (engine.host(), backend.host()) {
        (Some(engine_host), Some(backend_host)) if engine_host.eq_ignore_ascii_case(backend_host) => {
            HostLocation::Local
        }
        (Some(engine_host), _) => HostLocation::Remote(engine_host.to_string()),
        (None, _) => HostLocation::Local,
    }
}

/// Normalized `engine_host_url` for the engine serving `platform`.
pub fn engine_host_url(config: &LaunchpadConfig, platform: Platform) -> Result<String, EngineError> {
    let backend = EngineEndpoint::parse(&config.backend_endpoint)?;
    let engine = config
        .platform(platform)
        .and_then(|p| p.engine_endpoint.as_deref())
        .map(EngineEndpoint::parse)
        .transpose()?;
    let location = classify(engine.as_ref(), &backend);
    log::debug!("Engine for platform {} classified as {:?}", platform, location);
    Ok(location.base_url(&config.addressing))
}
