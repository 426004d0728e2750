use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Abstract socket name the daemon listens on.
pub const DEFAULT_ABSTRACT_NAME: &str = "cerberus_socket";

/// Loopback TCP address the daemon listens on.
pub const DEFAULT_TCP_ADDR: &str = "127.0.0.1:28900";

// ── Endpoint ─────────────────────────────────────────────────────────

/// Where the daemon listens.
///
/// Textual forms: `tcp://host:port`, `unix:/path/to.sock`,
/// `abstract:name` or `@name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// `host:port`, resolved at connect time.
    Tcp(String),
    /// Filesystem Unix-domain socket.
    Unix(PathBuf),
    /// Linux abstract-namespace Unix-domain socket (no leading NUL).
    Abstract(String),
}

impl Endpoint {
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::Tcp(addr.into())
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix(path.into())
    }

    pub fn abstract_name(name: impl Into<String>) -> Self {
        Self::Abstract(name.into())
    }

    /// The daemon's default abstract socket.
    pub fn default_abstract() -> Self {
        Self::Abstract(DEFAULT_ABSTRACT_NAME.to_owned())
    }

    /// The daemon's default loopback TCP port.
    pub fn default_tcp() -> Self {
        Self::Tcp(DEFAULT_TCP_ADDR.to_owned())
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::default_abstract()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Abstract(name) => write!(f, "abstract:{name}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidEndpoint {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };
        let s = input.trim();

        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected host:port"))?;
            if host.is_empty() {
                return Err(invalid("missing host"));
            }
            port.parse::<u16>()
                .map_err(|_| invalid("port must be a number between 0 and 65535"))?;
            return Ok(Self::Tcp(addr.to_owned()));
        }
        if let Some(path) = s.strip_prefix("unix:") {
            let path = path.strip_prefix("//").unwrap_or(path);
            if path.is_empty() {
                return Err(invalid("missing socket path"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(name) = s.strip_prefix("abstract:").or_else(|| s.strip_prefix('@')) {
            if name.is_empty() {
                return Err(invalid("missing abstract socket name"));
            }
            return Ok(Self::Abstract(name.to_owned()));
        }

        Err(invalid("expected tcp://host:port, unix:/path or abstract:name"))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}
