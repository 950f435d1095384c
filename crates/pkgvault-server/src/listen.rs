//! Listen address parsing.
//!
//! Accepted forms:
//!
//! ```text
//! https:localhost:1234         protocol + host + port
//! localhost:1234               host + port
//! 1234                         port
//! http::1234                   protocol + port
//! https://localhost:443/       full url
//! http://[::1]:443/            ipv6
//! unix:/tmp/http.sock          unix socket
//! https://unix:/tmp/http.sock  unix socket with protocol
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use crate::config::ListenSetting;

pub const DEFAULT_PORT: u16 = 4873;
pub const DEFAULT_HOST: &str = "localhost";

static TCP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((https?):(//)?)?((([^/:]*)|\[([^\[\]]+)\]):)?(\d+)/?$").unwrap()
});

static UNIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^((https?):(//)?)?unix:(.*)$").unwrap());

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    fn parse(s: &str) -> Self {
        if s == "https" {
            Self::Https
        } else {
            Self::Http
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

/// A parsed bind point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenAddress {
    Tcp {
        protocol: Protocol,
        host: String,
        port: u16,
    },
    Unix {
        protocol: Protocol,
        path: String,
    },
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { protocol, host, port } if host.contains(':') => {
                write!(f, "{protocol}://[{host}]:{port}")
            }
            Self::Tcp { protocol, host, port } => write!(f, "{protocol}://{host}:{port}"),
            Self::Unix { protocol, path } => write!(f, "{protocol}://unix:{path}"),
        }
    }
}

/// Non-empty capture group `i`.
fn group<'h>(caps: &Captures<'h>, i: usize) -> Option<&'h str> {
    caps.get(i).map(|m| m.as_str()).filter(|s| !s.is_empty())
}

/// Parse one listen address. `None` when the input matches no known form.
pub fn parse_address(input: &str) -> Option<ListenAddress> {
    if let Some(caps) = TCP_RE.captures(input) {
        let protocol = group(&caps, 2).map(Protocol::parse).unwrap_or_default();
        let host = group(&caps, 6)
            .or_else(|| group(&caps, 7))
            .unwrap_or(DEFAULT_HOST)
            .to_string();
        let port = match group(&caps, 8) {
            Some(digits) => digits.parse().ok()?,
            None => DEFAULT_PORT,
        };
        return Some(ListenAddress::Tcp { protocol, host, port });
    }

    let caps = UNIX_RE.captures(input)?;
    Some(ListenAddress::Unix {
        protocol: group(&caps, 2).map(Protocol::parse).unwrap_or_default(),
        path: caps.get(4).map(|m| m.as_str()).unwrap_or_default().to_string(),
    })
}

/// Resolve the addresses to bind: command line, then config, then the
/// default port. Entries that fail to parse are logged and skipped.
pub fn list_listen_addresses(cli: Option<&str>, config: Option<&ListenSetting>) -> Vec<ListenAddress> {
    let default_port = DEFAULT_PORT.to_string();
    let candidates: Vec<&str> = match (cli, config) {
        (Some(arg), _) => vec![arg],
        (None, Some(ListenSetting::Many(list))) => {
            warn!("multiple listen addresses are deprecated, configure only one");
            list.iter().map(String::as_str).collect()
        }
        (None, Some(ListenSetting::One(addr))) => vec![addr.as_str()],
        (None, None) => vec![default_port.as_str()],
    };

    candidates
        .into_iter()
        .filter_map(|raw| {
            let parsed = parse_address(raw);
            if parsed.is_none() {
                warn!(address = raw, "invalid listen address, ignoring");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(protocol: Protocol, host: &str, port: u16) -> ListenAddress {
        ListenAddress::Tcp {
            protocol,
            host: host.to_string(),
            port,
        }
    }

    fn unix(protocol: Protocol, path: &str) -> ListenAddress {
        ListenAddress::Unix {
            protocol,
            path: path.to_string(),
        }
    }

    #[test]
    fn tcp_forms() {
        use Protocol::*;
        assert_eq!(parse_address("4873"), Some(tcp(Http, "localhost", 4873)));
        assert_eq!(parse_address("1234/"), Some(tcp(Http, "localhost", 1234)));
        assert_eq!(parse_address("localhost:1234"), Some(tcp(Http, "localhost", 1234)));
        assert_eq!(parse_address("0.0.0.0:80"), Some(tcp(Http, "0.0.0.0", 80)));
        assert_eq!(parse_address("https:localhost:1234"), Some(tcp(Https, "localhost", 1234)));
        assert_eq!(parse_address("http::1234"), Some(tcp(Http, "localhost", 1234)));
        assert_eq!(parse_address("https://example.org:443/"), Some(tcp(Https, "example.org", 443)));
        assert_eq!(parse_address("http://[::1]:443/"), Some(tcp(Http, "::1", 443)));
        assert_eq!(parse_address("[fe80::1]:8080"), Some(tcp(Http, "fe80::1", 8080)));
    }

    #[test]
    fn unix_forms() {
        use Protocol::*;
        assert_eq!(parse_address("unix:/tmp/http.sock"), Some(unix(Http, "/tmp/http.sock")));
        assert_eq!(
            parse_address("https://unix:/tmp/http.sock"),
            Some(unix(Https, "/tmp/http.sock"))
        );
        assert_eq!(parse_address("http:unix:/run/x"), Some(unix(Http, "/run/x")));
    }

    #[test]
    fn malformed_input() {
        assert_eq!(parse_address(""), None);
        assert_eq!(parse_address("localhost"), None);
        assert_eq!(parse_address("ftp://host:21"), None);
        assert_eq!(parse_address("host:port"), None);
        assert_eq!(parse_address("http://a/b:80"), None);
        assert_eq!(parse_address("99999"), None);
    }

    #[test]
    fn display_round() {
        let addr = parse_address("https://[::1]:443").unwrap();
        assert_eq!(addr.to_string(), "https://[::1]:443");
        assert_eq!(parse_address(&addr.to_string()), Some(addr));
        assert_eq!(
            parse_address("unix:/tmp/s").unwrap().to_string(),
            "http://unix:/tmp/s"
        );
    }

    #[test]
    fn cli_wins_over_config() {
        let config = ListenSetting::One("9000".into());
        let out = list_listen_addresses(Some("8000"), Some(&config));
        assert_eq!(out, vec![tcp(Protocol::Http, "localhost", 8000)]);
    }

    #[test]
    fn config_list_and_single() {
        let list = ListenSetting::Many(vec!["5555".into(), "localhost:5557".into()]);
        assert_eq!(
            list_listen_addresses(None, Some(&list)),
            vec![
                tcp(Protocol::Http, "localhost", 5555),
                tcp(Protocol::Http, "localhost", 5557)
            ]
        );

        let one = ListenSetting::One("unix:/tmp/a.sock".into());
        assert_eq!(
            list_listen_addresses(None, Some(&one)),
            vec![unix(Protocol::Http, "/tmp/a.sock")]
        );
    }

    #[test]
    fn default_port_when_nothing_configured() {
        assert_eq!(
            list_listen_addresses(None, None),
            vec![tcp(Protocol::Http, "localhost", DEFAULT_PORT)]
        );
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let list = ListenSetting::Many(vec!["nope".into(), "4000".into()]);
        assert_eq!(
            list_listen_addresses(None, Some(&list)),
            vec![tcp(Protocol::Http, "localhost", 4000)]
        );
        assert!(list_listen_addresses(Some("garbage"), None).is_empty());
    }
}
