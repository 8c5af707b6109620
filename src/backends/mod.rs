//! Concrete [`crate::target::Target`] implementations.
//!
//! The core (`engine.rs`, `classify.rs`, `dirmeta.rs`) never references any
//! of these types directly; it only ever sees `dyn Target`/`impl Target`.

pub mod ftp;
pub mod local;
pub mod sftp;
pub mod spool;

/// Parses a `ftp://`, `ftps://`, or `sftp://` URL into its scheme, host,
/// port, optional userinfo, and path, the way `main.rs` needs to before it
/// can decide which backend to construct.
#[derive(Debug, Clone)]
pub struct RemoteUrl {
    /// `ftp`, `ftps`, or `sftp`.
    pub scheme: String,
    /// Host, without port.
    pub host: String,
    /// Port, defaulted per scheme if not given explicitly.
    pub port: u16,
    /// Username embedded in the URL, if any.
    pub username: Option<String>,
    /// Remote root path to synchronize.
    pub path: String,
}

impl RemoteUrl {
    /// Parses `raw` into its components.
    ///
    /// # Errors
    ///
    /// Returns a plain string error for malformed input; this is surfaced
    /// through `anyhow` at the CLI boundary, not through [`crate::error::SyncError`],
    /// since it happens before any target exists.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (scheme, rest) = raw.split_once("://").ok_or_else(|| format!("missing scheme in {raw}"))?;
        let default_port = match scheme {
            "ftp" => 21,
            "ftps" => 21,
            "sftp" => 22,
            other => return Err(format!("unsupported scheme {other}")),
        };

        let (authority, path) = rest.split_once('/').map_or((rest, ""), |(a, p)| (a, p));
        let (userinfo, host_port) = authority.split_once('@').map_or((None, authority), |(u, h)| (Some(u.to_string()), h));
        let (host, port) = host_port
            .split_once(':')
            .map(|(h, p)| p.parse::<u16>().map(|p| (h.to_string(), p)).map_err(|e| e.to_string()))
            .transpose()?
            .unwrap_or_else(|| (host_port.to_string(), default_port));

        Ok(Self {
            scheme: scheme.to_string(),
            host,
            port,
            username: userinfo,
            path: format!("/{path}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_ftp_url() {
        let url = RemoteUrl::parse("ftp://example.com/incoming").unwrap();
        assert_eq!(url.scheme, "ftp");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 21);
        assert_eq!(url.path, "/incoming");
        assert!(url.username.is_none());
    }

    #[test]
    fn parses_sftp_url_with_user_and_port() {
        let url = RemoteUrl::parse("sftp://bob@example.com:2222/home/bob").unwrap();
        assert_eq!(url.scheme, "sftp");
        assert_eq!(url.username.as_deref(), Some("bob"));
        assert_eq!(url.port, 2222);
        assert_eq!(url.path, "/home/bob");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(RemoteUrl::parse("smb://example.com/share").is_err());
    }
}
