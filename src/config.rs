//! Connection configuration.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::sql::ParamStyle;

/// Where the server lives.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    #[cfg(unix)]
    Unix(PathBuf),
}

/// Connection options.
///
/// `user` is required; everything else has a default. Build with
/// [`Config::new`] and the chained setters, then call
/// [`Config::connect`](crate::Connection::connect).
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) user: String,
    pub(crate) database: Option<String>,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) unix_sock: Option<PathBuf>,
    pub(crate) password: Option<String>,
    pub(crate) socket_timeout: Duration,
    pub(crate) ssl: bool,
    pub(crate) paramstyle: ParamStyle,
    pub(crate) statement_cache_size: Option<NonZeroUsize>,
    pub(crate) max_message_size: usize,
}

impl Config {
    /// Options for connecting as `user`, with every other option defaulted.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            database: None,
            host: "localhost".to_string(),
            port: 5432,
            unix_sock: None,
            password: None,
            socket_timeout: Duration::from_secs(60),
            ssl: false,
            paramstyle: ParamStyle::Format,
            statement_cache_size: None,
            max_message_size: 1024 * 1024 * 1024,
        }
    }

    /// Database name. Defaults to the user name (the server applies that
    /// default when the startup message omits it).
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Connect over a Unix domain socket instead of TCP; host and port are
    /// ignored when set.
    pub fn unix_sock(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_sock = Some(path.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Per-read/write timeout. Defaults to 60 seconds.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Require a TLS upgrade before the startup message.
    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Placeholder style accepted by cursors. Defaults to `format` (`%s`).
    pub fn paramstyle(mut self, style: ParamStyle) -> Self {
        self.paramstyle = style;
        self
    }

    /// Bound on the prepared-statement cache. `None` (the default) means
    /// unbounded; evicted statements are closed on the server.
    pub fn statement_cache_size(mut self, size: Option<NonZeroUsize>) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Reject any incoming message whose declared length exceeds this.
    /// Defaults to 1 GiB.
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        #[cfg(unix)]
        if let Some(path) = &self.unix_sock {
            return Endpoint::Unix(path.clone());
        }
        Endpoint::Tcp { host: self.host.clone(), port: self.port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_option_table() {
        let config = Config::new("alice");
        assert_eq!(config.user, "alice");
        assert_eq!(config.database, None);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert!(config.unix_sock.is_none());
        assert!(config.password.is_none());
        assert_eq!(config.socket_timeout, Duration::from_secs(60));
        assert!(!config.ssl);
        assert_eq!(config.paramstyle, ParamStyle::Format);
        assert!(config.statement_cache_size.is_none());
        assert_eq!(config.max_message_size, 1 << 30);
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_sock_overrides_host() {
        let config = Config::new("alice").host("db.example.com").unix_sock("/tmp/.s.PGSQL.5432");
        match config.endpoint() {
            Endpoint::Unix(path) => assert_eq!(path, PathBuf::from("/tmp/.s.PGSQL.5432")),
            other => panic!("unexpected endpoint {:?}", other),
        }
    }
}
