//! Connection establishment and lifetime.
//!
//! `connect` walks the startup state machine: optional TLS upgrade,
//! StartupMessage, authentication, then parameter negotiation until the
//! first ReadyForQuery. Any ErrorResponse before that point is fatal.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use super::cancel::CancelToken;
use super::cursor::Cursor;
use super::statement::StatementCache;
use super::stream::PgStream;
use crate::config::{Config, Endpoint};
use crate::error::{PgError, PgResult, ServerError};
use crate::protocol::{auth, AuthRequest, BackendMessage, PgEncoder, TransactionStatus};
use crate::types::{SessionParams, TypeRegistry, TypeSpec};

pub(crate) const BUFFER_CAPACITY: usize = 65536;

/// Connection lifecycle states. Busy covers the window between flushing a
/// request and observing its ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    StartingUp,
    Authenticating,
    Negotiating,
    Ready,
    Busy,
    Closed,
}

type NoticeHandler = Box<dyn Fn(&ServerError) + Send + 'static>;

/// An asynchronous NOTIFY delivered outside any query.
#[derive(Debug, Clone)]
pub struct Notification {
    pub process_id: i32,
    pub channel: String,
    pub payload: String,
}

/// A single PostgreSQL session.
///
/// Not safe for concurrent use; one cursor executes at a time, which the
/// `&mut` receivers enforce statically. Independent connections are fully
/// independent.
pub struct Connection {
    pub(crate) stream: PgStream,
    pub(crate) read_buf: BytesMut,
    pub(crate) write_buf: BytesMut,
    pub(crate) config: Config,
    pub(crate) registry: TypeRegistry,
    pub(crate) session: SessionParams,
    pub(crate) parameters: HashMap<String, String>,
    pub(crate) process_id: i32,
    pub(crate) secret_key: i32,
    pub(crate) tx_status: TransactionStatus,
    pub(crate) state: ConnState,
    pub(crate) autocommit: bool,
    pub(crate) statements: StatementCache,
    pub(crate) next_statement_id: u64,
    notice_handler: Option<NoticeHandler>,
    notifications: Vec<Notification>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("process_id", &self.process_id)
            .field("state", &self.state)
            .field("tx_status", &self.tx_status)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect and drive the session to ready.
    pub async fn connect(config: Config) -> PgResult<Self> {
        if config.user.is_empty() {
            return Err(PgError::Interface("user is required".to_string()));
        }

        let stream = match config.endpoint() {
            Endpoint::Tcp { host, port } => {
                let tcp = tokio::time::timeout(
                    config.socket_timeout,
                    TcpStream::connect((host.as_str(), port)),
                )
                .await
                .map_err(|_| PgError::Timeout)??;
                tcp.set_nodelay(true)?;
                if config.ssl {
                    Self::upgrade_tls(&config, tcp).await?
                } else {
                    PgStream::Tcp(tcp)
                }
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if config.ssl {
                    return Err(PgError::Interface(
                        "ssl is not supported over a unix socket".to_string(),
                    ));
                }
                let sock = tokio::time::timeout(config.socket_timeout, UnixStream::connect(&path))
                    .await
                    .map_err(|_| PgError::Timeout)??;
                PgStream::Unix(sock)
            }
        };

        let statement_cache_size = config.statement_cache_size;
        let mut conn = Self {
            stream,
            read_buf: BytesMut::with_capacity(BUFFER_CAPACITY),
            write_buf: BytesMut::with_capacity(BUFFER_CAPACITY),
            config,
            registry: TypeRegistry::shared().clone(),
            session: SessionParams::default(),
            parameters: HashMap::new(),
            process_id: 0,
            secret_key: 0,
            tx_status: TransactionStatus::Idle,
            state: ConnState::StartingUp,
            autocommit: false,
            statements: StatementCache::new(statement_cache_size),
            next_statement_id: 1,
            notice_handler: None,
            notifications: Vec::new(),
        };

        match conn.startup().await {
            Ok(()) => {
                tracing::debug!(
                    pid = conn.process_id,
                    server_version = %conn.session.server_version,
                    "connected"
                );
                Ok(conn)
            }
            Err(e) => {
                // Startup errors are fatal; drop the transport.
                conn.state = ConnState::Closed;
                Err(e)
            }
        }
    }

    /// SSLRequest handshake: `S` upgrades, `N` refuses, anything else is a
    /// protocol violation.
    async fn upgrade_tls(config: &Config, mut tcp: TcpStream) -> PgResult<PgStream> {
        use tokio_rustls::rustls::pki_types::ServerName;
        use tokio_rustls::rustls::{ClientConfig, RootCertStore};
        use tokio_rustls::TlsConnector;

        let mut buf = BytesMut::with_capacity(8);
        PgEncoder::ssl_request_to(&mut buf);
        tcp.write_all(&buf).await?;

        let mut response = [0u8; 1];
        tokio::time::timeout(config.socket_timeout, tcp.read_exact(&mut response))
            .await
            .map_err(|_| PgError::Timeout)??;
        match response[0] {
            b'S' => {}
            b'N' => return Err(PgError::Protocol("SSL refused by server".to_string())),
            other => {
                return Err(PgError::Protocol(format!(
                    "unexpected SSLRequest response 0x{:02x}",
                    other
                )))
            }
        }

        let mut roots = RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            let _ = roots.add(cert);
        }
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|_| PgError::Interface(format!("invalid hostname for TLS: {}", config.host)))?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| PgError::Protocol(format!("TLS handshake failed: {}", e)))?;
        Ok(PgStream::Tls(tls))
    }

    async fn startup(&mut self) -> PgResult<()> {
        let mut params: Vec<(&str, &str)> = vec![("user", self.config.user.as_str())];
        if let Some(db) = &self.config.database {
            params.push(("database", db.as_str()));
        }
        params.push(("client_encoding", "UTF8"));
        params.push(("DateStyle", "ISO, MDY"));
        PgEncoder::startup_to(&mut self.write_buf, &params);
        self.flush().await?;

        self.state = ConnState::Authenticating;
        self.authenticate().await?;

        self.state = ConnState::Negotiating;
        self.negotiate().await
    }

    /// Consume Authentication* messages until AuthenticationOk. Anything
    /// else in this phase besides a fatal ErrorResponse is a protocol error.
    async fn authenticate(&mut self) -> PgResult<()> {
        loop {
            match self.recv().await? {
                BackendMessage::Authentication(AuthRequest::Ok) => return Ok(()),
                BackendMessage::Authentication(request) => {
                    auth::respond(
                        &mut self.write_buf,
                        &request,
                        &self.config.user,
                        self.config.password.as_deref(),
                    )?;
                    self.flush().await?;
                }
                BackendMessage::ErrorResponse(e) => return Err(e.into()),
                other => {
                    return Err(PgError::Protocol(format!(
                        "unexpected message '{}' during authentication",
                        other.tag()
                    )))
                }
            }
        }
    }

    /// Drain ParameterStatus / BackendKeyData / NoticeResponse until the
    /// initial ReadyForQuery.
    async fn negotiate(&mut self) -> PgResult<()> {
        loop {
            match self.recv().await? {
                BackendMessage::ParameterStatus { name, value } => self.apply_parameter(name, value),
                BackendMessage::BackendKeyData { process_id, secret_key } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::NoticeResponse(notice) => self.dispatch_notice(notice),
                BackendMessage::ReadyForQuery(status) => {
                    self.observe_ready(status);
                    return Ok(());
                }
                BackendMessage::ErrorResponse(e) => return Err(e.into()),
                other => {
                    return Err(PgError::Protocol(format!(
                        "unexpected message '{}' during startup",
                        other.tag()
                    )))
                }
            }
        }
    }

    pub(crate) fn apply_parameter(&mut self, name: String, value: String) {
        match name.as_str() {
            "client_encoding" => self.session.client_encoding = value.clone(),
            "integer_datetimes" => self.session.integer_datetimes = value == "on",
            "DateStyle" => self.session.date_style = value.clone(),
            "TimeZone" => self.session.time_zone = value.clone(),
            "server_version" => self.session.server_version = value.clone(),
            _ => {}
        }
        self.parameters.insert(name, value);
    }

    pub(crate) fn dispatch_notice(&self, notice: ServerError) {
        match &self.notice_handler {
            Some(handler) => handler(&notice),
            None => tracing::debug!(
                severity = %notice.severity,
                code = %notice.code,
                "server notice: {}",
                notice.message
            ),
        }
    }

    pub(crate) fn push_notification(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Gate for starting a new request: only a ready connection accepts one.
    pub(crate) fn begin_request(&mut self) -> PgResult<()> {
        match self.state {
            ConnState::Ready => {
                self.state = ConnState::Busy;
                Ok(())
            }
            ConnState::Closed => Err(PgError::Interface("connection is closed".to_string())),
            ConnState::Busy => Err(PgError::Protocol(
                "connection is busy: a previous request has not reached ReadyForQuery".to_string(),
            )),
            _ => Err(PgError::Protocol("connection is still starting up".to_string())),
        }
    }

    /// ReadyForQuery: the server's transaction status is authoritative.
    pub(crate) fn observe_ready(&mut self, status: TransactionStatus) {
        self.tx_status = status;
        if self.state != ConnState::Closed {
            self.state = ConnState::Ready;
        }
    }

    pub(crate) fn mark_broken(&mut self) {
        self.state = ConnState::Closed;
    }

    /// Open a cursor. The borrow makes this the connection's only executor
    /// until the cursor is dropped.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// Current transaction status as last reported by the server.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_status != TransactionStatus::Idle
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// With autocommit on, no implicit BEGIN is issued and the transaction
    /// control methods become no-ops.
    pub fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    /// Number of cached prepared statements.
    pub fn statement_cache_len(&self) -> usize {
        self.statements.len()
    }

    /// Drop the client-side statement cache. Server-side statements remain
    /// until the connection closes.
    pub fn clear_statement_cache(&mut self) {
        self.statements.clear();
    }

    /// Raw value of a negotiated server parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }

    pub fn server_version(&self) -> &str {
        &self.session.server_version
    }

    pub fn backend_pid(&self) -> i32 {
        self.process_id
    }

    /// Register a codec on this connection's registry copy. Other
    /// connections and the process-wide default are unaffected.
    pub fn register_type(&mut self, type_oid: u32, spec: TypeSpec) {
        self.registry.register(type_oid, spec);
    }

    /// Install a notice handler; without one, notices go to the log.
    pub fn set_notice_handler(&mut self, handler: impl Fn(&ServerError) + Send + 'static) {
        self.notice_handler = Some(Box::new(handler));
    }

    /// Drain buffered NOTIFY messages.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Token for out-of-band cancellation of this connection's running
    /// query; usable from another task while this connection is busy.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            endpoint: self.config.endpoint(),
            process_id: self.process_id,
            secret_key: self.secret_key,
        }
    }

    /// Graceful close: best-effort Terminate, then drop the transport.
    pub async fn close(mut self) -> PgResult<()> {
        if self.state != ConnState::Closed {
            self.write_buf.clear();
            PgEncoder::terminate_to(&mut self.write_buf);
            let _ = self.flush().await;
            let _ = self.stream.shutdown().await;
            self.state = ConnState::Closed;
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state != ConnState::Closed {
            // Best effort; a TCP reset covers the rest.
            self.stream.try_write(&[b'X', 0, 0, 0, 4]);
        }
    }
}
