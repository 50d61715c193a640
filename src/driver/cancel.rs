//! Out-of-band query cancellation.
//!
//! A CancelRequest travels on its own short-lived transport; the running
//! query on the main connection then fails with SQLSTATE 57014 followed by
//! ReadyForQuery.

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::config::Endpoint;
use crate::error::PgResult;
use crate::protocol::PgEncoder;

/// Handle for cancelling a connection's running query. Detached from the
/// connection, so it can be used from another task while the connection is
/// busy.
#[derive(Debug, Clone)]
pub struct CancelToken {
    pub(crate) endpoint: Endpoint,
    pub(crate) process_id: i32,
    pub(crate) secret_key: i32,
}

impl CancelToken {
    /// Ask the server to cancel. Best effort: the server may have finished
    /// the query already, in which case nothing happens.
    pub async fn cancel(&self) -> PgResult<()> {
        let mut buf = BytesMut::with_capacity(16);
        PgEncoder::cancel_request_to(&mut buf, self.process_id, self.secret_key);
        match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                let mut stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.write_all(&buf).await?;
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let mut stream = UnixStream::connect(path).await?;
                stream.write_all(&buf).await?;
            }
        }
        // The server closes the cancel connection without replying.
        Ok(())
    }
}
