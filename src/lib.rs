//! pglane: a PostgreSQL client driver speaking the Frontend/Backend wire
//! protocol (version 3) over TCP, TLS, or Unix domain sockets.
//!
//! The crate is built leaf-first: a wire codec frames and parses typed
//! messages, an OID-keyed type registry marshals values between the wire's
//! per-type binary/text encodings and [`Value`]s, the authenticator answers
//! cleartext and MD5 handshakes, and the query engine drives the simple and
//! extended protocol state machines. On top sits a small
//! connection/cursor surface.
//!
//! ```ignore
//! use pglane::{Config, Value};
//!
//! let mut conn = Config::new("app")
//!     .database("app")
//!     .password("secret")
//!     .connect()
//!     .await?;
//!
//! let mut cur = conn.cursor();
//! cur.execute("SELECT name FROM users WHERE id = %s", &[Value::Int4(1)]).await?;
//! if let Some(row) = cur.fetchone() {
//!     println!("{:?}", row.get(0));
//! }
//! drop(cur);
//! conn.commit().await?;
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod sql;
pub mod types;

pub use config::Config;
pub use driver::{CancelToken, ColumnInfo, Connection, Cursor, Notification, PreparedStatement, Row};
pub use error::{DatabaseErrorKind, PgError, PgResult, ServerError};
pub use protocol::{FieldDescription, TransactionStatus};
pub use sql::ParamStyle;
pub use types::{
    Date, Format, Interval, Numeric, SessionParams, Time, Timestamp, TypeRegistry, TypeSpec, Value,
};

impl Config {
    /// Connect with these options. Shorthand for [`Connection::connect`].
    pub async fn connect(self) -> PgResult<Connection> {
        Connection::connect(self).await
    }
}
