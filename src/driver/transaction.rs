//! Transaction control.
//!
//! Plain simple-query verbs. With autocommit on, all of these are no-ops
//! (the server runs each statement in its own transaction). The transaction
//! status itself always comes from ReadyForQuery, never from guessing.

use super::connection::Connection;
use crate::error::{PgError, PgResult};
use crate::protocol::TransactionStatus;

impl Connection {
    /// Open a transaction block. No-op when autocommit is on or a block is
    /// already open.
    pub async fn begin(&mut self) -> PgResult<()> {
        if self.autocommit || self.in_transaction() {
            return Ok(());
        }
        self.simple_query("BEGIN").await.map(|_| ())
    }

    /// Commit the current transaction. Fails locally once the transaction
    /// is in the failed state; only rollback leaves it.
    pub async fn commit(&mut self) -> PgResult<()> {
        if self.autocommit {
            return Ok(());
        }
        if self.tx_status == TransactionStatus::Failed {
            return Err(PgError::InFailedTransaction);
        }
        self.simple_query("COMMIT").await.map(|_| ())
    }

    /// Roll back the current transaction. Permitted in every transaction
    /// state, including failed.
    pub async fn rollback(&mut self) -> PgResult<()> {
        if self.autocommit {
            return Ok(());
        }
        self.simple_query("ROLLBACK").await.map(|_| ())
    }

    /// Create a named savepoint within the current transaction.
    pub async fn savepoint(&mut self, name: &str) -> PgResult<()> {
        self.simple_query(&format!("SAVEPOINT {}", name)).await.map(|_| ())
    }

    /// Roll back to a savepoint, keeping the transaction open.
    pub async fn rollback_to(&mut self, name: &str) -> PgResult<()> {
        self.simple_query(&format!("ROLLBACK TO SAVEPOINT {}", name)).await.map(|_| ())
    }

    /// Release a savepoint once it is no longer needed.
    pub async fn release_savepoint(&mut self, name: &str) -> PgResult<()> {
        self.simple_query(&format!("RELEASE SAVEPOINT {}", name)).await.map(|_| ())
    }
}
