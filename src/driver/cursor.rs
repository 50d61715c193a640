//! The cursor: a per-statement execution and iteration handle.
//!
//! A cursor borrows its connection mutably, so exactly one cursor can hold
//! the executing role at a time. Because executes run with row-limit 0, all
//! rows are buffered before `execute` returns and the fetch methods are
//! pure buffer access.

use std::collections::VecDeque;

use super::connection::Connection;
use super::Row;
use crate::error::{PgError, PgResult};
use crate::protocol::{FieldDescription, TransactionStatus};
use crate::sql::{self, Placeholders};
use crate::types::Value;

pub struct Cursor<'a> {
    conn: &'a mut Connection,
    buffer: VecDeque<Row>,
    columns: Vec<FieldDescription>,
    rows_affected: i64,
    inserted_oid: Option<u32>,
    closed: bool,
    /// Default fetch size for `fetchmany`.
    pub arraysize: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(conn: &'a mut Connection) -> Self {
        Self {
            conn,
            buffer: VecDeque::new(),
            columns: Vec::new(),
            rows_affected: -1,
            inserted_oid: None,
            closed: false,
            arraysize: 1,
        }
    }

    /// Execute a statement with positional parameters.
    ///
    /// The SQL is rewritten from the connection's paramstyle to `$N`
    /// placeholders. Parameter-less statements go down the simple-query
    /// path; parameterized ones use the extended protocol.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> PgResult<()> {
        let rewritten = sql::rewrite(self.conn.config.paramstyle, sql)?;
        let ordered = match rewritten.placeholders {
            Placeholders::Positional(count) => {
                if count != params.len() {
                    return Err(PgError::Interface(format!(
                        "statement takes {} parameters, {} given",
                        count,
                        params.len()
                    )));
                }
                params.to_vec()
            }
            Placeholders::Named(_) => {
                return Err(PgError::Interface(
                    "statement uses named placeholders; call execute_named".to_string(),
                ))
            }
        };
        self.run(&rewritten.sql, ordered).await
    }

    /// Execute a statement whose placeholders are named (`:name` or
    /// `%(name)s` styles). Values are reordered to match the rewritten
    /// `$N` positions; a missing name is an interface error.
    pub async fn execute_named(&mut self, sql: &str, params: &[(&str, Value)]) -> PgResult<()> {
        let rewritten = sql::rewrite(self.conn.config.paramstyle, sql)?;
        let ordered = match &rewritten.placeholders {
            Placeholders::Named(names) => names
                .iter()
                .map(|name| {
                    params
                        .iter()
                        .find(|(key, _)| *key == name.as_str())
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| {
                            PgError::Interface(format!("missing named parameter {:?}", name))
                        })
                })
                .collect::<PgResult<Vec<Value>>>()?,
            Placeholders::Positional(0) => Vec::new(),
            Placeholders::Positional(_) => {
                return Err(PgError::Interface(
                    "statement uses positional placeholders; call execute".to_string(),
                ))
            }
        };
        self.run(&rewritten.sql, ordered).await
    }

    /// Execute the same statement for every parameter set. Rows-affected
    /// accumulates; an unknown count from any set makes the total unknown.
    pub async fn executemany(&mut self, sql: &str, param_sets: &[Vec<Value>]) -> PgResult<()> {
        let mut total: i64 = -1;
        for params in param_sets {
            self.execute(sql, params).await?;
            total = match (total, self.rows_affected) {
                (_, -1) => -1,
                (-1, n) => n,
                (t, n) => t + n,
            };
        }
        self.rows_affected = total;
        Ok(())
    }

    async fn run(&mut self, sql: &str, params: Vec<Value>) -> PgResult<()> {
        if self.closed {
            return Err(PgError::Interface("cursor is closed".to_string()));
        }
        if self.conn.is_closed() {
            return Err(PgError::Interface("connection is closed".to_string()));
        }

        let keyword = sql::first_keyword(sql);
        if self.conn.tx_status == TransactionStatus::Failed
            && keyword != "ROLLBACK"
            && keyword != "ABORT"
        {
            return Err(PgError::InFailedTransaction);
        }

        // Autocommit off: the first statement outside a block opens one.
        if !self.conn.autocommit
            && self.conn.tx_status == TransactionStatus::Idle
            && !sql::is_transaction_verb(sql)
        {
            self.conn.simple_query("BEGIN").await?;
        }

        self.buffer.clear();
        self.columns.clear();
        self.rows_affected = -1;
        self.inserted_oid = None;

        let outcome = self.conn.run_query(sql, &params).await?;
        self.buffer = outcome.rows;
        self.columns = outcome.columns;
        self.rows_affected = outcome.rows_affected.map(|n| n as i64).unwrap_or(-1);
        self.inserted_oid = outcome.inserted_oid;
        Ok(())
    }

    /// Next buffered row, or `None` when the result set is exhausted.
    pub fn fetchone(&mut self) -> Option<Row> {
        self.buffer.pop_front()
    }

    /// Up to `size` rows (default: `arraysize`).
    pub fn fetchmany(&mut self, size: Option<usize>) -> Vec<Row> {
        let size = size.unwrap_or(self.arraysize);
        let mut rows = Vec::with_capacity(size.min(self.buffer.len()));
        for _ in 0..size {
            match self.buffer.pop_front() {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        rows
    }

    /// All remaining rows.
    pub fn fetchall(&mut self) -> Vec<Row> {
        self.buffer.drain(..).collect()
    }

    /// Lazy, non-restartable iteration over the remaining rows.
    pub fn rows(&mut self) -> impl Iterator<Item = Row> + use<'_, 'a> {
        std::iter::from_fn(move || self.buffer.pop_front())
    }

    /// Rows affected by the last execute, or -1 when unknown.
    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }

    /// Row OID from a single-row INSERT into a table with OIDs, when the
    /// server reports one.
    pub fn inserted_oid(&self) -> Option<u32> {
        self.inserted_oid
    }

    /// Column (name, type OID) pairs of the last result set, or `None` for
    /// statements that return no rows.
    pub fn description(&self) -> Option<Vec<(String, u32)>> {
        if self.columns.is_empty() {
            return None;
        }
        Some(self.columns.iter().map(|c| (c.name.clone(), c.type_oid)).collect())
    }

    /// Close the cursor. Always succeeds, even when the connection is
    /// already gone; further executes fail.
    pub fn close(&mut self) {
        self.buffer.clear();
        self.columns.clear();
        self.closed = true;
    }
}
