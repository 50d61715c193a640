//! Query execution: the simple and extended protocol paths.
//!
//! Both paths share one discipline: after flushing a request the connection
//! is Busy, every incoming message is dispatched in order, asynchronous
//! messages (ParameterStatus, NoticeResponse, NotificationResponse) are
//! routed out of band, and the response ends only at ReadyForQuery. A
//! server error is captured and the stream drained to ReadyForQuery before
//! it is raised, so the connection comes back usable (with the transaction
//! failed, as the status byte reports).

use std::collections::VecDeque;
use std::sync::Arc;

use super::connection::{Connection, Notification};
use super::statement::{PreparedStatement, StatementKey};
use super::{ColumnInfo, Row};
use crate::error::{PgError, PgResult};
use crate::protocol::{BackendMessage, FieldDescription, PgEncoder};
use crate::types::{Format, Value};

/// Everything one execute produced.
pub(crate) struct QueryOutcome {
    pub rows: VecDeque<Row>,
    pub columns: Vec<FieldDescription>,
    /// Rows affected, accumulated across multi-statement strings. `None`
    /// when no completion tag carried a count.
    pub rows_affected: Option<u64>,
    /// OID from a single-row `INSERT` tag, when the server still reports one.
    pub inserted_oid: Option<u32>,
}

impl QueryOutcome {
    fn new() -> Self {
        Self { rows: VecDeque::new(), columns: Vec::new(), rows_affected: None, inserted_oid: None }
    }

    /// Fold a CommandComplete tag into the running totals.
    fn absorb_tag(&mut self, tag: &str) {
        let parts: Vec<&str> = tag.split_whitespace().collect();
        match parts.first().copied() {
            Some("INSERT") => {
                if let Some(oid) = parts.get(1).and_then(|s| s.parse::<u32>().ok()) {
                    if oid != 0 {
                        self.inserted_oid = Some(oid);
                    }
                }
                self.add_rows(parts.last().and_then(|s| s.parse().ok()));
            }
            Some("UPDATE") | Some("DELETE") | Some("SELECT") | Some("MOVE") | Some("FETCH")
            | Some("COPY") => {
                self.add_rows(parts.last().and_then(|s| s.parse().ok()));
            }
            _ => {}
        }
    }

    fn add_rows(&mut self, count: Option<u64>) {
        if let Some(count) = count {
            self.rows_affected = Some(self.rows_affected.unwrap_or(0) + count);
        }
    }
}

impl Connection {
    /// Next message with asynchronous traffic routed out: parameter updates
    /// applied, notices dispatched, notifications buffered.
    pub(crate) async fn next_message(&mut self) -> PgResult<BackendMessage> {
        loop {
            match self.recv().await? {
                BackendMessage::ParameterStatus { name, value } => self.apply_parameter(name, value),
                BackendMessage::NoticeResponse(notice) => self.dispatch_notice(notice),
                BackendMessage::NotificationResponse { process_id, channel, payload } => {
                    self.push_notification(Notification { process_id, channel, payload })
                }
                message => return Ok(message),
            }
        }
    }

    /// Discard everything through the next ReadyForQuery. This is the
    /// DrainingToSync state; the server ignores messages between an error
    /// and the next Sync, and so do we.
    pub(crate) async fn drain_until_ready(&mut self) -> PgResult<()> {
        loop {
            if let BackendMessage::ReadyForQuery(status) = self.next_message().await? {
                self.observe_ready(status);
                return Ok(());
            }
        }
    }

    fn decode_row(
        &self,
        fields: &[FieldDescription],
        formats: &[Format],
        info: &Arc<ColumnInfo>,
        cols: Vec<Option<Vec<u8>>>,
    ) -> PgResult<Row> {
        if cols.len() != fields.len() {
            return Err(PgError::Protocol(format!(
                "DataRow has {} fields, row description has {}",
                cols.len(),
                fields.len()
            )));
        }
        let mut values = Vec::with_capacity(cols.len());
        for (i, col) in cols.into_iter().enumerate() {
            let value = self
                .registry
                .decode(&self.session, fields[i].type_oid, formats[i], col.as_deref())?;
            values.push(value);
        }
        Ok(Row { values, columns: info.clone() })
    }

    /// Route an execute to the right protocol path.
    pub(crate) async fn run_query(&mut self, sql: &str, params: &[Value]) -> PgResult<QueryOutcome> {
        if params.is_empty() {
            self.simple_query(sql).await
        } else {
            self.extended_query(sql, params).await
        }
    }

    /// Simple-query protocol: one `Query` message, possibly several
    /// RowDescription/DataRow/CommandComplete cycles for multi-statement
    /// strings, ending in ReadyForQuery.
    pub(crate) async fn simple_query(&mut self, sql: &str) -> PgResult<QueryOutcome> {
        self.begin_request()?;
        PgEncoder::query_to(&mut self.write_buf, sql);
        self.flush().await?;

        let mut out = QueryOutcome::new();
        let mut fields: Vec<FieldDescription> = Vec::new();
        let mut formats: Vec<Format> = Vec::new();
        let mut info = Arc::new(ColumnInfo::from_fields(&[]));
        let mut failure: Option<PgError> = None;

        loop {
            match self.next_message().await? {
                BackendMessage::RowDescription(f) => {
                    match f.iter().map(|fd| Format::from_code(fd.format)).collect() {
                        Ok(parsed) => {
                            formats = parsed;
                            info = Arc::new(ColumnInfo::from_fields(&f));
                            out.columns = f.clone();
                            fields = f;
                        }
                        Err(e) => {
                            if failure.is_none() {
                                failure = Some(PgError::from(e));
                            }
                        }
                    }
                }
                BackendMessage::DataRow(cols) => {
                    if failure.is_none() {
                        match self.decode_row(&fields, &formats, &info, cols) {
                            Ok(row) => out.rows.push_back(row),
                            Err(e) => failure = Some(e),
                        }
                    }
                }
                BackendMessage::CommandComplete(tag) => out.absorb_tag(&tag),
                BackendMessage::EmptyQueryResponse => out.add_rows(Some(0)),
                BackendMessage::ErrorResponse(e) => {
                    if failure.is_none() {
                        failure = Some(e.into());
                    }
                }
                BackendMessage::CopyInResponse => {
                    // Refuse so neither side ends up waiting on the other.
                    PgEncoder::copy_fail_to(&mut self.write_buf, "COPY is not supported");
                    self.flush().await?;
                }
                BackendMessage::CopyOutResponse
                | BackendMessage::CopyData(_)
                | BackendMessage::CopyDone => {}
                BackendMessage::ReadyForQuery(status) => {
                    self.observe_ready(status);
                    return match failure {
                        Some(e) => Err(e),
                        None => Ok(out),
                    };
                }
                other => {
                    if failure.is_none() {
                        failure = Some(PgError::Protocol(format!(
                            "unexpected message '{}' in simple-query response",
                            other.tag()
                        )));
                    }
                }
            }
        }
    }

    /// Extended-query protocol: prepare (with caching), then one
    /// Bind/Execute/Close/Sync flush.
    pub(crate) async fn extended_query(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> PgResult<QueryOutcome> {
        let mut param_oids = Vec::with_capacity(params.len());
        let mut param_formats = Vec::with_capacity(params.len());
        let mut param_values = Vec::with_capacity(params.len());
        for value in params {
            let declared = value.infer_oid()?;
            let (_, format, bytes) = value.encode(&self.session)?;
            param_oids.push(declared);
            param_formats.push(format.code());
            param_values.push(bytes);
        }

        let statement = self.prepare(sql, &param_oids).await?;
        self.run_bound(&statement, &param_formats, &param_values).await
    }

    /// Look up or create the prepared statement for `(sql, param_oids)`.
    ///
    /// A miss allocates a fresh name from the monotonic counter and runs
    /// Parse + Describe(Statement) + Sync, reading ParseComplete,
    /// ParameterDescription, RowDescription-or-NoData, ReadyForQuery.
    pub(crate) async fn prepare(
        &mut self,
        sql: &str,
        param_oids: &[u32],
    ) -> PgResult<Arc<PreparedStatement>> {
        let key = StatementKey { sql: sql.to_string(), param_oids: param_oids.to_vec() };
        if let Some(statement) = self.statements.get(&key) {
            return Ok(statement);
        }

        let name = format!("pgl_s{}", self.next_statement_id);
        self.next_statement_id += 1;

        self.begin_request()?;
        PgEncoder::parse_to(&mut self.write_buf, &name, sql, param_oids);
        PgEncoder::describe_to(&mut self.write_buf, false, &name);
        PgEncoder::sync_to(&mut self.write_buf);
        self.flush().await?;

        #[derive(Clone, Copy, PartialEq)]
        enum Phase {
            AwaitingParseComplete,
            AwaitingParameterDescription,
            AwaitingRowDescription,
            Done,
        }
        let mut phase = Phase::AwaitingParseComplete;
        let mut server_oids: Vec<u32> = Vec::new();
        let mut columns: Vec<FieldDescription> = Vec::new();
        let mut failure: Option<PgError> = None;

        loop {
            let message = self.next_message().await?;
            if failure.is_some() {
                if let BackendMessage::ReadyForQuery(status) = message {
                    self.observe_ready(status);
                    break;
                }
                continue;
            }
            match message {
                BackendMessage::ParseComplete if phase == Phase::AwaitingParseComplete => {
                    phase = Phase::AwaitingParameterDescription;
                }
                BackendMessage::ParameterDescription(oids)
                    if phase == Phase::AwaitingParameterDescription =>
                {
                    server_oids = oids;
                    phase = Phase::AwaitingRowDescription;
                }
                BackendMessage::RowDescription(f) if phase == Phase::AwaitingRowDescription => {
                    columns = f;
                    phase = Phase::Done;
                }
                BackendMessage::NoData if phase == Phase::AwaitingRowDescription => {
                    phase = Phase::Done;
                }
                BackendMessage::ErrorResponse(e) => failure = Some(e.into()),
                BackendMessage::ReadyForQuery(status) => {
                    self.observe_ready(status);
                    break;
                }
                other => {
                    failure = Some(PgError::Protocol(format!(
                        "unexpected message '{}' while preparing",
                        other.tag()
                    )));
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if phase != Phase::Done {
            return Err(PgError::Protocol("prepare ended before describe completed".to_string()));
        }

        // The server's view of the parameter types wins; mismatches mean it
        // resolved our `unknown` declarations.
        let statement = Arc::new(PreparedStatement {
            name,
            sql: sql.to_string(),
            param_oids: if server_oids.is_empty() { param_oids.to_vec() } else { server_oids },
            columns,
        });
        tracing::debug!(statement = %statement.name, cached = self.statements.len(), "prepared");

        if let Some(evicted) = self.statements.insert(key, statement.clone()) {
            self.close_statement(&evicted).await?;
        }
        Ok(statement)
    }

    /// Free an evicted statement's server-side resources.
    async fn close_statement(&mut self, statement: &PreparedStatement) -> PgResult<()> {
        tracing::debug!(statement = %statement.name, "closing evicted statement");
        self.begin_request()?;
        PgEncoder::close_to(&mut self.write_buf, false, &statement.name);
        PgEncoder::sync_to(&mut self.write_buf);
        self.flush().await?;

        let mut failure: Option<PgError> = None;
        loop {
            match self.next_message().await? {
                BackendMessage::CloseComplete => {}
                BackendMessage::ErrorResponse(e) => {
                    if failure.is_none() {
                        failure = Some(e.into());
                    }
                }
                BackendMessage::ReadyForQuery(status) => {
                    self.observe_ready(status);
                    break;
                }
                _ => {}
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// One execute round trip against a prepared statement, flushed as a
    /// single Bind + Execute + Close(Portal) + Sync sequence.
    pub(crate) async fn run_bound(
        &mut self,
        statement: &PreparedStatement,
        param_formats: &[i16],
        param_values: &[Option<Vec<u8>>],
    ) -> PgResult<QueryOutcome> {
        let result_formats: Vec<Format> = statement
            .columns
            .iter()
            .map(|c| self.registry.preferred_format(c.type_oid))
            .collect();
        let result_codes: Vec<i16> = result_formats.iter().map(|f| f.code()).collect();

        self.begin_request()?;
        PgEncoder::bind_to(
            &mut self.write_buf,
            "",
            &statement.name,
            param_formats,
            param_values,
            &result_codes,
        );
        PgEncoder::execute_to(&mut self.write_buf, "", 0);
        PgEncoder::close_to(&mut self.write_buf, true, "");
        PgEncoder::sync_to(&mut self.write_buf);
        self.flush().await?;

        let info = Arc::new(ColumnInfo::from_fields(&statement.columns));
        let mut out = QueryOutcome::new();
        out.columns = statement.columns.clone();
        let mut bound = false;
        let mut failure: Option<PgError> = None;

        loop {
            match self.next_message().await? {
                BackendMessage::BindComplete => bound = true,
                BackendMessage::DataRow(cols) => {
                    if failure.is_none() {
                        if !bound {
                            failure = Some(PgError::Protocol(
                                "DataRow before BindComplete".to_string(),
                            ));
                        } else {
                            match self.decode_row(&statement.columns, &result_formats, &info, cols)
                            {
                                Ok(row) => out.rows.push_back(row),
                                Err(e) => failure = Some(e),
                            }
                        }
                    }
                }
                BackendMessage::CommandComplete(tag) => out.absorb_tag(&tag),
                BackendMessage::EmptyQueryResponse => out.add_rows(Some(0)),
                // Row limit 0 never suspends a portal; tolerate it anyway.
                BackendMessage::PortalSuspended => {}
                BackendMessage::CloseComplete => {}
                BackendMessage::ErrorResponse(e) => {
                    if failure.is_none() {
                        failure = Some(e.into());
                    }
                }
                BackendMessage::CopyInResponse => {
                    PgEncoder::copy_fail_to(&mut self.write_buf, "COPY is not supported");
                    self.flush().await?;
                }
                BackendMessage::CopyOutResponse
                | BackendMessage::CopyData(_)
                | BackendMessage::CopyDone => {}
                BackendMessage::ReadyForQuery(status) => {
                    self.observe_ready(status);
                    return match failure {
                        Some(e) => Err(e),
                        None => Ok(out),
                    };
                }
                other => {
                    if failure.is_none() {
                        failure = Some(PgError::Protocol(format!(
                            "unexpected message '{}' in execute response",
                            other.tag()
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tag_parsing() {
        let mut out = QueryOutcome::new();
        out.absorb_tag("INSERT 0 1");
        assert_eq!(out.rows_affected, Some(1));
        assert_eq!(out.inserted_oid, None);

        let mut out = QueryOutcome::new();
        out.absorb_tag("INSERT 16999 1");
        assert_eq!(out.inserted_oid, Some(16999));
        assert_eq!(out.rows_affected, Some(1));

        let mut out = QueryOutcome::new();
        out.absorb_tag("UPDATE 42");
        out.absorb_tag("DELETE 8");
        assert_eq!(out.rows_affected, Some(50));

        let mut out = QueryOutcome::new();
        out.absorb_tag("SELECT 3");
        assert_eq!(out.rows_affected, Some(3));

        let mut out = QueryOutcome::new();
        out.absorb_tag("CREATE TABLE");
        assert_eq!(out.rows_affected, None);

        let mut out = QueryOutcome::new();
        out.absorb_tag("FETCH 100");
        out.absorb_tag("MOVE 1");
        assert_eq!(out.rows_affected, Some(101));
    }
}
