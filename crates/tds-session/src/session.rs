//! The session: login, request dispatch and response iteration.

use bytes::Bytes;
use encoding_rs::Encoding;
use tds_codec::{CancelHandle, Connection};
use tds_values::SqlValue;
use tds_wire::collation::Collation;
use tds_wire::data::Parameter;
use tds_wire::diag::{Diagnostic, DiagnosticChain};
use tds_wire::login::{self, encryption};
use tds_wire::ntlm;
use tds_wire::packet::PacketType;
use tds_wire::request::{self, SqlRequest};
use tds_wire::token::{ColumnDescriptor, EnvChange, ResponseCursor, TokenResult};
use tds_wire::version::{ServerKind, TdsVersion};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::config::{PrepareStrategy, SessionConfig};
use crate::error::{Error, Result};

/// One event pulled from the current response.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new result set begins with these columns.
    ResultSet(Vec<ColumnDescriptor>),
    /// A data row of the current result set.
    Row(Vec<SqlValue>),
    /// A statement completed.
    Done {
        /// Affected-row count, when the server reported a valid one.
        count: Option<i64>,
        /// The statement failed; details are in the diagnostics chain.
        error: bool,
        /// This completion acknowledges a cancellation.
        cancelled: bool,
        /// More results follow in this response.
        more: bool,
    },
    /// An informational server message (errors go to the diagnostics
    /// chain instead).
    Info(Diagnostic),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// An output parameter value.
    OutputParam {
        /// Parameter name as reported, may be empty.
        name: String,
        /// Decoded value.
        value: SqlValue,
    },
}

/// Per-statement outcome of a batch execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The statement completed; the count is present when the server
    /// reported a meaningful one.
    Completed(Option<i64>),
    /// The statement failed.
    Failed,
}

/// A statement prepared for repeated execution.
///
/// The representation depends on the strategy and on what the server
/// accepted: a temporary procedure name, an `sp_prepare` handle, or the
/// bare statement re-submitted through the parameterized path each time.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    sql: String,
    kind: PreparedKind,
}

#[derive(Debug, Clone)]
enum PreparedKind {
    Literal,
    Statement,
    Procedure(String),
    Handle(i32),
}

impl PreparedStatement {
    /// The original statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Whether the server holds state for this statement.
    #[must_use]
    pub fn is_server_side(&self) -> bool {
        matches!(
            self.kind,
            PreparedKind::Procedure(_) | PreparedKind::Handle(_)
        )
    }
}

/// A live TDS session over some byte transport.
///
/// Requests and responses strictly alternate: [`Session::execute`] drains
/// whatever is left of the previous response before sending. The response
/// is consumed incrementally through [`Session::next_event`].
pub struct Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    conn: Connection<T>,
    config: SessionConfig,
    version: TdsVersion,
    server: ServerKind,
    encoding: &'static Encoding,
    collation: Collation,
    database: String,
    product: Option<String>,
    capabilities: Option<Bytes>,

    cursor: Option<ResponseCursor>,
    diagnostics: DiagnosticChain,

    row_count: u64,
    applied_row_count: u64,
    text_size: u64,
    applied_text_size: u64,

    logged_in: bool,
    doomed: bool,
    temp_seq: u32,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a transport in a session. No bytes are exchanged until
    /// [`Session::login`].
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let version = config.version;
        let server = config.server;
        let encoding = encoding_for_charset(&config.charset);
        let packet_size = config.effective_packet_size();

        Self {
            conn: Connection::new(transport, packet_size),
            config,
            version,
            server,
            encoding,
            collation: Collation::default(),
            database: String::new(),
            product: None,
            capabilities: None,
            cursor: None,
            diagnostics: DiagnosticChain::new(),
            row_count: 0,
            applied_row_count: 0,
            text_size: 0,
            applied_text_size: 0,
            logged_in: false,
            doomed: false,
            temp_seq: 0,
        }
    }

    /// The negotiated dialect.
    #[must_use]
    pub fn version(&self) -> TdsVersion {
        self.version
    }

    /// The server product family.
    #[must_use]
    pub fn server(&self) -> ServerKind {
        self.server
    }

    /// The current database, as last announced by the server.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The server product name from the login acknowledgement.
    #[must_use]
    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    /// The raw TDS 5.0 capability string announced at login.
    #[must_use]
    pub fn capabilities(&self) -> Option<&[u8]> {
        self.capabilities.as_deref()
    }

    /// The current negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.conn.packet_size()
    }

    /// Columns of the current result set, when one is open.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDescriptor] {
        self.cursor.as_ref().map_or(&[], ResponseCursor::columns)
    }

    /// Diagnostics accumulated since the last request started.
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticChain {
        &self.diagnostics
    }

    /// A handle that cancels the in-progress request from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        self.conn.cancel_handle()
    }

    /// Cap the number of rows the server returns per statement; 0 lifts
    /// the cap. Applied lazily before the next request.
    pub fn set_row_count(&mut self, rows: u64) {
        self.row_count = rows;
    }

    /// Cap the number of bytes the server returns for a LOB column; 0
    /// restores the server default. Applied lazily before the next request.
    pub fn set_text_size(&mut self, bytes: u64) {
        self.text_size = bytes;
    }

    // -- login -------------------------------------------------------------

    /// Run the login handshake for the configured dialect.
    ///
    /// On TDS 8.0 a PreLogin exchange precedes the login record; with a
    /// domain configured the LOGIN7 record carries an NTLM negotiate block
    /// and the server's challenge is answered mid-stream.
    pub async fn login(&mut self) -> Result<()> {
        let limit = self.config.login_timeout;
        match timeout(limit, self.login_exchange()).await {
            Ok(result) => result,
            Err(_) => Err(Error::LoginTimeout),
        }
    }

    async fn login_exchange(&mut self) -> Result<()> {
        self.ensure_usable()?;

        if self.version == TdsVersion::V8_0 {
            self.prelogin().await?;
        }

        let req = self.config.login_request();
        let (packet_type, payload) = login::build_login(&req, self.version, self.encoding)?;
        self.conn.send_message(packet_type, Bytes::from(payload)).await?;

        loop {
            let reply = self
                .conn
                .read_message()
                .await?
                .ok_or(Error::ConnectionClosed)?;
            let mut cursor =
                ResponseCursor::new(reply.payload, self.version, self.server, self.encoding);

            let mut challenge = None;
            while let Some(token) = cursor.next_token()? {
                match token {
                    TokenResult::AuthChallenge(nonce) => challenge = Some(nonce),
                    TokenResult::EnvChange(change) => self.apply_env(change),
                    TokenResult::LoginAck(ack) => {
                        tracing::info!(
                            product = %ack.product,
                            tds_version = ?ack.tds_version,
                            "login acknowledged"
                        );
                        self.product = Some(ack.product);
                    }
                    TokenResult::Capabilities(caps) => self.capabilities = Some(caps),
                    TokenResult::Message(diag) => {
                        if diag.is_error() {
                            self.diagnostics.push(diag);
                        }
                    }
                    _ => {}
                }
            }

            match challenge {
                Some(nonce) => {
                    tracing::debug!("answering NTLM challenge");
                    let answer = ntlm::challenge_response(
                        &self.config.user,
                        &self.config.password,
                        &self.config.domain,
                        &nonce,
                    );
                    self.conn
                        .send_message(PacketType::NtlmAuth, Bytes::from(answer))
                        .await?;
                }
                None => break,
            }
        }

        self.check_errors()?;
        self.logged_in = true;
        Ok(())
    }

    async fn prelogin(&mut self) -> Result<()> {
        let payload = login::build_prelogin();
        self.conn
            .send_message(PacketType::PreLogin, Bytes::from(payload))
            .await?;

        let reply = self
            .conn
            .read_message()
            .await?
            .ok_or(Error::ConnectionClosed)?;
        let response = login::parse_prelogin(&reply.payload)?;

        // This session speaks plain TDS; TLS wrapping is a transport
        // concern handled before the session sees the stream.
        if matches!(response.encryption, encryption::ON | encryption::REQUIRED) {
            return Err(Error::Config("server demands encryption on this endpoint"));
        }

        tracing::debug!(server_version = ?response.version, "prelogin complete");
        Ok(())
    }

    // -- request dispatch --------------------------------------------------

    /// Submit a request and position the session at the start of its
    /// response. Any unread remainder of the previous response is drained
    /// first and its diagnostics discarded.
    pub async fn execute(&mut self, req: &mut SqlRequest) -> Result<()> {
        self.ensure_usable()?;
        self.finish_response().await?;
        self.diagnostics = DiagnosticChain::new();
        self.apply_session_settings().await?;

        let (packet_type, payload) = request::build_request(
            req,
            self.version,
            self.server,
            self.collation,
            self.encoding,
        )?;
        self.conn
            .send_message(packet_type, Bytes::from(payload))
            .await?;
        self.await_response().await
    }

    /// Submit a plain batch, drain its whole response and fail on the
    /// first server error.
    pub async fn submit_sql(&mut self, sql: &str) -> Result<()> {
        let mut req = SqlRequest::batch(sql);
        self.execute(&mut req).await?;
        self.finish_response().await?;
        self.check_errors()
    }

    /// Pull the next event from the current response; `None` when the
    /// response is exhausted.
    pub async fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        let Some(mut cursor) = self.cursor.take() else {
            return Ok(None);
        };

        loop {
            let token = match cursor.next_token() {
                Ok(token) => token,
                Err(e) => {
                    // A malformed token stream leaves no way to find the
                    // next boundary.
                    self.doomed = true;
                    return Err(e.into());
                }
            };

            let Some(token) = token else {
                return Ok(None);
            };

            let event = match token {
                TokenResult::Columns(columns) => Some(SessionEvent::ResultSet(columns)),
                TokenResult::Row(values) => Some(SessionEvent::Row(values)),
                TokenResult::Done(done) => {
                    if done.cancelled {
                        self.conn.cancel_acknowledged();
                    }
                    Some(SessionEvent::Done {
                        count: done.count,
                        error: done.error,
                        cancelled: done.cancelled,
                        more: done.more_results,
                    })
                }
                TokenResult::Message(diag) => {
                    if diag.is_error() {
                        if diag.is_fatal() {
                            tracing::error!(%diag, "fatal server error; dooming session");
                            self.doomed = true;
                        }
                        self.diagnostics.push(diag);
                        None
                    } else {
                        Some(SessionEvent::Info(diag))
                    }
                }
                TokenResult::EnvChange(change) => {
                    self.apply_env(change);
                    None
                }
                TokenResult::ReturnStatus(status) => Some(SessionEvent::ReturnStatus(status)),
                TokenResult::OutputParam { name, value } => {
                    Some(SessionEvent::OutputParam { name, value })
                }
                TokenResult::LoginAck(_) => None,
                TokenResult::Capabilities(caps) => {
                    self.capabilities = Some(caps);
                    None
                }
                TokenResult::AuthChallenge(_) => {
                    self.doomed = true;
                    return Err(Error::Connection(
                        "authentication challenge outside the login sequence".to_owned(),
                    ));
                }
            };

            if let Some(event) = event {
                self.cursor = Some(cursor);
                return Ok(Some(event));
            }
        }
    }

    /// Drain whatever remains of the current response.
    pub async fn finish_response(&mut self) -> Result<()> {
        while self.next_event().await?.is_some() {}
        Ok(())
    }

    /// Fail with the first error diagnostic of the current response, if
    /// any, clearing the chain.
    pub fn check_errors(&mut self) -> Result<()> {
        if let Some(first) = self.diagnostics.first_error().cloned() {
            self.diagnostics = DiagnosticChain::new();
            return Err(Error::Server(first));
        }
        Ok(())
    }

    async fn await_response(&mut self) -> Result<()> {
        let read = match self.config.command_timeout {
            Some(limit) => match timeout(limit, self.conn.read_message()).await {
                Ok(read) => read?,
                Err(_) => {
                    tracing::warn!("request timed out; cancelling");
                    self.cancel().await?;
                    return Err(Error::Timeout);
                }
            },
            None => self.conn.read_message().await?,
        };

        let message = read.ok_or(Error::ConnectionClosed)?;
        self.cursor = Some(ResponseCursor::new(
            message.payload,
            self.version,
            self.server,
            self.encoding,
        ));
        Ok(())
    }

    /// Re-apply the row-count and text-size caps when they changed since
    /// the last request.
    async fn apply_session_settings(&mut self) -> Result<()> {
        if self.row_count != self.applied_row_count {
            let rows = self.row_count;
            self.run_setting(&format!("set rowcount {rows}")).await?;
            self.applied_row_count = rows;
        }
        if self.text_size != self.applied_text_size {
            let bytes = self.text_size;
            self.run_setting(&format!("set textsize {bytes}")).await?;
            self.applied_text_size = bytes;
        }
        Ok(())
    }

    async fn run_setting(&mut self, sql: &str) -> Result<()> {
        let mut req = SqlRequest::batch(sql);
        let (packet_type, payload) = request::build_request(
            &mut req,
            self.version,
            self.server,
            self.collation,
            self.encoding,
        )?;
        self.conn
            .send_message(packet_type, Bytes::from(payload))
            .await?;
        self.await_response().await?;
        self.finish_response().await?;
        self.check_errors()
    }

    fn apply_env(&mut self, change: EnvChange) {
        match change {
            EnvChange::Database { new, old } => {
                tracing::debug!(from = %old, to = %new, "database changed");
                self.database = new;
            }
            EnvChange::PacketSize(size) => self.conn.set_packet_size(size),
            EnvChange::Charset(name) => {
                self.encoding = encoding_for_charset(&name);
                tracing::debug!(charset = %name, "narrow charset changed");
            }
            EnvChange::Collation(collation) => {
                self.encoding = collation.encoding();
                self.collation = collation;
            }
            EnvChange::Language(language) => {
                tracing::debug!(%language, "language changed");
            }
            EnvChange::Locale(_) => {}
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.doomed {
            return Err(Error::Doomed);
        }
        Ok(())
    }

    // -- batches -----------------------------------------------------------

    /// Execute several statements as one batch.
    ///
    /// Sybase continues past failures and every statement gets its real
    /// outcome. SQL Server stops the batch at the first failing statement,
    /// so the outcome list ends with that statement's
    /// [`BatchOutcome::Failed`] and the rest never ran.
    pub async fn execute_batch(&mut self, statements: &[&str]) -> Result<Vec<BatchOutcome>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let sql = statements.join("\n");
        self.execute(&mut SqlRequest::batch(sql)).await?;

        let mut outcomes = Vec::with_capacity(statements.len());
        while let Some(event) = self.next_event().await? {
            let SessionEvent::Done { count, error, .. } = event else {
                continue;
            };
            if outcomes.len() == statements.len() {
                continue;
            }
            if error {
                outcomes.push(BatchOutcome::Failed);
                if self.server == ServerKind::SqlServer {
                    self.finish_response().await?;
                    break;
                }
            } else {
                outcomes.push(BatchOutcome::Completed(count));
            }
        }

        // Failures are reported through the outcomes.
        self.diagnostics = DiagnosticChain::new();
        Ok(outcomes)
    }

    // -- cancellation ------------------------------------------------------

    /// Cancel the in-progress request and drain until the server
    /// acknowledges.
    pub async fn cancel(&mut self) -> Result<()> {
        let handle = self.conn.cancel_handle();
        handle.cancel().await?;

        loop {
            if self.cursor.is_none() {
                match self.conn.read_message().await? {
                    Some(message) => {
                        self.cursor = Some(ResponseCursor::new(
                            message.payload,
                            self.version,
                            self.server,
                            self.encoding,
                        ));
                    }
                    None => {
                        self.conn.cancel_acknowledged();
                        return Err(Error::ConnectionClosed);
                    }
                }
            }
            self.finish_response().await?;
            if !self.conn.is_cancelling() {
                break;
            }
        }

        // The cancellation notice is expected, not an error to surface.
        self.diagnostics = DiagnosticChain::new();
        Ok(())
    }

    // -- preparation -------------------------------------------------------

    /// Prepare a statement under the configured strategy.
    ///
    /// Strategies degrade gracefully: when the server rejects the prepare
    /// (or the statement is unpreparable, such as text/image parameters
    /// on TDS 5.0), the statement falls back to per-execution
    /// parameterized submission.
    pub async fn prepare(&mut self, sql: &str, params: &mut [Parameter]) -> Result<PreparedStatement> {
        self.ensure_usable()?;
        for param in params.iter_mut() {
            param.resolve(self.version)?;
        }

        let kind = match self.config.prepare {
            PrepareStrategy::Literal => PreparedKind::Literal,
            PrepareStrategy::Unprepared => PreparedKind::Statement,
            PrepareStrategy::TemporaryProcedure => {
                let name = self.temp_name();
                let create = request::prepare_proc_sql(sql, &name, params)?;
                match self.submit_sql(&create).await {
                    Ok(()) => PreparedKind::Procedure(name),
                    Err(Error::Server(diag)) => {
                        tracing::debug!(%diag, "prepare rejected; falling back");
                        PreparedKind::Statement
                    }
                    Err(e) => return Err(e),
                }
            }
            PrepareStrategy::Dynamic => self.prepare_dynamic(sql, params).await?,
            PrepareStrategy::Handle => self.prepare_handle(sql, params).await?,
            PrepareStrategy::PrepareExec => self.prepare_exec(sql, params).await?,
        };

        Ok(PreparedStatement {
            sql: sql.to_owned(),
            kind,
        })
    }

    async fn prepare_dynamic(&mut self, sql: &str, params: &[Parameter]) -> Result<PreparedKind> {
        let name = self.temp_name();
        let Some((packet_type, payload)) =
            request::build_sybase_prepare(sql, &name, params, self.encoding)?
        else {
            return Ok(PreparedKind::Statement);
        };

        self.finish_response().await?;
        self.diagnostics = DiagnosticChain::new();
        self.conn
            .send_message(packet_type, Bytes::from(payload))
            .await?;
        self.await_response().await?;
        self.finish_response().await?;

        match self.check_errors() {
            Ok(()) => Ok(PreparedKind::Procedure(name)),
            Err(Error::Server(diag)) => {
                tracing::debug!(%diag, "dynamic prepare rejected; falling back");
                Ok(PreparedKind::Statement)
            }
            Err(e) => Err(e),
        }
    }

    async fn prepare_handle(&mut self, sql: &str, params: &[Parameter]) -> Result<PreparedKind> {
        let rpc_params = vec![
            Parameter::output(SqlValue::Int(0)).named("@handle"),
            Parameter::input(SqlValue::String(request::param_definition(params)?)),
            Parameter::input(SqlValue::String(request::substitute_param_markers(sql))),
            Parameter::input(SqlValue::Int(1)), // options: return metadata
        ];
        let mut req = SqlRequest::procedure("sp_prepare", rpc_params);
        self.execute(&mut req).await?;

        let mut handle = None;
        while let Some(event) = self.next_event().await? {
            if let SessionEvent::OutputParam { value, .. } = event {
                handle = value.as_i32();
            }
        }

        match self.check_errors() {
            Ok(()) => Ok(handle.map_or(PreparedKind::Statement, PreparedKind::Handle)),
            Err(Error::Server(diag)) => {
                tracing::debug!(%diag, "sp_prepare rejected; falling back");
                Ok(PreparedKind::Statement)
            }
            Err(e) => Err(e),
        }
    }

    /// Prepare and run the first execution in one `sp_prepexec` round trip.
    ///
    /// The preparing execution's results are drained here; callers see
    /// them again on the next [`Session::execute_prepared`].
    async fn prepare_exec(&mut self, sql: &str, params: &[Parameter]) -> Result<PreparedKind> {
        let mut rpc_params = vec![
            Parameter::output(SqlValue::Int(0)).named("@handle"),
            Parameter::input(SqlValue::String(request::param_definition(params)?)),
            Parameter::input(SqlValue::String(request::substitute_param_markers(sql))),
        ];
        rpc_params.extend(params.iter().cloned());
        let mut req = SqlRequest::procedure("sp_prepexec", rpc_params);
        self.execute(&mut req).await?;

        let mut handle = None;
        while let Some(event) = self.next_event().await? {
            if let SessionEvent::OutputParam { value, .. } = event {
                handle = value.as_i32();
            }
        }

        match self.check_errors() {
            Ok(()) => Ok(handle.map_or(PreparedKind::Statement, PreparedKind::Handle)),
            Err(Error::Server(diag)) => {
                tracing::debug!(%diag, "sp_prepexec rejected; falling back");
                Ok(PreparedKind::Statement)
            }
            Err(e) => Err(e),
        }
    }

    /// Execute a prepared statement with fresh parameter values.
    pub async fn execute_prepared(
        &mut self,
        stmt: &PreparedStatement,
        params: Vec<Parameter>,
    ) -> Result<()> {
        let mut req = match &stmt.kind {
            PreparedKind::Literal => {
                SqlRequest::batch(request::substitute_params(&stmt.sql, &params, self.version)?)
            }
            PreparedKind::Statement => SqlRequest::with_params(stmt.sql.clone(), params),
            PreparedKind::Procedure(name) => SqlRequest::procedure(name.clone(), params),
            PreparedKind::Handle(handle) => {
                let mut all = Vec::with_capacity(params.len() + 1);
                all.push(Parameter::input(SqlValue::Int(*handle)));
                all.extend(params);
                SqlRequest::procedure("sp_execute", all)
            }
        };
        self.execute(&mut req).await
    }

    /// Release server-side state held by a prepared statement.
    ///
    /// Temporary procedures vanish with the connection and need no
    /// explicit drop; only `sp_prepare` handles are released eagerly.
    pub async fn unprepare(&mut self, stmt: &PreparedStatement) -> Result<()> {
        if let PreparedKind::Handle(handle) = stmt.kind {
            let params = vec![Parameter::input(SqlValue::Int(handle))];
            let mut req = SqlRequest::procedure("sp_unprepare", params);
            self.execute(&mut req).await?;
            self.finish_response().await?;
            // A handle the server already dropped is not worth an error.
            self.diagnostics = DiagnosticChain::new();
        }
        Ok(())
    }

    /// Next temporary object name: 11 characters, leading '#', as the
    /// TDS 5.0 lightweight prepare requires.
    fn temp_name(&mut self) -> String {
        self.temp_seq = self.temp_seq.wrapping_add(1);
        format!("#tds{:07}", self.temp_seq)
    }

    // -- legacy LOB helpers ------------------------------------------------

    /// Read a slice of a text or image column through `readtext`.
    pub async fn read_text(
        &mut self,
        table: &str,
        column: &str,
        text_ptr: &[u8],
        offset: u32,
        length: u32,
    ) -> Result<Option<SqlValue>> {
        if table.is_empty() || column.is_empty() {
            return Err(Error::Config("readtext requires a table and column name"));
        }

        let mut ptr = String::with_capacity(2 + text_ptr.len() * 2);
        ptr.push_str("0x");
        for byte in text_ptr {
            ptr.push_str(&format!("{byte:02x}"));
        }

        let sql = format!("readtext {table}.{column} {ptr} {offset} {length}");
        self.execute(&mut SqlRequest::batch(sql)).await?;

        let mut value = None;
        while let Some(event) = self.next_event().await? {
            if let SessionEvent::Row(mut row) = event {
                if value.is_none() && !row.is_empty() {
                    value = Some(row.remove(0));
                }
            }
        }
        self.check_errors()?;
        Ok(value)
    }

    /// Total length in bytes of a text or image column value.
    pub async fn data_length(&mut self, table: &str, column: &str) -> Result<Option<i64>> {
        let sql = format!("select datalength({column}) from {table}");
        self.execute(&mut SqlRequest::batch(sql)).await?;

        let mut length = None;
        while let Some(event) = self.next_event().await? {
            if let SessionEvent::Row(row) = event {
                if length.is_none() {
                    length = row.first().and_then(SqlValue::as_i64);
                }
            }
        }
        self.check_errors()?;
        Ok(length)
    }

    // -- shutdown ----------------------------------------------------------

    /// Close the session: TDS 5.0 sends its logout token first, then the
    /// write half is shut down.
    pub async fn close(&mut self) -> Result<()> {
        let _ = self.finish_response().await;

        if self.version == TdsVersion::V5_0 && self.logged_in && !self.doomed {
            let (packet_type, payload) = request::build_logout();
            if self
                .conn
                .send_message(packet_type, Bytes::from(payload))
                .await
                .is_ok()
            {
                // Best effort: the server answers with a final completion.
                let _ = self.conn.read_message().await;
            }
        }

        self.logged_in = false;
        self.conn.shutdown().await?;
        Ok(())
    }
}

impl<T> std::fmt::Debug for Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("version", &self.version)
            .field("server", &self.server)
            .field("database", &self.database)
            .field("packet_size", &self.conn.packet_size())
            .field("doomed", &self.doomed)
            .finish_non_exhaustive()
    }
}

/// Map a configured charset name to its encoding.
///
/// Names follow the server-side conventions (`iso_1`, `cp1252`, `utf8`);
/// anything unrecognized falls back to windows-1252, the server default
/// for western installs.
fn encoding_for_charset(name: &str) -> &'static Encoding {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "iso_1" | "iso15" | "ascii_8" => encoding_rs::WINDOWS_1252,
        _ => {
            if let Some(page) = lower.strip_prefix("cp") {
                let label = format!("windows-{page}");
                if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
                    return encoding;
                }
            }
            Encoding::for_label(lower.as_bytes()).unwrap_or(encoding_rs::WINDOWS_1252)
        }
    }
}
