//! Session configuration.

use std::time::Duration;

use tds_wire::login::LoginRequest;
use tds_wire::version::{ServerKind, TdsVersion};

/// How parameterized statements are prepared for re-execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrepareStrategy {
    /// No preparation at all: parameter values are substituted into the
    /// statement text as literals and the result goes out as a plain batch.
    Literal,
    /// No server-side preparation; every execution goes through the
    /// dialect's parameterized path (`sp_executesql` on 7.0+).
    #[default]
    Unprepared,
    /// Create a temporary stored procedure wrapping the statement
    /// (SQL Server, all dialects).
    TemporaryProcedure,
    /// `sp_prepare` returning a handle executed with `sp_execute`
    /// (SQL Server, TDS 7.0+).
    Handle,
    /// `sp_prepexec`: prepare and first execution in one round trip,
    /// later executions through `sp_execute` (SQL Server, TDS 7.0+).
    PrepareExec,
    /// Lightweight dynamic statement (Sybase, TDS 5.0).
    Dynamic,
}

/// Everything needed to open and run a session.
///
/// Built with the owning-builder pattern; defaults follow the protocol's
/// conservative choices (narrow charset windows-1252, dialect-dependent
/// packet size, no command timeout).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Protocol dialect to speak.
    pub version: TdsVersion,
    /// Server product family.
    pub server: ServerKind,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// NT domain; non-empty selects NTLM authentication on TDS 7.0+.
    pub domain: String,
    /// Target server name as reported in the login record.
    pub server_name: String,
    /// Initial database.
    pub database: String,
    /// Client host name reported to the server.
    pub host_name: String,
    /// Application name reported to the server.
    pub app_name: String,
    /// Initial language.
    pub language: String,
    /// Narrow character set (legacy dialects).
    pub charset: String,
    /// Requested network packet size; 0 selects the dialect default.
    pub packet_size: usize,
    /// Statement preparation strategy.
    pub prepare: PrepareStrategy,
    /// Login sequence timeout.
    pub login_timeout: Duration,
    /// Per-request timeout; `None` waits indefinitely.
    pub command_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: TdsVersion::V8_0,
            server: ServerKind::SqlServer,
            user: String::new(),
            password: String::new(),
            domain: String::new(),
            server_name: String::new(),
            database: String::new(),
            host_name: String::new(),
            app_name: "rust-tds".to_owned(),
            language: String::new(),
            charset: "iso_1".to_owned(),
            packet_size: 0,
            prepare: PrepareStrategy::default(),
            login_timeout: Duration::from_secs(30),
            command_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Start from defaults.
    #[must_use]
    pub fn new(version: TdsVersion, server: ServerKind) -> Self {
        Self {
            version,
            server,
            ..Self::default()
        }
    }

    /// Set the login credentials.
    #[must_use]
    pub fn credentials(mut self, user: &str, password: &str) -> Self {
        self.user = user.to_owned();
        self.password = password.to_owned();
        self
    }

    /// Select NTLM authentication via a domain.
    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_owned();
        self
    }

    /// Set the target server name.
    #[must_use]
    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = name.to_owned();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_owned();
        self
    }

    /// Set the narrow character set for legacy dialects.
    #[must_use]
    pub fn charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_owned();
        self
    }

    /// Request a network packet size.
    #[must_use]
    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    /// Select the statement preparation strategy.
    #[must_use]
    pub fn prepare_strategy(mut self, strategy: PrepareStrategy) -> Self {
        self.prepare = strategy;
        self
    }

    /// Set a per-request timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// The packet size to open the connection with.
    #[must_use]
    pub fn effective_packet_size(&self) -> usize {
        if self.packet_size == 0 {
            self.version.default_packet_size()
        } else {
            self.packet_size
        }
    }

    /// Assemble the login record for this configuration.
    #[must_use]
    pub fn login_request(&self) -> LoginRequest {
        LoginRequest {
            host_name: self.host_name.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            domain: self.domain.clone(),
            server_name: self.server_name.clone(),
            database: self.database.clone(),
            app_name: self.app_name.clone(),
            lib_name: "rust-tds".to_owned(),
            language: self.language.clone(),
            charset: self.charset.clone(),
            mac_address: String::new(),
            packet_size: self.effective_packet_size(),
        }
    }
}
