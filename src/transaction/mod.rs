// ============================================================================
// Transaction
// ============================================================================
//
// Wraps one driver connection for the lifetime of a session. The connection
// is opened lazily on first prepare. Commit and rollback are no-ops while the
// connection runs in auto-commit mode.
//
// State transitions:
//
//   Idle ──prepare──> Connected ──close──> Closed
//     │                                      ^
//     └──────────────close───────────────────┘
//
// ============================================================================

use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::{DbError, Result};
use crate::driver::{Connection, DataSource, PrepareOptions, Statement};

pub trait Transaction: Send + Sync {
    fn prepare(&self, sql: &str, options: &PrepareOptions) -> Result<Box<dyn Statement>>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    /// Upper bound for statement timeouts, if the transaction has one.
    fn timeout(&self) -> Option<Duration>;
}

enum ConnectionState {
    Idle,
    Connected(Box<dyn Connection>),
    Closed,
}

pub struct DriverTransaction {
    data_source: Arc<dyn DataSource>,
    auto_commit: bool,
    timeout: Option<Duration>,
    state: Mutex<ConnectionState>,
}

impl DriverTransaction {
    pub fn new(data_source: Arc<dyn DataSource>, auto_commit: bool) -> Self {
        Self {
            data_source,
            auto_commit,
            timeout: None,
            state: Mutex::new(ConnectionState::Idle),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock()?;
        if let ConnectionState::Idle = *state {
            debug!("Opening connection (auto_commit={})", self.auto_commit);
            let mut connection = self.data_source.connection()?;
            if connection.auto_commit() != self.auto_commit {
                connection.set_auto_commit(self.auto_commit)?;
            }
            *state = ConnectionState::Connected(connection);
        }
        match &mut *state {
            ConnectionState::Connected(connection) => f(connection.as_mut()),
            _ => Err(DbError::Executor("Transaction is closed".into())),
        }
    }
}

impl Transaction for DriverTransaction {
    fn prepare(&self, sql: &str, options: &PrepareOptions) -> Result<Box<dyn Statement>> {
        self.with_connection(|connection| connection.prepare(sql, options))
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if let ConnectionState::Connected(connection) = &mut *state {
            if !connection.auto_commit() {
                debug!("Committing connection");
                connection.commit()?;
            }
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if let ConnectionState::Connected(connection) = &mut *state {
            if !connection.auto_commit() {
                debug!("Rolling back connection");
                connection.rollback()?;
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if let ConnectionState::Connected(connection) = &mut *state {
            if !connection.auto_commit() {
                if let Err(e) = connection.set_auto_commit(true) {
                    warn!("Error resetting autocommit to true before closing the connection: {}", e);
                }
            }
            connection.close()?;
        }
        *state = ConnectionState::Closed;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Identifies a data source for cache keys and opens transactions on it.
#[derive(Clone)]
pub struct Environment {
    pub id: String,
    pub data_source: Arc<dyn DataSource>,
    pub transaction_timeout: Option<Duration>,
}

impl Environment {
    pub fn new(id: impl Into<String>, data_source: Arc<dyn DataSource>) -> Self {
        Self {
            id: id.into(),
            data_source,
            transaction_timeout: None,
        }
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    pub fn new_transaction(&self, auto_commit: bool) -> Arc<dyn Transaction> {
        let mut transaction = DriverTransaction::new(self.data_source.clone(), auto_commit);
        if let Some(timeout) = self.transaction_timeout {
            transaction = transaction.with_timeout(timeout);
        }
        Arc::new(transaction)
    }
}
