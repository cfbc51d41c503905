///
/// Environment and connection lifecycle.
///
/// An `Environment` wraps a `Driver` and opens connections; a `Connection`
/// wraps a live `Source` and executes statements. Each parent counts its
/// live children through a shared counter: a child holds a `Lease` that
/// gives its slot back when the child is closed or dropped. A parent
/// refuses to close while its counter is non-zero.
///

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::OdbcConfig;
use crate::cursor::Cursor;
use crate::error::{HandleKind, OdbcError, Result};
use crate::reader::FieldReader;
use crate::source::{Driver, Source, Statement};
use crate::types::ColumnTable;

/// One slot in a parent's live-children count.
#[derive(Debug)]
pub(crate) struct Lease {
    counter: Rc<Cell<usize>>,
}

impl Lease {
    pub(crate) fn acquire(counter: &Rc<Cell<usize>>) -> Self {
        counter.set(counter.get() + 1);
        Self {
            counter: Rc::clone(counter),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.counter.set(self.counter.get().saturating_sub(1));
    }
}

pub struct Environment<D: Driver> {
    driver: D,
    config: OdbcConfig,
    connections: Rc<Cell<usize>>,
    closed: bool,
}

impl<D: Driver> Environment<D> {
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, OdbcConfig::default())
    }

    pub fn with_config(driver: D, config: OdbcConfig) -> Self {
        Self {
            driver,
            config,
            connections: Rc::new(Cell::new(0)),
            closed: false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.get()
    }

    pub fn connect(
        &self,
        target: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Connection<D::Source>> {
        if self.closed {
            return Err(OdbcError::EnvironmentClosed);
        }
        let source = self.driver.connect(target, user, password).map_err(|_| {
            OdbcError::source_failure(HandleKind::Connection, "connect", self.driver.diagnostics())
        })?;
        debug!(dsn = target, "connected");
        Ok(Connection {
            source,
            chunk_size: self.config.chunk_size,
            cursors: Rc::new(Cell::new(0)),
            state: ConnectionState::Open {
                _lease: Lease::acquire(&self.connections),
            },
        })
    }

    /// Closes the environment. Closing twice does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let count = self.connections.get();
        if count > 0 {
            return Err(OdbcError::OpenConnections { count });
        }
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Outcome of executing a statement.
pub enum Execution<S: Statement> {
    /// The statement produced a result set.
    Cursor(Cursor<S>),
    /// Rows affected by a statement without a result set.
    RowCount(i64),
}

impl<S: Statement> Execution<S> {
    pub fn into_cursor(self) -> Option<Cursor<S>> {
        match self {
            Execution::Cursor(cursor) => Some(cursor),
            Execution::RowCount(_) => None,
        }
    }

    pub fn row_count(&self) -> Option<i64> {
        match self {
            Execution::Cursor(_) => None,
            Execution::RowCount(n) => Some(*n),
        }
    }
}

impl<S: Statement> std::fmt::Debug for Execution<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Execution::Cursor(cursor) => f.debug_tuple("Cursor").field(cursor).finish(),
            Execution::RowCount(n) => f.debug_tuple("RowCount").field(n).finish(),
        }
    }
}

enum ConnectionState {
    Open { _lease: Lease },
    Closed,
}

pub struct Connection<S: Source> {
    source: S,
    chunk_size: usize,
    cursors: Rc<Cell<usize>>,
    state: ConnectionState,
}

impl<S: Source> Connection<S> {
    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed)
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.get()
    }

    /// Executes `sql`. Statements that produce result columns yield a
    /// cursor; all others yield the affected row count and release their
    /// statement immediately.
    pub fn execute(&self, sql: &str) -> Result<Execution<S::Statement>> {
        if self.is_closed() {
            return Err(OdbcError::ConnectionClosed);
        }
        let mut statement = self.source.allocate_statement().map_err(|_| {
            OdbcError::source_failure(
                HandleKind::Connection,
                "allocate statement",
                self.source.diagnostics(),
            )
        })?;

        match self.run(&mut statement, sql) {
            Ok(Some(columns)) => Ok(Execution::Cursor(Cursor::new(
                statement,
                columns,
                FieldReader::new(self.chunk_size),
                Lease::acquire(&self.cursors),
            ))),
            Ok(None) => {
                let count = statement.row_count().map_err(|_| {
                    OdbcError::source_failure(
                        HandleKind::Statement,
                        "row count",
                        statement.diagnostics(),
                    )
                });
                discard(&mut statement);
                count.map(Execution::RowCount)
            }
            Err(e) => {
                discard(&mut statement);
                Err(e)
            }
        }
    }

    fn run(&self, statement: &mut S::Statement, sql: &str) -> Result<Option<Arc<ColumnTable>>> {
        statement.execute(sql).map_err(|_| {
            OdbcError::source_failure(HandleKind::Statement, "execute", statement.diagnostics())
        })?;
        let count = statement.num_result_columns().map_err(|_| {
            OdbcError::source_failure(
                HandleKind::Statement,
                "count result columns",
                statement.diagnostics(),
            )
        })?;
        if count == 0 {
            return Ok(None);
        }
        ColumnTable::describe(statement, count).map(Some)
    }

    /// Disconnects. Closing twice does nothing; closing with open cursors
    /// is refused.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let count = self.cursors.get();
        if count > 0 {
            return Err(OdbcError::OpenCursors { count });
        }
        self.state = ConnectionState::Closed;
        self.source.disconnect().map_err(|_| {
            OdbcError::source_failure(
                HandleKind::Connection,
                "disconnect",
                self.source.diagnostics(),
            )
        })?;
        debug!("connection closed");
        Ok(())
    }
}

impl<S: Source> Drop for Connection<S> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        let count = self.cursors.get();
        if count > 0 {
            warn!(cursors = count, "connection dropped with open cursors");
        }
        self.state = ConnectionState::Closed;
        if self.source.disconnect().is_err() {
            warn!(diagnostics = ?self.source.diagnostics(), "failed to disconnect on drop");
        }
    }
}

impl<S: Source> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("cursors", &self.cursors.get())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

fn discard<T: Statement>(statement: &mut T) {
    if statement.release().is_err() {
        warn!(diagnostics = ?statement.diagnostics(), "failed to release statement");
    }
}
