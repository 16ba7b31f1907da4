//! Connection management for the Oracle source.
//!
//! Every session handed to the pool is normalized for text extraction
//! before use: the engine ships numbers, dates, and timestamps as text, so
//! the numeric decimal separator is pinned at the session level. Without
//! this, a server configured for a comma-decimal territory would corrupt
//! every numeric field in the artifacts.

use crate::domain::errors::Result;
use log::debug;
use oracle::{Connection, Error};
use r2d2::{ManageConnection, Pool};
use std::sync::Arc;

/// Decimal and group separators the textual rendering relies on.
const SQL_SESSION_NUMERIC: &str = "ALTER SESSION SET NLS_NUMERIC_CHARACTERS = '.,'";

/// Teaches `r2d2` how to open, normalize, and health-check source
/// sessions.
///
/// `Debug` is implemented by hand so the password can never leak into logs
/// or panic output.
#[derive(Clone)]
pub struct SourceConnectionManager {
    user: String,
    pass: String,
    conn_str: String,
}

impl SourceConnectionManager {
    /// `conn_str` is an Easy Connect string (`host:port/service`) or TNS
    /// alias.
    pub fn new(user: &str, pass: &str, conn_str: &str) -> Self {
        Self {
            user: user.to_string(),
            pass: pass.to_string(),
            conn_str: conn_str.to_string(),
        }
    }

    /// Sessions needed for the worst-case fan-out: every chunk worker of
    /// every in-flight table holds one, plus headroom for planner and
    /// dictionary traffic so metadata reads never queue behind chunk
    /// cursors.
    pub fn pool_size(table_concurrency: usize, chunk_concurrency: usize) -> u32 {
        let fan_out = (table_concurrency * chunk_concurrency).max(num_cpus::get());
        (fan_out + 2) as u32
    }

    /// Builds the shared pool sized by `pool_size`.
    pub fn build_pool(
        self,
        table_concurrency: usize,
        chunk_concurrency: usize,
    ) -> Result<Arc<Pool<SourceConnectionManager>>> {
        let size = Self::pool_size(table_concurrency, chunk_concurrency);
        debug!("source pool sized at {} sessions", size);
        let pool = Pool::builder().max_size(size).build(self)?;
        Ok(Arc::new(pool))
    }
}

impl std::fmt::Debug for SourceConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConnectionManager")
            .field("user", &self.user)
            .field("pass", &"*****")
            .field("conn_str", &self.conn_str)
            .finish()
    }
}

impl ManageConnection for SourceConnectionManager {
    type Connection = Connection;
    type Error = Error;

    /// Opens a session and pins the NLS numeric separators the textual
    /// extraction depends on.
    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let conn = Connection::connect(&self.user, &self.pass, &self.conn_str)?;
        conn.execute(SQL_SESSION_NUMERIC, &[])?;
        Ok(conn)
    }

    /// Lightweight ping on checkout so stale sessions are replaced instead
    /// of surfacing as chunk failures.
    fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.ping()
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_covers_full_fan_out_plus_headroom() {
        let cores = num_cpus::get() as u32;
        // fan-out dominates when it exceeds the core count
        assert_eq!(
            SourceConnectionManager::pool_size(8, 64),
            8 * 64 + 2
        );
        // tiny fan-outs still get a core-sized pool
        assert_eq!(SourceConnectionManager::pool_size(1, 1), cores + 2);
    }

    #[test]
    fn debug_output_masks_the_password() {
        let manager = SourceConnectionManager::new("app", "s3cret", "db:1521/ORCL");
        let rendered = format!("{:?}", manager);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("*****"));
    }
}
