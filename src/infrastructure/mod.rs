//! Infrastructure adapters: concrete implementations of the ports for
//! Oracle (probe, splitter, reader), SQLite (metadata gateway), and CSV
//! (record writer).

pub mod csv;
pub mod oracle;
pub mod sqlite;
