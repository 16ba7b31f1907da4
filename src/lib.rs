//! # Oracle CSV Migrator
//!
//! A resumable, chunk-parallel bulk export engine that drains whole Oracle
//! tables into CSV artifacts laid out predictably on disk, checkpointing
//! every chunk in a metadata store so an interrupted run can resume
//! without re-reading completed chunks.
//!
//! The crate follows a ports-and-adapters layout:
//! - `domain`: entities, errors, and the pure planning helpers.
//! - `ports`: the contracts the core is written against.
//! - `application`: planner, two-level executor, orchestrator.
//! - `infrastructure`: Oracle, SQLite, and CSV adapters.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ports;
