//! Compiler for the ort declarative schema language.
//!
//! An ort configuration describes relational data: structures with typed
//! fields, references, and constraints; enumerations and bitfields; a
//! hierarchical role model; and named queries, inserts, updates, and
//! deletes. From one parsed and linked [`Config`] this crate emits SQLite
//! DDL, a role-scoped audit report, C data-model bindings, and — given a
//! second configuration — a structural diff reduced to safe migration DDL.
//!
//! The pipeline is strictly `parse → link → emit`, single-threaded, with
//! every emitter producing output that is a deterministic function of the
//! configuration (and, for audits, the selected role).

pub mod audit;
pub mod config;
pub mod diag;
pub mod diff;
pub mod lang_c;
pub mod parser;
pub mod sql;
pub mod sqldiff;

pub use config::Config;
pub use parser::{parse_config, parse_link};

/// Pipeline failure. Details are queued on the config's diagnostics; this
/// type only says which stage gave up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} parse error(s)")]
    Parse(usize),
    #[error("{0} link error(s)")]
    Link(usize),
    #[error("roles not enabled")]
    RolesNotEnabled,
    #[error("role not found: {0}")]
    RoleNotFound(String),
    #[error("migration blocked by {0} error(s)")]
    Migration(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
