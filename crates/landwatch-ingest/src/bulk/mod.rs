//! Bulk geometry loading via an external loader process
//!
//! Large shapefiles reach the raw staging table through `ogr2ogr` rather than
//! row-by-row inserts. The loader is treated as an unreliable collaborator:
//! its output streams are drained and classified line by line, silence beyond
//! the stall window kills it, and a stalled load is retried with a halved
//! transaction group size down to a configured floor.

pub mod adapter;
pub mod classify;
pub mod loader;
pub mod plan;

pub use adapter::{mask_conn_str, pg_conn_str, LoaderCommand, LoaderInvocation, Ogr2OgrCommand};
pub use classify::{classify_line, LineClass};
pub use loader::{GeometryLoader, LoadReport};
pub use plan::{group_size_for, halved};

use thiserror::Error;

/// Failure modes of one bulk-load run.
#[derive(Debug, Error)]
pub enum BulkError {
    /// No output for the whole stall window; the process was killed.
    #[error("loader produced no output for {stalled_secs}s (ran {elapsed_secs}s)")]
    Stalled {
        stalled_secs: u64,
        elapsed_secs: u64,
    },

    /// Hard wall-clock deadline exceeded; the process was killed.
    #[error("loader exceeded the {0}s wall-clock timeout")]
    Timeout(u64),

    /// Clean exit with a non-zero code and no stall detected.
    #[error("loader exited with code {0}")]
    Exit(i32),

    /// No usable loader binary with a PostgreSQL driver was found.
    #[error("geometry loader with PostgreSQL driver not found; set LANDWATCH_OGR2OGR_PATH")]
    LoaderMissing,

    #[error("loader I/O error: {0}")]
    Io(#[from] std::io::Error),
}
