// reql-driver - RethinkDB client driver
// Query terms, wire protocol, connections and cursors

#![warn(rust_2018_idioms)]

pub mod error;
pub mod network;
pub mod reql;

// Re-exports for convenience
pub use error::{ReqlError, Result};
pub use network::{
    BlockingConnection, Connection, ConnectionOptions, Cursor, QueryOutput, RunOptions,
};
pub use reql::{Datum, Reql, Term};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }
}
