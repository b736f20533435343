//! Initialization-time error taxonomy.
//!
//! Only bring-up can fail with a `Result`: once the engine is in steady
//! state, every data-path failure is handled locally by dropping the
//! affected item and logging. See the per-loop modules for the drop
//! policies.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    /// The configuration failed validation before any thread was spawned.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A datastore could not hand out the cells a pool asked for at attach.
    #[error("pool \"{pool}\" under-provisioned: wanted {wanted} cells, datastore had {available}")]
    PoolExhausted {
        pool: &'static str,
        wanted: usize,
        available: usize,
    },

    /// Pinning a role thread to its configured CPU failed.
    #[error("failed to pin {role} to cpu {cpu}: {source}")]
    Pin {
        role: &'static str,
        cpu: usize,
        source: nix::Error,
    },

    /// The OS refused to spawn one of the role threads.
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: &'static str,
        source: std::io::Error,
    },

    /// A role thread died before reporting ready.
    #[error("{role} thread exited during bring-up")]
    BringUp { role: &'static str },
}
