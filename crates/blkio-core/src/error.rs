//! Error types for the host stub.

use std::io;

use thiserror::Error;

use crate::entry::SlotId;

/// Errors surfaced by the host stub.
///
/// Open-time variants (`Handle`, `Mapping`, `RingLayout`, `Config`, `Spawn`)
/// are returned to the caller of `open`. Runtime wait failures (`Wait`) are
/// retried by the polling loop and never escalated.
#[derive(Debug, Error)]
pub enum BlkioError {
    /// The proxy control device could not be opened.
    #[error("proxy device {path}: {source}")]
    Handle {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Waiting for readiness on the proxy handle failed.
    #[error("proxy readiness wait: {0}")]
    Wait(#[source] io::Error),
    /// The done control signal could not be delivered.
    #[error("done signal for slot {id}: {source}")]
    Signal {
        id: SlotId,
        #[source]
        source: io::Error,
    },
    /// Mapping the shared request ring failed.
    #[error("mapping {len} bytes of request ring: {source}")]
    Mapping {
        len: usize,
        #[source]
        source: io::Error,
    },
    /// A mapped slot does not carry its own index as identifier.
    #[error("ring slot {index} carries id {found}")]
    RingLayout { index: u32, found: u32 },
    /// Invalid geometry or stub configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A descriptor could not be turned into a host-level request.
    #[error("request build: {0}")]
    Build(#[from] BuildError),
    /// The request pool had no free item although it is sized to the ring.
    #[error("request pool exhausted")]
    PoolExhausted,
    /// The polling thread could not be started.
    #[error("spawning poller thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Why a block-I/O descriptor was refused by `build_req`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unknown request type {0}")]
    UnknownOp(u32),
    #[error("{0} buffer fragments exceed the descriptor limit")]
    TooManyFragments(u32),
    #[error("empty request")]
    Empty,
    #[error("size {size} sectors does not match {fragments} fragments")]
    SizeMismatch { size: u64, fragments: u32 },
    #[error("fragment {index} is {len} bytes, expected one kernel page")]
    BadFragment { index: usize, len: u32 },
    #[error("request spans {0} logical pages, more than a pool item holds")]
    TooLarge(u64),
    #[error("sector range {offset}+{size} runs past the last sector")]
    Overflow { offset: u64, size: u64 },
}

pub type Result<T> = std::result::Result<T, BlkioError>;
