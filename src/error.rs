//! Errors raised while setting up an assignment.

use thiserror::Error;

/// Configuration errors. All of them are detected before any simulation step runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("entry ({row}, {column}) is out of bounds for a {rows}x{columns} matrix")]
    OutOfBounds {
        row: usize,
        column: usize,
        rows: usize,
        columns: usize,
    },
    #[error("got {rows} row indices, {columns} column indices and {values} values")]
    LengthMismatch {
        rows: usize,
        columns: usize,
        values: usize,
    },
    #[error("link {link} references node {node}, but the network only has {tot_nodes} nodes")]
    NodeOutOfRange {
        link: usize,
        node: usize,
        tot_nodes: usize,
    },
    #[error("link {link} has an invalid {attribute} of {value}")]
    InvalidLink {
        link: usize,
        attribute: &'static str,
        value: f64,
    },
    #[error("invalid simulation time: {0}")]
    InvalidTime(String),
    #[error("demand inserted at step {step} does not come after step {previous}")]
    NonMonotonicInsertion { previous: usize, step: usize },
    #[error("node {0} is not a centroid")]
    NotACentroid(usize),
    #[error("demand from centroid {0} to itself")]
    IntraZonalDemand(usize),
    #[error("demand does not match the network: {0}")]
    DemandMismatch(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
