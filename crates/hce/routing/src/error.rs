use thiserror::Error;

/// Errors from routing table packing and controller commits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("routing table overflow: {required} bytes required, capacity {capacity}")]
    Overflow { required: usize, capacity: usize },

    #[error("controller rejected routing update: {0}")]
    Rejected(String),

    #[error("controller unavailable")]
    ControllerUnavailable,
}

pub type Result<T> = std::result::Result<T, RoutingError>;
