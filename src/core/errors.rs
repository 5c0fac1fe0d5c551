/// Errors surfaced to the callers of the controllers
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum ControllerError {
    #[error("Connection is not initialized")]
    ConnectionNotInitialized,
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    pub(crate) fn unavailable<T: std::fmt::Display>(reason: T) -> Self {
        Self::ResourceUnavailable(reason.to_string())
    }

    pub(crate) fn internal<T: std::fmt::Display>(reason: T) -> Self {
        Self::Internal(reason.to_string())
    }

    /// Finds the controller error in the chain, if any
    pub fn find(error: &anyhow::Error) -> Option<&Self> {
        error.chain().find_map(|e| e.downcast_ref::<Self>())
    }
}

/// Message used to reject all requests which are interrupted by logout or network change
pub const TRY_AGAIN_MESSAGE: &str = "Operation was interrupted. Please, try again";
