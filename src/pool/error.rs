use std::time::Duration;
use thiserror::Error;

use super::naming::NameError;
use crate::docker::ContainerState;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("limit of created containers exceeded: {current} exist, limit is {limit}")]
    CapacityExceeded { limit: usize, current: usize },

    #[error("wrong bitbucket version: {0:?}")]
    InvalidVersion(String),

    #[error(transparent)]
    Decode(#[from] NameError),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container {id} is still starting after {waited:?}")]
    StillStarting { id: String, waited: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("container {id} is {state}, refusing to remove it")]
    UnexpectedState { id: String, state: ContainerState },

    #[error("{context}: {cause:#}")]
    Collaborator {
        context: String,
        cause: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, PoolError>;

/// Attaches operation context to a runtime or application failure.
pub(crate) trait CollaboratorContext<T> {
    fn collaborator(self, context: impl Into<String>) -> Result<T>;

    fn with_collaborator<C, F>(self, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> CollaboratorContext<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn collaborator(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|cause| PoolError::Collaborator {
            context: context.into(),
            cause: cause.into(),
        })
    }

    fn with_collaborator<C, F>(self, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|cause| PoolError::Collaborator {
            context: context().into(),
            cause: cause.into(),
        })
    }
}
