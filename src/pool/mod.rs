//! Pool lifecycle: provisioning, allocation and reclamation of application
//! containers. All pool state is encoded in container names, see [`naming`].

pub mod allocator;
pub mod capacity;
pub mod error;
pub mod manager;
pub mod naming;
pub mod provisioner;
pub mod reclaimer;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PoolError, Result};
pub use manager::PoolManager;
