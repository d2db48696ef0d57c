use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::pool::PoolManager;

pub mod member;

pub use member::{Member, MemberStatus};

// Application state
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<PoolManager>,
    /// Process-wide token; provisioning started by a request runs under a child of it.
    pub cancel: CancellationToken,
}
