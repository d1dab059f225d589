//! Approver contract and stock implementations.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::request::PermissionRequest;

/// Shared approver handle.
pub type SharedApprover = Arc<dyn Approver>;

/// Presents approval requests to a human (or policy) and returns the
/// decision.
///
/// One implementation per transport: CLI prompt, chat buttons, auto-approve
/// for background agents, always-deny for tests. Implementations that wait
/// on a human must enforce their own timeout and answer `false` on expiry.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Decide a single request.
    async fn approve(&self, request: &PermissionRequest) -> bool;
}

/// Approves everything. Used for background agent runs, where safety comes
/// from the agent's tool allow-list instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprover;

#[async_trait]
impl Approver for AutoApprover {
    async fn approve(&self, _request: &PermissionRequest) -> bool {
        true
    }
}

/// Denies everything. The default for tests and headless contexts with no
/// approver wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllApprover;

#[async_trait]
impl Approver for DenyAllApprover {
    async fn approve(&self, _request: &PermissionRequest) -> bool {
        false
    }
}

/// Adapts a plain async closure into an [`Approver`], for transports that
/// are already callback-shaped.
pub struct CallbackApprover {
    callback: Box<dyn Fn(PermissionRequest) -> BoxFuture<'static, bool> + Send + Sync>,
}

impl CallbackApprover {
    /// Wrap an async callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(PermissionRequest) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl Approver for CallbackApprover {
    async fn approve(&self, request: &PermissionRequest) -> bool {
        (self.callback)(request.clone()).await
    }
}

impl std::fmt::Debug for CallbackApprover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackApprover").finish_non_exhaustive()
    }
}
