//! Approval switch guarding a pending dump.
//!
//! Both flavours expose the same three operations over a single mutex-guarded
//! boolean that starts unapproved. They differ only in how a caller waits
//! for the lock: [`ApprovalGate`] suspends the task, [`BlockingApprovalGate`]
//! parks the thread. Clones share the same switch.

use std::sync::{Arc, PoisonError};

/// Approval switch for cooperative (async) code.
#[derive(Debug, Clone, Default)]
pub struct ApprovalGate {
    approved: Arc<tokio::sync::Mutex<bool>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn approve(&self) {
        *self.approved.lock().await = true;
    }

    pub async fn reject(&self) {
        *self.approved.lock().await = false;
    }

    pub async fn is_approved(&self) -> bool {
        *self.approved.lock().await
    }
}

/// Approval switch for code running on dedicated threads.
#[derive(Debug, Clone, Default)]
pub struct BlockingApprovalGate {
    approved: Arc<std::sync::Mutex<bool>>,
}

impl BlockingApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self) {
        *self.lock() = true;
    }

    pub fn reject(&self) {
        *self.lock() = false;
    }

    pub fn is_approved(&self) -> bool {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.approved.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn async_gate_defaults_to_unapproved() {
        let gate = ApprovalGate::new();
        assert!(!gate.is_approved().await);
        gate.approve().await;
        assert!(gate.is_approved().await);
        gate.reject().await;
        assert!(!gate.is_approved().await);
    }

    #[tokio::test]
    async fn async_gate_clones_share_state() {
        let gate = ApprovalGate::new();
        let remote = gate.clone();
        tokio::spawn(async move { remote.approve().await })
            .await
            .unwrap();
        assert!(gate.is_approved().await);
    }

    #[test]
    fn blocking_gate_defaults_to_unapproved() {
        let gate = BlockingApprovalGate::new();
        assert!(!gate.is_approved());
        gate.approve();
        assert!(gate.is_approved());
        gate.reject();
        assert!(!gate.is_approved());
    }

    #[test]
    fn blocking_gate_write_is_visible_to_other_threads() {
        let gate = BlockingApprovalGate::new();
        let remote = gate.clone();
        std::thread::spawn(move || remote.approve()).join().unwrap();
        assert!(gate.is_approved());
    }
}
