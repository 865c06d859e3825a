// src/motion/gate.rs - Single-flight guard for motion operations
//!
//! The gate holds the busy slot(s) and remembers which motion targets still
//! have a live worker. Test-and-set happens under one lock, so two callers
//! can never both pass `try_acquire` for the same slot.
//!
//! A successful acquisition hands out a [`GatePermit`]. The permit is the
//! only way to release: dropping it clears the slot if the lease still owns
//! it and marks the worker finished. EXIT is the one exception, see
//! [`OperationGate::revoke`].
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use super::{MotionError, MotionReport, MotionTarget};
use crate::actuator::GroupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{requested} rejected: {holder} operation in progress")]
pub struct Busy {
    pub requested: MotionTarget,
    pub holder: MotionTarget,
}

/// How many operations may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateScope {
    /// One operation across both lanes.
    #[default]
    System,
    /// One operation per lane.
    PerGroup,
}

impl GateScope {
    fn slot(self, group: GroupId) -> usize {
        match self {
            GateScope::System => 0,
            GateScope::PerGroup => group.index(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    id: u64,
    target: MotionTarget,
}

#[derive(Debug, Default)]
struct GateState {
    slots: [Option<Lease>; 2],
    alive: HashMap<MotionTarget, u64>,
    next_id: u64,
}

#[derive(Debug)]
pub struct OperationGate {
    scope: GateScope,
    state: Mutex<GateState>,
}

impl OperationGate {
    pub fn new(scope: GateScope) -> Arc<Self> {
        Arc::new(Self { scope, state: Mutex::new(GateState::default()) })
    }

    pub fn scope(&self) -> GateScope {
        self.scope
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Check-and-mark in one step.
    pub fn try_acquire(self: &Arc<Self>, target: MotionTarget) -> Result<GatePermit, Busy> {
        let mut state = self.lock();
        let slot = self.scope.slot(target.group);
        if let Some(lease) = state.slots[slot] {
            tracing::warn!("{} rejected, {} holds the gate", target, lease.target);
            return Err(Busy { requested: target, holder: lease.target });
        }
        if state.alive.contains_key(&target) {
            tracing::warn!("{} rejected, previous {} worker still running", target, target);
            return Err(Busy { requested: target, holder: target });
        }
        let id = state.next_id;
        state.next_id += 1;
        state.slots[slot] = Some(Lease { id, target });
        state.alive.insert(target, id);
        tracing::debug!("Gate acquired by {} (lease {})", target, id);
        Ok(GatePermit { gate: Arc::clone(self), lease_id: id, target })
    }

    /// Acquires the gate and spawns `task` with the permit. The task must keep
    /// the permit until its motion is over; the result is delivered through
    /// the returned handle after the permit has been dropped.
    pub fn launch<F, Fut>(self: &Arc<Self>, target: MotionTarget, task: F) -> Result<MotionHandle, Busy>
    where
        F: FnOnce(GatePermit) -> Fut,
        Fut: Future<Output = Result<MotionReport, MotionError>> + Send + 'static,
    {
        let permit = self.try_acquire(target)?;
        let (tx, rx) = oneshot::channel();
        let work = task(permit);
        tokio::spawn(async move {
            let result = work.await;
            let _ = tx.send(result);
        });
        Ok(MotionHandle { target, rx })
    }

    /// Frees the slot held by `group`, if any. Used by EXIT only. The revoked
    /// worker stays registered as alive until it actually ends.
    pub fn revoke(&self, group: GroupId) -> bool {
        let mut state = self.lock();
        let slot = self.scope.slot(group);
        match state.slots[slot] {
            Some(lease) if lease.target.group == group => {
                state.slots[slot] = None;
                tracing::info!("Gate revoked from {} (lease {})", lease.target, lease.id);
                true
            }
            _ => false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.lock().slots.iter().all(Option::is_none)
    }

    /// Whether an operation for `group` would find its slot free.
    pub fn is_idle_for(&self, group: GroupId) -> bool {
        self.lock().slots[self.scope.slot(group)].is_none()
    }

    pub fn holders(&self) -> Vec<MotionTarget> {
        self.lock().slots.iter().flatten().map(|lease| lease.target).collect()
    }

    /// The first busy slot's holder.
    pub fn holder(&self) -> Option<MotionTarget> {
        self.holders().into_iter().next()
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.lock();
        GateSnapshot {
            scope: self.scope,
            holders: state.slots.iter().flatten().map(|lease| lease.target).collect(),
            alive: state.alive.keys().copied().collect(),
        }
    }

    pub fn is_alive(&self, target: MotionTarget) -> bool {
        self.lock().alive.contains_key(&target)
    }

    fn finish(&self, lease_id: u64, target: MotionTarget) {
        let mut state = self.lock();
        let slot = self.scope.slot(target.group);
        if state.slots[slot].is_some_and(|lease| lease.id == lease_id) {
            state.slots[slot] = None;
        }
        if state.alive.get(&target) == Some(&lease_id) {
            state.alive.remove(&target);
        }
        tracing::debug!("Gate released by {} (lease {})", target, lease_id);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    pub scope: GateScope,
    pub holders: Vec<MotionTarget>,
    pub alive: Vec<MotionTarget>,
}

/// Proof of holding the gate for one motion target.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<OperationGate>,
    lease_id: u64,
    target: MotionTarget,
}

impl GatePermit {
    pub fn target(&self) -> MotionTarget {
        self.target
    }

    pub fn release(self) {}
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.finish(self.lease_id, self.target);
    }
}

/// Completion side of a launched motion task.
#[derive(Debug)]
pub struct MotionHandle {
    target: MotionTarget,
    rx: oneshot::Receiver<Result<MotionReport, MotionError>>,
}

impl MotionHandle {
    pub fn target(&self) -> MotionTarget {
        self.target
    }

    pub async fn wait(self) -> Result<MotionReport, MotionError> {
        let target = self.target;
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(MotionError::WorkerLost(target)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::MotionOutcome;
    use tokio::time::{Duration, Instant};

    fn report(target: MotionTarget) -> MotionReport {
        let now = Instant::now();
        MotionReport {
            target,
            command: target.to_string(),
            outcome: MotionOutcome::Completed,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_system_scope_admits_one_operation() {
        let gate = OperationGate::new(GateScope::System);
        let permit = gate.try_acquire(MotionTarget::slide(GroupId::One)).unwrap();
        let err = gate.try_acquire(MotionTarget::pusher(GroupId::Two)).unwrap_err();
        assert_eq!(err.holder, MotionTarget::slide(GroupId::One));
        assert!(!gate.is_idle());
        drop(permit);
        assert!(gate.is_idle());
        assert!(gate.try_acquire(MotionTarget::pusher(GroupId::Two)).is_ok());
    }

    #[test]
    fn test_per_group_scope_splits_slots() {
        let gate = OperationGate::new(GateScope::PerGroup);
        let _one = gate.try_acquire(MotionTarget::slide(GroupId::One)).unwrap();
        let _two = gate.try_acquire(MotionTarget::slide(GroupId::Two)).unwrap();
        assert!(gate.try_acquire(MotionTarget::pusher(GroupId::One)).is_err());
        assert_eq!(gate.holders().len(), 2);
        assert_eq!(gate.holder(), Some(MotionTarget::slide(GroupId::One)));
        assert_eq!(gate.snapshot().alive.len(), 2);
    }

    #[test]
    fn test_revoke_keeps_worker_alive() {
        let gate = OperationGate::new(GateScope::System);
        let target = MotionTarget::slide(GroupId::Two);
        let permit = gate.try_acquire(target).unwrap();
        assert!(!gate.revoke(GroupId::One));
        assert!(gate.revoke(GroupId::Two));
        assert!(gate.is_idle());
        // Same target is still blocked by the live worker, others are not.
        assert_eq!(gate.try_acquire(target).unwrap_err().holder, target);
        let other = gate.try_acquire(MotionTarget::slide(GroupId::One)).unwrap();
        // The revoked permit must not free the slot now owned by someone else.
        drop(permit);
        assert!(!gate.is_idle());
        assert!(!gate.is_alive(target));
        drop(other);
        assert!(gate.is_idle());
    }

    #[tokio::test]
    async fn test_launch_releases_before_reporting() {
        let gate = OperationGate::new(GateScope::System);
        let target = MotionTarget::pusher(GroupId::One);
        let handle = gate
            .launch(target, |permit| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                permit.release();
                Ok(report(target))
            })
            .unwrap();
        assert!(gate.try_acquire(MotionTarget::slide(GroupId::Two)).is_err());
        let done = handle.wait().await.unwrap();
        assert_eq!(done.target, target);
        assert!(gate.is_idle());
        assert!(!gate.is_alive(target));
    }

    #[tokio::test]
    async fn test_panicking_worker_frees_gate() {
        let gate = OperationGate::new(GateScope::System);
        let target = MotionTarget::slide(GroupId::One);
        let handle = gate
            .launch(target, |permit| async move {
                let _permit = permit;
                if target.group == GroupId::One {
                    panic!("driver crashed");
                }
                Ok(report(target))
            })
            .unwrap();
        assert!(matches!(handle.wait().await, Err(MotionError::WorkerLost(_))));
        assert!(gate.is_idle());
    }
}
