use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle phase of a session, published through `ProcessInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Initializing,
    Checking,
    Executing,
    Printing,
    Splitting,
    Finalizing,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionPhase::Idle => "IDLE",
            SessionPhase::Initializing => "INITIALIZING",
            SessionPhase::Checking => "CHECKING",
            SessionPhase::Executing => "EXECUTING",
            SessionPhase::Printing => "PRINTING",
            SessionPhase::Splitting => "SPLITTING",
            SessionPhase::Finalizing => "FINALIZING",
        };
        f.write_str(text)
    }
}

/// Immutable status snapshot of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub id: u64,
    pub oper_state: SessionPhase,
    pub percent: f64,
    pub dest_host: String,
    pub dest_port: u16,
    pub dest_user: String,
    pub command: String,
    pub info: String,
    pub time: Option<DateTime<Local>>,
    pub killed: bool,
}

impl ProcessInfo {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            oper_state: SessionPhase::Idle,
            percent: 0.0,
            dest_host: String::new(),
            dest_port: 0,
            dest_user: String::new(),
            command: String::new(),
            info: String::new(),
            time: None,
            killed: false,
        }
    }
}

/// Cooperative kill flag, checked between statements.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Single-slot cell holding the current `ProcessInfo`.
///
/// Writers replace the whole snapshot; readers clone an `Arc` and never see
/// a half-updated value.
#[derive(Debug)]
pub struct ProcessCell {
    slot: RwLock<Arc<ProcessInfo>>,
    cancel: CancelToken,
}

impl ProcessCell {
    pub fn new(id: u64) -> Self {
        Self {
            slot: RwLock::new(Arc::new(ProcessInfo::new(id))),
            cancel: CancelToken::new(),
        }
    }

    pub fn snapshot(&self) -> Arc<ProcessInfo> {
        Arc::clone(&self.slot.read())
    }

    /// Publish a new snapshot derived from the current one.
    pub fn publish(&self, update: impl FnOnce(&mut ProcessInfo)) {
        let mut slot = self.slot.write();
        let mut next = ProcessInfo::clone(&slot);
        update(&mut next);
        next.killed = self.cancel.is_cancelled();
        *slot = Arc::new(next);
    }

    pub fn kill(&self) {
        self.cancel.cancel();
        self.publish(|_| {});
    }

    pub fn is_killed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn reset_kill(&self) {
        self.cancel.reset();
        self.publish(|_| {});
    }
}

/// Directory of live sessions, for status listings and kill requests by id.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    cells: Mutex<BTreeMap<u64, Arc<ProcessCell>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: u64, cell: Arc<ProcessCell>) {
        self.cells.lock().insert(id, cell);
    }

    pub fn unregister(&self, id: u64) {
        self.cells.lock().remove(&id);
    }

    pub fn snapshots(&self) -> Vec<Arc<ProcessInfo>> {
        self.cells.lock().values().map(|cell| cell.snapshot()).collect()
    }

    /// Returns false when no session has that id.
    pub fn kill(&self, id: u64) -> bool {
        let cell = self.cells.lock().get(&id).cloned();
        match cell {
            Some(cell) => {
                log::warn!("con:{} kill requested", id);
                cell.kill();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_publish_replaces_whole_snapshot() {
        let cell = ProcessCell::new(7);
        let before = cell.snapshot();
        cell.publish(|pi| {
            pi.dest_host = "db1".to_string();
            pi.dest_port = 1521;
        });
        let after = cell.snapshot();
        assert_eq!(before.dest_host, "");
        assert_eq!(after.dest_host, "db1");
        assert_eq!(after.id, 7);
    }

    #[test]
    fn test_kill_survives_later_publish() {
        let cell = ProcessCell::new(1);
        cell.kill();
        cell.publish(|pi| pi.percent = 0.5);
        assert!(cell.snapshot().killed);
        cell.reset_kill();
        assert!(!cell.snapshot().killed);
        assert!(!cell.is_killed());
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_values() {
        let cell = Arc::new(ProcessCell::new(3));
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for i in 0..500u16 {
                    cell.publish(|pi| {
                        pi.dest_port = i;
                        pi.dest_host = format!("h{}", i);
                    });
                }
            })
        };
        for _ in 0..500 {
            let pi = cell.snapshot();
            if pi.dest_port > 0 || !pi.dest_host.is_empty() {
                assert_eq!(pi.dest_host, format!("h{}", pi.dest_port));
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_registry_kill_by_id() {
        let registry = ProcessRegistry::new();
        let cell = Arc::new(ProcessCell::new(9));
        registry.register(9, Arc::clone(&cell));
        assert!(!registry.kill(10));
        assert!(registry.kill(9));
        assert!(cell.is_killed());
        assert_eq!(registry.snapshots().len(), 1);
        registry.unregister(9);
        assert!(registry.snapshots().is_empty());
    }
}
