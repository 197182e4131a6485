//! Guard set preventing duplicate concurrent loads of one source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use recall_core::{RecallError, RecallResult, SecurityError};

#[derive(Debug)]
struct LoadTicket {
    owner: String,
    canceled: AtomicBool,
}

/// In-flight loads keyed by source id, owned by one registry.
#[derive(Debug, Default)]
pub struct InFlightLoads {
    loads: DashMap<String, Arc<LoadTicket>>,
}

impl InFlightLoads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a load, failing with `Conflict` if one is already running.
    pub fn begin(&self, source_id: &str, owner: &str) -> RecallResult<InFlightGuard<'_>> {
        match self.loads.entry(source_id.to_string()) {
            Entry::Occupied(_) => Err(RecallError::Conflict {
                source_id: source_id.to_string(),
            }),
            Entry::Vacant(vacant) => {
                let ticket = Arc::new(LoadTicket {
                    owner: owner.to_string(),
                    canceled: AtomicBool::new(false),
                });
                vacant.insert(ticket.clone());
                Ok(InFlightGuard {
                    loads: self,
                    source_id: source_id.to_string(),
                    ticket,
                })
            }
        }
    }

    /// Flag a running load as canceled and forget it.
    ///
    /// With `caller` set, only the load's owner may cancel it.
    pub fn cancel(&self, source_id: &str, caller: Option<&str>) -> RecallResult<()> {
        let ticket = self
            .loads
            .get(source_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| RecallError::NotFound {
                id: source_id.to_string(),
            })?;
        if let Some(caller) = caller {
            if caller != ticket.owner {
                return Err(SecurityError::OwnerMismatch {
                    id: source_id.to_string(),
                    caller: caller.to_string(),
                }
                .into());
            }
        }
        ticket.canceled.store(true, Ordering::SeqCst);
        self.loads
            .remove_if(source_id, |_, current| Arc::ptr_eq(current, &ticket));
        Ok(())
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.loads.contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }
}

/// Membership of one load in the in-flight set; released on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    loads: &'a InFlightLoads,
    source_id: String,
    ticket: Arc<LoadTicket>,
}

impl InFlightGuard<'_> {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Checkpoint test for cooperative cancellation.
    pub fn is_canceled(&self) -> bool {
        self.ticket.canceled.load(Ordering::SeqCst)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        // A canceled load may already have been replaced by a newer one.
        self.loads
            .loads
            .remove_if(&self.source_id, |_, current| Arc::ptr_eq(current, &self.ticket));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_begin_conflicts() {
        let loads = InFlightLoads::new();
        let guard = loads.begin("src", "alice").expect("first begin should succeed");
        let err = loads.begin("src", "alice").unwrap_err();
        assert!(matches!(err, RecallError::Conflict { .. }));
        // The original is undisturbed.
        assert!(loads.contains("src"));
        assert!(!guard.is_canceled());
        drop(guard);
        assert!(!loads.contains("src"));
    }

    #[test]
    fn test_cancel_requires_owner() {
        let loads = InFlightLoads::new();
        let guard = loads.begin("src", "alice").expect("begin should succeed");
        let err = loads.cancel("src", Some("mallory")).unwrap_err();
        assert!(matches!(err, RecallError::Security(_)));
        assert!(!guard.is_canceled());

        loads.cancel("src", Some("alice")).expect("owner cancel should succeed");
        assert!(guard.is_canceled());
        assert!(!loads.contains("src"));
    }

    #[test]
    fn test_cancel_unknown_is_not_found() {
        let loads = InFlightLoads::new();
        assert!(matches!(
            loads.cancel("missing", None),
            Err(RecallError::NotFound { .. })
        ));
    }

    #[test]
    fn test_stale_guard_keeps_newer_load() {
        let loads = InFlightLoads::new();
        let old = loads.begin("src", "alice").expect("begin should succeed");
        loads.cancel("src", None).expect("admin cancel should succeed");
        let newer = loads.begin("src", "alice").expect("restart should succeed");
        drop(old);
        assert!(loads.contains("src"));
        drop(newer);
        assert!(loads.is_empty());
    }
}
