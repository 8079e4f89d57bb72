use hce_types::T3tIdentifier;
use parking_lot::Mutex;

use crate::controller::NfcController;
use crate::error::{Result, RoutingError};
use crate::packer::PackedTable;

/// A call received by [`MockController`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    Commit(PackedTable),
    Clear,
    RegisterT3t(T3tIdentifier),
    DeregisterT3t(T3tIdentifier),
}

/// Mock controller for testing.
///
/// Records every call; a failure can be armed for the next commit.
pub struct MockController {
    calls: Mutex<Vec<ControllerCall>>,
    fail_next: Mutex<Option<RoutingError>>,
}

impl MockController {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn fail_next_commit(&self, error: RoutingError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().clone()
    }

    pub fn commits(&self) -> Vec<PackedTable> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ControllerCall::Commit(table) => Some(table.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_commit(&self) -> Option<PackedTable> {
        self.commits().pop()
    }

    pub fn clear_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, ControllerCall::Clear))
            .count()
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl NfcController for MockController {
    fn commit_routing(&self, table: &PackedTable) -> Result<()> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        self.calls.lock().push(ControllerCall::Commit(table.clone()));
        Ok(())
    }

    fn clear_routing(&self) -> Result<()> {
        self.calls.lock().push(ControllerCall::Clear);
        Ok(())
    }

    fn register_t3t(&self, identifier: &T3tIdentifier) -> Result<()> {
        self.calls.lock().push(ControllerCall::RegisterT3t(*identifier));
        Ok(())
    }

    fn deregister_t3t(&self, identifier: &T3tIdentifier) -> Result<()> {
        self.calls
            .lock()
            .push(ControllerCall::DeregisterT3t(*identifier));
        Ok(())
    }
}
