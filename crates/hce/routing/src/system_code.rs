//! NFC-F system code routing.

use std::sync::Arc;

use hce_types::T3tIdentifier;
use tracing::{debug, warn};

use crate::controller::NfcController;

/// Registers T3T identifiers with the controller, sending only the diff.
pub struct SystemCodeRoutingManager {
    controller: Arc<dyn NfcController>,
    registered: Vec<T3tIdentifier>,
}

impl SystemCodeRoutingManager {
    pub fn new(controller: Arc<dyn NfcController>) -> Self {
        Self {
            controller,
            registered: Vec::new(),
        }
    }

    pub fn registered(&self) -> &[T3tIdentifier] {
        &self.registered
    }

    /// Bring the controller in line with `identifiers`. Returns false when nothing changed.
    pub fn configure(&mut self, identifiers: &[T3tIdentifier]) -> bool {
        let removed: Vec<T3tIdentifier> = self
            .registered
            .iter()
            .filter(|id| !identifiers.contains(id))
            .copied()
            .collect();
        let added: Vec<T3tIdentifier> = identifiers
            .iter()
            .filter(|id| !self.registered.contains(id))
            .copied()
            .collect();
        if removed.is_empty() && added.is_empty() {
            debug!("T3T identifiers unchanged");
            return false;
        }

        for id in &removed {
            debug!(identifier = %id, "Deregistering T3T identifier");
            if let Err(e) = self.controller.deregister_t3t(id) {
                warn!(identifier = %id, error = %e, "Failed to deregister T3T identifier");
            }
        }
        for id in &added {
            debug!(identifier = %id, "Registering T3T identifier");
            if let Err(e) = self.controller.register_t3t(id) {
                warn!(identifier = %id, error = %e, "Failed to register T3T identifier");
            }
        }
        self.registered = identifiers.to_vec();
        true
    }

    /// The controller table was cleared; nothing is registered any more.
    pub fn on_routing_table_cleared(&mut self) {
        self.registered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ControllerCall, MockController};
    use hce_types::NfcFRegistration;

    fn id(nfcid2: &str) -> T3tIdentifier {
        NfcFRegistration::new("4000", nfcid2, "FFFFFFFFFFFFFFFF")
            .identifier()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_diff_registration() {
        let controller = Arc::new(MockController::new());
        let mut manager = SystemCodeRoutingManager::new(controller.clone());
        let a = id("02FE000000000001");
        let b = id("02FE000000000002");

        assert!(manager.configure(&[a]));
        assert!(!manager.configure(&[a]));
        assert!(manager.configure(&[b]));

        assert_eq!(
            controller.calls(),
            vec![
                ControllerCall::RegisterT3t(a),
                ControllerCall::DeregisterT3t(a),
                ControllerCall::RegisterT3t(b),
            ]
        );
    }

    #[test]
    fn test_cleared_table_reregisters() {
        let controller = Arc::new(MockController::new());
        let mut manager = SystemCodeRoutingManager::new(controller.clone());
        let a = id("02FE000000000001");
        manager.configure(&[a]);
        manager.on_routing_table_cleared();
        assert!(manager.registered().is_empty());
        assert!(manager.configure(&[a]));
    }
}
