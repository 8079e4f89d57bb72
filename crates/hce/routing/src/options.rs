//! Routing option overrides.

use hce_types::{ControllerCapabilities, Route};
use serde::{Deserialize, Serialize};

/// Overrides applied on top of what the controller reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingOptions {
    /// Forced default ISO-DEP route; replaces the reported default in the try-list.
    #[serde(default)]
    pub default_route_override: Option<Route>,
    /// Re-commit the table when secure NFC is toggled even if rows are unchanged.
    #[serde(default = "default_true")]
    pub force_commit_on_secure_toggle: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            default_route_override: None,
            force_commit_on_secure_toggle: true,
        }
    }
}

impl RoutingOptions {
    /// Candidate global default routes, most preferred first.
    pub fn try_list(&self, caps: &ControllerCapabilities) -> Vec<Route> {
        let first = self.default_route_override.unwrap_or(caps.default_route);
        let mut routes = vec![first];
        if first != Route::Host {
            routes.push(Route::Host);
        }
        routes
    }
}
