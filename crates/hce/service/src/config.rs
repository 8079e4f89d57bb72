//! Configuration for the card emulation service

use std::collections::BTreeMap;

use hce_dispatch::HostOptions;
use hce_routing::RoutingOptions;
use hce_types::{
    AidMatchingMode, ControllerCapabilities, NciVersion, NfceeId, Route, SecureElementRef,
};
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// What the controller reports about routing
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Routing overrides
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Dispatch behaviour
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Settings persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Controller capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// AID matching supported by the controller
    #[serde(default)]
    pub aid_matching_mode: AidMatchingMode,

    /// NCI protocol version
    #[serde(default)]
    pub nci_version: NciVersion,

    /// Routing table capacity in bytes
    #[serde(default = "default_table_size")]
    pub max_routing_table_size: usize,

    /// NFCEE id of the default AID route (0 is the host)
    #[serde(default)]
    pub default_route: u8,

    /// NFCEE id used for off-host handlers naming an unknown secure element
    #[serde(default = "default_off_host_route")]
    pub default_off_host_route: u8,

    /// Secure element name to NFCEE id
    #[serde(default)]
    pub secure_elements: BTreeMap<String, u8>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            aid_matching_mode: AidMatchingMode::default(),
            nci_version: NciVersion::default(),
            max_routing_table_size: default_table_size(),
            default_route: Route::HOST_ID,
            default_off_host_route: default_off_host_route(),
            secure_elements: BTreeMap::new(),
        }
    }
}

impl ControllerConfig {
    pub fn capabilities(&self) -> ControllerCapabilities {
        ControllerCapabilities {
            matching_mode: self.aid_matching_mode,
            nci_version: self.nci_version,
            max_routing_table_size: self.max_routing_table_size,
            default_route: Route::from_id(self.default_route),
            default_off_host_route: Route::from_id(self.default_off_host_route),
            off_host_routes: self
                .secure_elements
                .iter()
                .map(|(name, id)| (SecureElementRef::new(name.clone()), Route::Nfcee(NfceeId(*id))))
                .collect(),
        }
    }
}

/// Routing overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Forced default ISO-DEP route as an NFCEE id
    #[serde(default)]
    pub default_route_override: Option<u8>,

    /// Re-commit the table when secure NFC is toggled
    #[serde(default = "default_true")]
    pub force_commit_on_secure_toggle: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_route_override: None,
            force_commit_on_secure_toggle: true,
        }
    }
}

impl RoutingConfig {
    pub fn options(&self) -> RoutingOptions {
        RoutingOptions {
            default_route_override: self.default_route_override.map(Route::from_id),
            force_commit_on_secure_toggle: self.force_commit_on_secure_toggle,
        }
    }
}

/// Dispatch behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Require an unlocked device for every handler
    #[serde(default)]
    pub secure_nfc: bool,

    /// Honour the wallet role holder when resolving conflicts
    #[serde(default)]
    pub wallet_role_enabled: bool,
}

impl DispatchConfig {
    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            secure_nfc: self.secure_nfc,
        }
    }
}

/// Settings persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Settings are kept in memory only
    #[default]
    Memory,

    /// Settings are kept in a JSON file
    Json {
        /// File path
        path: String,
    },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_table_size() -> usize {
    256
}

fn default_off_host_route() -> u8 {
    0x80
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> ServiceResult<Self> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&ServiceConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with HCE_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("HCE")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.controller.max_routing_table_size, 256);
        assert!(matches!(config.store, StoreConfig::Memory));
        assert!(config.routing.force_commit_on_secure_toggle);
        assert!(!config.dispatch.secure_nfc);
    }

    #[test]
    fn test_capabilities_from_config() {
        let mut controller = ControllerConfig::default();
        controller.secure_elements.insert("eSE1".into(), 0x82);
        let caps = controller.capabilities();
        assert_eq!(caps.default_route, Route::Host);
        assert_eq!(
            caps.off_host_routes.get(&SecureElementRef::new("eSE1")),
            Some(&Route::Nfcee(NfceeId(0x82)))
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[controller]\naid_matching_mode = \"prefix_only\"\nmax_routing_table_size = 64\n\n[dispatch]\nsecure_nfc = true"
        )
        .unwrap();
        let config = ServiceConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.controller.aid_matching_mode, AidMatchingMode::PrefixOnly);
        assert_eq!(config.controller.max_routing_table_size, 64);
        assert!(config.dispatch.secure_nfc);
    }
}
