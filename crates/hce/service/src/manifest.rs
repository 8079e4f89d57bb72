//! Handler manifests and event traces read by `hced`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use hce_dispatch::HostEvent;
use hce_resolver::WalletHolder;
use hce_types::{HandlerInfo, HandlerRef, UserId};
use serde::{Deserialize, Serialize};

use crate::collaborators::HandlerDirectory;
use crate::error::ServiceResult;
use crate::service::{HceService, PreferenceChange};

/// Preferences to apply after the handlers are loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPreferences {
    #[serde(default)]
    pub foreground: Option<HandlerRef>,
    #[serde(default)]
    pub payment_default: Option<HandlerRef>,
    #[serde(default)]
    pub wallet_holder: Option<WalletHolder>,
    #[serde(default)]
    pub wallet_role_enabled: bool,
    #[serde(default)]
    pub nfcf_foreground: Option<HandlerRef>,
}

impl ManifestPreferences {
    fn changes(&self) -> Vec<PreferenceChange> {
        let mut changes = vec![PreferenceChange::WalletRoleEnabled {
            enabled: self.wallet_role_enabled,
        }];
        if let Some(holder) = &self.wallet_holder {
            changes.push(PreferenceChange::WalletHolder {
                holder: Some(holder.clone()),
            });
        }
        if let Some(handler) = &self.payment_default {
            changes.push(PreferenceChange::PaymentDefault {
                handler: Some(handler.clone()),
            });
        }
        if let Some(handler) = &self.foreground {
            changes.push(PreferenceChange::Foreground {
                handler: Some(handler.clone()),
            });
        }
        if let Some(handler) = &self.nfcf_foreground {
            changes.push(PreferenceChange::NfcFForeground {
                handler: Some(handler.clone()),
            });
        }
        changes
    }
}

/// A complete handler set, as a JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerManifest {
    #[serde(default)]
    pub current_user: UserId,
    pub handlers: Vec<HandlerInfo>,
    #[serde(default)]
    pub preferences: ManifestPreferences,
    /// Profile user to its parent user.
    #[serde(default)]
    pub profiles: BTreeMap<UserId, UserId>,
}

impl HandlerManifest {
    pub fn from_json(json: &str) -> ServiceResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn read(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Load the handlers and preferences into `service`.
    pub async fn apply(&self, service: &HceService) -> ServiceResult<()> {
        if service.engine().current_user() != self.current_user {
            service.on_user_switched(self.current_user);
        }
        for (profile, parent) in &self.profiles {
            service.engine().set_profile_parent(*profile, *parent);
        }

        let users: BTreeSet<UserId> = self.handlers.iter().map(|h| h.user).collect();
        for user in users {
            service.refresh_handlers(self, user).await?;
        }

        for change in self.preferences.changes() {
            service.on_preference_changed(change).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HandlerDirectory for HandlerManifest {
    async fn list_handlers(&self, user: UserId) -> ServiceResult<Vec<HandlerInfo>> {
        Ok(self
            .handlers
            .iter()
            .filter(|h| h.user == user)
            .cloned()
            .collect())
    }
}

/// Read a JSON array of dispatcher events.
pub async fn read_trace(path: impl AsRef<Path>) -> ServiceResult<Vec<HostEvent>> {
    let json = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}
