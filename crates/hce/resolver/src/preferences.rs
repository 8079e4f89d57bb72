//! User-facing preferences that influence conflict resolution.

use std::fmt;

use hce_types::{HandlerRef, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Package holding the wallet role for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletHolder {
    pub package: String,
    pub user: UserId,
}

/// Which preference changed; used to pick the dispatcher reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKind {
    Foreground,
    NextTap,
    PaymentDefault,
    WalletRole,
    NfcFForeground,
}

impl fmt::Display for PreferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PreferenceKind::Foreground => "foreground",
            PreferenceKind::NextTap => "next_tap",
            PreferenceKind::PaymentDefault => "payment_default",
            PreferenceKind::WalletRole => "wallet_role",
            PreferenceKind::NfcFForeground => "nfcf_foreground",
        };
        f.write_str(name)
    }
}

/// Foreground, next-tap, payment default and wallet role state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredHandlers {
    foreground: Option<HandlerRef>,
    next_tap: Option<HandlerRef>,
    /// Set once a field activation happened while a next-tap default was armed.
    next_tap_armed: bool,
    payment_default: Option<HandlerRef>,
    wallet_holder: Option<WalletHolder>,
    wallet_role_enabled: bool,
    nfcf_foreground: Option<HandlerRef>,
}

impl PreferredHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective foreground preference; a next-tap default wins over the app.
    pub fn foreground(&self) -> Option<&HandlerRef> {
        self.next_tap.as_ref().or(self.foreground.as_ref())
    }

    pub fn payment_default(&self) -> Option<&HandlerRef> {
        self.payment_default.as_ref()
    }

    pub fn wallet_holder(&self) -> Option<&WalletHolder> {
        self.wallet_holder.as_ref()
    }

    pub fn wallet_role_enabled(&self) -> bool {
        self.wallet_role_enabled
    }

    pub fn nfcf_foreground(&self) -> Option<&HandlerRef> {
        self.nfcf_foreground.as_ref()
    }

    pub fn is_foreground(&self, handler: &HandlerRef) -> bool {
        self.foreground() == Some(handler)
    }

    pub fn is_payment_default(&self, handler: &HandlerRef) -> bool {
        self.payment_default.as_ref() == Some(handler)
    }

    pub fn is_wallet_holder(&self, handler: &HandlerRef) -> bool {
        self.wallet_holder
            .as_ref()
            .is_some_and(|w| w.package == handler.package() && w.user == handler.user)
    }

    /// Handler that should receive traffic nobody else claims.
    pub fn preferred_handler(&self) -> Option<&HandlerRef> {
        self.foreground().or(self.payment_default.as_ref())
    }

    /// Whether the package is preferred for the user by any active preference.
    pub fn is_preferred_package(&self, package: &str, user: UserId) -> bool {
        let matches = |h: &HandlerRef| h.package() == package && h.user == user;
        if let Some(fg) = self.foreground() {
            return matches(fg);
        }
        if self.wallet_role_enabled {
            return self
                .wallet_holder
                .as_ref()
                .is_some_and(|w| w.package == package && w.user == user);
        }
        self.payment_default.as_ref().is_some_and(matches)
    }

    pub fn set_foreground(&mut self, handler: Option<HandlerRef>) -> bool {
        if self.foreground == handler {
            return false;
        }
        debug!(foreground = ?handler, "Foreground preference changed");
        self.foreground = handler;
        true
    }

    /// Arm a one-shot default that holds until the next field deactivation.
    pub fn set_next_tap(&mut self, handler: Option<HandlerRef>) -> bool {
        if self.next_tap == handler {
            return false;
        }
        debug!(next_tap = ?handler, "Next-tap default changed");
        self.next_tap = handler;
        self.next_tap_armed = false;
        true
    }

    pub fn set_payment_default(&mut self, handler: Option<HandlerRef>) -> bool {
        if self.payment_default == handler {
            return false;
        }
        debug!(payment_default = ?handler, "Payment default changed");
        self.payment_default = handler;
        true
    }

    pub fn set_wallet_holder(&mut self, holder: Option<WalletHolder>) -> bool {
        if self.wallet_holder == holder {
            return false;
        }
        self.wallet_holder = holder;
        true
    }

    pub fn set_wallet_role_enabled(&mut self, enabled: bool) -> bool {
        if self.wallet_role_enabled == enabled {
            return false;
        }
        self.wallet_role_enabled = enabled;
        true
    }

    /// Enable a handler for NFC-F. A second handler cannot take over until the
    /// current one is disabled.
    pub fn set_nfcf_foreground(&mut self, handler: Option<HandlerRef>) -> bool {
        match (&self.nfcf_foreground, handler) {
            (Some(current), Some(requested)) => {
                if current != &requested {
                    debug!(current = %current, requested = %requested, "NFC-F foreground already taken");
                }
                false
            }
            (None, None) => false,
            (_, handler) => {
                self.nfcf_foreground = handler;
                true
            }
        }
    }

    /// Field activation; arms an outstanding next-tap default.
    pub fn on_activation(&mut self) {
        if self.next_tap.is_some() {
            self.next_tap_armed = true;
        }
    }

    /// Field deactivation; consumes the next-tap default once it has been used.
    /// Returns true when the effective foreground changed.
    pub fn on_deactivation(&mut self) -> bool {
        if self.next_tap_armed {
            debug!(next_tap = ?self.next_tap, "Next-tap default consumed");
            self.next_tap = None;
            self.next_tap_armed = false;
            return true;
        }
        false
    }

    /// Drop every preference that belongs to `user`.
    pub fn clear_user(&mut self, user: UserId) {
        let belongs = |h: &Option<HandlerRef>| h.as_ref().is_some_and(|h| h.user == user);
        if belongs(&self.foreground) {
            self.foreground = None;
        }
        if belongs(&self.next_tap) {
            self.next_tap = None;
            self.next_tap_armed = false;
        }
        if belongs(&self.nfcf_foreground) {
            self.nfcf_foreground = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hce_types::HandlerId;

    fn handler(pkg: &str, class: &str) -> HandlerRef {
        HandlerRef::new(HandlerId::new(pkg, class), UserId(0))
    }

    #[test]
    fn test_next_tap_overrides_foreground_until_deactivation() {
        let mut prefs = PreferredHandlers::new();
        let app = handler("com.app", "Fg");
        let tap = handler("com.tap", "Once");
        prefs.set_foreground(Some(app.clone()));
        prefs.set_next_tap(Some(tap.clone()));
        assert!(prefs.is_foreground(&tap));

        // deactivation without a tap does not consume it
        assert!(!prefs.on_deactivation());
        assert!(prefs.is_foreground(&tap));

        prefs.on_activation();
        assert!(prefs.on_deactivation());
        assert!(prefs.is_foreground(&app));
    }

    #[test]
    fn test_preferred_handler_order() {
        let mut prefs = PreferredHandlers::new();
        let pay = handler("com.pay", "Pay");
        prefs.set_payment_default(Some(pay.clone()));
        assert_eq!(prefs.preferred_handler(), Some(&pay));

        let fg = handler("com.app", "Fg");
        prefs.set_foreground(Some(fg.clone()));
        assert_eq!(prefs.preferred_handler(), Some(&fg));
    }

    #[test]
    fn test_preferred_package_uses_wallet_when_enabled() {
        let mut prefs = PreferredHandlers::new();
        prefs.set_payment_default(Some(handler("com.pay", "Pay")));
        prefs.set_wallet_holder(Some(WalletHolder {
            package: "com.wallet".into(),
            user: UserId(0),
        }));
        assert!(prefs.is_preferred_package("com.pay", UserId(0)));

        prefs.set_wallet_role_enabled(true);
        assert!(prefs.is_preferred_package("com.wallet", UserId(0)));
        assert!(!prefs.is_preferred_package("com.pay", UserId(0)));
        assert!(prefs.is_wallet_holder(&handler("com.wallet", "Any")));
    }

    #[test]
    fn test_nfcf_foreground_first_wins() {
        let mut prefs = PreferredHandlers::new();
        let a = handler("com.a", "F");
        let b = handler("com.b", "F");
        assert!(prefs.set_nfcf_foreground(Some(a.clone())));
        assert!(!prefs.set_nfcf_foreground(Some(b.clone())));
        assert_eq!(prefs.nfcf_foreground(), Some(&a));
        assert!(prefs.set_nfcf_foreground(None));
        assert!(prefs.set_nfcf_foreground(Some(b.clone())));
    }

    #[test]
    fn test_setters_report_changes() {
        let mut prefs = PreferredHandlers::new();
        let a = handler("com.a", "A");
        assert!(prefs.set_foreground(Some(a.clone())));
        assert!(!prefs.set_foreground(Some(a)));
        prefs.clear_user(UserId(0));
        assert_eq!(prefs.foreground(), None);
    }
}
