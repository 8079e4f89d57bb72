//! Power-state reduction for routing rows.

use hce_types::{NciVersion, PowerState};

/// Power states in which a row stays active, reduced monotonically from the
/// controller's full set by the handler's requirements.
pub fn compute_power_state(
    on_host: bool,
    requires_screen_on: bool,
    requires_unlock: bool,
    nci: NciVersion,
) -> PowerState {
    let mut power = match nci {
        NciVersion::V1_0 => PowerState::ALL_NCI_1_0,
        NciVersion::V2_0 => PowerState::ALL.without(PowerState::BATTERY_OFF),
    };

    if on_host {
        power = power.without(PowerState::SWITCH_OFF | PowerState::BATTERY_OFF);
    } else if requires_unlock {
        power = power.without(PowerState::SCREEN_ON_LOCKED);
    }

    if requires_screen_on {
        power = power.without(
            PowerState::SWITCH_OFF
                | PowerState::BATTERY_OFF
                | PowerState::SCREEN_OFF_UNLOCKED
                | PowerState::SCREEN_OFF_LOCKED,
        );
    }
    if requires_unlock {
        power = power.without(
            PowerState::SWITCH_OFF | PowerState::BATTERY_OFF | PowerState::SCREEN_OFF_LOCKED,
        );
    }
    power
}
