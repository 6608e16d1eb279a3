//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Charger state reported by the controller board."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, IntoStaticStr};

/// State machine of the charger board. Only the hardware moves between states;
/// the controller observes them and influences them solely through the
/// current it advertises.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ChargerState {
    Start,
    SettleTime,
    TestIncomingMains,
    MainsFaultStart,
    MainsFault,
    IdleStart,
    Idle,
    PlugPresentStart,
    PlugPresent,
    CarConnectedStart,
    CarConnected,
    ChargingStart,
    Charging,
    ChargeCompleteStart,
    ChargeComplete,
    ChargeSuspendedStart,
    ChargeSuspended,
    ChargeUnknownState,
}

/// Coarse grouping of [`ChargerState`]; each family except start has a transient
/// `-start` entry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StateFamily {
    Start,
    MainsFault,
    Idle,
    PlugPresent,
    CarConnected,
    Charging,
    ChargeComplete,
    ChargeSuspended,
    Unknown,
}

impl ChargerState {
    /// Decode the telemetry state id. Ids the board does not define map to
    /// [`ChargerState::ChargeUnknownState`].
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => Self::Start,
            1 => Self::SettleTime,
            2 => Self::TestIncomingMains,
            3 => Self::MainsFaultStart,
            4 => Self::MainsFault,
            5 => Self::IdleStart,
            6 => Self::Idle,
            7 => Self::PlugPresentStart,
            8 => Self::PlugPresent,
            9 => Self::CarConnectedStart,
            10 => Self::CarConnected,
            11 => Self::ChargingStart,
            12 => Self::Charging,
            13 => Self::ChargeCompleteStart,
            14 => Self::ChargeComplete,
            15 => Self::ChargeSuspendedStart,
            16 => Self::ChargeSuspended,
            _ => Self::ChargeUnknownState,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::SettleTime => 1,
            Self::TestIncomingMains => 2,
            Self::MainsFaultStart => 3,
            Self::MainsFault => 4,
            Self::IdleStart => 5,
            Self::Idle => 6,
            Self::PlugPresentStart => 7,
            Self::PlugPresent => 8,
            Self::CarConnectedStart => 9,
            Self::CarConnected => 10,
            Self::ChargingStart => 11,
            Self::Charging => 12,
            Self::ChargeCompleteStart => 13,
            Self::ChargeComplete => 14,
            Self::ChargeSuspendedStart => 15,
            Self::ChargeSuspended => 16,
            Self::ChargeUnknownState => 18,
        }
    }

    pub fn family(self) -> StateFamily {
        match self {
            Self::Start | Self::SettleTime | Self::TestIncomingMains => StateFamily::Start,
            Self::MainsFaultStart | Self::MainsFault => StateFamily::MainsFault,
            Self::IdleStart | Self::Idle => StateFamily::Idle,
            Self::PlugPresentStart | Self::PlugPresent => StateFamily::PlugPresent,
            Self::CarConnectedStart | Self::CarConnected => StateFamily::CarConnected,
            Self::ChargingStart | Self::Charging => StateFamily::Charging,
            Self::ChargeCompleteStart | Self::ChargeComplete => StateFamily::ChargeComplete,
            Self::ChargeSuspendedStart | Self::ChargeSuspended => StateFamily::ChargeSuspended,
            Self::ChargeUnknownState => StateFamily::Unknown,
        }
    }

    /// The brief entry state of a family.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::MainsFaultStart
                | Self::IdleStart
                | Self::PlugPresentStart
                | Self::CarConnectedStart
                | Self::ChargingStart
                | Self::ChargeCompleteStart
                | Self::ChargeSuspendedStart
        )
    }

    pub fn is_charging(self) -> bool {
        self.family() == StateFamily::Charging
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn ids_round_trip_and_names_match_board_labels() {
        for state in ChargerState::iter() {
            assert_eq!(ChargerState::from_id(state.id()), state);
        }
        assert_eq!(ChargerState::from_id(12).to_string(), "charging");
        assert_eq!(ChargerState::from_id(9).as_ref(), "car-connected-start");
        assert_eq!(ChargerState::from_id(18).to_string(), "charge-unknown-state");
    }

    #[test]
    fn undefined_ids_are_unknown() {
        assert_eq!(ChargerState::from_id(17), ChargerState::ChargeUnknownState);
        assert_eq!(ChargerState::from_id(0xFF), ChargerState::ChargeUnknownState);
    }

    #[test]
    fn families_group_transient_entries() {
        assert_eq!(ChargerState::ChargingStart.family(), StateFamily::Charging);
        assert!(ChargerState::ChargingStart.is_transient());
        assert!(!ChargerState::Charging.is_transient());
        assert_eq!(ChargerState::SettleTime.family(), StateFamily::Start);
    }
}
