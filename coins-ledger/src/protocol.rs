//! Sync message payloads
//!
//! Carried as the JSON payload of a [`coins_messaging::Envelope`]; the
//! envelope's type tag selects the payload.

use crate::types::{Multiplier, PlayerId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A balance was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Account
    pub player: PlayerId,

    /// New balance
    pub balance: Decimal,

    /// Balance before the write, when the writer knew it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Decimal>,
}

/// A multiplier was created, edited, queued, or activated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierUpdate {
    /// Full multiplier row
    pub multiplier: Multiplier,

    /// Whether the sender considers it enabled
    pub enabled: bool,
}

/// A multiplier was disabled and removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierDisable {
    /// Multiplier row as last seen by the sender
    pub multiplier: Multiplier,
}

/// Ask peers to replay every multiplier they hold
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierRequest {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MultiplierData, MultiplierKind};

    #[test]
    fn test_balance_update_wire_format() {
        let player = PlayerId::new_v4();
        let update = BalanceUpdate {
            player,
            balance: Decimal::new(1_050, 2),
            previous: None,
        };

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["player"], player.to_string());
        assert_eq!(json["balance"], "10.50");
        assert!(json.get("previous").is_none());

        let parsed: BalanceUpdate = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, update);
    }

    #[test]
    fn test_multiplier_update_round_trip() {
        let mut multiplier = Multiplier::new(
            Some("lobby"),
            MultiplierData::system(2, 30, MultiplierKind::Server).unwrap(),
        );
        multiplier.assign_id(3);
        multiplier.activate(1_000);

        let update = MultiplierUpdate {
            multiplier,
            enabled: true,
        };
        let json = serde_json::to_string(&update).unwrap();
        let parsed: MultiplierUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, update);
    }
}
