//! Core types for the ledger
//!
//! All types are designed for:
//! - Lossless serialization (JSON on the wire, bincode at rest)
//! - Exact arithmetic (Decimal for balances)
//! - Timestamp-derived multiplier state (nothing stored redundantly)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Display name of the reserved multiplier account
pub const SYSTEM_NAME: &str = "SERVER";

/// Identifier of the reserved multiplier account
pub const SYSTEM_UUID: Uuid = Uuid::from_u128(1);

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Player identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Wrap a UUID
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Random identifier
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// The reserved multiplier account
    pub fn system() -> Self {
        Self(SYSTEM_UUID)
    }

    /// Whether this is the reserved multiplier account
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_UUID
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for PlayerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Account row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Player identifier (immutable)
    pub id: PlayerId,

    /// Display name, stored lowercase
    pub name: String,

    /// Current balance
    pub balance: Decimal,
}

impl Account {
    /// Create account row
    pub fn new(id: PlayerId, name: impl Into<String>, balance: Decimal) -> Self {
        Self {
            id,
            name: name.into().to_lowercase(),
            balance,
        }
    }
}

/// Local notification for a balance change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    /// Account that changed
    pub player: PlayerId,

    /// Balance before the change, when known
    pub previous: Option<Decimal>,

    /// Balance after the change
    pub balance: Decimal,
}

impl BalanceChange {
    /// Signed difference, when the previous balance is known
    pub fn delta(&self) -> Option<Decimal> {
        self.previous.map(|previous| self.balance - previous)
    }
}

/// Exclusivity class and visibility of a multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MultiplierKind {
    /// One per realm
    Server,
    /// One across the cluster, visible in every realm
    Global,
    /// One per owner per realm
    Personal,
}

impl MultiplierKind {
    /// Parse from a config/command string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SERVER" => Some(MultiplierKind::Server),
            "GLOBAL" => Some(MultiplierKind::Global),
            "PERSONAL" => Some(MultiplierKind::Personal),
            _ => None,
        }
    }
}

impl fmt::Display for MultiplierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MultiplierKind::Server => "SERVER",
            MultiplierKind::Global => "GLOBAL",
            MultiplierKind::Personal => "PERSONAL",
        };
        write!(f, "{}", name)
    }
}

/// Who owns a multiplier and what it does
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiplierData {
    owner: PlayerId,
    owner_name: String,
    amount: i32,
    minutes: i32,
    kind: MultiplierKind,
}

impl MultiplierData {
    /// Player-owned multiplier data
    ///
    /// A personal multiplier must belong to a real player, and the duration
    /// must be positive.
    pub fn new(
        owner: PlayerId,
        owner_name: impl Into<String>,
        amount: i32,
        minutes: i32,
        kind: MultiplierKind,
    ) -> crate::Result<Self> {
        if kind == MultiplierKind::Personal && owner.is_system() {
            return Err(crate::Error::InvalidMultiplier(
                "personal multiplier can't be owned by the system account".to_string(),
            ));
        }
        validate_minutes(minutes)?;

        Ok(Self {
            owner,
            owner_name: owner_name.into(),
            amount,
            minutes,
            kind,
        })
    }

    /// System-owned multiplier data
    pub fn system(amount: i32, minutes: i32, kind: MultiplierKind) -> crate::Result<Self> {
        Self::new(PlayerId::system(), SYSTEM_NAME, amount, minutes, kind)
    }

    /// Owner
    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    /// Owner display name
    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    /// Multiplicative factor
    pub fn amount(&self) -> i32 {
        self.amount
    }

    /// Duration in minutes
    pub fn minutes(&self) -> i32 {
        self.minutes
    }

    /// Scope
    pub fn kind(&self) -> MultiplierKind {
        self.kind
    }

    /// Whether the system account owns this multiplier
    pub fn is_system(&self) -> bool {
        self.owner.is_system()
    }

    fn duration_millis(&self) -> i64 {
        i64::from(self.minutes.max(0)) * MILLIS_PER_MINUTE
    }
}

pub(crate) fn validate_minutes(minutes: i32) -> crate::Result<()> {
    if minutes <= 0 {
        return Err(crate::Error::InvalidMultiplier(format!(
            "duration must be positive, got {} minutes",
            minutes
        )));
    }
    Ok(())
}

/// Lifecycle state derived from the stored timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplierState {
    /// No durable id yet
    Unpersisted,
    /// Persisted, never activated, not waiting
    Ready,
    /// Waiting for its exclusivity class to free up
    Queued {
        /// Queue entry (ms since epoch)
        since: i64,
    },
    /// Active
    Enabled {
        /// Activation (ms since epoch)
        since: i64,
    },
    /// Duration elapsed; disabled as soon as a read notices
    Expired {
        /// Activation (ms since epoch)
        since: i64,
    },
}

/// A bonus scaling future credits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Multiplier {
    id: i64,
    realm: String,
    data: MultiplierData,
    start: i64,
    queue_start: i64,
}

impl Multiplier {
    /// Id of a multiplier not yet persisted
    pub const UNASSIGNED: i64 = -1;

    /// New, unpersisted multiplier
    ///
    /// A `Server` multiplier needs a realm; without one it is coerced to `Global`.
    pub fn new(realm: Option<&str>, mut data: MultiplierData) -> Self {
        if realm.is_none() && data.kind == MultiplierKind::Server {
            tracing::warn!(
                owner = %data.owner,
                "Server multiplier created without a realm, forcing type to GLOBAL"
            );
            data.kind = MultiplierKind::Global;
        }

        Self {
            id: Self::UNASSIGNED,
            realm: realm.unwrap_or_default().to_lowercase(),
            data,
            start: 0,
            queue_start: 0,
        }
    }

    /// Rebuild a persisted row
    pub(crate) fn from_row(id: i64, realm: String, data: MultiplierData, start: i64, queue_start: i64) -> Self {
        Self {
            id,
            realm,
            data,
            start,
            queue_start,
        }
    }

    /// Durable id, `-1` until persisted
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Declared realm of the creating process
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Owner and effect
    pub fn data(&self) -> &MultiplierData {
        &self.data
    }

    /// Activation timestamp (ms), `0` when never activated
    pub fn start_millis(&self) -> i64 {
        self.start
    }

    /// Queue entry timestamp (ms), `0` when not queued
    pub fn queue_millis(&self) -> i64 {
        self.queue_start
    }

    /// Whether a durable id has been assigned
    pub fn is_persisted(&self) -> bool {
        self.id >= 0
    }

    /// Whether the activation window has elapsed (pure)
    pub fn is_expired(&self, now: i64) -> bool {
        self.start != 0 && now - self.start >= self.data.duration_millis()
    }

    /// Derived lifecycle state at `now`
    pub fn state(&self, now: i64) -> MultiplierState {
        if !self.is_persisted() {
            MultiplierState::Unpersisted
        } else if self.start != 0 {
            if self.is_expired(now) {
                MultiplierState::Expired { since: self.start }
            } else {
                MultiplierState::Enabled { since: self.start }
            }
        } else if self.queue_start != 0 {
            MultiplierState::Queued {
                since: self.queue_start,
            }
        } else {
            MultiplierState::Ready
        }
    }

    /// Active and not expired
    pub fn is_enabled(&self, now: i64) -> bool {
        matches!(self.state(now), MultiplierState::Enabled { .. })
    }

    /// Waiting in queue
    pub fn is_queued(&self, now: i64) -> bool {
        matches!(self.state(now), MultiplierState::Queued { .. })
    }

    /// Has an activation timestamp, expired or not
    pub fn has_started(&self) -> bool {
        self.start != 0
    }

    /// End of the activation window (ms), `None` when never activated
    pub fn ends_at_millis(&self) -> Option<i64> {
        self.has_started()
            .then(|| self.start + self.data.duration_millis())
    }

    /// Remaining activation time (ms), `0` when not enabled
    pub fn remaining_millis(&self, now: i64) -> i64 {
        match self.ends_at_millis() {
            Some(end) if self.is_enabled(now) => (end - now).max(0),
            _ => 0,
        }
    }

    /// Whether the multiplier applies to `realm`
    pub fn visible_in(&self, realm: &str) -> bool {
        self.data.kind == MultiplierKind::Global || self.realm.eq_ignore_ascii_case(realm)
    }

    /// Whether `player` earns with this multiplier
    pub fn can_use_player(&self, player: PlayerId, now: i64) -> bool {
        self.is_enabled(now)
            && (self.data.kind != MultiplierKind::Personal || self.data.owner == player)
    }

    /// Whether this (enabled) multiplier prevents `candidate` from activating
    pub fn blocks(&self, candidate: &Multiplier, now: i64) -> bool {
        self.id != candidate.id
            && self.is_enabled(now)
            && self.data.kind == candidate.data.kind
            && (self.data.kind != MultiplierKind::Personal
                || self.data.owner == candidate.data.owner)
    }

    pub(crate) fn assign_id(&mut self, id: i64) {
        self.id = id;
    }

    pub(crate) fn activate(&mut self, now: i64) {
        self.start = now;
        self.queue_start = 0;
    }

    pub(crate) fn enqueue(&mut self, now: i64) {
        if self.queue_start == 0 {
            self.queue_start = now;
        }
    }

    pub(crate) fn edit(&mut self, amount: Option<i32>, minutes: Option<i32>) {
        if let Some(amount) = amount {
            self.data.amount = amount;
        }
        if let Some(minutes) = minutes {
            self.data.minutes = minutes;
        }
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Multiplier{{id={}, realm='{}', owner={}, amount={}, minutes={}, kind={}, start={}, queue_start={}}}",
            self.id,
            self.realm,
            self.data.owner_name,
            self.data.amount,
            self.data.minutes,
            self.data.kind,
            self.start,
            self.queue_start
        )
    }
}

/// Format a duration as `[d, ]HH:MM:SS`
pub fn format_remaining(millis: i64) -> String {
    let total_seconds = millis.max(0) / 1000;
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{}, {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn personal(owner: PlayerId) -> Multiplier {
        let data = MultiplierData::new(owner, "steve", 2, 10, MultiplierKind::Personal).unwrap();
        let mut m = Multiplier::new(Some("Lobby"), data);
        m.assign_id(7);
        m
    }

    #[test]
    fn test_system_account_id() {
        assert_eq!(
            PlayerId::system().to_string(),
            "00000000-0000-0000-0000-000000000001"
        );
        assert!(PlayerId::system().is_system());
        assert!(!PlayerId::new_v4().is_system());
    }

    #[test]
    fn test_personal_multiplier_rejects_system_owner() {
        assert!(MultiplierData::system(2, 10, MultiplierKind::Personal).is_err());
        assert!(MultiplierData::system(2, 10, MultiplierKind::Server).is_ok());
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        for minutes in [0, -5] {
            let err = MultiplierData::system(2, minutes, MultiplierKind::Server).unwrap_err();
            assert!(matches!(err, crate::Error::InvalidMultiplier(_)));
        }
        assert!(MultiplierData::new(PlayerId::new_v4(), "steve", 2, 0, MultiplierKind::Personal).is_err());
    }

    #[test]
    fn test_server_multiplier_without_realm_becomes_global() {
        let data = MultiplierData::system(2, 10, MultiplierKind::Server).unwrap();
        let m = Multiplier::new(None, data);
        assert_eq!(m.data().kind(), MultiplierKind::Global);
        assert_eq!(m.id(), Multiplier::UNASSIGNED);
    }

    #[test]
    fn test_state_derivation() {
        let owner = PlayerId::new_v4();
        let data = MultiplierData::new(owner, "steve", 2, 10, MultiplierKind::Personal).unwrap();
        let mut m = Multiplier::new(Some("lobby"), data);
        assert_eq!(m.state(1_000), MultiplierState::Unpersisted);

        m.assign_id(1);
        assert_eq!(m.state(1_000), MultiplierState::Ready);

        m.enqueue(1_000);
        m.enqueue(2_000);
        assert_eq!(m.state(3_000), MultiplierState::Queued { since: 1_000 });

        m.activate(5_000);
        assert_eq!(m.queue_millis(), 0);
        assert_eq!(m.state(5_000), MultiplierState::Enabled { since: 5_000 });

        let end = 5_000 + 10 * 60_000;
        assert_eq!(m.ends_at_millis(), Some(end));
        assert!(m.is_enabled(end - 1));
        assert!(!m.is_expired(end - 1));
        assert!(m.is_expired(end));
        assert_eq!(m.state(end), MultiplierState::Expired { since: 5_000 });
        assert_eq!(m.remaining_millis(end - 1_000), 1_000);
        assert_eq!(m.remaining_millis(end), 0);
    }

    #[test]
    fn test_can_use_player() {
        let owner = PlayerId::new_v4();
        let mut m = personal(owner);
        assert!(!m.can_use_player(owner, 100));

        m.activate(100);
        assert!(m.can_use_player(owner, 200));
        assert!(!m.can_use_player(PlayerId::new_v4(), 200));

        let data = MultiplierData::system(3, 10, MultiplierKind::Server).unwrap();
        let mut server = Multiplier::new(Some("lobby"), data);
        server.assign_id(8);
        server.activate(100);
        assert!(server.can_use_player(PlayerId::new_v4(), 200));
    }

    #[test]
    fn test_visibility() {
        let server = Multiplier::new(
            Some("Lobby"),
            MultiplierData::system(2, 10, MultiplierKind::Server).unwrap(),
        );
        assert_eq!(server.realm(), "lobby");
        assert!(server.visible_in("lobby"));
        assert!(server.visible_in("LOBBY"));
        assert!(!server.visible_in("survival"));

        let global = Multiplier::new(
            Some("lobby"),
            MultiplierData::system(2, 10, MultiplierKind::Global).unwrap(),
        );
        assert!(global.visible_in("survival"));
    }

    #[test]
    fn test_blocks_personal_only_same_owner() {
        let owner = PlayerId::new_v4();
        let mut active = personal(owner);
        active.activate(100);

        let mut same_owner = personal(owner);
        same_owner.assign_id(9);
        let mut other_owner = personal(PlayerId::new_v4());
        other_owner.assign_id(10);

        assert!(active.blocks(&same_owner, 200));
        assert!(!active.blocks(&other_owner, 200));
        assert!(!active.blocks(&active.clone(), 200));
    }

    #[test]
    fn test_multiplier_json_round_trip() {
        let mut m = personal(PlayerId::new_v4());
        m.enqueue(1_234);

        let json = serde_json::to_string(&m).unwrap();
        let restored: Multiplier = serde_json::from_str(&json).unwrap();
        assert_eq!(m, restored);
    }

    #[test]
    fn test_account_json_round_trip() {
        let account = Account::new(PlayerId::new_v4(), "Steve", Decimal::new(12_345, 2));
        assert_eq!(account.name, "steve");

        let json = serde_json::to_string(&account).unwrap();
        let restored: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(account, restored);
    }

    #[test]
    fn test_balance_change_delta() {
        let change = BalanceChange {
            player: PlayerId::new_v4(),
            previous: Some(Decimal::from(100)),
            balance: Decimal::from(60),
        };
        assert_eq!(change.delta(), Some(Decimal::from(-40)));
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(0), "00:00:00");
        assert_eq!(format_remaining(61_000), "00:01:01");
        assert_eq!(format_remaining(3_600_000 + 5_000), "01:00:05");
        assert_eq!(format_remaining(2 * 86_400_000 + 3_000), "2, 00:00:03");
    }
}
