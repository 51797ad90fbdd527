use serde::{Deserialize, Serialize};

use crate::{CharacterSnapshot, Role};

/// Turn-coordination phase. Exactly one side owns the turn outside of
/// `resolving`/`over`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattlePhase {
    AwaitingHost,
    AwaitingGuest,
    Resolving,
    Over,
}

impl BattlePhase {
    pub fn awaiting(role: Role) -> Self {
        match role {
            Role::Host => BattlePhase::AwaitingHost,
            Role::Guest => BattlePhase::AwaitingGuest,
        }
    }

    /// The side allowed to act in this phase, if any.
    pub fn owner(self) -> Option<Role> {
        match self {
            BattlePhase::AwaitingHost => Some(Role::Host),
            BattlePhase::AwaitingGuest => Some(Role::Guest),
            BattlePhase::Resolving | BattlePhase::Over => None,
        }
    }
}

/// Mutable per-side battle data, distinct from the frozen snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatantState {
    pub health: u32,
    pub mana: u32,
    /// Consecutive-hit streak; multiplies damage, reset when this side is hit.
    pub combo: u32,
}

impl CombatantState {
    pub fn from_snapshot(snapshot: &CharacterSnapshot) -> Self {
        Self {
            health: snapshot.max_health,
            mana: snapshot.max_mana,
            combo: 0,
        }
    }
}

/// Mutable per-battle state. The character snapshots it was created from never
/// change during the battle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleState {
    pub host: CombatantState,
    pub guest: CombatantState,
    pub turn_owner: Role,
    /// Starts at 1; increments after each completed turn.
    pub turn: u32,
    pub phase: BattlePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Role>,
}

impl BattleState {
    /// Initial battle state: turn owner is the host.
    pub fn new(host: &CharacterSnapshot, guest: &CharacterSnapshot) -> Self {
        Self {
            host: CombatantState::from_snapshot(host),
            guest: CombatantState::from_snapshot(guest),
            turn_owner: Role::Host,
            turn: 1,
            phase: BattlePhase::AwaitingHost,
            winner: None,
        }
    }

    pub fn combatant(&self, role: Role) -> &CombatantState {
        match role {
            Role::Host => &self.host,
            Role::Guest => &self.guest,
        }
    }

    pub fn combatant_mut(&mut self, role: Role) -> &mut CombatantState {
        match role {
            Role::Host => &mut self.host,
            Role::Guest => &mut self.guest,
        }
    }

    pub fn is_over(&self) -> bool {
        self.phase == BattlePhase::Over
    }
}
