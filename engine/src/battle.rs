//! Turn coordinator.
//!
//! Enforces strict alternating turns between host and guest, validates actions
//! against the current turn owner and mana, applies damage, and detects
//! terminal conditions. Every rejection is pure: out-of-order or duplicate
//! messages cannot corrupt turn ownership.

use duelgrid_types::{AbilityEffect, BattlePhase, BattleState, CharacterSnapshot, Role};
use thiserror::Error;

use crate::damage::DamageModel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BattleError {
    #[error("it is not that player's turn")]
    NotYourTurn,
    #[error("ability {ability_id} is not in the acting character's set")]
    UnknownAbility { ability_id: u32 },
    #[error("insufficient mana: need {required}, have {available}")]
    InsufficientMana { required: u32, available: u32 },
    #[error("battle is already over")]
    BattleOver,
}

/// How an accepted action ended the turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnEnd {
    Continue { next_turn_owner: Role },
    Victory { winner: Role },
}

/// Result of an accepted action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    pub actor: Role,
    pub ability_id: u32,
    pub damage: u32,
    /// Opponent health after the hit, floored at 0.
    pub new_health: u32,
    pub extra_turn: bool,
    pub end: TurnEnd,
}

/// A running battle: two frozen character snapshots plus the mutable
/// [`BattleState`] they parameterize.
#[derive(Clone, Debug, PartialEq)]
pub struct Battle {
    host_snapshot: CharacterSnapshot,
    guest_snapshot: CharacterSnapshot,
    state: BattleState,
}

impl Battle {
    pub fn new(host_snapshot: CharacterSnapshot, guest_snapshot: CharacterSnapshot) -> Self {
        let state = BattleState::new(&host_snapshot, &guest_snapshot);
        Self {
            host_snapshot,
            guest_snapshot,
            state,
        }
    }

    pub fn state(&self) -> &BattleState {
        &self.state
    }

    pub fn snapshot(&self, role: Role) -> &CharacterSnapshot {
        match role {
            Role::Host => &self.host_snapshot,
            Role::Guest => &self.guest_snapshot,
        }
    }

    /// Validate and apply one action for `actor`.
    ///
    /// Rejections happen before any mutation; the turn is consumed only by an
    /// accepted action.
    pub fn submit_action(
        &mut self,
        actor: Role,
        ability_id: u32,
        model: &impl DamageModel,
    ) -> Result<ActionOutcome, BattleError> {
        match self.state.phase {
            BattlePhase::AwaitingHost if actor == Role::Host => {}
            BattlePhase::AwaitingGuest if actor == Role::Guest => {}
            _ => return Err(BattleError::NotYourTurn),
        }

        let ability = self
            .snapshot(actor)
            .ability(ability_id)
            .ok_or(BattleError::UnknownAbility { ability_id })?
            .clone();

        let actor_state = self.state.combatant(actor);
        if actor_state.mana < ability.mana_cost {
            return Err(BattleError::InsufficientMana {
                required: ability.mana_cost,
                available: actor_state.mana,
            });
        }

        self.state.phase = BattlePhase::Resolving;

        // Damage scales with the streak the actor carried into this action.
        let damage = model.damage(&ability, self.state.combatant(actor).combo);

        {
            let actor_state = self.state.combatant_mut(actor);
            actor_state.mana -= ability.mana_cost;
            actor_state.combo = actor_state.combo.saturating_add(1);
        }

        let defender = actor.other();
        let defender_state = self.state.combatant_mut(defender);
        defender_state.health = defender_state.health.saturating_sub(damage);
        if damage > 0 {
            // The streak resets when a side takes damage, not when it acts.
            defender_state.combo = 0;
        }
        let new_health = defender_state.health;

        let extra_turn = ability.effect == AbilityEffect::ExtraTurn;
        let end = if new_health == 0 {
            self.state.phase = BattlePhase::Over;
            self.state.winner = Some(actor);
            TurnEnd::Victory { winner: actor }
        } else {
            let next = if extra_turn { actor } else { defender };
            self.state.turn_owner = next;
            self.state.turn = self.state.turn.saturating_add(1);
            self.state.phase = BattlePhase::awaiting(next);
            TurnEnd::Continue {
                next_turn_owner: next,
            }
        };

        Ok(ActionOutcome {
            actor,
            ability_id,
            damage,
            new_health,
            extra_turn,
            end,
        })
    }

    /// Immediately terminal; the other side wins regardless of whose turn it is.
    pub fn surrender(&mut self, actor: Role) -> Result<Role, BattleError> {
        if self.state.is_over() {
            return Err(BattleError::BattleOver);
        }
        let winner = actor.other();
        self.state.phase = BattlePhase::Over;
        self.state.winner = Some(winner);
        Ok(winner)
    }

    /// Terminal forfeit in favor of the opponent; invoked when a disconnect
    /// grace period expires.
    pub fn forfeit(&mut self, leaver: Role) -> Result<Role, BattleError> {
        self.surrender(leaver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::damage::ComboScaledDamage;
    use duelgrid_types::Ability;

    const STRIKE: u32 = 1;
    const FLURRY: u32 = 2;
    const NUKE: u32 = 3;

    fn snapshot(max_health: u32, max_mana: u32) -> CharacterSnapshot {
        CharacterSnapshot {
            character_id: 1,
            name: "Fighter".to_string(),
            max_health,
            max_mana,
            abilities: vec![
                Ability {
                    id: STRIKE,
                    name: "Strike".to_string(),
                    mana_cost: 5,
                    base_damage: 10,
                    effect: AbilityEffect::None,
                },
                Ability {
                    id: FLURRY,
                    name: "Flurry".to_string(),
                    mana_cost: 10,
                    base_damage: 5,
                    effect: AbilityEffect::ExtraTurn,
                },
                Ability {
                    id: NUKE,
                    name: "Nuke".to_string(),
                    mana_cost: 30,
                    base_damage: 100,
                    effect: AbilityEffect::None,
                },
            ],
        }
    }

    fn battle() -> Battle {
        Battle::new(snapshot(100, 50), snapshot(100, 50))
    }

    #[test]
    fn test_turn_ownership_strictly_alternates() {
        let mut battle = battle();
        let model = ComboScaledDamage;

        let mut owner = Role::Host;
        for _ in 0..6 {
            let before = battle.state().turn_owner;
            assert_eq!(before, owner);
            let outcome = battle.submit_action(owner, STRIKE, &model).unwrap();
            match outcome.end {
                TurnEnd::Continue { next_turn_owner } => {
                    assert_eq!(next_turn_owner, before.other());
                    owner = next_turn_owner;
                }
                TurnEnd::Victory { .. } => panic!("battle ended early"),
            }
        }
    }

    #[test]
    fn test_acting_out_of_turn_is_rejected_without_mutation() {
        let mut battle = battle();
        let model = ComboScaledDamage;
        let before = battle.state().clone();

        assert_eq!(
            battle.submit_action(Role::Guest, STRIKE, &model),
            Err(BattleError::NotYourTurn)
        );
        assert_eq!(battle.state(), &before);
    }

    #[test]
    fn test_duplicate_message_cannot_steal_a_turn() {
        let mut battle = battle();
        let model = ComboScaledDamage;

        battle.submit_action(Role::Host, STRIKE, &model).unwrap();
        // A replay of the host's action arrives after the turn flipped.
        assert_eq!(
            battle.submit_action(Role::Host, STRIKE, &model),
            Err(BattleError::NotYourTurn)
        );
        assert_eq!(battle.state().turn_owner, Role::Guest);
    }

    #[test]
    fn test_unknown_ability_rejected() {
        let mut battle = battle();
        let model = ComboScaledDamage;
        assert_eq!(
            battle.submit_action(Role::Host, 99, &model),
            Err(BattleError::UnknownAbility { ability_id: 99 })
        );
    }

    #[test]
    fn test_insufficient_mana_changes_nothing_and_keeps_the_turn() {
        // 50 mana, 30-cost nuke: the second cast must bounce with the turn
        // intact. Enough health that nothing dies first.
        let mut battle = Battle::new(snapshot(300, 50), snapshot(300, 50));
        let model = ComboScaledDamage;

        battle.submit_action(Role::Host, NUKE, &model).unwrap();
        battle.submit_action(Role::Guest, STRIKE, &model).unwrap();

        let before = battle.state().clone();
        assert_eq!(
            battle.submit_action(Role::Host, NUKE, &model),
            Err(BattleError::InsufficientMana {
                required: 30,
                available: 20,
            })
        );
        assert_eq!(battle.state(), &before);
        assert_eq!(battle.state().turn_owner, Role::Host);
    }

    #[test]
    fn test_combo_increments_for_actor_and_resets_when_hit() {
        let mut battle = battle();
        let model = ComboScaledDamage;

        // Host hits: host streak 1, guest streak cleared by the hit.
        battle.submit_action(Role::Host, STRIKE, &model).unwrap();
        assert_eq!(battle.state().host.combo, 1);
        assert_eq!(battle.state().guest.combo, 0);

        // Guest hits back: guest streak 1, host streak reset by being hit.
        battle.submit_action(Role::Guest, STRIKE, &model).unwrap();
        assert_eq!(battle.state().guest.combo, 1);
        assert_eq!(battle.state().host.combo, 0);
    }

    #[test]
    fn test_combo_survives_own_consecutive_hits() {
        // With an extra-turn ability the host acts twice in a row; its streak
        // must keep growing because it was never hit in between.
        let mut battle = battle();
        let model = ComboScaledDamage;

        battle.submit_action(Role::Host, FLURRY, &model).unwrap();
        assert_eq!(battle.state().host.combo, 1);
        let outcome = battle.submit_action(Role::Host, FLURRY, &model).unwrap();
        assert_eq!(battle.state().host.combo, 2);
        // Second flurry lands with a one-step streak bonus: 5 + 25%.
        assert_eq!(outcome.damage, 6);
    }

    #[test]
    fn test_extra_turn_keeps_ownership_then_alternation_resumes() {
        let mut battle = battle();
        let model = ComboScaledDamage;

        let outcome = battle.submit_action(Role::Host, FLURRY, &model).unwrap();
        assert!(outcome.extra_turn);
        assert_eq!(
            outcome.end,
            TurnEnd::Continue {
                next_turn_owner: Role::Host
            }
        );

        let outcome = battle.submit_action(Role::Host, STRIKE, &model).unwrap();
        assert_eq!(
            outcome.end,
            TurnEnd::Continue {
                next_turn_owner: Role::Guest
            }
        );
    }

    #[test]
    fn test_turn_counter_increments_per_completed_turn() {
        let mut battle = battle();
        let model = ComboScaledDamage;
        assert_eq!(battle.state().turn, 1);
        battle.submit_action(Role::Host, STRIKE, &model).unwrap();
        assert_eq!(battle.state().turn, 2);
        battle.submit_action(Role::Guest, STRIKE, &model).unwrap();
        assert_eq!(battle.state().turn, 3);
    }

    #[test]
    fn test_health_floored_at_zero_and_battle_ends() {
        let mut battle = Battle::new(snapshot(100, 50), snapshot(95, 50));
        let model = ComboScaledDamage;

        let outcome = battle.submit_action(Role::Host, NUKE, &model).unwrap();
        assert_eq!(outcome.new_health, 0);
        assert_eq!(outcome.end, TurnEnd::Victory { winner: Role::Host });
        assert!(battle.state().is_over());
        assert_eq!(battle.state().winner, Some(Role::Host));

        // No further action succeeds for either side.
        assert_eq!(
            battle.submit_action(Role::Guest, STRIKE, &model),
            Err(BattleError::NotYourTurn)
        );
        assert_eq!(
            battle.submit_action(Role::Host, STRIKE, &model),
            Err(BattleError::NotYourTurn)
        );
    }

    #[test]
    fn test_exact_lethal_ends_battle() {
        // Guest at exactly nuke damage: reduced to exactly 0.
        let mut battle = Battle::new(snapshot(100, 50), snapshot(100, 50));
        let model = ComboScaledDamage;
        let outcome = battle.submit_action(Role::Host, NUKE, &model).unwrap();
        assert_eq!(outcome.damage, 100);
        assert_eq!(outcome.new_health, 0);
        assert_eq!(outcome.end, TurnEnd::Victory { winner: Role::Host });
    }

    #[test]
    fn test_surrender_is_terminal_regardless_of_turn() {
        let mut battle = battle();
        // Host owns the turn, but the guest may surrender.
        let winner = battle.surrender(Role::Guest).unwrap();
        assert_eq!(winner, Role::Host);
        assert!(battle.state().is_over());
        assert_eq!(battle.surrender(Role::Host), Err(BattleError::BattleOver));
    }

    #[test]
    fn test_forfeit_awards_opponent() {
        let mut battle = battle();
        let winner = battle.forfeit(Role::Host).unwrap();
        assert_eq!(winner, Role::Guest);
        assert_eq!(battle.state().winner, Some(Role::Guest));
    }
}
