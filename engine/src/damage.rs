use duelgrid_types::Ability;

/// Pure damage function. The balance module behind it is out of scope; the
/// coordinator only requires that the same inputs produce the same output.
pub trait DamageModel {
    fn damage(&self, ability: &Ability, combo: u32) -> u32;
}

/// Bonus damage per combo step, in percent of the ability's base damage.
pub const COMBO_BONUS_PERCENT: u32 = 25;

/// Default model: base damage plus 25% per consecutive hit in the streak.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComboScaledDamage;

impl DamageModel for ComboScaledDamage {
    fn damage(&self, ability: &Ability, combo: u32) -> u32 {
        let bonus = ability
            .base_damage
            .saturating_mul(COMBO_BONUS_PERCENT.saturating_mul(combo))
            / 100;
        ability.base_damage.saturating_add(bonus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duelgrid_types::AbilityEffect;

    fn ability(base_damage: u32) -> Ability {
        Ability {
            id: 1,
            name: "Strike".to_string(),
            mana_cost: 10,
            base_damage,
            effect: AbilityEffect::None,
        }
    }

    #[test]
    fn test_combo_scaling() {
        let model = ComboScaledDamage;
        let strike = ability(20);
        assert_eq!(model.damage(&strike, 0), 20);
        assert_eq!(model.damage(&strike, 1), 25);
        assert_eq!(model.damage(&strike, 2), 30);
        assert_eq!(model.damage(&strike, 4), 40);
    }

    #[test]
    fn test_damage_saturates() {
        let model = ComboScaledDamage;
        let nuke = ability(u32::MAX);
        assert_eq!(model.damage(&nuke, 100), u32::MAX);
    }
}
