//! Initiative rolls.

use rand::Rng;
use skirmish_protocol::EntityId;

/// Sides of the initiative die.
pub const INITIATIVE_DIE: i32 = 20;

/// One participant's roll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiativeRoll {
    pub entity: EntityId,
    /// The raw die result, `1..=20`.
    pub roll: i32,
    pub modifier: i32,
    pub total: i32,
}

/// `floor((dex - 10) / 2)`, rounding toward negative infinity.
pub fn dex_modifier(dexterity: i32) -> i32 {
    (dexterity - 10).div_euclid(2)
}

/// Rolls a d20 for each participant, adds the dexterity modifier where a
/// dexterity is known, and sorts by total, highest first. Ties keep the
/// participants' input order.
pub fn roll_initiative<R: Rng>(
    rng: &mut R,
    participants: &[(EntityId, Option<i32>)],
) -> Vec<InitiativeRoll> {
    let rolls = participants
        .iter()
        .map(|(entity, dexterity)| {
            let roll = rng.random_range(1..=INITIATIVE_DIE);
            let modifier = dexterity.map_or(0, dex_modifier);
            InitiativeRoll {
                entity: entity.clone(),
                roll,
                modifier,
                total: roll + modifier,
            }
        })
        .collect();
    sort_by_total(rolls)
}

/// Stable sort, descending by total.
pub fn sort_by_total(mut rolls: Vec<InitiativeRoll>) -> Vec<InitiativeRoll> {
    rolls.sort_by(|a, b| b.total.cmp(&a.total));
    rolls
}

/// Just the entity ids, in turn order.
pub fn turn_order(rolls: &[InitiativeRoll]) -> Vec<EntityId> {
    rolls.iter().map(|r| r.entity.clone()).collect()
}
