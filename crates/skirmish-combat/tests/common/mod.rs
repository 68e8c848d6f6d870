//! Test doubles shared by the combat integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use skirmish_combat::{
    ActionOutcome, AttackOutcome, DelayedAction, EffectTick, EventSink, World, WorldError,
};
use skirmish_protocol::{EntityId, EventKind, GameEvent, ItemId, Position};

// ===========================================================================
// TestWorld
// ===========================================================================

#[derive(Debug, Clone)]
pub struct Fighter {
    pub hp: i32,
    pub dex: Option<i32>,
    pub team: &'static str,
    pub inventory: Vec<ItemId>,
    pub effects: Vec<String>,
    /// Damage taken each time the fighter's turn ends.
    pub poison: u32,
    pub position: Position,
}

/// A tiny world: fixed attack damage, teams as alliances, poison as the
/// only status effect, and delayed actions that hit everyone standing on
/// the target tile.
pub struct TestWorld {
    fighters: Mutex<HashMap<EntityId, Fighter>>,
    attack_damage: u32,
}

impl TestWorld {
    pub fn new(attack_damage: u32) -> Self {
        Self {
            fighters: Mutex::new(HashMap::new()),
            attack_damage,
        }
    }

    /// Adds a fighter with no dexterity at the origin.
    pub fn add(&self, id: &str, team: &'static str, hp: i32) -> &Self {
        self.insert(
            id,
            Fighter {
                hp,
                dex: None,
                team,
                inventory: Vec::new(),
                effects: Vec::new(),
                poison: 0,
                position: Position::new(0, 0),
            },
        )
    }

    pub fn insert(&self, id: &str, fighter: Fighter) -> &Self {
        self.fighters
            .lock()
            .unwrap()
            .insert(EntityId::new(id), fighter);
        self
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut Fighter)) {
        let mut fighters = self.fighters.lock().unwrap();
        f(fighters.get_mut(&EntityId::new(id)).expect("unknown fighter"));
    }

    pub fn hp(&self, id: &str) -> i32 {
        self.fighters.lock().unwrap()[&EntityId::new(id)].hp
    }

    fn damage(fighters: &mut HashMap<EntityId, Fighter>, target: &EntityId, amount: u32) -> Option<AttackOutcome> {
        let fighter = fighters.get_mut(target)?;
        let was_alive = fighter.hp > 0;
        fighter.hp -= amount as i32;
        Some(AttackOutcome {
            target: target.clone(),
            hit: true,
            damage: amount,
            remaining_hp: fighter.hp,
            killed: was_alive && fighter.hp <= 0,
        })
    }
}

impl World for TestWorld {
    fn exists(&self, id: &EntityId) -> bool {
        self.fighters.lock().unwrap().contains_key(id)
    }

    fn dexterity(&self, id: &EntityId) -> Option<i32> {
        self.fighters.lock().unwrap().get(id).and_then(|f| f.dex)
    }

    fn is_alive(&self, id: &EntityId) -> bool {
        self.fighters
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|f| f.hp > 0)
    }

    fn allies(&self, id: &EntityId) -> Vec<EntityId> {
        let fighters = self.fighters.lock().unwrap();
        let Some(team) = fighters.get(id).map(|f| f.team) else {
            return Vec::new();
        };
        fighters
            .iter()
            .filter(|(other, f)| *other != id && f.team == team)
            .map(|(other, _)| other.clone())
            .collect()
    }

    fn position(&self, id: &EntityId) -> Option<Position> {
        self.fighters.lock().unwrap().get(id).map(|f| f.position)
    }

    fn active_effects(&self, id: &EntityId) -> Vec<String> {
        self.fighters
            .lock()
            .unwrap()
            .get(id)
            .map(|f| f.effects.clone())
            .unwrap_or_default()
    }

    fn resolve_attack(
        &self,
        attacker: &EntityId,
        target: &EntityId,
        _weapon: Option<&ItemId>,
    ) -> Result<AttackOutcome, WorldError> {
        let mut fighters = self.fighters.lock().unwrap();
        if !fighters.contains_key(attacker) {
            return Err(WorldError::EntityNotFound(attacker.clone()));
        }
        Self::damage(&mut fighters, target, self.attack_damage)
            .ok_or_else(|| WorldError::EntityNotFound(target.clone()))
    }

    fn drop_inventory(&self, id: &EntityId) -> Vec<ItemId> {
        self.fighters
            .lock()
            .unwrap()
            .get_mut(id)
            .map(|f| std::mem::take(&mut f.inventory))
            .unwrap_or_default()
    }

    fn tick_effects(&self, id: &EntityId) -> EffectTick {
        let mut fighters = self.fighters.lock().unwrap();
        let Some(fighter) = fighters.get_mut(id) else {
            return EffectTick::default();
        };
        if fighter.poison == 0 {
            return EffectTick::default();
        }
        let was_alive = fighter.hp > 0;
        fighter.hp -= fighter.poison as i32;
        EffectTick {
            damage: fighter.poison,
            expired: Vec::new(),
            killed: was_alive && fighter.hp <= 0,
        }
    }

    fn execute_delayed(&self, action: &DelayedAction) -> Result<ActionOutcome, WorldError> {
        let Some(at) = action.target_position else {
            return Err(WorldError::Rejected("no target position".into()));
        };
        let amount = action
            .parameters
            .get("damage")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as u32;

        let mut fighters = self.fighters.lock().unwrap();
        let targets: Vec<EntityId> = fighters
            .iter()
            .filter(|(_, f)| f.position == at && f.hp > 0)
            .map(|(id, _)| id.clone())
            .collect();
        let hits = targets
            .iter()
            .filter_map(|t| Self::damage(&mut fighters, t, amount))
            .collect();
        Ok(ActionOutcome { hits })
    }

    fn move_entity(&self, id: &EntityId, to: Position) -> Result<(), WorldError> {
        let mut fighters = self.fighters.lock().unwrap();
        let fighter = fighters
            .get_mut(id)
            .ok_or_else(|| WorldError::EntityNotFound(id.clone()))?;
        fighter.position = to;
        Ok(())
    }
}

// ===========================================================================
// RecordingSink
// ===========================================================================

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GameEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<GameEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<GameEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: GameEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn eid(name: &str) -> EntityId {
    EntityId::new(name)
}

pub fn eids(names: &[&str]) -> Vec<EntityId> {
    names.iter().map(|n| EntityId::new(*n)).collect()
}
