//! A small arena: every player who connects gets a hero, three goblins wait
//! across the field. Goblins never act on their own; their turns pass when
//! the turn timer runs out.
//!
//! ```text
//! RUST_LOG=debug ARENA_ADDR=0.0.0.0:8080 cargo run -p arena
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use skirmish::prelude::*;

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Team {
    Heroes,
    Goblins,
}

struct Poison {
    damage: u32,
    turns_left: u32,
}

struct Character {
    hp: i32,
    dex: i32,
    team: Team,
    position: Position,
    inventory: Vec<ItemId>,
    poison: Option<Poison>,
}

impl Character {
    fn new(team: Team, hp: i32, dex: i32, position: Position, items: &[&str]) -> Self {
        Self {
            hp,
            dex,
            team,
            position,
            inventory: items.iter().map(|i| ItemId(i.to_string())).collect(),
            poison: None,
        }
    }
}

/// Damage die per weapon, and whether it poisons.
fn weapon_stats(weapon: Option<&ItemId>) -> (i32, bool) {
    match weapon.map(|w| w.0.as_str()) {
        Some("sword") => (8, false),
        Some("venom-dagger") => (4, true),
        Some(_) => (4, false),
        None => (2, false),
    }
}

const ARMOR_CLASS: i32 = 10;
const MAX_STEP: i32 = 6;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Arena {
    characters: Mutex<HashMap<EntityId, Character>>,
    heroes: AtomicU32,
}

impl Arena {
    fn with_goblins(count: i32) -> Self {
        let arena = Self::default();
        {
            let mut characters = arena.characters.lock().unwrap_or_else(|e| e.into_inner());
            for n in 1..=count {
                characters.insert(
                    EntityId::new(format!("goblin-{n}")),
                    Character::new(
                        Team::Goblins,
                        7,
                        14,
                        Position::new(8, n),
                        &["venom-dagger", "copper-coin"],
                    ),
                );
            }
        }
        arena
    }

    fn spawn_hero(&self) -> EntityId {
        let n = self.heroes.fetch_add(1, Ordering::Relaxed) + 1;
        let id = EntityId::new(format!("hero-{n}"));
        let hero = Character::new(Team::Heroes, 20, 12, Position::new(0, n as i32), &["sword"]);
        self.lock().insert(id.clone(), hero);
        tracing::info!(%id, "hero joined the arena");
        id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityId, Character>> {
        self.characters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn hurt(target: &EntityId, character: &mut Character, damage: u32) -> AttackOutcome {
        let was_alive = character.hp > 0;
        character.hp -= damage as i32;
        AttackOutcome {
            target: target.clone(),
            hit: true,
            damage,
            remaining_hp: character.hp,
            killed: was_alive && character.hp <= 0,
        }
    }
}

fn modifier(dex: i32) -> i32 {
    (dex - 10).div_euclid(2)
}

impl World for Arena {
    fn exists(&self, id: &EntityId) -> bool {
        self.lock().contains_key(id)
    }

    fn dexterity(&self, id: &EntityId) -> Option<i32> {
        self.lock().get(id).map(|c| c.dex)
    }

    fn is_alive(&self, id: &EntityId) -> bool {
        self.lock().get(id).is_some_and(|c| c.hp > 0)
    }

    fn allies(&self, id: &EntityId) -> Vec<EntityId> {
        let characters = self.lock();
        let Some(team) = characters.get(id).map(|c| c.team) else {
            return Vec::new();
        };
        characters
            .iter()
            .filter(|(other, c)| *other != id && c.team == team)
            .map(|(other, _)| other.clone())
            .collect()
    }

    fn position(&self, id: &EntityId) -> Option<Position> {
        self.lock().get(id).map(|c| c.position)
    }

    fn active_effects(&self, id: &EntityId) -> Vec<String> {
        match self.lock().get(id) {
            Some(Character { poison: Some(_), .. }) => vec!["poisoned".to_string()],
            _ => Vec::new(),
        }
    }

    fn resolve_attack(
        &self,
        attacker: &EntityId,
        target: &EntityId,
        weapon: Option<&ItemId>,
    ) -> Result<AttackOutcome, WorldError> {
        let mut characters = self.lock();
        let dex = {
            let attacker_char = characters
                .get(attacker)
                .ok_or_else(|| WorldError::EntityNotFound(attacker.clone()))?;
            if let Some(w) = weapon {
                if !attacker_char.inventory.contains(w) {
                    return Err(WorldError::Rejected(format!("{attacker} does not carry {w}")));
                }
            }
            attacker_char.dex
        };
        let target_char = characters
            .get_mut(target)
            .ok_or_else(|| WorldError::EntityNotFound(target.clone()))?;
        if target_char.hp <= 0 {
            return Err(WorldError::Rejected(format!("{target} is already down")));
        }

        let mut rng = rand::rng();
        let roll = rng.random_range(1..=20i32) + modifier(dex);
        if roll < ARMOR_CLASS {
            return Ok(AttackOutcome {
                target: target.clone(),
                hit: false,
                damage: 0,
                remaining_hp: target_char.hp,
                killed: false,
            });
        }

        let (die, poisons) = weapon_stats(weapon);
        let damage = rng.random_range(1..=die) as u32;
        if poisons {
            target_char.poison = Some(Poison {
                damage: 1,
                turns_left: 3,
            });
        }
        Ok(Self::hurt(target, target_char, damage))
    }

    fn drop_inventory(&self, id: &EntityId) -> Vec<ItemId> {
        self.lock()
            .get_mut(id)
            .map(|c| std::mem::take(&mut c.inventory))
            .unwrap_or_default()
    }

    fn tick_effects(&self, id: &EntityId) -> EffectTick {
        let mut characters = self.lock();
        let Some(character) = characters.get_mut(id) else {
            return EffectTick::default();
        };
        let Some(poison) = character.poison.as_mut() else {
            return EffectTick::default();
        };

        let damage = poison.damage;
        poison.turns_left = poison.turns_left.saturating_sub(1);
        let expired = if poison.turns_left == 0 {
            character.poison = None;
            vec!["poisoned".to_string()]
        } else {
            Vec::new()
        };
        let outcome = Self::hurt(id, character, damage);
        EffectTick {
            damage,
            expired,
            killed: outcome.killed,
        }
    }

    fn execute_delayed(&self, action: &DelayedAction) -> Result<ActionOutcome, WorldError> {
        if action.action_type != "fireball" {
            return Err(WorldError::Rejected(format!(
                "unknown action {}",
                action.action_type
            )));
        }
        let center = action
            .target_position
            .ok_or_else(|| WorldError::Rejected("fireball needs a target position".into()))?;
        let param = |key: &str, default: u64| {
            action
                .parameters
                .get(key)
                .and_then(|v| v.as_u64())
                .unwrap_or(default)
        };
        let damage = param("damage", 6) as u32;
        let radius = param("radius", 1) as i32;

        let mut characters = self.lock();
        let hits = characters
            .iter_mut()
            .filter(|(_, c)| {
                c.hp > 0
                    && (c.position.x - center.x).abs() <= radius
                    && (c.position.y - center.y).abs() <= radius
            })
            .map(|(id, c)| Self::hurt(id, c, damage))
            .collect();
        Ok(ActionOutcome { hits })
    }

    fn move_entity(&self, id: &EntityId, to: Position) -> Result<(), WorldError> {
        let mut characters = self.lock();
        let character = characters
            .get_mut(id)
            .ok_or_else(|| WorldError::EntityNotFound(id.clone()))?;
        let step = (to.x - character.position.x)
            .abs()
            .max((to.y - character.position.y).abs());
        if step > MAX_STEP {
            return Err(WorldError::Rejected(format!(
                "can move at most {MAX_STEP} tiles, asked for {step}"
            )));
        }
        character.position = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), SkirmishError> {
    skirmish::init_tracing();

    let addr = std::env::var("ARENA_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let arena = Arc::new(Arena::with_goblins(3));
    let spawner = Arc::clone(&arena);

    let combat = CombatConfig {
        turn: TurnConfig {
            turn_timeout: Duration::from_secs(20),
            ..TurnConfig::default()
        },
        ..CombatConfig::default()
    };

    let server = SkirmishServer::<Arena>::builder()
        .bind(&addr)
        .combat_config(combat)
        .spawn_player(move || spawner.spawn_hero())
        .build(arena)
        .await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown.shutdown();
    });

    if let Ok(local) = server.local_addr() {
        tracing::info!(addr = %local, "arena open");
    }
    server.run().await
}
