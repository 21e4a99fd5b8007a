//! Card Definitions and Catalog
//!
//! A card is static catalog data plus, once it is in a match, a unique
//! instance id. Ability content is described by a fixed flag schema
//! ([`Abilities`]) that is validated once when the catalog loads, so the
//! simulation never has to probe for optional fields at use time.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Card instance identifier, unique within one match.
pub type CardId = u32;

/// Broad card category. Determines which catalog lookup resolves the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CardKind {
    /// Creature summoned from hand for pyre.
    Cryptid,
    /// Free creature from the kindling pool, one per turn.
    Kindling,
    /// Instant spell aimed at a combatant.
    Burst,
    /// Face-down reactive card.
    Trap,
    /// Permanent enchantment on an allied combatant.
    Aura,
    /// Resource card, one per turn.
    Pyre,
}

/// Stacking or boolean status effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AilmentKind {
    /// Ticks damage at end of turn.
    Burn,
    /// Ticks damage at end of turn and doubles incoming attack damage.
    Bleed,
    /// Cannot attack; boolean with a duration.
    Paralyze,
    /// Countdown to death.
    Calamity,
    /// Reduces attack by the token count.
    Curse,
}

/// An ailment granted by an attack or effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AilmentGrant {
    /// Which ailment.
    pub kind: AilmentKind,
    /// Stacks (turns for paralyze).
    pub stacks: u32,
}

/// Fixed ability schema carried by every cryptid and kindling.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Abilities {
    /// Ignores damage reduction and protection.
    pub focus: bool,
    /// Does not tap after attacking.
    pub no_tap: bool,
    /// Doubles damage against tapped targets.
    pub double_damage_vs_tapped: bool,
    /// Flat bonus against paralyzed targets.
    pub bonus_vs_paralyzed: i32,
    /// Flat bonus against targets with any ailment.
    pub bonus_vs_ailment: i32,
    /// Flat bonus against burning targets.
    pub bonus_vs_burning: i32,
    /// Ailments applied to the target on a hit that was not blocked.
    pub on_hit: Vec<AilmentGrant>,
    /// Heals for the damage dealt.
    pub lifesteal: bool,
    /// Damage also lands on the other occupant of the target's row.
    pub cleave: bool,
    /// Overkill damage carries into the target's support.
    pub destroyer: bool,
    /// After attacking, may only attack the same target.
    pub latch: bool,
    /// Negates the opposing support on the same row.
    pub negates_enemy_support: bool,
    /// Immune to ailments.
    pub ailment_immune: bool,
    /// As a support: halves damage from afflicted attackers, otherwise -1.
    pub warding_support: bool,
    /// Flat damage reduction.
    pub damage_reduction: i32,
    /// Protection charges on entering the field.
    pub protection: u32,
}

/// Which side a burst may target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpellTarget {
    /// Caster's own combatants.
    Ally,
    /// Opposing combatants.
    Enemy,
    /// Either side.
    #[default]
    Any,
}

/// Effect payload for bursts and auras.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpellEffect {
    /// Direct damage.
    Damage {
        /// Amount.
        amount: i32,
    },
    /// Restore HP up to max.
    Heal {
        /// Amount.
        amount: i32,
    },
    /// Apply an ailment.
    Ailment(AilmentGrant),
    /// Add protection charges.
    Protect {
        /// Charges added.
        charges: u32,
    },
    /// Remove all ailments.
    Cleanse,
    /// Permanent stat change.
    Buff {
        /// Attack delta.
        atk: i32,
        /// HP delta (current and max).
        hp: i32,
    },
    /// One extra attack this turn.
    GrantAttackAgain,
}

/// When a trap fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrapTrigger {
    /// An enemy attacks a combatant on the trap's row.
    EnemyAttack,
    /// An enemy summons onto the field.
    EnemySummon,
    /// The opposing side ends its turn.
    EnemyTurnEnd,
}

/// What a trap does to the combatant that sprang it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrapEffect {
    /// Damage the triggering combatant.
    Damage {
        /// Amount.
        amount: i32,
    },
    /// Ailment on the triggering combatant.
    Ailment(AilmentGrant),
    /// Pyre for the trap owner.
    GainPyre {
        /// Amount.
        amount: u32,
    },
}

/// Trap payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapSpec {
    /// Trigger condition.
    pub trigger: TrapTrigger,
    /// Effect when sprung.
    pub effect: TrapEffect,
}

/// Static card definition from the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardData {
    /// Catalog key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Category.
    pub kind: CardKind,
    /// Pyre cost.
    #[serde(default)]
    pub cost: u32,
    /// Base attack (creatures only).
    #[serde(default)]
    pub atk: i32,
    /// Base hit points (creatures only).
    #[serde(default)]
    pub hp: i32,
    /// Key of the cryptid this one evolves from.
    #[serde(default)]
    pub evolves_from: Option<String>,
    /// Ability flags (creatures only).
    #[serde(default)]
    pub abilities: Abilities,
    /// Burst and aura effects.
    #[serde(default)]
    pub effects: Vec<SpellEffect>,
    /// Burst targeting rule.
    #[serde(default)]
    pub target: SpellTarget,
    /// Pyre gained when a pyre card is played.
    #[serde(default)]
    pub pyre_gain: u32,
    /// Trap payload.
    #[serde(default)]
    pub trap: Option<TrapSpec>,
}

impl CardData {
    /// Cryptids and kindlings occupy field slots.
    pub fn is_creature(&self) -> bool {
        matches!(self.kind, CardKind::Cryptid | CardKind::Kindling)
    }
}

/// A card in a match: catalog snapshot plus unique id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInstance {
    /// Match-unique id.
    pub id: CardId,
    /// Catalog snapshot.
    pub data: CardData,
}

/// Catalog errors, raised at load time.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Two cards share a key.
    #[error("duplicate card key: {0}")]
    DuplicateKey(String),
    /// Creature has non-positive hp or negative attack.
    #[error("card {0} has invalid stats")]
    InvalidStats(String),
    /// Trap without a trap payload, burst/aura without effects.
    #[error("card {0} is missing its {1} payload")]
    MissingPayload(String, &'static str),
    /// Evolution parent is not a cryptid in this catalog.
    #[error("card {0} evolves from unknown cryptid {1}")]
    UnknownEvolutionParent(String, String),
    /// Lookup of a key that does not exist.
    #[error("unknown card key: {0}")]
    UnknownKey(String),
    /// JSON parse failure.
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// File read failure.
    #[error("catalog read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lookup service for static card data.
pub trait CardCatalog: Send + Sync {
    /// Any card by key.
    fn get(&self, key: &str) -> Option<&CardData>;

    /// Cryptid definition.
    fn cryptid(&self, key: &str) -> Option<&CardData> {
        self.get(key).filter(|c| c.kind == CardKind::Cryptid)
    }

    /// Kindling definition.
    fn kindling(&self, key: &str) -> Option<&CardData> {
        self.get(key).filter(|c| c.kind == CardKind::Kindling)
    }

    /// Burst definition.
    fn burst(&self, key: &str) -> Option<&CardData> {
        self.get(key).filter(|c| c.kind == CardKind::Burst)
    }

    /// Trap definition.
    fn trap(&self, key: &str) -> Option<&CardData> {
        self.get(key).filter(|c| c.kind == CardKind::Trap)
    }

    /// Aura definition.
    fn aura(&self, key: &str) -> Option<&CardData> {
        self.get(key).filter(|c| c.kind == CardKind::Aura)
    }

    /// Pyre card definition.
    fn pyre(&self, key: &str) -> Option<&CardData> {
        self.get(key).filter(|c| c.kind == CardKind::Pyre)
    }
}

/// Catalog held in memory, sorted by key.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    cards: BTreeMap<String, CardData>,
}

impl InMemoryCatalog {
    /// Build and validate a catalog.
    pub fn from_cards(cards: Vec<CardData>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for card in cards {
            validate_card(&card)?;
            if map.contains_key(&card.key) {
                return Err(CatalogError::DuplicateKey(card.key));
            }
            map.insert(card.key.clone(), card);
        }

        for card in map.values() {
            if let Some(parent) = &card.evolves_from {
                let parent_ok = map
                    .get(parent)
                    .map(|p| p.kind == CardKind::Cryptid)
                    .unwrap_or(false);
                if !parent_ok {
                    return Err(CatalogError::UnknownEvolutionParent(
                        card.key.clone(),
                        parent.clone(),
                    ));
                }
            }
        }

        Ok(Self { cards: map })
    }

    /// Parse a JSON array of card definitions.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let cards: Vec<CardData> = serde_json::from_str(json)?;
        Self::from_cards(cards)
    }

    /// Load from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Resolve a key or fail with [`CatalogError::UnknownKey`].
    pub fn require(&self, key: &str) -> Result<&CardData, CatalogError> {
        self.get(key).ok_or_else(|| CatalogError::UnknownKey(key.to_string()))
    }

    /// Small built-in set used by the demo binary and tests.
    pub fn starter() -> Self {
        let cards = starter_cards();
        // The starter set is static and covered by tests
        Self::from_cards(cards).unwrap_or_default()
    }
}

impl CardCatalog for InMemoryCatalog {
    fn get(&self, key: &str) -> Option<&CardData> {
        self.cards.get(key)
    }
}

fn validate_card(card: &CardData) -> Result<(), CatalogError> {
    match card.kind {
        CardKind::Cryptid | CardKind::Kindling => {
            if card.hp <= 0 || card.atk < 0 || card.abilities.damage_reduction < 0 {
                return Err(CatalogError::InvalidStats(card.key.clone()));
            }
        }
        CardKind::Trap => {
            if card.trap.is_none() {
                return Err(CatalogError::MissingPayload(card.key.clone(), "trap"));
            }
        }
        CardKind::Burst | CardKind::Aura => {
            if card.effects.is_empty() {
                return Err(CatalogError::MissingPayload(card.key.clone(), "effect"));
            }
        }
        CardKind::Pyre => {
            if card.pyre_gain == 0 {
                return Err(CatalogError::MissingPayload(card.key.clone(), "pyre"));
            }
        }
    }
    Ok(())
}

fn creature(key: &str, name: &str, kind: CardKind, cost: u32, atk: i32, hp: i32, abilities: Abilities) -> CardData {
    CardData {
        key: key.to_string(),
        name: name.to_string(),
        kind,
        cost,
        atk,
        hp,
        evolves_from: None,
        abilities,
        effects: Vec::new(),
        target: SpellTarget::Any,
        pyre_gain: 0,
        trap: None,
    }
}

fn spell(key: &str, name: &str, kind: CardKind, cost: u32, target: SpellTarget, effects: Vec<SpellEffect>) -> CardData {
    CardData {
        effects,
        target,
        ..creature(key, name, kind, cost, 0, 0, Abilities::default())
    }
}

fn starter_cards() -> Vec<CardData> {
    let mut ashen_stag = creature(
        "ashen_stag", "Ashen Stag", CardKind::Cryptid, 2, 4, 5,
        Abilities { cleave: true, ..Default::default() },
    );
    ashen_stag.evolves_from = Some("hollow_stag".into());

    let mut trap_snare = spell("snare_pit", "Snare Pit", CardKind::Trap, 1, SpellTarget::Any, Vec::new());
    trap_snare.trap = Some(TrapSpec {
        trigger: TrapTrigger::EnemyAttack,
        effect: TrapEffect::Damage { amount: 2 },
    });

    let mut trap_hex = spell("hex_ward", "Hex Ward", CardKind::Trap, 1, SpellTarget::Any, Vec::new());
    trap_hex.trap = Some(TrapSpec {
        trigger: TrapTrigger::EnemySummon,
        effect: TrapEffect::Ailment(AilmentGrant { kind: AilmentKind::Curse, stacks: 2 }),
    });

    let mut bonfire = spell("bonfire", "Bonfire", CardKind::Pyre, 0, SpellTarget::Any, Vec::new());
    bonfire.pyre_gain = 1;

    vec![
        creature("emberling", "Emberling", CardKind::Cryptid, 1, 2, 3, Abilities {
            on_hit: vec![AilmentGrant { kind: AilmentKind::Burn, stacks: 2 }],
            ..Default::default()
        }),
        creature("hollow_stag", "Hollow Stag", CardKind::Cryptid, 1, 3, 4, Abilities::default()),
        ashen_stag,
        creature("bog_lurker", "Bog Lurker", CardKind::Cryptid, 2, 2, 5, Abilities {
            on_hit: vec![AilmentGrant { kind: AilmentKind::Bleed, stacks: 2 }],
            ..Default::default()
        }),
        creature("moth_oracle", "Moth Oracle", CardKind::Cryptid, 1, 1, 3, Abilities {
            focus: true,
            ..Default::default()
        }),
        creature("ridge_brute", "Ridge Brute", CardKind::Cryptid, 3, 4, 5, Abilities {
            destroyer: true,
            ..Default::default()
        }),
        creature("shroud_warden", "Shroud Warden", CardKind::Cryptid, 1, 1, 4, Abilities {
            warding_support: true,
            ..Default::default()
        }),
        creature("static_eel", "Static Eel", CardKind::Cryptid, 2, 2, 3, Abilities {
            double_damage_vs_tapped: true,
            on_hit: vec![AilmentGrant { kind: AilmentKind::Paralyze, stacks: 1 }],
            ..Default::default()
        }),
        creature("kindle_wisp", "Kindle Wisp", CardKind::Kindling, 0, 1, 1, Abilities::default()),
        creature("kindle_newt", "Kindle Newt", CardKind::Kindling, 0, 1, 2, Abilities {
            lifesteal: true,
            ..Default::default()
        }),
        spell("cinder_bolt", "Cinder Bolt", CardKind::Burst, 1, SpellTarget::Enemy,
            vec![SpellEffect::Damage { amount: 2 }]),
        spell("mending_rain", "Mending Rain", CardKind::Burst, 1, SpellTarget::Ally,
            vec![SpellEffect::Heal { amount: 3 }, SpellEffect::Cleanse]),
        spell("aegis_sigil", "Aegis Sigil", CardKind::Burst, 1, SpellTarget::Ally,
            vec![SpellEffect::Protect { charges: 1 }]),
        spell("antler_crown", "Antler Crown", CardKind::Aura, 1, SpellTarget::Ally,
            vec![SpellEffect::Buff { atk: 1, hp: 1 }]),
        trap_snare,
        trap_hex,
        bonfire,
    ]
}
