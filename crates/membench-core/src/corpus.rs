//! Synthetic fact corpus generation.
//!
//! A corpus is built from three layers, all drawn from one seeded RNG:
//! 1. one gold fact per templated query index `1..=gold_entities`
//! 2. optional extra gold-shaped facts over a 5x wider entity space
//! 3. noise facts padding the corpus up to `n_facts`
//!
//! The combined list is shuffled once before it is handed to the backend.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fact::{Fact, GOLD_PREDICATE};

/// Relation vocabulary for noise facts. None of these equal the gold predicate.
pub const NOISE_VERBS: &[&str] = &[
    "mentions",
    "is unrelated to",
    "conflicts with",
    "precedes",
    "follows",
    "uses",
    "depends on",
    "is similar to",
    "replaces",
    "is replaced by",
];

const GOLD_TS: &str = "2024-06-01T00:00:00";

/// Width of the random entity space relative to `gold_entities`.
const ENTITY_SPACE_FACTOR: usize = 5;

/// Parameters for `MegaFactsBackend::from_synthetic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticParams {
    /// Target corpus size (gold + noise).
    pub n_facts: usize,
    /// Total gold facts, including the aligned ones.
    pub n_gold: usize,
    pub seed: u64,
    /// Number of aligned gold facts: `gold.entity.1..=gold_entities`.
    pub gold_entities: usize,
    /// Topic modulus: `gold.topic.(i % topic_mod)`.
    pub topic_mod: usize,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            n_facts: 10_000,
            n_gold: 200,
            seed: 42,
            gold_entities: 50,
            topic_mod: 10,
        }
    }
}

impl SyntheticParams {
    /// Number of facts `generate` will produce.
    pub fn corpus_len(&self) -> usize {
        self.n_facts.max(self.n_gold.max(self.gold_entities))
    }

    fn entity_space(&self) -> usize {
        self.gold_entities
            .saturating_mul(ENTITY_SPACE_FACTOR)
            .max(1)
    }
}

/// Output of `generate`: the shuffled corpus, the gold subset in generation
/// order, and the RNG positioned after all generation draws.
pub struct SyntheticCorpus {
    pub facts: Vec<Fact>,
    pub gold: Vec<Fact>,
    pub rng: ChaCha8Rng,
}

/// Topic index for entity `i`. A zero modulus leaves the index as is.
pub fn topic_index(i: usize, topic_mod: usize) -> usize {
    i.checked_rem(topic_mod).unwrap_or(i)
}

pub fn gold_entity(i: usize) -> String {
    format!("gold.entity.{i}")
}

pub fn gold_topic(i: usize, topic_mod: usize) -> String {
    format!("gold.topic.{}", topic_index(i, topic_mod))
}

pub fn generate(params: &SyntheticParams) -> SyntheticCorpus {
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let entity_space = params.entity_space();

    let mut gold = Vec::with_capacity(params.n_gold.max(params.gold_entities));
    let mut facts = Vec::with_capacity(params.corpus_len());
    for i in 1..=params.gold_entities {
        gold.push(
            Fact::new(
                gold_entity(i),
                GOLD_PREDICATE,
                gold_topic(i, params.topic_mod),
                GOLD_TS,
            )
            .with_tags(&["gold"]),
        );
    }

    let extra_gold = params.n_gold.saturating_sub(params.gold_entities);
    for _ in 0..extra_gold {
        let x = rng.gen_range(1..=entity_space);
        let day: u32 = rng.gen_range(1..=28);
        gold.push(
            Fact::new(
                gold_entity(x),
                GOLD_PREDICATE,
                gold_topic(x, params.topic_mod),
                format!("2024-07-{day:02}T00:00:00"),
            )
            .with_tags(&["gold", "extra"]),
        );
    }

    facts.extend_from_slice(&gold);
    let remaining = params.n_facts.saturating_sub(facts.len());
    let topic_max = params.topic_mod.saturating_sub(1);
    for _ in 0..remaining {
        let a = rng.gen_range(1..=entity_space);
        let b = rng.gen_range(0..=topic_max);
        let verb = NOISE_VERBS[rng.gen_range(0..NOISE_VERBS.len())];
        let month: u32 = rng.gen_range(1..=12);
        let day: u32 = rng.gen_range(1..=28);
        facts.push(
            Fact::new(
                format!("noise.entity.{a}"),
                verb,
                format!("noise.topic.{b}"),
                format!("2023-{month:02}-{day:02}T00:00:00"),
            )
            .with_tags(&["noise"]),
        );
    }

    facts.shuffle(&mut rng);

    debug!(
        facts = facts.len(),
        gold = gold.len(),
        extra_gold,
        noise = remaining,
        seed = params.seed,
        "generated synthetic corpus"
    );

    SyntheticCorpus { facts, gold, rng }
}
