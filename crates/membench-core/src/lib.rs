pub mod adapter;
pub mod backend;
pub mod corpus;
pub mod error;
pub mod fact;

pub use adapter::{MemoryAdapter, SearchHit};
pub use backend::{benchmark_queries, query_for, MegaFactsBackend, QueryMode, QueryResult};
pub use corpus::{SyntheticCorpus, SyntheticParams, NOISE_VERBS};
pub use error::{BenchError, BenchResult};
pub use fact::{Fact, GOLD_PREDICATE, SYNTHETIC_SOURCE};
