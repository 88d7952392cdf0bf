pub mod http;
pub mod letta;
pub mod mem0;

pub use letta::{LettaAdapter, LettaSettings};
pub use mem0::{Mem0Adapter, Mem0Settings};
