//! Agent catalog: durable definitions plus embedding-based selection.

mod definition;
mod selector;
mod store;

pub use definition::{
    AgentDefinition, DEFAULT_AGENT_NAME, DEFAULT_MAX_ITERATIONS, DEFAULT_TIMEOUT_SECONDS,
    MAX_ITERATIONS_RANGE, TIMEOUT_SECONDS_RANGE,
};
pub use selector::{AgentSelector, Selection, SelectorConfig, cosine_similarity};
pub use store::AgentCatalog;
