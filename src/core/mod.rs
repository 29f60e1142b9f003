pub mod assistant;
pub mod connectors;
pub mod credentials;
pub mod lifecycle;
pub mod llm;
pub mod pollers;
pub mod proactive;
pub mod queue;
pub mod store;
pub mod tools;
