pub mod config;
pub mod indexer;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod prices;
pub mod tokens;
