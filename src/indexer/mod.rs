pub mod chain;
pub mod decoder;
pub mod poller;
pub mod stream;
pub mod types;
pub mod valuation;
