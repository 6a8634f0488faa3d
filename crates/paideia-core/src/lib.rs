pub mod checks;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ids;
pub mod model;
pub mod providers;
pub mod scoring;
pub mod storage;
