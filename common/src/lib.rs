pub mod engine;
pub mod logic;
pub mod models;
pub mod pacing;
pub mod protocol;
pub mod session;
