pub mod commands;
pub mod engine;
