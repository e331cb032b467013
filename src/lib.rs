// src/lib.rs — Library root for Riff

pub mod cli;
pub mod core;
pub mod infra;
pub mod player;
pub mod provider;
