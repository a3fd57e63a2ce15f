// ABOUTME: Library root for skopos - exposes the deployment pipeline modules.
// ABOUTME: The main binary is in main.rs.

pub mod audit;
pub mod classify;
pub mod config;
pub mod error;
pub mod health;
pub mod lint;
pub mod orchestrator;
pub mod plan;
pub mod process;
pub mod state;
