//! TickLab Core Engine
//!
//! Provides domain types, portfolio accounting, the historical data pipeline,
//! and the deterministic minute-bar replay engine with per-strategy statistics.

pub mod data;
pub mod domain;
pub mod engine;
pub mod session;
pub mod strategy;
