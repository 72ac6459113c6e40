//! Coin-specific protocol dialects

pub mod btm;
