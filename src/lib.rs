pub mod binance;
pub mod commands;
pub mod config;
pub mod context;
pub mod data_context;
pub mod database;
pub mod engine;
pub mod error;
pub mod fees;
pub mod indicators;
pub mod models;
pub mod optimizer;
pub mod param_utils;
pub mod performance;
pub mod report;
pub mod retry;
pub mod strategy;
pub mod strategy_utils;
pub mod trading_rules;
