#![forbid(unsafe_code)]

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod formats;
pub mod invoker;
pub mod logging;
pub mod store;
pub mod workflow;
