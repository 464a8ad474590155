//! Core domain + application logic for the arithmetic relay bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind the
//! messaging port (implemented in `calc-relay-telegram`); persistence lives
//! behind the accumulator store port.

pub mod arithmetic;
pub mod command;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod handler;
pub mod logging;
pub mod messaging;
pub mod relay;
pub mod security;
pub mod store;
pub mod utils;

pub use errors::{Error, Result};
