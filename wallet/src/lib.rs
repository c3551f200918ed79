//! HTTP/JSON frontend for the dcrbridge wallet client core

pub mod api;
pub mod config;
pub mod error;
