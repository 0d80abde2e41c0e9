//! hbot library
//!
//! A Telegram userbot built from independent command plugins.
//!
//! This crate provides:
//! - Environment settings and a flat JSON persist store
//! - A thin wrapper over the `MTProto` client
//! - Prefix command matching and dispatch
//! - The plugin contract, loader and the built-in plugins

pub mod commands;
pub mod config;
pub mod logging;
pub mod plugins;
pub mod telegram;
