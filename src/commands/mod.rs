//! Command handling module.
//!
//! Matches message text against prefixed commands and routes matches to
//! plugin handlers.

mod dispatcher;
mod filter;

pub use dispatcher::Dispatcher;
pub use filter::{CommandFilter, Invocation};
