//! Core types: messages, tools, responses and stream events.

pub mod chat;
pub mod common;
pub mod streaming;
pub mod tools;

pub use chat::*;
pub use common::*;
pub use streaming::*;
pub use tools::*;
