#![deny(unsafe_code)]

//! Terminal front end for streamed chat answers.
//!
//! One conversation per configured chat box; answers print as they stream.

/// Command loop and routing to conversations.
pub mod app;
pub mod render;
/// Settings persistence.
pub mod settings;
