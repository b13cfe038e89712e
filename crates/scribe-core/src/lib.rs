//! Shared vocabulary for the scribe agent loop: identifiers, transcript turns,
//! the tool contract, the model provider contract and lifecycle events.

pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tools;
pub mod turns;
