//! Node module - genesis configuration, chain engine, and events

mod engine;
mod events;
mod genesis;

pub use engine::*;
pub use events::*;
pub use genesis::*;
