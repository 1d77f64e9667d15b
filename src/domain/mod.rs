//! Domain layer - Core types and port definitions
//!
//! This module defines the value model, resource schemas, desired/observed
//! state and the core traits (ports) that adapters implement, following
//! hexagonal architecture principles.

pub mod ports;
pub mod schema;
pub mod state;
pub mod value;

pub use ports::*;
pub use schema::*;
pub use state::*;
pub use value::*;
