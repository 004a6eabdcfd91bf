//! Shared types for the MOSS softcode engine.
//!
//! This crate defines the dbref newtype, the tunable evaluation limits,
//! and the [`World`] trait through which the evaluator and scheduler reach
//! the database, the notification layer, and the clock. It also ships
//! [`MemWorld`], an in-memory reference world used by the downstream
//! crates' test suites.

mod dbref;
mod limits;
pub mod world;

pub use dbref::{Dbref, NOTHING};
pub use limits::Limits;
pub use world::{MemWorld, PrivLevel, Pronouns, World};
