//! Core domain types
//!
//! These types represent the fundamental entities of the system and are shared
//! between the server (which tracks them) and agents (which execute on their behalf).

pub mod job;
pub mod worker;
