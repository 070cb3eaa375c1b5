//! Data Transfer Objects for inter-service communication
//!
//! This module contains the messages exchanged between the server and its remote
//! agents, plus the payloads of the server HTTP API.

pub mod job;
pub mod protocol;
