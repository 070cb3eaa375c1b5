//! Muster Core
//!
//! Core types and abstractions shared by the Muster server and its remote agents.
//!
//! This crate contains:
//! - Domain types: jobs, requests and connected workers
//! - DTOs: the worker wire protocol and HTTP payloads
//! - Shell: the process runner used by both local shell commands and agents

pub mod domain;
pub mod dto;
pub mod shell;
