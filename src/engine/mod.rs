//! # Engine Module
//!
//! Internal ECS engine implementation.
//!
//! This module contains all core ECS building blocks such as:
//! - Component registration and archetype definitions
//! - Archetype storage
//! - Entity management
//! - Query execution
//! - Scheduling and systems
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod config;
pub mod component;
pub mod archetype;
pub mod borrow;
pub mod storage;
pub mod entity;
pub mod manager;
pub mod commands;
pub mod query;
pub mod systems;
pub mod job;
pub mod scheduler;
