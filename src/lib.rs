//! Conversation and canvas persistence engine.
//!
//! SYSTEM CONTEXT
//! ==============
//! A chat client keeps conversations, and the canvas artifacts attached to
//! them, consistent across three tiers: the in-memory working set owned by
//! `services::conversation::ConversationStore`, a quota-limited local
//! key-value store, and a remote database reached through
//! `services::remote::RemoteBackend`. `state::EngineState` wires the tiers
//! together; `services::sync::spawn_sync_task` keeps the remote tier current.

pub mod config;
pub mod event;
pub mod schedule;
pub mod services;
pub mod state;
pub mod storage;
