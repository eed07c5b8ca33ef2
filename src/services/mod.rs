//! Engine services: the conversation store and the adapters it drives.
//!
//! ARCHITECTURE
//! ============
//! `conversation` is the only module that mutates the working set. The rest
//! are leaf adapters it calls: `canvas` edits a single element, `guard`
//! validates persisted snapshots, `local` reads and writes key-value
//! storage, `tombstone` records deletions, and `remote` / `sync` move dirty
//! conversations to and from the remote tier.

pub mod canvas;
pub mod conversation;
pub mod guard;
pub mod local;
pub mod remote;
pub mod sync;
pub mod tombstone;
