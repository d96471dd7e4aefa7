#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Matchpool Server
//!
//! An in-memory matchmaking and lobby backend for multiplayer games.
//!
//! Players submit match requests into a bucketed queue, a periodic processor
//! scores and groups compatible requests, formed matches become lobbies with a
//! four-state lifecycle, and every state change is pushed to connected clients
//! over WebSocket rooms.

/// Component wiring and process lifecycle
pub mod app;

/// Game catalogue lookup contract (external collaborator)
pub mod catalog;

/// Per-lobby chat channels
pub mod chat;

/// Server configuration and environment variables
pub mod config;

/// Entities, criteria validation, and wire error codes
pub mod domain;

/// REST API surface
pub mod http;

/// Lobby lifecycle service
pub mod lobby;

/// Structured logging configuration
pub mod logging;

/// Matchmaking: scoring, relaxation, formation, coordinator
pub mod matchmaking;

/// Notification intent bus and delivery dispatchers
pub mod notify;

/// Queue index: bucketed searching requests
pub mod queue;

/// Retry logic utilities
pub mod retry;

/// WebSocket fan-out: connections, rooms, events
pub mod socket;

/// Storage abstraction layer (in-memory implementation)
pub mod storage;
