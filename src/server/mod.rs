//! HTTP service exposing the orchestrator as an agent.
//!
//! The orchestrator speaks the same protocol it consumes, so one
//! orchestrator can be a step in another's workflow.
//!
//! # Endpoints
//!
//! - `GET  /health`       — Liveness probe
//! - `GET  /capabilities` — Capability query
//! - `POST /negotiate`    — Negotiation handshake
//! - `POST /execute`      — Run the configured workflow

pub mod routes;

pub use routes::{app_router, AppState};
