//! HTTP front end for the summary service.
//!
//! Routes:
//! - `POST /api/summary`: produce or fetch a cached digest
//! - `GET /api/health`: liveness
//! - `GET /api/stats`: cache and upstream counters

pub mod error;
pub mod extract;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use extract::ClientKey;
pub use server::{build_router, start_server, AppState};
