//! HTTP layer for ormodel
//!
//! `session_middleware` opens one unit of work per request so handlers can
//! call the managers directly. The Team/Hero API shows the pattern end to
//! end.

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use middleware::session_middleware;
pub use models::{schema, Hero, Team};
pub use server::{build_router, run_server, ServerConfig, ServerError};
pub use state::AppState;
