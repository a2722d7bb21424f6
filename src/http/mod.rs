//! HTTP module for the BBS server
//!
//! The stateless transport: every request carries one command and gets one
//! reply, with the session token travelling in the command itself.

mod handlers;

use actix_web::web;

pub use handlers::{command, health_check};

/// Mounts the command endpoint at `path` plus `/health`.
pub fn routes(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.route(path, web::post().to(command))
        .route("/health", web::get().to(health_check));
}
