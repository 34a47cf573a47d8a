//! HTTP surface and concrete adapters for the repost daemon: axum routes,
//! token auth, the YouTube site adapter, subprocess/HTTP workers, and the
//! process wiring that assembles the scheduler pair with the subscriber.

pub mod app;
pub mod auth;
pub mod cli;
pub mod routes;
pub mod sites;
pub mod state;
pub mod workers;
