//! Passport photo intake service.
//!
//! `POST /upload` stores the original and answers with a small JPEG
//! preview; `POST /process` turns client-cropped image data into a
//! fixed-size JPEG download. See [`api::router`] for the full surface.

pub mod api;
pub mod config;
pub mod error;
pub mod imaging;
pub mod retention;
pub mod store;

pub use api::{router, serve, AppState};
pub use config::ServiceCfg;
