//! Pandoc Server Library
//!
//! An HTTP service that runs document conversions:
//! - `job`: validate the JSON job payload
//! - `sandbox`: write the declared files into a per-request directory
//! - `converter`: run the conversion tool and capture its output
//! - `server`: the `POST /` endpoint and server lifecycle

pub mod config;
pub mod converter;
pub mod error;
pub mod job;
pub mod sandbox;
pub mod server;
pub mod source;

pub use config::ServerConfig;
pub use converter::{ConversionOutcome, Converter};
pub use error::{Error, Result};
pub use job::{FileEntry, JobRequest};
pub use sandbox::Sandbox;
pub use server::{router, run_server, serve, shutdown_signal};
pub use source::ContentSource;
