//! HTTP clients for external lookup services.

pub mod movie;

pub use movie::{MovieCategory, MovieClient};
