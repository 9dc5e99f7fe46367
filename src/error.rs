// src/error.rs

/// Crate-wide result type. Errors carry context via `anyhow`.
pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
