//! Cursor tuning knobs.

use anyhow::{Context, Result};

/// Entries requested per remote fetch when the executor does not say.
pub const DEFAULT_FETCH_SIZE: usize = 100;
/// Largest index key the cursor will decode.
pub const DEFAULT_SCRATCH_CAPACITY: usize = 256;

const ENV_FETCH_SIZE: &str = "TESSERA_SCAN_FETCH_SIZE";
const ENV_INDEX_KEY_MAX_BYTES: &str = "TESSERA_INDEX_KEY_MAX_BYTES";

/// Per-cursor configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorConfig {
    /// Maximum entries pulled per remote fetch.
    pub fetch_size: usize,
    /// Capacity of the scratch buffer index keys are decoded from.
    pub scratch_capacity: usize,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
        }
    }
}

impl CursorConfig {
    /// Loads configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_values(
            std::env::var(ENV_FETCH_SIZE).ok(),
            std::env::var(ENV_INDEX_KEY_MAX_BYTES).ok(),
        )
    }

    fn from_values(fetch_size: Option<String>, scratch_capacity: Option<String>) -> Result<Self> {
        let fetch_size = parse_usize(fetch_size, DEFAULT_FETCH_SIZE)
            .with_context(|| format!("parse {ENV_FETCH_SIZE}"))?
            .max(1);
        let scratch_capacity = parse_usize(scratch_capacity, DEFAULT_SCRATCH_CAPACITY)
            .with_context(|| format!("parse {ENV_INDEX_KEY_MAX_BYTES}"))?
            .max(1);
        Ok(Self {
            fetch_size,
            scratch_capacity,
        })
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn with_scratch_capacity(mut self, scratch_capacity: usize) -> Self {
        self.scratch_capacity = scratch_capacity.max(1);
        self
    }
}

/// Parses an optional `usize` with fallback default.
fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}
