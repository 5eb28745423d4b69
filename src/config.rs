use std::env;

use anyhow::{Context, Result};

/// Runtime settings, read once at startup from the environment (a `.env`
/// file is loaded by `main` before this runs).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: String,

    pub gemini_api_key: String,
    pub gemini_model_name: String,

    /// When set, new generations default to the retrieval-augmented
    /// pipeline instead of the direct model call.
    pub rag_enabled: bool,
    pub rag_model_name: String,

    pub upload_dir: String,
    pub max_file_size: usize,
    /// Files at or under this size may be embedded inline in a prompt.
    pub inline_size_limit: usize,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_usize_env(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("{key} must be an integer, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let gemini_api_key = env::var("GEMINI_API_KEY").unwrap_or_default();
        if gemini_api_key.is_empty() {
            log::warn!("GEMINI_API_KEY not set, direct model calls will fail");
        }

        Ok(Settings {
            database_url,
            bind_addr: env_or("BIND_ADDR", "127.0.0.1:8000"),
            gemini_api_key,
            gemini_model_name: env_or("GEMINI_MODEL_NAME", "gemini-2.5-flash"),
            rag_enabled: env_or("RAG_ENABLED", "false") == "true",
            rag_model_name: env_or("RAG_MODEL_NAME", "gpt-4o-mini"),
            upload_dir: env_or("UPLOAD_DIR", "/tmp/mathchat-uploads"),
            max_file_size: parse_usize_env("MAX_FILE_SIZE", 20 * 1024 * 1024)?,
            inline_size_limit: parse_usize_env("INLINE_SIZE_LIMIT", 4 * 1024 * 1024)?,
        })
    }
}
