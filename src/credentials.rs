//! L3 authentication token resolution (§6): `--token` beats `--token-file`
//! beats the `KRAKEN_WS_TOKEN` environment variable. Absence of all three
//! is a fatal [`IngestError::Credential`] before the session ever starts.

use crate::error::{IngestError, Result};

const TOKEN_ENV_VAR: &str = "KRAKEN_WS_TOKEN";

/// Resolve the L3 subscription token in priority order: explicit argument,
/// then file contents (trimmed), then environment variable.
pub fn resolve_token(explicit: Option<&str>, token_file: Option<&str>) -> Result<String> {
    if let Some(token) = explicit {
        if token.trim().is_empty() {
            return Err(IngestError::Credential("--token was given but empty".into()));
        }
        return Ok(token.to_string());
    }

    if let Some(path) = token_file {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Credential(format!("could not read --token-file {path}: {e}")))?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Err(IngestError::Credential(format!("--token-file {path} is empty")));
        }
        return Ok(trimmed.to_string());
    }

    match std::env::var(TOKEN_ENV_VAR) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(IngestError::Credential(format!(
            "no L3 token: pass --token, --token-file, or set {TOKEN_ENV_VAR}"
        ))),
    }
}
