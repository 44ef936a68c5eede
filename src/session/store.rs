use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::FarmgateError;
use crate::session::tokens::TokenTriple;

/// Synchronous key/value holder for the current token triple.
///
/// No validation happens here. Every `set`/`clear` is visible to the next
/// `get` from anywhere in the process.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<TokenTriple>;
    fn set(&self, tokens: &TokenTriple) -> Result<(), FarmgateError>;
    fn clear(&self) -> Result<(), FarmgateError>;
}

impl std::fmt::Debug for dyn TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish()
    }
}

/// Default location of the durable token file for a named profile.
pub fn token_path(profile: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".farmgate")
        .join(profile)
        .join("tokens.json")
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenTriple>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenTriple) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<TokenTriple> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, tokens: &TokenTriple) -> Result<(), FarmgateError> {
        *self.tokens.lock().unwrap_or_else(|e| e.into_inner()) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), FarmgateError> {
        *self.tokens.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// JSON file store that survives process restarts.
///
/// A file holding a partial or unreadable triple reads back as "no tokens".
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(&self, detail: impl std::fmt::Display) -> FarmgateError {
        FarmgateError::Storage {
            path: self.path.clone(),
            detail: detail.to_string(),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<TokenTriple> {
        let _io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        let data = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&data) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring unreadable token file: {e}");
                None
            }
        }
    }

    fn set(&self, tokens: &TokenTriple) -> Result<(), FarmgateError> {
        let _io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.storage_error(e))?;
        }
        let data = serde_json::to_string_pretty(tokens).map_err(|e| self.storage_error(e))?;

        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(|e| self.storage_error(e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.storage_error(e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| self.storage_error(e))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), FarmgateError> {
        let _io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_error(e)),
        }
    }
}
