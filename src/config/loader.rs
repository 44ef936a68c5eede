use std::path::{Path, PathBuf};

use crate::error::FarmgateError;

use super::env::expand_client_config;
use super::types::ClientConfig;

/// Remove `//` and `/* */` comments outside of string literals.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match (ch, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some(&'/')) => {
                // Keep the newline so serde error positions stay meaningful.
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some(&'*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Find the config file to use, highest precedence first:
///
/// 1. `--config` flag
/// 2. `FARMGATE_CONFIG` env var
/// 3. `./config/farmgate.json`
/// 4. `~/.farmgate/farmgate.json`
///
/// An explicitly named file that does not exist is an error; the implicit
/// locations are simply skipped.
pub fn discover_config_file(cli_config: Option<&str>) -> Result<Option<PathBuf>, FarmgateError> {
    let explicit = cli_config
        .map(PathBuf::from)
        .or_else(|| std::env::var("FARMGATE_CONFIG").ok().map(PathBuf::from));
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(FarmgateError::ConfigError {
                path,
                detail: "file not found".into(),
            });
        }
        return Ok(Some(path));
    }

    let project = PathBuf::from("./config/farmgate.json");
    if project.exists() {
        return Ok(Some(project));
    }
    Ok(dirs::home_dir()
        .map(|home| home.join(".farmgate").join("farmgate.json"))
        .filter(|p| p.exists()))
}

fn load_config_file(path: &Path) -> Result<ClientConfig, FarmgateError> {
    let content = std::fs::read_to_string(path).map_err(|e| FarmgateError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Cannot read file: {e}"),
    })?;
    serde_json::from_str(&strip_jsonc_comments(&content)).map_err(|e| {
        FarmgateError::ConfigError {
            path: path.to_path_buf(),
            detail: format!("Invalid JSON: {e}"),
        }
    })
}

/// Load the client configuration.
///
/// Without any config file the defaults apply, in which case
/// `FARMGATE_BASE_URL` must supply the backend. `FARMGATE_BASE_URL` also
/// overrides the file's `baseUrl`.
pub fn load_config(cli_config: Option<&str>) -> Result<ClientConfig, FarmgateError> {
    let path = discover_config_file(cli_config)?;
    let mut config = match path {
        Some(ref p) => {
            tracing::debug!(path = %p.display(), "loading config");
            load_config_file(p)?
        }
        None => ClientConfig::default(),
    };

    if let Ok(url) = std::env::var("FARMGATE_BASE_URL") {
        if !url.is_empty() {
            config.base_url = url;
        }
    }
    expand_client_config(&mut config)?;

    config
        .validate()
        .map_err(|detail| FarmgateError::ConfigError {
            path: path.unwrap_or_else(|| PathBuf::from("<none>")),
            detail,
        })?;
    Ok(config)
}
