use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::FarmgateError;

use super::types::ClientConfig;

/// Expand `${VAR}` and `${VAR:-fallback}` references in `input`.
///
/// An unset `${VAR}` is an error; the fallback form also applies when the
/// variable is set but empty. A `$` not followed by `{` is kept literally.
pub fn expand_env_vars(input: &str) -> Result<String, FarmgateError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(env_error(format!("Unclosed variable reference: ${{{after}")));
        };
        let expr = &after[..end];
        match expr.split_once(":-") {
            Some((name, fallback)) => match std::env::var(name) {
                Ok(val) if !val.is_empty() => out.push_str(&val),
                _ => out.push_str(fallback),
            },
            None => {
                if expr.is_empty() {
                    return Err(env_error("Empty variable name in ${} reference".into()));
                }
                let val = std::env::var(expr).map_err(|_| {
                    env_error(format!("Environment variable '{expr}' is not set"))
                })?;
                out.push_str(&val);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Expand references in every string field a user would template.
pub fn expand_client_config(config: &mut ClientConfig) -> Result<(), FarmgateError> {
    config.base_url = expand_env_vars(&config.base_url)?;
    config.profile = expand_env_vars(&config.profile)?;
    if let Some(ref path) = config.token_file {
        let expanded = expand_env_vars(&path.to_string_lossy())?;
        config.token_file = Some(PathBuf::from(expanded));
    }
    config.headers = config
        .headers
        .iter()
        .map(|(k, v)| Ok((k.clone(), expand_env_vars(v)?)))
        .collect::<Result<HashMap<_, _>, FarmgateError>>()?;
    Ok(())
}

fn env_error(detail: String) -> FarmgateError {
    FarmgateError::ConfigError {
        path: PathBuf::from("<env>"),
        detail,
    }
}
