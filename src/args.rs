use serde_json::{json, Map, Value};

use crate::error::FarmgateError;
use crate::session::ProfilePatch;

/// Split `key=value` or `key:value` at whichever separator comes first, so
/// `since=10:30` keeps its colon and `url:http://x` keeps its scheme.
fn split_pair(arg: &str) -> Result<(&str, &str), FarmgateError> {
    let pos = arg.find([':', '=']).ok_or_else(|| {
        FarmgateError::InvalidArgument(format!(
            "Cannot parse argument '{arg}': expected 'key=value' or 'key:value'"
        ))
    })?;
    let (key, value) = (&arg[..pos], &arg[pos + 1..]);
    if key.is_empty() {
        return Err(FarmgateError::InvalidArgument(format!(
            "Empty key in argument '{arg}'"
        )));
    }
    Ok((key, value))
}

/// Build a JSON request body from `key=value` pairs.
///
/// Values are coerced: quoted text stays a string, `true`/`false`/`null`
/// and numbers become JSON scalars, and `{...}`/`[...]` is parsed as JSON
/// when valid. Returns `None` for no arguments so body-less requests stay
/// body-less.
pub fn parse_body_args(args: &[String]) -> Result<Option<Value>, FarmgateError> {
    if args.is_empty() {
        return Ok(None);
    }
    let mut map = Map::new();
    for arg in args {
        let (key, raw) = split_pair(arg)?;
        map.insert(key.to_string(), coerce_value(raw));
    }
    Ok(Some(Value::Object(map)))
}

/// Build a profile patch from `field=value` pairs.
///
/// Values are taken verbatim (a phone number stays a string). Field names
/// may be given as `first_name` or `firstName`; unknown fields are rejected.
pub fn parse_profile_patch(args: &[String]) -> Result<ProfilePatch, FarmgateError> {
    let mut map = Map::new();
    for arg in args {
        let (key, raw) = split_pair(arg)?;
        map.insert(camel_case(key), Value::String(unquote(raw).to_string()));
    }
    let patch: ProfilePatch = serde_json::from_value(Value::Object(map))
        .map_err(|e| FarmgateError::InvalidArgument(format!("profile fields: {e}")))?;
    if patch.is_empty() {
        return Err(FarmgateError::InvalidArgument(
            "no profile fields given (editable: first_name, last_name, email, phone)".into(),
        ));
    }
    Ok(patch)
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn unquote(raw: &str) -> &str {
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

fn coerce_value(raw: &str) -> Value {
    let unquoted = unquote(raw);
    if unquoted.len() != raw.len() {
        return Value::String(unquoted.to_string());
    }
    match raw {
        "null" => return Value::Null,
        _ if raw.eq_ignore_ascii_case("true") => return Value::Bool(true),
        _ if raw.eq_ignore_ascii_case("false") => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return json!(f);
        }
    }
    let looks_structured = (raw.starts_with('{') && raw.ends_with('}'))
        || (raw.starts_with('[') && raw.ends_with(']'));
    if looks_structured {
        if let Ok(v) = serde_json::from_str::<Value>(raw) {
            return v;
        }
    }
    Value::String(raw.to_string())
}
