//! Environment variable interpolation for config files.
//!
//! Recognised forms:
//! - `$VAR` / `${VAR}` substitute, missing is an error
//! - `${VAR:-default}` falls back when VAR is unset or empty
//! - `${VAR-default}` falls back only when VAR is unset
//! - `$$` is a literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::ConfigError;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{ ([A-Za-z_][A-Za-z0-9_]*) (?: (:?-) ([^}]*) )? \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("interpolation pattern is valid")
});

/// Interpolate environment variables using `lookup` as the variable source.
///
/// Every unresolved variable is reported, not just the first one.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }

        let name = caps
            .get(1)
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let empty_falls_back = caps.get(2).is_some_and(|m| m.as_str() == ":-");
        let default = caps.get(3).map(|m| m.as_str());

        match (lookup(name), default) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                errors.push(format!("environment variable '{name}' contains newlines"));
                whole.to_string()
            }
            (Some(value), Some(default)) if value.is_empty() && empty_falls_back => {
                default.to_string()
            }
            (Some(value), _) => value,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                errors.push(format!("environment variable '{name}' is not set"));
                whole.to_string()
            }
        }
    });

    if errors.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(ConfigError::EnvInterpolation {
            message: errors.join("\n"),
        })
    }
}

/// Interpolate variables from the process environment.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_basic_and_braced_substitution() {
        let lookup = vars(&[("REGION", "eu-west-1")]);
        assert_eq!(
            interpolate_with("a: $REGION b: ${REGION}", lookup).unwrap(),
            "a: eu-west-1 b: eu-west-1"
        );
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        let err = interpolate_with("$FIRST ${SECOND}", vars(&[])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("FIRST"));
        assert!(message.contains("SECOND"));
    }

    #[test]
    fn test_defaults() {
        let lookup = vars(&[("EMPTY", "")]);
        assert_eq!(interpolate_with("${UNSET:-x}", &lookup).unwrap(), "x");
        assert_eq!(interpolate_with("${UNSET-x}", &lookup).unwrap(), "x");
        assert_eq!(interpolate_with("${EMPTY:-x}", &lookup).unwrap(), "x");
        assert_eq!(interpolate_with("${EMPTY-x}", &lookup).unwrap(), "");
    }

    #[test]
    fn test_escape_sequence() {
        assert_eq!(interpolate_with("cost: $$5", vars(&[])).unwrap(), "cost: $5");
    }

    #[test]
    fn test_newline_injection_rejected() {
        let lookup = vars(&[("BAD", "a\nb")]);
        assert!(interpolate_with("$BAD", lookup).is_err());
    }
}
