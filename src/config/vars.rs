//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` or `${VAR}`: the variable's value, error if it is unset
//! - `${VAR:-fallback}`: fallback when VAR is unset or empty
//! - `${VAR-fallback}`: fallback only when VAR is unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;

static VAR_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?:(?P<op>:?-)(?P<fallback>[^}]*))?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("variable reference pattern is valid")
});

/// Substitute variable references using the process environment.
///
/// Every problem is collected so a config with several missing variables
/// reports all of them at once.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Substitute variable references using `lookup` to resolve names.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut problems = Vec::new();

    let text = VAR_REFERENCE.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }

        let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
            return whole.to_string();
        };
        let name = name.as_str();
        let op = caps.name("op").map(|m| m.as_str());
        let fallback = caps.name("fallback").map(|m| m.as_str());

        match (lookup(name), fallback) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                problems.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                whole.to_string()
            }
            (Some(value), Some(fallback)) if value.is_empty() && op == Some(":-") => {
                fallback.to_string()
            }
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.to_string(),
            (None, None) => {
                problems.push(format!("environment variable '{name}' is not set"));
                whole.to_string()
            }
        }
    });

    if problems.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(
        input: &str,
        vars: &[(&str, &str)],
    ) -> Result<String, Vec<String>> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        interpolate_with(input, |name| env.get(name).cloned())
    }

    #[test]
    fn test_bare_and_braced_references() {
        let text = resolve(
            "bucket: $BUCKET, prefix: ${PREFIX}",
            &[("BUCKET", "udacity-dend"), ("PREFIX", "sparkify")],
        )
        .unwrap();
        assert_eq!(text, "bucket: udacity-dend, prefix: sparkify");
    }

    #[test]
    fn test_every_missing_variable_is_reported() {
        let problems = resolve("a: $FIRST_MISSING, b: ${SECOND_MISSING}", &[]).unwrap_err();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("FIRST_MISSING"));
        assert!(problems[1].contains("not set"));
    }

    #[test]
    fn test_colon_dash_falls_back_on_empty() {
        let text = resolve("region: ${REGION:-us-west-2}", &[("REGION", "")]).unwrap();
        assert_eq!(text, "region: us-west-2");
    }

    #[test]
    fn test_dash_keeps_empty_value() {
        let text = resolve("region: ${REGION-us-west-2}", &[("REGION", "")]).unwrap();
        assert_eq!(text, "region: ");
    }

    #[test]
    fn test_fallback_used_when_unset() {
        let text = resolve("zone: ${TZ_MODE-utc}", &[]).unwrap();
        assert_eq!(text, "zone: utc");
    }

    #[test]
    fn test_set_value_wins_over_fallback() {
        let text = resolve("zone: ${TZ_MODE:-utc}", &[("TZ_MODE", "local")]).unwrap();
        assert_eq!(text, "zone: local");
    }

    #[test]
    fn test_dollar_escape() {
        assert_eq!(resolve("cost: $$5", &[]).unwrap(), "cost: $5");
    }

    #[test]
    fn test_line_breaks_rejected() {
        let problems = resolve("key: $SECRET", &[("SECRET", "a\nb")]).unwrap_err();
        assert!(problems[0].contains("newlines"));

        let problems = resolve("key: $SECRET", &[("SECRET", "a\rb")]).unwrap_err();
        assert!(problems[0].contains("newlines"));
    }

    #[test]
    fn test_credentials_block() {
        let yaml = r#"
credentials:
  access_key_id: ${SPARKIFY_TEST_KEY}
  secret_access_key: ${SPARKIFY_TEST_SECRET}
  region: ${SPARKIFY_TEST_REGION:-us-west-2}
"#;
        let text = resolve(
            yaml,
            &[("SPARKIFY_TEST_KEY", "AKIA123"), ("SPARKIFY_TEST_SECRET", "shh")],
        )
        .unwrap();
        assert!(text.contains("access_key_id: AKIA123"));
        assert!(text.contains("secret_access_key: shh"));
        assert!(text.contains("region: us-west-2"));
    }

    #[test]
    fn test_process_environment_lookup() {
        let text = interpolate("plain: ${SPARKIFY_TEST_SURELY_UNSET-ok}").unwrap();
        assert_eq!(text, "plain: ok");
    }
}
