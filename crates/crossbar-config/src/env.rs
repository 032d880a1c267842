use std::sync::OnceLock;

use regex::Regex;

/// Expand `{{ env.VAR }}` placeholders in raw TOML text
///
/// `{{ env.VAR | default("fallback") }}` substitutes the fallback when
/// the variable is unset. Expansion happens before deserialization so
/// config structs hold plain `String`/`SecretString` values. TOML
/// comment lines pass through untouched.
pub fn expand_env(input: &str) -> Result<String, String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*env\.([A-Za-z0-9_]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("placeholder regex is valid")
    });

    let mut output = String::with_capacity(input.len());
    let mut first = true;

    for line in input.lines() {
        if !first {
            output.push('\n');
        }
        first = false;

        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let mut cursor = 0;
        for caps in re.captures_iter(line) {
            let whole = caps.get(0).expect("match exists");
            output.push_str(&line[cursor..whole.start()]);

            let var = &caps[1];
            match std::env::var(var) {
                Ok(value) => output.push_str(&value),
                Err(_) => match caps.get(2) {
                    Some(fallback) => output.push_str(fallback.as_str()),
                    None => return Err(format!("environment variable not found: `{var}`")),
                },
            }

            cursor = whole.end();
        }
        output.push_str(&line[cursor..]);
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_without_placeholders() {
        assert_eq!(expand_env("key = \"plain\"").unwrap(), "key = \"plain\"");
    }

    #[test]
    fn expands_set_variable() {
        temp_env::with_var("CB_TOKEN", Some("sk-live"), || {
            let out = expand_env("value = \"{{ env.CB_TOKEN }}\"").unwrap();
            assert_eq!(out, "value = \"sk-live\"");
        });
    }

    #[test]
    fn missing_variable_errors() {
        temp_env::with_var_unset("CB_MISSING", || {
            let err = expand_env("value = \"{{ env.CB_MISSING }}\"").unwrap_err();
            assert!(err.contains("CB_MISSING"));
        });
    }

    #[test]
    fn default_covers_missing_variable() {
        temp_env::with_var_unset("CB_OPT", || {
            let out = expand_env("value = \"{{ env.CB_OPT | default(\"none\") }}\"").unwrap();
            assert_eq!(out, "value = \"none\"");
        });
    }

    #[test]
    fn comment_lines_are_not_expanded() {
        temp_env::with_var_unset("CB_MISSING", || {
            let input = "# value = \"{{ env.CB_MISSING }}\"";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }
}
