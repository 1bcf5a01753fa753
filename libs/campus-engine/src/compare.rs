//! Comparison rules: output normalization, substring/pattern checks,
//! command structure checks, and structural SQL result equality.

use campus_common::types::{CommandRules, OutputRules, SqlExpected};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SHELL_TOKEN: Regex = Regex::new(r#"(?:"[^"]*"|'[^']*'|\S)+"#).unwrap();
}

/// Right-trim every line, drop trailing blank lines, trim the whole.
/// Stdout formatting is not fully controlled, so comparisons never use the
/// raw bytes.
pub fn normalize_output(output: &str) -> String {
    output
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Default comparison for code cases without explicit rules: the
/// normalized expected output must appear in the normalized actual output.
pub fn expected_matches(actual: &str, expected: &str) -> bool {
    let actual = normalize_output(actual);
    let expected = normalize_output(expected);
    if expected.is_empty() {
        return actual.is_empty();
    }
    actual.contains(&expected)
}

/// Apply substring rules to captured output.
pub fn check_output_rules(rules: &OutputRules, output: &str) -> Result<(), String> {
    for needle in &rules.must_include {
        if !output.contains(needle.as_str()) {
            return Err(format!("output is missing expected text: {needle}"));
        }
    }
    for needle in &rules.must_not_include {
        if output.contains(needle.as_str()) {
            return Err(format!("output must not contain: {needle}"));
        }
    }
    Ok(())
}

/// Quote-aware whitespace split, good enough for training commands.
pub fn shell_split(command: &str) -> Vec<String> {
    SHELL_TOKEN
        .find_iter(command)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Structural checks on the submitted command line: base command, required
/// flags (`--flag value` and `--flag=value` are equivalent), argument
/// presence, and resource/name tokens. Execution-result checks
/// (`require_success`) are handled by the caller, which has the result.
pub fn check_command_structure(rules: &CommandRules, command: &str) -> Result<(), String> {
    let cmd = command.trim();
    if cmd.is_empty() {
        return Err("please enter a command".to_string());
    }
    let tokens = shell_split(cmd);
    if tokens.is_empty() {
        return Err("invalid command format".to_string());
    }

    if !rules.base_command.is_empty() {
        let accepted = rules.base_command.iter().any(|base| {
            let base_words: Vec<&str> = base.split_whitespace().collect();
            tokens.len() >= base_words.len()
                && tokens[..base_words.len()]
                    .iter()
                    .zip(&base_words)
                    .all(|(token, word)| token == word)
        });
        if !accepted {
            return Err(format!("start with: {}", rules.base_command.join(" or ")));
        }
    }

    let missing: Vec<&String> = rules
        .required_flags
        .iter()
        .filter(|flag| !flag_present(&tokens, flag))
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "missing required flag(s): {}",
            missing
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    if rules.requires_argument && tokens.len() < 3 {
        return Err("missing required argument (e.g. resource type or name)".to_string());
    }

    if let Some(resource) = &rules.required_resource {
        if !tokens.iter().any(|t| t == resource) {
            return Err(format!("use resource type: {resource}"));
        }
    }

    if let Some(name) = &rules.required_name {
        if !tokens.iter().any(|t| t == name) {
            return Err(format!("use resource name: {name}"));
        }
    }

    Ok(())
}

fn flag_present(tokens: &[String], flag: &str) -> bool {
    if tokens.iter().any(|t| t == flag) {
        return true;
    }
    match flag.split_once(' ') {
        // Valued flag: "-o wide" matches "-o wide" or "-o=wide".
        Some((flag_name, flag_value)) => {
            if let Some(idx) = tokens
                .iter()
                .position(|t| t == flag_name || t.starts_with(flag_name))
            {
                let combined = &tokens[idx];
                if tokens.get(idx + 1).map(String::as_str) == Some(flag_value) {
                    return true;
                }
                if combined == &format!("{flag_name}={flag_value}") {
                    return true;
                }
                if combined.starts_with(&format!("{flag_name}=")) && combined.ends_with(flag_value)
                {
                    return true;
                }
            }
            false
        }
        // Bare flag: presence or prefix ("-it" satisfies "-i").
        None => tokens.iter().any(|t| t == flag || t.starts_with(flag)),
    }
}

/// Render an authored expected cell to text for comparison.
pub fn sql_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_cell(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Structural SQL equality: exact column list, matching row count, and
/// row *sets* compared after per-value normalization and sorting; row
/// order never matters.
pub fn check_sql_result(
    expected: &SqlExpected,
    actual_columns: &[String],
    actual_rows: &[Vec<String>],
) -> Result<(), String> {
    let expected_columns: Vec<String> =
        expected.columns.iter().map(|c| c.trim().to_string()).collect();
    let trimmed_actual: Vec<String> = actual_columns.iter().map(|c| c.trim().to_string()).collect();
    if expected_columns != trimmed_actual {
        return Err(format!(
            "expected columns [{}], got [{}]",
            expected_columns.join(", "),
            trimmed_actual.join(", ")
        ));
    }

    if expected.rows.len() != actual_rows.len() {
        return Err(format!(
            "expected {} row(s), got {}",
            expected.rows.len(),
            actual_rows.len()
        ));
    }

    let mut want: Vec<Vec<String>> = expected
        .rows
        .iter()
        .map(|row| row.iter().map(|v| normalize_cell(&sql_value_text(v))).collect())
        .collect();
    let mut got: Vec<Vec<String>> = actual_rows
        .iter()
        .map(|row| row.iter().map(|v| normalize_cell(v)).collect())
        .collect();
    want.sort();
    got.sort();

    if want == got {
        Ok(())
    } else {
        Err("result rows do not match the expected result".to_string())
    }
}
