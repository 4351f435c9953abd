// SPDX-License-Identifier: AGPL-3.0
//! Regex-based secret detection and redaction over arbitrary JSON values.
//!
//! Patterns are evaluated once per string leaf during a recursive walk, so
//! cost scales with total string bytes rather than document shape.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub struct SecretPattern {
    pub name: &'static str,
    regex: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: String,
    pub pattern_name: String,
    pub matched_substring: String,
}

const REDACTED: &str = "REDACTED";

static PATTERNS: Lazy<Vec<SecretPattern>> = Lazy::new(|| {
    vec![
        SecretPattern {
            name: "aws_access_key_id",
            regex: Regex::new(r"AKIA[0-9A-Z]{16}").unwrap(),
        },
        SecretPattern {
            name: "generic_api_key",
            regex: Regex::new(r#"(?i)\b(?:api[_-]?key|apikey)\b\s*[:=]\s*['"]?([A-Za-z0-9_\-]{16,})['"]?"#).unwrap(),
        },
        SecretPattern {
            name: "sk_style_secret",
            regex: Regex::new(r"\bsk-[A-Za-z0-9]{16,}\b").unwrap(),
        },
        SecretPattern {
            name: "jwt",
            regex: Regex::new(r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b").unwrap(),
        },
        SecretPattern {
            name: "database_url",
            regex: Regex::new(r#"(?i)\b(?:postgres|postgresql|mysql|mongodb)://[^\s'"]+"#).unwrap(),
        },
        SecretPattern {
            name: "private_key_block",
            regex: Regex::new(r"-----BEGIN (?:RSA |EC |OPENSSH )?PRIVATE KEY-----").unwrap(),
        },
        SecretPattern {
            name: "slack_token",
            regex: Regex::new(r"xox[baprs]-[A-Za-z0-9-]{10,}").unwrap(),
        },
    ]
});

pub struct SecretScanner;

impl SecretScanner {
    pub fn new() -> Self {
        Self
    }

    pub fn scan(&self, value: &Value) -> Vec<Finding> {
        let mut findings = Vec::new();
        Self::walk(value, "$", &mut findings);
        findings
    }

    /// Structure-preserving deep copy with every matched substring replaced
    /// by the literal `REDACTED`.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(Self::redact_string(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn walk(value: &Value, path: &str, findings: &mut Vec<Finding>) {
        match value {
            Value::String(s) => {
                for pattern in PATTERNS.iter() {
                    for m in pattern.regex.find_iter(s) {
                        findings.push(Finding {
                            path: path.to_string(),
                            pattern_name: pattern.name.to_string(),
                            matched_substring: m.as_str().to_string(),
                        });
                    }
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    Self::walk(item, &format!("{path}[{i}]"), findings);
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    Self::walk(v, &format!("{path}.{k}"), findings);
                }
            }
            _ => {}
        }
    }

    fn redact_string(s: &str) -> String {
        let mut out = s.to_string();
        for pattern in PATTERNS.iter() {
            out = pattern.regex.replace_all(&out, REDACTED).into_owned();
        }
        out
    }
}

impl Default for SecretScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_api_key_in_nested_object() {
        let scanner = SecretScanner::new();
        let value = json!({ "response": { "api_key": "sk-abcdefgh12345678" } });
        let findings = scanner.scan(&value);
        assert!(!findings.is_empty());
        assert!(findings.iter().any(|f| f.pattern_name == "sk_style_secret"));
    }

    #[test]
    fn redact_then_scan_is_empty() {
        let scanner = SecretScanner::new();
        let value = json!({ "data": ["sk-abcdefgh12345678", "plain text"] });
        assert!(!scanner.scan(&value).is_empty());
        let redacted = scanner.redact(&value);
        assert!(scanner.scan(&redacted).is_empty());
        assert_eq!(redacted["data"][0], json!("REDACTED"));
        assert_eq!(redacted["data"][1], json!("plain text"));
    }

    #[test]
    fn clean_value_has_no_findings() {
        let scanner = SecretScanner::new();
        let value = json!({ "name": "alice", "count": 3 });
        assert!(scanner.scan(&value).is_empty());
    }
}
