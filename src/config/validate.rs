//! Configuration validation with unknown field detection.

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "loop",
    "permissions",
    "validation",
    "compaction",
    "services",
    "logging",
];

/// Known fields for each section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    (
        "loop",
        &[
            "default_model",
            "auto_approval",
            "dangerous_tools",
            "default_approval_timeout_ms",
        ],
    ),
    (
        "permissions",
        &["default_level", "dev_mode", "basic", "operation", "system"],
    ),
    (
        "validation",
        &[
            "denied_targets",
            "required_params",
            "framework_manifests",
            "runtime_mode_var",
            "production_env",
        ],
    ),
    (
        "compaction",
        &[
            "max_history_count",
            "keyword_weight",
            "keyword_cap",
            "time_decay_factor",
            "position_weight",
            "min_retain_length",
            "keywords",
        ],
    ),
    ("services", &["base_url", "token", "timeout_secs"]),
    ("logging", &["level", "format", "file"]),
];

const KNOWN_LEVEL_POLICY: &[&str] = &[
    "allowed_scopes",
    "allowed_methods",
    "requires_approval",
    "approval_timeout_ms",
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn check_keys(
    obj: &Map<String, Value>,
    known: &[&str],
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let known_set: HashSet<&str> = known.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if known_set.contains(key.as_str()) {
            continue;
        }
        has_unknown = true;
        let message = match suggest_field(key, known) {
            Some(suggestion) => format!("Unknown field '{}' ({})", key, suggestion),
            None => format!("Unknown field '{}'", key),
        };
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Error,
            path,
            message,
        });
    }
    has_unknown
}

/// Validate a raw JSON config value against known field names and value ranges.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                path: String::new(),
                message: "Config must be a JSON object".to_string(),
            });
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Ok,
        path: String::new(),
        message: "Valid JSON".to_string(),
    });

    let mut has_unknown = check_keys(obj, KNOWN_TOP_LEVEL, "", &mut diagnostics);
    for (section, known) in KNOWN_SECTIONS {
        if let Some(section_obj) = obj.get(*section).and_then(|v| v.as_object()) {
            has_unknown |= check_keys(section_obj, known, section, &mut diagnostics);
        }
    }
    if let Some(permissions) = obj.get("permissions").and_then(|v| v.as_object()) {
        for level in ["basic", "operation", "system"] {
            if let Some(policy) = permissions.get(level).and_then(|v| v.as_object()) {
                has_unknown |= check_keys(
                    policy,
                    KNOWN_LEVEL_POLICY,
                    &format!("permissions.{}", level),
                    &mut diagnostics,
                );
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Ok,
            path: String::new(),
            message: "All fields recognized".to_string(),
        });
    }

    // Deny-list patterns must compile
    if let Some(patterns) = obj
        .get("validation")
        .and_then(|v| v.get("denied_targets"))
        .and_then(|v| v.as_array())
    {
        for (i, pattern) in patterns.iter().enumerate() {
            let Some(pattern) = pattern.as_str() else {
                continue;
            };
            if let Err(e) = regex::Regex::new(pattern) {
                diagnostics.push(Diagnostic {
                    level: DiagnosticLevel::Error,
                    path: format!("validation.denied_targets[{}]", i),
                    message: format!("Invalid regex: {}", e),
                });
            }
        }
        if patterns.is_empty() {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Warn,
                path: "validation.denied_targets".to_string(),
                message: "Empty; path traversal targets will pass the precheck".to_string(),
            });
        }
    }

    if let Some(compaction) = obj.get("compaction").and_then(|v| v.as_object()) {
        if let Some(decay) = compaction.get("time_decay_factor").and_then(|v| v.as_f64()) {
            if decay <= 0.0 || decay > 1.0 {
                diagnostics.push(Diagnostic {
                    level: DiagnosticLevel::Error,
                    path: "compaction.time_decay_factor".to_string(),
                    message: format!("Must be in (0, 1], got {}", decay),
                });
            }
        }
        if compaction.get("max_history_count").and_then(|v| v.as_u64()) == Some(0) {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Warn,
                path: "compaction.max_history_count".to_string(),
                message: "Zero; every compaction will drop the whole history".to_string(),
            });
        }
    }

    if obj
        .get("permissions")
        .and_then(|v| v.get("dev_mode"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warn,
            path: "permissions.dev_mode".to_string(),
            message: "Enabled; every session starts at the system level".to_string(),
        });
    }

    diagnostics
}
