//! Configuration validation.
//!
//! Flags unknown or misspelled fields, type errors, and settings that would
//! make the relay misbehave (no target, target among sources, zero workers).

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use crate::{
    env_subst::substitute_env,
    loader::{apply_env_overrides, find_config_file, parse_config_value},
    schema::RelayConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "channels", "forwarding",
    /// "telegram", "env"
    pub category: &'static str,
    /// Dotted path, e.g. "forwarding.workers"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    Struct(HashMap::from([
        ("target", Leaf),
        ("sources", Leaf),
        ("store", Struct(HashMap::from([("url", Leaf)]))),
        (
            "telegram",
            Struct(HashMap::from([
                ("token", Leaf),
                ("api_url", Leaf),
                ("poll_timeout_secs", Leaf),
            ])),
        ),
        (
            "forwarding",
            Struct(HashMap::from([
                ("workers", Leaf),
                ("new_source", Leaf),
                ("backfill_window", Leaf),
                ("history_page_size", Leaf),
                ("transport_retry_limit", Leaf),
                ("transport_retry_delay_secs", Leaf),
            ])),
        ),
        (
            "supervisor",
            Struct(HashMap::from([
                ("backoff_secs", Leaf),
                ("session_reset_threshold", Leaf),
            ])),
        ),
        (
            "metrics",
            Struct(HashMap::from([("enabled", Leaf), ("listen", Leaf)])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate the config file at `path`, or the discovered one when `None`.
///
/// Environment overrides are applied before the semantic checks, so a config
/// supplied purely through `CHANRELAY_*` variables validates cleanly.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path.map(Path::to_path_buf).or_else(find_config_file);

    let Some(actual_path) = config_path else {
        let mut config = RelayConfig::default();
        let mut diagnostics = vec![Diagnostic::new(
            Severity::Info,
            "syntax",
            "",
            "no config file found; using defaults and environment",
        )];
        if let Err(e) = apply_env_overrides(&mut config) {
            diagnostics.push(Diagnostic::new(Severity::Error, "env", "", format!("{e:#}")));
        }
        check_semantics(&config, &mut diagnostics);
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(raw) => validate_str(&substitute_env(&raw), &actual_path, true),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw config text; `path` only selects the format by extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path, with_env: bool) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<RelayConfig>(value) {
        Ok(mut config) => {
            if with_env && let Err(e) = apply_env_overrides(&mut config) {
                diagnostics.push(Diagnostic::new(Severity::Error, "env", "", format!("{e:#}")));
            }
            check_semantics(&config, &mut diagnostics);
        },
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(map), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known: Vec<&str> = fields.keys().copied().collect();
    for (key, child) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    message,
                ));
            },
        }
    }
}

/// Checks on a successfully parsed config.
fn check_semantics(config: &RelayConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut push = |severity, category, path: &str, message: String| {
        diagnostics.push(Diagnostic::new(severity, category, path, message));
    };

    match &config.target {
        None => push(
            Severity::Error,
            "channels",
            "target",
            "no target channel configured".into(),
        ),
        Some(target) if config.sources.contains(target) => push(
            Severity::Error,
            "channels",
            "sources",
            format!("target {target} is also a source; events would loop"),
        ),
        Some(_) => {},
    }

    if config.sources.is_empty() {
        push(
            Severity::Error,
            "channels",
            "sources",
            "no source channels configured".into(),
        );
    }
    let mut seen = HashSet::new();
    for source in &config.sources {
        if !seen.insert(source) {
            push(
                Severity::Warning,
                "channels",
                "sources",
                format!("source {source} is listed more than once"),
            );
        }
    }

    let fwd = &config.forwarding;
    if fwd.workers == 0 {
        push(
            Severity::Error,
            "forwarding",
            "forwarding.workers",
            "at least one worker is required".into(),
        );
    }
    if fwd.history_page_size == 0 {
        push(
            Severity::Error,
            "forwarding",
            "forwarding.history_page_size",
            "history page size must be positive".into(),
        );
    }
    if fwd.transport_retry_limit == 0 {
        push(
            Severity::Warning,
            "forwarding",
            "forwarding.transport_retry_limit",
            "items failing with transport errors are dropped without a retry".into(),
        );
    }
    if config.supervisor.session_reset_threshold == 0 {
        push(
            Severity::Warning,
            "supervisor",
            "supervisor.session_reset_threshold",
            "0 resets the session on every stale-session fault".into(),
        );
    }

    if !config.telegram.has_token() {
        push(
            Severity::Error,
            "telegram",
            "telegram.token",
            "no bot token configured (set telegram.token or CHANRELAY_TELEGRAM_TOKEN)".into(),
        );
    }
    if config.metrics.listen.is_some() && !config.metrics.enabled {
        push(
            Severity::Info,
            "metrics",
            "metrics.listen",
            "listen address is ignored while metrics are disabled".into(),
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
target = "-1001"
sources = ["-1002", "@news"]

[telegram]
token = "1:abc"
"#;

    fn run(raw: &str) -> ValidationResult {
        validate_str(raw, Path::new("chanrelay.toml"), false)
    }

    fn find<'a>(result: &'a ValidationResult, path: &str) -> Option<&'a Diagnostic> {
        result.diagnostics.iter().find(|d| d.path == path)
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("target", "target"), 0);
        assert_eq!(levenshtein("sorces", "sources"), 1);
        assert_eq!(levenshtein("wrokers", "workers"), 2);
    }

    #[test]
    fn valid_config_has_no_diagnostics() {
        let result = run(VALID);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = run(&format!("sorces = []\n{VALID}"));
        let d = find(&result, "sorces").expect("unknown-field for sorces");
        assert_eq!(d.category, "unknown-field");
        assert!(d.message.contains("sources"), "{}", d.message);
        assert!(result.has_errors());
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let result = run(&format!("{VALID}\n[forwarding]\nwrokers = 2\n"));
        let d = find(&result, "forwarding.wrokers").expect("nested unknown field");
        assert!(d.message.contains("workers"));
    }

    #[test]
    fn syntax_error_detected() {
        let result = run("target = [");
        assert_eq!(result.diagnostics[0].category, "syntax");
        assert!(result.has_errors());
    }

    #[test]
    fn type_error_detected() {
        let result = run(&format!("{VALID}\n[forwarding]\nworkers = \"many\"\n"));
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn missing_target_and_sources_are_errors() {
        let result = run("[telegram]\ntoken = \"1:abc\"\n");
        assert!(find(&result, "target").is_some());
        assert!(find(&result, "sources").is_some());
        assert_eq!(result.count(Severity::Error), 2);
    }

    #[test]
    fn target_among_sources_is_error() {
        let raw = "target = \"@x\"\nsources = [\"@X\"]\n[telegram]\ntoken = \"t\"\n";
        let d = find(&run(raw), "sources").cloned().expect("loop diagnostic");
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("loop"));
    }

    #[test]
    fn duplicate_sources_warned() {
        let raw = "target = 1\nsources = [2, \"2\"]\n[telegram]\ntoken = \"t\"\n";
        let result = run(raw);
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(!result.has_errors());
    }

    #[test]
    fn zero_workers_and_page_size_are_errors() {
        let result = run(&format!(
            "{VALID}\n[forwarding]\nworkers = 0\nhistory_page_size = 0\n"
        ));
        assert!(find(&result, "forwarding.workers").is_some());
        assert!(find(&result, "forwarding.history_page_size").is_some());
    }

    #[test]
    fn missing_token_is_error() {
        let result = run("target = 1\nsources = [2]\n");
        let d = find(&result, "telegram.token").expect("token diagnostic");
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn yaml_is_validated_too() {
        let raw = "target: 1\nsources: [2]\ntelegram:\n  token: t\n  tokn: x\n";
        let result = validate_str(raw, Path::new("chanrelay.yaml"), false);
        assert!(find(&result, "telegram.tokn").is_some());
    }
}
