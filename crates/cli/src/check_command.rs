use std::path::Path;

use {
    anyhow::Result,
    chanrelay_config::{Severity, validate},
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults and environment.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} [{}] {}", d.category, d.message);
        } else {
            eprintln!(
                "  {BOLD}{color}{label}{RESET} [{}] {}: {}",
                d.category, d.path, d.message
            );
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if result.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}
