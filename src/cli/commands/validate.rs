//! `validate` command handler
//!
//! Loads each file through the same pipeline `run` uses and prints a
//! per-file summary. Every file is checked before the command fails.

use std::path::Path;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::loader::{ConfigLoader, LoadWarning};
use crate::error::{ConfigError, PhaseKeeperError, Severity, ValidationIssue};

/// Outcome for one file.
#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    valid: bool,
    accounts: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Validate configuration files without running.
///
/// # Errors
///
/// Returns the first file's config error if any file fails to load or
/// validate. With `--strict`, warnings count as errors.
pub fn validate(args: &ValidateArgs) -> Result<(), PhaseKeeperError> {
    let loader = ConfigLoader::with_defaults();
    let mut reports = Vec::with_capacity(args.files.len());
    let mut first_error: Option<ConfigError> = None;

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let (report, error) = check_file(&loader, path, args.strict);
        if let Some(error) = error {
            tracing::error!(file = %path.display(), error = %error, "configuration invalid");
            first_error.get_or_insert(error);
        } else {
            tracing::info!(file = %path.display(), "configuration valid");
        }
        reports.push(report);
    }

    match args.format {
        OutputFormat::Human => {
            for report in &reports {
                print_human(report);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    first_error.map_or(Ok(()), |e| Err(e.into()))
}

fn check_file(
    loader: &ConfigLoader,
    path: &Path,
    strict: bool,
) -> (FileReport, Option<ConfigError>) {
    let file = path.display().to_string();
    match loader.load(path) {
        Ok(result) => {
            let warnings: Vec<String> = result.warnings.iter().map(ToString::to_string).collect();
            let error = (strict && !result.warnings.is_empty())
                .then(|| strict_error(&file, &result.warnings));
            let report = FileReport {
                file,
                valid: error.is_none(),
                accounts: result.config.accounts.len(),
                errors: Vec::new(),
                warnings,
            };
            (report, error)
        }
        Err(error) => {
            let errors = match &error {
                ConfigError::ValidationError { errors, .. } => {
                    errors.iter().map(ToString::to_string).collect()
                }
                other => vec![other.to_string()],
            };
            let report = FileReport {
                file,
                valid: false,
                accounts: 0,
                errors,
                warnings: Vec::new(),
            };
            (report, Some(error))
        }
    }
}

/// Promotes load warnings to a validation failure.
fn strict_error(file: &str, warnings: &[LoadWarning]) -> ConfigError {
    ConfigError::ValidationError {
        path: file.to_string(),
        errors: warnings
            .iter()
            .map(|w| ValidationIssue {
                path: w.location.clone().unwrap_or_default(),
                message: w.message.clone(),
                severity: Severity::Error,
            })
            .collect(),
    }
}

fn print_human(report: &FileReport) {
    if report.valid {
        println!("{}: ok ({} accounts)", report.file, report.accounts);
    } else {
        println!("{}: invalid", report.file);
    }
    for error in &report.errors {
        println!("  {error}");
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
}
