//! Bundled sample routine: summarises its inputs and options.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::RoutineError;
use crate::routine::ProcessingRoutine;

/// Written when `required_inputs` names files that were not uploaded.
pub const MISSING_INPUTS_FILE: &str = "ERROR_MISSING_INPUTS.txt";
/// Completion sentinel; filtered out of result listings.
pub const OK_SENTINEL_FILE: &str = "_OK.txt";
pub const REPORT_FILE: &str = "report.txt";
pub const RESULT_FILE: &str = "result_example.csv";

/// Writes `report.txt` and `result_example.csv` for the job's inputs.
///
/// Recognised options:
/// - `required_inputs`: list of file names that must be among the inputs
///   (compared case-insensitively). If any are absent the routine writes
///   [`MISSING_INPUTS_FILE`] and exits with 1.
#[derive(Debug, Default)]
pub struct ReportRoutine;

impl ReportRoutine {
    pub fn new() -> Self {
        Self
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn required_inputs(options: &Map<String, Value>) -> Result<Vec<String>, RoutineError> {
    match options.get("required_inputs") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    RoutineError::InvalidOptions(format!(
                        "required_inputs entries must be strings, got {item}"
                    ))
                })
            })
            .collect(),
        Some(other) => Err(RoutineError::InvalidOptions(format!(
            "required_inputs must be a list, got {other}"
        ))),
    }
}

impl ProcessingRoutine for ReportRoutine {
    fn run(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        options: &Map<String, Value>,
    ) -> Result<i32, RoutineError> {
        fs::create_dir_all(output_dir)?;
        let names: Vec<String> = inputs.iter().map(|p| file_name(p)).collect();

        let missing: Vec<String> = required_inputs(options)?
            .into_iter()
            .filter(|req| !names.iter().any(|n| n.eq_ignore_ascii_case(req)))
            .collect();
        if !missing.is_empty() {
            let mut body = String::from("Missing required input files:\n");
            for name in &missing {
                body.push_str(&format!(" - {name}\n"));
            }
            fs::write(output_dir.join(MISSING_INPUTS_FILE), body)?;
            warn!(missing = ?missing, "required inputs not uploaded");
            return Ok(1);
        }

        let mut report = String::from("Report routine executed\n");
        report.push_str(&format!("Generated at: {}\n", Utc::now().to_rfc3339()));
        report.push_str(&format!("Options: {}\n", Value::Object(options.clone())));
        report.push_str("Inputs:\n");
        for name in &names {
            report.push_str(&format!(" - {name}\n"));
        }
        fs::write(output_dir.join(REPORT_FILE), report)?;
        let csv = format!("input,bytes\n{}", input_rows(inputs)?);
        fs::write(output_dir.join(RESULT_FILE), csv)?;
        fs::write(output_dir.join(OK_SENTINEL_FILE), "ok\n")?;

        info!(inputs = names.len(), "report routine finished");
        Ok(0)
    }
}

fn input_rows(inputs: &[PathBuf]) -> Result<String, RoutineError> {
    let mut rows = String::new();
    for path in inputs {
        let size = fs::metadata(path)?.len();
        rows.push_str(&format!("{},{size}\n", file_name(path)));
    }
    Ok(rows)
}
