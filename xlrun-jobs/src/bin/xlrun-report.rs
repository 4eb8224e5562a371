//! The bundled report routine as a standalone process.
//!
//! Speaks the subprocess contract of the execution adapter:
//!
//! ```text
//! xlrun-report --inputs '["/data/a.xlsx"]' --out /data/jobs/<id> --options '{"week":3}'
//! ```
//!
//! Exits with the routine's code; argument errors exit with 2.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use serde_json::{Map, Value};
use xlrun_jobs::{ProcessingRoutine, ReportRoutine};

/// Parsed `--inputs/--out/--options` arguments.
#[derive(Debug, PartialEq)]
struct ReportArgs {
    inputs: Vec<PathBuf>,
    out: PathBuf,
    options: Map<String, Value>,
}

impl ReportArgs {
    fn from_args(args: &[String]) -> anyhow::Result<Self> {
        let (mut inputs, mut out, mut options) = (None, None, None);
        let mut rest = args.iter().skip(1);
        while let Some(flag) = rest.next() {
            let slot = match flag.as_str() {
                "--inputs" => &mut inputs,
                "--out" => &mut out,
                "--options" => &mut options,
                other => bail!("unknown argument `{other}`"),
            };
            let value = rest
                .next()
                .with_context(|| format!("{flag} needs a value"))?;
            *slot = Some(value.clone());
        }

        let inputs: Vec<PathBuf> = match inputs {
            Some(raw) => serde_json::from_str(&raw).context("--inputs must be a JSON array of paths")?,
            None => Vec::new(),
        };
        let out = out
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("--out is required"))?;
        let options: Map<String, Value> = match options {
            Some(raw) => serde_json::from_str(&raw).context("--options must be a JSON object")?,
            None => Map::new(),
        };
        Ok(Self {
            inputs,
            out,
            options,
        })
    }
}

fn main() {
    // Diagnostics go to stderr, which the adapter copies into the job log.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .init();

    let argv: Vec<String> = std::env::args().collect();
    let args = match ReportArgs::from_args(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("xlrun-report: {e:#}");
            std::process::exit(2);
        }
    };

    let code = match ReportRoutine::new().run(&args.inputs, &args.out, &args.options) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("xlrun-report: {e}");
            1
        }
    };
    println!("report routine finished with exit code {code}");
    std::process::exit(code);
}
