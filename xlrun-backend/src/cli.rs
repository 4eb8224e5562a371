/// Parsed command-line arguments.
pub struct CliArgs {
    /// Path to configuration file, if provided via `--config-path` or `-c`.
    pub config_path: Option<String>,
    /// Whether help was requested.
    pub help_requested: bool,
}

impl CliArgs {
    /// Parse the process arguments.
    ///
    /// Supported flags:
    /// - `--config-path <path>`, `--config-path=<path>`, `-c <path>` or `-c=<path>`
    /// - `--help` or `-h`
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    fn from_args(args: &[String]) -> Self {
        Self {
            config_path: Self::extract_config_path(args),
            help_requested: args.iter().skip(1).any(|a| a == "--help" || a == "-h"),
        }
    }

    /// Print usage information to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage: xlrun-backend [--config-path PATH] [--help]\n\n\
             --config-path, -c    Path to configuration file (overrides XLRUN_CONFIG_PATH env var)\n\n\
             Every setting can also be overridden with XLRUN_* environment variables."
        );
    }

    fn extract_config_path(args: &[String]) -> Option<String> {
        let mut rest = args.iter().skip(1);
        while let Some(a) = rest.next() {
            if let Some(value) = a
                .strip_prefix("--config-path=")
                .or_else(|| a.strip_prefix("-c="))
            {
                return Some(value.to_string());
            }
            if a == "--config-path" || a == "-c" {
                return rest.next().cloned();
            }
        }
        None
    }
}
