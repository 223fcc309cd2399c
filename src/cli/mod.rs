//! CLI command handling
//!
//! Turns command line arguments into a `RunConfig`, runs the page and
//! formats the result.

use colored::Colorize;
use serde_json::{Map, Value};

use crate::commands::RunArgs;
use crate::common::config::{ConfigOverrides, RunConfig};
use crate::common::paths::page_url;
use crate::common::{Error, Result};
use crate::runner::{RunOutcome, RunResult, Runner};

/// Exit code for configuration errors
pub const EXIT_CONFIG: i32 = 2;

/// Build the run configuration: defaults, then the config file, then the arguments
pub fn build_config(args: &RunArgs) -> Result<RunConfig> {
    let base = match &args.config {
        Some(path) => RunConfig::load_from(path)?,
        None => RunConfig::load()?,
    };
    Ok(base.apply(overrides(args)?))
}

fn overrides(args: &RunArgs) -> Result<ConfigOverrides> {
    let mocha_extra = match &args.mocha {
        Some(json) => parse_mocha_options(json)?,
        None => Map::new(),
    };

    Ok(ConfigOverrides {
        url: Some(page_url(&args.file)?),
        ignore_console: args.ignore_console.then_some(true),
        ignore_exceptions: args.ignore_exceptions.then_some(true),
        ignore_resource_errors: args.ignore_resource_errors.then_some(true),
        mocha_load_ms: args.load_timeout,
        mocha_run_ms: args.run_timeout,
        run_ms: args.timeout,
        reporter: args.reporter.clone(),
        ui: args.ui.clone(),
        use_colors: args.no_colors.then_some(false),
        mocha_extra,
        chrome_path: args.chrome_path.clone(),
        chrome_flags: args.chrome_flags.clone(),
        remote: args.remote.clone(),
    })
}

fn parse_mocha_options(json: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::Config(format!(
            "--mocha must be a JSON object, got {}",
            other
        ))),
        Err(e) => Err(Error::Config(format!("--mocha is not valid JSON: {}", e))),
    }
}

/// Run one page and return the process exit code
pub async fn dispatch(args: RunArgs) -> Result<i32> {
    let config = build_config(&args)?;
    let mut runner = Runner::new(config)?;

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Interrupted");
            cancel.cancel();
        }
    });

    if let Err(e) = runner.connect().await {
        runner.teardown().await;
        return Err(e);
    }
    let outcome = runner.run().await;
    runner.teardown().await;
    let outcome = outcome?;

    match &outcome {
        RunOutcome::Ended(result) => println!("{}", summary(result)),
        RunOutcome::Failure(message) => eprintln!("{} {}", "Error:".red().bold(), message),
    }
    Ok(outcome.exit_code())
}

/// One-line summary printed after the reporter's own output
pub fn summary(result: &RunResult) -> String {
    let mut parts = vec![format!("{} passing", result.passes).green().to_string()];
    if result.failures > 0 {
        parts.push(format!("{} failing", result.failures).red().to_string());
    }
    if result.pending > 0 {
        parts.push(format!("{} pending", result.pending).cyan().to_string());
    }
    format!(
        "{} {} {}",
        "mocha-chrome:".bold(),
        parts.join(", "),
        format!("({}ms)", result.duration_ms).dimmed()
    )
}

/// Exit code for an error that stopped the CLI outside a run
pub fn error_exit_code(e: &Error) -> i32 {
    if e.is_config() {
        EXIT_CONFIG
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(file: &str) -> RunArgs {
        RunArgs {
            file: file.to_string(),
            config: Some(std::path::PathBuf::from("/nonexistent/mocha-chrome.toml")),
            ..Default::default()
        }
    }

    #[test]
    fn test_overrides_from_args() {
        let mut a = args("http://localhost:9000/test.html");
        a.reporter = Some("dot".to_string());
        a.no_colors = true;
        a.ignore_exceptions = true;
        a.load_timeout = Some(250);
        a.mocha = Some(r#"{"timeout": 5000, "ui": "tdd"}"#.to_string());

        let config = RunConfig::default().apply(overrides(&a).unwrap());
        assert_eq!(config.url.as_deref(), Some("http://localhost:9000/test.html"));
        assert_eq!(config.mocha.reporter, "dot");
        assert_eq!(config.mocha.ui, "tdd");
        assert!(!config.mocha.use_colors);
        assert!(config.ignore.exceptions);
        assert!(!config.ignore.console);
        assert_eq!(config.timeouts.mocha_load_ms, 250);
        assert_eq!(config.mocha.extra.get("timeout"), Some(&Value::from(5000)));
    }

    #[test]
    fn test_unset_flags_keep_file_values() {
        let base = RunConfig::parse("[ignore]\nconsole = true\n").unwrap();
        let config = base.apply(overrides(&args("http://localhost/")).unwrap());
        assert!(config.ignore.console);
        assert!(config.mocha.use_colors);
    }

    #[test]
    fn test_mocha_option_errors_are_config_errors() {
        let err = parse_mocha_options("[1, 2]").unwrap_err();
        assert_eq!(error_exit_code(&err), EXIT_CONFIG);
        assert!(parse_mocha_options("{nope").unwrap_err().is_config());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let err = build_config(&args("http://localhost/")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_summary_mentions_counts() {
        colored::control::set_override(false);
        let line = summary(&RunResult { passes: 6, failures: 6, pending: 0, duration_ms: 12 });
        assert_eq!(line, "mocha-chrome: 6 passing, 6 failing (12ms)");
    }
}
