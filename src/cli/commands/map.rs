//! `parmap map`: run an external command once per input element

use crate::cli::args::MapArgs;
use crate::config::{self, ParmapConfig};
use crate::dispatch::{unit_fn, ImputeError, Inputs, MapOptions, UnitFn};
use crate::session::Session;
use crate::subprocess::{ProcessCommandBuilder, SubprocessManager};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Placeholder replaced by the element in program arguments
pub const PLACEHOLDER: &str = "{}";

/// Program and arguments run for every element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandTemplate {
    pub fn new(words: Vec<String>) -> Result<Self> {
        let mut words = words.into_iter();
        let program = words
            .next()
            .ok_or_else(|| anyhow!("No command given; pass it after `--` or with --command"))?;
        Ok(Self {
            program,
            args: words.collect(),
            timeout: None,
        })
    }

    /// Parse a single shell-quoted command line
    pub fn parse(line: &str) -> Result<Self> {
        let words = shell_words::split(line)
            .with_context(|| format!("Cannot parse command '{}'", line))?;
        Self::new(words)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments for one element; the element is appended when no argument
    /// carries the placeholder
    pub fn render(&self, element: &str) -> Vec<String> {
        if self.args.iter().any(|arg| arg.contains(PLACEHOLDER)) {
            self.args
                .iter()
                .map(|arg| arg.replace(PLACEHOLDER, element))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(element.to_string());
            args
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

fn element_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpret command output: JSON when it parses, the trimmed text otherwise
pub fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Unit function running `template` for the element in the first argument.
///
/// A non-zero exit status raises the trimmed stderr (or the status when
/// stderr is empty) as the unit's failure.
pub fn command_unit(manager: SubprocessManager, template: CommandTemplate) -> UnitFn {
    unit_fn(move |args, _bindings| {
        let element = args
            .first()
            .map(element_text)
            .ok_or_else(|| anyhow!("Unit received no element"))?;

        let mut builder =
            ProcessCommandBuilder::new(template.program()).args(template.render(&element));
        if let Some(timeout) = template.timeout {
            builder = builder.timeout(timeout);
        }
        let command = builder.build();
        let shown = command.display();

        info!("Running: {}", shown);
        let output = manager.run_blocking(command)?;
        if !output.stdout.trim().is_empty() {
            info!("stdout: {}", output.stdout.trim_end());
        }
        if !output.stderr.trim().is_empty() {
            info!("stderr: {}", output.stderr.trim_end());
        }

        if !output.status.success() {
            let stderr = output.stderr.trim();
            if stderr.is_empty() {
                bail!("'{}' failed with status {:?}", shown, output.status);
            }
            bail!("'{}' failed: {}", shown, stderr);
        }
        Ok(parse_output(&output.stdout))
    })
}

/// Elements are the non-empty lines of `text`
pub fn read_elements(text: &str) -> Vec<Value> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Value::String(line.to_string()))
        .collect()
}

async fn load_elements(input: Option<&Path>) -> Result<Vec<Value>> {
    let text = match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Cannot read input file {}", path.display()))?,
        None => tokio::task::spawn_blocking(|| {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer).map(|_| buffer)
        })
        .await?
        .context("Cannot read elements from stdin")?,
    };
    Ok(read_elements(&text))
}

/// Parse an impute value: JSON when possible, a plain string otherwise
pub fn parse_impute(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Load mapping defaults, from an explicit file when given
pub async fn load_config(config_file: Option<&Path>) -> Result<ParmapConfig> {
    let config = match config_file {
        Some(path) => {
            let mut config = config::load_from(path).await?;
            config.merge_env_vars()?;
            config
        }
        None => config::load().await?,
    };
    Ok(config)
}

/// Apply command line overrides on top of the loaded defaults
pub fn apply_overrides(mut config: ParmapConfig, args: &MapArgs) -> ParmapConfig {
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(cpus) = args.cpus {
        config.cpus = Some(cpus);
    }
    if !args.hosts.is_empty() {
        config.socket_hosts = args.hosts.clone();
    }
    if args.load_balancing {
        config.load_balancing = true;
    }
    if args.logging {
        config.logging = true;
    }
    if let Some(dir) = &args.storage_dir {
        config.storage_dir = dir.clone();
    }
    if args.quiet {
        config.show_info = false;
    }
    if let Some(level) = &args.level {
        if !config.registered_levels.contains(level) {
            config.registered_levels.push(level.clone());
        }
    }
    config
}

fn map_options(args: &MapArgs) -> MapOptions {
    let mut options = MapOptions::default()
        .with_simplify(args.simplify)
        .with_use_names(args.use_names);
    if let Some(raw) = &args.impute_error {
        options = options.with_impute_error(ImputeError::constant(parse_impute(raw)));
    }
    if let Some(level) = &args.level {
        options = options.with_level(level.clone());
    }
    options
}

fn command_template(args: &MapArgs) -> Result<CommandTemplate> {
    let template = match &args.command {
        Some(line) => CommandTemplate::parse(line)?,
        None => CommandTemplate::new(args.program.clone())?,
    };
    Ok(template.with_timeout(args.timeout.map(Duration::from_secs)))
}

/// Run the map command and print the result as JSON on stdout
pub async fn run_map_command(args: MapArgs, config_file: Option<&Path>) -> Result<()> {
    let template = command_template(&args)?;
    let config = apply_overrides(load_config(config_file).await?, &args);
    let elements = load_elements(args.input.as_deref()).await?;
    debug!(
        "Mapping '{}' over {} elements",
        template.program(),
        elements.len()
    );

    let session = Session::new();
    session.start(config).await?;

    let fun = command_unit(SubprocessManager::production(), template);
    let outcome = session
        .map(fun, &Inputs::single(elements), &map_options(&args))
        .await;
    session.stop().await?;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::dispatch::{Bindings, Simplify};
    use serde_json::json;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_replaces_placeholder() {
        let template = CommandTemplate::new(words(&["grep", "-c", "{}", "data-{}.txt"])).unwrap();
        assert_eq!(template.render("x"), words(&["-c", "x", "data-x.txt"]));
    }

    #[test]
    fn test_render_appends_without_placeholder() {
        let template = CommandTemplate::parse("wc -c").unwrap();
        assert_eq!(template.program(), "wc");
        assert_eq!(template.render("file.txt"), words(&["-c", "file.txt"]));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandTemplate::new(Vec::new()).is_err());
        assert!(CommandTemplate::parse("").is_err());
    }

    #[test]
    fn test_read_elements_skips_blank_lines() {
        let elements = read_elements("a\n\n  b  \n\n");
        assert_eq!(elements, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_parse_output_and_impute() {
        assert_eq!(parse_output("42\n"), json!(42));
        assert_eq!(parse_output("{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(parse_output(" hello world \n"), json!("hello world"));
        assert_eq!(parse_impute("null"), Value::Null);
        assert_eq!(parse_impute("failed"), json!("failed"));
    }

    #[test]
    fn test_apply_overrides() {
        let args = MapArgs {
            mode: Some(Mode::Socket),
            hosts: words(&["n1", "n2"]),
            level: Some("outer".to_string()),
            quiet: true,
            simplify: Simplify::None,
            ..MapArgs::default()
        };
        let config = apply_overrides(ParmapConfig::default(), &args);

        assert_eq!(config.mode, Mode::Socket);
        assert_eq!(config.socket_hosts, words(&["n1", "n2"]));
        assert_eq!(config.registered_levels, words(&["outer"]));
        assert!(!config.show_info);
        assert_eq!(config.cpus, None);
    }

    #[tokio::test]
    async fn test_command_unit_with_mock_runner() {
        let (manager, mock) = SubprocessManager::mock();
        mock.expect_command("score")
            .with_args(|args| args == ["--item", "b"])
            .returns_stdout("7\n")
            .finish();
        mock.expect_command("score")
            .returns_stderr("no such item")
            .returns_exit_code(3)
            .finish();

        let template = CommandTemplate::parse("score --item {}").unwrap();
        let fun = command_unit(manager, template);
        let bindings = Bindings::default();

        let ok = {
            let fun = fun.clone();
            let bindings = bindings.clone();
            tokio::task::spawn_blocking(move || fun(&[json!("b")], &bindings))
                .await
                .unwrap()
        };
        assert_eq!(ok.unwrap(), json!(7));

        let failed = tokio::task::spawn_blocking(move || fun(&[json!("zz")], &bindings))
            .await
            .unwrap();
        let message = failed.unwrap_err().to_string();
        assert!(message.contains("no such item"), "{message}");
        assert!(message.starts_with("'score"), "{message}");
    }
}
