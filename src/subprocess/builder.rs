use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::error::ProcessError;
use crate::subprocess::ProcessCommand;

/// Fluent construction of a [`ProcessCommand`]
#[derive(Debug, Clone)]
pub struct ProcessCommandBuilder {
    command: ProcessCommand,
}

impl ProcessCommandBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            command: ProcessCommand {
                program: program.to_string(),
                args: Vec::new(),
                env: HashMap::new(),
                working_dir: None,
                timeout: None,
                stdin: None,
            },
        }
    }

    /// Split a shell-style command line into program and arguments
    pub fn from_command_line(line: &str) -> Result<Self, ProcessError> {
        let words = shell_words::split(line).map_err(|e| {
            ProcessError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Cannot parse command '{}': {}", line, e),
            ))
        })?;
        let mut words = words.into_iter();
        let program = words
            .next()
            .ok_or_else(|| ProcessError::CommandNotFound(line.to_string()))?;
        Ok(Self::new(&program).args(words))
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.command.args.push(arg.to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.command
            .args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.command.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    pub fn stdin(mut self, input: String) -> Self {
        self.command.stdin = Some(input);
        self
    }

    pub fn build(self) -> ProcessCommand {
        self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_parts() {
        let command = ProcessCommandBuilder::new("score")
            .arg("--input")
            .args(["a.csv", "b.csv"])
            .env("MODE", "fast")
            .timeout(Duration::from_secs(2))
            .build();

        assert_eq!(command.program, "score");
        assert_eq!(command.args, vec!["--input", "a.csv", "b.csv"]);
        assert_eq!(command.env["MODE"], "fast");
        assert_eq!(command.timeout, Some(Duration::from_secs(2)));
        assert_eq!(command.display(), "score --input a.csv b.csv");
    }

    #[test]
    fn test_from_command_line_honours_quotes() {
        let command = ProcessCommandBuilder::from_command_line("fit --name 'model a' {}")
            .unwrap()
            .build();
        assert_eq!(command.program, "fit");
        assert_eq!(command.args, vec!["--name", "model a", "{}"]);
    }

    #[test]
    fn test_from_empty_command_line() {
        assert!(ProcessCommandBuilder::from_command_line("   ").is_err());
        assert!(ProcessCommandBuilder::from_command_line("echo 'open").is_err());
    }
}
