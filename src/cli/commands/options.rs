//! `parmap options`: show the mapping defaults in effect

use crate::cli::commands::map::load_config;
use anyhow::Result;
use std::path::Path;

/// Render the effective configuration as TOML or JSON
pub async fn render_options(config_file: Option<&Path>, json: bool) -> Result<String> {
    let config = load_config(config_file).await?;
    let rendered = if json {
        serde_json::to_string_pretty(&config)?
    } else {
        toml::to_string_pretty(&config)?
    };
    Ok(rendered)
}

pub async fn run_options_command(config_file: Option<&Path>, json: bool) -> Result<()> {
    println!("{}", render_options(config_file, json).await?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_render_options_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parmap.toml");
        fs::write(&path, "mode = \"multicore\"\ncpus = 3\npoll_interval = \"1s\"\n").unwrap();

        let toml_text = render_options(Some(&path), false).await.unwrap();
        assert!(toml_text.contains("mode = \"multicore\""));
        assert!(toml_text.contains("cpus = 3"));

        let json_text = render_options(Some(&path), true).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json_text).unwrap();
        assert_eq!(value["mode"], "multicore");
        assert_eq!(value["poll_interval"], "1s");
    }

    #[tokio::test]
    async fn test_missing_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(render_options(Some(&missing), false).await.is_err());
    }
}
