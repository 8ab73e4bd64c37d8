//! `weaver config`: Configuration management commands.

use std::path::{Path, PathBuf};

use weaver_config::AppConfig;

fn config_file(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub async fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn init(config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = config_file(config_path);
    if path.exists() {
        println!("Config already exists at: {}", path.display());
        println!("Edit it manually or delete it and re-run `weaver config init`.");
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Created {}", path.display());
    println!("Add an api_key under [llm] (or set OPENAI_API_KEY) to use a real model.");
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", config_file(config_path).display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_under_config_dir() {
        let path = config_file(None);
        assert!(path.ends_with("config.toml"));
        assert!(path.starts_with(AppConfig::config_dir()));
    }

    #[test]
    fn explicit_path_wins() {
        let path = config_file(Some(Path::new("/tmp/weaver.toml")));
        assert_eq!(path, PathBuf::from("/tmp/weaver.toml"));
    }
}
