//! `histmine config` - show and edit per-repository settings

use anyhow::{Context, Result};
use chrono::Utc;
use console::style;
use std::path::Path;

use histmine::config::ConfigStore;
use histmine::storage::repo_name;

use super::ConfigAction;

pub fn run(path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let path = ConfigStore::default_path()
                .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Show => show(path),
        ConfigAction::Set { key, value } => set(path, &key, &value),
    }
}

fn show(path: &Path) -> Result<()> {
    let repo_path = canonical(path)?;
    let store = ConfigStore::load()?;
    let name = repo_name(&repo_path);
    let stored = store.get(&name).is_some();
    let config = store.get_or_default(&name, &repo_path, Utc::now().date_naive());

    let status = if store.path().exists() { "" } else { " (not found)" };
    println!("Config file: {}{}", style(store.path().display()).dim(), status);
    println!(
        "Repository: {}{}\n",
        style(&name).cyan(),
        if stored { "" } else { " (defaults)" }
    );
    print!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
    Ok(())
}

fn set(path: &Path, key: &str, value: &str) -> Result<()> {
    let repo_path = canonical(path)?;
    let mut store = ConfigStore::load()?;
    let name = repo_name(&repo_path);
    let mut config = store.get_or_default(&name, &repo_path, Utc::now().date_naive());

    config.set(key, value)?;
    if config.from > config.to {
        anyhow::bail!("'from' ({}) must not be after 'to' ({})", config.from, config.to);
    }
    store.update(&name, config);
    store.save()?;

    println!("{} Set {} = {} for {}", style("[OK]").green(), key, value, name);
    Ok(())
}

fn canonical(path: &Path) -> Result<std::path::PathBuf> {
    path.canonicalize()
        .with_context(|| format!("Path does not exist: {}", path.display()))
}
