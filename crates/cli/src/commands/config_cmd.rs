//! `opsloop config`: configuration management commands.

use std::path::Path;

use opsloop_config::AppConfig;

pub fn show(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut shown = config.clone();
    if shown.inference.api_key.is_some() {
        shown.inference.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

pub fn init(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Reaching this point means the file parsed and validated; report warnings.
pub fn validate(config: &AppConfig, path: &Path) {
    println!("Config OK: {}", path.display());

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("no API key set (OPSLOOP_API_KEY); fine for local endpoints".to_string());
    }
    if config.knowledge.enabled && config.knowledge.directory.is_none() {
        warnings.push("knowledge is enabled but no directory is configured".to_string());
    }
    if config.reasoning.deadline_secs > config.supervisor.max_deadline_secs {
        warnings.push(format!(
            "reasoning.deadline_secs ({}) exceeds supervisor.max_deadline_secs ({}) and will be clamped",
            config.reasoning.deadline_secs, config.supervisor.max_deadline_secs
        ));
    }
    if config.reasoning.max_steps > config.supervisor.max_steps_cap {
        warnings.push(format!(
            "reasoning.max_steps ({}) exceeds supervisor.max_steps_cap ({}) and will be clamped",
            config.reasoning.max_steps, config.supervisor.max_steps_cap
        ));
    }
    for warning in &warnings {
        println!("   warning: {warning}");
    }

    println!("   Endpoint:  {} ({})", config.inference.base_url, config.inference.model);
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Clusters:  {}", config.tools.clusters.len());
}

pub fn path(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        init(&path, false).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, AppConfig::default().gateway.port);
        assert!(init(&path, false).is_err());
        assert!(init(&path, true).is_ok());
    }
}
