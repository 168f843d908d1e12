use std::path::Path;

use tracing::{info, warn};

const COMMON_ENV_FILE: &str = "config/common.env";
const SECRETS_ENV_FILE: &str = ".secrets.env";

/// Layered env loading: common settings, then the profile file, then local
/// secrets. Later files override earlier ones.
pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let profile = dotenvy::var("TRACKER_PROFILE").unwrap_or_else(|_| "development".to_string());
    let profile_file = match profile.as_str() {
        "production" => "config/prod.env",
        _ => "config/dev.env",
    };

    for env_file in [COMMON_ENV_FILE, profile_file, SECRETS_ENV_FILE] {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[cfg(test)]
pub fn load_test_environment() -> Result<(), Box<dyn std::error::Error>> {
    for env_file in [COMMON_ENV_FILE, SECRETS_ENV_FILE] {
        load_env_file(env_file)?;
    }

    Ok(())
}
