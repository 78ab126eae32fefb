use clap::{Parser, Subcommand};

/// agentkernel — an interactive AI-agent runtime.
#[derive(Debug, Parser)]
#[command(name = "agentkernel", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Print version information.
    Version,
}

/// Load configuration from the path named by `AGENTKERNEL_CONFIG` (or
/// `config.toml` by default), falling back to built-in defaults when the
/// file doesn't exist. `serve` is the only caller today but this is kept
/// standalone so a future subcommand can reuse it without duplicating the
/// env-var/default dance.
pub fn load_config() -> anyhow::Result<(ak_domain::config::Config, String)> {
    let config_path = std::env::var("AGENTKERNEL_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        ak_domain::config::Config::default()
    };

    apply_env_overrides(&mut config);
    Ok((config, config_path))
}

/// Secrets never belong in a checked-in `config.toml`; these env vars let
/// an operator override the auth section at deploy time without touching
/// the file.
fn apply_env_overrides(config: &mut ak_domain::config::Config) {
    if let Ok(secret) = std::env::var("AGENTKERNEL_JWT_SECRET") {
        config.auth.jwt_secret = Some(secret);
    }
    if let Ok(key) = std::env::var("AGENTKERNEL_TOKEN_KEY") {
        config.auth.token_encryption_key = Some(key);
    }
}
