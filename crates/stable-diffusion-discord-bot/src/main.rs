use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use stable_diffusion_discord_bot::StableDiffusionBotBuilder;
use tracing::metadata::LevelFilter;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variables read for compatibility with older deployments.
const LEGACY_ENV: [&str; 4] = [
    "DISCORD_TOKEN",
    "OPENAI_API_KEY",
    "DISCORD_CHANNEL_ID",
    "STABLEDIFF_URL",
];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration files to load, later files override earlier ones.
    #[arg(short, long, default_value = "config.toml")]
    config: Vec<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Config {
    discord_token: String,
    openai_api_key: String,
    channel_id: u64,
    sd_api_url: String,
    guild_id: Option<u64>,
    group_url: Option<String>,
}

fn legacy_env() -> Env {
    Env::raw().only(&LEGACY_ENV).map(|key| {
        if key.as_str().eq_ignore_ascii_case("DISCORD_CHANNEL_ID") {
            "channel_id".into()
        } else if key.as_str().eq_ignore_ascii_case("STABLEDIFF_URL") {
            "sd_api_url".into()
        } else {
            key.as_str().to_lowercase().into()
        }
    })
}

fn figment(config_paths: &[PathBuf]) -> Figment {
    let figment = config_paths.iter().fold(
        Figment::new().merge(Toml::file("/etc/sdbot/config.toml")),
        |figment, path| figment.merge(Toml::file(path)),
    );
    figment
        .merge(Env::prefixed("SD_DISCORD_"))
        .merge(legacy_env())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LogTracer::init().context("Failed to forward log records")?;

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()
        .context("Failed to parse filter from env")?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .pretty()
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let args = Args::parse();

    let config: Config = figment(&args.config)
        .extract()
        .context("Invalid configuration")?;

    StableDiffusionBotBuilder::new(
        config.discord_token,
        config.openai_api_key,
        config.channel_id,
        config.sd_api_url,
    )
    .guild_id(config.guild_id)
    .group_url(config.group_url)
    .build()
    .await?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn test_toml_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bot.toml",
                r#"
                discord_token = "token"
                openai_api_key = "sk-key"
                channel_id = 1234
                sd_api_url = "http://localhost:7860"
                guild_id = 42
                "#,
            )?;

            let config: Config = figment(&["bot.toml".into()]).extract()?;
            assert_eq!(config.channel_id, 1234);
            assert_eq!(config.guild_id, Some(42));
            assert_eq!(config.group_url, None);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                discord_token = "token"
                openai_api_key = "sk-key"
                channel_id = 1234
                sd_api_url = "http://localhost:7860"
                "#,
            )?;
            jail.set_env("SD_DISCORD_SD_API_URL", "http://gpu-box:7860");

            let config: Config = figment(&["config.toml".into()]).extract()?;
            assert_eq!(config.sd_api_url, "http://gpu-box:7860");
            Ok(())
        });
    }

    #[test]
    fn test_legacy_env_names() {
        Jail::expect_with(|jail| {
            jail.set_env("DISCORD_TOKEN", "token");
            jail.set_env("OPENAI_API_KEY", "sk-key");
            jail.set_env("DISCORD_CHANNEL_ID", "99");
            jail.set_env("STABLEDIFF_URL", "http://127.0.0.1:7860");

            let config: Config = figment(&[]).extract()?;
            assert_eq!(
                config,
                Config {
                    discord_token: "token".to_owned(),
                    openai_api_key: "sk-key".to_owned(),
                    channel_id: 99,
                    sd_api_url: "http://127.0.0.1:7860".to_owned(),
                    guild_id: None,
                    group_url: None,
                }
            );
            Ok(())
        });
    }

    #[test]
    fn test_missing_keys_fail() {
        Jail::expect_with(|_| {
            assert!(figment(&[]).extract::<Config>().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from(["sdbot"]);
        assert_eq!(args.config, vec![PathBuf::from("config.toml")]);

        let args = Args::parse_from(["sdbot", "-c", "a.toml", "--config", "b.toml"]);
        assert_eq!(args.config, vec![PathBuf::from("a.toml"), PathBuf::from("b.toml")]);
    }
}
