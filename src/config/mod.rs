use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppMode {
    /// HTTP surface over redis + S3.
    Api,
    /// HTTP surface over in-memory remote backends.
    Offline,
    /// Publish every pending draft once, then exit.
    Sync,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "api" => Ok(Self::Api),
            "offline" => Ok(Self::Offline),
            "sync" => Ok(Self::Sync),
            other => Err(anyhow!("unknown APP_MODE: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: AppMode,
    pub local_db_url: String,
    pub local_db_max_connections: u32,
    pub image_dir: PathBuf,
    pub upload_concurrency: usize,
    pub max_images_per_post: usize,
    pub redis_url: String,
    pub s3_endpoint: Option<String>,
    pub s3_public_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "127.0.0.1:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let app_mode: AppMode = env_or("APP_MODE", "api").parse()?;

        let upload_concurrency: usize = env_or_parse("UPLOAD_CONCURRENCY", "3")?;
        if upload_concurrency == 0 {
            return Err(anyhow!("invalid UPLOAD_CONCURRENCY: must be at least 1"));
        }

        let (s3_endpoint, s3_bucket) = match app_mode {
            AppMode::Offline => (
                std::env::var("S3_ENDPOINT").ok(),
                std::env::var("S3_BUCKET").ok(),
            ),
            AppMode::Api | AppMode::Sync => {
                (Some(env_or_err("S3_ENDPOINT")?), Some(env_or_err("S3_BUCKET")?))
            }
        };

        Ok(Self {
            http_addr,
            app_mode,
            local_db_url: env_or("LOCAL_DB_URL", "sqlite://itshere.db"),
            local_db_max_connections: env_or_parse("LOCAL_DB_MAX_CONNECTIONS", "5")?,
            image_dir: PathBuf::from(env_or("IMAGE_DIR", "./post_images")),
            upload_concurrency,
            max_images_per_post: env_or_parse("MAX_IMAGES_PER_POST", "5")?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1/"),
            s3_endpoint,
            s3_public_endpoint: std::env::var("S3_PUBLIC_ENDPOINT").ok(),
            s3_region: env_or("S3_REGION", "us-east-1"),
            s3_bucket,
            user_id: non_empty_env("USER_ID"),
            user_name: non_empty_env("USER_NAME"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}
