use crate::error::{AppError, AppResult};
use crate::gateway::GatewayConfig;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub typing_ttl_secs: u64,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv().ok();

        Ok(Self {
            port: parse_or("PORT", 8080)?,
            database_url: require("DATABASE_URL")?,
            jwt_secret: require("JWT_SECRET")?,
            typing_ttl_secs: parse_or("TYPING_TTL_SECS", 10)?,
            max_body_bytes: parse_or("MAX_MESSAGE_BYTES", 4096)?,
        })
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            typing_ttl: Duration::from_secs(self.typing_ttl_secs),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

fn require(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Config(format!("{name} is not set")))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| AppError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
