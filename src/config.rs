use anyhow::{anyhow, Context};
use std::{net::SocketAddr, str::FromStr, time::Duration};

use crate::channel::DisconnectPolicy;

/// Runtime settings, read from the process environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub catalog_url: String,
    pub catalog_limit: usize,
    pub rotation_interval: Duration,
    pub broadcast_capacity: usize,
    pub disconnect_policy: DisconnectPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let catalog_url = get("CATALOG_URL")
            .ok_or_else(|| anyhow!("CATALOG_URL must be set"))?
            .trim_end_matches('/')
            .to_string();

        let rotation_secs: u64 = parse_or(get("ROTATION_INTERVAL_SECS"), "ROTATION_INTERVAL_SECS", 5)?;
        if rotation_secs == 0 {
            return Err(anyhow!("ROTATION_INTERVAL_SECS must be greater than zero"));
        }

        let broadcast_capacity: usize = parse_or(get("BROADCAST_CAPACITY"), "BROADCAST_CAPACITY", 64)?;
        if broadcast_capacity == 0 {
            return Err(anyhow!("BROADCAST_CAPACITY must be greater than zero"));
        }

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), "PORT", 3000)?,
            catalog_url,
            catalog_limit: parse_or(get("CATALOG_LIMIT"), "CATALOG_LIMIT", 1000)?,
            rotation_interval: Duration::from_secs(rotation_secs),
            broadcast_capacity,
            disconnect_policy: parse_or(
                get("RADIO_DISCONNECT_POLICY"),
                "RADIO_DISCONNECT_POLICY",
                DisconnectPolicy::default(),
            )?,
        })
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} has invalid value {:?}: {}", key, v, e)),
        None => Ok(default),
    }
}
