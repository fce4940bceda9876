use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::db::Database;
use crate::parsing::amount::ExchangeRate;

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const DEFAULT_USD_CRC_RATE: &str = "505.00";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_MAX_PAGES: usize = 10;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

/// Process-wide settings, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub cron_secret: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub token_url: String,
    pub gmail_api_base: String,
    pub usd_to_crc: ExchangeRate,
    pub page_size: u32,
    pub max_pages: usize,
    pub listen_addr: SocketAddr,
}

impl Settings {
    /// An explicit database path wins over `VOUCH_DB_PATH`; the home-directory
    /// default is only resolved when neither is given.
    pub fn from_env(db_path: Option<PathBuf>) -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), db_path)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, db_path: Option<PathBuf>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let db_path = match db_path.or_else(|| var("VOUCH_DB_PATH").map(PathBuf::from)) {
            Some(path) => path,
            None => Database::default_db_path().context("resolve default vouch database path")?,
        };

        let usd_to_crc = var("VOUCH_USD_CRC_RATE")
            .unwrap_or_else(|| DEFAULT_USD_CRC_RATE.to_string())
            .parse::<ExchangeRate>()
            .map_err(|e| anyhow!(e))
            .context("VOUCH_USD_CRC_RATE must be a positive decimal with at most 4 fraction digits")?;

        let page_size = var("VOUCH_PAGE_SIZE")
            .map(|raw| raw.parse::<u32>())
            .transpose()
            .context("VOUCH_PAGE_SIZE must be a positive integer")?
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, 500);

        let max_pages = var("VOUCH_MAX_PAGES")
            .map(|raw| raw.parse::<usize>())
            .transpose()
            .context("VOUCH_MAX_PAGES must be a positive integer")?
            .unwrap_or(DEFAULT_MAX_PAGES)
            .max(1);

        let listen_addr = var("VOUCH_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("VOUCH_LISTEN_ADDR must be a socket address such as 127.0.0.1:8787")?;

        Ok(Self {
            db_path,
            cron_secret: var("VOUCH_CRON_SECRET"),
            google_client_id: var("VOUCH_GOOGLE_CLIENT_ID"),
            google_client_secret: var("VOUCH_GOOGLE_CLIENT_SECRET"),
            token_url: var("VOUCH_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            gmail_api_base: var("VOUCH_GMAIL_API_BASE")
                .unwrap_or_else(|| DEFAULT_GMAIL_API_BASE.to_string()),
            usd_to_crc,
            page_size,
            max_pages,
            listen_addr,
        })
    }
}
