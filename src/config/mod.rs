//! Typed runtime configuration, loaded once and handed to each component.

use crate::lookup::RetryPolicy;
use crate::table::TableColumns;
use anyhow::{anyhow, bail, Context, Result};
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

mod raw;

const DEFAULT_CONFIG_FILE_NAME: &str = "proxicity.toml";

const ENV_NAME_CONTACT_EMAIL: &str = "PROXICITY_CONTACT_EMAIL";

#[derive(Debug, Clone)]
pub struct Config {
    pub client: Client,
    pub nominatim: Nominatim,
    pub overpass: Overpass,
    pub index: Index,
    pub table: TableColumns,
}

#[derive(Debug, Clone)]
pub struct Client {
    pub user_agent: String,
    pub contact_email: String,
}

impl Client {
    /// `User-Agent` with `{email}` substituted.
    pub fn user_agent(&self) -> String {
        self.user_agent.replace("{email}", &self.contact_email)
    }
}

#[derive(Debug, Clone)]
pub struct Nominatim {
    pub url: String,
    pub country: String,
    pub cache_file: PathBuf,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Overpass {
    pub endpoints: Vec<String>,
    pub country_code: String,
    pub cache_file: PathBuf,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Index {
    pub cache_dir: PathBuf,
    pub rebuild_stale: bool,
}

impl Config {
    /// Load `file_path`, or the first of `./proxicity.toml` and
    /// `<config dir>/proxicity/proxicity.toml` that exists, or the defaults.
    pub fn try_load_from_file_or_default<P: AsRef<Path>>(file_path: Option<P>) -> Result<Self> {
        let raw_config = match file_path {
            Some(path) => {
                let path = path.as_ref();
                let text = fs::read_to_string(path)
                    .with_context(|| format!("cannot read configuration {}", path.display()))?;
                Self::parse_raw(&text, path)?
            }
            None => match Self::discover()? {
                Some((path, text)) => {
                    log::info!("Loading configuration from {}", path.display());
                    Self::parse_raw(&text, &path)?
                }
                None => {
                    log::info!("{DEFAULT_CONFIG_FILE_NAME} not found => load default configuration.");
                    raw::Config::default()
                }
            },
        };
        let mut cfg = Self::try_from(raw_config)?;
        if let Ok(email) = env::var(ENV_NAME_CONTACT_EMAIL) {
            cfg.client.contact_email = email;
        }
        Ok(cfg)
    }

    /// Parse a TOML document; absent sections take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::try_from(Self::parse_raw(text, Path::new("<inline>"))?)
    }

    fn parse_raw(text: &str, origin: &Path) -> Result<raw::Config> {
        toml::from_str(text).with_context(|| format!("invalid configuration in {}", origin.display()))
    }

    fn discover() -> Result<Option<(PathBuf, String)>> {
        let candidates = std::iter::once(PathBuf::from(DEFAULT_CONFIG_FILE_NAME)).chain(
            dirs::config_dir().map(|d| d.join("proxicity").join(DEFAULT_CONFIG_FILE_NAME)),
        );
        for path in candidates {
            match fs::read_to_string(&path) {
                Ok(text) => return Ok(Some((path, text))),
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(anyhow!("cannot read {}: {}", path.display(), err)),
            }
        }
        Ok(None)
    }
}

fn retry_policy(section: &str, request_delay: f64, max_retries: u32, backoff_factor: f64) -> Result<RetryPolicy> {
    if !request_delay.is_finite() || request_delay < 0.0 {
        bail!("{section}.request-delay must be a non-negative number of seconds");
    }
    if max_retries == 0 {
        bail!("{section}.max-retries must be at least 1");
    }
    if !backoff_factor.is_finite() || backoff_factor < 1.0 {
        bail!("{section}.backoff-factor must be >= 1.0");
    }
    Ok(RetryPolicy {
        request_delay: Duration::from_secs_f64(request_delay),
        max_retries,
        backoff_factor,
    })
}

fn require_url(key: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow!("{key} must be an http(s) URL, got '{url}'"))
    }
}

impl TryFrom<raw::Config> for Config {
    type Error = anyhow::Error;
    fn try_from(from: raw::Config) -> Result<Self> {
        let raw::Config {
            client,
            nominatim,
            overpass,
            index,
            table,
        } = from;

        let raw::Client {
            user_agent,
            contact_email,
        } = client.unwrap_or_default();
        if user_agent.trim().is_empty() {
            bail!("client.user-agent must not be empty");
        }

        let raw::Nominatim {
            url,
            country,
            cache_file,
            request_delay,
            max_retries,
            backoff_factor,
            timeout,
        } = nominatim.unwrap_or_default();
        require_url("nominatim.url", &url)?;
        let nominatim = Nominatim {
            url,
            country,
            cache_file,
            retry: retry_policy("nominatim", request_delay, max_retries, backoff_factor)?,
            timeout: Duration::from_secs(timeout),
        };

        let raw::Overpass {
            endpoints,
            country_code,
            cache_file,
            request_delay,
            max_retries,
            backoff_factor,
            timeout,
        } = overpass.unwrap_or_default();
        if endpoints.is_empty() {
            bail!("overpass.endpoints must name at least one endpoint");
        }
        for endpoint in &endpoints {
            require_url("overpass.endpoints", endpoint)?;
        }
        let overpass = Overpass {
            endpoints,
            country_code,
            cache_file,
            retry: retry_policy("overpass", request_delay, max_retries, backoff_factor)?,
            timeout: Duration::from_secs(timeout),
        };

        let raw::Index {
            cache_dir,
            rebuild_stale,
        } = index.unwrap_or_default();

        let raw::Table {
            latitude_column,
            longitude_column,
            city_column,
            region_column,
        } = table.unwrap_or_default();

        Ok(Self {
            client: Client {
                user_agent,
                contact_email,
            },
            nominatim,
            overpass,
            index: Index {
                cache_dir,
                rebuild_stale,
            },
            table: TableColumns {
                latitude: latitude_column,
                longitude: longitude_column,
                city: city_column,
                region: region_column,
            },
        })
    }
}
