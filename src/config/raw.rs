use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = include_str!("proxicity.default.toml");

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub client: Option<Client>,
    pub nominatim: Option<Nominatim>,
    pub overpass: Option<Overpass>,
    pub index: Option<Index>,
    pub table: Option<Table>,
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_FILE).expect("Default configuration")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Client {
    pub user_agent: String,
    pub contact_email: String,
}

impl Default for Client {
    fn default() -> Self {
        Config::default().client.expect("Client configuration")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Nominatim {
    pub url: String,
    pub country: String,
    pub cache_file: PathBuf,
    pub request_delay: f64,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub timeout: u64,
}

impl Default for Nominatim {
    fn default() -> Self {
        Config::default().nominatim.expect("Nominatim configuration")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Overpass {
    pub endpoints: Vec<String>,
    pub country_code: String,
    pub cache_file: PathBuf,
    pub request_delay: f64,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub timeout: u64,
}

impl Default for Overpass {
    fn default() -> Self {
        Config::default().overpass.expect("Overpass configuration")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Index {
    pub cache_dir: PathBuf,
    pub rebuild_stale: bool,
}

impl Default for Index {
    fn default() -> Self {
        Config::default().index.expect("Index configuration")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Table {
    pub latitude_column: String,
    pub longitude_column: String,
    pub city_column: String,
    pub region_column: String,
}

impl Default for Table {
    fn default() -> Self {
        Config::default().table.expect("Table configuration")
    }
}
