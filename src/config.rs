use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};
use tracing::info;
use url::Url;

const DEFAULT_ENDPOINT: &str = "https://www.anbima.com.br/informacoes/est-termo/CZ-down.asp";
const DEFAULT_REFERER: &str = "https://www.anbima.com.br/informacoes/est-termo/CZ.asp";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Path to an optional YAML file overriding any of the defaults below.
pub const CONFIG_ENV: &str = "ETTJ_CONFIG";
pub const DESTINATION_ENV: &str = "ETTJ_DESTINATION";
pub const SHEET_ENV: &str = "ETTJ_SHEET";

/// Everything one sync run needs to know.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: Url,
    pub referer: String,
    pub user_agent: String,
    /// `Idioma` form field.
    pub language: String,
    /// `saida` form field.
    pub output_format: String,
    pub timeout_secs: u64,
    /// Number of most recent calendar days checked per run, today included.
    pub window_days: u32,
    pub destination: PathBuf,
    pub sheet_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint should parse"),
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            language: "PT".to_string(),
            output_format: "xls".to_string(),
            timeout_secs: 30,
            window_days: 7,
            destination: PathBuf::from("ettj_anbima.xlsx"),
            sheet_name: "ETTJ".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then the YAML file named by `ETTJ_CONFIG`, then the
    /// `ETTJ_DESTINATION` / `ETTJ_SHEET` overrides.
    pub fn load() -> Result<Self> {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                info!(path = %path.display(), "loading config");
                Self::from_yaml_file(&path)?
            }
            None => Self::default(),
        };
        if let Some(dest) = env::var_os(DESTINATION_ENV) {
            config.destination = PathBuf::from(dest);
        }
        if let Ok(sheet) = env::var(SHEET_ENV) {
            config.sheet_name = sheet;
        }
        Ok(config)
    }

    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_published_endpoint() {
        let c = Config::default();
        assert_eq!(c.endpoint.as_str(), DEFAULT_ENDPOINT);
        assert_eq!(c.window_days, 7);
        assert_eq!(c.timeout(), Duration::from_secs(30));
        assert_eq!(c.sheet_name, "ETTJ");
    }

    #[test]
    fn yaml_overrides_only_given_fields() {
        let c = Config::from_yaml(
            "endpoint: http://127.0.0.1:9000/curve\nwindow_days: 3\ndestination: /tmp/x.xlsx\n",
        )
        .unwrap();
        assert_eq!(c.endpoint.as_str(), "http://127.0.0.1:9000/curve");
        assert_eq!(c.window_days, 3);
        assert_eq!(c.destination, PathBuf::from("/tmp/x.xlsx"));
        assert_eq!(c.language, "PT");
        assert_eq!(c.output_format, "xls");
    }

    #[test]
    fn yaml_file_errors_carry_the_path() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "window_days: [not a number]").unwrap();
        let err = Config::from_yaml_file(f.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(&f.path().display().to_string()));
    }
}
