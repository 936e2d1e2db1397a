use envconfig::Envconfig;
use std::time::Duration;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,
    #[envconfig(from = "PORT", default = "5000")]
    pub port: u16,
    #[envconfig(from = "APP_ENV", default = "development")]
    pub environment: String,
    #[envconfig(from = "API_VERSION", default = "v1")]
    pub api_version: String,
    #[envconfig(from = "JWT_SECRET")]
    pub jwt_secret: String,
    /// Comma separated, or `*` for any origin.
    #[envconfig(
        from = "CORS_ORIGINS",
        default = "http://localhost:3000,http://localhost:5173"
    )]
    pub cors_origins: String,
    /// Comma separated host suffixes, e.g. preview deployment domains.
    #[envconfig(from = "CORS_ORIGIN_SUFFIXES", default = "")]
    pub cors_origin_suffixes: String,
    #[envconfig(from = "RATE_LIMIT_MAX", default = "100")]
    pub rate_limit_max: u32,
    #[envconfig(from = "RATE_LIMIT_WINDOW_SECS", default = "900")]
    pub rate_limit_window_secs: u64,
    #[envconfig(from = "TRUST_PROXY", default = "false")]
    pub trust_proxy: bool,
    #[envconfig(from = "DB_CONNECT_TIMEOUT_SECS", default = "10")]
    pub db_connect_timeout_secs: u64,
    #[envconfig(from = "DB_POOL_SIZE", default = "10")]
    pub db_pool_size: usize,
    #[envconfig(from = "UPLOADS_DIR", default = "uploads")]
    pub uploads_dir: String,
    #[envconfig(from = "LOG_FORMAT", default = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Rejects settings that parse but cannot run.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.rate_limit_max > 0,
            "RATE_LIMIT_MAX must be greater than zero"
        );
        anyhow::ensure!(
            self.rate_limit_window_secs > 0,
            "RATE_LIMIT_WINDOW_SECS must be greater than zero"
        );
        anyhow::ensure!(
            self.db_connect_timeout_secs > 0,
            "DB_CONNECT_TIMEOUT_SECS must be greater than zero"
        );
        anyhow::ensure!(self.db_pool_size > 0, "DB_POOL_SIZE must be greater than zero");
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn cors_origins(&self) -> Vec<String> {
        split_list(&self.cors_origins)
    }

    pub fn cors_origin_suffixes(&self) -> Vec<String> {
        split_list(&self.cors_origin_suffixes)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_connect_timeout_secs)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let config = Config::init_from_hashmap(&vars(&[
            ("DATABASE_URL", "postgres://localhost/comet"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.api_version, "v1");
        assert!(!config.is_production());
        assert_eq!(
            config.cors_origins(),
            vec!["http://localhost:3000", "http://localhost:5173"]
        );
        assert!(config.cors_origin_suffixes().is_empty());
        assert_eq!(config.rate_limit_window(), Duration::from_secs(900));
    }

    #[test]
    fn lists_are_trimmed() {
        let config = Config::init_from_hashmap(&vars(&[
            ("DATABASE_URL", "postgres://localhost/comet"),
            ("JWT_SECRET", "secret"),
            ("APP_ENV", "Production"),
            ("CORS_ORIGINS", " https://comet.dev , ,https://admin.comet.dev"),
        ]))
        .unwrap();

        assert!(config.is_production());
        assert_eq!(
            config.cors_origins(),
            vec!["https://comet.dev", "https://admin.comet.dev"]
        );
    }

    #[test]
    fn zero_rate_limits_are_rejected() {
        let base = [
            ("DATABASE_URL", "postgres://localhost/comet"),
            ("JWT_SECRET", "secret"),
        ];
        let config = Config::init_from_hashmap(&vars(&base)).unwrap();
        assert!(config.validate().is_ok());

        for (key, value) in [
            ("RATE_LIMIT_WINDOW_SECS", "0"),
            ("RATE_LIMIT_MAX", "0"),
            ("DB_CONNECT_TIMEOUT_SECS", "0"),
            ("DB_POOL_SIZE", "0"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push((key, value));
            let config = Config::init_from_hashmap(&vars(&pairs)).unwrap();

            let err = config.validate().unwrap_err();
            assert!(err.to_string().starts_with(key), "{err}");
        }
    }

    #[test]
    fn missing_secret_is_an_error() {
        let result = Config::init_from_hashmap(&vars(&[(
            "DATABASE_URL",
            "postgres://localhost/comet",
        )]));
        assert!(result.is_err());
    }
}
