use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{Context, bail};
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

pub struct Config {
    pub admin_email: String,
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(|key| env::var(key).ok())
    }

    fn load(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let admin_email = match var("TANDEM_ADMIN_EMAIL").map(|v| v.trim().to_string()) {
            Some(email) if !email.is_empty() => email,
            _ => bail!("TANDEM_ADMIN_EMAIL must name the admin account"),
        };

        let jwt_secret = var("TANDEM_JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.into());
        if jwt_secret == DEV_JWT_SECRET {
            warn!("TANDEM_JWT_SECRET is unset or the placeholder; tokens are forgeable");
        }

        Ok(Self {
            admin_email,
            jwt_secret,
            db_path: PathBuf::from(or_default(&var, "TANDEM_DB_PATH", "tandem.db")),
            host: or_default(&var, "TANDEM_HOST", "0.0.0.0"),
            port: parse(&var, "TANDEM_PORT", "3000")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn or_default(var: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = or_default(var, key, default);
    raw.parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value '{raw}'"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::load(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_fill_everything_but_the_admin() {
        let config = load(&[("TANDEM_ADMIN_EMAIL", "boss@example.com")]).unwrap();
        assert_eq!(config.admin_email, "boss@example.com");
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.db_path, PathBuf::from("tandem.db"));
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
    }

    #[test]
    fn admin_email_is_required() {
        assert!(load(&[]).is_err());
        assert!(load(&[("TANDEM_ADMIN_EMAIL", "  ")]).is_err());
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = load(&[("TANDEM_ADMIN_EMAIL", "boss@example.com"), ("TANDEM_PORT", "http")])
            .err()
            .unwrap();
        assert!(err.to_string().contains("TANDEM_PORT"));
    }
}
