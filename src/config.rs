use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

/// Runtime configuration, loaded once at startup from the environment.
pub struct Config {
    pub port: u16,
    /// Workbook id of the factory spreadsheet.
    pub sheet_id: String,
    /// API key used for the Sheets REST calls.
    pub google_api_key: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    /// From address on outgoing OTP and recovery mail.
    pub mail_from: String,
    /// Directory the static portal shell is served from.
    pub static_dir: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORT", "3000"),
            sheet_id: require("GOOGLE_SHEETS_ID"),
            google_api_key: require("GOOGLE_API_KEY"),
            smtp_host: try_load("SMTP_HOST", "smtp.gmail.com"),
            smtp_port: try_load("SMTP_PORT", "465"),
            smtp_user: require("SMTP_USER"),
            smtp_password: require("SMTP_PASSWORD"),
            mail_from: try_load("MAIL_FROM", "Sheet Search <no-reply@localhost>"),
            static_dir: try_load("STATIC_DIR", "static"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn require(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("Missing required environment variable: {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_load_falls_back_to_default() {
        let port: u16 = try_load("SHEETSEARCH_TEST_UNSET_PORT", "3000");
        assert_eq!(port, 3000);
    }

    #[test]
    fn try_load_reads_a_set_variable() {
        unsafe { env::set_var("SHEETSEARCH_TEST_SET_PORT", "8123") };
        let port: u16 = try_load("SHEETSEARCH_TEST_SET_PORT", "3000");
        assert_eq!(port, 8123);
    }

    #[test]
    #[should_panic(expected = "Missing required environment variable")]
    fn require_panics_when_absent() {
        require("SHEETSEARCH_TEST_MISSING_VAR");
    }
}
