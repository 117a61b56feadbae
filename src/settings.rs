//! Process settings from the environment.

use std::env;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Development,
    Test,
    Production,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub mode: Mode,
    pub debug: bool,
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub bind: String,
    pub api_prefix: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let yes = |key: &str| lookup(key).is_some_and(|v| v.eq_ignore_ascii_case("yes"));
        let mode = match lookup("NAS_MODE").as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("development") | Some("dev") => Mode::Development,
            Some("test") => Mode::Test,
            Some("production") | Some("prod") => Mode::Production,
            _ if yes("DEV") => Mode::Development,
            _ if yes("TEST") => Mode::Test,
            _ => Mode::Production,
        };
        let debug = match lookup("NAS_DEBUG").as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("1") | Some("true") | Some("yes") | Some("on") => true,
            Some(_) => false,
            None => mode == Mode::Development,
        };
        Settings {
            mode,
            debug,
            database_url: lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            bind: lookup("NAS_BIND").unwrap_or_else(|| "0.0.0.0:5000".into()),
            api_prefix: lookup("NAS_API_PREFIX").unwrap_or_else(|| "/api".into()),
        }
    }
}
