//! Daemon settings and their TOML file form.
//!
//! ```toml
//! [daemon]
//! uid = "nobody"          # name or number, empty = unchanged
//! gid = 65534
//! pidfile = "run/tickd.pid"
//! logfile = "log/tickd.log"
//! logmaxmb = 10           # 0 = never rotate
//! logbackups = 5
//! loglevel = "info"       # or 10/20/30/40/50
//! ```
//!
//! Relative paths are taken relative to the directory holding the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use crate::error::{DaemonError, DaemonResult};
use crate::logging::{parse_level, LogOptions};
use crate::privilege::resolve_identity;
use crate::types::{Group, ProcessIdentity, User};

/// Table read by [`DaemonConfig::load`] unless told otherwise.
pub const DEFAULT_SECTION: &str = "daemon";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub(crate) pid_file: Option<PathBuf>,
    pub(crate) log: LogOptions,
    pub(crate) identity: ProcessIdentity,
    pub(crate) daemonize: bool,
    pub(crate) settings: toml::Table,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonConfig {
    /// Console logging at info, no pid file, no identity change, daemonizing.
    pub fn new() -> Self {
        DaemonConfig {
            pid_file: None,
            log: LogOptions::default(),
            identity: ProcessIdentity::default(),
            daemonize: true,
            settings: toml::Table::new(),
        }
    }

    /// Reads `section` of the TOML file at `path` and resolves uid/gid.
    pub fn load(path: &Path, section: &str) -> DaemonResult<Self> {
        if !path.is_file() {
            return Err(DaemonError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let text = fs::read_to_string(path)?;
        let base = fs::canonicalize(path)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::parse(&text, section, &base)
            .map_err(|e| match e {
                DaemonError::Config(msg) => {
                    DaemonError::Config(format!("{}: {msg}", path.display()))
                }
                other => other,
            })
    }

    /// Parses configuration text; relative paths are joined onto `base`.
    pub fn parse(text: &str, section: &str, base: &Path) -> DaemonResult<Self> {
        let settings: toml::Table =
            toml::from_str(text).map_err(|e| DaemonError::Config(e.to_string()))?;

        let raw: RawSection = match settings.get(section) {
            Some(value) => RawSection::deserialize(value.clone())
                .map_err(|e| DaemonError::Config(format!("[{section}]: {e}")))?,
            None => {
                return Err(DaemonError::Config(format!("missing [{section}] section")));
            }
        };

        let level = raw.loglevel.to_filter().ok_or_else(|| {
            DaemonError::Config(format!("unknown loglevel: {}", raw.loglevel.as_text()))
        })?;

        Ok(DaemonConfig {
            pid_file: resolve_path(base, &raw.pidfile),
            log: LogOptions {
                file: resolve_path(base, &raw.logfile),
                max_bytes: raw.logmaxmb.saturating_mul(BYTES_PER_MB),
                backups: raw.logbackups,
                level,
            },
            identity: resolve_identity(&raw.uid, &raw.gid)?,
            daemonize: true,
            settings,
        })
    }

    // --- Getters ---

    pub fn pid_file(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }

    pub fn log_options(&self) -> &LogOptions {
        &self.log
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn daemonize_enabled(&self) -> bool {
        self.daemonize
    }

    /// The whole parsed file, for tasks that keep their own tables in it.
    pub fn settings(&self) -> &toml::Table {
        &self.settings
    }

    // --- Builder Methods ---

    pub fn pid_file_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log.file = Some(path.into());
        self
    }

    pub fn log_rotation(mut self, max_bytes: u64, backups: u32) -> Self {
        self.log.max_bytes = max_bytes;
        self.log.backups = backups;
        self
    }

    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.log.level = level;
        self
    }

    pub fn identity_of(mut self, identity: ProcessIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Resolves and sets the identity from user/group settings.
    pub fn run_as(self, user: &User, group: &Group) -> DaemonResult<Self> {
        let identity = resolve_identity(user, group)?;
        Ok(self.identity_of(identity))
    }

    /// `false` keeps the process attached to its terminal.
    pub fn daemonize(mut self, daemonize: bool) -> Self {
        self.daemonize = daemonize;
        self
    }
}

fn resolve_path(base: &Path, value: &str) -> Option<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(base.join(value))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSection {
    uid: User,
    gid: Group,
    pidfile: String,
    logfile: String,
    logmaxmb: u64,
    logbackups: u32,
    loglevel: RawLevel,
}

impl Default for RawSection {
    fn default() -> Self {
        RawSection {
            uid: User::default(),
            gid: Group::default(),
            pidfile: String::new(),
            logfile: String::new(),
            logmaxmb: 0,
            logbackups: 0,
            loglevel: RawLevel::Name("info".into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Numeric(i64),
    Name(String),
}

impl RawLevel {
    fn as_text(&self) -> String {
        match self {
            RawLevel::Numeric(n) => n.to_string(),
            RawLevel::Name(name) => name.clone(),
        }
    }

    fn to_filter(&self) -> Option<LevelFilter> {
        parse_level(&self.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_section() {
        let text = r#"
            [daemon]
            uid = 4242
            gid = "root"
            pidfile = "run/d.pid"
            logfile = "/var/log/d.log"
            logmaxmb = 2
            logbackups = 3
            loglevel = 30

            [task]
            interval = 5
        "#;
        let config = DaemonConfig::parse(text, DEFAULT_SECTION, Path::new("/etc/d")).unwrap();

        assert_eq!(config.pid_file(), Some(Path::new("/etc/d/run/d.pid")));
        assert_eq!(config.log.file.as_deref(), Some(Path::new("/var/log/d.log")));
        assert_eq!(config.log.max_bytes, 2 * 1024 * 1024);
        assert_eq!(config.log.backups, 3);
        assert_eq!(config.log.level, LevelFilter::WARN);
        assert_eq!(config.identity, ProcessIdentity::new(Some(4242), Some(0)));
        assert!(config.daemonize_enabled());
        assert_eq!(
            config.settings()["task"]["interval"].as_integer(),
            Some(5)
        );
    }

    #[test]
    fn empty_section_means_defaults() {
        let config = DaemonConfig::parse("[daemon]\n", DEFAULT_SECTION, Path::new("/")).unwrap();
        assert_eq!(config.pid_file(), None);
        assert_eq!(config.log, LogOptions::default());
        assert!(config.identity.is_unchanged());
    }

    #[test]
    fn empty_strings_disable_paths() {
        let text = "[daemon]\npidfile = \"\"\nlogfile = \"  \"\nuid = \"\"\n";
        let config = DaemonConfig::parse(text, DEFAULT_SECTION, Path::new("/")).unwrap();
        assert_eq!(config.pid_file(), None);
        assert_eq!(config.log.file, None);
        assert_eq!(config.identity.uid, None);
    }

    #[test]
    fn missing_section_is_an_error() {
        let err = DaemonConfig::parse("[other]\n", DEFAULT_SECTION, Path::new("/")).unwrap_err();
        assert_eq!(err.to_string(), "missing [daemon] section");
    }

    #[test]
    fn unknown_level_is_an_error() {
        let err = DaemonConfig::parse("[daemon]\nloglevel = \"chatty\"\n", DEFAULT_SECTION, Path::new("/"))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown loglevel: chatty");
    }

    #[test]
    fn unknown_user_fails_before_anything_else() {
        let err = DaemonConfig::parse("[daemon]\nuid = \"no-such-user-dk\"\n", DEFAULT_SECTION, Path::new("/"))
            .unwrap_err();
        assert!(matches!(err, DaemonError::UnknownUser(_)));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = DaemonConfig::load(&path, DEFAULT_SECTION).unwrap_err();
        assert!(err.to_string().starts_with("configuration file not found: "));
    }

    #[test]
    fn load_resolves_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.toml");
        fs::write(&path, "[daemon]\npidfile = \"d.pid\"\n").unwrap();

        let config = DaemonConfig::load(&path, DEFAULT_SECTION).unwrap();
        let expected = fs::canonicalize(dir.path()).unwrap().join("d.pid");
        assert_eq!(config.pid_file(), Some(expected.as_path()));
    }
}
