use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `PARKD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub admin_users: Vec<String>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "parkd".into(),
            admin_users: vec!["admin".into()],
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            seed_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            bind: lookup("PARKD_BIND").unwrap_or(defaults.bind),
            port: parsed(lookup("PARKD_PORT")).unwrap_or(defaults.port),
            data_dir: lookup("PARKD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("PARKD_PASSWORD").unwrap_or(defaults.password),
            admin_users: lookup("PARKD_ADMIN_USERS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.admin_users),
            max_connections: parsed(lookup("PARKD_MAX_CONNECTIONS")).unwrap_or(defaults.max_connections),
            compact_threshold: parsed(lookup("PARKD_COMPACT_THRESHOLD")).unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(lookup("PARKD_METRICS_PORT")),
            tls_cert: lookup("PARKD_TLS_CERT"),
            tls_key: lookup("PARKD_TLS_KEY"),
            seed_file: lookup("PARKD_SEED_FILE").map(PathBuf::from),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parkd.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}
