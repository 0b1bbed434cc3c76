//! Datastore configuration.

use crate::error::{Error, Result};

/// Schema profile: selects which sidecar tables and indexed columns a
/// datastore carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Basic,
    Resources,
    Directory,
    Events,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Basic => "BASIC",
            Profile::Resources => "RESOURCES",
            Profile::Directory => "DIRECTORY",
            Profile::Events => "EVENTS",
        }
    }

    pub(crate) fn script_name(&self) -> &'static str {
        match self {
            Profile::Basic => "profile_basic.sql",
            Profile::Resources => "profile_resources.sql",
            Profile::Directory => "profile_directory.sql",
            Profile::Events => "profile_events.sql",
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BASIC" => Ok(Profile::Basic),
            "RESOURCES" => Ok(Profile::Resources),
            "DIRECTORY" => Ok(Profile::Directory),
            "EVENTS" => Ok(Profile::Events),
            other => Err(Error::BadRequest(format!("unknown profile: {other}"))),
        }
    }
}

/// Connection and naming parameters for a [`Datastore`](crate::Datastore).
///
/// A configured `scope` isolates multiple logical systems sharing one
/// engine: it prefixes the database name and every datastore name.
#[derive(Debug, Clone)]
pub struct DatastoreConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Database holding the datastore tables; scoped when a scope is set.
    pub database: String,
    /// Database to connect to when creating `database`.
    pub default_database: String,
    pub connection_pool_max: usize,
    pub scope: Option<String>,
    pub profile: Profile,
    /// Server-side statement timeout, applied through the connection
    /// options. Timeouts surface as `Unavailable` and may be retried.
    pub statement_timeout_ms: Option<u64>,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        DatastoreConfig {
            host: "localhost".into(),
            port: 5432,
            username: String::new(),
            password: String::new(),
            database: "silt".into(),
            default_database: "postgres".into(),
            connection_pool_max: 5,
            scope: None,
            profile: Profile::Basic,
            statement_timeout_ms: None,
        }
    }
}

impl DatastoreConfig {
    /// Load connection parameters from `SILT_PG_*` environment variables,
    /// falling back to the defaults. Reads a `.env` file when present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut cfg = DatastoreConfig::default();
        if let Ok(v) = std::env::var("SILT_PG_HOST") {
            cfg.host = v;
        }
        if let Ok(v) = std::env::var("SILT_PG_PORT") {
            if let Ok(port) = v.parse() {
                cfg.port = port;
            }
        }
        if let Ok(v) = std::env::var("SILT_PG_USER") {
            cfg.username = v;
        }
        if let Ok(v) = std::env::var("SILT_PG_PASSWORD") {
            cfg.password = v;
        }
        if let Ok(v) = std::env::var("SILT_PG_DATABASE") {
            cfg.database = v;
        }
        if let Ok(v) = std::env::var("SILT_PG_DEFAULT_DATABASE") {
            cfg.default_database = v;
        }
        if let Ok(v) = std::env::var("SILT_PG_POOL_MAX") {
            if let Ok(n) = v.parse() {
                cfg.connection_pool_max = n;
            }
        }
        if let Ok(v) = std::env::var("SILT_SCOPE") {
            if !v.is_empty() {
                cfg.scope = Some(v);
            }
        }
        if let Ok(v) = std::env::var("SILT_PROFILE") {
            if let Ok(p) = v.parse() {
                cfg.profile = p;
            }
        }
        cfg
    }

    /// The database name with the scope prefix applied.
    pub fn scoped_database(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}_{}", scope, self.database),
            None => self.database.clone(),
        }
    }

    /// Scope and validate a datastore name.
    ///
    /// Names are lowercased after scoping; a name that was not already
    /// lowercase, or is empty, is rejected.
    pub fn scoped_datastore_name(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Err(Error::BadRequest("no datastore name provided".into()));
        }
        let scoped = match &self.scope {
            Some(scope) => format!("{scope}_{name}"),
            None => name.to_owned(),
        };
        if scoped != scoped.to_lowercase() {
            return Err(Error::BadRequest(format!("invalid datastore name: {scoped}")));
        }
        Ok(scoped)
    }

    /// Build the driver configuration for a specific database.
    pub(crate) fn pg_config(&self, dbname: &str) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host).port(self.port).dbname(dbname);
        if !self.username.is_empty() {
            pg.user(&self.username);
        }
        if !self.password.is_empty() {
            pg.password(&self.password);
        }
        if let Some(ms) = self.statement_timeout_ms {
            pg.options(&format!("-c statement_timeout={ms}"));
        }
        pg
    }
}
