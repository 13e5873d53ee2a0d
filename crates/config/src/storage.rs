//! Storage backing settings.

use serde::Deserialize;

/// Storage backing settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Database URL. Defaults to an in-memory database when unset.
    pub database_url: Option<DatabaseUrl>,
}

impl StorageConfig {
    /// The effective database target.
    pub fn database(&self) -> DatabaseUrl {
        self.database_url.clone().unwrap_or(DatabaseUrl::Memory)
    }
}

/// Parsed form of `DATABASE_URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// `sqlite::memory:` — process-local, lost on restart.
    Memory,
    /// `sqlite://<path>` — SQLite file on disk.
    SqliteFile(String),
}

impl DatabaseUrl {
    /// Parse the documented URL forms.
    pub fn parse(raw: &str) -> Result<Self, InvalidDatabaseUrl> {
        if raw == "sqlite::memory:" || raw == ":memory:" {
            return Ok(DatabaseUrl::Memory);
        }

        if let Some(path) = raw.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(InvalidDatabaseUrl(raw.to_string()));
            }
            return Ok(DatabaseUrl::SqliteFile(path.to_string()));
        }

        Err(InvalidDatabaseUrl(raw.to_string()))
    }
}

/// Error for URLs in a scheme the storage layer does not speak.
#[derive(Debug, thiserror::Error)]
#[error("unsupported DATABASE_URL '{0}': expected sqlite://<path> or sqlite::memory:")]
pub struct InvalidDatabaseUrl(pub String);

impl<'de> Deserialize<'de> for DatabaseUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DatabaseUrl::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::DatabaseUrl;

    #[test]
    fn parses_documented_forms() {
        assert_eq!(DatabaseUrl::parse("sqlite::memory:").unwrap(), DatabaseUrl::Memory);
        assert_eq!(
            DatabaseUrl::parse("sqlite:///var/lib/concord.db").unwrap(),
            DatabaseUrl::SqliteFile("/var/lib/concord.db".to_string())
        );
    }

    #[test]
    fn rejects_foreign_schemes() {
        assert!(DatabaseUrl::parse("postgres://localhost/concord").is_err());
        assert!(DatabaseUrl::parse("sqlite://").is_err());
    }
}
