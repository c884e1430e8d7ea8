//! Named-artifact store used as the handoff surface between pipeline stages.
//!
//! Every stage reads its inputs and writes its output through
//! [`ArtifactStore`]. Two implementations are provided:
//! - [`Storage`]: libSQL database on disk, survives across CLI invocations
//! - [`MemoryStore`]: process-local map, for single-run flows and tests
//!
//! **Access rules:** single writer per name; a write fully replaces the
//! previous body and readers always see the last completed write.

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use wasteroute_shared::{Result, RoutePlannerError};

/// Listing entry for a stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub size_bytes: usize,
    pub sha256: String,
    pub updated_at: String,
}

/// Named blob store with text and JSON helpers.
#[allow(async_fn_in_trait)]
pub trait ArtifactStore {
    /// Whether an artifact with this name exists.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Read an artifact body, `None` if absent.
    async fn read_text(&self, name: &str) -> Result<Option<String>>;

    /// Write (fully replace) an artifact body.
    async fn write_text(&self, name: &str, text: &str) -> Result<()>;

    /// Delete an artifact. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// List stored artifacts, ordered by name.
    async fn list(&self) -> Result<Vec<ArtifactInfo>>;

    /// Read and deserialize a JSON artifact, `None` if absent.
    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.read_text(name).await? {
            Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
                RoutePlannerError::parse(format!("artifact {name} is not valid JSON: {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Serialize (pretty) and write a JSON artifact.
    async fn write_json<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(data).map_err(|e| {
            RoutePlannerError::parse(format!("JSON serialization of {name} failed: {e}"))
        })?;
        self.write_text(name, &text).await
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn storage_err(e: libsql::Error) -> RoutePlannerError {
    RoutePlannerError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// libSQL-backed store
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RoutePlannerError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        RoutePlannerError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }
}

impl ArtifactStore for Storage {
    async fn exists(&self, name: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM artifacts WHERE name = ?1", params![name])
            .await
            .map_err(storage_err)?;

        let found = rows.next().await.map_err(storage_err)?.is_some();
        debug!(artifact = name, found, "artifact existence check");
        Ok(found)
    }

    async fn read_text(&self, name: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT body FROM artifacts WHERE name = ?1", params![name])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    async fn write_text(&self, name: &str, text: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let hash = sha256_hex(text);
        self.conn
            .execute(
                "INSERT INTO artifacts (name, body, sha256, size_bytes, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                   body = excluded.body,
                   sha256 = excluded.sha256,
                   size_bytes = excluded.size_bytes,
                   updated_at = excluded.updated_at",
                params![name, text, hash.as_str(), text.len() as i64, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        debug!(artifact = name, size = text.len(), "wrote artifact");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM artifacts WHERE name = ?1", params![name])
            .await
            .map_err(storage_err)?;
        debug!(artifact = name, existed = changed > 0, "deleted artifact");
        Ok(changed > 0)
    }

    async fn list(&self) -> Result<Vec<ArtifactInfo>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, size_bytes, sha256, updated_at FROM artifacts ORDER BY name",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(ArtifactInfo {
                name: row.get::<String>(0).map_err(storage_err)?,
                size_bytes: row.get::<i64>(1).map_err(storage_err)? as usize,
                sha256: row.get::<String>(2).map_err(storage_err)?,
                updated_at: row.get::<String>(3).map_err(storage_err)?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local artifact store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, (String, ArtifactInfo)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(name))
    }

    async fn read_text(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .await
            .get(name)
            .map(|(body, _)| body.clone()))
    }

    async fn write_text(&self, name: &str, text: &str) -> Result<()> {
        let info = ArtifactInfo {
            name: name.to_string(),
            size_bytes: text.len(),
            sha256: sha256_hex(text),
            updated_at: Utc::now().to_rfc3339(),
        };
        self.entries
            .write()
            .await
            .insert(name.to_string(), (text.to_string(), info));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(name).is_some())
    }

    async fn list(&self) -> Result<Vec<ArtifactInfo>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .map(|(_, info)| info.clone())
            .collect())
    }
}
