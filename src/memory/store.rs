//! Per-session memory slot storage
//!
//! In-memory by default; Postgres when a database URL is configured.

use crate::error::OrchestrationError;
use crate::models::MemorySlots;
use crate::Result;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

enum StoreBackend {
    InMemory {
        sessions: Arc<RwLock<HashMap<String, MemorySlots>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

pub struct SessionMemoryStore {
    backend: StoreBackend,
}

impl SessionMemoryStore {
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::InMemory {
                sessions: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    /// Postgres when `database_url` is set and usable, in-memory otherwise
    pub fn connect(database_url: Option<&str>) -> Self {
        if let Some(url) = database_url {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(url)
            {
                Ok(pool) => {
                    info!("Session memory backend: postgres");
                    return Self {
                        backend: StoreBackend::Postgres {
                            pool,
                            schema_ready: Arc::new(OnceCell::new()),
                        },
                    };
                }
                Err(error) => {
                    warn!(
                        "Failed to initialize postgres memory backend, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("Session memory backend: in-memory");
        Self::in_memory()
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            StoreBackend::InMemory { .. } => "in-memory",
            StoreBackend::Postgres { .. } => "postgres",
        }
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let StoreBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_memory (
                      session_id TEXT NOT NULL,
                      slot TEXT NOT NULL,
                      value TEXT NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      PRIMARY KEY (session_id, slot)
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize conversation memory schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    pub async fn load(&self, session_id: &str) -> Result<MemorySlots> {
        match &self.backend {
            StoreBackend::InMemory { sessions } => {
                Ok(sessions.read().await.get(session_id).cloned().unwrap_or_default())
            }
            StoreBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let rows = sqlx::query(
                    "SELECT slot, value FROM conversation_memory WHERE session_id = $1",
                )
                .bind(session_id)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    OrchestrationError::DatabaseError(format!("Failed to load session memory: {}", e))
                })?;

                let mut memory = MemorySlots::new();
                for row in rows {
                    let slot: String = row.try_get("slot")?;
                    let value: String = row.try_get("value")?;
                    memory.insert(slot, value);
                }
                Ok(memory)
            }
        }
    }

    /// Upsert every slot in `memory`; slots absent from it are left alone
    pub async fn save(&self, session_id: &str, memory: &MemorySlots) -> Result<()> {
        match &self.backend {
            StoreBackend::InMemory { sessions } => {
                sessions
                    .write()
                    .await
                    .insert(session_id.to_string(), memory.clone());
                Ok(())
            }
            StoreBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let mut tx = pool.begin().await.map_err(|e| {
                    OrchestrationError::DatabaseError(format!(
                        "Failed to begin transaction for saving session memory: {}",
                        e
                    ))
                })?;

                for (slot, value) in memory {
                    sqlx::query(
                        r#"
                        INSERT INTO conversation_memory (session_id, slot, value, updated_at)
                        VALUES ($1, $2, $3, NOW())
                        ON CONFLICT (session_id, slot)
                        DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
                        "#,
                    )
                    .bind(session_id)
                    .bind(slot)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        OrchestrationError::DatabaseError(format!(
                            "Failed to save memory slot {}: {}",
                            slot, e
                        ))
                    })?;
                }

                tx.commit().await.map_err(|e| {
                    OrchestrationError::DatabaseError(format!(
                        "Failed to commit session memory transaction: {}",
                        e
                    ))
                })?;

                Ok(())
            }
        }
    }
}

impl Default for SessionMemoryStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
