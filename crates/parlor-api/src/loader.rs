use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::error;
use uuid::Uuid;

use parlor_db::{ChatError, Database, Result};
use parlor_types::models::User;

/// Request-scoped batched user lookup. Each `load_many` call issues at most
/// one query for the ids it has not seen within `ttl`.
pub struct UserLoader {
    db: Arc<Database>,
    ttl: Duration,
    cache: Mutex<HashMap<Uuid, (Instant, Option<User>)>>,
}

impl UserLoader {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.load_many(&[id]).await?.remove(&id))
    }

    /// Users for `ids`; unknown ids are absent from the map.
    pub async fn load_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.lock()?;
            for id in ids {
                match cache.get(id) {
                    Some((at, user)) if at.elapsed() < self.ttl => {
                        if let Some(user) = user {
                            found.insert(*id, user.clone());
                        }
                    }
                    _ if !missing.contains(id) => missing.push(*id),
                    _ => {}
                }
            }
        }
        if missing.is_empty() {
            return Ok(found);
        }

        let db = self.db.clone();
        let query_ids = missing.clone();
        let loaded = tokio::task::spawn_blocking(move || db.users_by_ids(&query_ids))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::Internal(e.into())
            })??;

        let now = Instant::now();
        let mut cache = self.lock()?;
        for id in missing {
            let user = loaded.get(&id).cloned();
            if let Some(user) = &user {
                found.insert(id, user.clone());
            }
            cache.insert(id, (now, user));
        }
        Ok(found)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, (Instant, Option<User>)>>> {
        self.cache
            .lock()
            .map_err(|_| ChatError::Internal(anyhow::anyhow!("user loader cache poisoned")))
    }
}
