use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::types::CourseGeometry;
use crate::api::{ApiClient, ApiError};
use crate::storage::{read_json, write_json, KeyValueStore, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCourse {
    pub course: CourseGeometry,
    pub cached_at: DateTime<Utc>,
    pub data_version: u64,
}

/// Offline copy of downloaded course geometry, one entry per slug.
pub struct CourseCache {
    store: Arc<dyn KeyValueStore>,
}

fn cache_key(slug: &str) -> String {
    format!("course:{}", slug)
}

impl CourseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, slug: &str) -> Option<CachedCourse> {
        let key = cache_key(slug);
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || read_json(store.as_ref(), &key))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(cached) => cached,
            Err(e) => {
                error!("Failed to read cached course {}: {}", slug, e);
                None
            }
        }
    }

    pub async fn put(&self, slug: &str, course: &CourseGeometry, data_version: u64) {
        let key = cache_key(slug);
        let store = self.store.clone();
        let entry = CachedCourse {
            course: course.clone(),
            cached_at: Utc::now(),
            data_version,
        };
        let result = tokio::task::spawn_blocking(move || write_json(store.as_ref(), &key, &entry))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))
            .and_then(|r| r);

        if let Err(e) = result {
            error!("Failed to cache course {}: {}", slug, e);
        }
    }

    /// Returns the course for `slug`, downloading it only when the cached
    /// copy is missing or its data version is behind the server's. When the
    /// server cannot be reached a cached copy of any version is used.
    pub async fn resolve(&self, api: &ApiClient, slug: &str) -> Result<CourseGeometry, ApiError> {
        let cached = self.get(slug).await;

        let server_version = match api.fetch_course_version(slug).await {
            Ok(version) => version,
            Err(e) => {
                return match cached {
                    Some(entry) => {
                        warn!("Using cached course {} (server unavailable: {})", slug, e);
                        Ok(entry.course)
                    }
                    None => Err(e),
                };
            }
        };

        if let Some(entry) = &cached {
            if entry.data_version == server_version {
                debug!("Cached course {} is current (v{})", slug, server_version);
                return Ok(entry.course.clone());
            }
        }

        match api.fetch_course(slug).await {
            Ok(response) => {
                let version = response.data_version;
                let course = response.into_geometry();
                info!("Downloaded course {} v{}", slug, version);
                self.put(slug, &course, version).await;
                Ok(course)
            }
            Err(e) => match cached {
                Some(entry) => {
                    warn!("Using stale course {} v{}: {}", slug, entry.data_version, e);
                    Ok(entry.course)
                }
                None => Err(e),
            },
        }
    }
}
