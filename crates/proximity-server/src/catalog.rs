//! Catalog loader: reads `*.json` catalog app definitions from a
//! directory into memory. A malformed file is skipped with a warning
//! rather than failing the whole load, so one bad entry never takes the
//! catalog down.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use proximity_common::{CatalogApp, Error, Result};
use tokio::sync::RwLock;

pub struct Catalog {
    dir: PathBuf,
    apps: RwLock<HashMap<String, CatalogApp>>,
}

impl Catalog {
    /// Loads every `*.json` file in `dir` and returns the catalog, already
    /// populated. Missing the directory itself is fatal; a bad file inside
    /// it is not.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let catalog = Arc::new(Self {
            dir: dir.as_ref().to_path_buf(),
            apps: RwLock::new(HashMap::new()),
        });
        catalog.reload().await?;
        Ok(catalog)
    }

    /// Re-reads the catalog directory from scratch, replacing the
    /// in-memory set atomically once the scan completes.
    pub async fn reload(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(Error::Io)?;
        let mut loaded = HashMap::new();

        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<CatalogApp>(&contents) {
                    Ok(app) => {
                        loaded.insert(app.id.clone(), app);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping invalid catalog file");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read catalog file");
                }
            }
        }

        tracing::info!(count = loaded.len(), "catalog loaded");
        *self.apps.write().await = loaded;
        Ok(())
    }

    pub async fn list(&self) -> Vec<CatalogApp> {
        self.apps.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Result<CatalogApp> {
        self.apps
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("catalog app {id}")))
    }

    /// Case-insensitive substring match over name, description and tags.
    pub async fn search(&self, query: &str) -> Vec<CatalogApp> {
        let query = query.to_lowercase();
        self.apps
            .read()
            .await
            .values()
            .filter(|app| {
                app.name.to_lowercase().contains(&query)
                    || app.description.to_lowercase().contains(&query)
                    || app.tags.iter().any(|t| t.to_lowercase().contains(&query))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proximity_common::ComposeBundle;

    fn write_app(dir: &std::path::Path, id: &str, name: &str, tags: Vec<&str>) {
        let app = CatalogApp {
            id: id.to_string(),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: format!("{name} description"),
            icon: None,
            category: "misc".to_string(),
            compose_bundle: ComposeBundle {
                docker_compose: serde_json::json!({"services": {}}),
            },
            declared_ports: vec![8080],
            declared_volumes: vec![],
            declared_env: Default::default(),
            min_memory: 256,
            min_cpu: 1,
            tags: tags.into_iter().map(String::from).collect(),
            author: None,
            website: None,
        };
        std::fs::write(
            dir.join(format!("{id}.json")),
            serde_json::to_string_pretty(&app).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn loads_valid_entries_and_skips_invalid_ones() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path(), "nginx", "Nginx", vec!["web", "proxy"]);
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let catalog = Catalog::load(dir.path()).await.unwrap();
        let apps = catalog.list().await;
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].id, "nginx");
    }

    #[tokio::test]
    async fn get_returns_not_found_for_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).await.unwrap();
        assert!(catalog.get("missing").await.is_err());
    }

    #[tokio::test]
    async fn search_matches_name_description_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path(), "nginx", "Nginx", vec!["web", "proxy"]);
        write_app(dir.path(), "postgres", "Postgres", vec!["database"]);
        let catalog = Catalog::load(dir.path()).await.unwrap();

        assert_eq!(catalog.search("proxy").await.len(), 1);
        assert_eq!(catalog.search("data").await.len(), 1);
        assert_eq!(catalog.search("nonexistent").await.len(), 0);
    }

    #[tokio::test]
    async fn reload_picks_up_newly_added_files() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).await.unwrap();
        assert_eq!(catalog.list().await.len(), 0);

        write_app(dir.path(), "redis", "Redis", vec!["cache"]);
        catalog.reload().await.unwrap();
        assert_eq!(catalog.list().await.len(), 1);
    }
}
