//! Client construction and local data persistence.

use anyhow::{Context, Result};
use rtalk::{ChatClient, MemoryStore, Message, MessageStore, Profile, RestConfig, RestStore};
use rust_i18n::t;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{config_path, load_config, BackendConfig, Config};

/// On-disk layout of the local backend.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalData {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    profiles: Vec<Profile>,
}

/// The store behind a session.
pub enum Backend {
    Local { store: Arc<MemoryStore>, path: PathBuf },
    Rest(Arc<RestStore>),
}

impl Backend {
    /// Open the configured backend.
    pub fn open(config: &Config) -> Result<Self> {
        match &config.backend {
            BackendConfig::Local { data_file } => {
                let path = match data_file {
                    Some(path) => path.clone(),
                    None => default_data_path()?,
                };
                let data = read_local(&path)?;
                let store = MemoryStore::with_messages(data.messages);
                for profile in data.profiles {
                    store.upsert_profile(profile);
                }
                tracing::debug!("opened local store at {}", path.display());
                Ok(Backend::Local {
                    store: Arc::new(store),
                    path,
                })
            }
            BackendConfig::Rest {
                url,
                api_key,
                access_token,
                echo_client_token,
                poll_interval_ms,
            } => {
                let mut rest = RestConfig::new(url, api_key);
                rest.access_token = access_token.clone();
                rest.echo_client_token = *echo_client_token;
                if let Some(ms) = poll_interval_ms {
                    rest.poll_interval = Duration::from_millis((*ms).max(100));
                }
                let store = RestStore::new(rest).context("Failed to build REST store")?;
                Ok(Backend::Rest(Arc::new(store)))
            }
        }
    }

    pub fn store(&self) -> Arc<dyn MessageStore> {
        match self {
            Backend::Local { store, .. } => store.clone() as Arc<dyn MessageStore>,
            Backend::Rest(store) => store.clone() as Arc<dyn MessageStore>,
        }
    }

    /// Write local data back to disk. A no-op for remote backends.
    pub fn persist(&self) -> Result<()> {
        let Backend::Local { store, path } = self else {
            return Ok(());
        };

        let data = LocalData {
            messages: store.export(),
            profiles: store.export_profiles(),
        };
        let content =
            serde_json::to_string_pretty(&data).context("Failed to serialize local data")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write data file {}", path.display()))?;
        Ok(())
    }
}

/// A client bound to the configured backend.
pub struct Session {
    pub client: ChatClient,
    pub backend: Backend,
}

impl Session {
    pub fn persist(&self) -> Result<()> {
        self.backend.persist()
    }
}

/// Default local data file, next to the config file.
pub fn default_data_path() -> Result<PathBuf> {
    let config = config_path()?;
    let dir = config.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join("rtalk-data.json"))
}

fn read_local(path: &Path) -> Result<LocalData> {
    if !path.exists() {
        return Ok(LocalData::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse data file")
}

/// Build a session from the current configuration.
pub fn build_session() -> Result<Session> {
    let config = load_config()?;
    let backend = Backend::open(&config)?;

    let mut builder = ChatClient::builder()
        .store(backend.store())
        .config(config.chat.to_chat_config());

    if let Some(identity) = &config.identity {
        builder = builder.user(identity.uid.as_str());
    }

    let client = builder.build().context("Failed to build rTalk client")?;
    Ok(Session { client, backend })
}

/// Build a session that requires a signed-in user.
pub fn build_identified_session() -> Result<Session> {
    let config = load_config()?;
    if config.identity.is_none() {
        anyhow::bail!("{}", t!("identity_required"));
    }
    build_session()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtalk::NewMessage;

    #[tokio::test]
    async fn test_local_backend_persists() {
        let path = std::env::temp_dir().join(format!(
            "rtalk-session-test-{}.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);

        let config = Config {
            backend: BackendConfig::Local {
                data_file: Some(path.clone()),
            },
            ..Default::default()
        };

        let backend = Backend::open(&config).unwrap();
        backend
            .store()
            .insert_message(NewMessage::new("u1", "u2", "hello"))
            .await
            .unwrap();
        backend.persist().unwrap();

        let reopened = Backend::open(&config).unwrap();
        let rows = reopened
            .store()
            .query_messages(&"u2".into(), &"u1".into())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "hello");

        let _ = fs::remove_file(&path);
    }
}
