//! state discovery and retrieval
//!
//! 1. local state file
//! 2. backend pointer: `backend` block (or legacy `remote` block without a cached copy) is followed, otherwise the
//!    pointer itself is a cached copy of the remote state
use super::StateError;
use crate::config::LoaderConfig;
use indexmap::IndexMap;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug)]
pub(super) struct Payload {
    pub origin: String,
    pub contents: String,
}

/// `{"type": "...", "config": {...}}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(super) struct BackendConfig {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    config: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Pointer {
    #[serde(default)]
    backend: Option<BackendConfig>,
    #[serde(default)]
    remote: Option<BackendConfig>,
    #[serde(default)]
    modules: Vec<IgnoredAny>,
}

impl Pointer {
    fn backend_to_follow(self) -> Option<BackendConfig> {
        match (self.backend, self.remote) {
            (Some(backend), _) => Some(backend),
            (None, Some(remote)) if self.modules.is_empty() => Some(remote),
            _ => None,
        }
    }
}

pub(super) async fn retrieve(config: &LoaderConfig) -> Result<Option<Payload>, StateError> {
    let local = config.local_state_path();
    if let Some(contents) = read_optional(&local).await? {
        return Ok(Some(Payload {
            origin: local.display().to_string(),
            contents,
        }));
    }

    let pointer_path = config.backend_pointer_path();
    let Some(contents) = read_optional(&pointer_path).await? else {
        return Ok(None);
    };
    let origin = pointer_path.display().to_string();

    let pointer: Pointer = serde_json::from_str(&contents).map_err(|source| StateError::Parse {
        origin: origin.clone(),
        source,
    })?;
    match pointer.backend_to_follow() {
        Some(backend) => backend.retrieve(&config.working_dir).await,
        None => {
            tracing::debug!(%origin, "backend pointer holds cached state");
            Ok(Some(Payload { origin, contents }))
        }
    }
}

impl BackendConfig {
    async fn retrieve(&self, working_dir: &Path) -> Result<Option<Payload>, StateError> {
        tracing::debug!(kind = %self.kind, "following state backend");
        match self.kind.as_str() {
            "local" => {
                let path = working_dir.join(self.string("path")?.unwrap_or("terraform.tfstate"));
                Ok(read_optional(&path).await?.map(|contents| Payload {
                    origin: path.display().to_string(),
                    contents,
                }))
            }
            "http" => {
                let address = self.string("address")?.ok_or_else(|| self.invalid("missing \"address\""))?;
                fetch_http(address).await
            }
            other => Err(StateError::UnsupportedBackend(other.to_string())),
        }
    }

    fn string(&self, key: &str) -> Result<Option<&str>, StateError> {
        match self.config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(_) => Err(self.invalid(&format!("\"{key}\" must be a string"))),
        }
    }

    fn invalid(&self, reason: &str) -> StateError {
        StateError::InvalidBackend {
            kind: self.kind.clone(),
            reason: reason.to_string(),
        }
    }
}

async fn fetch_http(address: &str) -> Result<Option<Payload>, StateError> {
    let backend_error = |source| StateError::Backend {
        address: address.to_string(),
        source,
    };

    tracing::info!(address, "retrieving remote state");
    let response = reqwest::get(address).await.map_err(backend_error)?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        tracing::debug!(address, "remote state does not exist");
        return Ok(None);
    }

    let contents = response
        .error_for_status()
        .map_err(backend_error)?
        .text()
        .await
        .map_err(backend_error)?;
    Ok(Some(Payload {
        origin: address.to_string(),
        contents,
    }))
}

async fn read_optional(path: &Path) -> Result<Option<String>, StateError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StateError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, contents) in files {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        dir
    }

    async fn origin(dir: &tempfile::TempDir) -> Option<String> {
        retrieve(&LoaderConfig::new(dir.path()))
            .await
            .unwrap()
            .map(|payload| payload.origin)
    }

    #[tokio::test]
    async fn local_state_wins() {
        let dir = project(&[
            ("terraform.tfstate", "{}"),
            (".terraform/terraform.tfstate", "{}"),
        ]);
        let origin = origin(&dir).await.unwrap();
        assert!(origin.ends_with("terraform.tfstate"));
        assert!(!origin.contains(".terraform"));
    }

    #[tokio::test]
    async fn nothing_to_retrieve() {
        let dir = project(&[("main.tf", "")]);
        assert_eq!(origin(&dir).await, None);
    }

    #[tokio::test]
    async fn cached_remote_state() {
        let dir = project(&[(
            ".terraform/terraform.tfstate",
            r#"{"remote": {"type": "s3", "config": {"bucket": "b"}}, "modules": [{"path": ["root"]}]}"#,
        )]);
        let origin = origin(&dir).await.unwrap();
        assert!(origin.ends_with(".terraform/terraform.tfstate"));
    }

    #[tokio::test]
    async fn local_backend() {
        let dir = project(&[
            (
                ".terraform/terraform.tfstate",
                r#"{"backend": {"type": "local", "config": {"path": "states/prod.tfstate"}}}"#,
            ),
            ("states/prod.tfstate", "{}"),
        ]);
        let found = origin(&dir).await.unwrap();
        assert!(found.ends_with("states/prod.tfstate"));

        // configured but not yet written
        let dir = project(&[(
            ".terraform/terraform.tfstate",
            r#"{"backend": {"type": "local", "config": {}}}"#,
        )]);
        assert_eq!(origin(&dir).await, None);
    }

    #[tokio::test]
    async fn backend_errors() {
        let cases = [
            (r#"{"backend": {"type": "s3", "config": {}}}"#, "unsupported"),
            (r#"{"remote": {"type": "consul"}}"#, "unsupported"),
            (r#"{"backend": {"type": "http", "config": {}}}"#, "invalid"),
            (r#"{"backend": {"type": "local", "config": {"path": 1}}}"#, "invalid"),
            (r#"{"backend": "#, "parse"),
        ];

        for (pointer, expected) in cases {
            let dir = project(&[(".terraform/terraform.tfstate", pointer)]);
            let err = retrieve(&LoaderConfig::new(dir.path()))
                .await
                .expect_err("must error");
            let matched = match expected {
                "unsupported" => matches!(err, StateError::UnsupportedBackend(_)),
                "invalid" => matches!(err, StateError::InvalidBackend { .. }),
                _ => matches!(err, StateError::Parse { .. }),
            };
            assert!(matched, "{pointer}: {err:?}");
        }
    }
}
