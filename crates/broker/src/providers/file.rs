use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use policy::ActionParams;
use serde_json::{Value, json};

use crate::{Provider, ProviderError};

/// Reads and writes files below a sandbox root.
///
/// Request paths are taken relative to the root; absolute paths are re-rooted
/// and `..` may not climb above it.
#[derive(Debug, Clone)]
pub struct FileProvider {
    root: PathBuf,
}

impl FileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, requested: &str) -> Result<PathBuf, ProviderError> {
        let mut relative = PathBuf::new();
        for component in Path::new(requested).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(ProviderError::Refused(format!(
                            "path escapes sandbox: {requested}"
                        )));
                    }
                }
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(ProviderError::InvalidInput("empty path".to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Provider for FileProvider {
    async fn execute(&self, params: &ActionParams) -> Result<Value, ProviderError> {
        match params {
            ActionParams::FileRead { path } => {
                let target = self.resolve(path)?;
                let content = tokio::fs::read_to_string(&target)
                    .await
                    .map_err(|e| io_failure("read", &target, e))?;
                Ok(json!({ "path": target, "content": content }))
            }
            ActionParams::FileWrite { path, data } => {
                let target = self.resolve(path)?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| io_failure("create", parent, e))?;
                }
                tokio::fs::write(&target, data)
                    .await
                    .map_err(|e| io_failure("write", &target, e))?;
                Ok(json!({ "path": target, "bytes": data.len() }))
            }
            other => Err(ProviderError::Unsupported(other.kind())),
        }
    }
}

fn io_failure(op: &str, path: &Path, e: std::io::Error) -> ProviderError {
    ProviderError::Execution(format!("{op} {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path());

        let out = provider
            .execute(&ActionParams::file_write("reports/scan.json", "{}"))
            .await
            .unwrap();
        assert_eq!(out["bytes"], 2);
        assert!(dir.path().join("reports/scan.json").exists());

        let out = provider
            .execute(&ActionParams::FileRead { path: "/reports/scan.json".into() })
            .await
            .unwrap();
        assert_eq!(out["content"], "{}");
    }

    #[tokio::test]
    async fn parent_traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path());
        let err = provider
            .execute(&ActionParams::file_write("../outside.txt", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Refused(_)));
    }

    #[tokio::test]
    async fn missing_file_is_an_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path());
        let err = provider
            .execute(&ActionParams::FileRead { path: "nope.txt".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Execution(_)));
    }
}
