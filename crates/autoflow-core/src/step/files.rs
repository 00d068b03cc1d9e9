//! Sandboxed local file store used by file sources, file actions and file
//! destinations.
//!
//! Every path is relative to the store root. Absolute paths and `..`
//! components are rejected before touching the disk, and existing targets
//! are canonicalized so a symlink cannot lead outside the root.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use super::executor::StepError;
use super::records::{parse_csv, to_csv};

// ---------------------------------------------------------------------------
// FileFormat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Csv,
    Text,
}

impl FileFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "text" | "txt" => Some(Self::Text),
            _ => None,
        }
    }

    /// Explicit format name wins, then the file extension, then text.
    pub fn detect(path: &str, explicit: Option<&str>) -> Result<Self, StepError> {
        if let Some(name) = explicit {
            return Self::from_name(name)
                .ok_or_else(|| StepError::InvalidConfig(format!("unsupported file format type '{name}'")));
        }
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Ok(Self::from_name(ext).unwrap_or(Self::Text))
    }

    pub fn decode(self, bytes: &[u8]) -> Result<Value, StepError> {
        let text = String::from_utf8_lossy(bytes);
        match self {
            Self::Json => serde_json::from_str(&text)
                .map_err(|e| StepError::File(format!("invalid JSON content: {e}"))),
            Self::Csv => Ok(Value::Array(parse_csv(&text))),
            Self::Text => Ok(Value::String(text.into_owned())),
        }
    }

    pub fn encode(self, value: &Value) -> Result<Vec<u8>, StepError> {
        match self {
            Self::Json => serde_json::to_vec_pretty(value)
                .map_err(|e| StepError::File(format!("cannot encode JSON: {e}"))),
            Self::Csv => {
                let records = match value {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                Ok(to_csv(&records).into_bytes())
            }
            Self::Text => Ok(match value {
                Value::String(s) => s.clone().into_bytes(),
                other => other.to_string().into_bytes(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a store-relative path to a path under the root, lexically.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StepError> {
        let relative = relative.trim();
        if relative.is_empty() {
            return Err(StepError::InvalidConfig("'path' is required".into()));
        }
        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    tracing::warn!(path = relative, "file path rejected by sandbox");
                    return Err(StepError::Sandbox(relative.to_string()));
                }
            }
        }
        Ok(resolved)
    }

    /// Resolve and, when the target exists, confirm it really lives under
    /// the root.
    async fn resolve_checked(&self, relative: &str) -> Result<PathBuf, StepError> {
        let path = self.resolve(relative)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StepError::File(format!("cannot create file store root: {e}")))?;
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| StepError::File(format!("cannot resolve file store root: {e}")))?;
        if let Ok(real) = tokio::fs::canonicalize(&path).await {
            if !real.starts_with(&root) {
                tracing::warn!(path = relative, "symlink leads outside the file store");
                return Err(StepError::Sandbox(relative.to_string()));
            }
        }
        Ok(path)
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, StepError> {
        let path = self.resolve_checked(relative).await?;
        tokio::fs::read(&path).await.map_err(|e| io_error(relative, e))
    }

    pub async fn read_value(&self, relative: &str, format: FileFormat) -> Result<Value, StepError> {
        let bytes = self.read(relative).await?;
        format.decode(&bytes)
    }

    /// Write `bytes`, creating parent directories. Returns the byte count.
    pub async fn write(&self, relative: &str, bytes: &[u8]) -> Result<u64, StepError> {
        let path = self.resolve_checked(relative).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(relative, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(relative, e))?;
        tracing::debug!(path = relative, bytes = bytes.len(), "file written");
        Ok(bytes.len() as u64)
    }

    pub async fn write_value(&self, relative: &str, value: &Value, format: FileFormat) -> Result<u64, StepError> {
        let bytes = format.encode(value)?;
        self.write(relative, &bytes).await
    }

    /// Delete a file. `false` when it did not exist.
    pub async fn delete(&self, relative: &str) -> Result<bool, StepError> {
        let path = self.resolve_checked(relative).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(relative, e)),
        }
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<u64, StepError> {
        let src = self.resolve_checked(from).await?;
        let dst = self.resolve_checked(to).await?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(to, e))?;
        }
        tokio::fs::copy(&src, &dst)
            .await
            .map_err(|e| io_error(from, e))
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), StepError> {
        let src = self.resolve_checked(from).await?;
        let dst = self.resolve_checked(to).await?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(to, e))?;
        }
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| io_error(from, e))
    }

    pub async fn exists(&self, relative: &str) -> Result<bool, StepError> {
        let path = self.resolve_checked(relative).await?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }
}

fn io_error(path: &str, e: std::io::Error) -> StepError {
    match e.kind() {
        ErrorKind::NotFound => StepError::File(format!("file {path} not found")),
        _ => StepError::File(format!("{path}: {e}")),
    }
}
