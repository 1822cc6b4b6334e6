//! Artifact handles and the codec registry
//!
//! Runs save arbitrary objects under `artifacts/<type>/<name>`. The index only
//! records that they exist; decoding a payload goes through the
//! [`ArtifactCodec`] registered for its type.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::value::Value;
use crate::{Error, Result};

/// Loader/saver pair for one artifact type.
pub trait ArtifactCodec {
    /// Decode the payload stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be read or decoded.
    fn load(&self, path: &Path) -> Result<Value>;

    /// Encode `value` to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded or written.
    fn save(&self, value: &Value, path: &Path) -> Result<()>;
}

/// JSON payloads, decoded into [`Value`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ArtifactCodec for JsonCodec {
    fn load(&self, path: &Path) -> Result<Value> {
        let raw = fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(Value::from_json(json))
    }

    fn save(&self, value: &Value, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(&value.to_json())?;
        fs::write(path, raw)?;
        Ok(())
    }
}

/// UTF-8 text payloads, decoded into [`Value::Str`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl ArtifactCodec for TextCodec {
    fn load(&self, path: &Path) -> Result<Value> {
        Ok(Value::Str(fs::read_to_string(path)?))
    }

    fn save(&self, value: &Value, path: &Path) -> Result<()> {
        let text = match value {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        };
        fs::write(path, text)?;
        Ok(())
    }
}

/// Artifact type name → codec.
#[derive(Clone, Default)]
pub struct ArtifactRegistry {
    codecs: BTreeMap<String, Rc<dyn ArtifactCodec>>,
}

impl ArtifactRegistry {
    /// Registry without any codec.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in `json` and `text` codecs.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("json", JsonCodec);
        registry.register("text", TextCodec);
        registry
    }

    /// Register (or replace) the codec for an artifact type.
    pub fn register(&mut self, artifact_type: impl Into<String>, codec: impl ArtifactCodec + 'static) {
        self.codecs.insert(artifact_type.into(), Rc::new(codec));
    }

    /// Codec for an artifact type.
    #[must_use]
    pub fn get(&self, artifact_type: &str) -> Option<Rc<dyn ArtifactCodec>> {
        self.codecs.get(artifact_type).cloned()
    }

    /// Registered artifact types, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        self.codecs.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ArtifactRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactRegistry")
            .field("types", &self.types())
            .finish()
    }
}

/// Handle to one saved artifact.
#[derive(Clone)]
pub struct Artifact {
    name: String,
    artifact_type: String,
    path: PathBuf,
    codec: Rc<dyn ArtifactCodec>,
}

impl Artifact {
    pub(crate) fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        path: PathBuf,
        codec: Rc<dyn ArtifactCodec>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            path,
            codec,
        }
    }

    /// Item name as registered by the producer.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Artifact type (selects the codec).
    #[must_use]
    pub fn artifact_type(&self) -> &str {
        &self.artifact_type
    }

    /// Location of the payload.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec fails to read or decode the payload.
    pub fn load(&self) -> Result<Value> {
        tracing::debug!(artifact = %self.path.display(), "loading artifact");
        self.codec.load(&self.path).map_err(|e| match e {
            Error::Io(io) => Error::InvalidArtifact(format!(
                "Cannot read artifact {}: {io}",
                self.path.display()
            )),
            other => other,
        })
    }

    /// Overwrite the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec fails to encode or write the value.
    pub fn save(&self, value: &Value) -> Result<()> {
        self.codec.save(value, &self.path)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("artifact_type", &self.artifact_type)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
