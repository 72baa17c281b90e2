//! Template bytes for the components.
//!
//! Assets are loaded once, at startup, and then only read. Components look
//! them up by a relative name such as `registry/config.yaml`.

use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "templates")]
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::AssetError;
use crate::hash::Hash32;

pub trait AssetProvider: Send + Sync {
    fn get(&self, name: &str) -> Result<&[u8], AssetError>;

    /// Combined checksum of the named assets, in the given order.
    fn checksum(&self, names: &[&str]) -> Result<Hash32, AssetError> {
        let parts = names
            .iter()
            .map(|name| self.get(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Hash32::hash_parts(parts))
    }
}

/// Immutable in-memory asset set.
#[derive(Debug, Clone, Default)]
pub struct StaticAssets {
    assets: BTreeMap<String, Arc<[u8]>>,
}

impl StaticAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, data: impl AsRef<[u8]>) -> Self {
        self.assets.insert(name.into(), Arc::from(data.as_ref()));
        self
    }

    /// Templates shipped with the crate.
    pub fn builtin() -> Self {
        Self::new()
            .with(
                "registry/config.yaml",
                include_str!("../assets/templates/registry/config.yaml"),
            )
            .with(
                "registry/ctl-config.yaml",
                include_str!("../assets/templates/registry/ctl-config.yaml"),
            )
            .with(
                "jobservice/config.yaml",
                include_str!("../assets/templates/jobservice/config.yaml"),
            )
            .with(
                "portal/nginx.conf",
                include_str!("../assets/templates/portal/nginx.conf"),
            )
    }

    /// Reads every file below `dir`, named by its path relative to `dir`.
    #[cfg(feature = "templates")]
    pub fn load_dir(dir: impl AsRef<Utf8Path>) -> Result<Self, AssetError> {
        let dir = dir.as_ref();
        let pattern = dir.join("**").join("*");

        let mut assets = BTreeMap::new();
        for path in glob::glob(pattern.as_str())? {
            let path = Utf8PathBuf::try_from(path?)?;
            if !path.is_file() {
                continue;
            }

            let data = std::fs::read(&path).map_err(|source| AssetError::Io {
                path: path.to_string(),
                source,
            })?;

            let name = path.strip_prefix(dir).unwrap_or(path.as_path()).as_str().replace('\\', "/");
            tracing::debug!(asset = %name, size = data.len(), "loaded template");
            assets.insert(name, Arc::from(data));
        }

        Ok(Self { assets })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl AssetProvider for StaticAssets {
    fn get(&self, name: &str) -> Result<&[u8], AssetError> {
        self.assets
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| AssetError::NotFound(name.to_string()))
    }
}
