//! Controller Registry - resolve controllers by name
//!
//! Built-in controllers are registered as factories. Anything else is
//! looked up as a JSON manifest in the controllers directory, or as a
//! direct path to a `.json` file.

pub mod builtin;
pub mod manifest;

pub use builtin::{ArticlesController, ListingsController, ShippingController};
pub use manifest::{Condition, Manifest, ManifestController, Rule, WriteMode};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_CONTROLLERS_DIR;
use crate::controller::Controller;
use crate::error::RegistryError;
use crate::logs::log_warning;

/// Creates a fresh controller for each run.
pub type ControllerFactory = Box<dyn Fn() -> Box<dyn Controller>>;

/// Where a listed controller comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Builtin,
    Manifest,
}

/// Entry of [`ControllerRegistry::list`]
#[derive(Debug, Clone, Serialize)]
pub struct ControllerInfo {
    pub name: String,
    pub description: String,
    pub kind: ControllerKind,
}

pub struct ControllerRegistry {
    controllers_dir: PathBuf,
    factories: BTreeMap<String, ControllerFactory>,
}

impl ControllerRegistry {
    /// Empty registry reading manifests from the default directory
    pub fn new() -> Self {
        Self::with_dir(DEFAULT_CONTROLLERS_DIR)
    }

    /// Empty registry reading manifests from `dir`
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            controllers_dir: PathBuf::from(dir.as_ref()),
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in controllers
    pub fn with_builtins(dir: impl AsRef<Path>) -> Self {
        let mut registry = Self::with_dir(dir);
        registry.add("shipping", || Box::new(ShippingController));
        registry.add("articles", || Box::new(ArticlesController));
        registry.add("listings", || Box::new(ListingsController::default()));
        registry
    }

    fn add(&mut self, name: &str, factory: impl Fn() -> Box<dyn Controller> + 'static) {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn controllers_dir(&self) -> &Path {
        &self.controllers_dir
    }

    /// Register a controller factory under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Controller> + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Fresh controller for `name`: registered factories first, then
    /// `<dir>/<name>.json`, then `name` itself as a manifest path.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn Controller>, RegistryError> {
        if let Some(factory) = self.factories.get(name) {
            return Ok(factory());
        }

        let in_dir = self.controllers_dir.join(format!("{}.json", name));
        if in_dir.is_file() {
            return Ok(Box::new(ManifestController::from_path(&in_dir)?));
        }

        let direct = Path::new(name);
        if direct.extension().is_some_and(|e| e == "json") && direct.is_file() {
            return Ok(Box::new(ManifestController::from_path(direct)?));
        }

        Err(RegistryError::NotFound(name.to_string()))
    }

    /// Registered controllers followed by the manifests in the directory.
    pub fn list(&self) -> Vec<ControllerInfo> {
        let mut infos: Vec<ControllerInfo> = self
            .factories
            .iter()
            .map(|(name, factory)| ControllerInfo {
                name: name.clone(),
                description: factory().description(),
                kind: ControllerKind::Builtin,
            })
            .collect();

        infos.extend(self.list_manifests());
        infos
    }

    fn list_manifests(&self) -> Vec<ControllerInfo> {
        let Ok(entries) = fs::read_dir(&self.controllers_dir) else {
            return Vec::new();
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "json"))
            .collect();
        paths.sort();

        let mut infos = Vec::new();
        for path in paths {
            match ManifestController::from_path(&path) {
                Ok(controller) if !self.contains(controller.name()) => infos.push(ControllerInfo {
                    name: controller.name().to_string(),
                    description: controller.description(),
                    kind: ControllerKind::Manifest,
                }),
                Ok(_) => {}
                Err(e) => log_warning(format!("Skipping {}: {}", path.display(), e)),
            }
        }
        infos
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
