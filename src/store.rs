use crate::error::StoreResult;
use crate::models::Template;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistence boundary for saved templates. The live state owns the list;
/// implementations only mirror it.
pub trait TemplateStore: Send + Sync {
    fn load(&self) -> StoreResult<Vec<Template>>;
    fn save(&self, templates: &[Template]) -> StoreResult<()>;
}

/// Stores the template list as a single JSON document, written atomically.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base_dir: PathBuf,
    templates_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        let templates_path = base_dir.join("templates.json");

        let store = Self {
            base_dir,
            templates_path,
        };

        if !store.templates_path.exists() {
            store.write_json(&store.templates_path, &Vec::<Template>::new())?;
        }

        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn templates_path(&self) -> &Path {
        &self.templates_path
    }

    fn write_json<T: serde::Serialize + ?Sized>(&self, path: &Path, value: &T) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        let file = fs::File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        // Windows refuses to rename over an existing file.
        match fs::rename(&temp_path, path) {
            Ok(()) => Ok(()),
            Err(_err) if path.exists() => {
                let _ = fs::remove_file(path);
                fs::rename(&temp_path, path)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl TemplateStore for JsonFileStore {
    fn load(&self) -> StoreResult<Vec<Template>> {
        if !self.templates_path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.templates_path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let templates = serde_json::from_str(&contents)?;
        Ok(templates)
    }

    fn save(&self, templates: &[Template]) -> StoreResult<()> {
        self.write_json(&self.templates_path, templates)
    }
}

/// In-memory store for tests and embedders without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    templates: Mutex<Vec<Template>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryStore {
    fn load(&self) -> StoreResult<Vec<Template>> {
        let templates = self
            .templates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(templates.clone())
    }

    fn save(&self, templates: &[Template]) -> StoreResult<()> {
        let mut stored = self
            .templates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stored = templates.to_vec();
        Ok(())
    }
}
