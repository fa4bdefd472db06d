use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_ORG_ID: &str = "OPENAI_ORG_ID";
const ENV_PROJECT_ID: &str = "OPENAI_PROJECT_ID";

pub const KEY_API_KEY: &str = "OpenAI_ApiKey";
pub const KEY_ORG_ID: &str = "OpenAI_OrgID";
pub const KEY_PROJECT_ID: &str = "OpenAI_ProjectID";
pub const KEY_INTERPRETER: &str = "PythonPath";
pub const KEY_SCRIPT: &str = "ModelGenerationScriptPath";
pub const KEY_MODELS_FOLDER: &str = "ResourceFolder";
pub const KEY_OUTPUT_NAME: &str = "OutputObjName";
pub const KEY_IMAGE_COUNT: &str = "ImageCount";
pub const KEY_IMAGE_SIZE: &str = "ImageSize";
pub const KEY_TEMP_DIR: &str = "TempDir";
pub const KEY_IMAGES_PER_ROW: &str = "ImagesPerRow";
pub const KEY_UI_IMAGE_SIZE: &str = "UiImageSize";
pub const KEY_API_BASE_URL: &str = "ApiBaseUrl";
pub const KEY_IMAGE_MODEL: &str = "ImageModel";
pub const KEY_REQUEST_TIMEOUT: &str = "RequestTimeoutSecs";
pub const KEY_MESH_TIMEOUT: &str = "MeshTimeoutSecs";

/// Every persisted key, in the order they are shown to users.
pub const ALL_KEYS: [&str; 16] = [
    KEY_API_KEY,
    KEY_ORG_ID,
    KEY_PROJECT_ID,
    KEY_API_BASE_URL,
    KEY_IMAGE_MODEL,
    KEY_REQUEST_TIMEOUT,
    KEY_IMAGE_COUNT,
    KEY_IMAGE_SIZE,
    KEY_TEMP_DIR,
    KEY_INTERPRETER,
    KEY_SCRIPT,
    KEY_MODELS_FOLDER,
    KEY_OUTPUT_NAME,
    KEY_MESH_TIMEOUT,
    KEY_IMAGES_PER_ROW,
    KEY_UI_IMAGE_SIZE,
];

const CREDENTIAL_KEYS: [&str; 3] = [KEY_API_KEY, KEY_ORG_ID, KEY_PROJECT_ID];

pub const IMAGE_COUNT_RANGE: (u32, u32) = (1, 10);
pub const IMAGES_PER_ROW_RANGE: (u32, u32) = (1, 5);
pub const UI_IMAGE_SIZE_RANGE: (u32, u32) = (100, 500);

/// User-editable configuration for the whole workflow.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub organization_id: String,
    pub project_id: String,
    /// OpenAI-compatible endpoint, without the `/images/generations` suffix.
    pub api_base_url: String,
    pub image_model: String,
    pub request_timeout_secs: u64,

    /// Number of images requested by "Generate Images" (1..=10).
    pub image_count: u32,
    /// Size string forwarded to the image service, e.g. `1024x1024`.
    pub image_size: String,
    pub temp_dir: String,

    pub interpreter: String,
    pub script_path: String,
    pub models_folder: String,
    pub output_name: String,
    /// Zero disables the timeout.
    pub mesh_timeout_secs: u64,

    pub images_per_row: u32,
    pub ui_image_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            organization_id: String::new(),
            project_id: String::new(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            image_model: "dall-e-3".to_string(),
            request_timeout_secs: 120,
            image_count: 3,
            image_size: "1024x1024".to_string(),
            temp_dir: "Temp/".to_string(),
            interpreter: "python".to_string(),
            script_path: "scripts/image_to_mesh.py".to_string(),
            models_folder: "Temp/Models/".to_string(),
            output_name: "Default".to_string(),
            mesh_timeout_secs: 0,
            images_per_row: 3,
            ui_image_size: 200,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.display_entries() {
            map.entry(&key, &value);
        }
        map.finish()
    }
}

impl Settings {
    /// Builds settings from a key lookup, falling back to defaults for
    /// missing keys and for values that do not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Settings::default();
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let ranged = |key: &str, default: u32, (min, max): (u32, u32)| {
            let raw = number(key, u64::from(default));
            u32::try_from(raw).unwrap_or(max).clamp(min, max)
        };

        Self {
            api_key: text(KEY_API_KEY, &defaults.api_key),
            organization_id: text(KEY_ORG_ID, &defaults.organization_id),
            project_id: text(KEY_PROJECT_ID, &defaults.project_id),
            api_base_url: text(KEY_API_BASE_URL, &defaults.api_base_url),
            image_model: text(KEY_IMAGE_MODEL, &defaults.image_model),
            request_timeout_secs: number(KEY_REQUEST_TIMEOUT, defaults.request_timeout_secs).max(1),
            image_count: ranged(KEY_IMAGE_COUNT, defaults.image_count, IMAGE_COUNT_RANGE),
            image_size: text(KEY_IMAGE_SIZE, &defaults.image_size),
            temp_dir: text(KEY_TEMP_DIR, &defaults.temp_dir),
            interpreter: text(KEY_INTERPRETER, &defaults.interpreter),
            script_path: text(KEY_SCRIPT, &defaults.script_path),
            models_folder: text(KEY_MODELS_FOLDER, &defaults.models_folder),
            output_name: text(KEY_OUTPUT_NAME, &defaults.output_name),
            mesh_timeout_secs: number(KEY_MESH_TIMEOUT, defaults.mesh_timeout_secs),
            images_per_row: ranged(KEY_IMAGES_PER_ROW, defaults.images_per_row, IMAGES_PER_ROW_RANGE),
            ui_image_size: ranged(KEY_UI_IMAGE_SIZE, defaults.ui_image_size, UI_IMAGE_SIZE_RANGE),
        }
    }

    /// All fields as `(key, value)` pairs, credentials included.
    pub fn to_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_API_KEY, self.api_key.clone()),
            (KEY_ORG_ID, self.organization_id.clone()),
            (KEY_PROJECT_ID, self.project_id.clone()),
            (KEY_API_BASE_URL, self.api_base_url.clone()),
            (KEY_IMAGE_MODEL, self.image_model.clone()),
            (KEY_REQUEST_TIMEOUT, self.request_timeout_secs.to_string()),
            (KEY_IMAGE_COUNT, self.image_count.to_string()),
            (KEY_IMAGE_SIZE, self.image_size.clone()),
            (KEY_TEMP_DIR, self.temp_dir.clone()),
            (KEY_INTERPRETER, self.interpreter.clone()),
            (KEY_SCRIPT, self.script_path.clone()),
            (KEY_MODELS_FOLDER, self.models_folder.clone()),
            (KEY_OUTPUT_NAME, self.output_name.clone()),
            (KEY_MESH_TIMEOUT, self.mesh_timeout_secs.to_string()),
            (KEY_IMAGES_PER_ROW, self.images_per_row.to_string()),
            (KEY_UI_IMAGE_SIZE, self.ui_image_size.to_string()),
        ]
    }

    /// Same as [`Settings::to_entries`] with credentials masked.
    pub fn display_entries(&self) -> Vec<(&'static str, String)> {
        self.to_entries()
            .into_iter()
            .map(|(key, value)| {
                if CREDENTIAL_KEYS.contains(&key) && !value.is_empty() {
                    (key, "<redacted>".to_string())
                } else {
                    (key, value)
                }
            })
            .collect()
    }

    /// Updates a single field by its persisted key, with the same coercion
    /// rules as loading.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<()> {
        let Some(key) = ALL_KEYS.iter().copied().find(|known| known.eq_ignore_ascii_case(key)) else {
            return Err(Error::Settings(format!("unknown settings key `{key}`")));
        };
        let mut entries: BTreeMap<&str, String> = self.to_entries().into_iter().collect();
        entries.insert(key, value.to_string());
        *self = Settings::from_lookup(|k| entries.get(k).cloned());
        Ok(())
    }

    /// Credential overrides taken from the environment (`OPENAI_API_KEY`,
    /// `OPENAI_ORG_ID`, `OPENAI_PROJECT_ID`).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Copy suitable for saving: credentials that still equal their
    /// environment override are replaced by the `persisted` values.
    pub fn without_env_overrides(&self, persisted: &Settings) -> Settings {
        self.strip_overrides(persisted, |name| std::env::var(name).ok())
    }

    fn strip_overrides(&self, persisted: &Settings, lookup: impl Fn(&str) -> Option<String>) -> Settings {
        let from_env = |name: &str, current: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .is_some_and(|value| value == current)
        };
        let mut saved = self.clone();
        if from_env(ENV_API_KEY, &self.api_key) {
            saved.api_key = persisted.api_key.clone();
        }
        if from_env(ENV_ORG_ID, &self.organization_id) {
            saved.organization_id = persisted.organization_id.clone();
        }
        if from_env(ENV_PROJECT_ID, &self.project_id) {
            saved.project_id = persisted.project_id.clone();
        }
        saved
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.api_key = key;
        }
        if let Some(org) = non_empty(ENV_ORG_ID) {
            self.organization_id = org;
        }
        if let Some(project) = non_empty(ENV_PROJECT_ID) {
            self.project_id = project;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn mesh_timeout(&self) -> Option<Duration> {
        (self.mesh_timeout_secs > 0).then(|| Duration::from_secs(self.mesh_timeout_secs))
    }

    /// Resolves every configured path against `project_root`.
    pub fn resolve(&self, project_root: &Path) -> ResolvedPaths {
        let under_root = |raw: &str| {
            let path = Path::new(raw);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                project_root.join(path)
            }
        };

        // A bare program name is looked up on PATH, anything with a
        // directory component is a path.
        let interpreter = Path::new(&self.interpreter);
        let interpreter = if interpreter.components().count() > 1 {
            under_root(&self.interpreter)
        } else {
            interpreter.to_path_buf()
        };

        ResolvedPaths {
            temp_dir: under_root(&self.temp_dir),
            models_folder: under_root(&self.models_folder),
            script_path: under_root(&self.script_path),
            interpreter,
        }
    }
}

/// Filesystem locations after resolution against the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub temp_dir: PathBuf,
    pub models_folder: PathBuf,
    pub script_path: PathBuf,
    pub interpreter: PathBuf,
}

/// Flat string key/value persistence used by [`SettingsStore`].
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn flush(&mut self) -> Result<()>;
}

/// Volatile store, handy for tests and one-off runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
    flushes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Values keep whatever TOML type was written by hand; [`Settings::from_lookup`]
/// does the coercion.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct SettingsFile {
    values: BTreeMap<String, toml::Value>,
}

/// A flat TOML table on disk.
#[derive(Debug)]
pub struct TomlFileStore {
    path: PathBuf,
    file: SettingsFile,
}

impl TomlFileStore {
    /// Opens the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<SettingsFile>(&raw).map_err(|err| {
                Error::Settings(format!("failed to parse {}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => SettingsFile::default(),
            Err(err) => return Err(Error::io(&path, err)),
        };
        Ok(Self { path, file })
    }

    /// `<config dir>/text2model/settings.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("text2model").join("settings.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for TomlFileStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.file.values.get(key)? {
            toml::Value::String(value) => Some(value.clone()),
            toml::Value::Integer(value) => Some(value.to_string()),
            toml::Value::Float(value) => Some(value.to_string()),
            toml::Value::Boolean(value) => Some(value.to_string()),
            other => {
                tracing::warn!(key, kind = other.type_str(), "ignoring non-scalar setting");
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: String) {
        self.file.values.insert(key.to_string(), toml::Value::String(value));
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
        }
        let raw = toml::to_string_pretty(&self.file)
            .map_err(|err| Error::Settings(format!("failed to serialize settings: {err}")))?;
        fs::write(&self.path, raw).map_err(|err| Error::io(&self.path, err))
    }
}

/// Loads and saves [`Settings`] through any [`KeyValueStore`].
pub struct SettingsStore<S> {
    store: S,
}

impl<S: KeyValueStore> SettingsStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Settings {
        Settings::from_lookup(|key| self.store.get(key))
    }

    pub fn save(&mut self, settings: &Settings) -> Result<()> {
        for (key, value) in settings.to_entries() {
            self.store.set(key, value);
        }
        self.store.flush()?;
        tracing::info!(fields = ALL_KEYS.len(), "settings saved");
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let store = SettingsStore::new(MemoryStore::new());
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn save_then_load_restores_every_field() {
        let mut store = SettingsStore::new(MemoryStore::new());
        let settings = Settings {
            api_key: "sk-test".into(),
            organization_id: "org-1".into(),
            project_id: "proj-1".into(),
            image_count: 7,
            image_size: "512x512".into(),
            interpreter: "/opt/conda/bin/python".into(),
            output_name: "Chair".into(),
            mesh_timeout_secs: 600,
            ..Settings::default()
        };
        store.save(&settings).expect("save");
        assert_eq!(store.store().flush_count(), 1);
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn numeric_values_are_coerced_and_clamped() {
        let mut kv = MemoryStore::new();
        kv.set(KEY_IMAGE_COUNT, "42".into());
        kv.set(KEY_IMAGES_PER_ROW, "zero".into());
        kv.set(KEY_UI_IMAGE_SIZE, "12".into());
        let settings = SettingsStore::new(kv).load();
        assert_eq!(settings.image_count, 10);
        assert_eq!(settings.images_per_row, 3);
        assert_eq!(settings.ui_image_size, 100);
    }

    #[test]
    fn debug_output_hides_credentials() {
        let settings = Settings {
            api_key: "sk-very-secret".into(),
            organization_id: "org-secret".into(),
            ..Settings::default()
        };
        let text = format!("{settings:?}");
        assert!(!text.contains("sk-very-secret"));
        assert!(!text.contains("org-secret"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn set_field_accepts_known_keys_only() {
        let mut settings = Settings::default();
        settings.set_field("imagecount", "5").expect("known key");
        assert_eq!(settings.image_count, 5);
        assert!(matches!(
            settings.set_field("NotAKey", "1"),
            Err(Error::Settings(_))
        ));
    }

    #[test]
    fn env_overrides_replace_credentials_only_when_present() {
        let mut settings = Settings {
            organization_id: "org-saved".into(),
            ..Settings::default()
        };
        settings.apply_overrides(|name| match name {
            "OPENAI_API_KEY" => Some("sk-env".into()),
            "OPENAI_ORG_ID" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(settings.api_key, "sk-env");
        assert_eq!(settings.organization_id, "org-saved");
    }

    #[test]
    fn saving_keeps_env_credentials_out_of_the_store() {
        let persisted = Settings {
            api_key: "sk-saved".into(),
            ..Settings::default()
        };
        let env = |name: &str| match name {
            "OPENAI_API_KEY" => Some("sk-env".to_string()),
            "OPENAI_PROJECT_ID" => Some("proj-env".to_string()),
            _ => None,
        };
        let mut live = persisted.clone();
        live.apply_overrides(env);
        live.project_id = "proj-typed".into();
        live.output_name = "Lamp".into();

        let saved = live.strip_overrides(&persisted, env);
        assert_eq!(saved.api_key, "sk-saved");
        assert_eq!(saved.project_id, "proj-typed");
        assert_eq!(saved.output_name, "Lamp");
    }

    #[test]
    fn relative_paths_resolve_against_project_root() {
        let settings = Settings {
            interpreter: "python3".into(),
            script_path: "/abs/mesh.py".into(),
            ..Settings::default()
        };
        let resolved = settings.resolve(Path::new("/project"));
        assert_eq!(resolved.temp_dir, PathBuf::from("/project/Temp/"));
        assert_eq!(resolved.models_folder, PathBuf::from("/project/Temp/Models/"));
        assert_eq!(resolved.script_path, PathBuf::from("/abs/mesh.py"));
        assert_eq!(resolved.interpreter, PathBuf::from("python3"));

        let local = Settings {
            interpreter: "venv/bin/python".into(),
            ..Settings::default()
        };
        assert_eq!(
            local.resolve(Path::new("/project")).interpreter,
            PathBuf::from("/project/venv/bin/python")
        );
    }

    #[test]
    fn toml_store_persists_across_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("settings.toml");

        let mut store = SettingsStore::new(TomlFileStore::open(&path).expect("open"));
        let settings = Settings {
            output_name: "Lamp".into(),
            image_count: 2,
            ..Settings::default()
        };
        store.save(&settings).expect("save");

        let reopened = SettingsStore::new(TomlFileStore::open(&path).expect("reopen"));
        assert_eq!(reopened.load(), settings);
        assert_eq!(reopened.store().path(), path.as_path());
    }

    #[test]
    fn toml_store_accepts_hand_written_scalars() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        fs::write(
            &path,
            "ImageCount = 5\nOutputObjName = \"Lamp\"\nUiImageSize = 900\nMeshTimeoutSecs = 12.0\nImagesPerRow = true\n",
        )
        .expect("write");

        let store = SettingsStore::new(TomlFileStore::open(&path).expect("open"));
        let settings = store.load();
        assert_eq!(settings.image_count, 5);
        assert_eq!(settings.output_name, "Lamp");
        assert_eq!(settings.ui_image_size, 500);
        assert_eq!(settings.mesh_timeout_secs, 12);
        assert_eq!(settings.images_per_row, Settings::default().images_per_row);
    }

    #[test]
    fn toml_store_rejects_garbage() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        fs::write(&path, "this is = = not toml").expect("write");
        assert!(matches!(TomlFileStore::open(&path), Err(Error::Settings(_))));
    }
}
