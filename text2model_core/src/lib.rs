//! Prompt → images → 3D mesh workflow.
//!
//! Images come from an OpenAI-compatible `images/generations` endpoint and
//! are cached as PNGs; meshes are produced by an external interpreter and
//! script launched as a subprocess.

pub mod asset_cache;
pub mod error;
pub mod image_client;
pub mod mesh;
pub mod settings;
pub mod telemetry;
pub mod workflow;

pub use asset_cache::{AssetCache, GeneratedImageRecord};
pub use error::{Error, ProcessError, Result};
pub use image_client::{GeneratedImage, ImageBackend, ImageGenerator, ImageRequest, OpenAiImageClient};
pub use mesh::{MeshInvoker, MeshOutcome, MeshRequest};
pub use settings::{KeyValueStore, MemoryStore, Settings, SettingsStore, TomlFileStore};
pub use workflow::{Phase, Workflow, WorkflowController, WorkflowEvent, WorkflowOptions, WorkflowState};
