mod ui;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use text2model_core::settings::TomlFileStore;
use text2model_core::{telemetry, SettingsStore};

use ui::app::Text2ModelApp;

fn main() -> Result<()> {
    telemetry::init_tracing_with_default("text2model_core=info,text2model_desktop=info");

    let settings_path = TomlFileStore::default_path()
        .ok_or_else(|| anyhow!("no user config directory available for settings"))?;
    let store = TomlFileStore::open(&settings_path)
        .with_context(|| format!("failed to open settings at {}", settings_path.display()))?;
    let store = SettingsStore::new(store);

    let project_root = match std::env::args_os().nth(1) {
        Some(root) => PathBuf::from(root),
        None => std::env::current_dir()?,
    };
    tracing::info!(root = %project_root.display(), "starting Text2Model panel");

    let runtime = tokio::runtime::Runtime::new()?;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([980.0, 860.0])
            .with_title("Text2Model"),
        ..Default::default()
    };

    eframe::run_native(
        "Text2Model",
        native_options,
        Box::new(|_cc| Ok(Box::new(Text2ModelApp::new(runtime, store, project_root)))),
    )
    .map_err(|err| anyhow!(err.to_string()))
}
