mod tools;

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use text2model_core::settings::TomlFileStore;
use text2model_core::{telemetry, SettingsStore, WorkflowController};
use tokio::io::{AsyncBufReadExt, BufReader};

use tools::{JsonRpcRequest, ToolServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing_with_default("text2model_core=info,text2model_mcp=info");

    let settings_path = match std::env::var_os("TEXT2MODEL_SETTINGS") {
        Some(path) => PathBuf::from(path),
        None => TomlFileStore::default_path()
            .ok_or_else(|| anyhow!("no user config directory; set TEXT2MODEL_SETTINGS"))?,
    };
    let store = TomlFileStore::open(&settings_path)
        .with_context(|| format!("failed to open settings at {}", settings_path.display()))?;
    let mut settings = SettingsStore::new(store).load();
    settings.apply_env_overrides();

    let project_root = match std::env::var_os("TEXT2MODEL_PROJECT_ROOT") {
        Some(root) => PathBuf::from(root),
        None => std::env::current_dir()?,
    };
    tracing::info!(root = %project_root.display(), "text2model tool server ready");

    let controller = WorkflowController::openai(&settings, &project_root)?;
    let mut server = ToolServer::new(controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!("Failed to parse request: {}", e);
                continue;
            }
        };

        let response = server.handle_request(request).await;
        let response_json = serde_json::to_string(&response)?;
        println!("{}", response_json);
    }

    Ok(())
}
