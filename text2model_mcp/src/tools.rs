use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use text2model_core::{Error, ImageBackend, MeshOutcome, Workflow, WorkflowController};

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const TOOL_FAILED: i32 = -32000;
const BUSY: i32 = -32001;

fn invalid_params(message: impl Into<String>) -> JsonRpcError {
    JsonRpcError {
        code: INVALID_PARAMS,
        message: message.into(),
        data: None,
    }
}

fn map_workflow_err(err: Error) -> JsonRpcError {
    let code = match err {
        Error::Busy => BUSY,
        Error::NoSelection | Error::InvalidSelection { .. } => INVALID_PARAMS,
        _ => TOOL_FAILED,
    };
    JsonRpcError {
        code,
        message: err.user_message(),
        data: Some(json!({ "detail": err.to_string() })),
    }
}

fn outcome_json(outcome: &MeshOutcome) -> Value {
    json!({
        "command": outcome.command_line,
        "output_path": outcome.expected_artifact.display().to_string(),
        "output_present": outcome.artifact_present,
        "elapsed_ms": outcome.elapsed.as_millis() as u64,
        "stdout": outcome.stdout,
    })
}

/// Exposes the workflow as callable tools. One workflow lives across calls
/// so `select_image` and `generate_mesh` can follow `generate_images`.
pub struct ToolServer<B> {
    controller: WorkflowController<B>,
    workflow: Workflow,
}

impl<B: ImageBackend> ToolServer<B> {
    pub fn new(controller: WorkflowController<B>) -> Self {
        Self {
            controller,
            workflow: Workflow::new(),
        }
    }

    pub async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        let result = match req.method.as_str() {
            "mcp.list_tools" => Ok(list_tools()),
            "mcp.call_tool" => self.call_tool(req.params).await,
            _ => Err(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: "Method not found".to_string(),
                data: None,
            }),
        };

        match result {
            Ok(val) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(val),
                error: None,
                id: req.id,
            },
            Err(err) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: None,
                error: Some(err),
                id: req.id,
            },
        }
    }

    async fn call_tool(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| invalid_params("Invalid params"))?;
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid_params("Missing tool name"))?;

        let default_args = json!({});
        let args = params.get("arguments").unwrap_or(&default_args);
        let prompt = || {
            args.get("prompt")
                .and_then(|v| v.as_str())
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| invalid_params("Missing prompt"))
        };

        match name {
            "generate_model_from_prompt" => {
                let prompt = prompt()?;
                let output_name = args
                    .get("output_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&self.controller.options().output_name)
                    .to_string();
                let outcome = self
                    .controller
                    .generate_model_named(&mut self.workflow, prompt, &output_name)
                    .await
                    .map_err(map_workflow_err)?;
                Ok(outcome_json(&outcome))
            }
            "generate_images" => {
                let prompt = prompt()?;
                let count = match args.get("count") {
                    Some(raw) => raw
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .filter(|n| (1..=10).contains(n))
                        .ok_or_else(|| invalid_params("count must be an integer between 1 and 10"))?,
                    None => self.controller.options().image_count,
                };
                self.controller
                    .generate_images(&mut self.workflow, prompt, count)
                    .await
                    .map_err(map_workflow_err)?;
                Ok(self.images_json())
            }
            "list_images" => Ok(self.images_json()),
            "select_image" => {
                let index = args
                    .get("index")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| invalid_params("Missing index"))?;
                let index = usize::try_from(index).map_err(|_| invalid_params("index out of range"))?;
                self.workflow.select(index).map_err(map_workflow_err)?;
                Ok(self.images_json())
            }
            "generate_mesh" => {
                let outcome = self
                    .controller
                    .generate_mesh_from_selection(&mut self.workflow)
                    .await
                    .map_err(map_workflow_err)?;
                Ok(outcome_json(&outcome))
            }
            _ => Err(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Tool {} not found", name),
                data: None,
            }),
        }
    }

    fn images_json(&self) -> Value {
        let images: Vec<Value> = self
            .workflow
            .records()
            .iter()
            .map(|record| {
                json!({
                    "index": record.index,
                    "path": record.path.display().to_string(),
                    "width": record.bitmap.width(),
                    "height": record.bitmap.height(),
                })
            })
            .collect();
        json!({
            "images": images,
            "selected": self.workflow.selection(),
        })
    }
}

fn list_tools() -> Value {
    json!({
        "tools": [
            {
                "name": "generate_model_from_prompt",
                "description": "Generate one image from a prompt and convert it into a 3D mesh",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "prompt": { "type": "string" },
                        "output_name": { "type": "string", "description": "Mesh file name without extension (optional)" }
                    },
                    "required": ["prompt"]
                }
            },
            {
                "name": "generate_images",
                "description": "Generate candidate images from a prompt, replacing previous ones",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "prompt": { "type": "string" },
                        "count": { "type": "integer", "minimum": 1, "maximum": 10 }
                    },
                    "required": ["prompt"]
                }
            },
            {
                "name": "list_images",
                "description": "List generated images and the current selection",
                "parameters": { "type": "object", "properties": {} }
            },
            {
                "name": "select_image",
                "description": "Select a generated image by index",
                "parameters": {
                    "type": "object",
                    "properties": { "index": { "type": "integer" } },
                    "required": ["index"]
                }
            },
            {
                "name": "generate_mesh",
                "description": "Convert the selected image into a 3D mesh",
                "parameters": { "type": "object", "properties": {} }
            }
        ]
    })
}
