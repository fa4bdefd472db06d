use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::settings::{Settings, IMAGE_COUNT_RANGE};

/// One decoded image returned by the remote service.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bitmap: RgbaImage,
    /// Some services rewrite the prompt before generating.
    pub revised_prompt: Option<String>,
}

/// Parameters of a single remote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
}

/// A remote image generator. One call is one network round trip and may
/// return any number of images, including none.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn request_images(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>>;
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    n: u32,
    response_format: &'a str,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GenerationData>,
}

#[derive(Debug, Deserialize)]
struct GenerationData {
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

/// Client for the OpenAI `images/generations` endpoint.
#[derive(Clone)]
pub struct OpenAiImageClient {
    api_url: String,
    api_key: String,
    organization_id: String,
    project_id: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiImageClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::remote)?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            organization_id: String::new(),
            project_id: String::new(),
            model: model.into(),
            client,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut client = Self::new(
            settings.api_base_url.clone(),
            settings.api_key.clone(),
            settings.image_model.clone(),
            settings.request_timeout(),
        )?;
        client.organization_id = settings.organization_id.clone();
        client.project_id = settings.project_id.clone();
        Ok(client)
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        self.organization_id = organization_id.into();
        self.project_id = project_id.into();
        self
    }
}

#[async_trait]
impl ImageBackend for OpenAiImageClient {
    async fn request_images(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>> {
        let url = format!("{}/images/generations", self.api_url);
        let body = GenerationRequest {
            prompt: &request.prompt,
            model: &self.model,
            n: 1,
            response_format: "b64_json",
            size: &request.size,
        };

        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        if !self.organization_id.is_empty() {
            req = req.header("OpenAI-Organization", &self.organization_id);
        }
        if !self.project_id.is_empty() {
            req = req.header("OpenAI-Project", &self.project_id);
        }

        let response = req
            .send()
            .await
            .map_err(|err| Error::RemoteService(format!("request to {url} failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(Error::RemoteService(format!(
                "image API returned error {status}: {body}"
            )));
        }

        let payload: GenerationResponse = response
            .json()
            .await
            .map_err(|err| Error::RemoteService(format!("failed to parse image response: {err}")))?;

        info!(count = payload.data.len(), "image generation request completed");
        payload.data.into_iter().map(decode_entry).collect()
    }
}

fn decode_entry(entry: GenerationData) -> Result<GeneratedImage> {
    let encoded = entry
        .b64_json
        .ok_or_else(|| Error::RemoteService("image entry carried no b64_json payload".to_string()))?;
    let bitmap = decode_base64_image(&encoded)?;
    debug!(width = bitmap.width(), height = bitmap.height(), "decoded generated image");
    Ok(GeneratedImage {
        bitmap,
        revised_prompt: entry.revised_prompt,
    })
}

/// Decodes a base64 payload (PNG, JPEG) into an RGBA bitmap.
pub fn decode_base64_image(encoded: &str) -> Result<RgbaImage> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|err| Error::RemoteService(format!("invalid base64 image data: {err}")))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|err| Error::RemoteService(format!("undecodable image data: {err}")))?;
    Ok(image.to_rgba8())
}

/// Issues single-image requests against an [`ImageBackend`].
pub struct ImageGenerator<B> {
    backend: B,
}

impl<B: ImageBackend> ImageGenerator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// One remote call yielding exactly one image.
    pub async fn generate(&self, prompt: &str, size: &str) -> Result<GeneratedImage> {
        let request = ImageRequest {
            prompt: prompt.to_string(),
            size: size.to_string(),
        };
        let started = Instant::now();
        let mut images = self.backend.request_images(&request).await?;
        if images.is_empty() {
            warn!("image service returned an empty result set");
            return Err(Error::EmptyResult);
        }
        if images.len() > 1 {
            warn!(extra = images.len() - 1, "image service returned more images than requested; keeping the first");
        }
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "image generated");
        Ok(images.swap_remove(0))
    }

    /// `count` sequential calls to [`ImageGenerator::generate`]. The count
    /// is clamped to the supported range.
    pub async fn generate_many(&self, prompt: &str, size: &str, count: u32) -> Result<Vec<GeneratedImage>> {
        let (min, max) = IMAGE_COUNT_RANGE;
        let count = count.clamp(min, max);
        let started = Instant::now();
        let mut images = Vec::with_capacity(count as usize);
        for attempt in 1..=count {
            debug!(attempt, count, "requesting image");
            images.push(self.generate(prompt, size).await?);
        }
        info!(
            count = images.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "image generation completed"
        );
        Ok(images)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Backend that replays a scripted sequence of per-call image counts.
    pub(crate) struct ScriptedBackend {
        pub calls: AtomicUsize,
        pub per_call: Mutex<Vec<usize>>,
        pub fail_on_call: Option<usize>,
    }

    impl ScriptedBackend {
        pub fn always(images_per_call: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                per_call: Mutex::new(vec![images_per_call]),
                fail_on_call: None,
            }
        }
    }

    pub(crate) fn solid(shade: u8) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, image::Rgba([shade, shade, shade, 255]))
    }

    #[async_trait]
    impl ImageBackend for ScriptedBackend {
        async fn request_images(&self, _request: &ImageRequest) -> Result<Vec<GeneratedImage>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                return Err(Error::RemoteService("scripted failure".into()));
            }
            let script = self.per_call.lock().unwrap();
            let count = script.get(call).or(script.last()).copied().unwrap_or(0);
            Ok((0..count)
                .map(|i| GeneratedImage {
                    bitmap: solid((call * 10 + i) as u8),
                    revised_prompt: None,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn generate_many_returns_exactly_count_images() {
        for count in 1..=10 {
            let generator = ImageGenerator::new(ScriptedBackend::always(1));
            let images = generator
                .generate_many("a red chair", "256x256", count)
                .await
                .expect("generate");
            assert_eq!(images.len(), count as usize);
            assert_eq!(generator.backend().calls.load(Ordering::SeqCst), count as usize);
        }
    }

    #[tokio::test]
    async fn generate_many_clamps_out_of_range_counts() {
        let generator = ImageGenerator::new(ScriptedBackend::always(1));
        let images = generator.generate_many("p", "256x256", 0).await.expect("generate");
        assert_eq!(images.len(), 1);
        let images = generator.generate_many("p", "256x256", 50).await.expect("generate");
        assert_eq!(images.len(), 10);
    }

    #[tokio::test]
    async fn empty_result_is_an_error() {
        let generator = ImageGenerator::new(ScriptedBackend::always(0));
        let err = generator.generate("p", "256x256").await.unwrap_err();
        assert!(matches!(err, Error::EmptyResult));
    }

    #[tokio::test]
    async fn extra_images_are_dropped() {
        let generator = ImageGenerator::new(ScriptedBackend::always(3));
        let image = generator.generate("p", "256x256").await.expect("generate");
        assert_eq!(image.bitmap.get_pixel(0, 0)[0], 0);
    }

    #[tokio::test]
    async fn failure_midway_aborts_the_batch() {
        let backend = ScriptedBackend {
            fail_on_call: Some(1),
            ..ScriptedBackend::always(1)
        };
        let generator = ImageGenerator::new(backend);
        let err = generator.generate_many("p", "256x256", 3).await.unwrap_err();
        assert!(matches!(err, Error::RemoteService(_)));
        assert_eq!(generator.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalid_base64_is_a_remote_error() {
        assert!(matches!(
            decode_base64_image("not base64!!"),
            Err(Error::RemoteService(_))
        ));
        let not_an_image = BASE64.encode(b"hello");
        assert!(matches!(
            decode_base64_image(&not_an_image),
            Err(Error::RemoteService(_))
        ));
    }
}
