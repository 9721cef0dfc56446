//! Functional tests for provider adapters against a mock HTTP server

use icon_forge::config::settings::default_catalog;
use icon_forge::config::ProviderConfig;
use icon_forge::pipeline::{classify, FailureCategory};
use icon_forge::provider::fal_ai::FalAiProvider;
use icon_forge::provider::http::{AdapterOptions, PollPolicy, RetryPolicy};
use icon_forge::provider::openai::OpenAiProvider;
use icon_forge::provider::replicate::ReplicateProvider;
use icon_forge::provider::together_ai::TogetherAiProvider;
use icon_forge::provider::ImageProvider;
use icon_forge::storage::ImageStore;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG_BYTES: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
const SVG_BYTES: &[u8] = b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>";

fn options(dir: &Path) -> AdapterOptions {
    AdapterOptions {
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        },
        poll: PollPolicy {
            interval: Duration::from_millis(10),
            deadline: Duration::from_secs(2),
        },
        store: ImageStore::new(dir.join("raw")),
        cache_dir: dir.join("cache"),
    }
}

fn provider_config(provider: &str, base_url: String) -> ProviderConfig {
    ProviderConfig {
        api_key: Some("test-key".into()),
        base_url: Some(base_url),
        models: default_catalog(provider),
        ..Default::default()
    }
}

async fn mount_png(server: &MockServer, image_path: &str) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES.to_vec()))
        .mount(server)
        .await;
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

// Together AI

#[tokio::test]
async fn test_together_generates_and_downloads() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "black-forest-labs/FLUX.1-dev",
            "prompt": "a red fox",
            "steps": 30
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": format!("{}/files/fox.png", server.uri()) }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_png(&server, "/files/fox.png").await;

    let provider =
        TogetherAiProvider::new(&provider_config("together_ai", server.uri()), &options(dir.path())).unwrap();
    let saved = provider.generate("a red fox", "fox", "flux_dev").await.unwrap();

    assert!(saved.starts_with(dir.path().join("raw")));
    let name = file_name(&saved);
    assert!(name.starts_with("fox_flux_dev_"), "{}", name);
    assert!(name.ends_with(".png"));
    assert_eq!(tokio::fs::read(&saved).await.unwrap(), PNG_BYTES.to_vec());
}

#[tokio::test]
async fn test_together_inline_payload() {
    use base64::Engine;

    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let encoded = base64::engine::general_purpose::STANDARD.encode(PNG_BYTES);

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "b64_json": encoded }]
        })))
        .mount(&server)
        .await;

    let provider =
        TogetherAiProvider::new(&provider_config("together_ai", server.uri()), &options(dir.path())).unwrap();
    let saved = provider.generate("a fox", "fox", "flux_schnell").await.unwrap();

    assert!(file_name(&saved).ends_with(".png"));
    assert_eq!(tokio::fs::read(&saved).await.unwrap(), PNG_BYTES.to_vec());
}

#[tokio::test]
async fn test_together_transient_failures_are_not_systemic() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // The image lives on a host that refuses connections; its path carries "429"
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(body_partial_json(json!({ "prompt": "a red fox" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": "http://127.0.0.1:1/cdn/4290ab/401/out.png" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(body_partial_json(json!({ "prompt": "an owl" })))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>column 429</html>"))
        .mount(&server)
        .await;

    let mut opts = options(dir.path());
    opts.retry = RetryPolicy::none();
    let provider =
        TogetherAiProvider::new(&provider_config("together_ai", server.uri()), &opts).unwrap();

    let download = provider.generate("a red fox", "fox", "flux_dev").await.unwrap_err();
    assert_eq!(download.to_string(), "network error: connection failed");
    assert_eq!(classify(&download.to_string()), None);

    let decode = provider.generate("an owl", "owl", "flux_dev").await.unwrap_err();
    assert!(decode.to_string().starts_with("Malformed"), "{}", decode);
    assert_eq!(classify(&decode.to_string()), None);
}

#[tokio::test]
async fn test_together_rate_limit_is_systemic() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        TogetherAiProvider::new(&provider_config("together_ai", server.uri()), &options(dir.path())).unwrap();
    let err = provider.generate("a fox", "fox", "flux_dev").await.unwrap_err();

    assert_eq!(classify(&err.to_string()), Some(FailureCategory::RateLimit));
}

#[tokio::test]
async fn test_transient_server_error_is_retried() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": format!("{}/files/retry.png", server.uri()) }]
        })))
        .mount(&server)
        .await;
    mount_png(&server, "/files/retry.png").await;

    let provider =
        TogetherAiProvider::new(&provider_config("together_ai", server.uri()), &options(dir.path())).unwrap();
    let saved = provider.generate("a fox", "fox", "flux_dev").await.unwrap();

    assert!(saved.exists());
}

#[tokio::test]
async fn test_unknown_model_makes_no_request() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider =
        TogetherAiProvider::new(&provider_config("together_ai", server.uri()), &options(dir.path())).unwrap();
    let err = provider.generate("a fox", "fox", "sdxl").await.unwrap_err();

    assert_eq!(classify(&err.to_string()), Some(FailureCategory::NotFound));
}

#[tokio::test]
async fn test_together_probe() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let provider =
        TogetherAiProvider::new(&provider_config("together_ai", server.uri()), &options(dir.path())).unwrap();
    assert!(provider.probe().await);
}

#[tokio::test]
async fn test_probe_rejected_key() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let provider =
        OpenAiProvider::new(&provider_config("openai", server.uri()), &options(dir.path())).unwrap();
    assert!(!provider.probe().await);
}

// OpenAI

#[tokio::test]
async fn test_openai_prefixes_prompt() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(body_partial_json(json!({
            "model": "dall-e-3",
            "prompt": "logo, minimalist, a red fox",
            "size": "1024x1024",
            "quality": "standard"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "url": format!("{}/files/dalle.png", server.uri()) }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_png(&server, "/files/dalle.png").await;

    let provider =
        OpenAiProvider::new(&provider_config("openai", server.uri()), &options(dir.path())).unwrap();
    let saved = provider.generate("a red fox", "fox", "dalle3").await.unwrap();

    assert!(file_name(&saved).starts_with("fox_dalle3_"));
}

#[tokio::test]
async fn test_openai_billing_error_is_quota() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(402).set_body_string("billing hard limit reached"))
        .mount(&server)
        .await;

    let provider =
        OpenAiProvider::new(&provider_config("openai", server.uri()), &options(dir.path())).unwrap();
    let err = provider.generate("a fox", "fox", "dalle3").await.unwrap_err();

    assert_eq!(classify(&err.to_string()), Some(FailureCategory::Quota));
}

// Replicate

#[tokio::test]
async fn test_replicate_official_model_polls_until_done() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/models/recraft-ai/recraft-v3-svg/predictions"))
        .and(body_partial_json(json!({ "input": { "prompt": "a fox" } })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pred-1",
            "status": "starting"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/predictions/pred-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pred-1",
            "status": "processing"
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/predictions/pred-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pred-1",
            "status": "succeeded",
            "output": format!("{}/files/fox.svg", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/fox.svg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SVG_BYTES.to_vec()))
        .mount(&server)
        .await;

    let provider = ReplicateProvider::new(
        &provider_config("replicate", format!("{}/v1", server.uri())),
        &options(dir.path()),
    )
    .unwrap();
    let saved = provider.generate("a fox", "fox", "recraft_svg").await.unwrap();

    assert!(file_name(&saved).ends_with(".svg"));
}

#[tokio::test]
async fn test_replicate_community_model_resolves_and_caches_version() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/models/galleri5/icons/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "id": "version-abc" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/predictions"))
        .and(body_partial_json(json!({ "version": "version-abc" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pred-2",
            "status": "succeeded",
            "output": [format!("{}/files/icon.png", server.uri())]
        })))
        .expect(2)
        .mount(&server)
        .await;
    mount_png(&server, "/files/icon.png").await;

    let provider = ReplicateProvider::new(
        &provider_config("replicate", format!("{}/v1", server.uri())),
        &options(dir.path()),
    )
    .unwrap();
    provider.generate("a fox", "fox", "galleri5_icons").await.unwrap();
    provider.generate("an owl", "owl", "galleri5_icons").await.unwrap();

    let cache = tokio::fs::read_to_string(dir.path().join("cache/replicate_versions.json"))
        .await
        .unwrap();
    let cache: serde_json::Value = serde_json::from_str(&cache).unwrap();
    assert_eq!(cache["galleri5/icons"], "version-abc");
}

#[tokio::test]
async fn test_replicate_failed_prediction_is_not_systemic() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/models/black-forest-labs/flux-schnell/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pred-3",
            "status": "failed",
            "error": "NSFW content detected"
        })))
        .mount(&server)
        .await;

    let provider = ReplicateProvider::new(
        &provider_config("replicate", format!("{}/v1", server.uri())),
        &options(dir.path()),
    )
    .unwrap();
    let err = provider.generate("a fox", "fox", "flux_schnell").await.unwrap_err();

    assert_eq!(err.to_string(), "Prediction failed: NSFW content detected");
    assert_eq!(classify(&err.to_string()), None);
}

#[tokio::test]
async fn test_replicate_poll_deadline() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/models/black-forest-labs/flux-schnell/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pred-4",
            "status": "starting"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/predictions/pred-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pred-4",
            "status": "processing"
        })))
        .mount(&server)
        .await;

    let mut opts = options(dir.path());
    opts.poll = PollPolicy {
        interval: Duration::from_millis(20),
        deadline: Duration::from_millis(100),
    };
    let provider = ReplicateProvider::new(
        &provider_config("replicate", format!("{}/v1", server.uri())),
        &opts,
    )
    .unwrap();
    let err = provider.generate("a fox", "fox", "flux_schnell").await.unwrap_err();

    assert!(err.to_string().starts_with("Timeout"), "{}", err);
}

// Fal.ai

fn fal_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        queue_url: Some(format!("{}/queue", server.uri())),
        ..provider_config("fal_ai", format!("{}/direct", server.uri()))
    }
}

#[tokio::test]
async fn test_fal_queue_then_poll() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/queue/fal-ai/flux/schnell"))
        .and(header("authorization", "Key test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "req-1",
            "response_url": format!("{}/queue/requests/req-1", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/requests/req-1"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/requests/req-1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "detail": "Request is still in progress"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/requests/req-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [{ "url": format!("{}/files/fal.png", server.uri()) }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/direct/fal-ai/flux/schnell"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_png(&server, "/files/fal.png").await;

    let provider = FalAiProvider::new(&fal_config(&server), &options(dir.path())).unwrap();
    let saved = provider.generate("a fox", "fox", "flux_schnell").await.unwrap();

    assert!(file_name(&saved).starts_with("fox_flux_schnell_"));
}

#[tokio::test]
async fn test_fal_falls_back_to_direct() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/queue/fal-ai/flux/dev"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/direct/fal-ai/flux/dev"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [{ "url": format!("{}/files/direct.png", server.uri()) }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_png(&server, "/files/direct.png").await;

    let provider = FalAiProvider::new(&fal_config(&server), &options(dir.path())).unwrap();
    let saved = provider.generate("a fox", "fox", "flux_dev").await.unwrap();

    assert!(saved.exists());
}

#[tokio::test]
async fn test_fal_direct_auth_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid key"))
        .mount(&server)
        .await;

    let provider = FalAiProvider::new(&fal_config(&server), &options(dir.path())).unwrap();
    let err = provider.generate("a fox", "fox", "recraft").await.unwrap_err();

    assert_eq!(classify(&err.to_string()), Some(FailureCategory::Auth));
}

#[tokio::test]
async fn test_fal_probe_accepts_validation_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/direct/fal-ai/flux/schnell"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let provider = FalAiProvider::new(&fal_config(&server), &options(dir.path())).unwrap();
    assert!(provider.probe().await);
}

#[tokio::test]
async fn test_fal_probe_rejects_outage() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/direct/fal-ai/flux/schnell"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let provider = FalAiProvider::new(&fal_config(&server), &options(dir.path())).unwrap();
    assert!(!provider.probe().await);
}
