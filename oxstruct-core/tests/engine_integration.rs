//! End-to-end engine tests against a mock provider.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use oxstruct_core::api::ApiClient;
use oxstruct_core::attach::spec::{AttachKind, AttachmentSpec, Target};
use oxstruct_core::attach::RoutingPlan;
use oxstruct_core::cleanup::CleanupLedger;
use oxstruct_core::engine::params::SamplingParams;
use oxstruct_core::engine::{EngineOptions, ExecutionEngine};
use oxstruct_core::error::OxError;
use oxstruct_core::fileio::identity::HashAlgorithm;
use oxstruct_core::safeguards::UnattendedGuard;
use oxstruct_core::services::{ServiceContainer, ToolsConfig};
use oxstruct_core::tools::code_exec::{CodeExecConfig, DownloadStrategy};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn answer_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"k": {"type": "integer"}},
        "required": ["k"]
    })
}

fn code_exec_plan(file: std::path::PathBuf) -> RoutingPlan {
    let spec = AttachmentSpec {
        alias: "data".to_string(),
        path: file,
        targets: [Target::CodeExec].into_iter().collect::<BTreeSet<_>>(),
        kind: AttachKind::File,
        recursive: false,
        glob: None,
        from_collection: false,
        collection_alias: None,
        ignore_ignore_file: false,
        ignore_file_override: None,
    };
    RoutingPlan::build(vec![spec]).unwrap()
}

fn engine_for(
    server: &MockServer,
    download_dir: std::path::PathBuf,
    strategy: DownloadStrategy,
    timeout: Duration,
) -> ExecutionEngine {
    let client = ApiClient::with_base_url("test-key", server.uri());
    let ledger = Arc::new(CleanupLedger::new());
    let tools_config = ToolsConfig {
        code_exec: CodeExecConfig {
            download_dir,
            ..CodeExecConfig::default()
        },
        ..ToolsConfig::default()
    };
    let services = ServiceContainer::new(
        client.clone(),
        ledger,
        HashAlgorithm::Sha256,
        tools_config,
    )
    .unwrap();
    let options = EngineOptions {
        model: "gpt-4o".to_string(),
        schema: answer_schema(),
        schema_name: "answer".to_string(),
        params: SamplingParams::default(),
        web_search: false,
        azure_endpoint: false,
        strategy_override: Some(strategy),
        cleanup_on_success: true,
        context_limit: None,
    };
    ExecutionEngine::new(client, services, UnattendedGuard::new(timeout), options)
}

fn raw_pass_response() -> Value {
    json!({
        "id": "resp_raw",
        "output": [{
            "type": "message",
            "content": [{
                "text": "ran the analysis\n===BEGIN_JSON===\n{\"k\": 1}\n===END_JSON===",
                "annotations": [{
                    "type": "container_file_citation",
                    "file_id": "cfile_plot",
                    "container_id": "cont_1",
                    "filename": "plot.png"
                }]
            }]
        }]
    })
}

fn strict_pass_response() -> Value {
    json!({
        "id": "resp_strict",
        "output": [{
            "type": "message",
            "content": [{"text": "{\"k\": 1}", "annotations": []}]
        }],
        "output_text": "{\"k\": 1}"
    })
}

async fn mount_common(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file_up"})))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

#[tokio::test]
async fn two_pass_sentinel_happy_path() {
    let server = MockServer::start().await;
    mount_common(&server).await;

    // The strict pass carries the json_schema format; mount it first so the
    // raw pass falls through to the catch-all responses mock.
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_string_contains("json_schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(strict_pass_response()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(raw_pass_response()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/containers/cont_1/files/cfile_plot/content"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "8"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/containers/cont_1/files/cfile_plot/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNGBYTES".to_vec()))
        .mount(&server)
        .await;

    let workdir = TempDir::new().unwrap();
    let data = workdir.path().join("data.csv");
    std::fs::write(&data, "a,b\n1,2\n").unwrap();
    let downloads = workdir.path().join("downloads");

    let engine = engine_for(
        &server,
        downloads.clone(),
        DownloadStrategy::TwoPassSentinel,
        Duration::from_secs(30),
    );
    let plan = code_exec_plan(data);

    let outcome = engine
        .execute(&plan, "system", "analyze the data", &[])
        .await
        .unwrap();

    assert_eq!(outcome.value, json!({"k": 1}));
    // Hidden raw text reflects the strict (second) pass.
    assert_eq!(outcome.raw_text, "{\"k\": 1}");
    assert_eq!(outcome.downloaded_files.len(), 1);
    assert!(outcome.downloaded_files[0].ends_with("plot.png"));
    assert_eq!(
        std::fs::read(&outcome.downloaded_files[0]).unwrap(),
        b"PNGBYTES"
    );
}

#[tokio::test]
async fn two_pass_without_sentinel_falls_back_to_single_pass() {
    let server = MockServer::start().await;
    mount_common(&server).await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_string_contains("json_schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(strict_pass_response()))
        .expect(1)
        .mount(&server)
        .await;
    // Raw pass returns prose with no sentinel block.
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "resp_raw",
            "output": [{
                "type": "message",
                "content": [{"text": "I ran the tools but forgot the markers.", "annotations": []}]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let workdir = TempDir::new().unwrap();
    let data = workdir.path().join("data.csv");
    std::fs::write(&data, "a,b\n").unwrap();

    let engine = engine_for(
        &server,
        workdir.path().join("downloads"),
        DownloadStrategy::TwoPassSentinel,
        Duration::from_secs(30),
    );
    let plan = code_exec_plan(data);

    let outcome = engine
        .execute(&plan, "system", "analyze", &[])
        .await
        .unwrap();

    // Exactly two requests were issued (raw + fallback), enforced by the
    // expect() counters above, and the object still validates.
    assert_eq!(outcome.value, json!({"k": 1}));
    assert!(outcome.downloaded_files.is_empty());
}

#[tokio::test]
async fn single_pass_validates_and_cleans_up() {
    let server = MockServer::start().await;
    mount_common(&server).await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(strict_pass_response()))
        .expect(1)
        .mount(&server)
        .await;

    let workdir = TempDir::new().unwrap();
    let data = workdir.path().join("data.csv");
    std::fs::write(&data, "a,b\n").unwrap();

    let engine = engine_for(
        &server,
        workdir.path().join("downloads"),
        DownloadStrategy::SinglePass,
        Duration::from_secs(30),
    );
    let plan = code_exec_plan(data);

    let outcome = engine.execute(&plan, "system", "go", &[]).await.unwrap();
    assert_eq!(outcome.value, json!({"k": 1}));

    // The uploaded file was deleted during cleanup.
    let deletes: usize = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "DELETE")
        .count();
    assert_eq!(deletes, 1);
}

#[tokio::test]
async fn schema_violating_response_is_an_api_error() {
    let server = MockServer::start().await;
    mount_common(&server).await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": [],
            "output_text": "{\"k\": \"not-an-integer\"}"
        })))
        .mount(&server)
        .await;

    let workdir = TempDir::new().unwrap();
    let data = workdir.path().join("data.csv");
    std::fs::write(&data, "a\n").unwrap();

    let engine = engine_for(
        &server,
        workdir.path().join("downloads"),
        DownloadStrategy::SinglePass,
        Duration::from_secs(30),
    );
    let plan = code_exec_plan(data);

    let err = engine.execute(&plan, "system", "go", &[]).await.unwrap_err();
    assert!(matches!(err, OxError::Api { .. }));
}

#[tokio::test]
async fn deadline_expiry_cleans_up_uploads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file_slow"})))
        .mount(&server)
        .await;
    // The LLM call hangs past the deadline.
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(strict_pass_response())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/files/file_slow"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let workdir = TempDir::new().unwrap();
    let data = workdir.path().join("data.csv");
    std::fs::write(&data, "a\n").unwrap();

    let engine = engine_for(
        &server,
        workdir.path().join("downloads"),
        DownloadStrategy::SinglePass,
        Duration::from_millis(500),
    );
    let plan = code_exec_plan(data);

    let err = engine.execute(&plan, "system", "go", &[]).await.unwrap_err();
    assert!(matches!(err, OxError::Timeout { .. }));
    // The expect(1) on the DELETE mock asserts the uploaded id was freed.
}

#[tokio::test]
async fn token_gate_blocks_before_any_upload() {
    let server = MockServer::start().await;
    // No mocks mounted: any request would 404 and, more importantly, be
    // recorded.

    let workdir = TempDir::new().unwrap();
    let data = workdir.path().join("data.csv");
    std::fs::write(&data, "a\n").unwrap();
    let big = workdir.path().join("big.txt");
    std::fs::write(&big, "word ".repeat(200_000)).unwrap();

    let client = ApiClient::with_base_url("test-key", server.uri());
    let ledger = Arc::new(CleanupLedger::new());
    let services = ServiceContainer::new(
        client.clone(),
        ledger,
        HashAlgorithm::Sha256,
        ToolsConfig::default(),
    )
    .unwrap();
    let options = EngineOptions {
        model: "gpt-4o".to_string(),
        schema: answer_schema(),
        schema_name: "answer".to_string(),
        params: SamplingParams::default(),
        web_search: false,
        azure_endpoint: false,
        strategy_override: None,
        cleanup_on_success: true,
        context_limit: Some(8_000),
    };
    let engine = ExecutionEngine::new(
        client,
        services,
        UnattendedGuard::new(Duration::from_secs(30)),
        options,
    );
    let plan = code_exec_plan(data);

    let err = engine
        .execute(&plan, "system", "summarize", &[big])
        .await
        .unwrap_err();
    assert!(matches!(err, OxError::PromptTooLarge { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn approval_requiring_endpoint_fails_before_any_request() {
    use oxstruct_core::tools::remote::{ApprovalMode, RemoteEndpoint};

    let server = MockServer::start().await;
    let mut endpoint = RemoteEndpoint::parse("helper@https://tools.example/mcp").unwrap();
    endpoint.approval = ApprovalMode::User;

    let client = ApiClient::with_base_url("test-key", server.uri());
    let err = ServiceContainer::new(
        client,
        Arc::new(CleanupLedger::new()),
        HashAlgorithm::Sha256,
        ToolsConfig {
            endpoints: vec![endpoint],
            ..ToolsConfig::default()
        },
    )
    .err()
    .expect("construction must fail");

    assert!(matches!(err, OxError::PolicyViolation(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn dry_run_reports_without_remote_calls() {
    let server = MockServer::start().await;
    let workdir = TempDir::new().unwrap();
    let data = workdir.path().join("data.csv");
    std::fs::write(&data, "a\n").unwrap();

    let engine = engine_for(
        &server,
        workdir.path().join("downloads"),
        DownloadStrategy::SinglePass,
        Duration::from_secs(30),
    );
    let plan = code_exec_plan(data);

    let report = engine
        .validate_only(&plan, "system", "analyze", &[])
        .await
        .unwrap();
    assert!(report.prompt_tokens > 0);
    assert_eq!(report.enabled_tools, vec!["code-exec"]);
    assert_eq!(report.strict_schema["additionalProperties"], json!(false));
    assert!(server.received_requests().await.unwrap().is_empty());
}
