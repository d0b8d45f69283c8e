// crates/seqrun-client/tests/http_api.rs
// ============================================================================
// Module: HTTP Transport Tests
// Description: Wire-level tests for the job service client and blob router.
// Purpose: Verify request shapes, credentials, and status handling over HTTP.
// Dependencies: seqrun-client, seqrun-config, seqrun-core, tempfile, tiny_http, url
// ============================================================================
//! ## Overview
//! Runs the HTTP job API and HTTP blob store against [`common::MockHttpService`].

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::ECHO_OUTPUT;
use common::ECHO_TOOL;
use common::MockHttpService;
use common::echo_tool;
use common::fast_settings;
use common::registry_with;
use seqrun_client::BlobRouter;
use seqrun_client::BlobTransfer;
use seqrun_client::FileTransfer;
use seqrun_client::HttpJobApi;
use seqrun_client::RemoteJobApi;
use seqrun_client::RunOutcome;
use seqrun_client::RunRequest;
use seqrun_client::SeqrunClient;
use seqrun_client::TransportError;
use seqrun_config::ApiKey;
use seqrun_config::StorageConfig;
use seqrun_core::CancellationToken;
use seqrun_core::RemoteJobId;
use seqrun_core::RemoteProbe;
use tempfile::tempdir;
use url::Url;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const KEY: &str = "test-key";

fn api_for(service: &MockHttpService, key: &str) -> HttpJobApi {
    let base = Url::parse(&service.base_url()).unwrap();
    HttpJobApi::new(&base, ApiKey::new(key).unwrap(), Duration::from_secs(5)).unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn serial_run_over_http_follows_the_protocol() {
    let service = MockHttpService::start(KEY);
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.txt");
    fs::write(&input, "over the wire\n").unwrap();
    let router = BlobRouter::http(None).unwrap();
    let api: Arc<dyn RemoteJobApi> = Arc::new(api_for(&service, KEY));
    let transfer: Arc<dyn FileTransfer> =
        Arc::new(BlobTransfer::new(router.clone(), StorageConfig::default()));
    let client = SeqrunClient::builder(api, transfer)
        .probe(Arc::new(router))
        .registry(registry_with(echo_tool(false, 1024)))
        .settings(fast_settings(dir.path()))
        .build();
    let out = dir.path().join("out");

    let outcome = client
        .run(
            &RunRequest::new(ECHO_TOOL, input.as_path()).output_dir(&out).args("--fast"),
            &CancellationToken::new(),
        )
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(fs::read_to_string(out.join(ECHO_OUTPUT)).unwrap(), "over the wire\n");

    let log = service.log();
    assert_eq!(log.requests.first().map(String::as_str), Some("GET /auth/validate"));
    assert!(log.authorizations.iter().all(|value| value == "Bearer test-key"));
    let created = log.created.as_ref().unwrap();
    assert_eq!(created["tool_name"], ECHO_TOOL);
    assert_eq!(created["tool_args"], "--fast");
    assert_eq!(created["output_file_name"], ECHO_OUTPUT);
    assert!(created.get("instance_size").is_none());
    let statuses: Vec<String> = log
        .statuses
        .iter()
        .map(|body| {
            let value: serde_json::Value = serde_json::from_str(body).unwrap();
            value["status"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            "transferring_from_client",
            "transferred_from_client",
            "transferring_to_client",
            "transferred_to_client",
        ]
    );
    assert!(log.requests.iter().any(|line| line == "PUT /upload/sample.txt"));
}

#[test]
fn rejected_key_is_unauthorized() {
    let service = MockHttpService::start(KEY);
    let api = api_for(&service, "wrong-key");
    assert_eq!(
        api.validate_key().unwrap_err(),
        TransportError::Unauthorized("http status 401".to_string())
    );
}

#[test]
fn error_statuses_keep_the_response_body() {
    let service = MockHttpService::start(KEY);
    let api = api_for(&service, KEY);
    let err = api.status(&RemoteJobId::new("missing")).unwrap_err();
    assert_eq!(
        err,
        TransportError::Status {
            code: 404,
            body: "no such job".to_string(),
        }
    );
}

#[test]
fn http_probe_reports_object_size() {
    let service = MockHttpService::start(KEY);
    let router = BlobRouter::http(None).unwrap();
    let size = router.probe(&format!("{}/blob/{ECHO_OUTPUT}", service.base_url())).unwrap();
    assert_eq!(size, 0);
}

#[test]
fn unsupported_schemes_are_rejected() {
    let router = BlobRouter::http(None).unwrap();
    let dir = tempdir().unwrap();
    let err = router.get_to_file("ftp://host/file.txt", &dir.path().join("file.txt")).unwrap_err();
    assert_eq!(err, TransportError::UnsupportedScheme("ftp".to_string()));
}

#[test]
fn downloads_without_location_are_rejected() {
    let transfer = BlobTransfer::new(BlobRouter::http(None).unwrap(), StorageConfig::default());
    let dir = tempdir().unwrap();
    let err = transfer
        .download(&seqrun_client::DownloadTarget::default(), &dir.path().join("out"))
        .unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)), "{err:?}");
}
