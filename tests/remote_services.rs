//! Remote clients against a local mock HTTP server.

use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vidmorph::remote::{
    run_job, CartesiaClient, CloneOptions, LipSyncClient, LipSyncRequest, ScriptWriter,
    SystemClock, TtsRequest, WaitPolicy,
};
use vidmorph::PipelineError;

fn fast_policy() -> WaitPolicy {
    WaitPolicy::new(Duration::from_millis(10), Duration::from_secs(5))
}

#[test]
fn lipsync_job_runs_to_download() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        let output_url = format!("{}/files/out.mp4", server.uri());

        Mock::given(method("POST"))
            .and(path("/v2/generate"))
            .and(header("x-api-key", "sync-key"))
            .and(body_partial_json(json!({"model": "lipsync-1.9.0-beta"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "job-1", "status": "PENDING"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/generate/job-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "job-1", "status": "PROCESSING"})),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/generate/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "job-1",
                "status": "COMPLETED",
                "outputUrl": output_url
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/files/out.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 2048]))
            .expect(1)
            .mount(&server)
            .await;

        server
    });

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("synced.mp4");
    let client = LipSyncClient::new(server.uri(), "sync-key").unwrap();
    let request = LipSyncRequest::with_audio("http://media/video", "http://media/audio");

    let done = run_job(&client, &request, &fast_policy(), &SystemClock::new(), &dest).unwrap();

    assert_eq!(done.job_id, "job-1");
    assert_eq!(done.bytes, 2048);
    assert!(done.output_url.ends_with("/files/out.mp4"));
    assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 2048]);

    rt.block_on(server.verify());
}

#[test]
fn rejected_submission_reports_status_and_body() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/generate"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;
        server
    });

    let dir = tempfile::tempdir().unwrap();
    let client = LipSyncClient::new(server.uri(), "wrong").unwrap();
    let request = LipSyncRequest::with_audio("http://media/video", "http://media/audio");
    let err = run_job(
        &client,
        &request,
        &fast_policy(),
        &SystemClock::new(),
        &dir.path().join("out.mp4"),
    )
    .unwrap_err();

    match err {
        PipelineError::RemoteSubmission { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!dir.path().join("out.mp4").exists());
}

#[test]
fn failed_job_carries_the_payload() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "job-2", "status": "PENDING"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/generate/job-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "job-2",
                "status": "FAILED",
                "error": "face not found"
            })))
            .mount(&server)
            .await;
        server
    });

    let dir = tempfile::tempdir().unwrap();
    let client = LipSyncClient::new(server.uri(), "sync-key").unwrap();
    let request = LipSyncRequest::with_audio("http://media/video", "http://media/audio");
    let err = run_job(
        &client,
        &request,
        &fast_policy(),
        &SystemClock::new(),
        &dir.path().join("out.mp4"),
    )
    .unwrap_err();

    match err {
        PipelineError::RemoteJobFailed { job_id, payload } => {
            assert_eq!(job_id, "job-2");
            assert_eq!(payload["error"], "face not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn tts_writes_audio_bytes() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tts/bytes"))
            .and(header("x-api-key", "cartesia-key"))
            .and(header("cartesia-version", "2024-11-13"))
            .and(body_partial_json(json!({
                "model_id": "sonic-2",
                "transcript": "hello there",
                "voice": {"id": "voice-1"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3fake-mp3".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        server
    });

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("speech.mp3");
    let client = CartesiaClient::new(server.uri(), "cartesia-key").unwrap();
    let written = client
        .tts(&TtsRequest::new("voice-1", "hello there"), &dest)
        .unwrap();

    assert_eq!(written, 11);
    assert_eq!(std::fs::read(&dest).unwrap(), b"ID3fake-mp3");
    rt.block_on(server.verify());
}

#[test]
fn clone_voice_uploads_the_clip() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/voices/clone"))
            .and(header("cartesia-version", "2024-06-10"))
            .and(body_string_contains("name=\"clip\""))
            .and(body_string_contains("RIFFsample"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "voice-9",
                "name": "Narrator",
                "language": "en"
            })))
            .mount(&server)
            .await;
        server
    });

    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("sample.wav");
    std::fs::write(&clip, b"RIFFsample").unwrap();

    let client = CartesiaClient::new(server.uri(), "cartesia-key").unwrap();
    let options = CloneOptions {
        name: "Narrator".into(),
        ..CloneOptions::default()
    };
    let voice = client.clone_voice(&clip, &options).unwrap();

    assert_eq!(voice.id, "voice-9");
    assert_eq!(voice.name.as_deref(), Some("Narrator"));
}

#[test]
fn script_is_trimmed_and_truncated() {
    let long = format!("  {}  ", "a".repeat(200));
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer groq-key"))
            .and(body_string_contains("data:image/jpeg;base64,"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": long}}]
            })))
            .mount(&server)
            .await;
        server
    });

    let writer = ScriptWriter::new(server.uri(), "groq-key").unwrap();
    let script = writer.write_script_for_bytes(&[0xff, 0xd8, 0xff]).unwrap();

    assert_eq!(script, "a".repeat(150));
}

#[test]
fn non_success_poll_is_a_request_error() {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "job-3", "status": "PENDING"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/generate/job-3"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;
        server
    });

    let dir = tempfile::tempdir().unwrap();
    let client = LipSyncClient::new(server.uri(), "sync-key").unwrap();
    let request = LipSyncRequest::with_audio("http://media/video", "http://media/audio");
    let err = run_job(
        &client,
        &request,
        &fast_policy(),
        &SystemClock::new(),
        &dir.path().join("out.mp4"),
    )
    .unwrap_err();

    assert!(matches!(err, PipelineError::RemoteRequest { status: 503, .. }));
}
