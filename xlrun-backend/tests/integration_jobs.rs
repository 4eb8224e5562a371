use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use xlrun_backend::handlers::jobs;
use xlrun_backend::state::AppState;
use xlrun_config::Config;
use xlrun_job_queue::{JobQueue, QueueSettings};
use xlrun_jobs::{builtin_routines, ExecutionAdapter};

const BOUNDARY: &str = "xlrun-test-boundary";

struct TestApp {
    _data: tempfile::TempDir,
    router: Router,
    state: Arc<AppState>,
}

fn test_config(data_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_string_lossy().into_owned();
    config.runner.max_upload_mb = 1;
    config.runner.poll_interval_ms = 20;
    config
}

fn test_app(start: bool) -> TestApp {
    let data = tempfile::tempdir().expect("tempdir");
    let config = test_config(data.path());
    let adapter = ExecutionAdapter::from_config(&config, builtin_routines()).expect("adapter");
    let settings = QueueSettings::default().with_poll_interval(Duration::from_millis(20));
    let queue = JobQueue::new(Arc::new(adapter), settings);
    if start {
        queue.start().expect("start queue");
    }
    let state = Arc::new(AppState::new(config, queue));
    TestApp {
        _data: data,
        router: xlrun_backend::build_router(state.clone()),
        state,
    }
}

fn multipart(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, content) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, bytes.to_vec())
}

async fn send_json(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn upload_request(files: &[(&str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart(files)))
        .unwrap()
}

fn run_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/run")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn upload_session(app: &TestApp) -> String {
    let (status, body) = send_json(
        app,
        upload_request(&[("Orario Docenti.xlsx", b"sheet-a"), ("aule.XLSX", b"sheet-b")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "upload: {body}");
    body["session_id"].as_str().expect("session_id").to_string()
}

async fn wait_for_terminal(app: &TestApp, job_id: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let (status, body) = send_json(app, get(&format!("/status/{job_id}"))).await;
            assert_eq!(status, StatusCode::OK);
            if matches!(body["status"].as_str(), Some("succeeded") | Some("failed")) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not finish")
}

#[tokio::test]
async fn upload_run_and_collect_results() {
    let app = test_app(true);
    let session_id = upload_session(&app).await;

    let (status, body) = send_json(
        &app,
        run_request(json!({ "session_id": session_id, "options": { "week": 12 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "run: {body}");
    let job_id = body["job_id"].as_str().expect("job_id").to_string();

    let finished = wait_for_terminal(&app, &job_id).await;
    assert_eq!(finished["status"], "succeeded");
    assert_eq!(finished["progress"], 100);
    assert!(finished["finished_at"].is_string());

    let (status, log) = send(&app, get(&format!("/logs/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let log = String::from_utf8(log).unwrap();
    assert!(log.contains(&format!("=== Job {job_id} ===")));
    assert!(log.contains("Orario_Docenti.xlsx"));

    let (status, results) = send_json(&app, get(&format!("/results/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = results
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["filename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["report.txt", "result_example.csv"]);
    assert_eq!(
        results[0]["download_url"],
        format!("/download/{job_id}/report.txt")
    );

    let (status, report) = send(&app, get(&format!("/download/{job_id}/report.txt"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(report).unwrap().contains("\"week\":12"));

    let (status, _) = send(&app, get(&format!("/download/{job_id}/../../inputs/aule.XLSX"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get(&format!("/download/{job_id}/nope.csv"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let archive = app
        .router
        .clone()
        .oneshot(get(&format!("/download/{job_id}/all.zip")))
        .await
        .expect("response");
    assert_eq!(archive.status(), StatusCode::OK);
    assert_eq!(archive.headers()[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        archive.headers()[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"results_{job_id}.zip\"").as_str()
    );
    let bytes = axum::body::to_bytes(archive.into_body(), usize::MAX)
        .await
        .expect("body");
    let zipped = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).expect("zip");
    let mut entries: Vec<&str> = zipped.file_names().collect();
    entries.sort();
    assert_eq!(
        entries,
        vec!["_OK.txt", "job.log", "report.txt", "result_example.csv"]
    );

    // The archive is built on demand and never joins the result listing.
    let (_, results) = send_json(&app, get(&format!("/results/{job_id}"))).await;
    assert_eq!(results.as_array().unwrap().len(), 2);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/jobs/{job_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, _) = send(&app, get(&format!("/status/{job_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    app.state.job_queue.shutdown().await;
}

#[tokio::test]
async fn missing_required_inputs_fail_the_job() {
    let app = test_app(true);
    let session_id = upload_session(&app).await;

    let (_, body) = send_json(
        &app,
        run_request(json!({
            "session_id": session_id,
            "options": { "required_inputs": ["docenti.xlsx"] }
        })),
    )
    .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let finished = wait_for_terminal(&app, &job_id).await;
    assert_eq!(finished["status"], "failed");
    assert!(finished["message"].as_str().unwrap().contains('1'));

    let (_, results) = send_json(&app, get(&format!("/results/{job_id}"))).await;
    assert_eq!(results[0]["filename"], "ERROR_MISSING_INPUTS.txt");
    app.state.job_queue.shutdown().await;
}

#[tokio::test]
async fn upload_rejects_bad_extension_and_oversized_batches() {
    let app = test_app(false);

    let (status, body) = send_json(&app, upload_request(&[("notes.txt", b"text")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains(".txt"));

    let big = vec![0u8; 700 * 1024];
    let (status, _) = send(&app, upload_request(&[("a.xlsx", &big), ("b.xlsx", &big)])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    // Rejected uploads leave no session behind.
    let sessions = app.state.data_dir().join("sessions");
    let leftover = std::fs::read_dir(&sessions).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn run_requires_a_known_session() {
    let app = test_app(false);

    let (status, _) = send(&app, run_request(json!({ "session_id": uuid::Uuid::new_v4() }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, run_request(json!({ "options": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let app = test_app(false);
    let unknown = uuid::Uuid::new_v4();

    for uri in [
        format!("/status/{unknown}"),
        format!("/logs/{unknown}"),
        format!("/results/{unknown}"),
        format!("/download/{unknown}/report.txt"),
        "/status/not-a-uuid".to_string(),
    ] {
        let (status, _) = send(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn queued_job_cannot_be_deleted() {
    // Engine not started: the job stays queued.
    let app = test_app(false);
    let session_id = upload_session(&app).await;
    let (_, body) = send_json(&app, run_request(json!({ "session_id": session_id }))).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let mut path = HashMap::new();
    path.insert("jobId".to_string(), job_id.clone());
    let err = jobs::delete::delete(
        axum::Extension(app.state.clone()),
        axum::extract::Path(path.clone()),
    )
    .await
    .expect_err("queued job must not be deleted");
    assert_eq!(err.status(), StatusCode::CONFLICT);

    let status = jobs::status::status(
        axum::Extension(app.state.clone()),
        axum::extract::Path(path),
    )
    .await
    .expect("status");
    assert_eq!(status.0["status"], "queued");
    assert!(status.0["started_at"].is_null());
}

#[tokio::test]
async fn idle_sessions_are_reclaimed_unless_jobs_reference_them() {
    // Engine not started: the job for `busy` stays registered.
    let app = test_app(false);
    let busy = upload_session(&app).await;
    let (status, _) = send_json(&app, run_request(json!({ "session_id": busy }))).await;
    assert_eq!(status, StatusCode::OK);
    let idle = upload_session(&app).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let removed = app.state.reclaim_idle_sessions(Duration::ZERO).await;
    assert_eq!(removed, 1);

    let busy_id = uuid::Uuid::parse_str(&busy).unwrap();
    let idle_id = uuid::Uuid::parse_str(&idle).unwrap();
    assert!(app.state.session(busy_id).is_some());
    assert!(app.state.session(idle_id).is_none());
    let sessions = app.state.data_dir().join("sessions");
    assert!(sessions.join(&busy).exists());
    assert!(!sessions.join(&idle).exists());

    let (status, _) = send(&app, run_request(json!({ "session_id": idle }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Sessions younger than the TTL are kept.
    let fresh = upload_session(&app).await;
    assert_eq!(app.state.reclaim_idle_sessions(Duration::from_secs(3600)).await, 0);
    assert!(sessions.join(&fresh).exists());
}
