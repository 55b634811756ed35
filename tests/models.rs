//! Integration tests for the model manager and atomic downloads

mod common;

use common::{serve_bytes, silent_server, FakeBackend};
use std::sync::Arc;
use std::time::Duration;
use vlmsetup::cli::{ModelArtifact, ProjectorFile};
use vlmsetup::errors::SetupError;
use vlmsetup::inference::InferenceBackend;
use vlmsetup::models::download::{fetch_to_file, part_path, FetchOutcome};
use vlmsetup::models::{
    DownloadOutcome, DownloadProgress, ModelManager, ModelSource, OllamaBackend, PullProgress,
};

fn backend_entry(tag: &str) -> ModelArtifact {
    ModelArtifact {
        id: tag.to_string(),
        name: tag.to_string(),
        description: "backend model".to_string(),
        size_bytes: Some(4 * 1024 * 1024 * 1024),
        family: None,
        file: None,
        url: None,
        projector: None,
        tag: Some(tag.to_string()),
    }
}

fn file_entry(base_url: &str) -> ModelArtifact {
    ModelArtifact {
        id: "minicpm_v26_q8".to_string(),
        name: "MiniCPM-V 2.6 Q8".to_string(),
        description: "file artifact".to_string(),
        size_bytes: Some(11),
        family: Some("minicpm_v26".to_string()),
        file: Some("model.gguf".to_string()),
        url: Some(format!("{}/model.gguf", base_url)),
        projector: Some(ProjectorFile {
            file: "mmproj-model-f16.gguf".to_string(),
            url: format!("{}/mmproj.gguf", base_url),
        }),
        tag: None,
    }
}

fn keep_going(_: &DownloadProgress) -> bool {
    true
}

#[tokio::test]
async fn test_backend_download_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::default());
    let manager = ModelManager::new(
        vec![backend_entry("llava:7b")],
        dir.path().to_path_buf(),
        backend.clone(),
    )
    .unwrap();

    let first = manager.download("llava:7b", &mut keep_going).await.unwrap();
    let second = manager.download("llava:7b", &mut keep_going).await.unwrap();

    assert_eq!(first, DownloadOutcome::Downloaded(None));
    assert_eq!(second, DownloadOutcome::AlreadyPresent);
    assert_eq!(backend.count("pull"), 1);
}

#[tokio::test]
async fn test_latest_tag_counts_as_present() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::with_installed(&["qwen2.5vl:latest"]));
    let manager = ModelManager::new(Vec::new(), dir.path().to_path_buf(), backend.clone()).unwrap();

    assert!(manager.is_locally_present("qwen2.5vl").await);
    assert!(!manager.is_locally_present("qwen2.5vl:7b").await);
}

#[tokio::test]
async fn test_file_artifact_download_then_present() {
    let dir = tempfile::tempdir().unwrap();
    let base = serve_bytes(b"GGUF-bytes!".to_vec()).await;
    let backend = Arc::new(FakeBackend::default());
    let manager = ModelManager::new(
        vec![file_entry(&base)],
        dir.path().to_path_buf(),
        backend.clone(),
    )
    .unwrap();

    let mut updates = 0;
    let mut count = |_: &DownloadProgress| {
        updates += 1;
        true
    };
    let outcome = manager.download("minicpm_v26_q8", &mut count).await.unwrap();

    let model = dir.path().join("minicpm_v26").join("model.gguf");
    let projector = dir.path().join("minicpm_v26").join("mmproj-model-f16.gguf");
    assert_eq!(outcome, DownloadOutcome::Downloaded(Some(model.clone())));
    assert_eq!(std::fs::read(&model).unwrap(), b"GGUF-bytes!");
    assert!(projector.exists());
    assert!(!part_path(&model).exists());
    assert!(updates >= 2);

    let again = manager.download("minicpm_v26_q8", &mut keep_going).await.unwrap();
    assert_eq!(again, DownloadOutcome::AlreadyPresent);
    assert_eq!(backend.count("pull"), 0);
}

#[tokio::test]
async fn test_cancelled_fetch_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let base = serve_bytes(vec![7u8; 64 * 1024]).await;
    let dest = dir.path().join("model.gguf");
    let client = reqwest::Client::new();

    let mut cancel = |_: &DownloadProgress| false;
    let outcome = fetch_to_file(
        &client,
        &format!("{}/model.gguf", base),
        &dest,
        "model.gguf",
        Duration::from_secs(5),
        &mut cancel,
    )
    .await
    .unwrap();

    assert_eq!(outcome, FetchOutcome::Cancelled);
    assert!(!dest.exists());
    assert!(!part_path(&dest).exists());
}

#[tokio::test]
async fn test_list_marks_presence_and_appends_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::with_installed(&["llava:7b", "moondream:latest"]));
    let manager = ModelManager::new(
        vec![backend_entry("llava:7b"), backend_entry("qwen2.5vl:7b")],
        dir.path().to_path_buf(),
        backend.clone(),
    )
    .unwrap();

    let listed = manager.list_remote_models().await.unwrap();

    assert_eq!(listed.len(), 3);
    assert!(listed[0].locally_present);
    assert!(!listed[1].locally_present);
    assert_eq!(listed[2].id, "moondream:latest");
    assert_eq!(listed[2].source, ModelSource::Backend);
    assert_eq!(backend.count("list"), 1);
}

#[tokio::test]
async fn test_silent_download_server_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let base = silent_server().await;
    let manager = ModelManager::new(
        vec![file_entry(&base)],
        dir.path().to_path_buf(),
        Arc::new(FakeBackend::default()),
    )
    .unwrap()
    .with_idle_timeout(Duration::from_millis(300));

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        manager.download("minicpm_v26_q8", &mut keep_going),
    )
    .await
    .expect("download must not block on a silent server");

    assert!(matches!(result, Err(SetupError::Timeout { duration_ms: 300 })));
    let model = dir.path().join("minicpm_v26").join("model.gguf");
    assert!(!model.exists());
    assert!(!part_path(&model).exists());
}

#[tokio::test]
async fn test_silent_pull_times_out() {
    let base = silent_server().await;
    let backend = OllamaBackend::new(&base, Duration::from_secs(1))
        .unwrap()
        .with_stream_idle_timeout(Duration::from_millis(300));

    let mut keep = |_: &PullProgress| true;
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        backend.pull_model("llava:7b", &mut keep),
    )
    .await
    .expect("pull must not block on a silent server");

    assert!(matches!(result, Err(SetupError::Timeout { .. })));
}
