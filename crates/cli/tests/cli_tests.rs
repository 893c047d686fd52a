#![allow(missing_docs)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMMIT: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

fn hubfetch(server: &MockServer, temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hubfetch").unwrap();
    cmd.env_remove("HF_TOKEN")
        .env_remove("RUST_LOG")
        .env("HF_ENDPOINT", server.uri())
        .env("HF_HUB_CACHE", temp.path().join("hub"));
    cmd
}

#[test]
fn test_help() {
    Command::cargo_bin("hubfetch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("REPO_ID"))
        .stdout(predicate::str::contains("--max-parallel"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_prints_snapshot_dir() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/api/models/org/tiny-model/tree/main"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-repo-commit", COMMIT)
                .set_body_json(json!([
                    {"type": "file", "path": "config.json", "oid": "abc123", "size": 2},
                    {"type": "file", "path": "README.md", "oid": "def456", "size": 10}
                ])),
        )
        .mount(&server)
        .await;
    let file = format!("/org/tiny-model/resolve/{COMMIT}/config.json");
    Mock::given(method("HEAD"))
        .and(path(file.as_str()))
        .respond_with(ResponseTemplate::new(200).insert_header("x-linked-size", "2"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(file.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = temp
        .path()
        .join("hub")
        .join("models--org--tiny-model")
        .join("snapshots")
        .join(COMMIT);

    hubfetch(&server, &temp)
        .args(["org/tiny-model", "main"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Downloading model: org/tiny-model (revision: main)",
        ))
        .stdout(predicate::str::contains(format!(
            "Downloaded to: {}",
            snapshot.display()
        )));

    assert_eq!(std::fs::read(snapshot.join("config.json")).unwrap(), b"{}");
    assert!(!snapshot.join("README.md").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_repository_exits_with_error() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/api/models/org/missing/tree/main"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Repository not found"))
        .mount(&server)
        .await;

    hubfetch(&server, &temp)
        .arg("org/missing")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Downloading model: org/missing"))
        .stdout(predicate::str::contains("Downloaded to").not())
        .stderr(predicate::str::contains("Error downloading org/missing@main"));

    assert!(!temp.path().join("hub").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_custom_path_is_announced() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/api/models/org/empty/tree/v1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-repo-commit", COMMIT)
                .set_body_json(json!([])),
        )
        .mount(&server)
        .await;
    let local = temp.path().join("local");

    hubfetch(&server, &temp)
        .arg("org/empty")
        .arg("v1")
        .arg(&local)
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "Download location: {}",
            local.display()
        )));

    assert_eq!(
        std::fs::read_to_string(local.join("refs").join("v1")).unwrap(),
        COMMIT
    );
}

#[test]
fn test_invalid_ignore_pattern_fails() {
    let temp = TempDir::new().unwrap();
    Command::cargo_bin("hubfetch")
        .unwrap()
        .env("HF_HUB_CACHE", temp.path())
        .args(["org/tiny-model", "--ignore", "(unclosed"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid ignore pattern"));
}
