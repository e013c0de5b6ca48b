//! End-to-end tests against a spawned rollcall server
//!
//! Spawns the real binary with a scratch config and drives the
//! verification HTTP surface with an actual client, asserting on the
//! status codes the coordinator contract promises.

use serde_json::Value;
use std::{
    fs,
    path::PathBuf,
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};

use serial_test::serial;

const START_TIMEOUT: Duration = Duration::from_secs(20);

fn choose_port(offset: u16) -> u16 {
    if let Some(p) = std::env::var("ROLLCALL_TEST_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        return p;
    }
    48470 + offset + (std::process::id() as u16 % 1000)
}

fn write_fullstack_config(dir: &PathBuf, port: u16) -> PathBuf {
    let data_dir = dir.join("data");
    fs::create_dir_all(&data_dir).expect("create data dir");
    let config_path = dir.join("config.toml");
    fs::write(
        &config_path,
        format!(
            r#"
name = "rollcall-fullstack-test"
env = "test"
sqlite_path = "{sqlite}"

[bind]
host = "127.0.0.1"
port = {port}

[verification]
# 1-second minimum keeps the expiry test fast
ttl_min_secs = 1
ttl_max_secs = 7200
default_ttl_secs = 900
default_threshold = 0.75

[observability]
filter_level = "info"

[observability.log]
output = "console"
"#,
            sqlite = data_dir.display(),
            port = port,
        ),
    )
    .expect("write config");
    config_path
}

fn spawn_rollcall(config: &PathBuf, log_path: &PathBuf) -> Child {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_rollcall"));
    let log_file = fs::File::create(log_path).expect("create log file");
    Command::new(bin)
        .arg("--config")
        .arg(config)
        .stdout(Stdio::from(log_file.try_clone().expect("dup log")))
        .stderr(Stdio::from(log_file))
        .spawn()
        .expect("spawn rollcall")
}

async fn wait_for_health(url: &str, child: &mut Child, log_path: &PathBuf) {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap_or(None) {
            let log = fs::read_to_string(log_path).unwrap_or_default();
            panic!("rollcall exited early: status={status:?}\nlogs:\n{log}");
        }

        if let Ok(resp) = client.get(url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if start.elapsed() > START_TIMEOUT {
            let log = fs::read_to_string(log_path).unwrap_or_default();
            panic!("health check not ready at {}\nlogs:\n{}", url, log);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn shutdown(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[tokio::test]
#[serial]
async fn rollcall_end_to_end_verification_flow() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let port = choose_port(0);
    let config_path = write_fullstack_config(&tmp.path().to_path_buf(), port);
    let log_path = tmp.path().join("rollcall_fullstack.log");
    let mut child = spawn_rollcall(&config_path, &log_path);

    let base = format!("http://127.0.0.1:{port}/verification");
    wait_for_health(&format!("{base}/health"), &mut child, &log_path).await;

    let client = reqwest::Client::new();

    // Health JSON
    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("health json");
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["database"], "ok");

    // Create a request for two recipients
    let resp = client
        .post(format!("{base}/requests"))
        .json(&serde_json::json!({
            "initiator_id": "lecturer-1",
            "session_id": "session-e2e",
            "recipients": ["u1", "u2"],
            "title": "Live roll call"
        }))
        .send()
        .await
        .expect("create");
    assert_eq!(resp.status().as_u16(), 201);
    let created: Value = resp.json().await.expect("create json");
    assert_eq!(created["recipient_count"], 2);
    let request_id = created["request_id"].as_str().expect("request id").to_string();

    // A second create for the same session conflicts
    let resp = client
        .post(format!("{base}/requests"))
        .json(&serde_json::json!({
            "initiator_id": "lecturer-1",
            "session_id": "session-e2e",
            "recipients": ["u1"]
        }))
        .send()
        .await
        .expect("duplicate create");
    assert_eq!(resp.status().as_u16(), 409);

    // Progress starts empty
    let resp = client
        .get(format!("{base}/requests/{request_id}"))
        .send()
        .await
        .expect("status");
    assert_eq!(resp.status().as_u16(), 200);
    let status: Value = resp.json().await.expect("status json");
    assert_eq!(status["total_recipients"], 2);
    assert_eq!(status["total_verified"], 0);

    // An identity outside the recipient set is rejected
    let resp = client
        .post(format!("{base}/requests/{request_id}/verify"))
        .json(&serde_json::json!({
            "recipient_id": "u9",
            "feature_vector": [1.0, 0.0]
        }))
        .send()
        .await
        .expect("verify non-recipient");
    assert_eq!(resp.status().as_u16(), 400);

    // A recipient with no enrolled embedding surfaces a comparator failure
    let resp = client
        .post(format!("{base}/requests/{request_id}/verify"))
        .json(&serde_json::json!({
            "recipient_id": "u1",
            "feature_vector": [1.0, 0.0]
        }))
        .send()
        .await
        .expect("verify unenrolled");
    assert_eq!(resp.status().as_u16(), 502);

    // Cancel terminates both pending rows
    let resp = client
        .delete(format!("{base}/requests/{request_id}"))
        .send()
        .await
        .expect("cancel");
    assert_eq!(resp.status().as_u16(), 200);
    let cancelled: Value = resp.json().await.expect("cancel json");
    assert_eq!(cancelled["records_cancelled"], 2);

    // The request is gone afterwards, and cancel stays idempotent
    let resp = client
        .get(format!("{base}/requests/{request_id}"))
        .send()
        .await
        .expect("status after cancel");
    assert_eq!(resp.status().as_u16(), 404);

    let resp = client
        .delete(format!("{base}/requests/{request_id}"))
        .send()
        .await
        .expect("second cancel");
    assert_eq!(resp.status().as_u16(), 200);
    let second: Value = resp.json().await.expect("second cancel json");
    assert_eq!(second["records_cancelled"], 0);

    shutdown(child);
}

#[tokio::test]
#[serial]
async fn rollcall_expiry_and_session_cleanup_over_http() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let port = choose_port(1);
    let config_path = write_fullstack_config(&tmp.path().to_path_buf(), port);
    let log_path = tmp.path().join("rollcall_fullstack.log");
    let mut child = spawn_rollcall(&config_path, &log_path);

    let base = format!("http://127.0.0.1:{port}/verification");
    wait_for_health(&format!("{base}/health"), &mut child, &log_path).await;

    let client = reqwest::Client::new();

    // A create with no recipient source is unprocessable
    let resp = client
        .post(format!("{base}/requests"))
        .json(&serde_json::json!({
            "initiator_id": "lecturer-1",
            "session_id": "session-exp"
        }))
        .send()
        .await
        .expect("create without recipients");
    assert_eq!(resp.status().as_u16(), 422);

    // One-second request that the clock kills
    let resp = client
        .post(format!("{base}/requests"))
        .json(&serde_json::json!({
            "initiator_id": "lecturer-1",
            "session_id": "session-exp",
            "recipients": ["u1"],
            "ttl_secs": 1
        }))
        .send()
        .await
        .expect("create short-lived");
    assert_eq!(resp.status().as_u16(), 201);
    let created: Value = resp.json().await.expect("create json");
    let request_id = created["request_id"].as_str().expect("request id").to_string();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let resp = client
        .post(format!("{base}/requests/{request_id}/verify"))
        .json(&serde_json::json!({
            "recipient_id": "u1",
            "feature_vector": [1.0, 0.0]
        }))
        .send()
        .await
        .expect("verify after deadline");
    assert_eq!(resp.status().as_u16(), 410);

    let resp = client
        .get(format!("{base}/requests/{request_id}"))
        .send()
        .await
        .expect("status after deadline");
    assert_eq!(resp.status().as_u16(), 404);

    // The session slot is free again for a fresh request
    let resp = client
        .post(format!("{base}/requests"))
        .json(&serde_json::json!({
            "initiator_id": "lecturer-1",
            "session_id": "session-exp",
            "recipients": ["u1"]
        }))
        .send()
        .await
        .expect("create replacement");
    assert_eq!(resp.status().as_u16(), 201);

    // Session cleanup sweeps the live request AND the pending audit rows
    // the expired one left behind; u1 appears in both but is counted once
    let resp = client
        .post(format!("{base}/sessions/session-exp/cleanup"))
        .send()
        .await
        .expect("cleanup");
    assert_eq!(resp.status().as_u16(), 200);
    let cleanup: Value = resp.json().await.expect("cleanup json");
    assert_eq!(cleanup["requests_cancelled"], 2);
    assert_eq!(cleanup["records_cancelled"], 2);
    assert_eq!(cleanup["recipients_notified"], 1);

    shutdown(child);
}
