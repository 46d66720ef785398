//! Lifecycle Definition of Done (DoD) Integration Tests
//!
//! Service initialize/shutdown, pool start failures, temp dir ownership and a
//! round trip through the real bridge connector.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use officepool_core::application::{OfficeAdapters, OfficeManagerPool, OfficeService};
use officepool_core::domain::{
    Configuration, ConfigurationBuilder, ConnectionEndpoint, ExistingProcessAction, Task,
    TaskPayload,
};
use officepool_core::port::mocks::MockOffice;
use officepool_core::OfficeError;
use officepool_infra_system::BridgeConnector;

fn adapters(office: &MockOffice) -> OfficeAdapters {
    let office = Arc::new(office.clone());
    OfficeAdapters::new(office.clone(), office.clone(), office)
}

fn builder() -> ConfigurationBuilder {
    Configuration::builder()
        .port_numbers([2002])
        .process_timeout(Duration::from_millis(300))
        .process_retry_interval(Duration::from_millis(10))
        .health_check_interval(Duration::from_secs(60))
        .start_fail_fast(true)
}

/// DoD 1: shutdown is safe before initialize and when repeated
#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let office = MockOffice::new();
    let service = OfficeService::new(builder(), adapters(&office));

    service.shutdown().await;
    service.shutdown().await;

    assert!(!service.is_initialized().await);
    assert!(matches!(
        service.initialize().await,
        Err(OfficeError::InvalidState(_))
    ));
    assert_eq!(office.launch_count(), 0);
    println!("✅ DoD 1: Shutdown before initialize is a no-op");
}

/// DoD 2: initialize twice starts the pool once
#[tokio::test]
async fn test_initialize_is_idempotent() {
    let office = MockOffice::new();
    let service = OfficeService::new(builder(), adapters(&office));

    assert!(matches!(
        service.execute(Task::new_test(json!({}))).await,
        Err(OfficeError::PoolNotRunning)
    ));

    service.initialize().await.unwrap();
    service.initialize().await.unwrap();

    assert!(service.is_initialized().await);
    assert_eq!(office.launch_count(), 1);
    service.execute(Task::new_test(json!({}))).await.unwrap();

    service.shutdown().await;
    service.shutdown().await;
    assert!(!service.is_initialized().await);
    assert!(office.live_pids().is_empty());
    println!("✅ DoD 2: Initialize and shutdown are idempotent");
}

/// DoD 3: A rejected configuration leaves the service uninitialized
#[tokio::test]
async fn test_invalid_configuration_is_reported() {
    let office = MockOffice::new();
    let not_a_profile = tempfile::tempdir().unwrap();
    let service = OfficeService::new(
        builder().template_profile_dir(not_a_profile.path()),
        adapters(&office),
    );

    assert!(matches!(
        service.initialize().await,
        Err(OfficeError::Configuration(_))
    ));
    assert!(!service.is_initialized().await);
    assert_eq!(office.launch_count(), 0);
    println!("✅ DoD 3: Configuration errors surface from initialize");
}

/// DoD 4: A fail-fast start failure stops the entries already started
#[tokio::test]
async fn test_fail_fast_failure_stops_started_entries() {
    let office = MockOffice::new();
    let working = tempfile::tempdir().unwrap();
    office.spawn_stale(&ConnectionEndpoint::socket("127.0.0.1", 2003));
    let config = builder()
        .working_dir(working.path())
        .port_numbers([2002, 2003])
        .existing_process_action(ExistingProcessAction::Fail)
        .build()
        .unwrap();
    let pool = OfficeManagerPool::new(&config, adapters(&office));
    std::fs::create_dir_all(pool.temp_dir()).unwrap();

    let result = pool.start().await;

    assert!(matches!(result, Err(OfficeError::ProcessStart(_))));
    assert!(!pool.is_running());
    let launched = office.launched_pids();
    assert_eq!(launched.len(), 1);
    assert!(!office.is_alive(launched[0]), "entry 0 must be stopped again");
    assert!(!pool.temp_dir().exists());
    assert!(matches!(pool.start().await, Err(OfficeError::InvalidState(_))));
    println!("✅ DoD 4: Partial start is rolled back");
}

/// DoD 5: The pool temp dir is removed on shutdown unless keep-alive is set
#[tokio::test]
async fn test_temp_dir_ownership() {
    let working = tempfile::tempdir().unwrap();

    let office = MockOffice::new();
    let service = OfficeService::new(builder().working_dir(working.path()), adapters(&office));
    service.initialize().await.unwrap();
    let temp_dir = service.pool().await.unwrap().temp_dir().to_path_buf();
    std::fs::create_dir_all(&temp_dir).unwrap();
    service.shutdown().await;
    assert!(!temp_dir.exists());

    let office = MockOffice::new();
    let service = OfficeService::new(
        builder()
            .working_dir(working.path())
            .keep_alive_on_shutdown(true),
        adapters(&office),
    );
    service.initialize().await.unwrap();
    let temp_dir = service.pool().await.unwrap().temp_dir().to_path_buf();
    std::fs::create_dir_all(&temp_dir).unwrap();
    service.shutdown().await;
    assert!(temp_dir.exists(), "keep-alive processes still use their profiles");

    println!("✅ DoD 5: Temp dir follows the keep-alive setting");
}

/// Bridge stand-in: echoes payloads with a conversion marker, answers pings
async fn serve_bridge(listener: TcpListener) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(async move {
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(request) = serde_json::from_str::<Value>(&line) else {
                    return;
                };
                let reply = match request["op"].as_str() {
                    Some("execute") => json!({
                        "id": request["id"],
                        "ok": true,
                        "result": {"converted": request["payload"]["input"]},
                    }),
                    Some("ping") => json!({"ok": true}),
                    _ => return,
                };
                let mut frame = serde_json::to_vec(&reply).unwrap();
                frame.push(b'\n');
                if writer.write_all(&frame).await.is_err() {
                    return;
                }
            }
        });
    }
}

/// DoD 6: Tasks travel through the real bridge connector
#[tokio::test]
async fn test_round_trip_through_bridge_connector() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve_bridge(listener));

    let office = Arc::new(MockOffice::new());
    let adapters = OfficeAdapters::new(
        office.clone(),
        office.clone(),
        Arc::new(BridgeConnector::new()),
    );
    let service = OfficeService::new(
        builder()
            .port_numbers([port])
            .task_execution_timeout(Duration::from_secs(2)),
        adapters,
    );
    service.initialize().await.unwrap();

    let pool = service.pool().await.unwrap();
    assert_eq!(
        pool.entries()[0].supervisor.connect_string,
        format!("socket,host=127.0.0.1,port={},tcpNoDelay=1", port)
    );

    for name in ["a.docx", "b.xlsx"] {
        let output = pool
            .submit(TaskPayload::new(json!({"input": name})))
            .await
            .unwrap();
        assert_eq!(output.as_value(), &json!({"converted": name}));
    }
    assert!(pool.entries()[0].supervisor.state.accepts_tasks());

    service.shutdown().await;
    assert!(office.live_pids().is_empty());
    println!("✅ DoD 6: Bridge round trip through the pool");
}
