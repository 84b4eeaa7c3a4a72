//! Uses the single integration test approach.
//!
//! This improves parallelism when running the tests, and reduces the number of binaries that have to be built (and linked)
#![expect(
    clippy::tests_outside_test_module,
    reason = "This is the integration test binary, so it's expected that tests are outside of a test module"
)]
#![expect(clippy::indexing_slicing, reason = "This is not problematic in tests")]
#![expect(clippy::unwrap_used, reason = "Using unwrap in tests is fine")]

extern crate alloc;
extern crate core;

mod common;

use alloc::sync::Arc;
use core::time::Duration;
use std::fs;

use chrono::{DateTime, Utc};
use clap::Parser as _;
use tokio::sync::watch;

use pixelwatch_watchdog::{
    app::{TickError, build_watchdog},
    cli::Cli,
    config::WatchdogConfig,
    health::HealthStatus,
};

use common::{
    FakeControl, FakeDevice, get_free_port, spawn_watchdog_with_config_file, wait_for_json,
    wait_for_listening, write_config,
};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

#[tokio::test]
async fn status_api_reports_device_health() {
    let device = FakeDevice::start().await;
    let dead_port = get_free_port();
    let api_port = get_free_port();
    let path = write_config(
        "status_api",
        &format!(
            r#"
            [watchdog]
            tick_interval_ms = 200
            probe_timeout_ms = 150
            probe_path = "/status"

            [server]
            port = {api_port}

            [devices.office]
            name = "Office Pixoo"
            address = "{}"

            [devices.hallway]
            address = "127.0.0.1:{dead_port}"
            "#,
            device.addr
        ),
    );
    let _watchdog = spawn_watchdog_with_config_file(&path);
    wait_for_listening(api_port, 5).await;

    let health = wait_for_json(&format!("http://127.0.0.1:{api_port}/api/health"), 10, |json| {
        json["office"]["status"] == "healthy" && json["hallway"]["status"] == "unhealthy"
    })
    .await;
    assert!(health["hallway"]["last_error"].is_string());

    let office = wait_for_json(
        &format!("http://127.0.0.1:{api_port}/api/health/office"),
        5,
        |json| json["last_check_at"].is_string(),
    )
    .await;
    assert_eq!(office["consecutive_failures"], 0);

    let resp = reqwest::get(format!("http://127.0.0.1:{api_port}/api/health/kitchen"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn outage_triggers_soft_reset_and_recovers() {
    let device = FakeDevice::start().await;
    let control = FakeControl::start().await;
    let api_port = get_free_port();
    let path = write_config(
        "soft_reset",
        &format!(
            r#"
            [watchdog]
            tick_interval_ms = 100
            probe_timeout_ms = 80
            probe_path = "/status"

            [recovery]
            enabled = true
            threshold = 2
            control_url = "http://{}"

            [server]
            port = {api_port}

            [devices.office]
            address = "{}"
            "#,
            control.addr, device.addr
        ),
    );
    let _watchdog = spawn_watchdog_with_config_file(&path);
    wait_for_listening(api_port, 5).await;
    let url = format!("http://127.0.0.1:{api_port}/api/health/office");
    wait_for_json(&url, 5, |json| json["status"] == "healthy").await;

    device.set_up(false);
    let down = wait_for_json(&url, 10, |json| {
        json["last_recovery_attempt_at"].is_string()
    })
    .await;
    assert_eq!(down["status"], "unhealthy");
    assert_eq!(control.calls(), vec!["office/reset".to_string()]);

    device.set_up(true);
    let up = wait_for_json(&url, 10, |json| json["status"] == "healthy").await;
    assert_eq!(up["consecutive_failures"], 0);
    assert_eq!(up["first_failure_at"], serde_json::Value::Null);
    assert_eq!(
        control.calls().len(),
        1,
        "cooldown keeps a second reset from going out"
    );
}

#[tokio::test]
async fn device_list_follows_config_file() {
    let device = FakeDevice::start().await;
    let api_port = get_free_port();
    let config = |devices: &str| {
        format!(
            r#"
            [watchdog]
            tick_interval_ms = 200
            probe_timeout_ms = 150
            probe_path = "/status"

            [server]
            port = {api_port}

            {devices}
            "#
        )
    };
    let path = write_config(
        "reload",
        &config(&format!("[devices.office]\naddress = \"{}\"", device.addr)),
    );
    let _watchdog = spawn_watchdog_with_config_file(&path);
    wait_for_listening(api_port, 5).await;
    let url = format!("http://127.0.0.1:{api_port}/api/health");
    wait_for_json(&url, 5, |json| json["office"].is_object()).await;

    // Give the file watcher a moment to settle before the edit.
    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::write(
        &path,
        config(&format!("[devices.hallway]\naddress = \"{}\"", device.addr)),
    )
    .unwrap();

    let health = wait_for_json(&url, 10, |json| {
        json["hallway"].is_object() && json["office"].is_null()
    })
    .await;
    assert_eq!(health["hallway"]["status"], "healthy");
}

#[tokio::test]
async fn ticks_drive_real_probes_and_control_calls() {
    let device = FakeDevice::start().await;
    let control = FakeControl::start().await;
    let config: WatchdogConfig = toml::from_str(&format!(
        r#"
        [watchdog]
        probe_timeout_ms = 500
        probe_path = "/status"

        [recovery]
        enabled = true
        action = "reboot"
        control_url = "http://{}"

        [devices.office]
        address = "{}"
        "#,
        control.addr, device.addr
    ))
    .unwrap();
    let (_config_tx, config_rx) = watch::channel(Arc::new(config.clone()));
    let mut watchdog = build_watchdog(&config, config_rx).unwrap();
    let (_stop, mut shutdown) = watch::channel(false);

    device.set_up(false);
    for secs in [0, 5, 10] {
        watchdog.tick(at(secs), &mut shutdown).await.unwrap();
    }
    assert_eq!(control.calls(), vec!["office/reboot".to_string()]);

    // Ten minutes later the cooldown is over.
    for secs in [15, 300, 609, 610] {
        watchdog.tick(at(secs), &mut shutdown).await.unwrap();
    }
    assert_eq!(control.calls().len(), 2);

    device.set_up(true);
    let report = watchdog.tick(at(615), &mut shutdown).await.unwrap();
    assert_eq!(report.transitions, 1);
    let office = watchdog.tracker().state("office").unwrap();
    assert_eq!(office.status, HealthStatus::Healthy);
    assert_eq!(office.last_recovery_attempt_at, Some(at(610)));

    let (_stop, mut stopped) = watch::channel(true);
    let err = watchdog.tick(at(620), &mut stopped).await.unwrap_err();
    assert!(matches!(err, TickError::Cancelled), "unexpected {err:?}");
}

#[tokio::test]
async fn one_shot_probe_fails_when_a_device_is_down() {
    let device = FakeDevice::start().await;
    let path = write_config(
        "probe_once",
        &format!(
            r#"
            [watchdog]
            probe_path = "/status"

            [devices.office]
            address = "{}"
            "#,
            device.addr
        ),
    );
    let probe = || Cli::parse_from(["pixelwatch", "probe", "--json", "--config", path.to_str().unwrap()]);

    pixelwatch_watchdog::inner_main(probe()).await.unwrap();

    device.set_up(false);
    let err = pixelwatch_watchdog::inner_main(probe()).await.unwrap_err();
    assert!(
        err.to_string().contains("1 of 1 devices are unreachable"),
        "unexpected {err}"
    );
}
