mod common;

use common::{config, device, Harness};
use rollershutter_arduino_lib::state::MemoryStateStore;
use serde_json::json;

async fn kitchen() -> Harness {
    let store = MemoryStateStore::new();
    Harness::start(&store, config(0, vec![device("Kitchen", "K")])).await
}

#[tokio::test]
async fn test_start_creates_object_tree() {
    let h = kitchen().await;
    let ns = &h.namespace;

    let channel = h.store.object(&ns.id("Kitchen")).await.unwrap();
    assert_eq!(channel.name, "Kitchen");
    assert_eq!(channel.native["openCommand"], json!("K_OPEN"));

    for relative in ["Kitchen.command", "Kitchen.open", "Kitchen.close", "Kitchen.stop"] {
        assert!(h.store.object(&ns.id(relative)).await.is_some(), "{} missing", relative);
    }
    assert_eq!(h.value("Kitchen.automation.overrideGlobal").await, Some(json!(false)));
    assert_eq!(h.value("Kitchen.automation.workdayOpen").await, Some(json!("07:00")));
    assert_eq!(h.value("automation.global.weekendClose").await, Some(json!("23:00")));
    assert_eq!(h.value("automation.global.enabled").await, Some(json!(false)));
    assert_eq!(h.value("info.connection").await, Some(json!(true)));
    assert!(h.store.object("rollershutter-arduino.0.superGlobal.enabled").await.is_some());

    h.adapter.stop().await;
}

#[tokio::test]
async fn test_restart_keeps_stored_settings() {
    let store = MemoryStateStore::new();
    let mut first = Harness::start(&store, config(0, vec![device("Kitchen", "K")])).await;
    first.write("Kitchen.automation.workdayOpen", json!("05:55")).await;
    first.process().await;
    first.adapter.stop().await;

    let second = Harness::start(&store, config(0, vec![device("Kitchen", "K")])).await;
    assert_eq!(second.value("Kitchen.automation.workdayOpen").await, Some(json!("05:55")));
    second.adapter.stop().await;
}

#[tokio::test]
async fn test_manual_command_is_acknowledged() {
    let mut h = kitchen().await;

    h.write("Kitchen.command", json!("open")).await;
    assert!(!h.acked("Kitchen.command").await);
    h.process().await;

    assert_eq!(h.opener.writes(), vec!["K_OPEN\n".to_string()]);
    assert_eq!(h.value("Kitchen.command").await, Some(json!("open")));
    assert!(h.acked("Kitchen.command").await);

    h.adapter.stop().await;
}

#[tokio::test]
async fn test_manual_command_without_port_stays_unacknowledged() {
    let mut h = kitchen().await;
    h.opener.fail_writes(true);

    h.write("Kitchen.command", json!("close")).await;
    h.process().await;

    assert!(h.opener.writes().is_empty());
    assert_eq!(h.value("Kitchen.command").await, Some(json!("close")));
    assert!(!h.acked("Kitchen.command").await);

    h.adapter.stop().await;
}

#[tokio::test]
async fn test_unknown_command_value_is_ignored() {
    let mut h = kitchen().await;

    h.write("Kitchen.command", json!("sideways")).await;
    h.process().await;

    assert!(h.opener.writes().is_empty());
    assert!(!h.acked("Kitchen.command").await);

    h.adapter.stop().await;
}

#[tokio::test]
async fn test_button_sends_and_resets() {
    let mut h = kitchen().await;

    h.write("Kitchen.stop", json!(true)).await;
    h.process().await;

    assert_eq!(h.opener.writes(), vec!["K_STOP\n".to_string()]);
    assert_eq!(h.value("Kitchen.stop").await, Some(json!(false)));
    assert!(h.acked("Kitchen.stop").await);
    assert_eq!(h.value("Kitchen.command").await, Some(json!("stop")));

    h.write("Kitchen.open", json!(false)).await;
    h.process().await;
    assert_eq!(h.opener.writes().len(), 1);
    assert!(h.acked("Kitchen.open").await);

    h.adapter.stop().await;
}

#[tokio::test]
async fn test_settings_are_acknowledged_even_when_invalid() {
    let mut h = kitchen().await;

    h.write("automation.global.workdayClose", json!("21:30")).await;
    h.write("Kitchen.automation.weekendOpen", json!("8 o'clock")).await;
    h.process().await;

    assert_eq!(h.value("automation.global.workdayClose").await, Some(json!("21:30")));
    assert!(h.acked("automation.global.workdayClose").await);
    assert_eq!(h.value("Kitchen.automation.weekendOpen").await, Some(json!("8 o'clock")));
    assert!(h.acked("Kitchen.automation.weekendOpen").await);

    h.adapter.stop().await;
}

#[tokio::test]
async fn test_missing_serial_path_leaves_adapter_idle() {
    let store = MemoryStateStore::new();
    let (client, _events) = store.client().await;
    let opener = common::FakePortOpener::new();
    let mut cfg = config(0, vec![device("Kitchen", "K")]);
    cfg.serial_path = String::new();

    let adapter = rollershutter_arduino_lib::adapter::RollershutterAdapter::new(
        cfg,
        std::sync::Arc::new(client),
        std::sync::Arc::new(opener.clone()),
        common::FixedClock::new(common::quiet_hour()),
    );

    assert!(!adapter.start().await.unwrap());
    assert!(!adapter.is_running());
    assert_eq!(opener.opens(), 0);
    assert_eq!(
        store.state("rollershutter-arduino.0.info.connection").await.unwrap().val,
        json!(false)
    );
    assert!(store.object("rollershutter-arduino.0.Kitchen").await.is_none());
}
