//! Typed operations end to end: wire shape, batch fetches and error classes.

mod common;

use common::*;
use gateway_client::{Intent, LightState};
use gateway_core::{DispatchError, ErrorKind, Method, ResponseOutcome};
use gateway_mock::{Fault, GATEWAY_PATH};
use serde_json::json;

#[tokio::test]
async fn test_set_device_omits_zero_brightness() -> anyhow::Result<()> {
    let gateway = gateway();
    let d = connected(&gateway).await;

    let outcome = d
        .set_device(DESK_LAMP, LightState::on().with_brightness(0), Some(5))
        .await?;
    assert_eq!(outcome, ResponseOutcome::StatusOnly("2.04".to_string()));

    let request = gateway.requests().pop().expect("one request");
    assert_eq!(request.method, Method::Write);
    assert_eq!(request.path, "/15001/65536");
    assert_eq!(request.payload, Some(json!({"3311": [{"5850": 1, "5712": 5}]})));
    Ok(())
}

#[tokio::test]
async fn test_set_device_with_brightness() -> anyhow::Result<()> {
    let gateway = gateway();
    let d = connected(&gateway).await;

    d.set_device(DESK_LAMP, LightState::on().with_brightness(200), Some(10))
        .await?;

    let request = gateway.requests().pop().expect("one request");
    assert_eq!(
        request.payload,
        Some(json!({"3311": [{"5850": 1, "5712": 10, "5851": 200}]}))
    );
    let light = &gateway.resource("/15001/65536").expect("device")["3311"][0];
    assert_eq!(light["5851"], 200);
    assert_eq!(light["5850"], 1);
    Ok(())
}

#[tokio::test]
async fn test_default_transition_time() -> anyhow::Result<()> {
    let gateway = gateway();
    let d = connected(&gateway).await;

    d.set_group(LIVING_ROOM, LightState::off(), None).await?;
    d.set_color_temp(CEILING, 24930, None).await?;

    let payloads: Vec<_> = gateway
        .requests()
        .into_iter()
        .filter_map(|r| r.payload)
        .collect();
    assert_eq!(
        payloads,
        vec![
            json!({"5850": 0, "5712": 5}),
            json!({"3311": [{"5709": 24930, "5710": 27000, "5712": 5}]}),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_scene_and_gateway_settings() -> anyhow::Result<()> {
    let gateway = gateway();
    let d = connected(&gateway).await;

    d.set_scene(LIVING_ROOM, EVENING).await?;
    let group = gateway.resource("/15004/131073").expect("group");
    assert_eq!(group["9039"], EVENING);
    assert_eq!(group["5850"], 1);

    d.set_gateway("time.example.org").await?;
    let info = d.get_gateway_info().await?;
    assert_eq!(info["9023"], "time.example.org");

    let scenes = d.get_all_scenes(LIVING_ROOM).await?;
    assert_eq!(scenes.len(), 1);
    assert_eq!(scenes[0]["9001"], "Evening");
    assert_eq!(d.get_scene(LIVING_ROOM, EVENING).await?["9003"], EVENING);
    Ok(())
}

#[tokio::test]
async fn test_color_setters() -> anyhow::Result<()> {
    let gateway = gateway();
    let d = connected(&gateway).await;

    d.set_color_hex(CEILING, "efd275", Some(1)).await?;
    d.set_color_xy(CEILING, 30140, 26909, Some(2)).await?;

    let light = &gateway.resource("/15001/65537").expect("device")["3311"][0];
    assert_eq!(light["5706"], "efd275");
    assert_eq!(light["5709"], 30140);
    assert_eq!(light["5710"], 26909);
    assert_eq!(light["5712"], 2);
    Ok(())
}

#[tokio::test]
async fn test_get_all_groups_fetches_each_id() -> anyhow::Result<()> {
    let gateway = gateway_mock::MockGateway::new(SECURITY_CODE)
        .with_client(IDENTITY, KEY)
        .with_group(1, "One")
        .with_group(2, "Two")
        .with_group(3, "Three");
    let d = connected(&gateway).await;

    let groups = d.get_all_groups().await?;
    let names: Vec<_> = groups.iter().map(|g| g["9001"].clone()).collect();
    assert_eq!(names, vec![json!("One"), json!("Two"), json!("Three")]);

    assert_eq!(
        gateway.request_paths(),
        vec!["/15004", "/15004/1", "/15004/2", "/15004/3"]
    );
    assert!(gateway.requests().iter().all(|r| r.method == Method::Read));
    assert_eq!(gateway.max_concurrent_exchanges(), 1);
    Ok(())
}

#[tokio::test]
async fn test_get_all_groups_fails_fast() {
    let gateway = gateway_mock::MockGateway::new(SECURITY_CODE)
        .with_client(IDENTITY, KEY)
        .with_group(1, "One")
        .with_group(2, "Two")
        .with_group(3, "Three");
    gateway.set_status("/15004/2", "4.04");
    let d = connected(&gateway).await;

    let err = d.get_all_groups().await.unwrap_err();
    match err {
        DispatchError::Application { ref code, ref path } => {
            assert_eq!(code, "4.04");
            assert_eq!(path, "/15004/2");
        }
        other => panic!("expected application error, got {:?}", other),
    }
    assert_eq!(
        gateway.request_paths(),
        vec!["/15004", "/15004/1", "/15004/2"]
    );
}

#[tokio::test]
async fn test_all_devices() -> anyhow::Result<()> {
    let gateway = gateway();
    let d = connected(&gateway).await;

    assert_eq!(d.get_all_device_ids().await?, vec![DESK_LAMP, CEILING]);
    let devices = d.get_all_devices().await?;
    assert_eq!(devices[0]["9001"], "Desk lamp");
    assert_eq!(devices[1]["9001"], "Ceiling");
    Ok(())
}

#[tokio::test]
async fn test_unknown_resource_is_application_error() {
    let gateway = gateway();
    let d = connected(&gateway).await;

    let err = d.get_device(99).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Application);
    assert_eq!(err.status_code(), Some("4.04"));

    gateway.set_status("/15004/131073", "4.05");
    let err = d
        .set_group(LIVING_ROOM, LightState::on(), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some("4.05"));

    // Server errors are classified the same way.
    gateway.inject(Fault::status_on(GATEWAY_PATH, "5.03"));
    let err = d.get_gateway_info().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Application);
}

#[tokio::test]
async fn test_empty_response() {
    let gateway = gateway();
    let d = connected(&gateway).await;

    gateway.inject(Fault::empty_response_on(GATEWAY_PATH));
    let err = d.get_gateway_info().await.unwrap_err();
    assert!(matches!(err, DispatchError::EmptyResponse { ref path } if path == GATEWAY_PATH));

    // A read that only gets a status code has no data to return.
    gateway.inject(Fault::status_on(GATEWAY_PATH, "2.05"));
    let err = d.get_gateway_info().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyResponse);
}

#[tokio::test(start_paused = true)]
async fn test_transport_timeout_is_retriable() -> anyhow::Result<()> {
    let gateway = gateway();
    let d = connected(&gateway).await;

    gateway.inject(Fault::timeout_on("/15001/65536"));
    let err = d.get_device(DESK_LAMP).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retriable());

    // The lane was released; the retry goes through.
    assert_eq!(d.get_device(DESK_LAMP).await?["9003"], DESK_LAMP);
    Ok(())
}

#[tokio::test]
async fn test_raw_intent() -> anyhow::Result<()> {
    let gateway = gateway();
    gateway.insert_resource("/15011/15013", json!({"9060": "2024-01-01"}));
    let d = connected(&gateway).await;

    let outcome = d.request(Intent::read("/15011/15013")).await?;
    assert_eq!(outcome.payload(), Some(&json!({"9060": "2024-01-01"})));

    let outcome = d
        .request(Intent::write("/15011/15013", &json!({"9060": "2025-06-30"}))?)
        .await?;
    assert_eq!(outcome.status(), Some("2.04"));
    Ok(())
}
