//! The gateway never sees overlapping exchanges, and sees them in call order.

mod common;

use common::*;
use futures::future::join_all;
use gateway_client::LightState;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_exchanges_follow_submission_order() -> anyhow::Result<()> {
    let gateway = gateway().with_latency(Duration::from_millis(10));
    let d = connected(&gateway).await;

    // Alternate targets so reordering would be visible in the log.
    let ids: Vec<u64> = (0..10)
        .map(|i| if i % 2 == 0 { DESK_LAMP } else { CEILING })
        .collect();
    let ops = ids
        .iter()
        .enumerate()
        .map(|(i, id)| d.set_device(*id, LightState::on().with_brightness(i as u8 + 1), None));

    for result in join_all(ops).await {
        result?;
    }

    let brightness: Vec<u64> = gateway
        .requests()
        .iter()
        .filter_map(|r| r.payload.as_ref()?["3311"][0]["5851"].as_u64())
        .collect();
    assert_eq!(brightness, (1..=10).collect::<Vec<u64>>());
    assert_eq!(gateway.max_concurrent_exchanges(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_exchange_in_flight_under_load() -> anyhow::Result<()> {
    let gateway = gateway().with_latency(Duration::from_millis(1));
    let d = Arc::new(connected(&gateway).await);

    let tasks: Vec<_> = (0..24)
        .map(|i| {
            let d = d.clone();
            tokio::spawn(async move {
                match i % 3 {
                    0 => d.get_device(DESK_LAMP).await.map(|_| ()),
                    1 => d.set_group(LIVING_ROOM, LightState::on(), None).await.map(|_| ()),
                    _ => d.get_all_group_ids().await.map(|_| ()),
                }
            })
        })
        .collect();

    for task in tasks {
        task.await??;
    }

    assert_eq!(gateway.requests().len(), 24);
    assert_eq!(gateway.max_concurrent_exchanges(), 1);
    assert_eq!(d.pending_requests(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_batch_fetches_share_the_lane() -> anyhow::Result<()> {
    let gateway = gateway().with_latency(Duration::from_millis(5));
    let d = connected(&gateway).await;

    let (devices, info) = tokio::join!(d.get_all_devices(), d.get_gateway_info());
    assert_eq!(devices?.len(), 2);
    assert_eq!(info?["9029"], "1.3.14");

    // The info request was queued behind the device listing, and the
    // per-device fetches queued behind it.
    assert_eq!(
        gateway.request_paths(),
        vec!["/15001", "/15011/15012", "/15001/65536", "/15001/65537"]
    );
    assert_eq!(gateway.max_concurrent_exchanges(), 1);
    Ok(())
}
