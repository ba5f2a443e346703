//! Shared fixtures for the dispatcher integration tests.

#![allow(dead_code)]

use gateway_client::Dispatcher;
use gateway_core::{GatewayConfig, TimingProfile};
use gateway_mock::MockGateway;
use std::sync::Arc;

pub const SECURITY_CODE: &str = "ABC123";
pub const IDENTITY: &str = "myhub-client";
pub const KEY: &str = "3f9d2c41a7b05e68";

pub const DESK_LAMP: u64 = 65536;
pub const CEILING: u64 = 65537;
pub const LIVING_ROOM: u64 = 131073;
pub const EVENING: u64 = 196608;

/// Gateway that already knows our client key, with a few devices and groups.
pub fn gateway() -> MockGateway {
    MockGateway::new(SECURITY_CODE)
        .with_client(IDENTITY, KEY)
        .with_device(DESK_LAMP, "Desk lamp")
        .with_device(CEILING, "Ceiling")
        .with_group(LIVING_ROOM, "Living room")
        .with_scene(LIVING_ROOM, EVENING, "Evening")
}

pub fn psk_config() -> GatewayConfig {
    GatewayConfig::new("mock-gateway", IDENTITY).with_psk(KEY)
}

pub fn dispatcher(gateway: &MockGateway, config: GatewayConfig) -> Dispatcher {
    Dispatcher::new(Arc::new(gateway.clone()), config, TimingProfile::default())
}

pub async fn connected(gateway: &MockGateway) -> Dispatcher {
    let dispatcher = dispatcher(gateway, psk_config());
    dispatcher.connect().await.expect("connect with stored key");
    dispatcher
}
