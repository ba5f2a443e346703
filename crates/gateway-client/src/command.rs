//! Command builder.
//!
//! The only place that knows the gateway's resource paths and numeric
//! attribute IDs. Every setter has its own payload struct so the wire shape is
//! fixed at compile time; serde renames carry the attribute IDs.
//!
//! | Attribute | ID |
//! |-----------|----|
//! | light control list | `3311` |
//! | on/off | `5850` |
//! | brightness | `5851` |
//! | transition time | `5712` |
//! | color hex | `5706` |
//! | color x / y | `5709` / `5710` |
//! | scene id | `9039` |
//! | NTP server | `9023` |
//! | client identity / issued key | `9090` / `9091` |

use gateway_core::{DispatchError, Endpoint, Method, RequestDescriptor, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEVICES: &str = "/15001";
pub const GROUPS: &str = "/15004";
pub const SCENES: &str = "/15005";
pub const GATEWAY_INFO: &str = "/15011/15012";
pub const BOOTSTRAP: &str = "/15011/9063";

/// Identity the gateway accepts with its printed security code.
pub const BOOTSTRAP_IDENTITY: &str = "Client_identity";

/// Transition time used when the caller does not pass one.
pub const DEFAULT_TRANSITION_TIME: u32 = 5;

/// Fixed y coordinate sent by the color temperature setter.
const COLOR_TEMP_Y: u32 = 27000;

pub fn device_path(id: u64) -> String {
    format!("{}/{}", DEVICES, id)
}

pub fn group_path(id: u64) -> String {
    format!("{}/{}", GROUPS, id)
}

/// Scene collection of a group.
pub fn scene_list_path(group: u64) -> String {
    format!("{}/{}", SCENES, group)
}

pub fn scene_path(group: u64, scene: u64) -> String {
    format!("{}/{}/{}", SCENES, group, scene)
}

/// Requested on/off state. A brightness of 0 leaves the current level alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightState {
    pub on: bool,
    pub brightness: u8,
}

impl LightState {
    pub fn on() -> Self {
        Self {
            on: true,
            brightness: 0,
        }
    }

    pub fn off() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    fn attributes(self, transition_time: u32) -> LightAttributes {
        LightAttributes {
            state: u8::from(self.on),
            transition_time,
            brightness: (self.brightness > 0).then_some(self.brightness),
        }
    }
}

#[derive(Debug, Serialize)]
struct LightAttributes {
    #[serde(rename = "5850")]
    state: u8,
    #[serde(rename = "5712")]
    transition_time: u32,
    #[serde(rename = "5851", skip_serializing_if = "Option::is_none")]
    brightness: Option<u8>,
}

/// Device payloads nest their attributes in a single-element light control list.
#[derive(Debug, Serialize)]
struct LightControl<T> {
    #[serde(rename = "3311")]
    control: [T; 1],
}

impl<T> LightControl<T> {
    fn new(attributes: T) -> Self {
        Self {
            control: [attributes],
        }
    }
}

#[derive(Debug, Serialize)]
struct ColorHex<'a> {
    #[serde(rename = "5706")]
    color: &'a str,
    #[serde(rename = "5712")]
    transition_time: u32,
}

#[derive(Debug, Serialize)]
struct ColorXy {
    #[serde(rename = "5709")]
    x: u32,
    #[serde(rename = "5710")]
    y: u32,
    #[serde(rename = "5712")]
    transition_time: u32,
}

#[derive(Debug, Serialize)]
struct GatewaySettings<'a> {
    #[serde(rename = "9023")]
    ntp_server: &'a str,
}

#[derive(Debug, Serialize)]
struct SceneActivation {
    #[serde(rename = "5850")]
    state: u8,
    #[serde(rename = "9039")]
    scene: u64,
}

#[derive(Debug, Serialize)]
struct BootstrapRequest<'a> {
    #[serde(rename = "9090")]
    identity: &'a str,
}

/// Reply of the bootstrap resource.
#[derive(Debug, Deserialize)]
pub(crate) struct BootstrapReply {
    #[serde(rename = "9091")]
    pub(crate) key: String,
}

/// What a caller wants done to one resource, before it becomes a request.
///
/// The method follows from the intent: the bootstrap call is a
/// `BootstrapWrite`, an intent carrying a payload is a `Write`, anything else
/// a `Read`. Observation applies only to reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    path: String,
    payload: Option<Value>,
    observe: bool,
    bootstrap: bool,
}

impl Intent {
    pub fn read(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            observe: false,
            bootstrap: false,
        }
    }

    /// A read that keeps delivering updates after the first response.
    pub fn observe(path: impl Into<String>) -> Self {
        Self {
            observe: true,
            ..Self::read(path)
        }
    }

    pub fn write<P: Serialize>(path: impl Into<String>, payload: &P) -> Result<Self> {
        let payload = serde_json::to_value(payload).map_err(DispatchError::Encode)?;
        Ok(Self {
            payload: Some(payload),
            ..Self::read(path)
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn method(&self) -> Method {
        match (&self.payload, self.bootstrap) {
            (Some(_), true) => Method::BootstrapWrite,
            (Some(_), false) => Method::Write,
            (None, _) => Method::Read,
        }
    }

    pub fn is_observing(&self) -> bool {
        self.observe && self.payload.is_none()
    }

    /// Build the descriptor for one exchange against `endpoint`.
    pub fn to_request(&self, endpoint: &Endpoint) -> RequestDescriptor {
        let request = RequestDescriptor::new(endpoint, self.method(), self.path.clone());
        let request = match &self.payload {
            Some(payload) => request.with_payload(payload.clone()),
            None => request,
        };
        if self.is_observing() {
            request.observing()
        } else {
            request
        }
    }
}

/// Ask the gateway to issue a key for `identity`.
pub fn bootstrap(identity: &str) -> Result<Intent> {
    let mut intent = Intent::write(BOOTSTRAP, &BootstrapRequest { identity })?;
    intent.bootstrap = true;
    Ok(intent)
}

pub fn set_gateway(ntp_server: &str) -> Result<Intent> {
    Intent::write(GATEWAY_INFO, &GatewaySettings { ntp_server })
}

pub fn set_device(id: u64, state: LightState, transition_time: u32) -> Result<Intent> {
    Intent::write(
        device_path(id),
        &LightControl::new(state.attributes(transition_time)),
    )
}

/// Groups take the light attributes flat, without the control list.
pub fn set_group(id: u64, state: LightState, transition_time: u32) -> Result<Intent> {
    Intent::write(group_path(id), &state.attributes(transition_time))
}

pub fn set_color_hex(id: u64, color: &str, transition_time: u32) -> Result<Intent> {
    Intent::write(
        device_path(id),
        &LightControl::new(ColorHex {
            color,
            transition_time,
        }),
    )
}

pub fn set_color_xy(id: u64, x: u32, y: u32, transition_time: u32) -> Result<Intent> {
    Intent::write(
        device_path(id),
        &LightControl::new(ColorXy {
            x,
            y,
            transition_time,
        }),
    )
}

/// Color temperature moves along x with y pinned.
pub fn set_color_temp(id: u64, x: u32, transition_time: u32) -> Result<Intent> {
    set_color_xy(id, x, COLOR_TEMP_Y, transition_time)
}

/// Scenes are activated on their group.
pub fn set_scene(group: u64, scene: u64) -> Result<Intent> {
    Intent::write(group_path(group), &SceneActivation { state: 1, scene })
}
