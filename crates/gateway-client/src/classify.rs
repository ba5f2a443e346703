//! Response classification.
//!
//! Turns one [`RawResponse`] into a resolved [`ResponseOutcome`] or a
//! classification error. Observing exchanges resolve on the first
//! acknowledgement, so their application codes surface as status only.
//! Transport failures never reach this module.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use gateway_core::{
    DispatchError, RawResponse, RequestDescriptor, ResponseOutcome, Result, TransportError,
    UpdateStream,
};
use serde_json::Value;

/// A classified first response, with the push stream for observing exchanges.
pub struct Classified {
    pub outcome: ResponseOutcome,
    pub updates: Option<UpdateStream>,
}

impl std::fmt::Debug for Classified {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classified")
            .field("outcome", &self.outcome)
            .field("observing", &self.updates.is_some())
            .finish()
    }
}

/// Client (4.xx) and server (5.xx) error classes.
pub fn is_error_class(code: &str) -> bool {
    matches!(code.as_bytes(), [b'4' | b'5', b'.', ..])
}

/// Classify the first response of the exchange described by `request`.
pub fn classify(request: &RequestDescriptor, response: RawResponse) -> Result<Classified> {
    let RawResponse {
        code,
        payload,
        updates,
    } = response;

    if request.observe {
        // Resolve on the acknowledgement whatever its code. The current
        // representation it carries is the first item of the update stream.
        // A rejected registration gets no pushes.
        let updates = match updates {
            Some(updates) => updates,
            None if is_error_class(&code) => stream::empty().boxed(),
            None => {
                return Err(DispatchError::Transport(TransportError::Protocol(format!(
                    "observing exchange on {} returned no update stream",
                    request.path
                ))))
            }
        };
        if code.is_empty() && payload.is_empty() {
            return Err(DispatchError::EmptyResponse {
                path: request.path.clone(),
            });
        }
        let updates = if is_error_class(&code) || payload.iter().all(u8::is_ascii_whitespace) {
            updates
        } else {
            stream::once(async move { payload }).chain(updates).boxed()
        };
        return Ok(Classified {
            outcome: ResponseOutcome::StatusOnly(code),
            updates: Some(updates),
        });
    }

    if is_error_class(&code) {
        return Err(DispatchError::Application {
            code,
            path: request.path.clone(),
        });
    }
    if code.is_empty() && payload.is_empty() {
        return Err(DispatchError::EmptyResponse {
            path: request.path.clone(),
        });
    }

    let outcome = if payload.iter().all(u8::is_ascii_whitespace) {
        ResponseOutcome::StatusOnly(code)
    } else {
        ResponseOutcome::Success(decode(&request.path, &payload)?)
    };
    Ok(Classified {
        outcome,
        updates: None,
    })
}

/// Decode a JSON payload received from `path`.
pub fn decode(path: &str, payload: &Bytes) -> Result<Value> {
    serde_json::from_slice(payload).map_err(|source| DispatchError::Decode {
        path: path.to_string(),
        source,
    })
}
