//! Wire envelope for the push channel.
//!
//! Every frame exchanged between the dashboard client and the push endpoint
//! is a JSON object of this shape:
//!
//! ```text
//! { "socketType": "trendData", "action": "getData", "data": "{\"v\":1}" }
//! ```
//!
//! `socketType` (the *category*) routes the frame to a single handler,
//! `action` selects how the payload is interpreted. A `getData` payload is a
//! JSON document encoded *as a string* and needs a second decode; a
//! `fullScreen` frame is handed over whole. Additional top-level fields
//! (`chartName`, `value`, ...) are kept in [`Envelope::extra`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame is not a JSON object with `socketType` and `action`.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    /// A `getData` frame carried something other than a string payload.
    #[error("getData payload for `{category}` is not a string")]
    PayloadNotString {
        /// Category of the offending frame.
        category: String,
    },
    /// The nested `getData` payload is not valid JSON.
    #[error("getData payload for `{category}` is not valid JSON: {source}")]
    NestedPayload {
        /// Category of the offending frame.
        category: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// Serialization failed.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// What the receiver should do with an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Chart data; payload is a JSON document encoded as a string.
    GetData,
    /// Toggle full-screen for a chart; the whole envelope is the payload.
    FullScreen,
    /// Theme switch notification.
    ThemeChange,
    /// Any action this build does not know about.
    Other(String),
}

impl Action {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::GetData => "getData",
            Self::FullScreen => "fullScreen",
            Self::ThemeChange => "themeChange",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "getData" => Self::GetData,
            "fullScreen" => Self::FullScreen,
            "themeChange" => Self::ThemeChange,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded push-channel frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical stream identifier (`socketType` on the wire).
    #[serde(rename = "socketType")]
    pub category: String,
    /// How `data` is to be interpreted.
    pub action: Action,
    /// Raw payload. A string for `getData`, an arbitrary value otherwise.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Any other top-level fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope with no extra fields.
    pub fn new(category: impl Into<String>, action: Action, data: Value) -> Self {
        Self {
            category: category.into(),
            action,
            data,
            extra: Map::new(),
        }
    }

    /// Build a `getData` envelope whose payload is `payload` encoded as a
    /// JSON string.
    pub fn get_data<T: Serialize + ?Sized>(
        category: impl Into<String>,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        let encoded = serde_json::to_string(payload).map_err(EnvelopeError::Encode)?;
        Ok(Self::new(category, Action::GetData, Value::String(encoded)))
    }

    /// Build a `getData` envelope from an already-encoded JSON document.
    pub fn get_data_raw(category: impl Into<String>, document: impl Into<String>) -> Self {
        Self::new(category, Action::GetData, Value::String(document.into()))
    }

    /// Build a client-side data request: `getData` for `chart_name`,
    /// answered on `category`.
    pub fn request(category: impl Into<String>, chart_name: impl Into<String>) -> Self {
        Self::new(category, Action::GetData, Value::Null)
            .with_extra("chartName", Value::String(chart_name.into()))
            .with_extra("value", Value::String(String::new()))
    }

    /// Attach an extra top-level field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.extra.insert(key.into(), value);
        self
    }

    /// The `chartName` field, when present.
    pub fn chart_name(&self) -> Option<&str> {
        self.extra.get("chartName").and_then(Value::as_str)
    }

    /// Parse a frame.
    pub fn decode(frame: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(frame).map_err(EnvelopeError::Malformed)
    }

    /// Serialize to a frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }

    /// Resolve this envelope into what a registered handler receives.
    ///
    /// Returns `Ok(None)` for actions that are recognised but have no
    /// dispatch effect (`themeChange`) and for unknown actions.
    pub fn into_delivery(self) -> Result<Option<Delivery>, EnvelopeError> {
        match self.action {
            Action::GetData => {
                let Value::String(document) = &self.data else {
                    return Err(EnvelopeError::PayloadNotString {
                        category: self.category,
                    });
                };
                match serde_json::from_str(document) {
                    Ok(value) => Ok(Some(Delivery::GetData(value))),
                    Err(source) => Err(EnvelopeError::NestedPayload {
                        category: self.category,
                        source,
                    }),
                }
            }
            Action::FullScreen => Ok(Some(Delivery::FullScreen(self))),
            Action::ThemeChange => Ok(None),
            Action::Other(_) => Ok(None),
        }
    }
}

/// Payload handed to a registered handler, one variant per dispatching
/// action.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery<T = Value> {
    /// Decoded `getData` payload.
    GetData(T),
    /// The complete `fullScreen` envelope.
    FullScreen(Envelope),
}

impl Delivery {
    /// Decode the `getData` payload into a concrete type.
    pub fn typed<T: DeserializeOwned>(self) -> Result<Delivery<T>, serde_json::Error> {
        match self {
            Self::GetData(value) => serde_json::from_value(value).map(Delivery::GetData),
            Self::FullScreen(envelope) => Ok(Delivery::FullScreen(envelope)),
        }
    }
}

impl<T> Delivery<T> {
    /// The action that produced this delivery.
    pub fn action(&self) -> Action {
        match self {
            Self::GetData(_) => Action::GetData,
            Self::FullScreen(_) => Action::FullScreen,
        }
    }
}
