use echolock_core::EventId;
use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::filter::Filter;

/// Client → relay frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "PUBLISH")]
    Publish { event: Event },
    #[serde(rename = "SUBSCRIBE")]
    Subscribe { sub_id: String, filter: Filter },
    #[serde(rename = "CLOSE")]
    Close { sub_id: String },
}

/// Relay → client frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    #[serde(rename = "OK")]
    Ok {
        event_id: EventId,
        accepted: bool,
        reason: String,
    },
    #[serde(rename = "EVENT")]
    Event { sub_id: String, event: Event },
    #[serde(rename = "EOSE")]
    Eose { sub_id: String },
    #[serde(rename = "NOTICE")]
    Notice { message: String },
}

impl ClientMessage {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("ClientMessage serialisation is infallible")
    }
}

impl RelayMessage {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
