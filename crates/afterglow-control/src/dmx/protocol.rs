//! Lighting server wire protocol
//!
//! One JSON object per line, discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::fixtures::Fixture;
use crate::error::{ControlError, Result};

/// Messages sent to the lighting server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Announce the universe and the current fixture registry
    Init {
        universe: u16,
        fixtures: Vec<Fixture>,
    },
    /// Full 512-channel buffer
    DmxData { universe: u16, channels: Vec<u8> },
    AddFixture { fixture: Fixture },
    TriggerScene {
        #[serde(rename = "sceneId")]
        scene_id: Uuid,
    },
}

/// Messages received from the lighting server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    InitSuccess {
        universe: u16,
        #[serde(default)]
        fixtures: Vec<Fixture>,
    },
    DmxUpdate {
        universe: u16,
        channels: Vec<u8>,
        /// Server clock in milliseconds
        #[serde(default)]
        timestamp: u64,
    },
}

/// Last `dmx_update` echoed by the server
#[derive(Debug, Clone, PartialEq)]
pub struct DmxEcho {
    pub universe: u16,
    pub channels: Vec<u8>,
    pub timestamp: u64,
}

impl OutboundMessage {
    /// Message type as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::DmxData { .. } => "dmx_data",
            Self::AddFixture { .. } => "add_fixture",
            Self::TriggerScene { .. } => "trigger_scene",
        }
    }
}

/// Serialize with the trailing newline
pub fn encode_line(message: &OutboundMessage) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line(line: &str) -> Result<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ControlError::InvalidMessage("empty line".to_string()));
    }
    Ok(serde_json::from_str(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx::fixtures::{ChannelRoles, FixtureSpec};

    #[test]
    fn test_outbound_shapes() {
        let line = encode_line(&OutboundMessage::DmxData {
            universe: 1,
            channels: vec![0; 512],
        })
        .unwrap();
        assert!(line.ends_with('\n'));
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["type"], "dmx_data");
        assert_eq!(json["universe"], 1);
        assert_eq!(json["channels"].as_array().unwrap().len(), 512);

        let id = Uuid::new_v4();
        let json = serde_json::to_value(OutboundMessage::TriggerScene { scene_id: id }).unwrap();
        assert_eq!(json["type"], "trigger_scene");
        assert_eq!(json["sceneId"], id.to_string());

        let fixture =
            Fixture::from_spec(FixtureSpec::new("par", 0, ChannelRoles::drgb())).unwrap();
        let json = serde_json::to_value(OutboundMessage::AddFixture { fixture }).unwrap();
        assert_eq!(json["type"], "add_fixture");
        assert_eq!(json["fixture"]["startChannel"], 0);

        let json = serde_json::to_value(OutboundMessage::Init {
            universe: 0,
            fixtures: vec![],
        })
        .unwrap();
        assert_eq!(json["type"], "init");
    }

    #[test]
    fn test_decode_inbound() {
        let msg = decode_line(r#"{"type":"init_success","universe":2,"fixtures":[]}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::InitSuccess {
                universe: 2,
                fixtures: vec![]
            }
        );

        let msg =
            decode_line(r#"{"type":"dmx_update","universe":0,"channels":[1,2],"timestamp":99}"#)
                .unwrap();
        match msg {
            InboundMessage::DmxUpdate {
                channels,
                timestamp,
                ..
            } => {
                assert_eq!(channels, vec![1, 2]);
                assert_eq!(timestamp, 99);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_line("").is_err());
        assert!(decode_line("not json").is_err());
        assert!(decode_line(r#"{"type":"reboot"}"#).is_err());
    }
}
