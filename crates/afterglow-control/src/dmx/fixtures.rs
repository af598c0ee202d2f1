//! Fixture registry entries

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::universe::{LightingFrame, DMX_UNIVERSE_SIZE};
use crate::error::{ControlError, Result};

/// Channel offsets of a fixture, relative to its start channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRoles {
    pub dimmer: u16,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strobe: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt: Option<u16>,
}

impl ChannelRoles {
    /// Dimmer followed by RGB, no optional channels
    pub fn drgb() -> Self {
        Self {
            dimmer: 0,
            red: 1,
            green: 2,
            blue: 3,
            white: None,
            strobe: None,
            pan: None,
            tilt: None,
        }
    }

    /// Dimmer, RGB, white and strobe
    pub fn drgbws() -> Self {
        Self {
            white: Some(4),
            strobe: Some(5),
            ..Self::drgb()
        }
    }

    /// Every declared offset
    pub fn offsets(&self) -> impl Iterator<Item = u16> + '_ {
        [self.dimmer, self.red, self.green, self.blue]
            .into_iter()
            .chain([self.white, self.strobe, self.pan, self.tilt].into_iter().flatten())
    }

    /// Largest declared offset
    pub fn max_offset(&self) -> u16 {
        self.offsets().max().unwrap_or(0)
    }
}

/// Registration request for a fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSpec {
    pub name: String,
    /// Zero-based channel of offset 0
    pub start_channel: u16,
    pub channel_roles: ChannelRoles,
}

impl FixtureSpec {
    pub fn new(name: impl Into<String>, start_channel: u16, channel_roles: ChannelRoles) -> Self {
        Self {
            name: name.into(),
            start_channel,
            channel_roles,
        }
    }

    /// Reject fixtures with any channel beyond the universe
    pub fn validate(&self) -> Result<()> {
        let last = self.start_channel as usize + self.channel_roles.max_offset() as usize;
        if last >= DMX_UNIVERSE_SIZE {
            return Err(ControlError::FixtureOutOfRange(format!(
                "'{}' starts at {} and needs channel {}, universe ends at {}",
                self.name,
                self.start_channel,
                last,
                DMX_UNIVERSE_SIZE - 1
            )));
        }
        Ok(())
    }
}

/// A registered fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    pub id: Uuid,
    pub name: String,
    pub start_channel: u16,
    pub channel_roles: ChannelRoles,
}

impl Fixture {
    /// Validate `spec` and assign a fresh id
    pub fn from_spec(spec: FixtureSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name,
            start_channel: spec.start_channel,
            channel_roles: spec.channel_roles,
        })
    }

    /// Absolute channel index of `offset`
    pub fn channel(&self, offset: u16) -> usize {
        self.start_channel as usize + offset as usize
    }

    /// Absolute channels of this fixture
    pub fn channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.channel_roles.offsets().map(|offset| self.channel(offset))
    }

    /// Absolute strobe channel, if declared
    pub fn strobe_channel(&self) -> Option<usize> {
        self.channel_roles.strobe.map(|offset| self.channel(offset))
    }

    /// Write color; dimmer follows the brightest component, white the common one
    pub fn set_rgb(&self, frame: &mut LightingFrame, r: u8, g: u8, b: u8) -> bool {
        let roles = &self.channel_roles;
        let mut ok = frame.set(self.channel(roles.red), r)
            & frame.set(self.channel(roles.green), g)
            & frame.set(self.channel(roles.blue), b)
            & frame.set(self.channel(roles.dimmer), r.max(g).max(b));
        if let Some(white) = roles.white {
            ok &= frame.set(self.channel(white), r.min(g).min(b));
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_offset() {
        assert_eq!(ChannelRoles::drgb().max_offset(), 3);
        assert_eq!(ChannelRoles::drgbws().max_offset(), 5);

        let roles = ChannelRoles {
            tilt: Some(9),
            ..ChannelRoles::drgb()
        };
        assert_eq!(roles.max_offset(), 9);
    }

    #[test]
    fn test_validate_bounds() {
        assert!(FixtureSpec::new("edge", 508, ChannelRoles::drgb()).validate().is_ok());
        assert!(FixtureSpec::new("over", 509, ChannelRoles::drgb()).validate().is_err());
        assert!(FixtureSpec::new("far", 600, ChannelRoles::drgb()).validate().is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Fixture::from_spec(FixtureSpec::new("a", 0, ChannelRoles::drgb())).unwrap();
        let b = Fixture::from_spec(FixtureSpec::new("b", 0, ChannelRoles::drgb())).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_set_rgb() {
        let fixture =
            Fixture::from_spec(FixtureSpec::new("par", 10, ChannelRoles::drgbws())).unwrap();
        let mut frame = LightingFrame::new(0);

        assert!(fixture.set_rgb(&mut frame, 200, 50, 100));
        assert_eq!(frame.get(10), Some(200)); // dimmer
        assert_eq!(frame.get(11), Some(200));
        assert_eq!(frame.get(12), Some(50));
        assert_eq!(frame.get(13), Some(100));
        assert_eq!(frame.get(14), Some(50)); // white
        assert_eq!(frame.get(15), Some(0)); // strobe untouched
    }

    #[test]
    fn test_camel_case_json() {
        let spec = FixtureSpec::new("wash", 32, ChannelRoles::drgb());
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["startChannel"], 32);
        assert_eq!(json["channelRoles"]["dimmer"], 0);
        assert!(json["channelRoles"].get("strobe").is_none());
    }
}
