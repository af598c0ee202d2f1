//! One DMX universe worth of channel values

use serde::{Deserialize, Serialize};

/// Channels per universe
pub const DMX_UNIVERSE_SIZE: usize = 512;

/// Full 512-channel buffer for a universe.
///
/// Writes outside the universe are rejected instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightingFrame {
    pub universe: u16,
    #[serde(with = "channel_bytes")]
    channels: [u8; DMX_UNIVERSE_SIZE],
}

impl LightingFrame {
    /// Blackout frame
    pub fn new(universe: u16) -> Self {
        Self {
            universe,
            channels: [0; DMX_UNIVERSE_SIZE],
        }
    }

    /// Set a channel, returns `false` when `index` is outside `[0, 511]`
    pub fn set(&mut self, index: usize, value: u8) -> bool {
        match self.channels.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.channels.get(index).copied()
    }

    pub fn channels(&self) -> &[u8; DMX_UNIVERSE_SIZE] {
        &self.channels
    }
}

// serde only implements arrays up to 32 elements
mod channel_bytes {
    use super::DMX_UNIVERSE_SIZE;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        channels: &[u8; DMX_UNIVERSE_SIZE],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(channels.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; DMX_UNIVERSE_SIZE], D::Error> {
        let values = Vec::<u8>::deserialize(deserializer)?;
        let len = values.len();
        values
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"512 channel values"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let mut frame = LightingFrame::new(1);
        assert!(frame.set(0, 10));
        assert!(frame.set(511, 20));
        assert!(!frame.set(512, 30));
        assert!(!frame.set(usize::MAX, 30));
        assert_eq!(frame.get(511), Some(20));
        assert_eq!(frame.get(512), None);
    }

    #[test]
    fn test_json_rejects_short_buffer() {
        let mut frame = LightingFrame::new(3);
        frame.set(100, 42);
        let json = serde_json::to_string(&frame).unwrap();
        let back: LightingFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);

        let short = r#"{"universe":0,"channels":[1,2,3]}"#;
        assert!(serde_json::from_str::<LightingFrame>(short).is_err());
    }
}
