//! DMX lighting output
//!
//! Audio features are mapped onto registered fixtures inside a single 512-channel
//! universe, and the full buffer is streamed to a lighting server as newline
//! delimited JSON.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use afterglow_control::dmx::{ChannelRoles, DmxMapper, FixtureSpec, LightingConfig};
//! use afterglow_core::FeatureFrame;
//! use std::time::Instant;
//!
//! # async fn run() -> afterglow_control::Result<()> {
//! let mut mapper = DmxMapper::new(LightingConfig::default());
//! mapper.register_fixture(FixtureSpec::new("Front wash", 0, ChannelRoles::drgbws()))?;
//! mapper.connect("127.0.0.1:7770").await?;
//!
//! let frame = FeatureFrame {
//!     rms: 0.8,
//!     ..FeatureFrame::silent(Instant::now())
//! };
//! mapper.map_frame(&frame, true);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod mapper;
pub mod protocol;
pub mod scene;
pub mod transport;
pub mod universe;

pub use fixtures::{ChannelRoles, Fixture, FixtureSpec};
pub use mapper::{DmxMapper, LightingConfig};
pub use protocol::{DmxEcho, InboundMessage, OutboundMessage};
pub use scene::{Scene, SceneFixture, SceneSpec};
pub use transport::ConnectionState;
pub use universe::{LightingFrame, DMX_UNIVERSE_SIZE};
