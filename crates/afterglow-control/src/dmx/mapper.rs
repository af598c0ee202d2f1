//! Feature frame to DMX mapping
//!
//! The mapper owns the fixture registry, the universe buffer and the scene list.
//! Every accepted update sends the complete 512-channel buffer; nothing is sent
//! unless the link is `Connected`, and a full outbound queue drops the frame.

use afterglow_core::classifier::clamp01;
use afterglow_core::FeatureFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::fixtures::{Fixture, FixtureSpec};
use super::protocol::{DmxEcho, OutboundMessage};
use super::scene::{ChannelFade, Scene, ScenePlayback, SceneSpec};
use super::transport::{run_link, ConnectionState, LinkShared};
use super::universe::{LightingFrame, DMX_UNIVERSE_SIZE};
use crate::error::{ControlError, Result};

/// Lighting output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// `host:port` of the lighting server
    pub endpoint: String,
    pub universe: u16,
    pub connect_timeout_ms: u64,
    /// How long a beat holds the strobe channel at full
    pub strobe_pulse_ms: u64,
    /// Outbound messages buffered before frames are dropped
    pub queue_depth: usize,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:7770".to_string(),
            universe: 0,
            connect_timeout_ms: 3000,
            strobe_pulse_ms: 100,
            queue_depth: 16,
        }
    }
}

struct StrobeRelease {
    channel: usize,
    restore: u8,
    until: Instant,
}

/// Maps feature frames onto registered fixtures and streams the universe
pub struct DmxMapper {
    config: LightingConfig,
    fixtures: Vec<Fixture>,
    scenes: HashMap<Uuid, Scene>,
    active_scene: Option<ScenePlayback>,
    frame: LightingFrame,
    strobe_releases: Vec<StrobeRelease>,
    shared: Arc<LinkShared>,
    sender: Option<mpsc::Sender<OutboundMessage>>,
    frames_sent: u64,
    frames_dropped: u64,
}

impl DmxMapper {
    pub fn new(config: LightingConfig) -> Self {
        let frame = LightingFrame::new(config.universe);
        Self {
            config,
            fixtures: Vec::new(),
            scenes: HashMap::new(),
            active_scene: None,
            frame,
            strobe_releases: Vec::new(),
            shared: Arc::new(LinkShared::new()),
            sender: None,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    /// Current link state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch link state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.subscribe()
    }

    /// Connect to `endpoint` over TCP. A failed attempt leaves the mapper in `Error`.
    pub async fn connect(&mut self, endpoint: &str) -> Result<()> {
        self.drop_link();
        let generation = self.shared.begin(ConnectionState::Connecting);
        info!("Connecting to lighting server at {}...", endpoint);

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Failed to connect to lighting server {}: {}", endpoint, e);
                self.shared.set_for(generation, ConnectionState::Error);
                return Err(ControlError::IoError(e));
            }
            Err(_) => {
                error!("Connecting to lighting server {} timed out", endpoint);
                self.shared.set_for(generation, ConnectionState::Error);
                return Err(ControlError::ConnectTimeout(endpoint.to_string()));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        self.connect_stream(stream);
        Ok(())
    }

    /// Use an already open byte stream as the link and send `init`
    pub fn connect_stream<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.drop_link();
        let generation = self.shared.begin(ConnectionState::Connecting);

        let (sender, receiver) = mpsc::channel(self.config.queue_depth.max(1));
        let init = OutboundMessage::Init {
            universe: self.config.universe,
            fixtures: self.fixtures.clone(),
        };
        // Fresh channel with capacity >= 1
        if sender.try_send(init).is_err() {
            warn!("Could not queue init message");
        }

        self.shared.set_for(generation, ConnectionState::Connected);
        tokio::spawn(run_link(
            stream,
            receiver,
            Arc::clone(&self.shared),
            generation,
        ));
        self.sender = Some(sender);
        info!(
            "Lighting link connected (universe {}, {} fixtures)",
            self.config.universe,
            self.fixtures.len()
        );
    }

    /// Close the link. Queued messages are still flushed by the link task.
    pub fn disconnect(&mut self) {
        if self.sender.is_some() {
            info!("Disconnecting lighting link");
        }
        self.drop_link();
        self.shared.begin(ConnectionState::Disconnected);
    }

    fn drop_link(&mut self) {
        // Dropping the sender ends the link task once its queue is drained
        self.sender = None;
    }

    /// Validate and register a fixture, announcing it when connected
    pub fn register_fixture(&mut self, spec: FixtureSpec) -> Result<Uuid> {
        let fixture = match Fixture::from_spec(spec) {
            Ok(fixture) => fixture,
            Err(e) => {
                warn!("Rejected fixture: {}", e);
                return Err(e);
            }
        };
        let id = fixture.id;
        info!(
            "Registered fixture '{}' at channel {} ({})",
            fixture.name, fixture.start_channel, id
        );

        if self.is_connected() {
            self.send(OutboundMessage::AddFixture {
                fixture: fixture.clone(),
            });
        }
        self.fixtures.push(fixture);
        Ok(id)
    }

    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    pub fn fixture(&self, id: &Uuid) -> Option<&Fixture> {
        self.fixtures.iter().find(|f| &f.id == id)
    }

    /// Current universe buffer
    pub fn frame(&self) -> &LightingFrame {
        &self.frame
    }

    /// Write one feature frame into the universe and send it.
    ///
    /// Returns `true` when the buffer was queued for transmission.
    pub fn map_frame(&mut self, features: &FeatureFrame, beat: bool) -> bool {
        if !self.is_connected() {
            return false;
        }
        let now = features.timestamp;
        self.release_strobes(now);
        self.advance_scene(now);

        let features = features.sanitized();
        let r = to_dmx(features.rms);
        let g = to_dmx(features.spectral_centroid);
        let b = to_dmx(features.spectral_flux);
        let pulse = Duration::from_millis(self.config.strobe_pulse_ms);

        for fixture in &self.fixtures {
            if self
                .active_scene
                .as_ref()
                .is_some_and(|scene| scene.controls(&fixture.id))
            {
                continue;
            }
            fixture.set_rgb(&mut self.frame, r, g, b);

            if let (true, Some(channel)) = (beat, fixture.strobe_channel()) {
                match self
                    .strobe_releases
                    .iter_mut()
                    .find(|release| release.channel == channel)
                {
                    Some(release) => release.until = now + pulse,
                    None => {
                        let restore = self.frame.get(channel).unwrap_or(0);
                        self.strobe_releases.push(StrobeRelease {
                            channel,
                            restore,
                            until: now + pulse,
                        });
                    }
                }
                self.frame.set(channel, 255);
            }
        }

        self.send_frame()
    }

    /// Release expired strobe pulses and advance a running scene.
    ///
    /// Returns `true` when a changed buffer was queued.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.is_connected() {
            return false;
        }
        let released = self.release_strobes(now);
        let faded = self.advance_scene(now);
        if released || faded {
            self.send_frame()
        } else {
            false
        }
    }

    /// Register a scene. Every fixture must exist and every value must stay inside the universe.
    pub fn create_scene(&mut self, spec: SceneSpec) -> Result<Uuid> {
        for entry in &spec.fixtures {
            let fixture = self.fixture(&entry.fixture_id).ok_or_else(|| {
                ControlError::InvalidScene(format!(
                    "'{}' references unknown fixture {}",
                    spec.name, entry.fixture_id
                ))
            })?;
            if let Some((&offset, _)) = entry
                .values
                .iter()
                .find(|(&offset, _)| fixture.channel(offset) >= DMX_UNIVERSE_SIZE)
            {
                return Err(ControlError::InvalidScene(format!(
                    "'{}' writes offset {} of '{}' outside the universe",
                    spec.name, offset, fixture.name
                )));
            }
        }

        let scene = Scene::from_spec(spec);
        let id = scene.id;
        info!("Created scene '{}' ({})", scene.name, id);
        self.scenes.insert(id, scene);
        Ok(id)
    }

    pub fn scene(&self, id: &Uuid) -> Option<&Scene> {
        self.scenes.get(id)
    }

    /// Fade into a scene from the current buffer
    pub fn trigger_scene(&mut self, id: &Uuid, now: Instant) -> Result<()> {
        let scene = self
            .scenes
            .get(id)
            .ok_or_else(|| ControlError::SceneNotFound(id.to_string()))?;

        let mut fades = Vec::new();
        for entry in &scene.fixtures {
            // Fixtures cannot be unregistered, create_scene checked they exist
            let Some(fixture) = self.fixtures.iter().find(|f| f.id == entry.fixture_id) else {
                continue;
            };
            for (&offset, &to) in &entry.values {
                let channel = fixture.channel(offset);
                if let Some(from) = self.frame.get(channel) {
                    fades.push(ChannelFade { channel, from, to });
                }
            }
        }

        info!(
            "Triggering scene '{}' (fade {:?}, hold {:?})",
            scene.name, scene.fade_time, scene.duration
        );
        let playback = ScenePlayback::new(scene, fades, now);
        let scene_id = scene.id;
        playback.apply(&mut self.frame, now);
        self.active_scene = Some(playback);

        if self.is_connected() {
            self.send(OutboundMessage::TriggerScene { scene_id });
            self.send_frame();
        }
        Ok(())
    }

    /// Hand scene fixtures back to audio mapping
    pub fn release_scene(&mut self) {
        if let Some(playback) = self.active_scene.take() {
            info!("Released scene {}", playback.scene_id);
        }
    }

    pub fn active_scene(&self) -> Option<Uuid> {
        self.active_scene.as_ref().map(|playback| playback.scene_id)
    }

    /// Last `dmx_update` echoed by the server
    pub fn last_echo(&self) -> Option<DmxEcho> {
        self.shared.last_echo()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    fn release_strobes(&mut self, now: Instant) -> bool {
        let before = self.strobe_releases.len();
        let frame = &mut self.frame;
        self.strobe_releases.retain(|release| {
            if now >= release.until {
                frame.set(release.channel, release.restore);
                false
            } else {
                true
            }
        });
        before != self.strobe_releases.len()
    }

    /// Returns `true` when the scene changed the buffer
    fn advance_scene(&mut self, now: Instant) -> bool {
        let Some(playback) = &self.active_scene else {
            return false;
        };
        if playback.is_finished(now) {
            info!("Scene {} finished", playback.scene_id);
            self.active_scene = None;
            return false;
        }
        playback.apply(&mut self.frame, now)
    }

    fn send_frame(&mut self) -> bool {
        let sent = self.send(OutboundMessage::DmxData {
            universe: self.frame.universe,
            channels: self.frame.channels().to_vec(),
        });
        if sent {
            self.frames_sent += 1;
        }
        sent
    }

    fn send(&mut self, message: OutboundMessage) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(message) {
            Ok(()) => true,
            // A newer frame supersedes a dropped one, control messages are lost for good
            Err(mpsc::error::TrySendError::Full(message @ OutboundMessage::DmxData { .. })) => {
                self.frames_dropped += 1;
                debug!("Lighting queue full, dropping {} message", message.kind());
                false
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!("Lighting queue full, {} message lost", message.kind());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Lighting link closed");
                self.sender = None;
                self.shared.begin(ConnectionState::Disconnected);
                false
            }
        }
    }
}

fn to_dmx(value: f32) -> u8 {
    (clamp01(value) * 255.0).round() as u8
}
