//! Session controller
//!
//! Owns the feature source, classifier, theme machine and DMX mapper for one
//! playing session and drives them from a single select loop. The player
//! supervisor runs its own tasks and is only started and stopped from here.

use afterglow_control::widget::HttpWidgetHost;
use afterglow_control::{DmxMapper, WidgetSupervisor};
use afterglow_core::{
    AudioElement, EngineLoadError, EventBus, FeatureFrame, FeatureSource, FeatureSourceConfig,
    IntensityClassifier, PipelineEvent, Theme, ThemeStateMachine,
};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, SessionOptions};
use crate::track::WavTrack;

/// What happened during a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub strategy: &'static str,
    pub frames: u64,
    pub beats: u64,
    pub theme: Theme,
    pub dmx_frames_sent: u64,
    pub dmx_frames_dropped: u64,
}

pub struct SessionController {
    options: SessionOptions,
    source_config: FeatureSourceConfig,
    bus: EventBus,
    source: FeatureSource,
    classifier: IntensityClassifier,
    theme: ThemeStateMachine,
    mapper: DmxMapper,
    supervisor: Option<WidgetSupervisor>,
    track: Option<WavTrack>,
}

impl SessionController {
    /// Build every component and register the configured fixtures
    pub fn new(config: AppConfig) -> Result<Self> {
        let bus = EventBus::default();
        let source = FeatureSource::new(config.source.clone(), bus.clone());
        let classifier = IntensityClassifier::new(config.classifier);
        let theme = ThemeStateMachine::new(config.theme, bus.clone());

        let mut mapper = DmxMapper::new(config.lighting);
        for spec in config.fixtures {
            let name = spec.name.clone();
            mapper
                .register_fixture(spec)
                .with_context(|| format!("Fixture '{}' rejected", name))?;
        }

        let supervisor = if config.session.widget_enabled {
            let host = HttpWidgetHost::new(
                config.widget.base_url.clone(),
                Duration::from_millis(config.widget.poll_interval_ms),
            )
            .context("Failed to create player HTTP client")?;
            Some(WidgetSupervisor::new(config.widget, Arc::new(host), bus.clone()))
        } else {
            None
        };

        Ok(Self {
            options: config.session,
            source_config: config.source,
            bus,
            source,
            classifier,
            theme,
            mapper,
            supervisor,
            track: None,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn source(&self) -> &FeatureSource {
        &self.source
    }

    pub fn theme(&self) -> &ThemeStateMachine {
        &self.theme
    }

    pub fn mapper(&self) -> &DmxMapper {
        &self.mapper
    }

    /// Attach the configured WAV file, or run on synthetic frames without one
    pub fn attach_audio(&mut self) {
        let Some(path) = self.options.audio_file.clone() else {
            self.source.attach(AudioElement::new("no-input", 44_100), |_| {
                Err(EngineLoadError::Unavailable(
                    "no audio file configured".to_string(),
                ))
            });
            return;
        };

        match WavTrack::open(&path) {
            Ok(track) => {
                info!(
                    "Playing {} ({} Hz, {:.1}s)",
                    track.name(),
                    track.sample_rate(),
                    track.duration().as_secs_f32()
                );
                let element = AudioElement::new(track.name(), track.sample_rate());
                self.source.attach_spectral(element);
                if self.source.is_attached() {
                    self.track = Some(track);
                }
            }
            Err(e) => {
                warn!("{:#}", e);
                let element = AudioElement::new(path.display().to_string(), 0);
                self.source.attach(element, |_| {
                    Err(EngineLoadError::Unavailable("audio file unreadable".to_string()))
                });
            }
        }
    }

    /// Connect the mapper to its configured endpoint. Failure is logged, not fatal.
    pub async fn connect_lighting(&mut self) -> bool {
        let endpoint = self.mapper.config().endpoint.clone();
        match self.mapper.connect(&endpoint).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Lighting unavailable, continuing without it: {}", e);
                false
            }
        }
    }

    /// Route one bus event
    pub fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::FeatureFrame(frame) => self.handle_frame(&frame),
            PipelineEvent::ThemeChanged(change) => {
                debug!("Theme is now {} ({})", change.theme, change.source)
            }
            PipelineEvent::WidgetFailed { reason } => {
                error!("Player supervision gave up: {}", reason)
            }
            PipelineEvent::WidgetNetworkError { message } => {
                warn!("Player network error: {}", message)
            }
            PipelineEvent::WidgetReinitializeRequested => info!("Player is being reinitialized"),
            PipelineEvent::WidgetHealthChanged(status) => info!("Player health: {}", status),
        }
    }

    /// Classify a frame, update the theme and drive the lights
    pub fn handle_frame(&mut self, frame: &FeatureFrame) {
        let beat = match self.classifier.process(frame) {
            Some(reading) => {
                self.theme.update(&reading);
                reading.beat
            }
            None => false,
        };
        self.mapper.map_frame(frame, beat);
    }

    fn feed_audio(&mut self) {
        let buffer_size = self.source_config.buffer_size();
        let Some(track) = self.track.as_mut() else {
            return;
        };
        match track.next_chunk(buffer_size) {
            Some(chunk) => {
                self.source.push_samples(chunk, Instant::now());
            }
            None => {
                info!("{} finished", track.name());
                self.track = None;
                self.source.detach();
                return;
            }
        }
        if self.source.is_synthetic() {
            debug!("Engine gave up, dropping the decoded track");
            self.track = None;
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            strategy: self.source.strategy().label(),
            frames: self.source.frames_emitted(),
            beats: self.classifier.beat_count(),
            theme: self.theme.current_theme(),
            dmx_frames_sent: self.mapper.frames_sent(),
            dmx_frames_dropped: self.mapper.frames_dropped(),
        }
    }

    /// Run until `shutdown` resolves, then tear everything down
    pub async fn run<F>(mut self, shutdown: F) -> Result<SessionSummary>
    where
        F: Future<Output = ()>,
    {
        let mut events = self.bus.subscribe();

        self.attach_audio();
        if self.options.lighting_enabled {
            self.connect_lighting().await;
        }
        if let Some(supervisor) = &self.supervisor {
            if !supervisor.start().await {
                warn!("Player did not come up, the supervisor keeps trying");
            }
        }

        let chunk_period = self
            .track
            .as_ref()
            .map(|track| {
                AudioElement::new(track.name(), track.sample_rate())
                    .buffer_duration(self.source_config.buffer_size())
            })
            .unwrap_or(Duration::from_secs(1));
        let mut audio_tick = tokio::time::interval(chunk_period);
        let mut synthetic_tick = tokio::time::interval(self.source_config.synthetic_interval());
        let mut lighting_tick =
            tokio::time::interval(Duration::from_millis(self.options.lighting_tick_ms.max(1)));
        tokio::pin!(shutdown);

        info!("Session running ({})", self.source.strategy().label());
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down session");
                    break;
                }
                _ = audio_tick.tick(), if self.track.is_some() => self.feed_audio(),
                _ = synthetic_tick.tick(), if self.source.is_synthetic() => {
                    self.source.poll_synthetic(Instant::now());
                }
                _ = lighting_tick.tick() => {
                    self.mapper.tick(Instant::now());
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Session fell behind the bus, {} events skipped", skipped)
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        if let Some(supervisor) = &self.supervisor {
            supervisor.shutdown().await;
        }
        self.mapper.disconnect();
        self.source.detach();
        Ok(self.summary())
    }
}
