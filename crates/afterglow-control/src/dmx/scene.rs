//! Lighting scenes and their fade playback

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::universe::LightingFrame;

/// Target values for one fixture, keyed by channel offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneFixture {
    pub fixture_id: Uuid,
    pub values: BTreeMap<u16, u8>,
}

/// Request for [`DmxMapper::create_scene`](super::DmxMapper::create_scene)
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSpec {
    pub name: String,
    pub fixtures: Vec<SceneFixture>,
    /// Hold time after the fade; zero holds until released
    pub duration: Duration,
    pub fade_time: Duration,
}

/// A registered scene
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: Uuid,
    pub name: String,
    pub fixtures: Vec<SceneFixture>,
    pub duration: Duration,
    pub fade_time: Duration,
}

impl Scene {
    pub(crate) fn from_spec(spec: SceneSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            fixtures: spec.fixtures,
            duration: spec.duration,
            fade_time: spec.fade_time,
        }
    }
}

/// One channel moving from its value at trigger time to the scene value
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ChannelFade {
    pub channel: usize,
    pub from: u8,
    pub to: u8,
}

/// Running scene: linear fade, then hold
#[derive(Debug, Clone)]
pub(crate) struct ScenePlayback {
    pub scene_id: Uuid,
    started_at: Instant,
    fade_time: Duration,
    duration: Duration,
    fades: Vec<ChannelFade>,
    fixtures: HashSet<Uuid>,
}

impl ScenePlayback {
    pub fn new(scene: &Scene, fades: Vec<ChannelFade>, started_at: Instant) -> Self {
        Self {
            scene_id: scene.id,
            started_at,
            fade_time: scene.fade_time,
            duration: scene.duration,
            fades,
            fixtures: scene.fixtures.iter().map(|f| f.fixture_id).collect(),
        }
    }

    /// Fade progress in `[0, 1]`
    pub fn progress(&self, now: Instant) -> f32 {
        if self.fade_time.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f32() / self.fade_time.as_secs_f32()).min(1.0)
    }

    /// Fade and hold are over
    pub fn is_finished(&self, now: Instant) -> bool {
        !self.duration.is_zero()
            && now.saturating_duration_since(self.started_at) >= self.fade_time + self.duration
    }

    pub fn controls(&self, fixture_id: &Uuid) -> bool {
        self.fixtures.contains(fixture_id)
    }

    /// Write interpolated values for `now`, returns `true` if any channel changed
    pub fn apply(&self, frame: &mut LightingFrame, now: Instant) -> bool {
        let t = self.progress(now);
        let mut changed = false;
        for fade in &self.fades {
            let value = lerp_u8(fade.from, fade.to, t);
            if frame.get(fade.channel) != Some(value) {
                changed |= frame.set(fade.channel, value);
            }
        }
        changed
    }
}

fn lerp_u8(from: u8, to: u8, t: f32) -> u8 {
    let value = from as f32 + (to as f32 - from as f32) * t;
    value.round().clamp(0.0, 255.0) as u8
}
