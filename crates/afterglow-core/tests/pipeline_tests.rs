use afterglow_core::audio::{ANALYSIS_BUFFER_SIZE, FrameOrigin};
use afterglow_core::{
    AnalysisEngine, AudioElement, ClassifierConfig, CoreError, EngineLoadError, EventBus,
    FeatureFrame, FeatureSource, FeatureSourceConfig, IntensityClassifier, PipelineEvent,
    SignalSource, Theme, ThemeConfig, ThemeStateMachine,
};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Engine that replays prepared frames, one per analysis buffer
struct ScriptedEngine {
    frames: VecDeque<FeatureFrame>,
}

impl AnalysisEngine for ScriptedEngine {
    fn buffer_size(&self) -> usize {
        ANALYSIS_BUFFER_SIZE
    }

    fn analyze(
        &mut self,
        _buffer: &[f32],
        timestamp: Instant,
    ) -> afterglow_core::Result<FeatureFrame> {
        let frame = self
            .frames
            .pop_front()
            .ok_or_else(|| CoreError::Engine("script exhausted".to_string()))?;
        Ok(FeatureFrame { timestamp, ..frame })
    }
}

fn frame(rms: f32, flux: f32, centroid: f32, at: Instant) -> FeatureFrame {
    FeatureFrame {
        rms,
        spectral_flux: flux,
        spectral_centroid: centroid,
        ..FeatureFrame::silent(at)
    }
}

/// Drain the bus, feeding frames through classifier and theme machine
fn drive(
    rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>,
    classifier: &mut IntensityClassifier,
    theme: &mut ThemeStateMachine,
) -> Vec<PipelineEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::FeatureFrame(frame) = &event {
            if let Some(reading) = classifier.process(frame) {
                theme.update(&reading);
            }
        }
        seen.push(event);
    }
    seen
}

#[test]
fn test_quiet_then_drop_transitions_once() {
    let bus = EventBus::default();
    let mut frames_rx = bus.subscribe();
    let mut theme_rx = bus.subscribe();

    let start = Instant::now();
    let mut script: VecDeque<FeatureFrame> =
        (0..20).map(|_| frame(0.05, 0.0, 0.0, start)).collect();
    script.push_back(frame(0.9, 0.8, 0.0, start));

    let mut source = FeatureSource::new(FeatureSourceConfig::default(), bus.clone());
    source.attach(AudioElement::new("set.wav", 44100), move |_| {
        let engine: Box<dyn AnalysisEngine> = Box::new(ScriptedEngine { frames: script });
        Ok(engine)
    });

    let mut classifier = IntensityClassifier::new(ClassifierConfig::default());
    let mut theme = ThemeStateMachine::new(ThemeConfig::default(), bus.clone());
    let buffer = vec![0.0f32; ANALYSIS_BUFFER_SIZE];

    for i in 0..20u64 {
        source.push_samples(&buffer, start + Duration::from_millis(i * 200));
        drive(&mut frames_rx, &mut classifier, &mut theme);
        assert_eq!(theme.current_theme(), Theme::Low);
    }

    source.push_samples(&buffer, start + Duration::from_millis(4200));
    drive(&mut frames_rx, &mut classifier, &mut theme);
    assert_eq!(theme.current_theme(), Theme::High);

    let changes: Vec<_> = std::iter::from_fn(|| theme_rx.try_recv().ok())
        .filter_map(|event| match event {
            PipelineEvent::ThemeChanged(change) => Some(change),
            _ => None,
        })
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].theme, Theme::High);
    assert_eq!(changes[0].source, SignalSource::Analysis);
}

#[test]
fn test_repeated_load_failures_switch_to_synthetic_for_session() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let mut source = FeatureSource::new(FeatureSourceConfig::default(), bus.clone());
    let element = AudioElement::new("set.wav", 44100);

    for attempt in 1..=5 {
        assert!(!source.is_synthetic(), "switched early at attempt {}", attempt);
        source.attach(element.clone(), |_| {
            Err(EngineLoadError::Init("worklet failed to load".to_string()))
        });
    }
    assert!(source.is_synthetic());
    assert_eq!(source.engine_failures(), 5);

    // The engine "recovers": attaching again is ignored and real audio yields nothing
    source.attach_spectral(element);
    assert!(source.is_synthetic());
    let start = Instant::now();
    assert_eq!(source.push_samples(&[0.7; ANALYSIS_BUFFER_SIZE * 4], start), 0);

    let synthetic = source.poll_synthetic(start).expect("synthetic frame");
    assert_eq!(synthetic.origin, FrameOrigin::Synthetic);

    let mut classifier = IntensityClassifier::default();
    let reading = classifier.process(&synthetic).unwrap();
    assert_eq!(reading.source, SignalSource::Synthetic);

    // Only the synthetic frame reached the bus
    let frames: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        PipelineEvent::FeatureFrame(frame) => assert!(frame.is_synthetic()),
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_fast_frames_are_throttled() {
    let bus = EventBus::default();
    let mut theme_rx = bus.subscribe();
    let mut classifier = IntensityClassifier::default();
    let mut theme = ThemeStateMachine::new(ThemeConfig::default(), bus);
    let start = Instant::now();

    // Alternate between extremes every 10 ms for one second
    let mut readings = 0;
    for i in 0..100u64 {
        let loud = i % 2 == 0;
        let f = if loud {
            frame(0.95, 0.0, 0.0, start + Duration::from_millis(i * 10))
        } else {
            frame(0.0, 0.0, 0.0, start + Duration::from_millis(i * 10))
        };
        if let Some(reading) = classifier.process(&f) {
            readings += 1;
            theme.update(&reading);
        }
    }

    // 990 ms elapsed -> at most 990 / 150 + 1 readings
    assert!(readings <= 7, "{} readings", readings);
    let broadcasts = std::iter::from_fn(|| theme_rx.try_recv().ok()).count();
    assert!(broadcasts <= 7, "{} broadcasts", broadcasts);
}

proptest! {
    #[test]
    fn prop_intensity_is_clamped(
        rms in prop::num::f32::ANY,
        flux in prop::num::f32::ANY,
        centroid in prop::num::f32::ANY,
    ) {
        let classifier = IntensityClassifier::default();
        let value = classifier.intensity(&frame(rms, flux, centroid, Instant::now()));
        prop_assert!((0.0..=1.0).contains(&value), "intensity {}", value);
    }

    #[test]
    fn prop_throttle_bounds_broadcasts(
        steps in prop::collection::vec((1u64..150, 0.0f32..1.0), 1..200),
    ) {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut classifier = IntensityClassifier::default();
        let mut theme = ThemeStateMachine::new(ThemeConfig::default(), bus);
        let start = Instant::now();
        let mut elapsed = 0u64;

        for (gap, rms) in &steps {
            elapsed += gap;
            let f = frame(*rms, 0.0, 0.0, start + Duration::from_millis(elapsed));
            if let Some(reading) = classifier.process(&f) {
                theme.update(&reading);
            }
        }

        let broadcasts = std::iter::from_fn(|| rx.try_recv().ok()).count() as u64;
        // First frame lands at `steps[0].0`, so the window is measured from there
        let window = elapsed - steps[0].0;
        prop_assert!(broadcasts <= window / 150 + 1, "{} broadcasts in {} ms", broadcasts, window);
    }

    #[test]
    fn prop_no_flicker_within_band(
        values in prop::collection::vec(0.36f32..0.70, 2..100),
        gap in 1u64..400,
    ) {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut classifier = IntensityClassifier::default();
        let mut theme = ThemeStateMachine::new(ThemeConfig::default(), bus);
        let start = Instant::now();

        for (i, rms) in values.iter().enumerate() {
            let f = frame(*rms, 0.0, 0.0, start + Duration::from_millis(i as u64 * gap));
            if let Some(reading) = classifier.process(&f) {
                theme.update(&reading);
            }
        }

        // Only the entry into Mid
        let broadcasts = std::iter::from_fn(|| rx.try_recv().ok()).count();
        prop_assert_eq!(broadcasts, 1);
        prop_assert_eq!(theme.current_theme(), Theme::Mid);
    }
}
