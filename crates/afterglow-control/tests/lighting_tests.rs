use afterglow_control::dmx::{
    ChannelRoles, ConnectionState, DmxMapper, Fixture, FixtureSpec, LightingConfig, LightingFrame,
    SceneFixture, SceneSpec,
};
use afterglow_control::ControlError;
use afterglow_core::FeatureFrame;
use proptest::prelude::*;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

type Peer = Lines<BufReader<DuplexStream>>;

fn features(rms: f32, centroid: f32, flux: f32, at: Instant) -> FeatureFrame {
    FeatureFrame {
        rms,
        spectral_centroid: centroid,
        spectral_flux: flux,
        ..FeatureFrame::silent(at)
    }
}

fn connect(mapper: &mut DmxMapper) -> Peer {
    let (local, remote) = tokio::io::duplex(1 << 16);
    mapper.connect_stream(local);
    BufReader::new(remote).lines()
}

async fn next_message(peer: &mut Peer) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(2), peer.next_line())
        .await
        .expect("message in time")
        .expect("readable stream")
        .expect("open stream");
    serde_json::from_str(&line).expect("valid json")
}

async fn assert_silent(peer: &mut Peer) {
    let result = tokio::time::timeout(Duration::from_millis(100), peer.next_line()).await;
    assert!(result.is_err(), "unexpected message: {:?}", result);
}

fn channel(message: &Value, index: usize) -> u64 {
    message["channels"][index].as_u64().expect("channel value")
}

#[test]
fn test_fixture_past_universe_end_is_rejected() {
    let mut mapper = DmxMapper::new(LightingConfig::default());
    let roles = ChannelRoles {
        strobe: Some(12),
        ..ChannelRoles::drgb()
    };

    let result = mapper.register_fixture(FixtureSpec::new("edge strobe", 500, roles));
    assert!(matches!(result, Err(ControlError::FixtureOutOfRange(_))));
    assert!(mapper.fixtures().is_empty());

    // 500 + 10 = 510 still fits
    let roles = ChannelRoles {
        strobe: Some(10),
        ..ChannelRoles::drgb()
    };
    assert!(mapper
        .register_fixture(FixtureSpec::new("edge strobe", 500, roles))
        .is_ok());
    assert_eq!(mapper.fixtures().len(), 1);
}

#[tokio::test]
async fn test_connect_sends_init_then_full_frames() {
    let mut mapper = DmxMapper::new(LightingConfig {
        universe: 2,
        ..Default::default()
    });
    mapper
        .register_fixture(FixtureSpec::new("wash", 10, ChannelRoles::drgbws()))
        .unwrap();

    let mut peer = connect(&mut mapper);
    assert_eq!(mapper.state(), ConnectionState::Connected);

    let init = next_message(&mut peer).await;
    assert_eq!(init["type"], "init");
    assert_eq!(init["universe"], 2);
    assert_eq!(init["fixtures"][0]["startChannel"], 10);

    let now = Instant::now();
    assert!(mapper.map_frame(&features(0.5, 0.2, 1.4, now), false));
    let data = next_message(&mut peer).await;
    assert_eq!(data["type"], "dmx_data");
    assert_eq!(data["channels"].as_array().unwrap().len(), 512);
    assert_eq!(channel(&data, 11), 128); // red <- rms
    assert_eq!(channel(&data, 12), 51); // green <- centroid
    assert_eq!(channel(&data, 13), 255); // blue <- flux, clamped
    assert_eq!(channel(&data, 10), 255); // dimmer = brightest
    assert_eq!(channel(&data, 14), 51); // white = common
    assert_eq!(channel(&data, 0), 0);

    // Registering while connected announces the fixture
    mapper
        .register_fixture(FixtureSpec::new("spot", 100, ChannelRoles::drgb()))
        .unwrap();
    let added = next_message(&mut peer).await;
    assert_eq!(added["type"], "add_fixture");
    assert_eq!(added["fixture"]["name"], "spot");
}

#[tokio::test]
async fn test_disconnect_drops_frames_until_reconnect() {
    let mut mapper = DmxMapper::new(LightingConfig::default());
    mapper
        .register_fixture(FixtureSpec::new("par", 0, ChannelRoles::drgb()))
        .unwrap();

    let mut peer = connect(&mut mapper);
    let start = Instant::now();
    assert!(mapper.map_frame(&features(0.5, 0.0, 0.0, start), false));
    assert_eq!(next_message(&mut peer).await["type"], "init");
    assert_eq!(channel(&next_message(&mut peer).await, 1), 128);

    // Lighting server goes away mid-session
    let mut state = mapper.subscribe_state();
    drop(peer);
    state
        .wait_for(|s| *s != ConnectionState::Connected)
        .await
        .unwrap();

    for i in 1..=10u64 {
        let at = start + Duration::from_millis(i * 20);
        assert!(!mapper.map_frame(&features(0.9, 0.0, 0.0, at), true));
    }
    assert_eq!(mapper.frames_sent(), 1);

    // Reconnect: only the newest frame goes out
    let mut peer = connect(&mut mapper);
    assert!(mapper.map_frame(
        &features(0.2, 0.0, 0.0, start + Duration::from_secs(1)),
        false
    ));
    assert_eq!(next_message(&mut peer).await["type"], "init");
    let data = next_message(&mut peer).await;
    assert_eq!(data["type"], "dmx_data");
    assert_eq!(channel(&data, 1), 51);
    assert_silent(&mut peer).await;
}

#[tokio::test]
async fn test_manual_disconnect() {
    let mut mapper = DmxMapper::new(LightingConfig::default());
    let _peer = connect(&mut mapper);
    mapper.disconnect();
    assert_eq!(mapper.state(), ConnectionState::Disconnected);
    assert!(!mapper.map_frame(&features(1.0, 1.0, 1.0, Instant::now()), true));
    assert!(!mapper.tick(Instant::now()));
}

#[tokio::test]
async fn test_connect_refused_sets_error() {
    let mut mapper = DmxMapper::new(LightingConfig {
        connect_timeout_ms: 500,
        ..Default::default()
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    drop(listener);

    assert!(mapper.connect(&endpoint).await.is_err());
    assert_eq!(mapper.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_tcp_connect() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();

    let mut mapper = DmxMapper::new(LightingConfig::default());
    mapper.connect(&endpoint).await.unwrap();
    assert!(mapper.is_connected());

    let (socket, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(socket).lines();
    let line = lines.next_line().await.unwrap().unwrap();
    let init: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(init["type"], "init");
}

#[tokio::test]
async fn test_strobe_pulse_restores() {
    let mut mapper = DmxMapper::new(LightingConfig::default());
    mapper
        .register_fixture(FixtureSpec::new("strobe par", 0, ChannelRoles::drgbws()))
        .unwrap();
    let mut peer = connect(&mut mapper);
    next_message(&mut peer).await;

    let start = Instant::now();
    assert!(mapper.map_frame(&features(0.4, 0.4, 0.4, start), true));
    assert_eq!(channel(&next_message(&mut peer).await, 5), 255);

    // Nothing due yet
    assert!(!mapper.tick(start + Duration::from_millis(50)));

    assert!(mapper.tick(start + Duration::from_millis(100)));
    let released = next_message(&mut peer).await;
    assert_eq!(channel(&released, 5), 0);
    assert_eq!(channel(&released, 1), 102);
}

#[tokio::test]
async fn test_scene_fades_and_holds() {
    let mut mapper = DmxMapper::new(LightingConfig::default());
    let wash = mapper
        .register_fixture(FixtureSpec::new("wash", 0, ChannelRoles::drgb()))
        .unwrap();
    let spot = mapper
        .register_fixture(FixtureSpec::new("spot", 20, ChannelRoles::drgb()))
        .unwrap();
    let mut peer = connect(&mut mapper);
    next_message(&mut peer).await;

    let scene = mapper
        .create_scene(SceneSpec {
            name: "blue drop".to_string(),
            fixtures: vec![SceneFixture {
                fixture_id: wash,
                values: [(3, 200)].into_iter().collect(),
            }],
            duration: Duration::from_millis(500),
            fade_time: Duration::from_secs(1),
        })
        .unwrap();

    let start = Instant::now();
    mapper.trigger_scene(&scene, start).unwrap();
    assert_eq!(mapper.active_scene(), Some(scene));
    let trigger = next_message(&mut peer).await;
    assert_eq!(trigger["type"], "trigger_scene");
    assert_eq!(trigger["sceneId"], scene.to_string());
    next_message(&mut peer).await;

    assert!(mapper.tick(start + Duration::from_millis(500)));
    assert_eq!(channel(&next_message(&mut peer).await, 3), 100);

    // Audio keeps driving the other fixture only
    let at = start + Duration::from_millis(600);
    assert!(mapper.map_frame(&features(1.0, 0.0, 0.0, at), false));
    let data = next_message(&mut peer).await;
    assert_eq!(channel(&data, 3), 120);
    assert_eq!(channel(&data, 1), 0);
    assert_eq!(channel(&data, 21), 255);
    assert!(mapper.fixture(&spot).is_some());

    // After fade (1 s) and hold (0.5 s) the scene is gone
    assert!(mapper.tick(start + Duration::from_millis(1000)));
    assert_eq!(channel(&next_message(&mut peer).await, 3), 200);
    assert!(!mapper.tick(start + Duration::from_millis(1200)));
    assert!(!mapper.tick(start + Duration::from_millis(1500)));
    assert_eq!(mapper.active_scene(), None);

    let at = start + Duration::from_secs(2);
    assert!(mapper.map_frame(&features(1.0, 0.0, 0.0, at), false));
    assert_eq!(channel(&next_message(&mut peer).await, 1), 255);
}

#[tokio::test]
async fn test_full_queue_counts_only_frames() {
    let mut mapper = DmxMapper::new(LightingConfig {
        queue_depth: 1,
        ..Default::default()
    });
    let wash = mapper
        .register_fixture(FixtureSpec::new("wash", 0, ChannelRoles::drgb()))
        .unwrap();
    let scene = mapper
        .create_scene(SceneSpec {
            name: "flash".to_string(),
            fixtures: vec![SceneFixture {
                fixture_id: wash,
                values: [(0, 255)].into_iter().collect(),
            }],
            duration: Duration::ZERO,
            fade_time: Duration::ZERO,
        })
        .unwrap();

    // The link task has not run yet, so init fills the queue
    let mut peer = connect(&mut mapper);
    mapper
        .register_fixture(FixtureSpec::new("spot", 20, ChannelRoles::drgb()))
        .unwrap();
    assert_eq!(mapper.frames_dropped(), 0);

    // trigger_scene is lost, the frame after it is counted
    mapper.trigger_scene(&scene, Instant::now()).unwrap();
    assert_eq!(mapper.frames_dropped(), 1);
    assert!(!mapper.map_frame(&features(0.5, 0.0, 0.0, Instant::now()), false));
    assert_eq!(mapper.frames_dropped(), 2);
    assert_eq!(mapper.frames_sent(), 0);

    assert_eq!(next_message(&mut peer).await["type"], "init");
    assert!(mapper.map_frame(&features(0.5, 0.0, 0.0, Instant::now()), false));
    assert_eq!(next_message(&mut peer).await["type"], "dmx_data");
    assert_eq!(mapper.frames_dropped(), 2);
}

#[test]
fn test_release_scene_returns_control() {
    let mut mapper = DmxMapper::new(LightingConfig::default());
    let wash = mapper
        .register_fixture(FixtureSpec::new("wash", 0, ChannelRoles::drgb()))
        .unwrap();
    let scene = mapper
        .create_scene(SceneSpec {
            name: "latched".to_string(),
            fixtures: vec![SceneFixture {
                fixture_id: wash,
                values: [(0, 255)].into_iter().collect(),
            }],
            duration: Duration::ZERO,
            fade_time: Duration::ZERO,
        })
        .unwrap();

    mapper.trigger_scene(&scene, Instant::now()).unwrap();
    assert_eq!(mapper.frame().get(0), Some(255));
    mapper.release_scene();
    assert_eq!(mapper.active_scene(), None);
}

#[test]
fn test_scene_values_must_fit_universe() {
    let mut mapper = DmxMapper::new(LightingConfig::default());
    let edge = mapper
        .register_fixture(FixtureSpec::new("edge", 508, ChannelRoles::drgb()))
        .unwrap();
    let result = mapper.create_scene(SceneSpec {
        name: "overflow".to_string(),
        fixtures: vec![SceneFixture {
            fixture_id: edge,
            values: [(4, 255)].into_iter().collect(),
        }],
        duration: Duration::ZERO,
        fade_time: Duration::ZERO,
    });
    assert!(matches!(result, Err(ControlError::InvalidScene(_))));
}

fn roles_strategy() -> impl Strategy<Value = ChannelRoles> {
    (
        0u16..16,
        0u16..16,
        0u16..16,
        0u16..16,
        prop::option::of(0u16..32),
        prop::option::of(0u16..32),
    )
        .prop_map(|(dimmer, red, green, blue, white, strobe)| ChannelRoles {
            dimmer,
            red,
            green,
            blue,
            white,
            strobe,
            pan: None,
            tilt: None,
        })
}

proptest! {
    #[test]
    fn prop_registered_fixtures_stay_in_universe(
        specs in prop::collection::vec((0u16..560, roles_strategy()), 1..20),
        rgb in (any::<u8>(), any::<u8>(), any::<u8>()),
    ) {
        let mut mapper = DmxMapper::new(LightingConfig::default());
        let mut accepted = 0;

        for (i, (start, roles)) in specs.into_iter().enumerate() {
            let fits = start as usize + roles.max_offset() as usize <= 511;
            let spec = FixtureSpec::new(format!("f{}", i), start, roles);
            let result = mapper.register_fixture(spec);
            prop_assert_eq!(result.is_ok(), fits);
            if fits {
                accepted += 1;
            }
            prop_assert_eq!(mapper.fixtures().len(), accepted);
        }

        let mut frame = LightingFrame::new(0);
        for fixture in mapper.fixtures() {
            prop_assert!(fixture.channels().all(|c| c <= 511));
            prop_assert!(fixture.set_rgb(&mut frame, rgb.0, rgb.1, rgb.2));
        }
    }

    #[test]
    fn prop_from_spec_matches_validate(start in 0u16..1024, roles in roles_strategy()) {
        let spec = FixtureSpec::new("p", start, roles);
        prop_assert_eq!(Fixture::from_spec(spec.clone()).is_ok(), spec.validate().is_ok());
    }
}
