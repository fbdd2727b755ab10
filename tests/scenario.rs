use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mediaflow::MediaError;
use mediaflow::capture::{SyntheticCapture, SyntheticOpts};
use mediaflow::config::PlayerConfig;
use mediaflow::pipeline::recorder::{
    CaptureSource, MUXER, RecorderEvent, RecorderPipelineBuilder, RecorderState, VIDEO_ENCODER,
};
use mediaflow::pipeline::{
    ContainerFormat, ElementRegistry, Param, PipelineElement, StreamType, VideoCodec,
};
use mediaflow::player::{
    ChannelObserver, PlaybackSpeed, PlayerEngine, PlayerEvent, PlayerInfo, PlayerObserver,
    PlayerState, SeekMode, SimOpts, SimulatedBackend,
};

fn engine(opts: SimOpts) -> PlayerEngine {
    let backend = Arc::new(SimulatedBackend::new(
        opts.with_preroll(Duration::from_millis(5)),
    ));
    PlayerEngine::new(backend, PlayerConfig::default())
}

#[test]
fn test_playback_scenario() {
    let engine = engine(SimOpts::default());
    engine.set_source("file:///a.mp4").unwrap();
    engine.prepare().unwrap();
    engine.play().unwrap();

    let mut last = engine.get_current_time();
    for _ in 0..3 {
        thread::sleep(Duration::from_millis(30));
        let now = engine.get_current_time();
        assert!(now > last, "{} did not advance past {}", now, last);
        last = now;
    }

    engine.seek(5_000, SeekMode::ClosestSyncPoint).unwrap();
    let position = engine.get_current_time();
    assert!((4_800..=5_200).contains(&position), "landed at {}", position);

    engine.stop().unwrap();
    assert_eq!(engine.state(), PlayerState::Stopped);
    engine.reset().unwrap();
    assert_eq!(engine.state(), PlayerState::Idle);
    engine.set_source("file:///a.mp4").unwrap();
    assert_eq!(engine.state(), PlayerState::Initialized);
}

#[test]
fn test_speed_modes_round_trip_through_backend() {
    let engine = engine(SimOpts::default());
    engine.set_source("file:///a.mp4").unwrap();
    engine.prepare().unwrap();

    for mode in PlaybackSpeed::ALL {
        engine.set_playback_speed(mode).unwrap();
        assert_eq!(engine.get_playback_speed(), Ok(mode));
    }
}

#[test]
fn test_looping_playback_never_completes() {
    let engine = engine(
        SimOpts::default()
            .with_duration(Duration::from_millis(50))
            .with_tick(Duration::from_millis(5)),
    );
    let (observer, mut events) = ChannelObserver::new();
    let observer: Arc<dyn PlayerObserver> = Arc::new(observer);
    engine.set_observer(Arc::downgrade(&observer)).unwrap();

    engine.set_source("file:///loop.mp4").unwrap();
    engine.set_looping(true).unwrap();
    engine.prepare_async().unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut prepared = false;
    let mut loops = 0;
    while loops < 2 {
        assert!(Instant::now() < deadline, "looped {} times", loops);
        match events.try_recv() {
            Ok(PlayerEvent::Info(PlayerInfo::Prepared)) => {
                prepared = true;
                engine.play().unwrap();
            }
            Ok(PlayerEvent::Info(PlayerInfo::Looped)) => loops += 1,
            Ok(PlayerEvent::Info(PlayerInfo::EndOfStream)) => panic!("completed while looping"),
            Ok(PlayerEvent::Error(e)) => panic!("playback failed: {}", e),
            Ok(_) => {}
            Err(_) => thread::sleep(Duration::from_millis(5)),
        }
    }
    assert!(prepared);
    assert_eq!(engine.state(), PlayerState::Started);
}

#[test]
fn test_recording_scenario() {
    let path = std::env::temp_dir().join(format!("mediaflow-scenario-{}.h264", std::process::id()));
    let opts = SyntheticOpts::default()
        .with_paced(false)
        .with_max_frames(45);

    let mut builder = RecorderPipelineBuilder::new();
    let source = builder
        .add_with("camera", |param| {
            let source: Box<dyn PipelineElement> = Box::new(CaptureSource::with_factory(
                param,
                SyntheticCapture::factory(opts),
            ));
            Ok(source)
        })
        .unwrap();
    builder
        .configure(source, Param::SourceStreamType(StreamType::EsAvc))
        .unwrap();
    builder
        .configure(source, Param::VideoSize { width: 640, height: 360 })
        .unwrap();

    let encoder = builder.add(VIDEO_ENCODER, "h264").unwrap();
    for param in [
        Param::VideoEncoder(VideoCodec::H264),
        Param::VideoSize { width: 640, height: 360 },
        Param::VideoFrameRate(30),
        Param::VideoBitRate(2_000_000),
    ] {
        builder.configure(encoder, param).unwrap();
    }

    let muxer = builder.add(MUXER, "file").unwrap();
    builder
        .configure(muxer, Param::OutputFormat(ContainerFormat::Raw))
        .unwrap();
    builder.configure(muxer, Param::OutputPath(path.clone())).unwrap();

    let mut recorder = builder.build().unwrap();
    let mut events = recorder.take_events().unwrap();
    recorder.prepare().unwrap();
    recorder.start().unwrap();

    loop {
        match events.blocking_recv() {
            Some(RecorderEvent::EndOfStream) => break,
            Some(RecorderEvent::Error { error, .. }) => panic!("recording failed: {}", error),
            Some(_) => {}
            None => panic!("event stream closed"),
        }
    }
    recorder.stop(true).unwrap();
    assert_eq!(recorder.state(), RecorderState::Stopped);
    assert_eq!(recorder.health().frames_processed(), 45);

    let data = std::fs::read(&path).unwrap();
    // codec header first, then the first IDR
    assert_eq!(&data[..5], &[0, 0, 0, 1, 0x67]);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_registry_is_first_registration_wins() {
    let registry = ElementRegistry::global();
    let before = registry.len();
    let result = registry.register_element(MUXER, |_param| {
        Err(MediaError::unavailable("replacement muxer"))
    });
    assert!(matches!(result, Err(MediaError::InvalidParameter(_))));
    assert_eq!(registry.len(), before);
    assert!(registry.contains(VIDEO_ENCODER));
}
