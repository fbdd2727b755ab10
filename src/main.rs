use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{panic, process};

use anyhow::{Context, anyhow, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use log::{info, warn};

use mediaflow::assets::{FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH, VIDEO_BIT_RATE};
use mediaflow::capture::{SyntheticCapture, SyntheticOpts};
use mediaflow::config::{PlayerConfig, RecorderConfig, app_name, app_version};
use mediaflow::pipeline::recorder::{
    CaptureSource, MUXER, RecorderEvent, RecorderPipelineBuilder, VIDEO_ENCODER,
};
use mediaflow::pipeline::{ContainerFormat, Param, PipelineElement, StreamType, VideoCodec};
use mediaflow::player::{
    ChannelObserver, PlaybackSpeed, PlayerEngine, PlayerEvent, PlayerInfo, PlayerObserver,
    SeekMode, SimOpts, SimulatedBackend,
};
use mediaflow::utils::SignalOfStop;

/// How often the CLI polls player events while waiting on an async prepare.
const EVENT_POLL: Duration = Duration::from_millis(20);

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .subcommand(
            Command::new("play")
                .about("Play a locator on the simulated backend.")
                .arg(Arg::new("uri").value_name("URI").required(true))
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .value_name("N")
                        .help("Stop after this many seconds.")
                        .value_parser(value_parser!(u64))
                        .default_value("5"),
                )
                .arg(
                    Arg::new("speed")
                        .long("speed")
                        .value_name("SPEED")
                        .help("Playback speed (0.75, 1, 1.25, 1.75, 2).")
                        .default_value("1"),
                )
                .arg(
                    Arg::new("loop")
                        .long("loop")
                        .help("Restart at end of stream.")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("seek")
                        .long("seek")
                        .value_name("MS")
                        .help("Seek to the closest sync point before playing.")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("async")
                        .long("async")
                        .help("Prepare on a worker thread.")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("record")
                .about("Record synthetic frames to a raw elementary stream.")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("PATH")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("frames")
                        .long("frames")
                        .value_name("N")
                        .value_parser(value_parser!(u64))
                        .default_value("90"),
                )
                .arg(
                    Arg::new("width")
                        .long("width")
                        .value_parser(value_parser!(u32))
                        .help("Frame width, defaults to 1280."),
                )
                .arg(
                    Arg::new("height")
                        .long("height")
                        .value_parser(value_parser!(u32))
                        .help("Frame height, defaults to 720."),
                )
                .arg(
                    Arg::new("fps")
                        .long("fps")
                        .value_parser(value_parser!(u32))
                        .help("Frames per second, defaults to 30."),
                ),
        )
        .get_matches();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    // first SIGINT stops gracefully, the second one exits
    let stop = SignalOfStop::new();
    let handler_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_stop.cancelled() {
            process::exit(130);
        }
        handler_stop.cancel();
    }) {
        warn!("cannot install Ctrl-C handler: {}", e);
    }

    let result = match matches.subcommand() {
        Some(("play", args)) => run_play(args, &stop),
        Some(("record", args)) => run_record(args, &stop),
        _ => Err(anyhow!("unknown command")),
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn run_play(args: &ArgMatches, stop: &SignalOfStop) -> anyhow::Result<()> {
    let uri = args.get_one::<String>("uri").context("missing URI")?;
    let seconds = args.get_one::<u64>("seconds").copied().unwrap_or(5);
    let speed_text = args.get_one::<String>("speed").map(String::as_str).unwrap_or("1");
    let speed = PlaybackSpeed::parse(speed_text)
        .with_context(|| format!("unsupported speed '{}'", speed_text))?;

    let backend = Arc::new(SimulatedBackend::new(SimOpts::default()));
    let engine = PlayerEngine::new(backend, PlayerConfig::default());

    let (observer, mut events) = ChannelObserver::new();
    let observer: Arc<dyn PlayerObserver> = Arc::new(observer);
    engine.set_observer(Arc::downgrade(&observer))?;
    engine.set_source(uri)?;
    engine.set_playback_speed(speed)?;
    engine.set_looping(args.get_flag("loop"))?;

    if args.get_flag("async") {
        engine.prepare_async()?;
        loop {
            if stop.sleep(EVENT_POLL) {
                engine.reset()?;
                return Ok(());
            }
            match events.try_recv() {
                Ok(PlayerEvent::Info(PlayerInfo::Prepared)) => break,
                Ok(PlayerEvent::Error(e)) => return Err(e).context("async prepare failed"),
                Ok(other) => info!("{:?}", other),
                Err(_) => {}
            }
        }
    } else {
        engine.prepare().context("prepare failed")?;
    }

    if let Some(position) = args.get_one::<u64>("seek") {
        engine.seek(*position, SeekMode::ClosestSyncPoint)?;
    }
    engine.play()?;
    info!(
        "playing {} at {} for {}s ({} ms long)",
        uri,
        speed,
        seconds,
        engine.get_duration()
    );

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut ended = false;
    while !ended && Instant::now() < deadline && !stop.sleep(Duration::from_millis(250)) {
        while let Ok(event) = events.try_recv() {
            match event {
                PlayerEvent::Info(PlayerInfo::EndOfStream) => ended = true,
                PlayerEvent::Error(e) => bail!("playback failed: {}", e),
                PlayerEvent::Info(info) => info!("{:?}", info),
            }
        }
        info!(
            "position {} / {} ms",
            engine.get_current_time(),
            engine.get_duration()
        );
    }

    if engine.state().is_prepared() {
        engine.stop()?;
    }
    engine.reset()?;
    Ok(())
}

fn run_record(args: &ArgMatches, stop: &SignalOfStop) -> anyhow::Result<()> {
    let output = args.get_one::<PathBuf>("output").context("missing output")?;
    let frames = args.get_one::<u64>("frames").copied().unwrap_or(90);
    let width = args.get_one::<u32>("width").copied().unwrap_or(FRAME_WIDTH);
    let height = args.get_one::<u32>("height").copied().unwrap_or(FRAME_HEIGHT);
    let fps = args.get_one::<u32>("fps").copied().unwrap_or(FRAME_RATE);
    if width == 0 || height == 0 || fps == 0 {
        bail!("width, height and fps must be non-zero");
    }

    let opts = SyntheticOpts::default()
        .with_frame_rate(fps)
        .with_max_frames(frames);
    let mut builder = RecorderPipelineBuilder::new().config(RecorderConfig::default());

    let source = builder.add_with("source", |param| {
        let source: Box<dyn PipelineElement> = Box::new(CaptureSource::with_factory(
            param,
            SyntheticCapture::factory(opts),
        ));
        Ok(source)
    })?;
    builder.configure(source, Param::SourceStreamType(StreamType::EsAvc))?;
    builder.configure(source, Param::VideoSize { width, height })?;

    let encoder = builder.add(VIDEO_ENCODER, "encoder")?;
    builder.configure(encoder, Param::VideoEncoder(VideoCodec::H264))?;
    builder.configure(encoder, Param::VideoSize { width, height })?;
    builder.configure(encoder, Param::VideoFrameRate(fps))?;
    builder.configure(encoder, Param::VideoBitRate(VIDEO_BIT_RATE))?;

    let muxer = builder.add(MUXER, "muxer")?;
    builder.configure(muxer, Param::OutputFormat(ContainerFormat::Raw))?;
    builder.configure(muxer, Param::OutputPath(output.clone()))?;

    let mut recorder = builder.build()?;
    let mut events = recorder.take_events().context("recorder events already taken")?;
    recorder.prepare().context("prepare failed")?;
    recorder.start()?;
    info!("recording {} frames to {}", frames, output.display());

    let mut ended = false;
    let mut stalled = false;
    while !ended && !stop.sleep(Duration::from_millis(100)) {
        if recorder.is_stalled() != stalled {
            stalled = !stalled;
            if stalled {
                warn!("recorder stalled, no frame written recently");
            } else {
                info!("recorder producing frames again");
            }
        }
        while let Ok(event) = events.try_recv() {
            match event {
                RecorderEvent::EndOfStream => ended = true,
                RecorderEvent::Error { handle, error } => {
                    bail!("stage {:?} failed: {}", handle, error)
                }
                RecorderEvent::StateChanged(state) => info!("recorder {}", state),
            }
        }
    }

    recorder.stop(true).context("stop failed")?;
    info!("{}", recorder.health().summary());
    Ok(())
}
