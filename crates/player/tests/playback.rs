//! End-to-end playback through the synthetic decoder.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use avb_audio::{ClockedHost, NullOutput};
use avb_common::{AudioMode, Geometry, PixelLayout, PlayerConfig, PlayerError, PlayerState};
use avb_decoder::{AudioSegment, ClipScript, FrameFill, HostGpuMemory, SyntheticBackend};
use avb_player::{AudioBackend, OwnedSurfaceSink, PlayerDeps, VideoHost, VideoPlayer};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

fn silent_config() -> PlayerConfig {
    let mut config = PlayerConfig::default();
    config.audio.mode = AudioMode::Disabled;
    config
}

fn player(
    config: PlayerConfig,
    script: ClipScript,
    audio: AudioBackend,
) -> (VideoPlayer<OwnedSurfaceSink>, Arc<HostGpuMemory>) {
    let gpu = Arc::new(HostGpuMemory::new());
    let player = VideoPlayer::init(
        config,
        PlayerDeps {
            backend: Arc::new(SyntheticBackend::new(script)),
            gpu_memory: gpu.clone(),
            audio,
            sink: OwnedSurfaceSink,
        },
    )
    .unwrap();
    (player, gpu)
}

#[test]
fn three_frames_before_first_read_collapse_to_latest() {
    let script = ClipScript::new(Geometry::new(64, 32))
        .with_timestamps([0, 33, 66])
        .hold_open(true)
        .with_ready_delay(Duration::from_millis(5));
    let (mut player, gpu) = player(silent_config(), script, AudioBackend::None);

    player.start(Path::new("clip.bik")).unwrap();
    assert!(wait_for(|| player.stats().frames_published == 3));
    assert!(player.is_playing());

    let frame = player.read_video_frame().unwrap();
    assert_eq!(frame.timestamp, 66);
    assert_eq!(frame.dropped, 2);
    assert_eq!(frame.surface.descriptor.geometry, Geometry::new(64, 32));
    assert!(player.read_video_frame().is_none());

    player.stop();
    assert!(player.wait_inactive(TIMEOUT));
    assert!(!player.is_playing());
    assert_eq!(player.stats().frames_dropped, 2);
    assert_eq!(gpu.live_blocks(), 0);
    assert_eq!(player.memory().live_heap_allocations(), 0);
}

#[test]
fn zero_length_clip_ends_without_publishing() {
    let script = ClipScript::new(Geometry::new(16, 16));
    let (mut player, gpu) = player(silent_config(), script, AudioBackend::None);

    player.start(Path::new("empty.bik")).unwrap();
    assert!(player.read_video_frame().is_none());
    assert!(player.wait_inactive(TIMEOUT));

    assert!(player.read_video_frame().is_none());
    assert!(!player.is_playing());
    assert_eq!(player.stats().frames_published, 0);
    assert_eq!(gpu.live_blocks(), 0);
}

#[test]
fn clip_end_tears_down_on_its_own() {
    let script = ClipScript::new(Geometry::new(16, 16)).with_frame_rate(10, 240);
    let (mut player, _gpu) = player(silent_config(), script, AudioBackend::None);

    player.start(Path::new("clip.bik")).unwrap();
    assert!(player.wait_inactive(TIMEOUT));
    assert_eq!(player.state(), PlayerState::Inactive);
    assert_eq!(player.stats().frames_published, 10);
    // Teardown discards whatever the host never read.
    assert!(player.read_video_frame().is_none());
}

#[test]
fn stop_when_inactive_is_idempotent() {
    let script = ClipScript::new(Geometry::new(16, 16)).with_timestamps([0]);
    let (mut player, _gpu) = player(silent_config(), script, AudioBackend::None);
    player.stop();

    player.start(Path::new("clip.bik")).unwrap();
    assert!(player.wait_inactive(TIMEOUT));
    player.stop();
    player.stop();
    assert_eq!(player.state(), PlayerState::Inactive);
}

#[test]
fn solid_red_reaches_the_sink_as_red() {
    let mut config = silent_config();
    config.output_layout = PixelLayout::Rgb24;
    let script = ClipScript::new(Geometry::new(32, 16))
        .with_timestamps([0])
        .with_fill(FrameFill::Solid { y: 81, u: 90, v: 240 })
        .hold_open(true);
    let (mut player, _gpu) = player(config, script, AudioBackend::None);

    player.start(Path::new("red.bik")).unwrap();
    let mut frame = None;
    assert!(wait_for(|| {
        frame = player.read_video_frame();
        frame.is_some()
    }));
    let frame = frame.unwrap();

    let desc = frame.surface.descriptor;
    assert_eq!(desc.bytes_per_pixel, 3);
    assert_eq!(desc.pitch, 96);
    assert_eq!(desc.masks.red, 0x0000FF);
    for (x, y) in [(0, 0), (31, 15), (10, 7)] {
        let px = frame.surface.pixel(x, y);
        assert!(px[0] >= 248, "{px:?}");
        assert!(px[1] <= 8 && px[2] <= 8, "{px:?}");
    }

    player.stop();
    assert!(player.wait_inactive(TIMEOUT));
}

#[test]
fn stop_before_decoder_ready_tears_down_cleanly() {
    let script = ClipScript::new(Geometry::new(16, 16))
        .with_timestamps([0, 33])
        .hold_open(true)
        .with_ready_delay(Duration::from_millis(50));
    let (mut player, gpu) = player(silent_config(), script, AudioBackend::None);

    player.start(Path::new("clip.bik")).unwrap();
    player.stop();
    assert!(player.wait_inactive(TIMEOUT));

    // Ready lands after teardown began: nothing may be launched from it.
    thread::sleep(Duration::from_millis(80));
    assert_eq!(player.state(), PlayerState::Inactive);
    assert_eq!(player.stats().frames_published, 0);
    assert!(player.read_video_frame().is_none());
    assert_eq!(gpu.live_blocks(), 0);
    assert_eq!(player.memory().live_heap_allocations(), 0);
}

#[test]
fn start_while_active_is_busy_and_restart_works() {
    let script = ClipScript::new(Geometry::new(16, 16))
        .with_timestamps([0, 40])
        .hold_open(true);
    let (mut player, _gpu) = player(silent_config(), script, AudioBackend::None);

    player.start(Path::new("a.bik")).unwrap();
    let err = player.start(Path::new("b.bik")).unwrap_err();
    assert!(matches!(err, PlayerError::Busy { .. }));

    player.stop();
    assert!(player.wait_inactive(TIMEOUT));

    let before = player.stats().frames_published;
    player.start(Path::new("b.bik")).unwrap();
    assert!(wait_for(|| player.stats().frames_published == before + 2));
    player.stop();
    assert!(player.wait_inactive(TIMEOUT));
    assert_eq!(player.stats().sessions, 2);
}

#[test]
fn auto_start_skips_ready_handshake() {
    let mut config = silent_config();
    config.auto_start = true;
    let script = ClipScript::new(Geometry::new(16, 16))
        .with_timestamps([0, 33])
        .hold_open(true);
    let (mut player, _gpu) = player(config, script, AudioBackend::None);

    player.start(Path::new("clip.bik")).unwrap();
    assert!(wait_for(|| player.stats().frames_published == 2));
    player.stop();
    assert!(player.wait_inactive(TIMEOUT));
}

#[test]
fn oversized_clip_is_skipped_not_rendered() {
    let script = ClipScript::new(Geometry::new(1280, 720))
        .with_timestamps([0, 33])
        .hold_open(true);
    let (mut player, _gpu) = player(silent_config(), script, AudioBackend::None);

    player.start(Path::new("hd.bik")).unwrap();
    assert!(wait_for(|| player.stats().conversion_failures == 2));
    assert!(player.read_video_frame().is_none());
    assert!(player.is_playing());

    player.stop();
    assert!(player.wait_inactive(TIMEOUT));
}

fn audio_script() -> ClipScript {
    ClipScript::new(Geometry::new(16, 16))
        .with_timestamps([0])
        .hold_open(true)
        .with_audio(AudioSegment {
            sample_rate: 48_000,
            channels: 2,
            block_frames: 256,
            blocks: 4,
        })
}

#[test]
fn pull_thread_audio_opens_port_at_init() {
    let output = Arc::new(NullOutput::new());
    let (mut player, _gpu) = player(
        PlayerConfig::default(),
        audio_script(),
        AudioBackend::Port(output.clone()),
    );
    assert_eq!(output.open_ports(), 1);

    player.start(Path::new("clip.bik")).unwrap();
    assert!(wait_for(|| player.stats().audio.frames == 4));
    assert!(wait_for(|| player.stats().audio.silence > 0));
    player.stop();
    assert!(player.wait_inactive(TIMEOUT));

    // Same format throughout: the port is never reconfigured.
    assert!(output.config_history().is_empty());
    drop(player);
    assert_eq!(output.open_ports(), 0);
}

#[test]
fn pull_callback_audio_runs_from_device_clock() {
    let output = Arc::new(NullOutput::new());
    let mut config = PlayerConfig::default();
    config.audio.mode = AudioMode::PullCallback;
    let (mut player, _gpu) = player(
        config,
        audio_script(),
        AudioBackend::Callback(Arc::new(ClockedHost::new(output.clone()))),
    );
    assert_eq!(output.open_ports(), 0);

    player.start(Path::new("clip.bik")).unwrap();
    assert!(wait_for(|| player.stats().audio.frames == 4));
    player.stop();
    assert!(player.wait_inactive(TIMEOUT));
    assert_eq!(output.open_ports(), 0);
}

#[test]
fn host_surface_drives_a_full_session() {
    let mut host = VideoHost::new();
    host.video_init(
        silent_config(),
        PlayerDeps {
            backend: Arc::new(SyntheticBackend::new(
                ClipScript::new(Geometry::new(16, 16))
                    .with_timestamps([0])
                    .hold_open(true),
            )),
            gpu_memory: Arc::new(HostGpuMemory::new()),
            audio: AudioBackend::None,
            sink: OwnedSurfaceSink,
        },
    )
    .unwrap();

    host.video_start(Path::new("clip.bik")).unwrap();
    let mut got = None;
    assert!(wait_for(|| {
        host.periodic_tick();
        got = host.read_video_frame();
        got.is_some()
    }));
    assert_eq!(got.unwrap().timestamp, 0);
    assert!(host.is_playing());

    host.video_stop();
    let player = host.player_mut().unwrap();
    assert!(player.wait_inactive(TIMEOUT));
    assert!(!host.is_playing());
}
