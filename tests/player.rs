mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use prism_sync::audio::player::NullOutput;
use prism_sync::audio::{AudioSpec, SampleFormat};
use prism_sync::media::packet::TimeBase;
use prism_sync::{
    Error, EventLoop, MasterClock, MediaSource, Player, PlayerConfig, PlayerState, StreamInfo,
};

use common::*;

type Shown = Rc<RefCell<Vec<i64>>>;

fn player(config: PlayerConfig, output: NullOutput) -> (Player, Shown) {
    let shown = Shown::default();
    let sink = shown.clone();
    let player = Player::new(config, Box::new(output), move |frame| {
        sink.borrow_mut().push(frame.pts)
    });
    (player, shown)
}

/// Runs the presentation loop until `done`, giving up after `limit`.
fn drive(player: &mut Player, limit: Duration, done: impl FnMut(&Player) -> bool) {
    let event_loop = EventLoop::new().unwrap();
    let quit = event_loop.quit_handle();
    thread::spawn(move || {
        thread::sleep(limit);
        quit.quit();
    });
    event_loop.run_until(player, Duration::ZERO, done);
}

#[test]
fn test_plays_audio_and_video_to_the_end() {
    let output = NullOutput::paced(Duration::from_millis(50));
    let (mut player, shown) = player(PlayerConfig::default(), output.clone());

    player
        .open(source(ScriptedDemuxer::new(packets(600, true, true)), true, true))
        .unwrap();
    assert_eq!(player.state(), PlayerState::Playing);
    assert!(player.is_paused());

    player.play().unwrap();
    drive(&mut player, Duration::from_secs(5), Player::is_finished);
    assert!(player.is_finished());

    let stats = player.refresh_stats();
    let shown = shown.borrow();
    assert_eq!(stats.shown as usize, shown.len());
    assert_eq!(stats.shown + stats.dropped, 15);
    assert!(shown.windows(2).all(|w| w[0] < w[1]), "out of order: {shown:?}");
    assert_eq!(output.bytes_written(), 600 * 2);

    player.stop();
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(!player.is_open());
}

#[test]
fn test_video_only_is_paced_by_wall_clock() {
    let config = PlayerConfig {
        master: MasterClock::External,
        ..Default::default()
    };
    let (mut player, shown) = player(config, NullOutput::new());
    player
        .open(source(ScriptedDemuxer::new(packets(400, false, true)), false, true))
        .unwrap();
    player.play().unwrap();

    let started = Instant::now();
    drive(&mut player, Duration::from_secs(5), Player::is_finished);
    assert!(player.is_finished());
    // ten 40 ms frames cannot all be consumed much faster than real time
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(player.refresh_stats().shown + player.refresh_stats().dropped, 10);
    assert!(!shown.borrow().is_empty());
}

#[test]
fn test_failed_open_leaves_nothing_running() {
    let (mut player, _) = player(PlayerConfig::default(), NullOutput::new());
    player
        .open(source(ScriptedDemuxer::new(packets(200, true, true)), true, true))
        .unwrap();
    assert!(player.is_open());

    let err = player
        .open(source(ScriptedDemuxer::new(Vec::new()), false, false))
        .unwrap_err();
    assert!(matches!(err, Error::OpenFailed(_)));
    assert!(!player.is_open());
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(matches!(player.play(), Err(Error::NotOpen)));
}

#[test]
fn test_stop_is_bounded_with_stuck_demuxer() {
    let config = PlayerConfig {
        reader_join_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let (mut player, _) = player(config, NullOutput::new());
    player.open(source(StuckDemuxer, true, true)).unwrap();
    player.play().unwrap();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    player.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(player.state(), PlayerState::Idle);
}

#[test]
fn test_stop_unblocks_full_queue_and_slot() {
    let config = PlayerConfig {
        video_queue_capacity: 16 * 1024,
        ..Default::default()
    };
    let (mut player, _) = player(config, NullOutput::new());
    player
        .open(source(EndlessDemuxer::default(), false, true))
        .unwrap();
    // nobody drives the scheduler: the slot stays full and the queue fills up
    thread::sleep(Duration::from_millis(50));
    assert!(!player.is_finished());

    let started = Instant::now();
    player.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_pause_freezes_position() {
    let output = NullOutput::paced(Duration::from_millis(50));
    let (mut player, _) = player(PlayerConfig::default(), output);
    player
        .open(source(ScriptedDemuxer::new(packets(5_000, true, true)), true, true))
        .unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(player.position(), 0.0, "preroll must not advance the clock");

    player.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    player.pause().unwrap();
    // let a publish that raced the pause land
    thread::sleep(Duration::from_millis(30));
    let frozen = player.position();
    assert!(frozen > 0.0);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(player.position(), frozen);

    player.toggle().unwrap();
    assert!(!player.is_paused());
    thread::sleep(Duration::from_millis(60));
    assert!(player.position() > frozen);
}

#[test]
fn test_seek_repositions_and_clamps() {
    let demuxer = ScriptedDemuxer::new(packets(5_000, true, true));
    let seeks = demuxer.seeks.clone();
    let output = NullOutput::paced(Duration::from_millis(50));
    let (mut player, shown) = player(PlayerConfig::default(), output);
    player
        .open(source(demuxer, true, true).with_duration(5_000))
        .unwrap();
    assert_eq!(player.duration(), 5.0);

    player.seek(2.0).unwrap();
    assert!(wait_until(Duration::from_secs(2), || seeks.lock().as_slice() == [2_000]));

    player.play().unwrap();
    let seen = shown.clone();
    drive(&mut player, Duration::from_secs(3), move |_| {
        seen.borrow().last().is_some_and(|&pts| pts >= 2_000)
    });
    assert!(shown.borrow().last().is_some_and(|&pts| pts >= 2_000));
    assert!(wait_until(Duration::from_secs(2), || player.position() >= 1.9));

    // past the end: clamped to the duration, which drains immediately
    player.seek(100.0).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        seeks.lock().last() == Some(&5_000)
    }));
    drive(&mut player, Duration::from_secs(3), Player::is_finished);
    assert!(player.is_finished());
    player.stop();
}

#[test]
fn test_seek_while_playing_never_shows_old_frames() {
    // small queues keep pre-seek packets in flight when the seek lands
    let config = PlayerConfig {
        video_queue_capacity: 1024,
        audio_queue_capacity: 400,
        ..Default::default()
    };
    let (mut player, shown) = player(config, NullOutput::paced(Duration::from_millis(50)));
    player
        .open(source(ScriptedDemuxer::new(packets(8_000, true, true)), true, true))
        .unwrap();
    player.play().unwrap();

    let seen = shown.clone();
    drive(&mut player, Duration::from_secs(3), move |_| {
        seen.borrow().last().is_some_and(|&pts| pts >= 400)
    });
    assert!(shown.borrow().last().is_some_and(|&pts| pts >= 400));

    player.seek(5.0).unwrap();
    let before_seek = shown.borrow().len();
    let mut lowest_position = f64::MAX;
    let seen = shown.clone();
    drive(&mut player, Duration::from_secs(5), move |p| {
        lowest_position = lowest_position.min(p.position());
        assert!(lowest_position >= 4.9, "clock went back to {lowest_position}");
        seen.borrow().last().is_some_and(|&pts| pts >= 5_200)
    });

    let shown = shown.borrow();
    let after_seek = &shown[before_seek..];
    assert!(after_seek.last().is_some_and(|&pts| pts >= 5_200));
    assert!(
        after_seek.iter().all(|&pts| pts >= 5_000),
        "shown after seek: {after_seek:?}"
    );
    player.stop();
}

#[test]
fn test_audio_must_convert_to_device_format() {
    let stereo = AudioSpec {
        sample_rate: 48_000,
        channels: 2,
        format: SampleFormat::F32,
    };
    let output = NullOutput::new().with_device_spec(stereo);
    let (mut player, _) = player(PlayerConfig::default(), output);
    let err = player
        .open(source(ScriptedDemuxer::new(packets(200, true, false)), true, false))
        .unwrap_err();
    assert!(matches!(err, Error::AudioDevice(_)), "{err:?}");
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(!player.is_open());

    let output = NullOutput::new().with_device_spec(SPEC);
    let mut matching = Player::new(PlayerConfig::default(), Box::new(output.clone()), |_| {});
    matching
        .open(source(ScriptedDemuxer::new(packets(200, true, false)), true, false))
        .unwrap();
    matching.play().unwrap();
    assert!(wait_until(Duration::from_secs(2), || output.bytes_written() == 400));
    matching.stop();
}

#[test]
fn test_end_of_stream_flushes_reordered_pictures() {
    let config = PlayerConfig {
        master: MasterClock::External,
        ..Default::default()
    };
    let (mut player, shown) = player(config, NullOutput::new());
    let info = StreamInfo::new(VIDEO_INDEX, TimeBase::MILLIS).with_frame_duration(FRAME_MS);
    let source = MediaSource::new(ScriptedDemuxer::new(packets(400, false, true)))
        .with_video(info, ReorderingDecoder::default());
    player.open(source).unwrap();
    player.play().unwrap();

    drive(&mut player, Duration::from_secs(5), Player::is_finished);
    assert!(player.is_finished());
    let stats = player.refresh_stats();
    // the last picture only leaves the decoder when it is drained
    assert_eq!(stats.shown + stats.dropped, 10);
    assert!(shown.borrow().windows(2).all(|w| w[0] < w[1]));
    player.stop();
}
