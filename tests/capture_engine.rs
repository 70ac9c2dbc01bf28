// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture engine against the virtual device

use cameraview::capture::{
    BufferOwner, CaptureEngine, CaptureSettings, EngineState, FrameChannel, StepOutcome, Wake,
    frame_handoff, wake_channel,
};
use cameraview::device::{DeviceCall, DeviceCapabilities, DeviceFormat, VirtualDevice, VirtualFrame};
use cameraview::{CaptureError, PixelFormat};
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use std::time::{Duration, Instant};
use v4l::FourCC;

fn settings(buffer_count: u32) -> CaptureSettings {
    CaptureSettings {
        buffer_count,
        poll_timeout: Duration::from_millis(5),
    }
}

fn yuyv(width: u32, height: u32) -> DeviceFormat {
    DeviceFormat::new(width, height, FourCC::new(b"YUYV"), width * 2)
}

fn mjpg(width: u32, height: u32) -> DeviceFormat {
    DeviceFormat::new(width, height, FourCC::new(b"MJPG"), 0)
}

fn jpeg(width: u32, height: u32, fill: u8) -> Vec<u8> {
    let pixels = vec![fill; (width * height * 3) as usize];
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 85)
        .encode(&pixels, width, height, ExtendedColorType::Rgb8)
        .unwrap();
    out
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn test_yuyv_session_requeues_in_index_order() {
    let frame_len = 1280 * 720 * 2;
    let frames = (0..10u8).map(|i| vec![i + 1; frame_len]);
    let dev = VirtualDevice::new(yuyv(1280, 720)).with_frames(frames);
    let log = dev.call_log();

    let mut engine = CaptureEngine::configure(Box::new(dev), settings(6)).unwrap();
    assert_eq!(engine.info().buffer_count, 6);
    let (mut producer, consumer) = frame_handoff(FrameChannel::Direct, |_| {});

    engine.stream_on().unwrap();
    let stream_on = log.position(DeviceCall::StreamOn).unwrap();
    assert_eq!(log.queued(), vec![0, 1, 2, 3, 4, 5]);
    assert!(log.position(DeviceCall::Queue(5)).unwrap() < stream_on);

    let mut delivered = Vec::new();
    for _ in 0..10 {
        match engine.step(&mut producer).unwrap() {
            StepOutcome::Delivered(index) => delivered.push(index),
            other => panic!("unexpected outcome {:?}", other),
        }
        // Every buffer is back with the driver after each iteration
        assert_eq!(engine.ring().count_owned_by(BufferOwner::Kernel), 6);

        let frame = consumer.take_latest().unwrap();
        assert_eq!(frame.format, PixelFormat::Yuyv);
        assert_eq!(frame.bytes_used(), frame_len);
        assert_eq!(frame.data[0], delivered.len() as u8);
    }
    assert_eq!(delivered, vec![0, 1, 2, 3, 4, 5, 0, 1, 2, 3]);
    assert_eq!(
        log.queued(),
        vec![0, 1, 2, 3, 4, 5, 0, 1, 2, 3, 4, 5, 0, 1, 2, 3]
    );
    assert_eq!(log.dequeued(), delivered);

    let summary = engine.summary();
    assert_eq!(summary.frames_captured, 10);
    assert_eq!(summary.frames_delivered, 10);
    assert_eq!(summary.decode_failures, 0);

    engine.stop();
    assert!(engine.ring().is_released());
    let calls = log.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[DeviceCall::StreamOff, DeviceCall::RequestBuffers(0)]
    );
}

#[test]
fn test_corrupt_mjpg_frame_is_dropped_and_requeued() {
    let dev = VirtualDevice::new(mjpg(640, 480))
        .with_frames(vec![vec![0u8; 4096], jpeg(640, 480, 200)]);
    let log = dev.call_log();
    let mut engine = CaptureEngine::configure(Box::new(dev), settings(4)).unwrap();
    assert_eq!(engine.info().output, PixelFormat::Rgb24);

    let (mut producer, consumer) = frame_handoff(FrameChannel::Direct, |_| {});
    engine.stream_on().unwrap();

    assert_eq!(engine.step(&mut producer).unwrap(), StepOutcome::Dropped(0));
    assert!(consumer.take_latest().is_none());
    // Re-queued after the initial four
    assert_eq!(log.queued(), vec![0, 1, 2, 3, 0]);

    assert_eq!(engine.step(&mut producer).unwrap(), StepOutcome::Delivered(1));
    let frame = consumer.take_latest().unwrap();
    assert_eq!((frame.width, frame.height), (640, 480));
    assert_eq!(frame.stride, 640 * 3);
    assert_eq!(frame.bytes_used(), 640 * 480 * 3);
    assert!(frame.data.iter().take(300).all(|&c| (190..=210).contains(&c)));

    let summary = engine.summary();
    assert_eq!(summary.decode_failures, 1);
    assert_eq!(summary.frames_captured, 2);
    assert_eq!(summary.frames_delivered, 1);
    assert_eq!(engine.state(), EngineState::Streaming);
}

#[test]
fn test_dequeue_failure_stops_the_session() {
    let dev = VirtualDevice::new(yuyv(8, 4))
        .with_frames(vec![vec![1; 64]])
        .push(VirtualFrame::DequeueError);
    let log = dev.call_log();
    let mut engine = CaptureEngine::configure(Box::new(dev), settings(3)).unwrap();
    let (mut producer, _consumer) = frame_handoff(FrameChannel::Direct, |_| {});
    engine.stream_on().unwrap();

    assert_eq!(engine.step(&mut producer).unwrap(), StepOutcome::Delivered(0));
    assert!(matches!(
        engine.step(&mut producer),
        Err(CaptureError::DeviceIo(_))
    ));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(engine.ring().is_released());

    let off = log.position(DeviceCall::StreamOff).unwrap();
    let freed = log.position(DeviceCall::RequestBuffers(0)).unwrap();
    assert!(off < freed);

    // Nothing more after teardown
    assert!(matches!(
        engine.step(&mut producer),
        Err(CaptureError::InvalidState(_))
    ));
}

#[test]
fn test_timeout_is_reported_and_loop_continues() {
    let dev = VirtualDevice::new(yuyv(8, 4))
        .push(VirtualFrame::Timeout)
        .push(VirtualFrame::Data(vec![7; 64]));
    let mut engine = CaptureEngine::configure(Box::new(dev), settings(2)).unwrap();
    let (mut producer, consumer) = frame_handoff(FrameChannel::Direct, |_| {});
    engine.stream_on().unwrap();

    assert_eq!(engine.step(&mut producer).unwrap(), StepOutcome::Timeout);
    assert_eq!(engine.summary().timeouts, 1);
    assert!(consumer.take_latest().is_none());

    assert_eq!(engine.step(&mut producer).unwrap(), StepOutcome::Delivered(0));
    assert_eq!(consumer.take_latest().unwrap().data[0], 7);
}

#[test]
fn test_rejected_format_change_is_tolerated() {
    let dev = VirtualDevice::new(yuyv(320, 240)).rejecting_set_format();
    let log = dev.call_log();
    let engine = CaptureEngine::configure(Box::new(dev), settings(4)).unwrap();

    assert_eq!(engine.state(), EngineState::Configured);
    assert_eq!(engine.info().format, yuyv(320, 240));
    let set_format = log.position(DeviceCall::SetFormat).unwrap();
    assert!(set_format < log.position(DeviceCall::RequestBuffers(4)).unwrap());
}

#[test]
fn test_driver_adjusted_stride_is_used() {
    // 8 pixels of YUYV need 16 bytes; the driver pads rows to 24
    let dev = VirtualDevice::new(yuyv(8, 4))
        .padding_rows_to(24)
        .with_frames(vec![vec![5; 24 * 4]]);
    let mut engine = CaptureEngine::configure(Box::new(dev), settings(2)).unwrap();
    assert_eq!(engine.info().format.bytes_per_line, 24);
    assert_eq!(engine.info().format.width, 8);

    let (mut producer, consumer) = frame_handoff(FrameChannel::Direct, |_| {});
    engine.stream_on().unwrap();
    assert_eq!(engine.step(&mut producer).unwrap(), StepOutcome::Delivered(0));

    let frame = consumer.take_latest().unwrap();
    assert_eq!(frame.stride, 24);
    assert_eq!(frame.bytes_used(), 24 * 4);
}

#[test]
fn test_poll_timeout_is_capped_and_stop_is_prompt() {
    let engine = CaptureEngine::configure(
        Box::new(VirtualDevice::new(yuyv(8, 4))),
        CaptureSettings {
            buffer_count: 2,
            poll_timeout: Duration::from_secs(600),
        },
    )
    .unwrap();
    assert_eq!(engine.settings().poll_timeout, Duration::from_millis(1000));

    // Nothing scripted: the capture thread only ever waits in poll
    let (notifier, _wakes) = wake_channel();
    let (mut handle, _consumer) = engine.start(notifier).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    let summary = handle.stop().unwrap();
    assert!(start.elapsed() < Duration::from_millis(1500));
    assert_eq!(summary.frames_captured, 0);
    assert!(summary.timeouts > 0);
}

#[test]
fn test_missing_capabilities_are_rejected() {
    let no_streaming = DeviceCapabilities {
        video_capture: true,
        streaming: false,
        ..DeviceCapabilities::default()
    };
    let dev = VirtualDevice::new(yuyv(8, 4)).with_capabilities(no_streaming);
    let log = dev.call_log();
    let err = CaptureEngine::configure(Box::new(dev), settings(4)).err().unwrap();
    assert!(matches!(err, CaptureError::Capability(ref msg) if msg.contains("streaming")));
    assert!(log.calls().is_empty());

    let not_capture = DeviceCapabilities {
        video_capture: false,
        streaming: true,
        ..DeviceCapabilities::default()
    };
    let dev = VirtualDevice::new(yuyv(8, 4)).with_capabilities(not_capture);
    let err = CaptureEngine::configure(Box::new(dev), settings(4)).err().unwrap();
    assert!(matches!(err, CaptureError::Capability(_)));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_unsupported_format_allocates_nothing() {
    let dev = VirtualDevice::new(DeviceFormat::new(640, 480, FourCC::new(b"H264"), 0));
    let log = dev.call_log();
    let err = CaptureEngine::configure(Box::new(dev), settings(4)).err().unwrap();
    match err {
        CaptureError::UnsupportedFormat(msg) => {
            assert!(msg.contains("H264"));
            assert!(msg.contains("YUYV"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(log.queued().is_empty());
    assert_eq!(log.position(DeviceCall::RequestBuffers(4)), None);
}

#[test]
fn test_short_buffer_grant_is_a_startup_error() {
    let dev = VirtualDevice::new(yuyv(8, 4)).granting(2);
    let log = dev.call_log();
    let err = CaptureEngine::configure(Box::new(dev), settings(6)).err().unwrap();
    assert!(matches!(err, CaptureError::DeviceResource(_)));
    // The partial grant is handed back
    assert_eq!(
        log.calls(),
        vec![
            DeviceCall::SetFormat,
            DeviceCall::RequestBuffers(6),
            DeviceCall::RequestBuffers(0)
        ]
    );
}

#[test]
fn test_map_failure_is_a_startup_error() {
    let dev = VirtualDevice::new(yuyv(8, 4)).failing_map(2);
    let log = dev.call_log();
    let err = CaptureEngine::configure(Box::new(dev), settings(4)).err().unwrap();
    assert!(matches!(err, CaptureError::DeviceResource(_)));
    assert!(log.position(DeviceCall::RequestBuffers(0)).is_some());
    assert_eq!(log.position(DeviceCall::Map(3)), None);
}

#[test]
fn test_threaded_session_delivers_and_stops() {
    let dev = VirtualDevice::new(yuyv(16, 8)).with_frames((1..=5u8).map(|i| vec![i; 256]));
    let log = dev.call_log();
    let engine = CaptureEngine::configure(Box::new(dev), settings(3)).unwrap();
    let (notifier, wakes) = wake_channel();
    let (mut handle, consumer) = engine.start(notifier).unwrap();
    assert!(handle.is_running());
    assert_eq!(consumer.channel(), FrameChannel::Direct);

    assert!(matches!(
        wakes.recv_timeout(Duration::from_secs(5)),
        Ok(Wake::Frame(FrameChannel::Direct))
    ));
    assert!(wait_until(Duration::from_secs(5), || consumer.stats().published == 5));

    let latest = consumer.take_latest().unwrap();
    assert_eq!(latest.data[0], 5);
    assert_eq!(latest.sequence, 4);

    let summary = handle.stop().unwrap();
    assert!(handle.is_joined());
    assert_eq!(summary.frames_captured, 5);
    assert_eq!(summary.frames_delivered, 5);
    assert_eq!(summary.decode_failures, 0);
    assert!(consumer.is_closed());
    assert!(log.position(DeviceCall::StreamOff).is_some());
    assert!(matches!(handle.join(), Err(CaptureError::InvalidState(_))));
}

#[test]
fn test_fatal_error_on_capture_thread_reaches_the_consumer() {
    let dev = VirtualDevice::new(yuyv(16, 8))
        .with_frames(vec![vec![9; 256]])
        .push(VirtualFrame::DequeueError);
    let log = dev.call_log();
    let engine = CaptureEngine::configure(Box::new(dev), settings(3)).unwrap();
    let (notifier, wakes) = wake_channel();
    let (mut handle, consumer) = engine.start(notifier).unwrap();

    let mut stopped = false;
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) && !stopped {
        if let Ok(Wake::Stopped) = wakes.recv_timeout(Duration::from_millis(10)) {
            stopped = true;
        }
        stopped |= consumer.is_closed();
    }
    assert!(stopped);

    assert!(matches!(handle.join(), Err(CaptureError::DeviceIo(_))));
    assert!(!handle.is_running());
    let calls = log.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[DeviceCall::StreamOff, DeviceCall::RequestBuffers(0)]
    );
}

#[test]
fn test_grey_stream_uses_indexed_channel() {
    let dev = VirtualDevice::new(DeviceFormat::new(8, 4, FourCC::new(b"GREY"), 8))
        .with_frames(vec![vec![128; 32]]);
    let engine = CaptureEngine::configure(Box::new(dev), settings(2)).unwrap();
    assert_eq!(engine.info().output, PixelFormat::Grey);

    let (notifier, wakes) = wake_channel();
    let (mut handle, consumer) = engine.start(notifier).unwrap();
    assert_eq!(consumer.channel(), FrameChannel::Indexed);
    assert!(matches!(
        wakes.recv_timeout(Duration::from_secs(5)),
        Ok(Wake::Frame(FrameChannel::Indexed))
    ));
    let frame = consumer.take_latest().unwrap();
    assert_eq!(frame.channel, FrameChannel::Indexed);
    assert_eq!(frame.stride, 8);
    handle.stop().unwrap();
}

#[test]
fn test_stalled_consumer_sees_only_the_latest_frame() {
    let dev = VirtualDevice::new(yuyv(8, 4)).with_frames((1..=3u8).map(|i| vec![i; 64]));
    let mut engine = CaptureEngine::configure(Box::new(dev), settings(2)).unwrap();
    let (mut producer, consumer) = frame_handoff(FrameChannel::Direct, |_| {});
    engine.stream_on().unwrap();

    for _ in 0..3 {
        assert!(matches!(
            engine.step(&mut producer).unwrap(),
            StepOutcome::Delivered(_)
        ));
    }

    let frame = consumer.take_latest().unwrap();
    assert_eq!(frame.data[0], 3);
    assert_eq!(frame.sequence, 2);
    assert!(consumer.take_latest().is_none());

    let stats = consumer.stats();
    assert_eq!(stats.published, 3);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.taken, 1);
}
