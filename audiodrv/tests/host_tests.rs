use audiodrv::backends::{PcmSink, PcmSource, QueueDriver, StreamDriver};
use audiodrv::prelude::*;
use audiodrv::wave::WaveFormat;
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type Captured = Arc<Mutex<Vec<i16>>>;

/// Queue driver whose output lands in `out`, sleeping `delay` per buffer
fn capture_driver(out: Captured, delay: Duration, buffer_bytes: usize) -> QueueDriver {
    QueueDriver::builder("capture", move |_: &WaveFormat| {
        let out = out.clone();
        let sink = move |samples: &[i16]| -> audiodrv::Result<()> {
            out.lock().unwrap().extend_from_slice(samples);
            thread::sleep(delay);
            Ok(())
        };
        Ok(Box::new(sink) as Box<dyn PcmSink>)
    })
    .buffers(3, buffer_bytes)
    .source(|_: &WaveFormat| {
        let source = |out: &mut [i16]| -> audiodrv::Result<usize> {
            out.fill(8192);
            Ok(out.len())
        };
        Ok(Box::new(source) as Box<dyn PcmSource>)
    })
    .build()
}

fn host_with(driver: impl AudioDriver + 'static) -> AudioHost {
    let registry = Arc::new(Registry::empty());
    registry.register(Arc::new(driver));
    AudioHost::builder()
        .registry(registry)
        .wait_slice(Duration::from_millis(5))
        .build()
        .unwrap()
}

#[test]
fn test_host_builder_configurations() {
    let host = AudioHost::builder()
        .default_rate(22050)
        .wait_slice(Duration::from_secs(5))
        .looping(true)
        .build()
        .unwrap();
    assert_eq!(host.config().default_rate, 22050);
    assert!(host.config().looping);
    // the polling interval is capped
    assert_eq!(host.config().wait_slice, Duration::from_millis(100));

    assert!(matches!(
        AudioHost::builder().default_rate(0).build(),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn test_host_default_config() {
    let host = AudioHost::builder()
        .registry(Arc::new(Registry::empty()))
        .build()
        .unwrap();
    assert_eq!(host.config().default_rate, 44100);
    assert_eq!(host.config().wait_slice, Duration::from_millis(100));
    assert!(!host.config().looping);
    assert!(host.drivers().is_empty());
    assert!(matches!(
        host.player(Arc::new(SampleBuffer::zeros(4)), PlayerOptions::new()),
        Err(Error::DeviceUnavailable(_))
    ));
}

#[test]
fn test_player_plays_buffer_once() {
    let out = Captured::default();
    let host = host_with(capture_driver(out.clone(), Duration::ZERO, 4096));

    let buffer = Arc::new(SampleBuffer::from_f64(vec![0.5; 5000]));
    let player = host.player(buffer.clone(), PlayerOptions::new()).unwrap();
    assert_eq!(host.kind(player).unwrap(), InstanceKind::Player);
    assert_eq!(host.state(player).unwrap(), InstanceState::Created);
    assert_eq!(host.driver_name(player).unwrap(), "capture");
    assert!(Arc::ptr_eq(&host.source(player).unwrap(), &buffer));

    host.start(player).unwrap();
    assert_eq!(host.wait(player, 5.0).unwrap(), WaitStatus::Done);
    assert_eq!(host.position(player).unwrap(), 5000);

    let samples = out.lock().unwrap().clone();
    assert_eq!(samples.len(), 5000);
    assert!(samples.iter().all(|&s| s == 16383));

    host.dispose(player).unwrap();
    // the feeder may still be dropping its last job
    let deadline = Instant::now() + Duration::from_secs(1);
    while Arc::strong_count(&buffer) > 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(Arc::strong_count(&buffer), 1);
}

#[test]
fn test_start_after_finish_replays() {
    let out = Captured::default();
    let host = host_with(capture_driver(out.clone(), Duration::ZERO, 4096));

    let buffer = Arc::new(SampleBuffer::from_f64(vec![0.25; 300]));
    let player = host.player(buffer, PlayerOptions::new()).unwrap();
    host.start(player).unwrap();
    assert_eq!(host.wait(player, 5.0).unwrap(), WaitStatus::Done);

    host.start(player).unwrap();
    assert_eq!(host.wait(player, 5.0).unwrap(), WaitStatus::Done);
    assert_eq!(out.lock().unwrap().len(), 600);
}

#[test]
fn test_stereo_player_interleaves() {
    let out = Captured::default();
    let host = host_with(capture_driver(out.clone(), Duration::ZERO, 4096));

    let buffer = SampleBuffer::from_f64(vec![0.5, -0.5, 0.5, -0.5])
        .with_rows(2)
        .unwrap();
    let player = host.player(Arc::new(buffer), PlayerOptions::new()).unwrap();
    host.start(player).unwrap();
    host.wait(player, 5.0).unwrap();
    assert_eq!(host.position(player).unwrap(), 2);
    assert_eq!(*out.lock().unwrap(), vec![16383, -16383, 16383, -16383]);
}

#[test]
fn test_pause_and_resume() {
    let out = Captured::default();
    // 32 mono samples per buffer, 1 ms per buffer
    let host = host_with(capture_driver(out.clone(), Duration::from_millis(1), 64));

    let buffer = Arc::new(SampleBuffer::from_f64(vec![0.1; 10_000]));
    let player = host.player(buffer, PlayerOptions::new()).unwrap();
    assert!(matches!(host.pause(player), Err(Error::InvalidState(_))));

    host.start(player).unwrap();
    thread::sleep(Duration::from_millis(20));
    host.pause(player).unwrap();
    assert_eq!(host.state(player).unwrap(), InstanceState::Paused);

    thread::sleep(Duration::from_millis(30));
    let paused_at = out.lock().unwrap().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(out.lock().unwrap().len(), paused_at);
    assert!(!host.is_done(player).unwrap());

    host.resume(player).unwrap();
    assert_eq!(host.state(player).unwrap(), InstanceState::Started);
    assert_eq!(host.wait(player, 10.0).unwrap(), WaitStatus::Done);
    assert_eq!(out.lock().unwrap().len(), 10_000);
}

#[test]
fn test_looping_player_times_out() {
    let out = Captured::default();
    let host = host_with(capture_driver(out.clone(), Duration::from_millis(1), 64));

    let buffer = Arc::new(SampleBuffer::from_f64(vec![0.1; 50]));
    let player = host
        .player(buffer, PlayerOptions::new().looping(true))
        .unwrap();
    host.start(player).unwrap();
    assert_eq!(host.wait(player, 0.1).unwrap(), WaitStatus::TimedOut);
    assert!(out.lock().unwrap().len() > 50);

    host.close(player).unwrap();
    assert!(host.is_done(player).unwrap());
    assert_eq!(host.wait(player, -1.0).unwrap(), WaitStatus::Done);
}

#[test]
fn test_close_is_idempotent() {
    let out = Captured::default();
    let host = host_with(capture_driver(out, Duration::ZERO, 4096));

    let player = host
        .player(Arc::new(SampleBuffer::zeros(10)), PlayerOptions::new())
        .unwrap();
    host.close(player).unwrap();
    host.close(player).unwrap();
    assert_eq!(host.state(player).unwrap(), InstanceState::Closed);
    assert!(matches!(host.start(player), Err(Error::InvalidState(_))));
    assert!(matches!(host.resume(player), Err(Error::InvalidState(_))));

    host.dispose(player).unwrap();
    assert!(matches!(host.start(player), Err(Error::InvalidHandle)));
    assert!(matches!(host.dispose(player), Err(Error::InvalidHandle)));
    assert!(host.handles().is_empty());
}

#[test]
fn test_interrupted_wait() {
    let out = Captured::default();
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();

    let registry = Arc::new(Registry::empty());
    registry.register(Arc::new(capture_driver(out, Duration::from_millis(1), 64)));
    let host = AudioHost::builder()
        .registry(registry)
        .wait_slice(Duration::from_millis(5))
        .interrupt_hook(move || flag.load(Ordering::SeqCst))
        .build()
        .unwrap();

    let player = host
        .player(
            Arc::new(SampleBuffer::zeros(100)),
            PlayerOptions::new().looping(true),
        )
        .unwrap();
    host.start(player).unwrap();
    stop.store(true, Ordering::SeqCst);
    assert!(matches!(host.wait(player, -1.0), Err(Error::Interrupted)));
    host.dispose(player).unwrap();
}

#[test]
fn test_recorder_fills_buffer() {
    let out = Captured::default();
    let host = host_with(capture_driver(out, Duration::ZERO, 4096));

    let target = Arc::new(SampleBuffer::zeros(3000));
    let recorder = host
        .recorder(target.clone(), RecorderOptions::new().rate(8000.0))
        .unwrap();
    assert_eq!(host.kind(recorder).unwrap(), InstanceKind::Recorder);
    assert_eq!(target.rate(), Some(8000));
    assert_eq!(target.bits(), Some(16));

    host.start(recorder).unwrap();
    assert_eq!(host.wait(recorder, 5.0).unwrap(), WaitStatus::Done);
    assert_eq!(host.position(recorder).unwrap(), 3000);
    assert!(target.to_f64_vec().iter().all(|&x| x == 0.25));
    host.dispose(recorder).unwrap();
}

#[test]
fn test_stereo_recorder() {
    let out = Captured::default();
    let host = host_with(capture_driver(out, Duration::ZERO, 4096));

    let target = Arc::new(SampleBuffer::zeros(400).with_rows(2).unwrap());
    let recorder = host
        .recorder(target.clone(), RecorderOptions::new().channels(2))
        .unwrap();
    assert_eq!(target.rate(), Some(44100));

    host.start(recorder).unwrap();
    assert_eq!(host.wait(recorder, 5.0).unwrap(), WaitStatus::Done);
    assert_eq!(host.position(recorder).unwrap(), 200);
    assert_eq!(target.get(1, 199), Some(0.25));
}

#[test]
fn test_recording_unsupported() {
    let driver = QueueDriver::builder("playback-only", |_: &WaveFormat| {
        Ok(Box::new(audiodrv::backends::NullSink) as Box<dyn PcmSink>)
    })
    .build();
    let host = host_with(driver);
    assert!(matches!(
        host.recorder(Arc::new(SampleBuffer::zeros(10)), RecorderOptions::new()),
        Err(Error::UnsupportedOperation(_))
    ));
}

#[test]
fn test_null_driver_paces_output() {
    let host = host_with(QueueDriver::null());
    // 400 frames at 8 kHz take 50 ms on a real-time device
    let buffer = Arc::new(SampleBuffer::zeros(400).with_rate(8000));
    let player = host.player(buffer, PlayerOptions::new()).unwrap();

    let start = Instant::now();
    host.start(player).unwrap();
    assert_eq!(host.wait(player, 5.0).unwrap(), WaitStatus::Done);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_sink_failure_is_reported_by_wait() {
    let writes = Arc::new(AtomicUsize::new(0));
    let counter = writes.clone();
    let driver = QueueDriver::builder("lossy", move |_: &WaveFormat| {
        let counter = counter.clone();
        let sink = move |_: &[i16]| -> audiodrv::Result<()> {
            // the device goes away after the first buffer
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(Error::Backend("device lost (code -9999)".to_string()));
            }
            Ok(())
        };
        Ok(Box::new(sink) as Box<dyn PcmSink>)
    })
    .build();
    let host = host_with(driver);

    let player = host
        .player(Arc::new(SampleBuffer::zeros(10_000)), PlayerOptions::new())
        .unwrap();
    host.start(player).unwrap();
    match host.wait(player, 2.0) {
        Err(Error::Backend(message)) => assert!(message.contains("code -9999"), "{}", message),
        other => panic!("expected a backend error, got {:?}", other),
    }
    assert!(host.position(player).unwrap() < 10_000);
    assert!(matches!(host.is_done(player), Err(Error::Backend(_))));
    assert!(matches!(host.start(player), Err(Error::Backend(_))));
    host.dispose(player).unwrap();
}

#[test]
fn test_source_failure_is_reported_by_wait() {
    let driver = QueueDriver::builder("deaf", |_: &WaveFormat| {
        Ok(Box::new(audiodrv::backends::NullSink) as Box<dyn PcmSink>)
    })
    .source(|_: &WaveFormat| {
        let source = |_: &mut [i16]| -> audiodrv::Result<usize> {
            Err(Error::Backend("capture overrun".to_string()))
        };
        Ok(Box::new(source) as Box<dyn PcmSource>)
    })
    .build();
    let host = host_with(driver);

    let recorder = host
        .recorder(Arc::new(SampleBuffer::zeros(1000)), RecorderOptions::new())
        .unwrap();
    host.start(recorder).unwrap();
    match host.wait(recorder, 2.0) {
        Err(Error::Backend(message)) => assert!(message.contains("capture overrun"), "{}", message),
        other => panic!("expected a backend error, got {:?}", other),
    }
    host.dispose(recorder).unwrap();
}

#[derive(Clone, Default)]
struct SharedBytes(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBytes {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn stream_driver(bytes: SharedBytes) -> StreamDriver {
    StreamDriver::new("stream", move |_: &WaveFormat| {
        Ok(Box::new(bytes.clone()) as Box<dyn Write + Send>)
    })
}

#[test]
fn test_stream_player_writes_wave() {
    let bytes = SharedBytes::default();
    let registry = Arc::new(Registry::empty());
    registry.register(Arc::new(stream_driver(bytes.clone())));
    let host = AudioHost::builder()
        .registry(registry)
        .default_rate(22050)
        .build()
        .unwrap();

    let buffer = Arc::new(SampleBuffer::from_f64(vec![0.5; 5000]));
    let player = host.player(buffer, PlayerOptions::new()).unwrap();
    // nothing is sent before start
    assert!(bytes.0.lock().unwrap().is_empty());

    host.start(player).unwrap();
    assert_eq!(host.wait(player, 5.0).unwrap(), WaitStatus::Done);
    assert!(matches!(
        host.pause(player),
        Err(Error::UnsupportedOperation(_))
    ));
    assert!(matches!(
        host.rewind(player),
        Err(Error::UnsupportedOperation(_))
    ));
    host.close(player).unwrap();

    let written = bytes.0.lock().unwrap().clone();
    assert_eq!(written.len(), 44 + 10_000);
    let parsed = audiodrv::wave::read_from(Cursor::new(written)).unwrap();
    assert_eq!(parsed.rate(), Some(22050));
    assert_eq!(parsed.len(), 5000);
}

struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "connection reset by server",
        ))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_stream_write_failure_is_reported_by_wait() {
    let driver = StreamDriver::new("broken", |_: &WaveFormat| {
        Ok(Box::new(BrokenPipe) as Box<dyn Write + Send>)
    });
    let host = host_with(driver);

    let player = host
        .player(Arc::new(SampleBuffer::zeros(100)), PlayerOptions::new())
        .unwrap();
    host.start(player).unwrap();
    match host.wait(player, 2.0) {
        Err(Error::Backend(message)) => {
            assert!(message.contains("connection reset by server"), "{}", message)
        }
        other => panic!("expected a backend error, got {:?}", other),
    }
    host.dispose(player).unwrap();
}

#[test]
fn test_tcp_stream_driver() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        conn.read_to_end(&mut received).unwrap();
        received
    });

    let driver = StreamDriver::tcp("tcp", addr).unwrap();
    assert_eq!(driver.name(), "tcp");
    let host = host_with(driver);
    let buffer = SampleBuffer::from_f64(vec![0.5; 100]).with_rate(8000);
    let player = host.player(Arc::new(buffer), PlayerOptions::new()).unwrap();
    host.start(player).unwrap();
    assert_eq!(host.wait(player, 5.0).unwrap(), WaitStatus::Done);
    // closing drops the connection and ends the server's read
    host.dispose(player).unwrap();

    let received = server.join().unwrap();
    assert_eq!(received.len(), 44 + 200);
    let parsed = audiodrv::wave::read_from(Cursor::new(received)).unwrap();
    assert_eq!(parsed.rate(), Some(8000));
    assert!(parsed.to_f64_vec().iter().all(|x| (x - 0.5).abs() < 1e-4));
}

#[test]
fn test_tcp_stream_driver_unreachable() {
    // bind then drop to get a port nothing listens on
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let host = host_with(StreamDriver::tcp("tcp", addr).unwrap());
    let player = host
        .player(Arc::new(SampleBuffer::zeros(10)), PlayerOptions::new())
        .unwrap();
    assert!(matches!(
        host.start(player),
        Err(Error::DeviceUnavailable(_))
    ));
}

#[test]
fn test_stream_player_rejects_integer_buffers() {
    let host = host_with(stream_driver(SharedBytes::default()));
    let buffer = Arc::new(SampleBuffer::from_i32(vec![1, 2, 3]));
    assert!(matches!(
        host.player(buffer, PlayerOptions::new()),
        Err(Error::FormatUnsupported(_))
    ));
}

#[test]
fn test_instance_without_host() {
    let out = Captured::default();
    let driver: Arc<dyn AudioDriver> =
        Arc::new(capture_driver(out.clone(), Duration::ZERO, 4096));
    let buffer = Arc::new(SampleBuffer::from_f64(vec![0.5; 10]));

    let mut instance = AudioInstance::player(driver, buffer, &PlayerOptions::new()).unwrap();
    instance.start().unwrap();
    assert_eq!(instance.wait(5.0).unwrap(), WaitStatus::Done);
    instance.rewind().unwrap();
    assert_eq!(instance.position(), 0);
    instance.dispose().unwrap();
    assert_eq!(out.lock().unwrap().len(), 10);
}
