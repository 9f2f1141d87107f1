use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::context;
use v4l::format::description::Flags as FormatFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::config::CaptureConfig;
use crate::error::CaptureError;

/// Pixel format the pipeline is built around. Frames pass through untouched,
/// so anything other than Motion-JPEG is a start-up failure, not a fallback.
const PIXEL_FORMAT: &[u8; 4] = b"MJPG";

/// Receiver for captured frames.
///
/// `post` runs on the capture thread with a slice into the memory-mapped
/// ring; the slice is only valid until `post` returns, after which the
/// underlying buffer is requeued to the driver. Implementations must copy
/// whatever they intend to keep.
pub trait FrameSink: Send + Sync {
    fn post(&self, frame: &[u8]);
}

/// V4L2 capture engine.
///
/// Owns a dedicated thread that runs the dequeue/requeue loop against a ring
/// of memory-mapped driver buffers and hands each complete frame to the
/// configured [`FrameSink`]. The device is opened, format-negotiated and the
/// ring mapped on that thread; `start` does not return until the whole open
/// sequence has succeeded or failed.
pub struct CaptureEngine {
    config: CaptureConfig,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Open the device and start the capture loop.
    ///
    /// Failures anywhere in the open sequence (device, capabilities, format,
    /// ring setup, stream-on) are reported as a single error; resources
    /// acquired up to that point unwind on the capture thread.
    pub fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        self.stop.store(false, Ordering::Release);

        let (ready_tx, ready_rx) = crossbeam::channel::bounded(1);
        let config = self.config.clone();
        let stop = Arc::clone(&self.stop);

        let worker = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || capture_thread(config, stop, sink, ready_tx))
            .map_err(|source| CaptureError::ThreadSpawn { source })?;
        self.worker = Some(worker);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.join_worker();
                Err(e)
            }
            Err(_) => {
                self.join_worker();
                Err(CaptureError::StreamSetup {
                    source: io::Error::other("capture thread exited during startup"),
                })
            }
        }
    }

    /// Stop the capture loop and release the device. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

type ReadySender = crossbeam::channel::Sender<Result<(), CaptureError>>;

fn capture_thread(
    config: CaptureConfig,
    stop: Arc<AtomicBool>,
    sink: Arc<dyn FrameSink>,
    ready: ReadySender,
) {
    let (_device, mut stream) = match open_stream(&config) {
        Ok(opened) => {
            let _ = ready.send(Ok(()));
            opened
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    info!("v4l2 capture running on {}", config.device.display());

    while !stop.load(Ordering::Acquire) {
        match stream.next() {
            Ok((buf, meta)) => {
                let bytes = meta.bytesused as usize;
                if bytes == 0 {
                    continue;
                }
                sink.post(&buf[..bytes.min(buf.len())]);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                error!("v4l2 dequeue failed: {}", e);
                break;
            }
        }
    }

    // Stream drop switches the driver stream off before the mappings unwind;
    // the device fd closes last.
    drop(stream);
    info!("v4l2 stopped");
}

/// Run the open sequence: open, capability gate, format negotiation, mmap
/// ring, queue everything, stream on.
fn open_stream(config: &CaptureConfig) -> Result<(Device, MmapStream<'static>), CaptureError> {
    let device_name = config.device.display().to_string();

    let device = Device::with_path(&config.device).map_err(|source| CaptureError::DeviceOpen {
        device: device_name.clone(),
        source,
    })?;

    let caps = device
        .query_caps()
        .map_err(|source| CaptureError::QueryCaps { source })?;
    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(CaptureError::NotACaptureDevice {
            device: device_name,
        });
    }

    let wanted = FourCC::new(PIXEL_FORMAT);
    let format = device
        .set_format(&Format::new(config.width, config.height, wanted))
        .map_err(|source| CaptureError::SetFormat { source })?;
    if format.fourcc != wanted {
        return Err(CaptureError::UnsupportedFormat {
            wanted: wanted.to_string(),
            actual: format.fourcc.to_string(),
        });
    }

    info!("v4l2 size: {}x{}", format.width, format.height);
    info!("v4l2 pixel format: {}", format.fourcc);

    // Ask for the full ring; the driver is free to grant fewer buffers.
    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
        .map_err(|source| CaptureError::StreamSetup { source })?;
    stream
        .start()
        .map_err(|source| CaptureError::StreamSetup { source })?;

    Ok((device, stream))
}

/// Enumerate V4L2 capture devices on standard output.
///
/// Nodes that cannot be opened or queried are skipped silently, as are
/// non-capture nodes (metadata devices, radio tuners and the like).
pub fn list_devices() {
    let mut nodes = context::enum_devices();
    nodes.sort_by_key(|node| node.index());

    for node in nodes {
        let path = node.path().to_path_buf();
        let Ok(device) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = device.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }

        println!("device: {}", path.display());
        println!(" - card: {}", caps.card);
        println!(" - driver: {}", caps.driver);
        println!(" - bus: {}", caps.bus);
        println!(" - capabilities: {:?}", caps.capabilities);
        if let Ok(format) = device.format() {
            println!(" - default frame size: {}x{}", format.width, format.height);
        }

        let Ok(formats) = device.enum_formats() else {
            continue;
        };
        for desc in formats {
            let kind = if desc.flags.contains(FormatFlags::COMPRESSED) {
                "compressed"
            } else {
                "raw"
            };
            let mut sizes = String::new();
            if let Ok(frame_sizes) = device.enum_framesizes(desc.fourcc) {
                for frame_size in frame_sizes {
                    match frame_size.size {
                        FrameSizeEnum::Discrete(d) => {
                            sizes.push_str(&format!(" {}x{}", d.width, d.height));
                        }
                        FrameSizeEnum::Stepwise(s) => {
                            sizes.push_str(&format!(
                                " {{{}-{}, {}}}x{{{}-{}, {}}}",
                                s.min_width,
                                s.max_width,
                                s.step_width,
                                s.min_height,
                                s.max_height,
                                s.step_height
                            ));
                        }
                    }
                }
            }
            println!("   - {:>10}: {} ({}):{}", kind, desc.fourcc, desc.description, sizes);
        }
    }
    debug!("device enumeration complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CollectSink {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl FrameSink for CollectSink {
        fn post(&self, frame: &[u8]) {
            self.frames.lock().push(frame.to_vec());
        }
    }

    #[test]
    fn sink_receives_posted_bytes() {
        let sink = CollectSink {
            frames: Mutex::new(Vec::new()),
        };
        sink.post(b"\xFF\xD8\xFF\xD9");
        assert_eq!(*sink.frames.lock(), vec![b"\xFF\xD8\xFF\xD9".to_vec()]);
    }

    #[test]
    fn start_fails_for_missing_device() {
        let config = CaptureConfig {
            device: "/dev/null-does-not-exist".into(),
            ..CaptureConfig::default()
        };
        let mut engine = CaptureEngine::new(config);
        let sink = Arc::new(CollectSink {
            frames: Mutex::new(Vec::new()),
        });

        let err = engine.start(sink).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceOpen { .. }));

        // stop after a failed start is a no-op
        engine.stop();
        engine.stop();
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut engine = CaptureEngine::new(CaptureConfig::default());
        engine.stop();
    }
}
