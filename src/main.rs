use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use mjpeg_over_http::{capture, logging, AppConfig, CaptureEngine, StreamServer, WakeEvent};

#[derive(Parser, Debug)]
#[command(name = "mjpeg-over-http")]
#[command(about = "Stream a V4L2 Motion-JPEG camera to browsers over HTTP")]
#[command(version)]
struct Args {
    /// List V4L2 capture devices and exit
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Capture device path
    #[arg(short = 'd', long = "device", value_name = "DEVICE")]
    device: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init();

    if args.list {
        capture::list_devices();
        return Ok(());
    }

    let mut config = AppConfig::default();
    if let Some(device) = args.device {
        config.capture.device = device;
    }
    config.validate().context("configuration rejected")?;

    // SIGINT wakes the main thread, which then stops both engines in order.
    let shutdown = Arc::new(WakeEvent::new().context("failed to create shutdown event")?);
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.raise())
            .context("failed to install SIGINT handler")?;
    }

    let mut server = StreamServer::new(config.server.clone())?;
    let mut capture = CaptureEngine::new(config.capture.clone());

    let capture_result = capture.start(server.sink());
    let server_result = server.start();

    info!(
        "v4l2: {}, mjpeg: {}",
        status(&capture_result),
        status(&server_result)
    );

    if capture_result.is_ok() && server_result.is_ok() {
        shutdown.wait();
        info!("shutting down");

        // Producer first, then the consumers.
        capture.stop();
        server.stop();
        Ok(())
    } else {
        if let Err(e) = &capture_result {
            error!("capture start failed: {}", e);
        }
        if let Err(e) = &server_result {
            error!("server start failed: {}", e);
        }
        capture.stop();
        server.stop();
        process::exit(1);
    }
}

fn status<T, E>(result: &Result<T, E>) -> i32 {
    if result.is_ok() {
        0
    } else {
        1
    }
}
