use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Capture side configuration.
///
/// The resolution and pixel format are fixed properties of the pipeline:
/// the device must deliver 1920x1080 Motion-JPEG or start-up fails. Only the
/// device path is selectable from the command line.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// V4L2 capture device path
    pub device: PathBuf,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Number of memory-mapped ring buffers requested from the driver.
    /// The driver may grant fewer.
    pub buffer_count: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            width: 1920,
            height: 1080,
            buffer_count: 256,
        }
    }
}

/// Streaming server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IPv4 address to bind to
    pub bind: Ipv4Addr,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: Ipv4Addr::UNSPECIFIED,
            port: 8080,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capture.device.as_os_str().is_empty() {
            return Err(Error::config("capture device path must not be empty"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(Error::config("capture resolution must be nonzero"));
        }
        if self.capture.buffer_count == 0 || self.capture.buffer_count > 256 {
            return Err(Error::config("buffer count must be between 1 and 256"));
        }
        if self.server.port == 0 {
            return Err(Error::config("server port must be nonzero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.device, PathBuf::from("/dev/video0"));
        assert_eq!((config.capture.width, config.capture.height), (1920, 1080));
        assert_eq!(config.capture.buffer_count, 256);
        assert_eq!(config.server.bind, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn rejects_zero_resolution() {
        let mut config = AppConfig::default();
        config.capture.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_buffer_count() {
        let mut config = AppConfig::default();
        config.capture.buffer_count = 0;
        assert!(config.validate().is_err());
        config.capture.buffer_count = 257;
        assert!(config.validate().is_err());
        config.capture.buffer_count = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
