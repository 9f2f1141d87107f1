use std::ffi::CString;
use std::fs::File;
use std::io::{self, IsTerminal, Write};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Initialize the process-wide log dispatch.
///
/// The sink is picked once at startup: standard error when the process has a
/// terminal to talk to, the system log at INFO otherwise (the daemon case,
/// e.g. running under an init system with stderr pointed at /dev/null).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if stderr_is_interactive() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .without_time()
            .with_writer(SyslogMakeWriter)
            .init();
    }
}

/// Probe for an interactive terminal.
///
/// `/dev/tty` resolves to the controlling terminal regardless of where the
/// standard streams point. When there is no controlling terminal (ENXIO) or
/// the node is absent/forbidden, fall back to asking whether stderr itself is
/// a tty; any other open error is treated as interactive so errors stay
/// visible.
fn stderr_is_interactive() -> bool {
    match File::open("/dev/tty") {
        Ok(_) => true,
        Err(e) => match e.raw_os_error() {
            Some(libc::ENOENT) | Some(libc::EPERM) | Some(libc::ENXIO) => {
                io::stderr().is_terminal()
            }
            _ => true,
        },
    }
}

struct SyslogMakeWriter;

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter { line: Vec::new() }
    }
}

/// Buffers one formatted event and forwards it to syslog(3) line by line.
struct SyslogWriter {
    line: Vec<u8>,
}

impl SyslogWriter {
    fn emit(&mut self) {
        for line in self.line.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            if let Ok(message) = CString::new(line) {
                // "%s" keeps percent signs in log text from being
                // re-interpreted as format directives.
                unsafe {
                    libc::syslog(
                        libc::LOG_INFO,
                        b"%s\0".as_ptr().cast(),
                        message.as_ptr(),
                    );
                }
            }
        }
        self.line.clear();
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit();
        Ok(())
    }
}

impl Drop for SyslogWriter {
    fn drop(&mut self) {
        self.emit();
    }
}
