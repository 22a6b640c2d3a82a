//! Emulator console client used to shut an emulator down.

use crate::core::error::{Error, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// File the emulator writes its console auth token to.
const AUTH_TOKEN_FILE: &str = ".emulator_console_auth_token";

/// Sends commands to a running emulator's console port.
pub trait EmulatorConsole: Send + Sync {
    /// Ask the emulator on `port` to exit, giving up after `timeout`.
    fn kill(&self, port: u16, timeout: Duration) -> Result<()>;
}

/// Console client speaking the emulator's line protocol over telnet.
#[derive(Debug, Clone)]
pub struct TelnetConsole {
    host: String,
    auth_token: Option<PathBuf>,
}

impl TelnetConsole {
    /// Console on localhost, using the token from the user's home directory
    /// when the emulator asks for authentication.
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            auth_token: home::home_dir().map(|home| home.join(AUTH_TOKEN_FILE)),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_auth_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth_token = Some(path.into());
        self
    }

    fn read_token(&self) -> Result<String> {
        let path = self
            .auth_token
            .as_ref()
            .ok_or_else(|| Error::config("emulator console requires authentication but no token file is known"))?;
        if !path.exists() {
            return Err(Error::FileNotFound(path.clone()));
        }
        Ok(std::fs::read_to_string(path)?.trim().to_string())
    }

    fn session(&self, port: u16, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let addr: SocketAddr = format!("{}:{port}", self.host)
            .parse()
            .map_err(|_| Error::InvalidConfig {
                field: "console host".to_string(),
                value: self.host.clone(),
            })?;

        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_write_timeout(Some(timeout))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;

        let banner = read_until_ok(&mut reader, deadline)?;
        if banner.iter().any(|l| l.contains("Authentication required")) {
            let token = self.read_token()?;
            writeln!(writer, "auth {token}")?;
            writer.flush()?;
            read_until_ok(&mut reader, deadline)?;
            tracing::debug!(port, "authenticated to emulator console");
        }

        writer.write_all(b"kill\n")?;
        writer.flush()?;
        // The emulator may drop the connection before we get here.
        let _ = writer.shutdown(Shutdown::Both);
        Ok(())
    }
}

impl Default for TelnetConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatorConsole for TelnetConsole {
    fn kill(&self, port: u16, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let operation = format!("console kill ({port})");
        match self.session(port, timeout) {
            Ok(()) => {
                tracing::info!(port, "kill sent to emulator console");
                Ok(())
            }
            Err(Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Err(Error::timeout(operation, started.elapsed()))
            }
            Err(Error::Timeout { output, .. }) => {
                Err(Error::timeout(operation, started.elapsed()).with_output(output))
            }
            Err(e) => Err(e),
        }
    }
}

/// Read lines until one starts with `OK`, returning everything read.
///
/// Every read is bounded by what is left until `deadline`.
fn read_until_ok(reader: &mut BufReader<TcpStream>, deadline: Instant) -> Result<Vec<String>> {
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::timeout("console prompt", Duration::ZERO).with_output(seen));
        }
        reader.get_ref().set_read_timeout(Some(remaining))?;
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::lifecycle("emulator console closed the connection").with_output(seen));
        }
        let line = line.trim_end().to_string();
        let done = line.starts_with("OK");
        seen.push(line);
        if done {
            return Ok(seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    /// Accept one connection, play `banner`, answer auth and return what
    /// the client wrote.
    fn fake_console(banner: &'static str) -> (u16, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(banner.as_bytes()).unwrap();
            let mut received = String::new();
            let mut buf = [0u8; 256];
            loop {
                let n = stream.read(&mut buf).unwrap_or(0);
                if n == 0 {
                    break;
                }
                let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                received.push_str(&chunk);
                if chunk.starts_with("auth") {
                    stream.write_all(b"OK\r\n").unwrap();
                }
            }
            received
        });
        (port, handle)
    }

    #[test]
    fn test_kill_after_ok_prompt() {
        let (port, server) = fake_console("Android Console: type 'help' for a list of commands\r\nOK\r\n");
        TelnetConsole::new()
            .kill(port, Duration::from_secs(5))
            .unwrap();
        assert_eq!(server.join().unwrap(), "kill\n");
    }

    #[test]
    fn test_kill_authenticates_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "s3cr3t\n").unwrap();

        let (port, server) = fake_console(
            "Android Console: Authentication required\r\nAndroid Console: type 'auth <auth_token>' to authenticate\r\nOK\r\n",
        );
        TelnetConsole::new()
            .with_auth_token_file(&token)
            .kill(port, Duration::from_secs(5))
            .unwrap();
        assert_eq!(server.join().unwrap(), "auth s3cr3t\nkill\n");
    }

    #[test]
    fn test_kill_times_out_without_prompt() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(800));
            drop(stream);
        });

        let err = TelnetConsole::new()
            .kill(port, Duration::from_millis(200))
            .unwrap_err();
        assert!(err.is_timeout());
        server.join().unwrap();
    }

    #[test]
    fn test_slow_banner_stays_within_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
            stream.write_all(b"Android Console: type 'help'\r\n").unwrap();
            thread::sleep(Duration::from_millis(1500));
        });

        let started = Instant::now();
        let err = TelnetConsole::new()
            .kill(port, Duration::from_millis(500))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(750), "took {:?}", started.elapsed());
        server.join().unwrap();
    }

    #[test]
    fn test_kill_fails_when_nothing_listens() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(TelnetConsole::new().kill(port, Duration::from_millis(200)).is_err());
    }
}
