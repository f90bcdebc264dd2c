//! Platform-specific pipe transport.
//!
//! The engine talks to Discord through the [`Transport`] trait; the
//! production implementation is [`NativeTransport`], a Unix domain socket
//! on Unix-likes and a named pipe on Windows. Reads are non-blocking:
//! available bytes accumulate in a buffer and a frame is only surfaced
//! once it is complete, so "no full frame yet" never consumes anything.

use bytes::BytesMut;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::ipc::frame::Frame;
use crate::ipc::protocol::constants;

/// Full-duplex byte stream to a Discord client.
///
/// Connection failures are reported through return values rather than
/// errors: a missing pipe is an ordinary outcome during discovery, and a
/// pipe that breaks mid-stream simply flips [`Transport::is_connected`]
/// to `false`.
pub trait Transport: Send {
    /// Connect to pipe `pipe`, or scan pipes 0 through 9 when `pipe < 0`.
    /// Returns `false` when no pipe accepted the connection.
    fn connect(&mut self, pipe: i32) -> bool;

    /// Pop the next complete frame, or `None` when no full frame has
    /// arrived yet. Never blocks.
    fn read_frame(&mut self) -> Option<Frame>;

    /// Write a frame. Returns `false` when the pipe broke.
    fn write_frame(&mut self, frame: &Frame) -> bool;

    fn close(&mut self);

    fn is_connected(&self) -> bool;

    /// Index of the connected pipe; `-1` when disconnected.
    fn connected_pipe(&self) -> i32;
}

#[cfg(unix)]
type PipeStream = std::os::unix::net::UnixStream;

#[cfg(windows)]
type PipeStream = std::fs::File;

/// The production [`Transport`] over the operating system's pipes.
pub struct NativeTransport {
    stream: Option<PipeStream>,
    pipe: i32,
    read_buf: BytesMut,
}

impl NativeTransport {
    const READ_CHUNK: usize = 4096;

    pub fn new() -> Self {
        Self {
            stream: None,
            pipe: -1,
            read_buf: BytesMut::with_capacity(Self::READ_CHUNK),
        }
    }

    fn drop_connection(&mut self) {
        if let Some(stream) = self.stream.take() {
            #[cfg(unix)]
            {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(windows)]
            drop(stream);
        }
        self.pipe = -1;
        self.read_buf.clear();
    }

    /// Move every byte the pipe currently holds into the read buffer.
    /// Returns `false` when the pipe is broken.
    #[cfg(unix)]
    fn fill_read_buf(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let mut chunk = [0u8; Self::READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("ipc socket read failed: {e}");
                    return false;
                }
            }
        }
    }

    #[cfg(windows)]
    fn fill_read_buf(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        loop {
            let available = match platform::available_bytes(stream) {
                Ok(0) => return true,
                Ok(n) => n as usize,
                Err(e) => {
                    tracing::debug!("named pipe peek failed: {e}");
                    return false;
                }
            };

            let mut chunk = vec![0u8; available.min(Self::READ_CHUNK)];
            match stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("named pipe read failed: {e}");
                    return false;
                }
            }
        }
    }
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NativeTransport {
    fn connect(&mut self, pipe: i32) -> bool {
        if self.stream.is_some() {
            return true;
        }

        let (first, last) = if pipe < 0 {
            (0, constants::PIPE_COUNT - 1)
        } else {
            (pipe, pipe)
        };

        for index in first..=last {
            if let Some(stream) = platform::connect_pipe(index) {
                self.stream = Some(stream);
                self.pipe = index;
                self.read_buf.clear();
                return true;
            }
        }
        false
    }

    fn read_frame(&mut self) -> Option<Frame> {
        self.stream.as_ref()?;

        if !self.fill_read_buf() {
            self.drop_connection();
            return None;
        }

        match Frame::parse(&mut self.read_buf, constants::MAX_INBOUND_PAYLOAD) {
            Ok(frame) => frame,
            Err(e) => {
                // The stream cannot be re-synchronized after a bad header.
                tracing::warn!("dropping pipe {}: {e}", self.pipe);
                self.drop_connection();
                None
            }
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let encoded = frame.encode();
        let mut data = &encoded[..];
        while !data.is_empty() {
            match stream.write(data) {
                Ok(0) => break,
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!("pipe write failed: {e}");
                    break;
                }
            }
        }

        if data.is_empty() {
            true
        } else {
            self.drop_connection();
            false
        }
    }

    fn close(&mut self) {
        self.drop_connection();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connected_pipe(&self) -> i32 {
        self.pipe
    }
}

#[cfg(unix)]
mod platform {
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;

    use crate::ipc::protocol::constants;

    pub(super) fn connect_pipe(index: i32) -> Option<UnixStream> {
        for dir in candidate_dirs() {
            let path = dir.join(format!("{}{}", constants::PIPE_PREFIX, index));
            if let Ok(stream) = UnixStream::connect(&path) {
                if stream.set_nonblocking(true).is_ok() {
                    tracing::debug!("connected to ipc socket {}", path.display());
                    return Some(stream);
                }
            }
        }
        None
    }

    /// Directories that may hold Discord's socket, most specific first.
    /// Sandboxed installs (snap, flatpak) expose the socket under a
    /// subdirectory of the same temp roots.
    fn candidate_dirs() -> Vec<PathBuf> {
        let mut roots = Vec::new();
        for key in ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"] {
            if let Ok(dir) = std::env::var(key) {
                if !dir.is_empty() {
                    roots.push(PathBuf::from(dir));
                }
            }
        }
        if roots.is_empty() {
            // Last resort for environments with none of the vars set.
            roots.push(PathBuf::from(format!("/run/user/{}", unsafe {
                libc::getuid()
            })));
        }
        roots.push(PathBuf::from("/tmp"));

        let mut dirs = roots.clone();
        for root in roots {
            dirs.push(root.join("snap.discord"));
            dirs.push(root.join("app/com.discordapp.Discord"));
        }
        dirs
    }
}

#[cfg(windows)]
mod platform {
    use std::fs::{File, OpenOptions};
    use std::os::windows::io::AsRawHandle;
    use std::ptr;

    use windows_sys::Win32::System::Pipes::PeekNamedPipe;

    use crate::ipc::protocol::constants;

    pub(super) fn connect_pipe(index: i32) -> Option<File> {
        let path = format!(r"\\.\pipe\{}{}", constants::PIPE_PREFIX, index);
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => {
                tracing::debug!("connected to named pipe {path}");
                Some(file)
            }
            Err(_) => None,
        }
    }

    /// Bytes readable right now, without consuming them.
    pub(super) fn available_bytes(file: &File) -> std::io::Result<u32> {
        let mut available = 0u32;
        let ok = unsafe {
            PeekNamedPipe(
                file.as_raw_handle() as _,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                &mut available,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(available)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_transport_reports_disconnected() {
        let transport = NativeTransport::new();
        assert!(!transport.is_connected());
        assert_eq!(transport.connected_pipe(), -1);
    }

    #[cfg(unix)]
    #[test]
    fn connect_scans_and_reads_handshake_bytes() {
        use std::os::unix::net::UnixListener;

        let dir = std::env::temp_dir().join(format!("presencewire-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        // Point discovery at a private directory so a real Discord client
        // cannot interfere with the test.
        std::env::set_var("XDG_RUNTIME_DIR", &dir);

        let socket_path = dir.join("discord-ipc-3");
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path).unwrap();

        let mut transport = NativeTransport::new();
        assert!(!transport.connect(1), "pipe 1 does not exist");
        assert!(transport.connect(3));
        assert_eq!(transport.connected_pipe(), 3);

        let (mut server, _) = listener.accept().unwrap();

        // Nothing sent yet: read must report absence, not block.
        assert!(transport.read_frame().is_none());
        assert!(transport.is_connected());

        let frame = Frame::new(crate::ipc::protocol::Opcode::Ping, b"{}".to_vec());
        server.write_all(&frame.encode()).unwrap();
        server.flush().unwrap();

        let mut got = None;
        for _ in 0..100 {
            if let Some(f) = transport.read_frame() {
                got = Some(f);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got, Some(frame));

        // Peer hangup flips the connection state on the next read.
        drop(server);
        drop(listener);
        for _ in 0..100 {
            if transport.read_frame().is_none() && !transport.is_connected() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!transport.is_connected());
        assert_eq!(transport.connected_pipe(), -1);

        let _ = std::fs::remove_file(&socket_path);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
