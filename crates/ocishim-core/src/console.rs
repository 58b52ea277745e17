//! Console socket channel.
//!
//! When a container process asks for a terminal, the OCI runtime allocates
//! the pty itself and sends the master back over a Unix domain socket whose
//! path it receives through `--console-socket`. The exchange is a two-phase
//! protocol:
//!
//! 1. [`ConsoleSocket::open`] binds and listens without blocking.
//! 2. [`receive_master`] accepts exactly one connection and reads exactly
//!    one message carrying exactly one descriptor.
//!
//! The runtime is the peer, so phase 2 must run concurrently with the
//! runtime invocation. [`ConsoleSocket::spawn_receiver`] makes that explicit
//! by moving phase 2 onto a dedicated thread.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use nix::errno::Errno;
use ocishim_common::constants::{CONSOLE_SOCKET_FILENAME, MAX_CONSOLE_NAME_LEN};
use ocishim_common::error::{ProtocolViolation, Result, ShimError};

/// A terminal master received from the runtime.
#[derive(Debug)]
pub struct ConsoleMaster {
    name: String,
    file: File,
}

impl ConsoleMaster {
    /// Name the peer sent alongside the descriptor.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Borrow the master as a file.
    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }

    /// Consumes the wrapper, returning the master file.
    #[must_use]
    pub fn into_file(self) -> File {
        self.file
    }
}

/// A listening console socket inside a process directory.
#[derive(Debug)]
pub struct ConsoleSocket {
    listener: Arc<UnixListener>,
    path: PathBuf,
}

impl ConsoleSocket {
    /// Binds the console socket inside `dir` and starts listening.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound (for example because
    /// the path already exists).
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(CONSOLE_SOCKET_FILENAME);
        let listener = UnixListener::bind(&path).map_err(|e| ShimError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "console socket listening");
        Ok(Self {
            listener: Arc::new(listener),
            path,
        })
    }

    /// Path the runtime should connect to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks on the calling thread until the master arrives.
    ///
    /// # Errors
    ///
    /// See [`receive_master`].
    pub fn receive_master(&self, timeout: Option<Duration>) -> Result<ConsoleMaster> {
        receive_master(&self.listener, timeout)
    }

    /// Runs [`receive_master`] on a dedicated thread.
    ///
    /// `on_master` is invoked with the descriptor once it arrives. Failures
    /// cannot reach the caller, who has long returned by then, so they are
    /// logged instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn_receiver<F>(self, timeout: Option<Duration>, on_master: F) -> Result<ConsoleReceiver>
    where
        F: FnOnce(Option<ConsoleMaster>) + Send + 'static,
    {
        let abandoned = Arc::new(AtomicBool::new(false));
        let listener = Arc::clone(&self.listener);
        let flag = Arc::clone(&abandoned);
        let path = self.path.clone();

        let handle = std::thread::Builder::new()
            .name("console-receiver".into())
            .spawn(move || match receive_master(&listener, timeout) {
                Ok(master) => {
                    tracing::debug!(path = %path.display(), name = master.name(), "received terminal master");
                    on_master(Some(master));
                }
                Err(e) if flag.load(Ordering::SeqCst) => {
                    tracing::debug!(path = %path.display(), error = %e, "console receiver abandoned");
                    on_master(None);
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to receive terminal master");
                    on_master(None);
                }
            })
            .map_err(|e| ShimError::io(&self.path, e))?;

        Ok(ConsoleReceiver {
            listener: self.listener,
            abandoned,
            handle,
        })
    }
}

/// Handle to a background console receive.
#[derive(Debug)]
pub struct ConsoleReceiver {
    listener: Arc<UnixListener>,
    abandoned: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ConsoleReceiver {
    /// Wakes a receiver whose peer will never connect.
    ///
    /// Shutting a listening socket down makes a blocked `accept` fail, so the
    /// thread exits and releases the listener.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        // SAFETY: the listener is owned by `self` and stays open for the call.
        let rc = unsafe { libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RDWR) };
        if rc < 0 {
            tracing::warn!(error = %Errno::last(), "failed to shut down console listener");
        }
    }

    /// Blocks until the background thread exits.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("console receiver thread panicked");
        }
    }
}

/// Accepts one connection on `listener` and extracts the passed master.
///
/// Checks run in order: the name payload is shorter than
/// [`MAX_CONSOLE_NAME_LEN`] and the ancillary length is exactly the space for
/// one descriptor, then exactly one control message, then exactly one
/// descriptor in it. The connection is closed after the single read
/// whatever the outcome. With `timeout` set, waiting for the peer and for
/// its message are each bounded.
///
/// # Errors
///
/// Returns [`ShimError::Protocol`] naming the broken invariant, or an I/O
/// error if accepting or reading fails.
pub fn receive_master(listener: &UnixListener, timeout: Option<Duration>) -> Result<ConsoleMaster> {
    let path = listener
        .local_addr()
        .ok()
        .and_then(|addr| addr.as_pathname().map(Path::to_path_buf))
        .unwrap_or_default();

    if let Some(after) = timeout {
        wait_for_peer(listener, after)?;
    }
    let (stream, _) = listener.accept().map_err(|e| ShimError::io(&path, e))?;
    if timeout.is_some() {
        stream
            .set_read_timeout(timeout)
            .map_err(|e| ShimError::io(&path, e))?;
    }

    let frame = match recv_frame(&stream) {
        Ok(frame) => frame,
        Err(e) if is_timeout(&e) => {
            return Err(ProtocolViolation::Timeout {
                after: timeout.unwrap_or_default(),
            }
            .into());
        }
        Err(e) => return Err(ShimError::io(&path, e)),
    };
    drop(stream);

    if let Err(violation) = check_frame(frame.name.len(), frame.control.len) {
        // Release whatever the kernel installed without interpreting it.
        drop(frame.control.take_messages());
        return Err(violation.into());
    }
    let fd = single_descriptor(frame.control.take_messages())?;
    Ok(ConsoleMaster {
        name: String::from_utf8_lossy(&frame.name).into_owned(),
        file: File::from(fd),
    })
}

/// A control message found in the ancillary data.
#[derive(Debug)]
pub enum ControlMessage {
    /// `SCM_RIGHTS`, with the descriptors it carried.
    Rights(Vec<OwnedFd>),
    /// Anything else.
    Other {
        /// `cmsg_level`.
        level: i32,
        /// `cmsg_type`.
        kind: i32,
    },
}

/// Space needed for a control message carrying exactly one descriptor.
#[must_use]
pub fn one_descriptor_space() -> usize {
    // SAFETY: CMSG_SPACE is pure arithmetic on its argument.
    unsafe { libc::CMSG_SPACE(size_of::<RawFd>() as libc::c_uint) as usize }
}

/// Checks the raw message sizes before any control data is interpreted.
///
/// # Errors
///
/// Returns [`ProtocolViolation::OversizedName`] if `name_len` reaches the
/// limit, or [`ProtocolViolation::AncillarySize`] if `control_len` is not
/// the space for one descriptor.
pub fn check_frame(name_len: usize, control_len: usize) -> std::result::Result<(), ProtocolViolation> {
    if name_len >= MAX_CONSOLE_NAME_LEN {
        return Err(ProtocolViolation::OversizedName {
            len: name_len,
            max: MAX_CONSOLE_NAME_LEN,
        });
    }
    let expected = one_descriptor_space();
    if control_len != expected {
        return Err(ProtocolViolation::AncillarySize {
            expected,
            actual: control_len,
        });
    }
    Ok(())
}

/// Picks the single descriptor out of the parsed control messages.
///
/// Descriptors that are not returned are closed when the input is dropped.
///
/// # Errors
///
/// Returns the [`ProtocolViolation`] for zero or multiple messages, a
/// non-rights message, or zero or multiple descriptors.
pub fn single_descriptor(
    messages: Vec<ControlMessage>,
) -> std::result::Result<OwnedFd, ProtocolViolation> {
    let message = match messages.len() {
        0 => return Err(ProtocolViolation::NoControlMessages),
        1 => messages.into_iter().next(),
        count => return Err(ProtocolViolation::MultipleControlMessages { count }),
    };
    match message {
        None => Err(ProtocolViolation::NoControlMessages),
        Some(ControlMessage::Other { level, kind }) => {
            Err(ProtocolViolation::UnexpectedControlMessage { level, kind })
        }
        Some(ControlMessage::Rights(fds)) => match fds.len() {
            0 => Err(ProtocolViolation::NoDescriptors),
            1 => fds
                .into_iter()
                .next()
                .ok_or(ProtocolViolation::NoDescriptors),
            count => Err(ProtocolViolation::MultipleDescriptors { count }),
        },
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Polls the listener until a peer is queued or `after` elapses.
fn wait_for_peer(listener: &UnixListener, after: Duration) -> Result<()> {
    let millis = libc::c_int::try_from(after.as_millis()).unwrap_or(libc::c_int::MAX);
    let mut pfd = libc::pollfd {
        fd: listener.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        // SAFETY: `pfd` is a valid pollfd that outlives the call.
        let rc = unsafe { libc::poll(&raw mut pfd, 1, millis) };
        match rc {
            0 => return Err(ProtocolViolation::Timeout { after }.into()),
            n if n > 0 => return Ok(()),
            _ => match Errno::last() {
                Errno::EINTR => {}
                errno => return Err(ShimError::sys("poll", errno)),
            },
        }
    }
}

/// One message as read off the socket.
struct Frame {
    name: Vec<u8>,
    control: ControlBuffer,
}

/// Ancillary data buffer, aligned for `cmsghdr`.
struct ControlBuffer {
    words: Vec<u64>,
    capacity: usize,
    len: usize,
}

impl ControlBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(size_of::<u64>())],
            capacity,
            len: 0,
        }
    }

    /// Walks the received control messages, taking ownership of every
    /// descriptor the kernel installed.
    fn take_messages(mut self) -> Vec<ControlMessage> {
        let mut messages = Vec::new();
        if self.len == 0 {
            return messages;
        }
        // SAFETY: an all-zero msghdr is a valid empty header.
        let mut header: libc::msghdr = unsafe { std::mem::zeroed() };
        header.msg_control = self.words.as_mut_ptr().cast();
        header.msg_controllen = self.len as _;

        // SAFETY: `header` points at `self.len` initialized bytes written by
        // recvmsg; CMSG_FIRSTHDR/CMSG_NXTHDR bound every step by that length.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&raw const header);
            while !cmsg.is_null() {
                let level = (*cmsg).cmsg_level;
                let kind = (*cmsg).cmsg_type;
                if level == libc::SOL_SOCKET && kind == libc::SCM_RIGHTS {
                    let payload = ((*cmsg).cmsg_len as usize)
                        .saturating_sub(libc::CMSG_LEN(0) as usize);
                    let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                    let fds = (0..payload / size_of::<RawFd>())
                        .map(|i| OwnedFd::from_raw_fd(std::ptr::read_unaligned(data.add(i))))
                        .collect();
                    messages.push(ControlMessage::Rights(fds));
                } else {
                    messages.push(ControlMessage::Other { level, kind });
                }
                cmsg = libc::CMSG_NXTHDR(&raw const header, cmsg);
            }
        }
        messages
    }
}

/// Reads a single message with its ancillary data.
fn recv_frame(stream: &UnixStream) -> io::Result<Frame> {
    let mut name = vec![0u8; MAX_CONSOLE_NAME_LEN];
    let mut control = ControlBuffer::with_capacity(one_descriptor_space());

    let mut iov = libc::iovec {
        iov_base: name.as_mut_ptr().cast(),
        iov_len: name.len(),
    };
    // SAFETY: an all-zero msghdr is a valid empty header.
    let mut header: libc::msghdr = unsafe { std::mem::zeroed() };
    header.msg_iov = &raw mut iov;
    header.msg_iovlen = 1;
    header.msg_control = control.words.as_mut_ptr().cast();
    header.msg_controllen = control.capacity as _;

    loop {
        // SAFETY: every pointer in `header` refers to a live buffer of the
        // advertised length for the duration of the call.
        let n = unsafe { libc::recvmsg(stream.as_raw_fd(), &raw mut header, libc::MSG_CMSG_CLOEXEC) };
        if n >= 0 {
            name.truncate(n.unsigned_abs());
            control.len = header.msg_controllen as usize;
            return Ok(Frame { name, control });
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    /// Sends `payload` with the given descriptors as one `SCM_RIGHTS` message.
    fn send_with_rights(stream: &UnixStream, payload: &[u8], fds: &[RawFd]) {
        let data_len = std::mem::size_of_val(fds);
        // SAFETY: arithmetic only.
        let space = unsafe { libc::CMSG_SPACE(data_len as libc::c_uint) } as usize;
        let mut control = vec![0u64; space.div_ceil(8)];
        let mut iov = libc::iovec {
            iov_base: payload.as_ptr().cast_mut().cast(),
            iov_len: payload.len(),
        };
        // SAFETY: all pointers reference live buffers of the stated sizes.
        unsafe {
            let mut header: libc::msghdr = std::mem::zeroed();
            header.msg_iov = &raw mut iov;
            header.msg_iovlen = 1;
            if !fds.is_empty() {
                header.msg_control = control.as_mut_ptr().cast();
                header.msg_controllen = space as _;
                let cmsg = libc::CMSG_FIRSTHDR(&raw const header);
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(data_len as libc::c_uint) as _;
                std::ptr::copy_nonoverlapping(
                    fds.as_ptr().cast::<u8>(),
                    libc::CMSG_DATA(cmsg),
                    data_len,
                );
            }
            let sent = libc::sendmsg(stream.as_raw_fd(), &raw const header, 0);
            assert!(sent >= 0, "sendmsg: {}", io::Error::last_os_error());
        }
    }

    fn pipe() -> (File, File) {
        let (r, w) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).unwrap();
        (File::from(r), File::from(w))
    }

    fn devnull() -> OwnedFd {
        OwnedFd::from(File::open("/dev/null").unwrap())
    }

    /// Opens a console socket and runs `peer` against it on another thread.
    fn exchange<P>(peer: P) -> Result<ConsoleMaster>
    where
        P: FnOnce(UnixStream) + Send + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let socket = ConsoleSocket::open(dir.path()).unwrap();
        let path = socket.path().to_path_buf();
        let peer = std::thread::spawn(move || {
            let stream = UnixStream::connect(path).unwrap();
            peer(stream);
        });
        let result = socket.receive_master(Some(Duration::from_secs(10)));
        peer.join().unwrap();
        result
    }

    #[test]
    fn receives_usable_master_with_its_name() {
        let (mut reader, writer) = pipe();
        let master = exchange(move |stream| {
            send_with_rights(&stream, b"/dev/ptmx", &[writer.as_raw_fd()]);
        })
        .unwrap();

        assert_eq!(master.name(), "/dev/ptmx");
        let mut file = master.into_file();
        file.write_all(b"hello").unwrap();
        drop(file);
        let mut out = String::new();
        let _ = reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn oversized_name_is_rejected_before_control_data() {
        let (_reader, writer) = pipe();
        let err = exchange(move |stream| {
            send_with_rights(&stream, &[b'x'; MAX_CONSOLE_NAME_LEN], &[writer.as_raw_fd()]);
        })
        .unwrap_err();

        assert!(matches!(
            err,
            ShimError::Protocol(ProtocolViolation::OversizedName { len: 4096, .. })
        ));
    }

    #[test]
    fn message_without_descriptor_has_wrong_ancillary_size() {
        let err = exchange(|mut stream| {
            stream.write_all(b"no-fd").unwrap();
        })
        .unwrap_err();

        assert!(matches!(
            err,
            ShimError::Protocol(ProtocolViolation::AncillarySize { actual: 0, .. })
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn two_descriptors_in_one_message_are_rejected() {
        let (_r1, w1) = pipe();
        let (_r2, w2) = pipe();
        let err = exchange(move |stream| {
            send_with_rights(&stream, b"pty", &[w1.as_raw_fd(), w2.as_raw_fd()]);
        })
        .unwrap_err();

        assert!(matches!(
            err,
            ShimError::Protocol(ProtocolViolation::MultipleDescriptors { count: 2 })
        ));
    }

    #[test]
    fn receive_times_out_without_peer() {
        let dir = tempfile::tempdir().unwrap();
        let socket = ConsoleSocket::open(dir.path()).unwrap();
        let err = socket
            .receive_master(Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(
            err,
            ShimError::Protocol(ProtocolViolation::Timeout { .. })
        ));
    }

    #[test]
    fn check_frame_rejects_oversized_name_first() {
        assert!(matches!(
            check_frame(MAX_CONSOLE_NAME_LEN, 0),
            Err(ProtocolViolation::OversizedName { .. })
        ));
        assert!(matches!(
            check_frame(10, one_descriptor_space() + 8),
            Err(ProtocolViolation::AncillarySize { .. })
        ));
        assert!(check_frame(MAX_CONSOLE_NAME_LEN - 1, one_descriptor_space()).is_ok());
    }

    #[test]
    fn single_descriptor_distinguishes_every_shape() {
        assert_eq!(
            single_descriptor(vec![]).unwrap_err(),
            ProtocolViolation::NoControlMessages
        );
        assert_eq!(
            single_descriptor(vec![
                ControlMessage::Rights(vec![devnull()]),
                ControlMessage::Rights(vec![devnull()]),
                ControlMessage::Rights(vec![devnull()]),
            ])
            .unwrap_err(),
            ProtocolViolation::MultipleControlMessages { count: 3 }
        );
        assert_eq!(
            single_descriptor(vec![ControlMessage::Rights(vec![])]).unwrap_err(),
            ProtocolViolation::NoDescriptors
        );
        assert_eq!(
            single_descriptor(vec![ControlMessage::Rights(vec![devnull(), devnull()])])
                .unwrap_err(),
            ProtocolViolation::MultipleDescriptors { count: 2 }
        );
        assert_eq!(
            single_descriptor(vec![ControlMessage::Other {
                level: libc::SOL_SOCKET,
                kind: libc::SCM_CREDENTIALS,
            }])
            .unwrap_err(),
            ProtocolViolation::UnexpectedControlMessage {
                level: libc::SOL_SOCKET,
                kind: libc::SCM_CREDENTIALS,
            }
        );
        assert!(single_descriptor(vec![ControlMessage::Rights(vec![devnull()])]).is_ok());
    }

    #[test]
    fn two_control_messages_are_counted() {
        assert_eq!(
            single_descriptor(vec![
                ControlMessage::Rights(vec![devnull()]),
                ControlMessage::Rights(vec![devnull()]),
            ])
            .unwrap_err(),
            ProtocolViolation::MultipleControlMessages { count: 2 }
        );
    }

    #[test]
    fn spawned_receiver_delivers_master_to_callback() {
        let dir = tempfile::tempdir().unwrap();
        let socket = ConsoleSocket::open(dir.path()).unwrap();
        let path = socket.path().to_path_buf();
        let (tx, rx) = std::sync::mpsc::channel();
        let receiver = socket
            .spawn_receiver(None, move |master| {
                let _ = tx.send(master.map(|m| m.name().to_owned()));
            })
            .unwrap();

        let (_reader, writer) = pipe();
        let stream = UnixStream::connect(path).unwrap();
        send_with_rights(&stream, b"console", &[writer.as_raw_fd()]);

        assert_eq!(rx.recv().unwrap().as_deref(), Some("console"));
        receiver.join();
    }

    #[test]
    fn abandoned_receiver_exits_without_master() {
        let dir = tempfile::tempdir().unwrap();
        let socket = ConsoleSocket::open(dir.path()).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let receiver = socket
            .spawn_receiver(None, move |master| {
                let _ = tx.send(master.is_some());
            })
            .unwrap();

        receiver.abandon();
        assert!(!rx.recv_timeout(Duration::from_secs(10)).unwrap());
        receiver.join();
    }
}
