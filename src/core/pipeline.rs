//! One-to-many broadcast channels.
//!
//! A broadcast job's first process (the producer) writes into a channel the
//! shell owns. Once the producer is done the shell hands every downstream
//! process its own readable copy of the full payload.

use std::fs::File;
use std::io::{self, Read, Write};
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use failure::{Fail, ResultExt};
use log::{debug, warn};
use nix::{
    errno::Errno,
    fcntl::{self, FcntlArg, OFlag},
    libc,
    sys::{mman, stat::Mode},
    unistd::{self, Pid},
};

use crate::core::process::Process;
use crate::errors::{Error, ErrorKind, Result};

/// Largest payload carried by a single queue message.
pub const QUEUE_MESSAGE_SIZE: usize = 4096;

static SEGMENT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// The channel between a broadcast job's producer and its consumers.
///
/// The shell calls, in order: `producer_stdout` before launching the
/// producer, `collect` right after, `replicate` before launching the
/// consumers, and `release` once everything is launched.
pub trait Broadcast {
    /// The descriptor the producer writes to, `None` once collected.
    fn producer_stdout(&self) -> Option<RawFd>;

    /// Blocks until the producer's whole output is in the channel.
    fn collect(&mut self, producer: &Process) -> Result<()>;

    /// Returns `n` descriptors, each reading the full payload from the start.
    fn replicate(&mut self, n: usize) -> Result<Vec<File>>;

    /// Frees the channel's kernel object. Safe to call more than once.
    fn release(&mut self) -> Result<()>;
}

/// Creates a close-on-exec pipe, returning `(reader, writer)`.
pub fn pipe() -> Result<(File, File)> {
    let (reader, writer) = unistd::pipe2(OFlag::O_CLOEXEC).context(ErrorKind::Nix)?;
    // pipe2 hands over two fresh descriptors nothing else owns
    unsafe { Ok((File::from_raw_fd(reader), File::from_raw_fd(writer))) }
}

fn write_nonblocking(writer: &mut File, payload: &[u8]) -> Result<()> {
    writer.write_all(payload).map_err(|e| {
        if e.kind() == io::ErrorKind::WouldBlock {
            Error::capacity("pipe buffer")
        } else {
            e.context(ErrorKind::Io).into()
        }
    })
}

#[repr(C)]
struct Message {
    mtype: libc::c_long,
    mtext: [u8; QUEUE_MESSAGE_SIZE],
}

impl Message {
    fn empty() -> Self {
        Message {
            mtype: 1,
            mtext: [0; QUEUE_MESSAGE_SIZE],
        }
    }
}

/// Broadcast over a private System V message queue.
///
/// The producer writes into a pipe that the shell drains completely; the
/// payload is queued in `QUEUE_MESSAGE_SIZE` messages, then each message is
/// received once and copied into one fresh pipe per consumer.
#[derive(Debug)]
pub struct QueueBroadcast {
    id: Option<libc::c_int>,
    reader: File,
    writer: Option<File>,
}

impl QueueBroadcast {
    pub fn new() -> Result<Self> {
        let (reader, writer) = pipe()?;
        let id = unsafe { libc::msgget(libc::IPC_PRIVATE, libc::IPC_CREAT | 0o600) };
        if id == -1 {
            return Err(Errno::last().context(ErrorKind::Nix).into());
        }
        debug!("created message queue {}", id);

        Ok(Self {
            id: Some(id),
            reader,
            writer: Some(writer),
        })
    }

    fn queue_id(&self) -> Result<libc::c_int> {
        self.id
            .ok_or_else(|| Errno::EIDRM.context(ErrorKind::Nix).into())
    }

    fn send(&self, chunk: &[u8]) -> Result<()> {
        let id = self.queue_id()?;
        let mut message = Message::empty();
        message.mtext[..chunk.len()].copy_from_slice(chunk);

        loop {
            let sent = unsafe {
                libc::msgsnd(
                    id,
                    &message as *const Message as *const libc::c_void,
                    chunk.len(),
                    libc::IPC_NOWAIT,
                )
            };
            if sent == 0 {
                return Ok(());
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => return Err(Error::capacity("message queue")),
                e => return Err(e.context(ErrorKind::Nix).into()),
            }
        }
    }

    /// Takes the next message off the queue, `None` once it is empty.
    fn receive(&self) -> Result<Option<Vec<u8>>> {
        let id = self.queue_id()?;
        let mut message = Message::empty();

        loop {
            let received = unsafe {
                libc::msgrcv(
                    id,
                    &mut message as *mut Message as *mut libc::c_void,
                    QUEUE_MESSAGE_SIZE,
                    0,
                    libc::IPC_NOWAIT,
                )
            };
            if received >= 0 {
                return Ok(Some(message.mtext[..received as usize].to_vec()));
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::ENOMSG => return Ok(None),
                e => return Err(e.context(ErrorKind::Nix).into()),
            }
        }
    }
}

impl Broadcast for QueueBroadcast {
    fn producer_stdout(&self) -> Option<RawFd> {
        self.writer.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn collect(&mut self, producer: &Process) -> Result<()> {
        // the drain only sees EOF once the shell's copy of the write end is gone
        self.writer.take();

        let mut payload = Vec::new();
        self.reader
            .read_to_end(&mut payload)
            .context(ErrorKind::Io)?;
        debug!(
            "collected {} bytes from {}",
            payload.len(),
            producer.program()
        );

        for chunk in payload.chunks(QUEUE_MESSAGE_SIZE) {
            self.send(chunk)?;
        }
        Ok(())
    }

    fn replicate(&mut self, n: usize) -> Result<Vec<File>> {
        let mut readers = Vec::with_capacity(n);
        let mut writers = Vec::with_capacity(n);
        for _ in 0..n {
            let (reader, writer) = pipe()?;
            // nobody reads until the consumers start: a full pipe must not
            // block the shell
            fcntl::fcntl(writer.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
                .context(ErrorKind::Nix)?;
            readers.push(reader);
            writers.push(writer);
        }

        while let Some(chunk) = self.receive()? {
            for writer in &mut writers {
                write_nonblocking(writer, &chunk)?;
            }
        }

        Ok(readers)
    }

    fn release(&mut self) -> Result<()> {
        if let Some(id) = self.id.take() {
            debug!("removing message queue {}", id);
            if unsafe { libc::msgctl(id, libc::IPC_RMID, ptr::null_mut()) } == -1 {
                return Err(Errno::last().context(ErrorKind::Nix).into());
            }
        }
        Ok(())
    }
}

impl Drop for QueueBroadcast {
    fn drop(&mut self) {
        log_if_err!(self.release(), "failed to remove message queue");
    }
}

/// Broadcast over a named POSIX shared-memory segment.
///
/// The producer's stdout is the segment itself. Each consumer gets its own
/// read-only descriptor, so every one of them starts reading at offset 0.
#[derive(Debug)]
pub struct SharedMemoryBroadcast {
    name: String,
    segment: Option<File>,
    linked: bool,
}

impl SharedMemoryBroadcast {
    pub fn new() -> Result<Self> {
        let name = format!(
            "/msh-{}-{}",
            Pid::this(),
            SEGMENT_COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let fd = mman::shm_open(
            name.as_str(),
            OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .context(ErrorKind::Nix)?;
        debug!("created shared memory segment {}", name);

        Ok(Self {
            name,
            // shm_open descriptors are close-on-exec and owned by nothing else
            segment: Some(unsafe { File::from_raw_fd(fd) }),
            linked: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Broadcast for SharedMemoryBroadcast {
    fn producer_stdout(&self) -> Option<RawFd> {
        self.segment.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Waits for the producer to exit or stop without reaping it, so the
    /// job still collects its status later.
    fn collect(&mut self, producer: &Process) -> Result<()> {
        self.segment.take();

        let pid = match producer.pid() {
            Some(pid) => pid,
            None => {
                warn!("{} was never launched", producer.program());
                return Ok(());
            }
        };

        loop {
            let mut info: libc::siginfo_t = unsafe { mem::zeroed() };
            let waited = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid.as_raw() as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WSTOPPED | libc::WNOWAIT,
                )
            };
            if waited == 0 {
                break;
            }
            match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e.context(ErrorKind::Nix).into()),
            }
        }

        debug!("{} ({}) is done writing to {}", producer.program(), pid, self.name);
        Ok(())
    }

    fn replicate(&mut self, n: usize) -> Result<Vec<File>> {
        (0..n)
            .map(|_| {
                let fd = mman::shm_open(self.name.as_str(), OFlag::O_RDONLY, Mode::empty())
                    .context(ErrorKind::Nix)?;
                Ok(unsafe { File::from_raw_fd(fd) })
            })
            .collect()
    }

    fn release(&mut self) -> Result<()> {
        self.segment.take();
        if self.linked {
            self.linked = false;
            debug!("unlinking shared memory segment {}", self.name);
            mman::shm_unlink(self.name.as_str()).context(ErrorKind::Nix)?;
        }
        Ok(())
    }
}

impl Drop for SharedMemoryBroadcast {
    fn drop(&mut self) {
        log_if_err!(self.release(), "failed to unlink {}", self.name);
    }
}
