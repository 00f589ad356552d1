//! Pipe transport
//!
//! Each worker gets two unidirectional pipes created before it is spawned:
//! the read end of the input pipe becomes its stdin and the write end of the
//! output pipe becomes its stdout.
//!
//! # Wire format
//!
//! A stream is a plain concatenation of 4-byte little-endian IEEE-754 `f32`
//! values with no header. The input stream carries the worker's partition in
//! index order and ends at end-of-stream; the output stream carries exactly one
//! value, the partial sum.
//!
//! ```text
//! orchestrator                      worker
//!     |-- v[start] .. v[end-1] ------->|
//!     |-- close ---------------------->|   (end-of-input)
//!     |<------------- partial sum -----|
//!     |<------------- close -----------|
//! ```

use super::{StdioBinding, Transport, TransportKind, WorkerInvocation};
use crate::error::{RunError, RunResult};
use crate::partition::{Partition, PartitionPlan};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::os::fd::{FromRawFd, OwnedFd};
#[cfg(not(target_os = "linux"))]
use std::os::fd::AsRawFd;

/// Encoded size of one value
pub const VALUE_SIZE: usize = std::mem::size_of::<f32>();

/// Write one value
pub fn write_value<W: Write>(writer: &mut W, value: f32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write values back to back
pub fn write_values<W: Write>(writer: &mut W, values: &[f32]) -> io::Result<()> {
    for &value in values {
        write_value(writer, value)?;
    }
    Ok(())
}

/// Read one value
///
/// Returns `Ok(None)` at a clean end-of-stream. A stream that ends in the middle
/// of a value is an `UnexpectedEof` error.
pub fn read_value<R: Read>(reader: &mut R) -> io::Result<Option<f32>> {
    let mut buf = [0u8; VALUE_SIZE];
    let mut filled = 0;

    while filled < VALUE_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} bytes of a value", filled, VALUE_SIZE),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(Some(f32::from_le_bytes(buf)))
}

/// Create a pipe; returns `(read_end, write_end)`, both close-on-exec
///
/// Spawning dup2()s the child's ends onto 0/1, which clears the flag there.
#[cfg(target_os = "linux")]
fn pipe_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // Atomic, so a concurrent spawn on another thread cannot inherit either end
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

#[cfg(not(target_os = "linux"))]
fn pipe_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    let read_end = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write_end = unsafe { OwnedFd::from_raw_fd(fds[1]) };

    for fd in [&read_end, &write_end] {
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok((read_end, write_end))
}

/// Both pipes of one worker
///
/// Orchestrator-side ends are held as `File`s; the child's ends are held until
/// the worker is spawned and then handed to the launcher.
#[derive(Debug)]
pub struct PipeChannel {
    index: usize,
    partition: Partition,
    input: Option<File>,
    output: Option<File>,
    child_ends: Option<(OwnedFd, OwnedFd)>,
    result: Option<f32>,
}

impl PipeChannel {
    fn create(index: usize, partition: Partition) -> io::Result<Self> {
        let (child_stdin, input) = pipe_pair()?;
        let (output, child_stdout) = pipe_pair()?;
        Ok(Self {
            index,
            partition,
            input: Some(File::from(input)),
            output: Some(File::from(output)),
            child_ends: Some((child_stdin, child_stdout)),
            result: None,
        })
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Number of stream ends still open on the orchestrator side
    fn open_ends(&self) -> usize {
        usize::from(self.input.is_some())
            + usize::from(self.output.is_some())
            + if self.child_ends.is_some() { 2 } else { 0 }
    }

    fn close(&mut self) {
        self.input = None;
        self.output = None;
        self.child_ends = None;
    }
}

/// Orchestrator side of the pipe transport
pub struct PipeTransport<'a> {
    sequence: &'a [f32],
    channels: Vec<PipeChannel>,
}

impl<'a> PipeTransport<'a> {
    /// Create one channel per partition of `plan`
    ///
    /// Pipes created before a failure are closed (by drop) before the
    /// `ResourceAcquisition` error is returned.
    pub fn create(sequence: &'a [f32], plan: &PartitionPlan) -> RunResult<Self> {
        let channels = plan
            .partitions()
            .iter()
            .enumerate()
            .map(|(index, &partition)| {
                PipeChannel::create(index, partition)
                    .map_err(|e| RunError::resource(format!("pipe pair for worker {}", index), e))
            })
            .collect::<RunResult<Vec<_>>>()?;

        tracing::debug!(workers = channels.len(), "pipe transport created");
        Ok(Self { sequence, channels })
    }

    pub fn channels(&self) -> &[PipeChannel] {
        &self.channels
    }

    fn channel_mut(&mut self, index: usize) -> RunResult<&mut PipeChannel> {
        let count = self.channels.len();
        self.channels.get_mut(index).ok_or_else(|| {
            RunError::transport(
                format!("worker {}", index),
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no pipe channel for worker {} ({} channels)", index, count),
                ),
            )
        })
    }
}

impl Transport for PipeTransport<'_> {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }

    fn invocation(&mut self, index: usize, partition: &Partition) -> RunResult<WorkerInvocation> {
        let channel = self.channel_mut(index)?;
        debug_assert_eq!(channel.partition, *partition);

        let (stdin, stdout) = channel.child_ends.take().ok_or_else(|| {
            RunError::transport(
                format!("binding worker {}", index),
                io::Error::new(io::ErrorKind::AlreadyExists, "pipe channel already bound"),
            )
        })?;

        Ok(WorkerInvocation {
            index,
            args: vec!["pipe".to_string()],
            stdio: StdioBinding::Streams { stdin, stdout },
        })
    }

    fn send_inputs(&mut self) -> RunResult<()> {
        let sequence = self.sequence;
        for channel in &mut self.channels {
            let Some(input) = channel.input.take() else {
                continue;
            };
            let values = &sequence[channel.partition.range()];

            let mut writer = BufWriter::new(input);
            let sent = write_values(&mut writer, values).and_then(|()| writer.flush());
            // Dropping the writer closes the write end: end-of-input for the worker
            drop(writer);

            match sent {
                Ok(()) => tracing::debug!(worker = channel.index, values = values.len(), "input sent"),
                // Worker exited before draining its input; surfaces as a missing result
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::warn!(worker = channel.index, "worker closed its input early");
                }
                Err(e) => {
                    return Err(RunError::transport(
                        format!("writing input of worker {}", channel.index),
                        e,
                    ))
                }
            }
        }
        Ok(())
    }

    fn receive_results(&mut self) -> RunResult<()> {
        for channel in &mut self.channels {
            let Some(mut output) = channel.output.take() else {
                continue;
            };
            channel.result = read_value(&mut output)
                .map_err(|e| RunError::transport(format!("reading result of worker {}", channel.index), e))?;

            match channel.result {
                Some(value) => tracing::debug!(worker = channel.index, partial = value, "result received"),
                None => tracing::debug!(worker = channel.index, "output closed without a result"),
            }
        }
        Ok(())
    }

    fn collect(&mut self) -> RunResult<Vec<Option<f32>>> {
        Ok(self.channels.iter().map(|c| c.result).collect())
    }

    fn release(&mut self) {
        let open: usize = self.channels.iter().map(PipeChannel::open_ends).sum();
        for channel in &mut self.channels {
            channel.close();
        }
        if open > 0 {
            tracing::debug!(open, "closed remaining pipe ends");
        }
    }
}

impl Drop for PipeTransport<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
