//! Shared-memory transport
//!
//! Three named POSIX objects per run:
//!
//! - `<run>.in`: `N` floats, written once by the orchestrator before any worker
//!   starts, mapped read-only by workers.
//! - `<run>.out`: one [`ResultSlot`] per worker, zero-initialized.
//! - `<run>.lock`: a named semaphore with initial value 1.
//!
//! Every access to the result segment, from workers and from the orchestrator,
//! happens while holding the semaphore. Slots are disjoint by worker index, so
//! the single lock is coarser than strictly needed; it keeps the publish path
//! trivially correct.
//!
//! The orchestrator owns the objects (creates and unlinks them). Workers only
//! borrow them for their own lifetime (open, map, unmap, close).

use super::{RunId, StdioBinding, Transport, TransportKind, WorkerInvocation};
use crate::error::{RunError, RunResult};
use crate::partition::Partition;
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;

/// Mapping access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn map_fd(fd: &OwnedFd, len: usize, access: Access) -> io::Result<*mut libc::c_void> {
    let prot = match access {
        Access::ReadOnly => libc::PROT_READ,
        Access::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
    };

    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            prot,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(addr)
}

/// A mapped POSIX shared memory object
///
/// The owner unlinks the name on release; borrowers only unmap.
pub struct SharedSegment {
    name: CString,
    addr: *mut libc::c_void,
    len: usize,
    access: Access,
    owner: bool,
    mapped: bool,
}

// Safety: the mapping is process-wide and stays valid until `release`, which
// requires `&mut self`.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a new zero-filled segment of `len` bytes, failing if the name exists
    pub fn create(name: &str, len: usize) -> io::Result<Self> {
        let cname = c_name(name)?;

        let raw = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let sized = unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) };
        let mapped = if sized < 0 {
            Err(io::Error::last_os_error())
        } else {
            map_fd(&fd, len, Access::ReadWrite)
        };

        match mapped {
            Ok(addr) => Ok(Self {
                name: cname,
                addr,
                len,
                access: Access::ReadWrite,
                owner: true,
                mapped: true,
            }),
            Err(err) => {
                unsafe { libc::shm_unlink(cname.as_ptr()) };
                Err(err)
            }
        }
    }

    /// Map an existing segment that must hold at least `len` bytes
    pub fn attach(name: &str, len: usize, access: Access) -> io::Result<Self> {
        let cname = c_name(name)?;
        let oflag = match access {
            Access::ReadOnly => libc::O_RDONLY,
            Access::ReadWrite => libc::O_RDWR,
        };

        let raw = unsafe { libc::shm_open(cname.as_ptr(), oflag, 0 as libc::c_uint) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut stat: libc::stat = unsafe { mem::zeroed() };
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } < 0 {
            return Err(io::Error::last_os_error());
        }
        if (stat.st_size as usize) < len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "segment {} holds {} bytes, expected at least {}",
                    name, stat.st_size, len
                ),
            ));
        }

        let addr = map_fd(&fd, len, access)?;
        Ok(Self {
            name: cname,
            addr,
            len,
            access,
            owner: false,
            mapped: true,
        })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or("<non-utf8>")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the segment as floats
    pub fn floats(&self) -> &[f32] {
        if !self.mapped {
            return &[];
        }
        // mmap returns page-aligned memory; len was sized from a float count
        unsafe { std::slice::from_raw_parts(self.addr as *const f32, self.len / mem::size_of::<f32>()) }
    }

    /// Copy `values` to the start of a writable segment
    pub fn write_floats(&mut self, values: &[f32]) -> io::Result<()> {
        if self.access != Access::ReadWrite || !self.mapped {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "segment is not writable"));
        }
        if mem::size_of_val(values) > self.len {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "values exceed segment size"));
        }
        unsafe { ptr::copy_nonoverlapping(values.as_ptr(), self.addr as *mut f32, values.len()) };
        Ok(())
    }

    fn slot_ptr(&self, index: usize) -> io::Result<*mut ResultSlot> {
        let slots = self.len / mem::size_of::<ResultSlot>();
        if !self.mapped || index >= slots {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("result slot {} out of range ({} slots)", index, slots),
            ));
        }
        Ok(unsafe { (self.addr as *mut ResultSlot).add(index) })
    }

    /// Unmap, and unlink if this handle owns the name
    ///
    /// Safe to call repeatedly; only the first call does anything. Reports the
    /// first OS error, e.g. `NotFound` when the name was already unlinked.
    pub fn release(&mut self) -> io::Result<()> {
        let mut first_err = None;

        if self.mapped {
            self.mapped = false;
            if unsafe { libc::munmap(self.addr, self.len) } < 0 {
                first_err = Some(io::Error::last_os_error());
            }
        }

        if self.owner {
            self.owner = false;
            if unsafe { libc::shm_unlink(self.name.as_ptr()) } < 0 {
                let err = io::Error::last_os_error();
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(segment = self.name(), "failed to release shared segment: {}", e);
        }
    }
}

/// A POSIX named semaphore used as a process-shared mutex
pub struct NamedSemaphore {
    name: CString,
    sem: *mut libc::sem_t,
    owner: bool,
    open: bool,
}

// Safety: sem_wait/sem_post are thread-safe; close requires `&mut self`.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create an unlocked semaphore, failing if the name exists
    pub fn create(name: &str) -> io::Result<Self> {
        let cname = c_name(name)?;
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            name: cname,
            sem,
            owner: true,
            open: true,
        })
    }

    /// Open an existing semaphore
    pub fn open(name: &str) -> io::Result<Self> {
        let cname = c_name(name)?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            name: cname,
            sem,
            owner: false,
            open: true,
        })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or("<non-utf8>")
    }

    /// Block until the semaphore is acquired
    pub fn lock(&self) -> io::Result<SemaphoreGuard<'_>> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "semaphore is closed"));
        }
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(SemaphoreGuard { semaphore: self });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Close, and unlink if this handle owns the name. Idempotent.
    pub fn release(&mut self) -> io::Result<()> {
        let mut first_err = None;

        if self.open {
            self.open = false;
            if unsafe { libc::sem_close(self.sem) } < 0 {
                first_err = Some(io::Error::last_os_error());
            }
        }

        if self.owner {
            self.owner = false;
            if unsafe { libc::sem_unlink(self.name.as_ptr()) } < 0 {
                let err = io::Error::last_os_error();
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(semaphore = self.name(), "failed to release semaphore: {}", e);
        }
    }
}

/// Held semaphore; posts on drop
pub struct SemaphoreGuard<'a> {
    semaphore: &'a NamedSemaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if unsafe { libc::sem_post(self.semaphore.sem) } < 0 {
            tracing::error!(
                semaphore = self.semaphore.name(),
                "sem_post failed: {}",
                io::Error::last_os_error()
            );
        }
    }
}

/// One worker's cell in the result segment
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResultSlot {
    pub value: f32,
    /// Nonzero once the owning worker has written `value`
    pub published: u32,
}

impl ResultSlot {
    pub fn get(&self) -> Option<f32> {
        (self.published != 0).then_some(self.value)
    }
}

/// Typed view of the result segment
pub struct ResultRegion {
    segment: SharedSegment,
    slots: usize,
}

impl ResultRegion {
    pub fn size_for(slots: usize) -> usize {
        slots * mem::size_of::<ResultSlot>()
    }

    pub fn create(name: &str, slots: usize) -> io::Result<Self> {
        Ok(Self {
            segment: SharedSegment::create(name, Self::size_for(slots))?,
            slots,
        })
    }

    pub fn attach(name: &str, slots: usize) -> io::Result<Self> {
        Ok(Self {
            segment: SharedSegment::attach(name, Self::size_for(slots), Access::ReadWrite)?,
            slots,
        })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Write `value` into slot `index` inside the critical section
    pub fn publish(&self, lock: &NamedSemaphore, index: usize, value: f32) -> io::Result<()> {
        let slot = self.segment.slot_ptr(index)?;
        let _guard = lock.lock()?;
        unsafe {
            ptr::write_volatile(
                slot,
                ResultSlot {
                    value,
                    published: 1,
                },
            )
        };
        Ok(())
    }

    /// Snapshot every slot inside the critical section
    pub fn read_all(&self, lock: &NamedSemaphore) -> io::Result<Vec<ResultSlot>> {
        let _guard = lock.lock()?;
        self.snapshot()
    }

    /// Snapshot every slot without taking the lock
    ///
    /// Only sound once no writer can exist, i.e. every worker has terminated.
    /// A worker killed inside its critical section never posts the semaphore,
    /// so locking here could block forever.
    pub fn snapshot(&self) -> io::Result<Vec<ResultSlot>> {
        (0..self.slots)
            .map(|i| self.segment.slot_ptr(i).map(|p| unsafe { ptr::read_volatile(p) }))
            .collect()
    }

    pub fn release(&mut self) -> io::Result<()> {
        self.segment.release()
    }
}

/// Names and sizes a shared-memory worker needs; also its command line
#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct SharedMemoryHandles {
    /// Input segment name
    #[arg(long)]
    pub input: String,
    /// Result segment name
    #[arg(long)]
    pub output: String,
    /// Semaphore name
    #[arg(long)]
    pub lock: String,
    /// This worker's index
    #[arg(long)]
    pub index: usize,
    /// Total number of workers
    #[arg(long)]
    pub workers: usize,
    /// Total number of elements in the input segment
    #[arg(long)]
    pub count: usize,
}

impl SharedMemoryHandles {
    /// Worker-mode arguments, parseable back by the `worker shm` subcommand
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "shm".to_string(),
            "--input".to_string(),
            self.input.clone(),
            "--output".to_string(),
            self.output.clone(),
            "--lock".to_string(),
            self.lock.clone(),
            "--index".to_string(),
            self.index.to_string(),
            "--workers".to_string(),
            self.workers.to_string(),
            "--count".to_string(),
            self.count.to_string(),
        ]
    }
}

/// Orchestrator side of the shared-memory transport
pub struct SharedMemoryTransport {
    handles: SharedMemoryHandles,
    input: SharedSegment,
    results: ResultRegion,
    lock: NamedSemaphore,
    released: bool,
}

impl SharedMemoryTransport {
    /// Create and populate the input segment, the result segment and the lock
    ///
    /// Objects created before a failure are released (by drop) before the
    /// `ResourceAcquisition` error is returned.
    pub fn create(sequence: &[f32], workers: usize, run: &RunId) -> RunResult<Self> {
        let handles = SharedMemoryHandles {
            input: run.resource_name("in"),
            output: run.resource_name("out"),
            lock: run.resource_name("lock"),
            index: 0,
            workers,
            count: sequence.len(),
        };

        let mut input = SharedSegment::create(&handles.input, mem::size_of_val(sequence))
            .map_err(|e| RunError::resource(format!("input segment {}", handles.input), e))?;
        input
            .write_floats(sequence)
            .map_err(|e| RunError::resource(format!("input segment {}", handles.input), e))?;

        let results = ResultRegion::create(&handles.output, workers)
            .map_err(|e| RunError::resource(format!("result segment {}", handles.output), e))?;

        let lock = NamedSemaphore::create(&handles.lock)
            .map_err(|e| RunError::resource(format!("semaphore {}", handles.lock), e))?;

        tracing::debug!(
            input = %handles.input,
            output = %handles.output,
            lock = %handles.lock,
            elements = sequence.len(),
            workers,
            "shared-memory transport created"
        );

        Ok(Self {
            handles,
            input,
            results,
            lock,
            released: false,
        })
    }

    pub fn handles_for(&self, index: usize) -> SharedMemoryHandles {
        SharedMemoryHandles {
            index,
            ..self.handles.clone()
        }
    }
}

impl Transport for SharedMemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::SharedMemory
    }

    fn invocation(&mut self, index: usize, partition: &Partition) -> RunResult<WorkerInvocation> {
        tracing::debug!(worker = index, %partition, "shared-memory worker assignment");
        Ok(WorkerInvocation {
            index,
            args: self.handles_for(index).to_args(),
            stdio: StdioBinding::Inherit,
        })
    }

    fn send_inputs(&mut self) -> RunResult<()> {
        // Input segment was populated in create()
        Ok(())
    }

    fn receive_results(&mut self) -> RunResult<()> {
        Ok(())
    }

    fn collect(&mut self) -> RunResult<Vec<Option<f32>>> {
        // Every worker has been reaped, so nobody can hold the lock legitimately
        let slots = self
            .results
            .snapshot()
            .map_err(|e| RunError::transport("reading result segment", e))?;
        Ok(slots.iter().map(ResultSlot::get).collect())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = self.input.release() {
            tracing::warn!(segment = %self.handles.input, "input segment already released: {}", e);
        }
        if let Err(e) = self.results.release() {
            tracing::warn!(segment = %self.handles.output, "result segment already released: {}", e);
        }
        if let Err(e) = self.lock.release() {
            tracing::warn!(semaphore = %self.handles.lock, "semaphore already released: {}", e);
        }
        tracing::debug!("shared-memory transport released");
    }
}

impl Drop for SharedMemoryTransport {
    fn drop(&mut self) {
        self.release();
    }
}
