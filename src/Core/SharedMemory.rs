// Shared memory backend abstraction for Linux
// Uses POSIX shm_open + mmap so segments are reachable by name from any process

use std::io;
use std::ptr::NonNull;

/// Shared memory backend trait for cross-platform memory mapping
pub trait SharedMemoryBackend: Send + Sync + std::fmt::Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the underlying file descriptor
    fn raw_handle(&self) -> RawHandle;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy)]
pub enum RawHandle {
    /// Unix file descriptor (Linux)
    Fd(i32),
}

/// Create a new shared memory region with the specified size.
///
/// The region is created with `O_EXCL`: if a segment of the same name already
/// exists the call fails with `AlreadyExists` instead of silently reusing it.
/// The creating handle owns the name and unlinks it on drop.
///
/// # Arguments
/// * `size` - Size of the shared memory region in bytes
/// * `name` - Segment name, unique on the host (no '/' or NUL bytes)
///
/// # Returns
/// A boxed trait object implementing SharedMemoryBackend
#[cfg(target_os = "linux")]
pub fn create_shared_memory(size: usize, name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::create(size, name)?))
}

/// Attach to an existing shared memory region by name.
///
/// The mapping covers the segment's current size as reported by the OS;
/// callers validate the content themselves. Attached handles never unlink
/// the name.
///
/// # Arguments
/// * `name` - Name of the shared memory region to attach to
/// * `min_size` - Minimum acceptable segment size (for validation)
///
/// # Returns
/// A boxed trait object implementing SharedMemoryBackend
#[cfg(target_os = "linux")]
pub fn attach_shared_memory(name: &str, min_size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    LinuxSharedMemory::attach(name, min_size).map(|shm| Box::new(shm) as Box<dyn SharedMemoryBackend>)
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_size: usize, _name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn attach_shared_memory(_name: &str, _min_size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(target_os = "linux")]
use std::ffi::CString;
#[cfg(target_os = "linux")]
use std::os::unix::io::RawFd;

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: RawFd,
    shm_name: CString,
    owner: bool,
}

#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    fn shm_name(name: &str) -> io::Result<CString> {
        if name.is_empty() || name.contains('/') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid shared memory name: {name:?}"),
            ));
        }
        CString::new(format!("/{name}"))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Name contains NUL byte"))
    }

    /// Create a new named segment, failing if the name is taken.
    pub fn create(size: usize, name: &str) -> io::Result<Self> {
        let c_name = Self::shm_name(name)?;

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(io::Error::new(
                err.kind(),
                format!("shm_open({name}) failed: {err}"),
            ));
        }

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(io::Error::new(
                err.kind(),
                format!("ftruncate({name}, {size}) failed: {err}"),
            ));
        }

        let ptr = Self::map(fd, size).map_err(|e| {
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            e
        })?;

        Ok(Self {
            ptr,
            size,
            fd,
            shm_name: c_name,
            owner: true,
        })
    }

    /// Attach to an existing named segment.
    pub fn attach(name: &str, min_size: usize) -> io::Result<Self> {
        let c_name = Self::shm_name(name)?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o600 as libc::c_uint) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("shm_open({name}) failed: {err}"),
            ));
        }

        let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
        if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let size = unsafe { stat.assume_init() }.st_size as usize;
        if size < min_size {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Segment {name} is {size} bytes, expected at least {min_size}"),
            ));
        }

        let ptr = Self::map(fd, size).map_err(|e| {
            unsafe { libc::close(fd) };
            e
        })?;

        Ok(Self {
            ptr,
            size,
            fd,
            shm_name: c_name,
            owner: false,
        })
    }

    fn map(fd: RawFd, size: usize) -> io::Result<NonNull<u8>> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned NULL"))
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            libc::close(self.fd);
            if self.owner {
                libc::shm_unlink(self.shm_name.as_ptr());
            }
        }
    }
}
