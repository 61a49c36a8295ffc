use std::mem::size_of;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::Core::SharedMemory::{attach_shared_memory, create_shared_memory, SharedMemoryBackend};
use crate::error::{BufferError, Result};
use crate::MIMO::dtype::{DataView, DataViewMut, StructuredDtype};
use crate::MIMO::Queue::layout::{
    segment_layout, BufferHeader, QueueHeader, LAYOUT_VERSION, MAGIC_NUMBER,
};
use crate::MIMO::Queue::{QueueSlot, TokenQueue};
use crate::MIMO::Structs::Buffer_Structs::{
    BufferStats, Metadata, MetadataView, MetadataViewMut, Token, WriteToken, FLUSH_TOKEN,
    METADATA_BYTES,
};

/// Rate/deadtime window state for `get_stats`, local to one buffer handle.
struct StatsWindow {
    last_time: Instant,
    last_event_count: u64,
    last_deadtime: f64,
}

/// A Multiple-In Multiple-Out ring buffer over one shared-memory segment.
///
/// The segment holds a fixed pool of equal-sized slots and two token queues:
/// `empty` (indices free for writing) and `filled` (indices holding one
/// written record). Any process may create or attach a handle by name; the
/// handle itself is cheap, all shared state lives in the segment.
///
/// Tokens circulate `empty → writer → filled → reader → empty`; observers
/// borrow from `filled` without consuming. The token protocol is the locking
/// discipline: slot memory is only ever mutated by the unique holder of a
/// write token for that slot, and the queue handoff orders those writes
/// before any reader's view of them.
///
/// Handles are `Sync`; sessions from any number of threads of this process
/// may run against one handle, and further processes attach their own.
pub struct MimoBuffer {
    shm: Box<dyn SharedMemoryBackend>,
    header: *mut BufferHeader,
    empty: TokenQueue,
    filled: TokenQueue,
    name: String,
    data_dtype: StructuredDtype,
    data_length: usize,
    stats: Mutex<StatsWindow>,
    owner: bool,
}

// All shared state is atomic or guarded by the token protocol; the local
// stats window has its own mutex.
unsafe impl Send for MimoBuffer {}
unsafe impl Sync for MimoBuffer {}

impl MimoBuffer {
    /// Create a new named buffer segment.
    ///
    /// Fails with [`BufferError::Config`] on rejected parameters and
    /// [`BufferError::SharedMemory`] if the OS refuses the mapping or the
    /// name is already taken on this host.
    pub(crate) fn create(
        name: &str,
        slot_count: usize,
        data_length: usize,
        data_dtype: StructuredDtype,
        overwrite: bool,
    ) -> Result<Self> {
        if name.is_empty() || name.contains('/') || name.contains('\0') {
            return Err(BufferError::Config(format!("unusable buffer name {name:?}")));
        }
        if slot_count == 0 {
            return Err(BufferError::Config("slot_count must be at least 1".into()));
        }
        if data_length == 0 {
            return Err(BufferError::Config("data_length must be at least 1".into()));
        }

        let data_bytes = data_length
            .checked_mul(data_dtype.size())
            .ok_or_else(|| BufferError::Config("data array size overflows".into()))?;
        let slot_bytes = data_bytes + METADATA_BYTES;
        slot_count.checked_mul(slot_bytes).ok_or_else(|| {
            BufferError::Config(format!(
                "MimoBuffer::create(): slot pool size overflows.\n\
                ├─ slot_count: {slot_count}\n\
                ├─ slot_bytes: {slot_bytes}\n\
                ╰─ Expected: slot_count * slot_bytes to fit in usize"
            ))
        })?;

        let layout = segment_layout(slot_count, slot_bytes);
        let shm = create_shared_memory(layout.total_size, &segment_name(name))?;

        // Get a properly aligned pointer to the header
        let header = shm.as_ptr() as *mut BufferHeader;
        if (header as usize) % 128 != 0 {
            return Err(BufferError::SharedMemory(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Shared memory not properly aligned",
            )));
        }

        let queue_capacity = layout.queue_capacity as u64;
        let queue_header = |slots_offset: usize| QueueHeader {
            capacity: queue_capacity,
            mask: queue_capacity - 1,
            slots_offset: slots_offset as u64,
            epoch: AtomicU32::new(0),
            _pad: 0,
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
        };

        // Initialize global header
        unsafe {
            std::ptr::write(
                header,
                BufferHeader {
                    magic: MAGIC_NUMBER,
                    version: LAYOUT_VERSION,
                    overwrite: overwrite as u32,
                    slot_count: slot_count as u64,
                    data_length: data_length as u64,
                    data_bytes: data_bytes as u64,
                    slot_bytes: slot_bytes as u64,
                    dtype_checksum: data_dtype.checksum(),
                    data_offset: layout.data_offset as u64,
                    trash_offset: layout.trash_offset as u64,
                    event_count: CachePadded::new(AtomicU64::new(0)),
                    overwrite_count: CachePadded::new(AtomicU64::new(0)),
                    paused_count: AtomicU64::new(0),
                    total_deadtime_bits: AtomicU64::new(0),
                    paused: AtomicU32::new(0),
                    flush_sent: AtomicU32::new(0),
                    flush_received: AtomicU32::new(0),
                    _pad: 0,
                    empty: queue_header(layout.empty_slots_offset),
                    filled: queue_header(layout.filled_slots_offset),
                },
            );
        }

        let (empty, filled) = unsafe { Self::queues(shm.as_ptr(), header) };
        unsafe {
            empty.init_slots();
            filled.init_slots();
        }

        // Every slot starts out writable
        for index in 0..slot_count {
            empty.push(index as u64);
        }

        log::info!("buffer {name}: created with {slot_count} slots of {slot_bytes} bytes");

        Ok(Self {
            shm,
            header,
            empty,
            filled,
            name: name.to_string(),
            data_dtype,
            data_length,
            stats: Mutex::new(StatsWindow {
                last_time: Instant::now(),
                last_event_count: 0,
                last_deadtime: 0.0,
            }),
            owner: true,
        })
    }

    /// Attach to an existing named buffer segment.
    ///
    /// Geometry (slot count, data length, overwrite policy) is read from the
    /// segment header; the supplied dtype is validated against the header's
    /// checksum so a mismatched record layout is rejected up front.
    pub(crate) fn attach(name: &str, data_dtype: StructuredDtype) -> Result<Self> {
        let shm = attach_shared_memory(&segment_name(name), size_of::<BufferHeader>())?;

        let header = shm.as_ptr() as *mut BufferHeader;
        if (header as usize) % 128 != 0 {
            return Err(BufferError::SharedMemory(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Shared memory not properly aligned",
            )));
        }

        // Validate before touching anything beyond the header
        let (slot_count, slot_bytes, data_length) = unsafe {
            let h = &*header;
            if h.magic != MAGIC_NUMBER {
                return Err(BufferError::Incompatible(format!(
                    "segment {name:?} has magic {:#x}, expected {MAGIC_NUMBER:#x}",
                    h.magic
                )));
            }
            if h.version != LAYOUT_VERSION {
                return Err(BufferError::Incompatible(format!(
                    "segment {name:?} has layout version {}, expected {LAYOUT_VERSION}",
                    h.version
                )));
            }
            if h.dtype_checksum != data_dtype.checksum() {
                return Err(BufferError::Incompatible(format!(
                    "segment {name:?} was created with a different data dtype"
                )));
            }
            if h.data_bytes != h.data_length * data_dtype.size() as u64 {
                return Err(BufferError::Incompatible(format!(
                    "segment {name:?}: data band is {} bytes, dtype says {}",
                    h.data_bytes,
                    h.data_length * data_dtype.size() as u64
                )));
            }
            (h.slot_count as usize, h.slot_bytes as usize, h.data_length as usize)
        };

        let layout = segment_layout(slot_count, slot_bytes);
        if shm.size() < layout.total_size {
            return Err(BufferError::Incompatible(format!(
                "segment {name:?} is {} bytes, layout needs {}",
                shm.size(),
                layout.total_size
            )));
        }

        let (empty, filled) = unsafe { Self::queues(shm.as_ptr(), header) };

        log::info!("buffer {name}: attached ({slot_count} slots of {slot_bytes} bytes)");

        Ok(Self {
            shm,
            header,
            empty,
            filled,
            name: name.to_string(),
            data_dtype,
            data_length,
            stats: Mutex::new(StatsWindow {
                last_time: Instant::now(),
                last_event_count: 0,
                last_deadtime: 0.0,
            }),
            owner: false,
        })
    }

    /// Build the queue views over an initialized header.
    unsafe fn queues(base: *mut u8, header: *mut BufferHeader) -> (TokenQueue, TokenQueue) {
        let empty = TokenQueue::new(
            &(*header).empty as *const QueueHeader,
            base.add((*header).empty.slots_offset as usize) as *mut QueueSlot,
        );
        let filled = TokenQueue::new(
            &(*header).filled as *const QueueHeader,
            base.add((*header).filled.slots_offset as usize) as *mut QueueSlot,
        );
        (empty, filled)
    }

    #[inline]
    fn header(&self) -> &BufferHeader {
        unsafe { &*self.header }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_count(&self) -> usize {
        self.header().slot_count as usize
    }

    pub fn data_length(&self) -> usize {
        self.data_length
    }

    pub fn data_dtype(&self) -> &StructuredDtype {
        &self.data_dtype
    }

    pub fn overwrite(&self) -> bool {
        self.header().overwrite != 0
    }

    pub fn flush_received(&self) -> bool {
        self.header().flush_received.load(Acquire) != 0
    }

    pub fn is_paused(&self) -> bool {
        self.header().paused.load(Acquire) != 0
    }

    /// Tokens currently in the filled queue (racy; stats only).
    pub fn filled_count(&self) -> usize {
        self.filled.len()
    }

    /// Tokens currently in the empty queue (racy; stats only).
    pub fn empty_count(&self) -> usize {
        self.empty.len()
    }

    fn flush_sent(&self) -> bool {
        self.header().flush_sent.load(Acquire) != 0
    }

    /// Validate a raw token against the slot pool. A token outside the pool
    /// was never issued by this buffer; that is unrecoverable corruption.
    fn check_index(&self, raw: u64) -> u32 {
        let slot_count = self.header().slot_count;
        assert!(
            raw < slot_count,
            "token {raw} was never issued by buffer {:?} ({slot_count} slots)",
            self.name
        );
        raw as u32
    }

    /// Take ownership of a slot for writing: metadata starts zeroed so the
    /// buffer-assigned defaults on release are well defined.
    fn claim_write_slot(&self, raw: u64) -> WriteToken {
        let index = self.check_index(raw);
        unsafe { MetadataViewMut::new(self.meta_ptr(Some(index))) }.set(Metadata::default());
        WriteToken::Slot(index)
    }

    /// Get a token to write data to the buffer.
    ///
    /// Handles the overwrite policy: with `overwrite` enabled and no empty
    /// slot available, the oldest filled slot is reclaimed instead of
    /// blocking. Returns `None` once a flush event has been sent, including
    /// for callers that were blocked on the empty queue when it happened.
    /// While the buffer is paused, returns the trash token and the write is
    /// discarded on release.
    pub fn get_write_token(&self) -> Option<WriteToken> {
        if self.flush_sent() {
            return None;
        }
        if self.is_paused() {
            return Some(WriteToken::Trash);
        }

        if let Some(raw) = self.empty.pop() {
            return Some(self.claim_write_slot(raw));
        }

        if self.overwrite() {
            // No empty slot; reclaim the oldest filled slot rather than wait.
            // A reader racing for the same token simply wins and we fall
            // through to the empty queue.
            match self.filled.pop() {
                Some(raw) if raw != FLUSH_TOKEN => {
                    self.header().overwrite_count.fetch_add(1, Relaxed);
                    return Some(self.claim_write_slot(raw));
                }
                Some(_) => {
                    // never reclaim the flush sentinel
                    self.filled.push(FLUSH_TOKEN);
                }
                None => {}
            }
        }

        // Every slot is checked out by some session; wait for a reader to
        // free one. Flush wakes this wait and turns it into a shutdown.
        let raw = self.empty.pop_blocking(|| self.flush_sent())?;
        Some(self.claim_write_slot(raw))
    }

    /// Return a token to which data has been written.
    ///
    /// Stamps the metadata counter and timestamp unless the writer set them,
    /// accumulates deadtime, and publishes the slot to readers. A trash token
    /// only bumps `paused_count`.
    pub fn return_write_token(&self, token: WriteToken) {
        let index = match token {
            WriteToken::Trash => {
                self.header().paused_count.fetch_add(1, Relaxed);
                return;
            }
            WriteToken::Slot(index) => self.check_index(index as u64),
        };

        let count = self.header().event_count.fetch_add(1, AcqRel) + 1;

        let mut view = unsafe { MetadataViewMut::new(self.meta_ptr(Some(index))) };
        let mut metadata = view.get();
        if metadata.counter == 0 {
            metadata.counter = count;
        }
        if metadata.timestamp_ns == 0 {
            metadata.timestamp_ns = now_ns();
        }
        view.set(metadata);
        self.add_deadtime(metadata.deadtime);

        self.filled.push(index as u64);
    }

    /// Get a token to read data from the buffer, waiting for one if none is
    /// filled yet.
    ///
    /// Returns `None` on the flush sentinel after re-broadcasting it, so
    /// every peer reader on this buffer observes the shutdown too.
    pub fn get_read_token(&self) -> Option<u32> {
        let raw = self.filled.pop_blocking(|| false)?;
        match Token::from_raw(raw) {
            Token::Flush => {
                self.header().flush_received.store(1, Release);
                self.filled.push(FLUSH_TOKEN);
                None
            }
            Token::Slot(_) => Some(self.check_index(raw)),
        }
    }

    /// Return a read token to the ring buffer.
    pub fn return_read_token(&self, index: u32) {
        let index = self.check_index(index as u64);
        self.empty.push(index as u64);
    }

    /// Get a token to observe data from the buffer.
    ///
    /// Never blocks: returns `None` when nothing is filled right now, and on
    /// the flush sentinel (which is put straight back).
    pub fn get_observe_token(&self) -> Option<u32> {
        match self.filled.pop() {
            Some(FLUSH_TOKEN) => {
                self.filled.push(FLUSH_TOKEN);
                None
            }
            Some(raw) => Some(self.check_index(raw)),
            None => None,
        }
    }

    /// Return an observe token: the slot goes back to the filled queue, still
    /// holding its record, for a real reader to consume.
    pub fn return_observe_token(&self, index: u32) {
        let index = self.check_index(index as u64);
        self.filled.push(index as u64);
    }

    /// Send a flush event to the buffer.
    ///
    /// Idempotent: the first call enqueues one sentinel into the filled
    /// queue; later calls change nothing. Every session blocked on this
    /// buffer is woken and returns "no token" in bounded time.
    pub fn send_flush_event(&self) {
        if self.header().flush_sent.swap(1, AcqRel) == 0 {
            log::debug!("buffer {}: flush event sent", self.name);
            self.filled.push(FLUSH_TOKEN);
        }
        // Writers parked on the empty queue see no sentinel; wake them so
        // they observe the flush flag.
        self.empty.wake_all();
    }

    /// Pause the buffer: write sessions are served the trash slot and their
    /// records are discarded until `resume`.
    pub fn pause(&self) {
        self.header().paused.store(1, Release);
        log::debug!("buffer {}: paused", self.name);
    }

    /// Resume normal writing after a `pause`.
    pub fn resume(&self) {
        self.header().paused.store(0, Release);
        log::debug!("buffer {}: resumed", self.name);
    }

    /// Retrieve statistics about the buffer's usage.
    ///
    /// Rate and average deadtime cover the window since the previous call on
    /// this handle. Fields are read without a global lock; the snapshot is
    /// best-effort consistent.
    pub fn get_stats(&self) -> BufferStats {
        let header = self.header();
        let now = Instant::now();
        let event_count = header.event_count.load(Relaxed);
        let total_deadtime = f64::from_bits(header.total_deadtime_bits.load(Relaxed));

        let mut window = self.stats.lock();
        let time_delta_s = now.duration_since(window.last_time).as_secs_f64();
        let events = event_count.saturating_sub(window.last_event_count);
        let rate_hz = if time_delta_s > 0.0 {
            events as f64 / time_delta_s
        } else {
            0.0
        };
        let average_deadtime = if events > 0 {
            (total_deadtime - window.last_deadtime) / events as f64
        } else {
            0.0
        };
        window.last_time = now;
        window.last_event_count = event_count;
        window.last_deadtime = total_deadtime;
        drop(window);

        BufferStats {
            event_count,
            overwrite_count: header.overwrite_count.load(Relaxed),
            filled_count: self.filled.len(),
            empty_count: self.empty.len(),
            flush_received: self.flush_received(),
            paused: self.is_paused(),
            paused_count: header.paused_count.load(Relaxed),
            rate_hz,
            time_delta_s,
            average_deadtime,
        }
    }

    /// Start of a slot's data array. `None` addresses the trash slot.
    fn data_ptr(&self, slot: Option<u32>) -> *mut u8 {
        let header = self.header();
        let offset = match slot {
            Some(index) => {
                header.data_offset as usize + index as usize * header.slot_bytes as usize
            }
            None => header.trash_offset as usize,
        };
        unsafe { self.shm.as_ptr().add(offset) }
    }

    /// Start of a slot's metadata record.
    fn meta_ptr(&self, slot: Option<u32>) -> *mut u8 {
        unsafe { self.data_ptr(slot).add(self.header().data_bytes as usize) }
    }

    /// In-place read view of a slot's data array.
    ///
    /// # Safety
    /// The caller must hold the token for `slot` in a read or observe
    /// session for the lifetime of the view.
    pub(crate) unsafe fn data_view(&self, slot: Option<u32>) -> DataView<'_> {
        DataView::new(self.data_ptr(slot), &self.data_dtype, self.data_length)
    }

    /// In-place write view of a slot's data array.
    ///
    /// # Safety
    /// The caller must hold the write token for `slot` for the lifetime of
    /// the view; nothing else may access the slot meanwhile.
    pub(crate) unsafe fn data_view_mut(&self, slot: Option<u32>) -> DataViewMut<'_> {
        DataViewMut::new(self.data_ptr(slot), &self.data_dtype, self.data_length)
    }

    /// In-place read view of a slot's metadata record.
    ///
    /// # Safety
    /// Same contract as [`Self::data_view`].
    pub(crate) unsafe fn metadata_view(&self, slot: Option<u32>) -> MetadataView<'_> {
        MetadataView::new(self.meta_ptr(slot))
    }

    /// In-place write view of a slot's metadata record.
    ///
    /// # Safety
    /// Same contract as [`Self::data_view_mut`].
    pub(crate) unsafe fn metadata_view_mut(&self, slot: Option<u32>) -> MetadataViewMut<'_> {
        MetadataViewMut::new(self.meta_ptr(slot))
    }

    fn add_deadtime(&self, deadtime: f64) {
        if deadtime == 0.0 {
            return;
        }
        let cell = &self.header().total_deadtime_bits;
        let mut current = cell.load(Relaxed);
        loop {
            let next = (f64::from_bits(current) + deadtime).to_bits();
            match cell.compare_exchange_weak(current, next, AcqRel, Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Drop for MimoBuffer {
    fn drop(&mut self) {
        if self.owner {
            log::info!("buffer {}: shut down", self.name);
        }
        // The owning backend unlinks the segment name when it drops.
    }
}

fn segment_name(name: &str) -> String {
    format!("mimo_{name}")
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
