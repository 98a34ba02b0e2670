//! Runtime binding to the system's liburing.
//!
//! Ring control comes from the symbols every liburing 2.x build exports.
//! The `io_uring_prep_*` helpers are `static inline` in the regular build and
//! only exported by `liburing-ffi`; each one that is found replaces the
//! built-in routine, the rest keep the trait defaults.

use std::fmt;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

use libloading::Library;
use tracing::{debug, trace};

use crate::abi::{Cqe, KernelTimespec, Params, Sqe, IORING_SETUP_CLAMP, IORING_SETUP_CQSIZE};
use crate::config::RingConfig;
use crate::error::{ReactorError, Result};
use crate::ring::SlotHandle;

use super::{Backend, BackendKind};

/// `struct io_uring_sq` from liburing 2.x.
#[repr(C)]
#[allow(dead_code)]
struct UringSq {
    khead: *mut u32,
    ktail: *mut u32,
    kring_mask: *mut u32,
    kring_entries: *mut u32,
    kflags: *mut u32,
    kdropped: *mut u32,
    array: *mut u32,
    sqes: *mut Sqe,
    sqe_head: u32,
    sqe_tail: u32,
    ring_sz: usize,
    ring_ptr: *mut libc::c_void,
    ring_mask: u32,
    ring_entries: u32,
    pad: [u32; 2],
}

/// `struct io_uring_cq` from liburing 2.x.
#[repr(C)]
#[allow(dead_code)]
struct UringCq {
    khead: *mut u32,
    ktail: *mut u32,
    kring_mask: *mut u32,
    kring_entries: *mut u32,
    kflags: *mut u32,
    koverflow: *mut u32,
    cqes: *mut Cqe,
    ring_sz: usize,
    ring_ptr: *mut libc::c_void,
    ring_mask: u32,
    ring_entries: u32,
    pad: [u32; 2],
}

/// `struct io_uring`, filled in by `io_uring_queue_init_params`.
#[repr(C)]
#[allow(dead_code)]
struct Uring {
    sq: UringSq,
    cq: UringCq,
    flags: u32,
    ring_fd: i32,
    features: u32,
    enter_ring_fd: i32,
    int_flags: u8,
    pad: [u8; 3],
    pad2: u32,
}

impl Uring {
    fn zeroed() -> Box<Self> {
        // SAFETY: all fields are integers or raw pointers; all-zero is the
        // state liburing expects before initialization.
        Box::new(unsafe { std::mem::zeroed() })
    }
}

type QueueInitParams = unsafe extern "C" fn(u32, *mut Uring, *mut Params) -> i32;
type QueueExit = unsafe extern "C" fn(*mut Uring);
type GetSqe = unsafe extern "C" fn(*mut Uring) -> *mut Sqe;
type Submit = unsafe extern "C" fn(*mut Uring) -> i32;
type SubmitAndWait = unsafe extern "C" fn(*mut Uring, u32) -> i32;
type PeekBatchCqe = unsafe extern "C" fn(*mut Uring, *mut *mut Cqe, u32) -> u32;
type CqAdvance = unsafe extern "C" fn(*mut Uring, u32);

/// Ring-control entry points. All of them must be present.
#[derive(Clone, Copy)]
struct RingFns {
    queue_init_params: QueueInitParams,
    queue_exit: QueueExit,
    get_sqe: GetSqe,
    submit: Submit,
    submit_and_wait: SubmitAndWait,
    peek_batch_cqe: PeekBatchCqe,
}

/// Exported preparation helpers, each optional.
#[derive(Clone, Copy, Default)]
struct PrepFns {
    nop: Option<unsafe extern "C" fn(*mut Sqe)>,
    accept: Option<unsafe extern "C" fn(*mut Sqe, i32, *mut libc::sockaddr, *mut libc::socklen_t, i32)>,
    connect: Option<unsafe extern "C" fn(*mut Sqe, i32, *const libc::sockaddr, libc::socklen_t)>,
    send: Option<unsafe extern "C" fn(*mut Sqe, i32, *const libc::c_void, usize, i32)>,
    recv: Option<unsafe extern "C" fn(*mut Sqe, i32, *mut libc::c_void, usize, i32)>,
    sendmsg: Option<unsafe extern "C" fn(*mut Sqe, i32, *const libc::msghdr, u32)>,
    recvmsg: Option<unsafe extern "C" fn(*mut Sqe, i32, *mut libc::msghdr, u32)>,
    close: Option<unsafe extern "C" fn(*mut Sqe, i32)>,
    read: Option<unsafe extern "C" fn(*mut Sqe, i32, *mut libc::c_void, u32, u64)>,
    write: Option<unsafe extern "C" fn(*mut Sqe, i32, *const libc::c_void, u32, u64)>,
    writev: Option<unsafe extern "C" fn(*mut Sqe, i32, *const libc::iovec, u32, u64)>,
    poll_add: Option<unsafe extern "C" fn(*mut Sqe, i32, u32)>,
    poll_remove: Option<unsafe extern "C" fn(*mut Sqe, u64)>,
    cancel: Option<unsafe extern "C" fn(*mut Sqe, u64, i32)>,
    timeout: Option<unsafe extern "C" fn(*mut Sqe, *const KernelTimespec, u32, u32)>,
    timeout_remove: Option<unsafe extern "C" fn(*mut Sqe, u64, u32)>,
    timeout_update: Option<unsafe extern "C" fn(*mut Sqe, *const KernelTimespec, u64, u32)>,
    openat: Option<unsafe extern "C" fn(*mut Sqe, i32, *const libc::c_char, i32, libc::mode_t)>,
    cq_advance: Option<CqAdvance>,
}

impl PrepFns {
    fn count(&self) -> usize {
        [
            self.nop.is_some(),
            self.accept.is_some(),
            self.connect.is_some(),
            self.send.is_some(),
            self.recv.is_some(),
            self.sendmsg.is_some(),
            self.recvmsg.is_some(),
            self.close.is_some(),
            self.read.is_some(),
            self.write.is_some(),
            self.writev.is_some(),
            self.poll_add.is_some(),
            self.poll_remove.is_some(),
            self.cancel.is_some(),
            self.timeout.is_some(),
            self.timeout_remove.is_some(),
            self.timeout_update.is_some(),
            self.openat.is_some(),
        ]
        .iter()
        .filter(|found| **found)
        .count()
    }
}

/// A loaded liburing with its ring-control symbols resolved.
pub struct NativeLibrary {
    name: String,
    ring: RingFns,
    prep: PrepFns,
    // Last field: function pointers above must not outlive the library.
    library: Library,
}

impl NativeLibrary {
    /// Load the first library in `names` that can be opened and resolve its
    /// symbols.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Unsupported`] when no name can be loaded (or the list
    /// is empty) and [`ReactorError::MissingSymbol`] when a library loads but
    /// lacks a ring-control entry point.
    pub fn open<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut failures = Vec::new();
        for name in names {
            let name = name.as_ref();
            // SAFETY: liburing has no initialization side effects beyond
            // symbol relocation.
            match unsafe { Library::new(name) } {
                Ok(library) => return Self::bind(name.to_owned(), library),
                Err(e) => {
                    trace!(library = name, error = %e, "native helper not loadable");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }
        Err(ReactorError::Unsupported(if failures.is_empty() {
            "no native helper library configured".to_owned()
        } else {
            format!("native helper not found ({})", failures.join("; "))
        }))
    }

    fn bind(name: String, library: Library) -> Result<Self> {
        // SAFETY: every type alias above matches the liburing 2.x prototype
        // of the symbol it is looked up for.
        let (ring, prep) = unsafe {
            let ring = RingFns {
                queue_init_params: required(&library, &name, "io_uring_queue_init_params")?,
                queue_exit: required(&library, &name, "io_uring_queue_exit")?,
                get_sqe: required(&library, &name, "io_uring_get_sqe")?,
                submit: required(&library, &name, "io_uring_submit")?,
                submit_and_wait: required(&library, &name, "io_uring_submit_and_wait")?,
                peek_batch_cqe: required(&library, &name, "io_uring_peek_batch_cqe")?,
            };
            let prep = PrepFns {
                nop: optional(&library, "io_uring_prep_nop"),
                accept: optional(&library, "io_uring_prep_accept"),
                connect: optional(&library, "io_uring_prep_connect"),
                send: optional(&library, "io_uring_prep_send"),
                recv: optional(&library, "io_uring_prep_recv"),
                sendmsg: optional(&library, "io_uring_prep_sendmsg"),
                recvmsg: optional(&library, "io_uring_prep_recvmsg"),
                close: optional(&library, "io_uring_prep_close"),
                read: optional(&library, "io_uring_prep_read"),
                write: optional(&library, "io_uring_prep_write"),
                writev: optional(&library, "io_uring_prep_writev"),
                poll_add: optional(&library, "io_uring_prep_poll_add"),
                poll_remove: optional(&library, "io_uring_prep_poll_remove"),
                cancel: optional(&library, "io_uring_prep_cancel64"),
                timeout: optional(&library, "io_uring_prep_timeout"),
                timeout_remove: optional(&library, "io_uring_prep_timeout_remove"),
                timeout_update: optional(&library, "io_uring_prep_timeout_update"),
                openat: optional(&library, "io_uring_prep_openat"),
                cq_advance: optional(&library, "io_uring_cq_advance"),
            };
            (ring, prep)
        };

        debug!(
            library = %name,
            prep_symbols = prep.count(),
            "bound native helper"
        );

        Ok(Self {
            name,
            ring,
            prep,
            library,
        })
    }

    /// File name the library was loaded from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of preparation helpers the library exports.
    pub fn exported_prep_count(&self) -> usize {
        self.prep.count()
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("prep_symbols", &self.prep.count())
            .field("library", &self.library)
            .finish()
    }
}

unsafe fn required<T: Copy>(library: &Library, name: &str, symbol: &str) -> Result<T> {
    let mut cname = symbol.as_bytes().to_vec();
    cname.push(0);
    // SAFETY: the caller guarantees `T` matches the symbol's type.
    match unsafe { library.get::<T>(&cname) } {
        Ok(found) => Ok(*found),
        Err(_) => Err(ReactorError::MissingSymbol {
            symbol: symbol.to_owned(),
            library: name.to_owned(),
        }),
    }
}

unsafe fn optional<T: Copy>(library: &Library, symbol: &str) -> Option<T> {
    let mut cname = symbol.as_bytes().to_vec();
    cname.push(0);
    // SAFETY: the caller guarantees `T` matches the symbol's type.
    unsafe { library.get::<T>(&cname) }.ok().map(|found| *found)
}

/// Backend driving a ring through liburing.
pub struct NativeBackend {
    ring: NonNull<Uring>,
    // Dropped after the ring has been torn down in `Drop`.
    library: NativeLibrary,
}

// SAFETY: the ring is owned exclusively by this value and liburing keeps no
// thread-local state for it.
unsafe impl Send for NativeBackend {}

impl NativeBackend {
    /// Initialize a ring of `config.entries` slots through the library.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Setup`] with the errno reported by
    /// `io_uring_queue_init_params`.
    pub fn new(library: NativeLibrary, config: &RingConfig) -> Result<Self> {
        let mut params = Params::default();
        if config.cq_entries != 0 {
            params.flags |= IORING_SETUP_CQSIZE;
            params.cq_entries = config.cq_entries;
        }
        if config.clamp {
            params.flags |= IORING_SETUP_CLAMP;
        }

        let ring = Box::into_raw(Uring::zeroed());
        // SAFETY: ring points at zeroed, writable storage of the right layout.
        let ret = unsafe { (library.ring.queue_init_params)(config.entries, ring, &mut params) };
        if ret < 0 {
            // SAFETY: allocated above and not initialized by the library.
            drop(unsafe { Box::from_raw(ring) });
            return Err(ReactorError::Setup(io::Error::from_raw_os_error(-ret)));
        }
        // SAFETY: Box::into_raw never returns null.
        let ring = unsafe { NonNull::new_unchecked(ring) };

        debug!(
            library = library.name(),
            sq_entries = params.sq_entries,
            cq_entries = params.cq_entries,
            features = params.features,
            "initialized io_uring through native helper"
        );

        Ok(Self { ring, library })
    }

    /// The bound library.
    pub fn library(&self) -> &NativeLibrary {
        &self.library
    }

    #[inline]
    fn raw(&self) -> *mut Uring {
        self.ring.as_ptr()
    }

    #[inline]
    fn uring(&self) -> &Uring {
        // SAFETY: initialized in `new` and alive until drop.
        unsafe { self.ring.as_ref() }
    }

    #[inline]
    fn load(ptr: *mut u32, order: Ordering) -> u32 {
        // SAFETY: points into the ring mapping owned by liburing.
        unsafe { AtomicU32::from_ptr(ptr) }.load(order)
    }
}

impl fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBackend")
            .field("library", &self.library.name)
            .field("sq_entries", &self.sq_entries())
            .field("cq_entries", &self.cq_entries())
            .finish()
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        // SAFETY: the ring was initialized in `new` and is torn down exactly
        // once, before the library is unloaded.
        unsafe {
            (self.library.ring.queue_exit)(self.raw());
            drop(Box::from_raw(self.raw()));
        }
    }
}

impl Backend for NativeBackend {
    fn name(&self) -> &'static str {
        "liburing"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn sq_entries(&self) -> u32 {
        // SAFETY: set by liburing to a pointer into the SQ mapping.
        unsafe { *self.uring().sq.kring_entries }
    }

    fn cq_entries(&self) -> u32 {
        // SAFETY: set by liburing to a pointer into the CQ mapping.
        unsafe { *self.uring().cq.kring_entries }
    }

    fn space_left(&self) -> u32 {
        let sq = &self.uring().sq;
        let head = Self::load(sq.khead, Ordering::Acquire);
        self.sq_entries() - sq.sqe_tail.wrapping_sub(head)
    }

    fn acquire_slot(&mut self) -> Result<SlotHandle> {
        // SAFETY: ring initialized; single producer through &mut self.
        let sqe = unsafe { (self.library.ring.get_sqe)(self.raw()) };
        let sqe = NonNull::new(sqe).ok_or(ReactorError::Full)?;
        // SAFETY: liburing hands out an unpublished slot of the live ring.
        let mut slot = unsafe { SlotHandle::from_raw(sqe) };
        // SAFETY: just acquired, not yet published.
        unsafe { slot.sqe_mut() }.clear();
        Ok(slot)
    }

    fn submit(&mut self, wait_nr: u32) -> io::Result<u32> {
        // SAFETY: ring initialized; single producer through &mut self.
        let ret = unsafe {
            if wait_nr == 0 {
                (self.library.ring.submit)(self.raw())
            } else {
                (self.library.ring.submit_and_wait)(self.raw(), wait_nr)
            }
        };
        if ret < 0 {
            return Err(io::Error::from_raw_os_error(-ret));
        }
        Ok(ret as u32)
    }

    fn ready(&self) -> u32 {
        let cq = &self.uring().cq;
        let tail = Self::load(cq.ktail, Ordering::Acquire);
        tail.wrapping_sub(Self::load(cq.khead, Ordering::Relaxed))
    }

    fn drain(&mut self, max: usize, out: &mut Vec<Cqe>) -> usize {
        let want = max.min(self.cq_entries() as usize) as u32;
        if want == 0 {
            return 0;
        }
        let mut batch: Vec<*mut Cqe> = vec![ptr::null_mut(); want as usize];
        // SAFETY: batch has room for `want` pointers.
        let count = unsafe { (self.library.ring.peek_batch_cqe)(self.raw(), batch.as_mut_ptr(), want) };
        out.reserve(count as usize);
        for &cqe in &batch[..count as usize] {
            // SAFETY: liburing returned pointers to published, unconsumed
            // entries.
            out.push(unsafe { cqe.read() });
        }
        if count > 0 {
            match self.library.prep.cq_advance {
                // SAFETY: `count` entries were peeked above.
                Some(advance) => unsafe { advance(self.raw(), count) },
                None => {
                    let khead = self.uring().cq.khead;
                    let head = Self::load(khead, Ordering::Relaxed);
                    // SAFETY: points into the CQ mapping; Release orders the
                    // copies above before the kernel reuses the slots.
                    unsafe { AtomicU32::from_ptr(khead) }.store(head.wrapping_add(count), Ordering::Release);
                }
            }
        }
        count as usize
    }

    fn prep_nop(&self, sqe: &mut Sqe) {
        match self.library.prep.nop {
            // SAFETY: sqe is a valid entry; prototype matches.
            Some(f) => unsafe { f(sqe) },
            None => super::builtin::prep_nop(sqe),
        }
    }

    fn prep_accept(
        &self,
        sqe: &mut Sqe,
        fd: i32,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        flags: i32,
    ) {
        match self.library.prep.accept {
            // SAFETY: as above; pointers are only stored.
            Some(f) => unsafe { f(sqe, fd, addr, addrlen, flags) },
            None => super::builtin::prep_accept(sqe, fd, addr, addrlen, flags),
        }
    }

    fn prep_connect(&self, sqe: &mut Sqe, fd: i32, addr: *const libc::sockaddr, addrlen: libc::socklen_t) {
        match self.library.prep.connect {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd, addr, addrlen) },
            None => super::builtin::prep_connect(sqe, fd, addr, addrlen),
        }
    }

    fn prep_send(&self, sqe: &mut Sqe, fd: i32, buf: *const u8, len: usize, flags: i32) {
        match self.library.prep.send {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd, buf.cast(), len, flags) },
            None => super::builtin::prep_send(sqe, fd, buf, len, flags),
        }
    }

    fn prep_recv(&self, sqe: &mut Sqe, fd: i32, buf: *mut u8, len: usize, flags: i32) {
        match self.library.prep.recv {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd, buf.cast(), len, flags) },
            None => super::builtin::prep_recv(sqe, fd, buf, len, flags),
        }
    }

    fn prep_sendmsg(&self, sqe: &mut Sqe, fd: i32, msg: *const libc::msghdr, flags: u32) {
        match self.library.prep.sendmsg {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd, msg, flags) },
            None => super::builtin::prep_sendmsg(sqe, fd, msg, flags),
        }
    }

    fn prep_recvmsg(&self, sqe: &mut Sqe, fd: i32, msg: *mut libc::msghdr, flags: u32) {
        match self.library.prep.recvmsg {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd, msg, flags) },
            None => super::builtin::prep_recvmsg(sqe, fd, msg, flags),
        }
    }

    fn prep_close(&self, sqe: &mut Sqe, fd: i32) {
        match self.library.prep.close {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd) },
            None => super::builtin::prep_close(sqe, fd),
        }
    }

    fn prep_read(&self, sqe: &mut Sqe, fd: i32, buf: *mut u8, nbytes: u32, offset: u64) {
        match self.library.prep.read {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd, buf.cast(), nbytes, offset) },
            None => super::builtin::prep_read(sqe, fd, buf, nbytes, offset),
        }
    }

    fn prep_write(&self, sqe: &mut Sqe, fd: i32, buf: *const u8, nbytes: u32, offset: u64) {
        match self.library.prep.write {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd, buf.cast(), nbytes, offset) },
            None => super::builtin::prep_write(sqe, fd, buf, nbytes, offset),
        }
    }

    fn prep_writev(&self, sqe: &mut Sqe, fd: i32, iovecs: *const libc::iovec, nr_vecs: u32, offset: u64) {
        match self.library.prep.writev {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, fd, iovecs, nr_vecs, offset) },
            None => super::builtin::prep_writev(sqe, fd, iovecs, nr_vecs, offset),
        }
    }

    fn prep_poll_add(&self, sqe: &mut Sqe, fd: i32, mask: u32) {
        match self.library.prep.poll_add {
            // SAFETY: as above. liburing applies the wire byte order itself.
            Some(f) => unsafe { f(sqe, fd, mask) },
            None => super::builtin::prep_poll_add(sqe, fd, mask),
        }
    }

    fn prep_poll_remove(&self, sqe: &mut Sqe, user_data: u64) {
        match self.library.prep.poll_remove {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, user_data) },
            None => super::builtin::prep_poll_remove(sqe, user_data),
        }
    }

    fn prep_cancel(&self, sqe: &mut Sqe, user_data: u64, flags: i32) {
        match self.library.prep.cancel {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, user_data, flags) },
            None => super::builtin::prep_cancel(sqe, user_data, flags),
        }
    }

    fn prep_timeout(&self, sqe: &mut Sqe, ts: *const KernelTimespec, count: u32, flags: u32) {
        match self.library.prep.timeout {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, ts, count, flags) },
            None => super::builtin::prep_timeout(sqe, ts, count, flags),
        }
    }

    fn prep_timeout_remove(&self, sqe: &mut Sqe, user_data: u64, flags: u32) {
        match self.library.prep.timeout_remove {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, user_data, flags) },
            None => super::builtin::prep_timeout_remove(sqe, user_data, flags),
        }
    }

    fn prep_timeout_update(&self, sqe: &mut Sqe, ts: *const KernelTimespec, user_data: u64, flags: u32) {
        match self.library.prep.timeout_update {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, ts, user_data, flags) },
            None => super::builtin::prep_timeout_update(sqe, ts, user_data, flags),
        }
    }

    fn prep_openat(&self, sqe: &mut Sqe, dfd: i32, path: *const libc::c_char, flags: i32, mode: u32) {
        match self.library.prep.openat {
            // SAFETY: as above.
            Some(f) => unsafe { f(sqe, dfd, path, flags, mode as libc::mode_t) },
            None => super::builtin::prep_openat(sqe, dfd, path, flags, mode),
        }
    }
}
