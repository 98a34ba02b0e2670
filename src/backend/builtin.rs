//! Built-in operation preparation routines.
//!
//! These write submission entries directly through the ABI accessors and
//! produce the same bytes as liburing's `io_uring_prep_*` helpers. They back
//! the fallback backend entirely and fill in for any preparation symbol the
//! native library does not export.

use crate::abi::{
    opcode, poll_mask_to_wire, KernelTimespec, Sqe, IORING_TIMEOUT_UPDATE,
};

#[inline]
fn addr_of<T>(ptr: *const T) -> u64 {
    ptr as usize as u64
}

/// Zero the entry and fill the fields shared by every opcode.
#[inline]
pub fn prep_rw(op: u8, sqe: &mut Sqe, fd: i32, addr: u64, len: u32, offset: u64) {
    sqe.clear();
    sqe.set_opcode(op);
    sqe.set_fd(fd);
    sqe.set_off(offset);
    sqe.set_addr(addr);
    sqe.set_len(len);
}

pub fn prep_nop(sqe: &mut Sqe) {
    prep_rw(opcode::NOP, sqe, -1, 0, 0, 0);
}

/// The address length travels through the offset field as a pointer.
pub fn prep_accept(
    sqe: &mut Sqe,
    fd: i32,
    addr: *mut libc::sockaddr,
    addrlen: *mut libc::socklen_t,
    flags: i32,
) {
    prep_rw(opcode::ACCEPT, sqe, fd, addr_of(addr), 0, addr_of(addrlen));
    sqe.set_accept_flags(flags as u32);
}

pub fn prep_connect(sqe: &mut Sqe, fd: i32, addr: *const libc::sockaddr, addrlen: libc::socklen_t) {
    prep_rw(opcode::CONNECT, sqe, fd, addr_of(addr), 0, u64::from(addrlen));
}

pub fn prep_send(sqe: &mut Sqe, fd: i32, buf: *const u8, len: usize, flags: i32) {
    prep_rw(opcode::SEND, sqe, fd, addr_of(buf), len as u32, 0);
    sqe.set_msg_flags(flags as u32);
}

pub fn prep_recv(sqe: &mut Sqe, fd: i32, buf: *mut u8, len: usize, flags: i32) {
    prep_rw(opcode::RECV, sqe, fd, addr_of(buf), len as u32, 0);
    sqe.set_msg_flags(flags as u32);
}

pub fn prep_sendmsg(sqe: &mut Sqe, fd: i32, msg: *const libc::msghdr, flags: u32) {
    prep_rw(opcode::SENDMSG, sqe, fd, addr_of(msg), 1, 0);
    sqe.set_msg_flags(flags);
}

pub fn prep_recvmsg(sqe: &mut Sqe, fd: i32, msg: *mut libc::msghdr, flags: u32) {
    prep_rw(opcode::RECVMSG, sqe, fd, addr_of(msg), 1, 0);
    sqe.set_msg_flags(flags);
}

pub fn prep_close(sqe: &mut Sqe, fd: i32) {
    prep_rw(opcode::CLOSE, sqe, fd, 0, 0, 0);
}

pub fn prep_read(sqe: &mut Sqe, fd: i32, buf: *mut u8, nbytes: u32, offset: u64) {
    prep_rw(opcode::READ, sqe, fd, addr_of(buf), nbytes, offset);
}

pub fn prep_write(sqe: &mut Sqe, fd: i32, buf: *const u8, nbytes: u32, offset: u64) {
    prep_rw(opcode::WRITE, sqe, fd, addr_of(buf), nbytes, offset);
}

pub fn prep_writev(sqe: &mut Sqe, fd: i32, iovecs: *const libc::iovec, nr_vecs: u32, offset: u64) {
    prep_rw(opcode::WRITEV, sqe, fd, addr_of(iovecs), nr_vecs, offset);
}

/// `mask` is given in host order and stored in the kernel's wire order.
pub fn prep_poll_add(sqe: &mut Sqe, fd: i32, mask: u32) {
    prep_rw(opcode::POLL_ADD, sqe, fd, 0, 0, 0);
    sqe.set_poll32_events(poll_mask_to_wire(mask));
}

pub fn prep_poll_remove(sqe: &mut Sqe, user_data: u64) {
    prep_rw(opcode::POLL_REMOVE, sqe, -1, user_data, 0, 0);
}

pub fn prep_cancel(sqe: &mut Sqe, user_data: u64, flags: i32) {
    prep_rw(opcode::ASYNC_CANCEL, sqe, -1, user_data, 0, 0);
    sqe.set_cancel_flags(flags as u32);
}

/// One timespec; `count` travels in the offset field.
pub fn prep_timeout(sqe: &mut Sqe, ts: *const KernelTimespec, count: u32, flags: u32) {
    prep_rw(opcode::TIMEOUT, sqe, -1, addr_of(ts), 1, u64::from(count));
    sqe.set_timeout_flags(flags);
}

pub fn prep_timeout_remove(sqe: &mut Sqe, user_data: u64, flags: u32) {
    prep_rw(opcode::TIMEOUT_REMOVE, sqe, -1, user_data, 0, 0);
    sqe.set_timeout_flags(flags);
}

/// Removal opcode with the update flag; the new timespec goes in the offset.
pub fn prep_timeout_update(sqe: &mut Sqe, ts: *const KernelTimespec, user_data: u64, flags: u32) {
    prep_rw(opcode::TIMEOUT_REMOVE, sqe, -1, 0, 0, addr_of(ts));
    sqe.set_addr(user_data);
    sqe.set_timeout_flags(flags | IORING_TIMEOUT_UPDATE);
}

/// The creation mode travels in the length field.
pub fn prep_openat(sqe: &mut Sqe, dfd: i32, path: *const libc::c_char, flags: i32, mode: u32) {
    prep_rw(opcode::OPENAT, sqe, dfd, addr_of(path), mode, 0);
    sqe.set_open_flags(flags as u32);
}
