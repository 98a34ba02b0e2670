//! Tests for request construction, validation and slot preparation.

use std::net::SocketAddr;
use std::time::Duration;

use super::*;
use crate::abi::{opcode, KernelTimespec, Sqe, IORING_TIMEOUT_UPDATE};
use crate::error::ReactorError;
use crate::reactor::Token;
use crate::test_utils::PrepOnly;

mod compile_time_tests {
    use super::*;
    use static_assertions::*;

    assert_impl_all!(Op: Send, std::fmt::Debug);
    assert_impl_all!(InFlight: Send);
    assert_impl_all!(OperationKind: Copy, Eq, std::hash::Hash, Ord);
}

fn every_kind() -> Vec<Op> {
    let target = Token::new(1, 1);
    vec![
        Op::nop(),
        Op::accept(3),
        Op::connect(3, "127.0.0.1:80".parse().unwrap()),
        Op::send(3, b"ping".to_vec(), 0),
        Op::recv(3, vec![0; 16], 0),
        Op::send_to(3, Some("127.0.0.1:9".parse().unwrap()), vec![b"a".to_vec()], 0),
        Op::recv_from(3, vec![0; 16], 0),
        Op::close(3),
        Op::read(3, vec![0; 16], Some(0)),
        Op::write(3, b"data".to_vec(), None),
        Op::writev(3, vec![b"a".to_vec(), b"b".to_vec()], Some(8)),
        Op::poll_add(3, libc::POLLIN as u32),
        Op::poll_remove(target),
        Op::cancel(target, 0),
        Op::timeout(Duration::from_millis(5), 0, 0),
        Op::timeout_remove(target, 0),
        Op::timeout_update(target, Duration::from_millis(5), 0),
        Op::openat(libc::AT_FDCWD, "/tmp", libc::O_RDONLY, 0).unwrap(),
    ]
}

fn prepared(op: Op) -> (Box<InFlight>, Sqe) {
    let mut in_flight = InFlight::new(op);
    let mut sqe = Sqe::default();
    in_flight.prepare(&PrepOnly, &mut sqe);
    (in_flight, sqe)
}

#[test]
fn test_every_kind_builds_with_its_opcode() {
    let ops = every_kind();
    assert_eq!(ops.len(), OperationKind::ALL.len());
    for op in ops {
        let kind = op.kind();
        assert!(op.validate(1024).is_ok(), "{kind} failed validation");
        let (_, sqe) = prepared(op);
        assert_eq!(sqe.opcode(), kind.opcode(), "{kind} prepared the wrong opcode");
    }
}

#[test]
fn test_fd_and_target_accessors() {
    assert_eq!(Op::close(7).fd(), Some(7));
    assert_eq!(Op::nop().fd(), None);
    let target = Token::new(4, 2);
    assert_eq!(Op::cancel(target, 0).target(), Some(target));
    assert_eq!(Op::read(1, Vec::new(), None).target(), None);
}

#[test]
fn test_writev_over_limit_is_rejected() {
    let bufs = vec![vec![0u8; 1]; 1025];
    let err = Op::writev(1, bufs, None).validate(1024).unwrap_err();
    assert!(matches!(err, ReactorError::TooManyBuffers { count: 1025, max: 1024 }));

    let bufs = vec![vec![0u8; 1]; 1024];
    assert!(Op::writev(1, bufs, None).validate(1024).is_ok());
}

#[test]
fn test_sendmsg_shares_the_vector_limit() {
    let err = Op::send_to(1, None, vec![Vec::new(); 3], 0).validate(2).unwrap_err();
    assert!(matches!(err, ReactorError::TooManyBuffers { count: 3, max: 2 }));
}

#[test]
#[cfg(target_pointer_width = "64")]
fn test_oversized_socket_buffers_are_rejected() {
    // Zeroed allocation stays untouched, so no 4 GiB is committed.
    let len = (1usize << 32) + 5;
    let err = Op::send(3, vec![0u8; len], 0).validate(1024).unwrap_err();
    assert!(matches!(err, ReactorError::InvalidOperation(_)));
    let err = Op::recv(3, vec![0u8; len], 0).validate(1024).unwrap_err();
    assert!(matches!(err, ReactorError::InvalidOperation(_)));

    assert!(Op::send(3, vec![0u8; 16], 0).validate(1024).is_ok());
}

#[test]
fn test_openat_rejects_nul_in_path() {
    let err = Op::openat(libc::AT_FDCWD, "bad\0path", 0, 0).unwrap_err();
    assert!(matches!(err, ReactorError::InvalidOperation(_)));
}

#[test]
fn test_missing_offset_means_current_position() {
    let (_, sqe) = prepared(Op::read(3, vec![0; 8], None));
    assert_eq!(sqe.off(), u64::MAX);
    let (_, sqe) = prepared(Op::write(3, vec![0; 8], Some(512)));
    assert_eq!(sqe.off(), 512);
}

#[test]
fn test_read_points_at_owned_buffer() {
    let (in_flight, sqe) = prepared(Op::read(3, vec![0; 64], Some(0)));
    let buf = in_flight.into_op().into_buffer().unwrap();
    assert_eq!(sqe.addr(), buf.as_ptr() as u64);
    assert_eq!(sqe.len(), 64);
}

#[test]
fn test_writev_iovecs_cover_every_buffer() {
    let (in_flight, sqe) = prepared(Op::writev(5, vec![b"hello ".to_vec(), b"world".to_vec()], Some(1024)));
    assert_eq!(sqe.fd(), 5);
    assert_eq!(sqe.len(), 2);
    assert_eq!(sqe.off(), 1024);

    // SAFETY: the iovec array lives inside `in_flight`.
    let iovecs: Vec<(usize, usize)> = unsafe { std::slice::from_raw_parts(sqe.addr() as *const libc::iovec, 2) }
        .iter()
        .map(|iov| (iov.iov_base as usize, iov.iov_len))
        .collect();
    let bufs = in_flight.into_op().into_buffers().expect("writev buffers");
    for (iov, buf) in iovecs.iter().zip(&bufs) {
        assert_eq!(iov.0, buf.as_ptr() as usize);
        assert_eq!(iov.1, buf.len());
    }
}

#[test]
fn test_timeout_owns_its_timespec() {
    let (in_flight, sqe) = prepared(Op::timeout(Duration::from_millis(500), 2, 0));
    assert_eq!(sqe.off(), 2);
    // SAFETY: the timespec lives inside `in_flight`.
    let ts = unsafe { *(sqe.addr() as *const KernelTimespec) };
    assert_eq!(Duration::from(ts), Duration::from_millis(500));
    drop(in_flight);
}

#[test]
fn test_timeout_update_targets_token() {
    let target = Token::new(9, 3);
    let (_in_flight, sqe) = prepared(Op::timeout_update(target, Duration::from_secs(1), 0));
    assert_eq!(sqe.opcode(), opcode::TIMEOUT_REMOVE);
    assert_eq!(sqe.addr(), target.to_user_data());
    assert_ne!(sqe.timeout_flags() & IORING_TIMEOUT_UPDATE, 0);
}

#[test]
fn test_cancel_targets_token() {
    let target = Token::new(2, 5);
    let (_, sqe) = prepared(Op::cancel(target, 0));
    assert_eq!(sqe.opcode(), opcode::ASYNC_CANCEL);
    assert_eq!(sqe.addr(), target.to_user_data());
}

#[test]
fn test_connect_encodes_destination() {
    let dest: SocketAddr = "10.1.2.3:4567".parse().unwrap();
    let (_in_flight, sqe) = prepared(Op::connect(3, dest));
    assert_eq!(sqe.off() as usize, std::mem::size_of::<libc::sockaddr_in>());
    // SAFETY: the address storage lives inside `_in_flight`.
    let storage = unsafe { *(sqe.addr() as *const libc::sockaddr_storage) };
    assert_eq!(addr::from_storage(&storage, sqe.off() as libc::socklen_t), Some(dest));
}

#[test]
fn test_sendmsg_header_carries_address_and_iovecs() {
    let dest: SocketAddr = "[::1]:53".parse().unwrap();
    let (_in_flight, sqe) = prepared(Op::send_to(3, Some(dest), vec![b"q".to_vec(), b"ry".to_vec()], 0));
    assert_eq!(sqe.len(), 1);
    // SAFETY: the header lives inside `_in_flight`.
    let msg = unsafe { &*(sqe.addr() as *const libc::msghdr) };
    assert_eq!(msg.msg_iovlen as usize, 2);
    assert!(!msg.msg_name.is_null());
    // SAFETY: msg_name points at the owned storage.
    let storage = unsafe { *(msg.msg_name as *const libc::sockaddr_storage) };
    assert_eq!(addr::from_storage(&storage, msg.msg_namelen), Some(dest));
}

#[test]
fn test_accept_reports_kernel_written_peer() {
    let peer: SocketAddr = "192.168.0.10:50000".parse().unwrap();
    let (in_flight, sqe) = prepared(Op::accept(3));
    assert_eq!(sqe.accept_flags(), libc::SOCK_CLOEXEC as u32);
    assert_eq!(in_flight.peer_addr(), None);

    // Play the kernel: write the peer through the pointers in the entry.
    let (storage, len) = addr::to_storage(&peer);
    // SAFETY: addr/off point at the owned storage and length.
    unsafe {
        *(sqe.addr() as *mut libc::sockaddr_storage) = storage;
        *(sqe.off() as *mut libc::socklen_t) = len;
    }
    assert_eq!(in_flight.peer_addr(), Some(peer));
}

#[test]
fn test_buffers_come_back_intact() {
    let op = Op::writev(1, vec![b"x".to_vec(), b"yz".to_vec()], None);
    assert_eq!(op.into_buffers(), Some(vec![b"x".to_vec(), b"yz".to_vec()]));
    assert_eq!(Op::send(1, b"abc".to_vec(), 0).into_buffer(), Some(b"abc".to_vec()));
    assert_eq!(Op::close(1).into_buffer(), None);
}
