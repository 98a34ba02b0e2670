//! Tests for the built-in preparation routines and backend resolution.

use std::time::Duration;

use super::*;
use crate::abi::{opcode, poll_mask_to_wire, IORING_TIMEOUT_UPDATE};
use crate::config::{BackendConfig, BackendPreference, RingConfig};
use crate::test_utils::{init_test_logging, ring_unavailable, PrepOnly};

fn dirty() -> Sqe {
    let mut sqe = Sqe::default();
    sqe.set_user_data(0xdead_beef);
    sqe.set_len(99);
    sqe.set_msg_flags(0xffff);
    sqe
}

mod prep {
    use super::*;

    #[test]
    fn prep_zeroes_previous_contents() {
        let mut sqe = dirty();
        PrepOnly.prep_nop(&mut sqe);
        assert_eq!(sqe.opcode(), opcode::NOP);
        assert_eq!(sqe.fd(), -1);
        assert_eq!(sqe.user_data(), 0);
        assert_eq!(sqe.len(), 0);
        assert_eq!(sqe.msg_flags(), 0);
    }

    #[test]
    fn read_and_write_fill_rw_fields() {
        let mut buf = [0u8; 32];
        let mut sqe = Sqe::default();
        PrepOnly.prep_read(&mut sqe, 5, buf.as_mut_ptr(), 32, 4096);
        assert_eq!(sqe.opcode(), opcode::READ);
        assert_eq!(sqe.fd(), 5);
        assert_eq!(sqe.addr(), buf.as_ptr() as u64);
        assert_eq!(sqe.len(), 32);
        assert_eq!(sqe.off(), 4096);

        PrepOnly.prep_write(&mut sqe, 6, buf.as_ptr(), 16, u64::MAX);
        assert_eq!(sqe.opcode(), opcode::WRITE);
        assert_eq!(sqe.fd(), 6);
        assert_eq!(sqe.len(), 16);
        assert_eq!(sqe.off(), u64::MAX);
    }

    #[test]
    fn writev_points_at_iovec_array() {
        let first = b"hello ".to_vec();
        let second = b"world".to_vec();
        let iovecs = [
            libc::iovec {
                iov_base: first.as_ptr() as *mut libc::c_void,
                iov_len: first.len(),
            },
            libc::iovec {
                iov_base: second.as_ptr() as *mut libc::c_void,
                iov_len: second.len(),
            },
        ];
        let mut sqe = Sqe::default();
        PrepOnly.prep_writev(&mut sqe, 9, iovecs.as_ptr(), 2, 1024);

        assert_eq!(sqe.opcode(), opcode::WRITEV);
        assert_eq!(sqe.fd(), 9);
        assert_eq!(sqe.len(), 2);
        assert_eq!(sqe.off(), 1024);

        // SAFETY: addr was set from `iovecs`, still alive.
        let stored = unsafe { std::slice::from_raw_parts(sqe.addr() as *const libc::iovec, sqe.len() as usize) };
        assert_eq!(stored[0].iov_len, 6);
        assert_eq!(stored[1].iov_base as *const u8, second.as_ptr());
    }

    #[test]
    fn timeout_carries_timespec_and_count() {
        let ts = KernelTimespec::from(Duration::from_millis(500));
        let mut sqe = Sqe::default();
        PrepOnly.prep_timeout(&mut sqe, &ts, 3, 0);

        assert_eq!(sqe.opcode(), opcode::TIMEOUT);
        assert_eq!(sqe.fd(), -1);
        assert_eq!(sqe.len(), 1);
        assert_eq!(sqe.off(), 3);
        assert_eq!(sqe.timeout_flags(), 0);

        // SAFETY: addr was set from `ts`, still alive.
        let stored = unsafe { *(sqe.addr() as *const KernelTimespec) };
        assert_eq!(Duration::from(stored), Duration::from_millis(500));
    }

    #[test]
    fn timeout_update_uses_removal_opcode() {
        let ts = KernelTimespec::from(Duration::from_secs(2));
        let mut sqe = Sqe::default();
        PrepOnly.prep_timeout_update(&mut sqe, &ts, 0x42, 0);

        assert_eq!(sqe.opcode(), opcode::TIMEOUT_REMOVE);
        assert_eq!(sqe.addr(), 0x42);
        assert_eq!(sqe.off(), &ts as *const KernelTimespec as u64);
        assert_eq!(sqe.timeout_flags() & IORING_TIMEOUT_UPDATE, IORING_TIMEOUT_UPDATE);
    }

    #[test]
    fn poll_add_stores_wire_order_mask() {
        let mut sqe = Sqe::default();
        let mask = (libc::POLLIN | libc::POLLOUT) as u32;
        PrepOnly.prep_poll_add(&mut sqe, 3, mask);
        assert_eq!(sqe.opcode(), opcode::POLL_ADD);
        assert_eq!(sqe.poll32_events(), poll_mask_to_wire(mask));
        #[cfg(target_endian = "little")]
        assert_eq!(sqe.poll32_events(), mask);
    }

    #[test]
    fn cancel_and_removals_target_user_data() {
        let mut sqe = Sqe::default();
        PrepOnly.prep_cancel(&mut sqe, 0x1_0000_0002, 0);
        assert_eq!(sqe.opcode(), opcode::ASYNC_CANCEL);
        assert_eq!(sqe.addr(), 0x1_0000_0002);
        assert_eq!(sqe.fd(), -1);

        PrepOnly.prep_poll_remove(&mut sqe, 7);
        assert_eq!(sqe.opcode(), opcode::POLL_REMOVE);
        assert_eq!(sqe.addr(), 7);

        PrepOnly.prep_timeout_remove(&mut sqe, 8, 0);
        assert_eq!(sqe.opcode(), opcode::TIMEOUT_REMOVE);
        assert_eq!(sqe.addr(), 8);
        assert_eq!(sqe.timeout_flags(), 0);
    }

    #[test]
    fn socket_preparations() {
        let mut storage = crate::operation::addr::empty_storage();
        let mut len = crate::operation::addr::STORAGE_LEN;
        let addr = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr;
        let mut sqe = Sqe::default();

        PrepOnly.prep_accept(&mut sqe, 4, addr, &mut len, libc::SOCK_CLOEXEC);
        assert_eq!(sqe.opcode(), opcode::ACCEPT);
        assert_eq!(sqe.addr(), addr as u64);
        assert_eq!(sqe.off(), &mut len as *mut libc::socklen_t as u64);
        assert_eq!(sqe.accept_flags(), libc::SOCK_CLOEXEC as u32);

        PrepOnly.prep_connect(&mut sqe, 4, addr, 16);
        assert_eq!(sqe.opcode(), opcode::CONNECT);
        assert_eq!(sqe.off(), 16);

        let data = [1u8, 2, 3];
        PrepOnly.prep_send(&mut sqe, 4, data.as_ptr(), data.len(), libc::MSG_NOSIGNAL);
        assert_eq!(sqe.opcode(), opcode::SEND);
        assert_eq!(sqe.len(), 3);
        assert_eq!(sqe.msg_flags(), libc::MSG_NOSIGNAL as u32);

        // SAFETY: zeroed msghdr is a valid empty message header.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        PrepOnly.prep_recvmsg(&mut sqe, 4, &mut msg, 0);
        assert_eq!(sqe.opcode(), opcode::RECVMSG);
        assert_eq!(sqe.len(), 1);
        assert_eq!(sqe.addr(), &msg as *const libc::msghdr as u64);
    }

    #[test]
    fn openat_mode_in_len() {
        let path = std::ffi::CString::new("/tmp/x").unwrap();
        let mut sqe = Sqe::default();
        PrepOnly.prep_openat(&mut sqe, libc::AT_FDCWD, path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC, 0o644);
        assert_eq!(sqe.opcode(), opcode::OPENAT);
        assert_eq!(sqe.fd(), libc::AT_FDCWD);
        assert_eq!(sqe.len(), 0o644);
        assert_eq!(sqe.open_flags(), (libc::O_RDONLY | libc::O_CLOEXEC) as u32);
    }

    #[test]
    fn close_targets_fd() {
        let mut sqe = dirty();
        PrepOnly.prep_close(&mut sqe, 12);
        assert_eq!(sqe.opcode(), opcode::CLOSE);
        assert_eq!(sqe.fd(), 12);
        assert_eq!(sqe.user_data(), 0);
    }
}

mod resolution {
    use super::*;

    #[test]
    fn fallback_preference_uses_builtin_transport() {
        init_test_logging();
        let config = BackendConfig {
            preference: BackendPreference::Fallback,
            ..BackendConfig::default()
        };
        let backend = match resolve(&config, &RingConfig::default()) {
            Ok(backend) => backend,
            Err(e) if ring_unavailable(&e) => return,
            Err(e) => panic!("fallback resolution failed: {e}"),
        };
        assert_eq!(backend.kind(), BackendKind::Fallback);
        assert_eq!(backend.name(), "builtin");
        assert!(backend.sq_entries() >= 64);
        assert_eq!(backend.space_left(), backend.sq_entries());
        assert_eq!(backend.ready(), 0);
    }

    #[test]
    fn auto_without_library_falls_back() {
        init_test_logging();
        let config = BackendConfig {
            preference: BackendPreference::Auto,
            library_names: vec!["libdefinitely-not-uring.so.0".to_owned()],
        };
        match resolve(&config, &RingConfig::default()) {
            Ok(backend) => assert_eq!(backend.kind(), BackendKind::Fallback),
            Err(e) if ring_unavailable(&e) => {}
            Err(e) => panic!("auto resolution failed: {e}"),
        }
    }

    #[test]
    fn native_without_library_is_unsupported() {
        let config = BackendConfig {
            preference: BackendPreference::Native,
            library_names: vec!["libdefinitely-not-uring.so.0".to_owned()],
        };
        let Err(error) = resolve(&config, &RingConfig::default()) else {
            panic!("native resolution without a library succeeded");
        };
        assert!(matches!(error, ReactorError::Unsupported(_)), "got {error:?}");
    }

    #[test]
    fn library_without_ring_symbols_is_missing_symbol() {
        // libc loads everywhere but exports no io_uring entry points.
        let error = NativeLibrary::open(&["libc.so.6"]).unwrap_err();
        match error {
            ReactorError::MissingSymbol { symbol, library } => {
                assert_eq!(symbol, "io_uring_queue_init_params");
                assert_eq!(library, "libc.so.6");
            }
            other => panic!("expected MissingSymbol, got {other:?}"),
        }
    }

    #[test]
    fn fallback_round_trips_a_nop() {
        let mut backend = match FallbackBackend::new(&RingConfig::default()) {
            Ok(backend) => backend,
            Err(e) if ring_unavailable(&e) => return,
            Err(e) => panic!("ring setup failed: {e}"),
        };
        let mut slot = backend.acquire_slot().unwrap();
        // SAFETY: freshly acquired, not yet published.
        let sqe = unsafe { slot.sqe_mut() };
        backend.prep_nop(sqe);
        sqe.set_user_data(77);

        assert_eq!(backend.submit(1).unwrap(), 1);
        let mut out = Vec::new();
        assert_eq!(backend.drain(16, &mut out), 1);
        assert_eq!(out[0].user_data(), 77);
        assert_eq!(out[0].res(), 0);
        assert_eq!(backend.ready(), 0);
    }
}
