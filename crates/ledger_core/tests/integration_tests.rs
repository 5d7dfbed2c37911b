use std::io::Cursor;
use std::num::NonZeroUsize;

use proptest::prelude::*;
use rand::{thread_rng, RngCore};
use rstest::rstest;
use serial_test::serial;
use test_case::test_case;
use zeroize::Zeroize;

use pwledger_core::{
    guard_checks_enabled, lock_policy, memory_status, page_size, read_secret, set_lock_policy,
    CaptureError, LockPolicy, Protection, Secret,
};

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn generate_random_data(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    thread_rng().fill_bytes(&mut data);
    data
}

fn filled(bytes: &[u8]) -> Secret {
    let mut secret = Secret::new(nz(bytes.len()));
    secret.with_write_access(|view| view.copy_from_slice(bytes));
    secret
}

#[test]
fn test_memory_status_reported() {
    let status = memory_status();
    println!("Hardened memory status: {:?}", status);

    assert!(status.page_size.is_power_of_two());
    assert_eq!(status.page_size, page_size());
}

#[test]
fn test_store_relocate_wipe_scenario() {
    let mut first = Secret::new(nz(32));
    first.with_write_access(|view| view.copy_from_slice(b"secret-material-here-31-bytes!!\0"));

    let second = first.relocate();
    assert_eq!(first.len(), 0);
    assert_eq!(second.len(), 32);

    let matches = second.with_read_access(|view| view == b"secret-material-here-31-bytes!!\0");
    assert!(matches);
    assert_eq!(second.protection(), Protection::NoAccess);

    drop(first);
    drop(second);
}

#[test_case(1; "single_byte")]
#[test_case(15; "below_canary")]
#[test_case(4096 - 16; "fills_one_page")]
#[test_case(4096; "spills_into_second_page")]
#[test_case(1024 * 100; "large_100kb")]
fn test_variable_secret_sizes(size: usize) {
    let data = generate_random_data(size);

    let secret = filled(&data);

    assert_eq!(secret.len(), size);
    assert_eq!(secret.protection(), Protection::NoAccess);
    assert!(secret.with_read_access(|view| view == data.as_slice()));
}

#[rstest]
#[case(Protection::ReadOnly)]
#[case(Protection::ReadWrite)]
fn test_every_guard_returns_to_no_access(#[case] during: Protection) {
    let mut secret = Secret::new(nz(24));

    match during {
        Protection::ReadOnly => {
            let _guard = secret.read();
            assert_eq!(secret.protection(), Protection::ReadOnly);
        }
        _ => {
            let guard = secret.write();
            drop(guard);
        }
    }

    assert_eq!(secret.protection(), Protection::NoAccess);
    assert_eq!(secret.live_guards(), 0);
}

#[test]
fn test_zeroize_then_reuse() {
    let mut secret = filled(b"old-password");

    secret.zeroize();
    assert!(secret.with_read_access(|view| view.iter().all(|&b| b == 0)));

    secret.with_write_access(|view| view[..3].copy_from_slice(b"new"));
    assert!(secret.with_read_access(|view| &view[..3] == b"new"));
}

#[test]
fn test_many_live_secrets() {
    let secrets: Vec<Secret> = (1..=64).map(|n| filled(&vec![n as u8; n])).collect();

    for (i, secret) in secrets.iter().enumerate() {
        let expected = (i + 1) as u8;
        assert_eq!(secret.len(), i + 1);
        assert!(secret.with_read_access(|view| view.iter().all(|&b| b == expected)));
    }
}

#[test]
fn test_capture_into_secret() {
    let mut echo = Vec::new();
    let secret = read_secret(Cursor::new(b"correct horse\n".to_vec()), &mut echo, nz(64)).unwrap();

    assert_eq!(secret.len(), 13);
    assert!(secret.with_read_access(|view| view == b"correct horse"));
    assert!(!String::from_utf8_lossy(&echo).contains("horse"));
}

#[test]
fn test_capture_rejects_overlong_input() {
    let result = read_secret(Cursor::new(vec![b'a'; 100]), std::io::sink(), nz(10));
    assert!(matches!(result, Err(CaptureError::TooLong { max: 10 })));
}

#[test]
fn test_default_policy_tolerates_lock_failure() {
    assert_eq!(lock_policy(), LockPolicy::BestEffort);

    // Locking may fail under RLIMIT_MEMLOCK; construction must not
    let secret = Secret::new(nz(8));
    assert_eq!(secret.protection(), Protection::NoAccess);
}

proptest! {
    #[test]
    fn prop_contents_survive_guards_and_relocation(data in proptest::collection::vec(any::<u8>(), 1..512)) {
        let mut source = filled(&data);
        let moved = source.relocate();

        prop_assert!(source.is_empty());
        prop_assert_eq!(moved.with_read_access(|view| view.to_vec()), data);
        prop_assert_eq!(moved.protection(), Protection::NoAccess);
    }

    #[test]
    fn prop_ct_eq_matches_slice_equality(a in proptest::collection::vec(any::<u8>(), 1..64),
                                         b in proptest::collection::vec(any::<u8>(), 1..64)) {
        let lhs = filled(&a);
        let rhs = filled(&b);

        prop_assert_eq!(lhs.ct_eq(&rhs), a == b);
    }
}

/// Tests that must kill the process. Each child is `#[ignore]`d so it only
/// runs when a parent re-invokes this binary for exactly that test.
#[cfg(unix)]
mod fatal {
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, ExitStatus};

    use super::*;

    fn run_test_as_subprocess(test_name: &str) -> ExitStatus {
        let exe = std::env::current_exe().expect("Failed to get current exe");
        let output = Command::new(exe)
            .args([
                "--exact",
                test_name,
                "--ignored",
                "--test-threads=1",
                "--nocapture",
            ])
            .output()
            .expect("Failed to run subprocess");

        assert!(
            !output.stdout.starts_with(b"\nrunning 0 tests"),
            "no test named {test_name}"
        );

        output.status
    }

    fn assert_faulted(status: ExitStatus) {
        let signal = status.signal();
        assert!(
            signal == Some(libc::SIGSEGV) || signal == Some(libc::SIGBUS),
            "expected a memory fault, got {status:?}"
        );
    }

    #[test]
    #[ignore]
    fn child_overlapping_read_guards() {
        let secret = filled(b"nested");
        let _outer = secret.read();
        let _inner = secret.read();
    }

    #[test]
    #[serial]
    fn test_overlapping_guards_abort() {
        let status = run_test_as_subprocess("fatal::child_overlapping_read_guards");

        if guard_checks_enabled() {
            assert_eq!(status.signal(), Some(libc::SIGABRT));
        } else {
            assert!(status.success());
        }
    }

    #[test]
    #[ignore]
    fn child_relocate_with_forgotten_guard() {
        let mut secret = filled(b"forgotten");
        std::mem::forget(secret.read());
        let _moved = secret.relocate();
    }

    #[test]
    #[serial]
    fn test_relocate_while_guarded_aborts() {
        let status = run_test_as_subprocess("fatal::child_relocate_with_forgotten_guard");

        if guard_checks_enabled() {
            assert_eq!(status.signal(), Some(libc::SIGABRT));
        } else {
            assert!(status.success());
        }
    }

    #[test]
    #[ignore]
    fn child_read_after_forgotten_guard_and_write() {
        let mut secret = filled(b"stale");
        std::mem::forget(secret.read());
        secret.with_write_access(|view| view[0] = b'S');

        let first = secret.with_read_access(|view| view[0]);
        assert_eq!(first, b'S');
    }

    #[test]
    #[serial]
    fn test_read_after_forgotten_guard_and_write() {
        let status = run_test_as_subprocess("fatal::child_read_after_forgotten_guard_and_write");

        if guard_checks_enabled() {
            assert_eq!(status.signal(), Some(libc::SIGABRT));
        } else {
            assert!(status.success(), "read faulted on re-locked pages: {status:?}");
        }
    }

    #[test]
    #[ignore]
    fn child_read_after_guard_closed() {
        let secret = filled(b"locked");
        let ptr = secret.read().view().as_ptr();

        // Guard is gone, the page is no-access again
        let byte = unsafe { std::ptr::read_volatile(ptr) };
        println!("read {byte}");
    }

    #[test]
    #[serial]
    fn test_no_access_pages_fault() {
        assert_faulted(run_test_as_subprocess("fatal::child_read_after_guard_closed"));
    }

    #[test]
    #[ignore]
    fn child_overrun_into_guard_page() {
        let mut secret = Secret::new(nz(10));
        let mut guard = secret.write();
        let view = guard.view_mut();

        unsafe { std::ptr::write_volatile(view.as_mut_ptr().add(view.len()), 0xAA) };
    }

    #[test]
    #[serial]
    fn test_overrun_hits_guard_page() {
        assert_faulted(run_test_as_subprocess("fatal::child_overrun_into_guard_page"));
    }

    #[test]
    #[ignore]
    fn child_underrun_into_canary() {
        let mut secret = Secret::new(nz(10));
        {
            let mut guard = secret.write();
            let view = guard.view_mut();
            unsafe { std::ptr::write_volatile(view.as_mut_ptr().sub(1), 0xAA) };
        }
        drop(secret);
    }

    #[test]
    #[serial]
    fn test_clobbered_canary_aborts_on_drop() {
        let status = run_test_as_subprocess("fatal::child_underrun_into_canary");
        assert_eq!(status.signal(), Some(libc::SIGABRT));
    }

    #[test]
    #[ignore]
    fn child_required_lock_policy() {
        set_lock_policy(LockPolicy::Required);
        let secret = Secret::new(nz(8));
        assert!(secret.is_locked());
    }

    #[test]
    #[serial]
    fn test_required_lock_policy() {
        let status = run_test_as_subprocess("fatal::child_required_lock_policy");

        if memory_status().lock_available {
            assert!(status.success(), "locking was available but failed: {status:?}");
        } else {
            assert_eq!(status.signal(), Some(libc::SIGABRT));
        }
    }
}
