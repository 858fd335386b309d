use std::{
    sync::mpsc::channel,
    thread,
    time::{Duration, Instant},
};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{Credential, PbufPool, Quota};
use crate::{modules::buffer_owner::BufferQueueOwner, util::get_page_size, PbufConfig};

/// time we give a thread to (wrongly) make progress
const SETTLE_TIME: Duration = Duration::from_millis(150);

/// upper bound for things that have to happen
const DEADLINE: Duration = Duration::from_secs(10);

pub(crate) fn small_pool(buffer_count: usize) -> PbufPool {
    PbufPool::new(PbufConfig {
        buffer_count,
        max_transfer_size: 4096,
        pin_memory: false,
    })
    .unwrap()
}

fn wait_until<F: Fn() -> bool>(condition: F) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < DEADLINE, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_invalid_configs_are_rejected() {
    let mut config = PbufConfig {
        buffer_count: 0,
        max_transfer_size: 4096,
        pin_memory: false,
    };
    assert!(PbufPool::new(config.clone()).is_err());

    config.buffer_count = 4;
    config.max_transfer_size = 0;
    assert!(PbufPool::new(config.clone()).is_err());

    config.max_transfer_size = usize::MAX;
    assert!(PbufPool::new(config.clone()).is_err());

    config.max_transfer_size = usize::MAX / 2;
    assert!(PbufPool::new(config).is_err());
}

#[test]
fn test_slot_size_is_rounded_to_pages() {
    let pool = PbufPool::new(PbufConfig {
        buffer_count: 3,
        max_transfer_size: 1000,
        pin_memory: false,
    })
    .unwrap();

    assert_eq!(pool.slot_size(), get_page_size());
    assert_eq!(pool.buffer_count(), 3);
    assert_eq!(pool.free_count(), 3);

    let buf = pool.lease(None);
    assert_eq!(buf.capacity(), get_page_size());
    assert_eq!(buf.data().len(), get_page_size());
    pool.release(buf, None);
}

#[test]
fn test_default_config() {
    let config = PbufConfig::default();
    assert_eq!(config.buffer_count, 256);
    assert_eq!(config.max_transfer_size, 128 * 1024);
    assert!(config.pin_memory);
}

#[test]
fn test_pinned_pool_can_be_created() {
    // pinning may be refused by the OS, the pool has to work anyway
    let pool = PbufPool::new(PbufConfig {
        buffer_count: 2,
        max_transfer_size: 4096,
        pin_memory: true,
    })
    .unwrap();

    let buf = pool.lease(None);
    pool.release(buf, None);
}

#[test]
fn test_pool_hands_out_every_buffer_without_blocking() {
    const COUNT: usize = 4;
    let pool = small_pool(COUNT);

    let bufs: Vec<_> = (0..COUNT).map(|_| pool.lease(None)).collect();
    assert_eq!(pool.free_count(), 0);

    let mut ids: Vec<_> = bufs.iter().map(|b| b.id()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), COUNT);

    assert!(pool.try_lease(&Quota::Unlimited).is_none());

    for buf in bufs {
        pool.release(buf, None);
    }
    assert_eq!(pool.free_count(), COUNT);
}

#[test]
fn test_slots_do_not_overlap() {
    const COUNT: usize = 4;
    let pool = small_pool(COUNT);

    let mut bufs: Vec<_> = (0..COUNT).map(|_| pool.lease(None)).collect();
    for buf in bufs.iter_mut() {
        let value = buf.id().index() as u8 + 1;
        buf.data_mut().fill(value);
    }
    for buf in bufs.iter() {
        let value = buf.id().index() as u8 + 1;
        assert!(buf.data().iter().all(|b| *b == value));
    }

    for buf in bufs {
        pool.release(buf, None);
    }
}

#[test]
fn test_lease_blocks_until_release() {
    let pool = small_pool(2);

    let first = pool.lease(None);
    let second = pool.lease(None);

    thread::scope(|s| {
        let (tx, rx) = channel();
        let pool_ref = &pool;
        s.spawn(move || {
            let buf = pool_ref.lease(None);
            tx.send(buf).unwrap();
        });

        wait_until(|| pool.waiting() == 1);
        assert!(rx.recv_timeout(SETTLE_TIME).is_err());

        let released_id = first.id();
        pool.release(first, None);

        let third = rx.recv_timeout(DEADLINE).expect("blocked lease wakes up");
        assert_eq!(third.id(), released_id);
        assert_eq!(pool.waiting(), 0);

        pool.release(third, None);
    });

    pool.release(second, None);
    assert_eq!(pool.free_count(), 2);
}

#[test]
fn test_release_wakes_exactly_one_leaser() {
    let pool = small_pool(1);
    let held = pool.lease(None);

    thread::scope(|s| {
        let (tx, rx) = channel();
        for _ in 0..2 {
            let tx = tx.clone();
            let pool_ref = &pool;
            s.spawn(move || {
                let buf = pool_ref.lease(None);
                tx.send(buf).unwrap();
            });
        }

        wait_until(|| pool.waiting() == 2);

        pool.release(held, None);
        let first = rx.recv_timeout(DEADLINE).expect("one leaser wakes up");

        // only one buffer came back, so the other leaser keeps sleeping
        assert!(rx.recv_timeout(SETTLE_TIME).is_err());
        assert_eq!(pool.waiting(), 1);

        pool.release(first, None);
        let second = rx.recv_timeout(DEADLINE).expect("second leaser wakes up");
        assert_eq!(pool.waiting(), 0);

        pool.release(second, None);
    });

    assert_eq!(pool.free_count(), 1);
}

#[test]
fn test_quota_isolation() {
    let pool = small_pool(4);
    let quota_a = Quota::limited("a", 2);
    let quota_b = Quota::limited("b", 2);

    let a1 = pool.lease(Some(&quota_a));
    let a2 = pool.lease(Some(&quota_a));
    assert_eq!(quota_a.available(), Some(0));

    thread::scope(|s| {
        let (tx, rx) = channel();
        let pool_ref = &pool;
        let quota_ref = &quota_a;
        s.spawn(move || {
            let buf = pool_ref.lease(Some(quota_ref));
            tx.send(buf).unwrap();
        });

        // the pool still has buffers, only the quota is used up
        wait_until(|| quota_a.waiting() == 1);
        assert!(rx.recv_timeout(SETTLE_TIME).is_err());
        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.free_count(), 2);

        let b1 = pool.lease(Some(&quota_b));
        assert_eq!(quota_b.available(), Some(1));
        assert!(rx.recv_timeout(SETTLE_TIME).is_err());

        pool.release(a1, Some(&quota_a));
        let a3 = rx.recv_timeout(DEADLINE).expect("quota waiter wakes up");
        assert_eq!(quota_a.waiting(), 0);

        assert_eq!(quota_a.available(), Some(0));
        assert_eq!(quota_b.available(), Some(1));

        pool.release(a2, Some(&quota_a));
        pool.release(a3, Some(&quota_a));
        pool.release(b1, Some(&quota_b));
    });

    assert_eq!(quota_a.available(), Some(2));
    assert_eq!(quota_b.available(), Some(2));
    assert_eq!(pool.free_count(), 4);
}

#[test]
fn test_quota_wakeup_is_passed_on() {
    let pool = small_pool(8);
    let quota = Quota::limited("cluster", 2);

    let a1 = pool.lease(Some(&quota));
    let a2 = pool.lease(Some(&quota));

    thread::scope(|s| {
        let (tx, rx) = channel();
        for _ in 0..2 {
            let tx = tx.clone();
            let pool_ref = &pool;
            let quota_ref = &quota;
            s.spawn(move || {
                let buf = pool_ref.lease(Some(quota_ref));
                tx.send(buf).unwrap();
            });
        }
        wait_until(|| quota.waiting() == 2);

        // two units come back in a row, only the first one is a 0 -> 1 transition
        pool.release(a1, Some(&quota));
        pool.release(a2, Some(&quota));

        let b1 = rx.recv_timeout(DEADLINE).expect("first quota waiter wakes up");
        let b2 = rx.recv_timeout(DEADLINE).expect("second quota waiter wakes up");
        assert_eq!(quota.waiting(), 0);
        assert_eq!(quota.available(), Some(0));

        pool.release(b1, Some(&quota));
        pool.release(b2, Some(&quota));
    });

    assert_eq!(quota.available(), Some(2));
}

#[test]
fn test_quota_unit_is_held_while_waiting_for_pool() {
    let pool = small_pool(1);
    let quota = Quota::limited("swap", 2);

    let held = pool.lease(Some(&quota));
    assert_eq!(quota.available(), Some(1));

    thread::scope(|s| {
        let (tx, rx) = channel();
        let pool_ref = &pool;
        let quota_ref = &quota;
        s.spawn(move || {
            let buf = pool_ref.lease(Some(quota_ref));
            tx.send(buf).unwrap();
        });

        // the second leaser got its quota unit and now sleeps on the empty pool
        wait_until(|| pool.waiting() == 1);
        assert_eq!(quota.available(), Some(0));
        assert_eq!(quota.waiting(), 0);
        assert!(pool.try_lease(&quota).is_none());

        let released_id = held.id();
        pool.release(held, Some(&quota));

        let buf = rx.recv_timeout(DEADLINE).expect("pool waiter wakes up");
        assert_eq!(buf.id(), released_id);
        assert_eq!(quota.available(), Some(1));
        assert_eq!(pool.waiting(), 0);

        pool.release(buf, Some(&quota));
    });

    assert_eq!(quota.available(), Some(2));
    assert_eq!(pool.free_count(), 1);
}

#[test]
fn test_unlimited_quota_is_not_counted() {
    let pool = small_pool(3);
    let quota = Quota::Unlimited;

    let bufs: Vec<_> = (0..3).map(|_| pool.lease(Some(&quota))).collect();
    assert_eq!(quota.available(), None);
    for buf in bufs {
        pool.release(buf, Some(&quota));
    }
    assert_eq!(quota.available(), None);
}

#[test]
fn test_try_lease_fails_without_state_change() {
    let pool = small_pool(2);
    let quota = Quota::limited("vnode", 1);

    let a = pool.try_lease(&quota).expect("quota and pool allow it");
    assert_eq!(quota.available(), Some(0));

    // quota exhausted: nothing changes
    assert!(pool.try_lease(&quota).is_none());
    assert_eq!(quota.available(), Some(0));
    assert_eq!(pool.free_count(), 1);

    // pool exhausted: quota stays untouched
    let unlimited = Quota::Unlimited;
    let b = pool.try_lease(&unlimited).expect("one buffer is left");
    let other = Quota::limited("other", 5);
    assert!(pool.try_lease(&other).is_none());
    assert_eq!(other.available(), Some(5));

    pool.release(a, Some(&quota));
    pool.release(b, Some(&unlimited));
    assert_eq!(quota.available(), Some(1));
    assert_eq!(pool.free_count(), 2);
}

#[test]
fn test_subsystem_quota_gets_half_the_pool() {
    let pool = small_pool(5);
    let quota = pool.subsystem_quota("cluster");
    assert_eq!(quota.available(), Some(3));
    assert_eq!(quota.name(), "cluster");
}

#[test]
fn test_free_list_reuses_last_released_first() {
    let pool = small_pool(4);

    let a = pool.lease(None);
    let b = pool.lease(None);
    let b_id = b.id();

    pool.release(a, None);
    pool.release(b, None);

    let next = pool.lease(None);
    assert_eq!(next.id(), b_id);
    pool.release(next, None);
}

#[test]
fn test_release_drops_credentials() {
    let pool = small_pool(1);
    let cred = Credential::new(1000, 1000);

    let mut buf = pool.lease(None);
    buf.set_credentials(Some(cred.clone()), Some(cred.clone()));
    assert_eq!(cred.holders(), 3);
    assert_eq!(buf.read_credential().unwrap().uid(), 1000);
    assert_eq!(buf.write_credential().unwrap().gid(), 1000);

    pool.release(buf, None);
    assert_eq!(cred.holders(), 1);
}

#[test]
fn test_leased_buffer_starts_clean() {
    let pool = small_pool(1);
    let owner = std::sync::Arc::new(BufferQueueOwner::new());

    let mut buf = pool.lease(None);
    buf.set_credentials(Some(Credential::new(1, 1)), None);
    buf.set_transfer_len(512);
    buf.bind(&owner);
    buf.unbind();
    pool.release(buf, None);

    let buf = pool.lease(None);
    assert!(!buf.is_bound());
    assert!(!buf.is_paging());
    assert!(buf.read_credential().is_none());
    assert!(buf.write_credential().is_none());
    assert_eq!(buf.transfer_len(), 0);
    pool.release(buf, None);
}

#[test]
fn test_dropped_buffer_returns_to_pool() {
    let pool = small_pool(1);

    let buf = pool.lease(None);
    assert_eq!(pool.free_count(), 0);
    drop(buf);
    assert_eq!(pool.free_count(), 1);

    let buf = pool.lease(None);
    pool.release(buf, None);
}

#[test]
fn test_dropped_buffer_gives_quota_back() {
    let pool = small_pool(2);
    let quota = Quota::limited("vnode", 1);

    let buf = pool.lease(Some(&quota));
    assert_eq!(quota.available(), Some(0));
    drop(buf);
    assert_eq!(quota.available(), Some(1));
    assert_eq!(pool.free_count(), 2);

    let buf = pool.try_lease(&quota).expect("quota unit came back");
    drop(buf);
    assert_eq!(quota.available(), Some(1));
}

#[test]
fn test_dropped_buffer_wakes_quota_waiter() {
    let pool = small_pool(2);
    let quota = Quota::limited("swap", 1);
    let held = pool.lease(Some(&quota));

    thread::scope(|s| {
        let (tx, rx) = channel();
        let pool_ref = &pool;
        let quota_ref = &quota;
        s.spawn(move || {
            let buf = pool_ref.lease(Some(quota_ref));
            tx.send(buf).unwrap();
        });

        wait_until(|| quota.waiting() == 1);
        drop(held);

        let buf = rx.recv_timeout(DEADLINE).expect("quota waiter wakes up");
        pool.release(buf, Some(&quota));
    });

    assert_eq!(quota.available(), Some(1));
}

#[test]
#[should_panic(expected = "exceeds slot size")]
fn test_oversized_transfer_is_fatal() {
    let pool = small_pool(1);
    let mut buf = pool.lease(None);
    let len = buf.capacity() + 1;
    buf.set_transfer_len(len);
}

#[test]
#[should_panic(expected = "released while still bound")]
fn test_release_while_bound_is_fatal() {
    let pool = small_pool(1);
    let owner = std::sync::Arc::new(BufferQueueOwner::new());

    let mut buf = pool.lease(None);
    buf.bind(&owner);
    pool.release(buf, None);
}

#[test]
#[should_panic(expected = "released into a foreign pool")]
fn test_release_into_foreign_pool_is_fatal() {
    let pool = small_pool(1);
    let other = small_pool(1);

    let buf = pool.lease(None);
    other.release(buf, None);
}

#[test]
fn test_fatal_paths_terminate_the_task() {
    let pool = small_pool(1);
    let owner = std::sync::Arc::new(BufferQueueOwner::new());

    let result = thread::scope(|s| {
        s.spawn(|| {
            let mut buf = pool.lease(None);
            buf.bind(&owner);
            buf.bind(&owner);
        })
        .join()
    });
    assert!(result.is_err());

    // the buffer of the dead task went back to the pool
    assert_eq!(pool.free_count(), 1);
}

#[test]
fn test_failed_transfer_keeps_quota() {
    let pool = small_pool(2);
    let quota = Quota::limited("cluster", 1);
    let owner = std::sync::Arc::new(BufferQueueOwner::new());

    let result = thread::scope(|s| {
        s.spawn(|| {
            let mut buf = pool.lease(Some(&quota));
            buf.bind(&owner);
            owner.link_dirty(buf.id());
            buf.unbind();
        })
        .join()
    });
    assert!(result.is_err());

    assert_eq!(pool.free_count(), 2);
    assert_eq!(quota.available(), Some(1));
    assert!(pool.try_lease(&quota).is_some());
}

#[test]
fn test_concurrent_lease_release_stress() {
    const THREADS: u64 = 8;
    const ROUNDS: usize = 300;

    let pool = small_pool(4);
    let quota_a = Quota::limited("a", 3);
    let quota_b = Quota::limited("b", 2);
    let unlimited = Quota::Unlimited;
    let owner = std::sync::Arc::new(BufferQueueOwner::new());

    thread::scope(|s| {
        for seed in 0..THREADS {
            let pool = &pool;
            let quotas = [&quota_a, &quota_b, &unlimited];
            let owner = &owner;
            s.spawn(move || {
                let mut rng = SmallRng::seed_from_u64(seed);

                for round in 0..ROUNDS {
                    let quota = quotas[rng.gen_range(0..quotas.len())];

                    let mut buf = if rng.gen_bool(0.2) {
                        match pool.try_lease(quota) {
                            Some(buf) => buf,
                            None => continue,
                        }
                    } else {
                        pool.lease(Some(quota))
                    };

                    // nobody else may touch this slot while we hold it
                    let pattern = (seed as u8) ^ (round as u8);
                    buf.data_mut()[..64].fill(pattern);
                    buf.bind(owner);
                    thread::yield_now();
                    assert!(buf.data()[..64].iter().all(|b| *b == pattern));
                    buf.unbind();

                    pool.release(buf, Some(quota));
                }
            });
        }
    });

    assert_eq!(pool.free_count(), 4);
    assert_eq!(pool.waiting(), 0);
    assert_eq!(quota_a.available(), Some(3));
    assert_eq!(quota_b.available(), Some(2));
    assert_eq!(owner.paging_in_flight(), 0);
}
