mod common;

use self::common::init;

use selfeval_sandbox::CpuPool;

use std::collections::HashSet;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use nix::fcntl::{flock, FlockArg};

#[test]
fn hands_out_each_cpu_once() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let pool = CpuPool::with_cpus(dir.path().join("pool"), &[0, 2, 4])?;

    let mut got = HashSet::new();
    while let Some(id) = pool.acquire() {
        assert!(got.insert(id), "cpu {} handed out twice", id);
    }
    assert_eq!(got, [0, 2, 4].iter().copied().collect::<HashSet<_>>());

    pool.release(2);
    assert_eq!(pool.acquire(), Some(2));
    assert_eq!(pool.acquire(), None);
    Ok(())
}

#[test]
fn existing_pool_is_not_reseeded() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pool");
    let first = CpuPool::with_cpus(&path, &[0, 1])?;
    assert_eq!(first.acquire(), Some(1));

    let second = CpuPool::with_cpus(&path, &[0, 1, 2, 3])?;
    assert_eq!(second.available()?, vec![0]);
    Ok(())
}

#[test]
fn contention_only_shrinks_the_pool() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pool");
    let pool = CpuPool::with_cpus(&path, &[0, 1, 2, 3])?;

    let id = pool.acquire().unwrap();

    let holder = File::open(&path)?;
    flock(holder.as_raw_fd(), FlockArg::LockExclusive)?;
    assert_eq!(pool.acquire(), None);
    pool.release(id);
    flock(holder.as_raw_fd(), FlockArg::Unlock)?;

    let left: HashSet<u32> = pool.available()?.into_iter().collect();
    assert!(!left.contains(&id));
    assert_eq!(left.len(), 3);
    assert!(left.is_subset(&[0, 1, 2, 3].iter().copied().collect()));
    Ok(())
}

#[test]
fn concurrent_holders_never_share() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let original: HashSet<u32> = (0..4).collect();
    let pool = CpuPool::with_cpus(dir.path().join("pool"), &[0, 1, 2, 3])?;
    let live = Arc::new(Mutex::new(HashSet::new()));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let live = Arc::clone(&live);
            thread::spawn(move || {
                for _ in 0..50 {
                    if let Some(id) = pool.acquire() {
                        assert!(live.lock().unwrap().insert(id), "cpu {} is shared", id);
                        thread::yield_now();
                        live.lock().unwrap().remove(&id);
                        pool.release(id);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let left = pool.available()?;
    let unique: HashSet<u32> = left.iter().copied().collect();
    assert_eq!(unique.len(), left.len());
    assert!(unique.is_subset(&original));
    Ok(())
}
