use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};

pub const DEFAULT_POOL_PATH: &str = "/tmp/selfeval-cpu-manage-pipe";

const RECORD: u64 = 4;
const LOCK_RETRY: u32 = 3;
const LOCK_BACKOFF: Duration = Duration::from_millis(5);

/// A free-list of CPU ids shared by every judge process on the host.
///
/// The list is a file of 4-byte big-endian records used as a stack. Each
/// operation opens the file, takes a non-blocking exclusive `flock` with a
/// bounded number of retries and pops or pushes one record. A crash between
/// pop and push loses the id; the file never gains ids nobody released.
#[derive(Debug, Clone)]
pub struct CpuPool {
    path: PathBuf,
}

impl CpuPool {
    /// Opens the pool at `path`, seeding it from the host topology if the
    /// file does not exist yet.
    pub fn new(path: impl Into<PathBuf>, logical: bool) -> io::Result<Self> {
        let cpus = if logical {
            logical_cpus()
        } else {
            physical_cpus()
        };
        Self::with_cpus(path, &cpus)
    }

    pub fn with_cpus(path: impl Into<PathBuf>, cpus: &[u32]) -> io::Result<Self> {
        let path = path.into();
        if !path.exists() {
            seed(&path, cpus)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pops a free CPU id. `None` when the pool is empty or stays locked.
    pub fn acquire(&self) -> Option<u32> {
        match self.locked(pop) {
            Ok(Some(id)) => {
                debug!("cpu {} acquired", id);
                Some(id)
            }
            Ok(None) => None,
            Err(err) => {
                debug!("cpu pool {} unavailable: {}", self.path.display(), err);
                None
            }
        }
    }

    /// Pushes `id` back. On failure the id is dropped from the pool.
    pub fn release(&self, id: u32) {
        match self.locked(|file| push(file, id)) {
            Ok(()) => debug!("cpu {} released", id),
            Err(err) => warn!(
                "cpu {} is lost from pool {}: {}",
                id,
                self.path.display(),
                err
            ),
        }
    }

    /// Snapshot of the free ids, bottom of the stack first.
    pub fn available(&self) -> io::Result<Vec<u32>> {
        self.locked(|file| {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            Ok(buf
                .chunks_exact(RECORD as usize)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect())
        })
    }

    fn locked<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let fd = file.as_raw_fd();

        let mut retry = LOCK_RETRY;
        loop {
            match flock(fd, FlockArg::LockExclusiveNonblock) {
                Ok(()) => break,
                Err(Errno::EAGAIN) | Err(Errno::EINTR) if retry > 0 => {
                    retry -= 1;
                    thread::sleep(LOCK_BACKOFF);
                }
                Err(errno) => return Err(errno.into()),
            }
        }

        let _unlock = scopeguard::guard(fd, |fd| {
            let _ = flock(fd, FlockArg::Unlock);
        });
        f(&mut file)
    }
}

/// Publishes a complete pool file at `path` unless someone else did first.
fn seed(path: &Path, cpus: &[u32]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = tempfile::Builder::new()
        .prefix(".selfeval-cpu-")
        .permissions(fs::Permissions::from_mode(0o666))
        .tempfile_in(dir)?;
    let mut buf = Vec::with_capacity(cpus.len() * RECORD as usize);
    for id in cpus {
        buf.extend_from_slice(&id.to_be_bytes());
    }
    file.write_all(&buf)?;

    match file.persist_noclobber(path) {
        Ok(_) => {
            debug!("cpu pool {} seeded with {:?}", path.display(), cpus);
            Ok(())
        }
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err.error),
    }
}

fn pop(file: &mut File) -> io::Result<Option<u32>> {
    let len = file.metadata()?.len();
    let whole = len - len % RECORD;
    if whole < RECORD {
        if whole != len {
            file.set_len(whole)?;
        }
        return Ok(None);
    }
    let at = whole - RECORD;
    file.seek(SeekFrom::Start(at))?;
    let mut buf = [0; RECORD as usize];
    file.read_exact(&mut buf)?;
    file.set_len(at)?;
    Ok(Some(u32::from_be_bytes(buf)))
}

fn push(file: &mut File, id: u32) -> io::Result<()> {
    let len = file.metadata()?.len();
    let whole = len - len % RECORD;
    if whole != len {
        // torn record from a crashed writer
        file.set_len(whole)?;
    }
    file.seek(SeekFrom::Start(whole))?;
    file.write_all(&id.to_be_bytes())
}

pub fn logical_cpu_count() -> u32 {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if n < 1 {
        1
    } else {
        n as u32
    }
}

pub fn logical_cpus() -> Vec<u32> {
    (0..logical_cpu_count()).collect()
}

/// One logical CPU per physical core.
pub fn physical_cpus() -> Vec<u32> {
    let root = Path::new("/sys/devices/system/cpu");
    let mut seen = HashSet::new();
    let mut cpus = Vec::new();
    for cpu in 0..logical_cpu_count() {
        let topology = root.join(format!("cpu{}", cpu)).join("topology");
        let read = |name: &str| -> Option<i64> {
            fs::read_to_string(topology.join(name))
                .ok()?
                .trim()
                .parse()
                .ok()
        };
        let key = match (read("physical_package_id"), read("core_id")) {
            (Some(package), Some(core)) => (package, core),
            _ => (-1, i64::from(cpu)),
        };
        if seen.insert(key) {
            cpus.push(cpu);
        }
    }
    cpus
}
