//! Fixed-size OS thread pool for blocking driver calls.
//!
//! Application code may run on cooperatively scheduled tasks; blocking
//! MySQL work is pushed onto these dedicated threads and completion flows
//! back through a channel. Threads can be pinned to a CPU core group
//! parsed from a spec such as `"1,5-7"`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone)]
pub struct WorkerPoolOption {
    pub thread_num: usize,
    /// Core group spec, e.g. `"1,5-7"`. Empty disables pinning.
    pub bind_core: String,
}

impl Default for WorkerPoolOption {
    fn default() -> Self {
        Self {
            thread_num: 4,
            bind_core: String::new(),
        }
    }
}

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    stopping: AtomicBool,
}

/// The worker pool. `stop` drains nothing: queued jobs still run before
/// the threads exit; `join` waits for them.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(option: WorkerPoolOption) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stopping: AtomicBool::new(false),
        });

        let cores = pinned_cores(&option.bind_core);
        let thread_num = option.thread_num.max(1);
        let mut handles = Vec::with_capacity(thread_num);
        for index in 0..thread_num {
            let shared = Arc::clone(&shared);
            let core = if cores.is_empty() {
                None
            } else {
                Some(cores[index % cores.len()])
            };
            handles.push(
                std::thread::Builder::new()
                    .name(format!("mysql-worker-{index}"))
                    .spawn(move || {
                        if let Some(core) = core {
                            core_affinity::set_for_current(core);
                        }
                        worker_loop(&shared);
                    })
                    .expect("spawn worker thread"),
            );
        }

        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    /// Queue a job. Returns `false` once the pool is stopping.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.shared.stopping.load(Ordering::Acquire) {
            return false;
        }
        self.shared.queue.lock().push_back(Box::new(job));
        self.shared.available.notify_one();
        true
    }

    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.available.notify_all();
    }

    /// Wait for every worker to finish its remaining jobs and exit.
    pub fn join(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock();
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                if shared.stopping.load(Ordering::Acquire) {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };

        match job {
            Some(job) => job(),
            None => return,
        }
    }
}

/// Parse a core-group spec such as `"1,5-7"` into `[1, 5, 6, 7]`.
/// Malformed segments are skipped with a warning.
pub fn parse_core_list(spec: &str) -> Vec<usize> {
    let mut cores = Vec::new();
    for segment in spec.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if let Some((start, end)) = segment.split_once('-') {
            match (start.trim().parse::<usize>(), end.trim().parse::<usize>()) {
                (Ok(start), Ok(end)) if start <= end => cores.extend(start..=end),
                _ => tracing::warn!(segment, "ignoring malformed core range"),
            }
        } else {
            match segment.parse::<usize>() {
                Ok(core) => cores.push(core),
                Err(_) => tracing::warn!(segment, "ignoring malformed core id"),
            }
        }
    }
    cores
}

/// Resolve the spec against the cores present on this machine.
fn pinned_cores(spec: &str) -> Vec<core_affinity::CoreId> {
    let wanted = parse_core_list(spec);
    if wanted.is_empty() {
        return Vec::new();
    }
    let Some(available) = core_affinity::get_core_ids() else {
        tracing::warn!("core affinity unavailable, pinning disabled");
        return Vec::new();
    };
    let cores: Vec<_> = available
        .into_iter()
        .filter(|core| wanted.contains(&core.id))
        .collect();
    if cores.is_empty() {
        tracing::warn!(spec, "no requested cores present, pinning disabled");
    }
    cores
}
