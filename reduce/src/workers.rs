//! Intra-rank parallel elementwise add.
//!
//! A fixed set of persistent worker threads blocks on a condition variable
//! gated by a per-worker run flag. Dispatch partitions the index range into
//! near-equal contiguous slices, wakes everyone, runs the dispatcher's own
//! last slice inline and then waits for the completion counter. Workers
//! touch strictly disjoint ranges, so the raw-pointer task sharing is
//! race-free by construction.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// `dst[i] += src[i]` over one slice; the serial kernel everything else
/// fans out to.
#[inline]
pub fn add_assign(dst: &mut [f64], src: &[f64]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

#[derive(Clone, Copy)]
struct Task {
    dst: *mut f64,
    src: *const f64,
    count: usize,
}

// Safety: workers only dereference their own disjoint slice of the task.
unsafe impl Send for Task {}

struct State {
    run: Vec<bool>,
    done: usize,
    exit: bool,
    task: Option<Task>,
}

struct Shared {
    state: Mutex<State>,
    start: Condvar,
    finished: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    nthreads: usize,
}

/// Slice bounds of worker `i` out of `n` over `count` elements.
#[inline]
fn slice_bounds(i: usize, n: usize, count: usize) -> (usize, usize) {
    ((i * count) / n, ((i + 1) * count) / n)
}

impl WorkerPool {
    /// Spawn a pool executing adds across `nthreads` slices; `nthreads - 1`
    /// worker threads plus the dispatching thread itself.
    pub fn new(nthreads: usize) -> Self {
        let nthreads = nthreads.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                run: vec![false; nthreads.saturating_sub(1)],
                done: 1,
                exit: false,
                task: None,
            }),
            start: Condvar::new(),
            finished: Condvar::new(),
        });

        let handles = (0..nthreads.saturating_sub(1))
            .map(|idx| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(idx, nthreads, &shared))
            })
            .collect();

        Self { shared, handles, nthreads }
    }

    /// Parallel `dst += src`; returns once every slice is done.
    pub fn add_assign(&self, dst: &mut [f64], src: &[f64]) {
        debug_assert_eq!(dst.len(), src.len());
        let n = self.nthreads;
        if n == 1 || dst.len() < n {
            add_assign(dst, src);
            return;
        }

        let task = Task { dst: dst.as_mut_ptr(), src: src.as_ptr(), count: dst.len() };
        {
            let mut state = self.shared.state.lock().unwrap();
            state.task = Some(task);
            state.done = 1; // the dispatcher's own slice counts as claimed
            state.run.iter_mut().for_each(|r| *r = true);
        }
        self.shared.start.notify_all();

        // last slice runs inline while the workers chew on theirs
        let (lo, hi) = slice_bounds(n - 1, n, dst.len());
        add_assign(&mut dst[lo..hi], &src[lo..hi]);

        let mut state = self.shared.state.lock().unwrap();
        while state.done < n {
            state = self.shared.finished.wait(state).unwrap();
        }
        state.task = None;
    }
}

fn worker_loop(idx: usize, nthreads: usize, shared: &Shared) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            while !state.run[idx] && !state.exit {
                state = shared.start.wait(state).unwrap();
            }
            if state.exit {
                return;
            }
            state.run[idx] = false;
            state.task.expect("run flag set without a task")
        };

        let (lo, hi) = slice_bounds(idx, nthreads, task.count);
        // Safety: [lo, hi) is disjoint from every other worker's range and
        // the dispatcher keeps both buffers alive until `done == nthreads`.
        unsafe {
            let dst = std::slice::from_raw_parts_mut(task.dst.add(lo), hi - lo);
            let src = std::slice::from_raw_parts(task.src.add(lo), hi - lo);
            add_assign(dst, src);
        }

        let mut state = shared.state.lock().unwrap();
        state.done += 1;
        if state.done >= nthreads {
            shared.finished.notify_one();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.exit = true;
        }
        self.shared.start.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_bounds_cover_everything_once() {
        for count in [0usize, 1, 7, 100, 101] {
            for n in [1usize, 2, 3, 8] {
                let mut total = 0;
                for i in 0..n {
                    let (lo, hi) = slice_bounds(i, n, count);
                    assert!(lo <= hi && hi <= count);
                    total += hi - lo;
                }
                assert_eq!(total, count);
                assert_eq!(slice_bounds(0, n, count).0, 0);
                assert_eq!(slice_bounds(n - 1, n, count).1, count);
            }
        }
    }

    #[test]
    fn pool_matches_serial_add() {
        let pool = WorkerPool::new(4);
        for count in [0usize, 3, 4, 1000, 4097] {
            let src: Vec<f64> = (0..count).map(|i| i as f64).collect();
            let mut dst: Vec<f64> = (0..count).map(|i| (i * 2) as f64).collect();
            let mut want = dst.clone();
            add_assign(&mut want, &src);

            pool.add_assign(&mut dst, &src);
            assert_eq!(dst, want, "count={count}");
        }
    }

    #[test]
    fn pool_is_reusable_across_dispatches() {
        let pool = WorkerPool::new(3);
        let src = vec![1.0; 999];
        let mut dst = vec![0.0; 999];
        for _ in 0..50 {
            pool.add_assign(&mut dst, &src);
        }
        assert!(dst.iter().all(|&v| v == 50.0));
    }

    #[test]
    fn single_thread_pool_runs_inline() {
        let pool = WorkerPool::new(1);
        let mut dst = vec![1.0, 2.0];
        pool.add_assign(&mut dst, &[10.0, 20.0]);
        assert_eq!(dst, vec![11.0, 22.0]);
    }
}
