//! Per-call timing and compression accounting.

use std::time::Instant;

/// Seconds spent in each phase of one collective call.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhaseTimes {
    pub total: f64,
    pub pipeline: f64,
    pub send: f64,
    pub recv: f64,
    pub sendrecv: f64,
    pub merge: f64,
}

/// What one rank did during one collective call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReduceStats {
    pub times: PhaseTimes,
    /// Dense element count of the reduced vector.
    pub elements: usize,
    /// Encoded slots shipped downstream; equals `elements` when running
    /// uncompressed.
    pub slots_sent: usize,
    /// Encoded slots taken in from upstream.
    pub slots_received: usize,
}

impl ReduceStats {
    pub fn new(elements: usize) -> Self {
        Self { elements, ..Self::default() }
    }

    /// Fraction of the dense volume actually sent, in percent.
    pub fn send_ratio(&self) -> f64 {
        100.0 * self.slots_sent as f64 / self.elements.max(1) as f64
    }

    pub fn recv_ratio(&self) -> f64 {
        100.0 * self.slots_received as f64 / self.elements.max(1) as f64
    }

    /// Emit the timing, bandwidth and compression lines to the log sink.
    /// A missing logger simply swallows them.
    pub fn log(&self, rank: usize, label: &str) {
        let t = &self.times;
        log::debug!(
            "{rank}: {label}: T  {:.6}  {:.6}  {:.6}  {:.6}  {:.6}  {:.6}",
            t.total, t.pipeline, t.send, t.recv, t.sendrecv, t.merge
        );

        let bytes = (self.elements * std::mem::size_of::<f64>()) as f64;
        let bw = |secs: f64| if secs > 0.0 { bytes / secs / 1e6 } else { 0.0 };
        log::debug!(
            "{rank}: {label}: B  {:.2}  {:.2}  {:.2}  {:.2}  {:.2}  {:.2}",
            bw(t.total), bw(t.pipeline), bw(t.send), bw(t.recv), bw(t.sendrecv), bw(t.merge)
        );

        if self.slots_sent != self.elements || self.slots_received != self.elements {
            log::info!(
                "{rank}: {label}: R  {}  {:.1}%  {}  {:.1}%",
                self.slots_sent, self.send_ratio(), self.slots_received, self.recv_ratio()
            );
        }
    }
}

/// Run `f`, adding its wall time to `acc`.
#[inline]
pub(crate) fn timed<R>(acc: &mut f64, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let out = f();
    *acc += start.elapsed().as_secs_f64();
    out
}
