use crate::{
    config::EngineConfig,
    error::{ProcessFault, RenderError},
    graph::GraphSnapshot,
    node::{NodeId, ProcessTimeInfo},
    worker::{self, WorkerPool},
};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

const SNAPSHOT_QUEUE_CAPACITY: usize = 4;
const RETIRE_QUEUE_CAPACITY: usize = 16;
pub(crate) const REPORT_QUEUE_CAPACITY: usize = 256;

/// Counters written by the render pool, read by anyone.
#[derive(Debug, Default)]
pub struct RtStats {
    cycles: AtomicU64,
    frames: AtomicU64,
    xruns: AtomicU64,
    faults: AtomicU64,
    dropped_reports: AtomicU64,
    graph_swaps: AtomicU64,
    deferred_swaps: AtomicU64,
    graph_version: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtStatsSnapshot {
    pub cycles: u64,
    pub frames: u64,
    pub xruns: u64,
    pub faults: u64,
    pub dropped_reports: u64,
    pub graph_swaps: u64,
    pub deferred_swaps: u64,
    pub graph_version: u64,
}

impl RtStats {
    pub fn snapshot(&self) -> RtStatsSnapshot {
        RtStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            xruns: self.xruns.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            dropped_reports: self.dropped_reports.load(Ordering::Relaxed),
            graph_swaps: self.graph_swaps.load(Ordering::Relaxed),
            deferred_swaps: self.deferred_swaps.load(Ordering::Relaxed),
            graph_version: self.graph_version.load(Ordering::Relaxed),
        }
    }

    pub fn add_xrun(&self) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped_report(&self) {
        self.dropped_reports.fetch_add(1, Ordering::Relaxed);
    }
}

/// Something the render pool wants the control thread to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtReport {
    Fault {
        node: NodeId,
        graph_version: u64,
        fault: ProcessFault,
    },
    Xrun {
        frame: u64,
    },
    GraphAdopted {
        version: u64,
    },
}

/// Control-thread end of the report rings, one ring per render thread.
#[derive(Debug)]
pub struct ReportDrain {
    consumers: Vec<Consumer<RtReport>>,
}

impl ReportDrain {
    pub fn new(consumers: Vec<Consumer<RtReport>>) -> Self {
        Self { consumers }
    }

    pub fn drain(&mut self, mut f: impl FnMut(RtReport)) -> usize {
        let mut count = 0;
        for consumer in &mut self.consumers {
            while let Ok(report) = consumer.pop() {
                f(report);
                count += 1;
            }
        }
        count
    }
}

pub(crate) fn push_report(reports: &mut Producer<RtReport>, stats: &RtStats, report: RtReport) {
    if reports.push(report).is_err() {
        stats.add_dropped_report();
    }
}

/// Control-thread end of the snapshot handoff.
#[derive(Debug)]
pub struct SnapshotPublisher {
    outgoing: Producer<Arc<GraphSnapshot>>,
    retired: Consumer<Arc<GraphSnapshot>>,
    backlog: Option<Arc<GraphSnapshot>>,
}

impl SnapshotPublisher {
    /// Queues `snapshot` for the render thread. When the queue is full the
    /// snapshot waits in a backlog slot and replaces any older one there.
    pub fn publish(&mut self, snapshot: Arc<GraphSnapshot>) {
        self.backlog = Some(snapshot);
        self.flush_backlog();
    }

    fn flush_backlog(&mut self) {
        if let Some(snapshot) = self.backlog.take()
            && let Err(rtrb::PushError::Full(snapshot)) = self.outgoing.push(snapshot)
        {
            self.backlog = Some(snapshot);
        }
    }

    /// Drops snapshots the render thread has let go of. Returns how many.
    pub fn collect_garbage(&mut self) -> usize {
        let mut count = 0;
        while let Ok(snapshot) = self.retired.pop() {
            drop(snapshot);
            count += 1;
        }
        self.flush_backlog();
        count
    }

    pub fn has_backlog(&self) -> bool {
        self.backlog.is_some()
    }
}

/// The audio callback side: adopts published snapshots and runs them.
pub struct Renderer {
    current: Arc<GraphSnapshot>,
    incoming: Consumer<Arc<GraphSnapshot>>,
    retired: Producer<Arc<GraphSnapshot>>,
    reports: Producer<RtReport>,
    pool: Option<WorkerPool>,
    stats: Arc<RtStats>,
    block_length: usize,
    frame: u64,
}

/// Creates both ends of the render handoff. Worker threads beyond the
/// render thread itself are started here.
pub fn create(
    config: &EngineConfig,
    stats: Arc<RtStats>,
) -> Result<(SnapshotPublisher, Renderer, ReportDrain), RenderError> {
    let (outgoing, incoming) = RingBuffer::new(SNAPSHOT_QUEUE_CAPACITY);
    let (retired_tx, retired_rx) = RingBuffer::new(RETIRE_QUEUE_CAPACITY);
    let (reports, report_rx) = RingBuffer::new(REPORT_QUEUE_CAPACITY);
    let mut consumers = vec![report_rx];
    let extra = config.threads().saturating_sub(1);
    let pool = if extra > 0 {
        let (pool, worker_reports) =
            WorkerPool::spawn(extra, stats.clone(), config.realtime_priority)?;
        consumers.extend(worker_reports);
        Some(pool)
    } else {
        None
    };
    let renderer = Renderer {
        current: Arc::new(GraphSnapshot::default()),
        incoming,
        retired: retired_tx,
        reports,
        pool,
        stats,
        block_length: config.block_length,
        frame: 0,
    };
    let publisher = SnapshotPublisher {
        outgoing,
        retired: retired_rx,
        backlog: None,
    };
    Ok((publisher, renderer, ReportDrain::new(consumers)))
}

impl Renderer {
    pub fn stats(&self) -> Arc<RtStats> {
        self.stats.clone()
    }

    pub fn graph_version(&self) -> u64 {
        self.current.version()
    }

    pub fn threads(&self) -> usize {
        self.pool.as_ref().map(|p| p.threads()).unwrap_or(1)
    }

    /// Switches to the newest published snapshot. Replaced snapshots go
    /// back to the control thread; if there is no room to send one back,
    /// the switch waits for a later cycle.
    fn adopt_newest(&mut self) {
        while !self.incoming.is_empty() {
            if self.retired.is_full() {
                self.stats.deferred_swaps.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let Ok(next) = self.incoming.pop() else {
                return;
            };
            let old = std::mem::replace(&mut self.current, next);
            if let Err(rtrb::PushError::Full(old)) = self.retired.push(old) {
                // Checked above; keep the old graph rather than free it here.
                self.current = old;
                return;
            }
            let version = self.current.version();
            self.stats.graph_swaps.fetch_add(1, Ordering::Relaxed);
            self.stats.graph_version.store(version, Ordering::Relaxed);
            push_report(
                &mut self.reports,
                &self.stats,
                RtReport::GraphAdopted { version },
            );
        }
    }

    /// Runs one audio cycle of `nframes` frames. Cycles longer than the
    /// block length run as consecutive blocks.
    pub fn process_cycle(&mut self, nframes: usize) {
        self.adopt_newest();
        let mut done = 0;
        while done < nframes {
            let n = (nframes - done).min(self.block_length);
            let time = ProcessTimeInfo {
                g_start_frame: self.frame,
                local_offset: 0,
                nframes: n as u32,
            };
            match &mut self.pool {
                Some(pool) => pool.run(&self.current, &time, &mut self.reports),
                None => worker::run_levels(
                    &self.current,
                    &time,
                    0,
                    1,
                    &mut self.reports,
                    &self.stats,
                    None,
                ),
            }
            self.frame += n as u64;
            done += n;
        }
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        self.stats.frames.fetch_add(nframes as u64, Ordering::Relaxed);
    }

    /// Records an XRUN detected by the backend.
    pub fn report_xrun(&mut self) {
        self.stats.add_xrun();
        let frame = self.frame;
        push_report(&mut self.reports, &self.stats, RtReport::Xrun { frame });
    }
}
