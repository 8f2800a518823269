use crate::{
    error::RenderError,
    graph::{GraphSnapshot, ScheduledNode},
    mutex::UnsafeMutex,
    node::ProcessTimeInfo,
    port::{Port, PortType},
    render::{REPORT_QUEUE_CAPACITY, RtReport, RtStats, push_report},
};
#[cfg(unix)]
use nix::libc;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use tracing::{debug, warn};

#[cfg(unix)]
const RT_POLICY: i32 = libc::SCHED_FIFO;
const RT_PRIORITY_WORKER: i32 = 18;

#[derive(Debug, Default)]
struct CycleJob {
    snapshot: Option<Arc<GraphSnapshot>>,
    time: ProcessTimeInfo,
    quit: bool,
}

/// Render helpers that run the graph together with the render thread.
///
/// All threads meet at a start barrier, then at one barrier after every
/// level. Within a level, worker `w` of `n` takes the nodes whose position
/// in the level is `w` modulo `n`. The render thread is worker 0.
pub struct WorkerPool {
    job: Arc<UnsafeMutex<CycleJob>>,
    barrier: Arc<Barrier>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<RtStats>,
    threads: usize,
}

impl WorkerPool {
    pub fn spawn(
        extra: usize,
        stats: Arc<RtStats>,
        realtime: bool,
    ) -> Result<(Self, Vec<Consumer<RtReport>>), RenderError> {
        let threads = extra + 1;
        let job = Arc::new(UnsafeMutex::new(CycleJob::default()));
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = vec![];
        let mut consumers = vec![];
        for id in 1..threads {
            let (reports, report_rx) = RingBuffer::new(REPORT_QUEUE_CAPACITY);
            let name = format!("patchbay-render-{id}");
            let job = job.clone();
            let barrier = barrier.clone();
            let stats = stats.clone();
            let thread_name = name.clone();
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    if realtime && let Err(e) = configure_rt_thread(&thread_name, RT_PRIORITY_WORKER) {
                        warn!("{e}");
                    }
                    work(id, threads, job, barrier, reports, stats);
                })
                .map_err(|source| RenderError::Spawn { name, source })?;
            handles.push(handle);
            consumers.push(report_rx);
        }
        debug!("render pool started with {threads} threads");
        Ok((
            Self {
                job,
                barrier,
                handles,
                stats,
                threads,
            },
            consumers,
        ))
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs one block on all threads. Returns when every level is done.
    pub fn run(
        &mut self,
        snapshot: &Arc<GraphSnapshot>,
        time: &ProcessTimeInfo,
        reports: &mut Producer<RtReport>,
    ) {
        {
            let job = self.job.lock();
            job.snapshot = Some(snapshot.clone());
            job.time = *time;
        }
        self.barrier.wait();
        run_levels(
            snapshot,
            time,
            0,
            self.threads,
            reports,
            &self.stats,
            Some(&self.barrier),
        );
        // Workers read the job until they pass this barrier, even when the
        // graph has no levels.
        self.barrier.wait();
        // The render thread still holds the snapshot, so this only
        // releases a reference.
        self.job.lock().snapshot = None;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.job.lock().quit = true;
        self.barrier.wait();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn work(
    id: usize,
    threads: usize,
    job: Arc<UnsafeMutex<CycleJob>>,
    barrier: Arc<Barrier>,
    mut reports: Producer<RtReport>,
    stats: Arc<RtStats>,
) {
    loop {
        barrier.wait();
        let cycle = job.get();
        if cycle.quit {
            return;
        }
        if let Some(snapshot) = cycle.snapshot.as_deref() {
            let time = cycle.time;
            run_levels(
                snapshot,
                &time,
                id,
                threads,
                &mut reports,
                &stats,
                Some(&barrier),
            );
        }
        barrier.wait();
    }
}

/// Walks the levels of `snapshot` as worker `worker` of `threads`.
pub(crate) fn run_levels(
    snapshot: &GraphSnapshot,
    time: &ProcessTimeInfo,
    worker: usize,
    threads: usize,
    reports: &mut Producer<RtReport>,
    stats: &RtStats,
    barrier: Option<&Barrier>,
) {
    for level in snapshot.levels() {
        for (i, &index) in level.iter().enumerate() {
            if i % threads != worker {
                continue;
            }
            if let Some(node) = snapshot.node(index) {
                run_node(node, time, snapshot.version(), reports, stats);
            }
        }
        if let Some(barrier) = barrier {
            barrier.wait();
        }
    }
}

/// Resets a port for the block: samples are zeroed and event ports take
/// over their queued events.
fn prepare_port(port: &mut Port, time: &ProcessTimeInfo) {
    match port.port_type() {
        PortType::Audio | PortType::Cv => {
            port.clear_buffer(time.local_offset as usize, time.nframes as usize)
        }
        PortType::Event => {
            if let Some(events) = port.events_mut() {
                events.dequeue();
            }
        }
        PortType::Control => {}
    }
}

/// Prepares and mixes the node's ports, then processes it. A failing node
/// leaves silence on its outputs.
pub(crate) fn run_node(
    scheduled: &ScheduledNode,
    time: &ProcessTimeInfo,
    graph_version: u64,
    reports: &mut Producer<RtReport>,
    stats: &RtStats,
) {
    let offset = time.local_offset as usize;
    let nframes = time.nframes as usize;
    for feed in &scheduled.feeds {
        let port = feed.port.lock();
        prepare_port(port, time);
        port.mix_sources(&feed.sources, offset, nframes);
    }
    for port in &scheduled.node.outputs {
        prepare_port(port.lock(), time);
    }
    let result = scheduled.node.processor.lock().process(time);
    if let Err(fault) = result {
        for port in &scheduled.node.outputs {
            port.lock().clear_buffer(offset, nframes);
        }
        stats.add_fault();
        push_report(
            reports,
            stats,
            RtReport::Fault {
                node: scheduled.node.id,
                graph_version,
                fault,
            },
        );
    }
    for port in &scheduled.node.outputs {
        port.get().update_peak(offset, nframes);
    }
}

/// Moves the calling thread to the realtime scheduling class.
pub fn configure_rt_thread(name: &str, priority: i32) -> Result<(), String> {
    #[cfg(unix)]
    {
        let thread = unsafe { libc::pthread_self() };
        let param = unsafe {
            let mut p = std::mem::zeroed::<libc::sched_param>();
            p.sched_priority = priority;
            p
        };
        let rc = unsafe { libc::pthread_setschedparam(thread, RT_POLICY, &param) };
        if rc != 0 {
            return Err(format!(
                "pthread_setschedparam({}, prio {}) failed with errno {}",
                name, priority, rc
            ));
        }

        let mut actual_policy = 0_i32;
        let mut actual_param = unsafe { std::mem::zeroed::<libc::sched_param>() };
        let rc =
            unsafe { libc::pthread_getschedparam(thread, &mut actual_policy, &mut actual_param) };
        if rc != 0 {
            return Err(format!(
                "pthread_getschedparam({}) failed with errno {}",
                name, rc
            ));
        }
        if actual_policy != RT_POLICY || actual_param.sched_priority != priority {
            return Err(format!(
                "realtime verification failed for {}: policy {}, prio {}",
                name, actual_policy, actual_param.sched_priority
            ));
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = name;
        let _ = priority;
        Err("Realtime thread priority is not supported on this platform".to_string())
    }
}
