//! Backend: the single consumer thread and its lifecycle.
//!
//! The consumer drains every producer queue in timestamp order, renders each
//! record through its embedded decoder into the output stage, and
//! periodically flushes the stage to the file sink. Queue access on the
//! emission path is lock-free; the registry mutex is only taken when one of
//! the publish flags is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock;
use crate::codec::{ArgPack, DecodeFn, Metadata, METADATA_SIZE};
use crate::error::Error;
use crate::level::Level;
use crate::registry::{self, QueueConfig, QueueWrapper};
use crate::sink::FileSink;
use crate::stage::OutputStage;

/// Below this much free stage space the consumer flushes to the sink before
/// emitting (with no sink the stage simply grows).
const MIN_STAGE_SPACE: usize = 32;

/// Idle sleep between polls when no queue had a record.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Backend construction parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log directory. `None` runs without a file sink: formatted output
    /// accumulates in the stage and is read through
    /// [`Backend::read_output`].
    pub dir: Option<std::path::PathBuf>,
    /// First ring capacity of each per-thread queue.
    pub initial_queue_capacity: usize,
    /// Largest single queue node; a full queue at this capacity drops
    /// records.
    pub max_node_capacity: usize,
    /// Initial output stage capacity.
    pub stage_capacity: usize,
    /// Size threshold for file rotation.
    pub max_file_size: u64,
    /// Pin the consumer thread to this CPU.
    pub cpu_affinity: Option<usize>,
    /// Flush the stage to the sink every this many work iterations.
    pub flush_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: Some("./logs".into()),
            initial_queue_capacity: 4096,
            max_node_capacity: 64 * 1024 * 1024,
            stage_capacity: 64 * 1024,
            max_file_size: 100 * 1024 * 1024,
            cpu_affinity: None,
            flush_interval: 50_000,
        }
    }
}

/// Only one backend may own the consumer role at a time.
static BACKEND_GATE: AtomicBool = AtomicBool::new(false);

struct Shared {
    running: AtomicBool,
    stage: Mutex<OutputStage>,
    sink: Mutex<Option<FileSink>>,
    cpu_affinity: Option<usize>,
    flush_interval: u32,
}

/// The logging backend.
///
/// Owns the consumer thread; producer queues live in the process-wide
/// registry so records enqueued before [`start`](Backend::start) (or between
/// a stop and the next start) are drained by the next running consumer.
pub struct Backend {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Backend {
    /// Builds a backend: opens the sink (if a directory is configured),
    /// installs the queue construction parameters, and claims the
    /// single-backend gate.
    pub fn new(config: Config) -> Result<Self, Error> {
        if BACKEND_GATE.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        // Pay the clock calibration here, not on the first hot-path call.
        clock::calibrate();

        registry::GLOBAL.set_queue_config(QueueConfig {
            initial_capacity: config.initial_queue_capacity,
            max_node_capacity: config.max_node_capacity,
        });

        let sink = match &config.dir {
            Some(dir) => match FileSink::open(dir, config.max_file_size) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    BACKEND_GATE.store(false, Ordering::Release);
                    return Err(e);
                }
            },
            None => None,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                stage: Mutex::new(OutputStage::new(config.stage_capacity)),
                sink: Mutex::new(sink),
                cpu_affinity: config.cpu_affinity,
                flush_interval: config.flush_interval.max(1),
            }),
            consumer: Mutex::new(None),
        })
    }

    /// Spawns the consumer thread. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("deferlog-consumer".into())
            .spawn(move || consumer_loop(&shared))
            .expect("failed to spawn log consumer thread");
        *self.consumer.lock() = Some(handle);
    }

    /// Signals the consumer, joins it, and lets its final phase drain every
    /// queue and flush the sink. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = self.consumer.lock().take() {
            let _ = handle.join();
        }
    }

    /// Records dropped because a queue hit its capacity cap.
    pub fn dropped_count(&self) -> u64 {
        registry::GLOBAL.dropped_count()
    }

    pub fn reset_dropped_count(&self) {
        registry::GLOBAL.reset_dropped_count()
    }

    /// Test hook: drains up to `out.len()` bytes of formatted output from
    /// the stage. Only meaningful without a file sink.
    pub fn read_output(&self, out: &mut [u8]) -> usize {
        self.shared.stage.lock().read(out)
    }

    /// Test hook: whether the stage holds any formatted output.
    pub fn output_empty(&self) -> bool {
        self.shared.stage.lock().is_empty()
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.stop();
        BACKEND_GATE.store(false, Ordering::Release);
    }
}

/// Consumer-thread state: the drain snapshot and the reclamation batch
/// awaiting its second phase.
struct Consumer<'a> {
    shared: &'a Shared,
    snapshot: Arc<Vec<Arc<QueueWrapper>>>,
    pending_deletion: Vec<Arc<QueueWrapper>>,
}

impl<'a> Consumer<'a> {
    fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            snapshot: Arc::new(Vec::new()),
            pending_deletion: Vec::new(),
        }
    }

    /// Two relaxed flag loads on the hot path; the registry mutex is taken
    /// only when one of them is raised.
    fn refresh_if_pending(&mut self) {
        if registry::GLOBAL.add_pending() {
            self.snapshot = registry::GLOBAL.refresh_add();
        }

        if registry::GLOBAL.delete_pending() {
            // Second phase for the previous batch: no snapshot references it
            // anymore, so the wrappers are destroyed here.
            self.pending_deletion.clear();

            let (snapshot, retired) = registry::GLOBAL.refresh_delete();
            self.snapshot = snapshot;
            self.pending_deletion = retired;
        }
    }

    /// Emits the record with the smallest timestamp across all queues.
    /// Returns false when every queue is empty.
    fn emit_one(&mut self) -> bool {
        // Min-timestamp scan over the snapshot heads; ties break by
        // snapshot position, i.e. wrapper insertion order.
        let mut selected: Option<(usize, u64)> = None;
        for (index, wrapper) in self.snapshot.iter().enumerate() {
            if let Some(header) = wrapper.queue.peek_read(METADATA_SIZE) {
                let timestamp = Metadata::read_from(header).timestamp;
                if selected.map_or(true, |(_, best)| timestamp < best) {
                    selected = Some((index, timestamp));
                }
            }
        }

        let Some((index, _)) = selected else {
            return false;
        };
        let wrapper = &self.snapshot[index];

        let mut stage = self.shared.stage.lock();
        if stage.free_space() < MIN_STAGE_SPACE {
            if let Some(sink) = self.shared.sink.lock().as_mut() {
                stage.flush_to(sink);
            }
            // Without a sink the stage grows on append.
        }

        // Re-peek and copy the header: the slice behind the earlier peek
        // must not be trusted across other queue operations.
        let Some(header) = wrapper.queue.peek_read(METADATA_SIZE) else {
            return false;
        };
        let meta = Metadata::read_from(header);

        let record_size = METADATA_SIZE + meta.args_size as usize;
        let Some(record) = wrapper.queue.peek_read(record_size) else {
            // Args not visible yet; the record stays queued for next time.
            return false;
        };
        let args = &record[METADATA_SIZE..];

        let mut writer = stage.writer();
        writer.append_str(meta.level.tag());
        writer.append_bytes(b" ");
        let mut time_buf = [0u8; clock::TIME_WIDTH];
        writer.append_str(clock::format_time(meta.timestamp, &mut time_buf));
        writer.append_bytes(b" ");
        (meta.decoder)(args, &mut writer);
        writer.append_bytes(b"\n");

        wrapper.queue.commit_read(record_size);

        if wrapper.is_orphaned() && wrapper.queue.is_empty() {
            registry::GLOBAL.raise_delete_flag();
        }

        true
    }

    fn flush(&mut self) {
        let mut stage = self.shared.stage.lock();
        if let Some(sink) = self.shared.sink.lock().as_mut() {
            stage.flush_to(sink);
            sink.sync();
        }
    }
}

fn consumer_loop(shared: &Shared) {
    if let Some(cpu) = shared.cpu_affinity {
        pin_to_cpu(cpu);
    }

    let mut consumer = Consumer::new(shared);
    let mut work_since_flush: u32 = 0;

    while shared.running.load(Ordering::Relaxed) {
        consumer.refresh_if_pending();

        if consumer.emit_one() {
            work_since_flush += 1;
            if work_since_flush >= shared.flush_interval {
                consumer.flush();
                work_since_flush = 0;
            }
        } else {
            // Idle: make whatever is staged visible, then back off.
            if work_since_flush > 0 {
                consumer.flush();
                work_since_flush = 0;
            }
            thread::sleep(IDLE_SLEEP);
        }
    }

    // Final drain: pick up late publishes, then empty every queue.
    loop {
        consumer.refresh_if_pending();
        if !consumer.emit_one() {
            consumer.refresh_if_pending();
            if !consumer.emit_one() {
                break;
            }
        }
    }
    consumer.flush();
}

#[cfg(target_os = "linux")]
fn pin_to_cpu(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_cpu: usize) {}

/// Hot-path entry invoked by the call-site macros.
///
/// The timestamp is sampled before the reservation so emission order
/// reflects call time rather than queue contention. A failed reservation
/// (queue at its capacity cap, or thread-local storage torn down) counts the
/// record as dropped; nothing blocks and nothing retries.
#[inline]
pub fn log_record<P: ArgPack>(level: Level, decoder: DecodeFn, args: &P) {
    let timestamp = clock::now_ns();
    let args_size = args.encoded_size();
    let record_size = METADATA_SIZE + args_size;

    let committed = registry::with_thread_queue(|queue| {
        match queue.reserve_write(record_size) {
            Some(buf) => {
                Metadata {
                    timestamp,
                    decoder,
                    args_size: args_size as u32,
                    level,
                }
                .write_to(buf);
                args.encode(&mut buf[METADATA_SIZE..]);
                queue.commit_write(record_size);
                true
            }
            None => false,
        }
    });

    if committed != Some(true) {
        registry::GLOBAL.note_dropped();
    }
}
