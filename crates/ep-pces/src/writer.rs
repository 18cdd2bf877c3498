//! # Durable Writer & Durability Nexus
//!
//! Sequential-thread stage: appends every sequenced event
//! to the current segment file, fsyncs on a keystone trigger, and
//! exposes `latestDurableSequenceNumber` so the application state
//! machine can gate consensus-round release on durability (spec
//! invariant 3). Runs on a dedicated blocking thread because the
//! fsync it performs is, deliberately, a blocking syscall.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ep_bus::{StageHandle, Wire};
use ep_types::{AncientMode, IntakeError, NonAncientWindow, PcesConfig};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::format::{SegmentFooter, SegmentHeader};
use crate::segment::segment_file_name;
use crate::sequencer::SequencedEvent;

/// Commands accepted by the writer, soldered in strict order by the
/// sequencer and by the event-window-manager / consensus engine.
pub enum WriterCommand {
    Append(SequencedEvent),
    /// Raised when the sequencer has produced the keystone event of a
    /// round: the writer must fsync before the engine is allowed to
    /// release that round (spec invariant 3).
    FlushForKeystone { keystone_sequence: u64 },
    /// Raised when gossip reconnection makes the stream's continuity
    /// unknown; the writer closes the current segment and starts a new
    /// one rather than risk silently bridging a gap.
    Discontinuity { next_sequence: u64 },
    /// Raised as the non-ancient window advances; segments whose
    /// entire ancient-id range falls below this are eligible for
    /// deletion.
    UpdateMinimumAncientIdToStore(u64),
}

/// Handle to the durability gate. Cheap to clone; read from any
/// number of places (the application state machine, tests) without
/// touching the writer's blocking thread.
#[derive(Clone)]
pub struct DurabilityNexus {
    latest: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl DurabilityNexus {
    fn new(starting_sequence: u64) -> Self {
        Self {
            latest: Arc::new(AtomicU64::new(starting_sequence.saturating_sub(1))),
            notify: Arc::new(Notify::new()),
        }
    }

    /// The highest stream sequence number known to be fsynced to disk.
    #[must_use]
    pub fn latest_durable_sequence_number(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    fn advance_to(&self, sequence: u64) {
        let mut current = self.latest.load(Ordering::Acquire);
        while sequence > current {
            match self.latest.compare_exchange_weak(current, sequence, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.notify.notify_waiters();
    }

    /// Waits until `sequence` is durable. The application state machine
    /// uses this to gate a consensus round's release on its keystone
    /// event's durability (spec invariant 3).
    pub async fn wait_until_durable(&self, sequence: u64) {
        loop {
            if self.latest_durable_sequence_number() >= sequence {
                return;
            }
            self.notify.notified().await;
        }
    }
}

struct OpenSegment {
    file: BufWriter<File>,
    path: PathBuf,
    first_seq_num: u64,
    min_ancient_id: u64,
    max_ancient_id: u64,
    record_count: u64,
}

struct WriterState {
    dir: PathBuf,
    ancient_mode: AncientMode,
    max_segment_span: u64,
    min_free_space: u64,
    fsync_retry_backoff: Duration,
    fsync_max_attempts: u32,
    minimum_ancient_id_to_store: u64,
    current: Option<OpenSegment>,
    nexus: DurabilityNexus,
    halted: Arc<std::sync::atomic::AtomicBool>,
}

fn ancient_id_of(mode: AncientMode, generation: u64, birth_round: u64) -> u64 {
    NonAncientWindow::genesis(mode).ancient_identifier(generation, birth_round)
}

impl WriterState {
    fn open_segment(&mut self, first_seq_num: u64) -> Result<(), IntakeError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(segment_file_name(first_seq_num));
        let mut file = BufWriter::new(OpenOptions::new().create(true).write(true).truncate(true).open(&path)?);
        let header = SegmentHeader { first_seq_num, min_ancient_id: self.minimum_ancient_id_to_store, ancient_mode: self.ancient_mode };
        header.write(&mut file)?;
        file.flush()?;
        info!(path = %path.display(), first_seq_num, "pces writer: opened segment");
        self.current = Some(OpenSegment {
            file,
            path,
            first_seq_num,
            min_ancient_id: header.min_ancient_id,
            max_ancient_id: header.min_ancient_id,
            record_count: 0,
        });
        Ok(())
    }

    fn close_segment(&mut self) -> Result<(), IntakeError> {
        let Some(mut segment) = self.current.take() else {
            return Ok(());
        };
        let footer = SegmentFooter { record_count: segment.record_count, max_ancient_id: segment.max_ancient_id };
        footer.write(&mut segment.file)?;
        segment.file.flush()?;
        segment.file.get_ref().sync_all()?;
        info!(path = %segment.path.display(), records = segment.record_count, "pces writer: closed segment");
        Ok(())
    }

    fn check_disk_space(&self) -> Result<(), IntakeError> {
        let available = fs2::available_space(&self.dir).unwrap_or(u64::MAX);
        if available < self.min_free_space {
            return Err(IntakeError::DiskSpaceExhausted { available });
        }
        Ok(())
    }

    fn append(&mut self, sequenced: SequencedEvent) -> Result<(), IntakeError> {
        self.check_disk_space()?;
        if self.current.is_none() {
            self.open_segment(sequenced.stream_sequence_number)?;
        }
        let ancient_id = ancient_id_of(self.ancient_mode, sequenced.event.generation, sequenced.event.birth_round);

        let span_exceeded = self.current.as_ref().map_or(false, |segment| ancient_id.saturating_sub(segment.min_ancient_id) > self.max_segment_span);
        if span_exceeded {
            self.close_segment()?;
            self.open_segment(sequenced.stream_sequence_number)?;
            ep_telemetry::PCES_SEGMENTS_ROTATED.inc();
        }

        let segment = self.current.as_mut().expect("segment opened above");
        crate::format::write_record(&mut segment.file, &sequenced.event, sequenced.stream_sequence_number)?;
        // Flushed to the OS immediately so a concurrent reader (recovery
        // on restart) sees it; durability still requires an explicit
        // fsync on the keystone trigger.
        segment.file.flush()?;
        segment.record_count += 1;
        segment.max_ancient_id = segment.max_ancient_id.max(ancient_id);
        ep_telemetry::PCES_EVENTS_WRITTEN.inc();
        Ok(())
    }

    fn fsync(&mut self) -> Result<(), IntakeError> {
        let Some(segment) = self.current.as_mut() else {
            return Ok(());
        };
        segment.file.flush()?;
        let mut last_err = None;
        for attempt in 1..=self.fsync_max_attempts {
            match segment.file.get_ref().sync_all() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "pces writer: fsync failed, retrying");
                    last_err = Some(e);
                    std::thread::sleep(self.fsync_retry_backoff);
                }
            }
        }
        ep_telemetry::PCES_FSYNC_FAILURES.inc();
        Err(IntakeError::FsyncFailed { attempts: self.fsync_max_attempts, source: last_err.expect("loop ran at least once") })
    }

    fn handle_discontinuity(&mut self, next_sequence: u64) -> Result<(), IntakeError> {
        warn!(next_sequence, "pces writer: discontinuity marker, rotating segment");
        self.close_segment()?;
        self.open_segment(next_sequence)
    }

    fn prune_below_minimum_ancient_id(&mut self) {
        let Ok(segments) = crate::segment::list_segments(&self.dir) else {
            return;
        };
        for path in segments {
            if self.current.as_ref().is_some_and(|s| s.path == path) {
                continue;
            }
            let Ok(recovered) = crate::segment::recover_segment(&path) else {
                continue;
            };
            if recovered.has_footer && recovered.max_ancient_id < self.minimum_ancient_id_to_store {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "pces writer: failed to delete stale segment");
                } else {
                    info!(path = %path.display(), "pces writer: deleted segment below minimum ancient id to store");
                }
            }
        }
    }

    fn halt(&self, reason: &IntakeError) {
        error!(error = %reason, "pces writer: unrecoverable I/O failure, halting node");
        self.halted.store(true, Ordering::SeqCst);
    }
}

/// Everything the wiring layer needs to run the writer.
pub struct WriterStage {
    pub handle: StageHandle,
    pub nexus: DurabilityNexus,
    /// `true` once the writer has hit an unrecoverable I/O error and
    /// halted "I/O error on PCES write: retry, then
    /// transition the node to a halted state".
    pub halted: Arc<std::sync::atomic::AtomicBool>,
}

/// Spawns the writer. `starting_sequence` must equal the sequencer's
/// starting sequence, recovered from the same segment directory.
pub fn spawn(config: &PcesConfig, ancient_mode: AncientMode, starting_sequence: u64, input_queue_capacity: usize) -> (Wire<WriterCommand>, WriterStage) {
    let (inlet, rx, pending) = Wire::channel(input_queue_capacity);
    let nexus = DurabilityNexus::new(starting_sequence);
    let halted = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let state = std::cell::RefCell::new(WriterState {
        dir: config.segment_directory.clone(),
        ancient_mode,
        max_segment_span: config.max_segment_span,
        min_free_space: config.min_free_space,
        fsync_retry_backoff: Duration::from_millis(config.fsync_retry_backoff_ms),
        fsync_max_attempts: config.fsync_max_attempts,
        minimum_ancient_id_to_store: 0,
        current: None,
        nexus: nexus.clone(),
        halted: halted.clone(),
    });

    // `spawn_sequential_thread` requires a bare `Fn`, not `FnMut`; this
    // closure only ever runs on the one blocking thread it was spawned
    // on, so a `RefCell` gives the mutable access without needing a
    // `Mutex` no other thread will ever contend for.
    let handle = ep_bus::spawn_sequential_thread("pces_writer", rx, pending, move |command: WriterCommand| {
        let mut state = state.borrow_mut();
        if state.halted.load(Ordering::SeqCst) {
            return;
        }
        let result = match command {
            WriterCommand::Append(sequenced) => state.append(sequenced),
            WriterCommand::FlushForKeystone { keystone_sequence } => state.fsync().map(|()| {
                state.nexus.advance_to(keystone_sequence);
                ep_telemetry::LATEST_DURABLE_SEQUENCE_NUMBER.set(keystone_sequence as f64);
            }),
            WriterCommand::Discontinuity { next_sequence } => state.handle_discontinuity(next_sequence),
            WriterCommand::UpdateMinimumAncientIdToStore(min_id) => {
                state.minimum_ancient_id_to_store = min_id;
                state.prune_below_minimum_ancient_id();
                Ok(())
            }
        };
        if let Err(e) = result {
            state.halt(&e);
        }
    });

    (inlet, WriterStage { handle, nexus, halted })
}
