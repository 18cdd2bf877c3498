//! # Sequencer
//!
//! Sequential stage assigning each event a monotone
//! `streamSequenceNumber` and fanning it out to both the in-order linker
//! and the durable writer. The sequence number is what the durability
//! nexus and replay gate against, so it must be assigned exactly once,
//! in strict arrival order — hence a sequential stage rather than a
//! plain counter shared by concurrent callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ep_bus::{StageHandle, Wire};
use ep_types::Event;

use crate::writer::WriterCommand;

/// An event stamped with its position in the pre-consensus event
/// stream.
#[derive(Debug, Clone)]
pub struct SequencedEvent {
    pub event: Event,
    pub stream_sequence_number: u64,
}

/// Spawns the sequencer. `starting_sequence` is the next sequence
/// number to assign, recovered from the last durable segment's header
/// on restart (0 at genesis).
pub fn spawn(starting_sequence: u64, input_queue_capacity: usize, to_linker: Wire<SequencedEvent>, to_writer: Wire<WriterCommand>) -> (Wire<Event>, StageHandle) {
    let (inlet, rx, pending) = Wire::channel(input_queue_capacity);
    let next_sequence = Arc::new(AtomicU64::new(starting_sequence));

    let handle = ep_bus::spawn_sequential("pces_sequencer", rx, pending, move |event: Event| {
        let to_linker = to_linker.clone();
        let to_writer = to_writer.clone();
        let next_sequence = next_sequence.clone();
        async move {
            let stream_sequence_number = next_sequence.fetch_add(1, Ordering::Relaxed);
            let sequenced = SequencedEvent { event, stream_sequence_number };
            // The writer sees it first: replay must never produce a
            // sequence number the durable stream does not also have.
            let _ = to_writer.solder_to(WriterCommand::Append(sequenced.clone())).await;
            let _ = to_linker.solder_to(sequenced).await;
        }
    });

    (inlet, handle)
}
