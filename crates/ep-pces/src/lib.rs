//! # Pre-Consensus Event Stream
//!
//! The sequencer, durable writer, durability nexus, and replayer.
//! Together these make "no consensus effect escapes until the events
//! that caused it are durable" a property the rest of the pipeline can
//! simply rely on rather than re-derive.

pub mod format;
pub mod replayer;
pub mod segment;
pub mod sequencer;
pub mod writer;

pub use replayer::{last_durable_sequence, replay, DoneStreamingPcesTrigger};
pub use sequencer::SequencedEvent;
pub use writer::{DurabilityNexus, WriterCommand, WriterStage};

/// Wires the sequencer and writer together and recovers the correct
/// starting sequence number from whatever is already on disk, so a
/// restarted node resumes the stream rather than restarting it at 0.
pub fn spawn_sequencer_and_writer(
    config: &ep_types::PcesConfig,
    ancient_mode: ep_types::AncientMode,
    sequencer_input_queue_capacity: usize,
    writer_input_queue_capacity: usize,
    to_linker: ep_bus::Wire<SequencedEvent>,
) -> std::io::Result<(ep_bus::Wire<ep_types::Event>, ep_bus::StageHandle, WriterStage)> {
    let starting_sequence = segment::recover_next_sequence(&config.segment_directory)?;

    let (writer_inlet, writer_stage) = writer::spawn(config, ancient_mode, starting_sequence, writer_input_queue_capacity);
    let (inlet, sequencer_handle) = sequencer::spawn(starting_sequence, sequencer_input_queue_capacity, to_linker, writer_inlet);

    Ok((inlet, sequencer_handle, writer_stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_types::{AncientMode, EventBuilder, NodeId, PcesConfig};

    #[tokio::test]
    async fn test_spawn_sequencer_and_writer_resumes_sequence_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = PcesConfig {
            segment_directory: dir.path().to_path_buf(),
            max_segment_span: 1_000,
            min_free_space: 0,
            fsync_retry_backoff_ms: 1,
            fsync_max_attempts: 3,
        };

        let (to_linker, mut linker_rx, _p) = ep_bus::Wire::channel(8);
        let (inlet, sequencer_handle, writer_stage) = spawn_sequencer_and_writer(&config, AncientMode::BirthRound, 8, 8, to_linker).unwrap();

        let event = EventBuilder::new(NodeId(0)).time_created(1).build().with_hash([1u8; 32]);
        inlet.solder_to(event).await.unwrap();
        sequencer_handle.flush().await;
        writer_stage.handle.flush().await;

        let sequenced = linker_rx.try_recv().unwrap();
        assert_eq!(sequenced.stream_sequence_number, 0);

        let resumed_start = segment::recover_next_sequence(&config.segment_directory).unwrap();
        assert_eq!(resumed_start, 1);
    }
}
