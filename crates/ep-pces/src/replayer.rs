//! # Replayer
//!
//! Runs once at startup, direct-inline rather than as a
//! queued stage: it owns the only copy of the durable segment stream
//! and must finish before gossip intake is allowed to begin feeding the
//! hasher, so there is nothing to queue against. Every durable record
//! is forwarded to the hasher exactly as if it had just arrived from
//! gossip; replay does not re-derive hashes or re-run signature
//! verification on events that already carry both, since the segment
//! stream only ever holds events that already passed the full intake
//! pipeline once.

use std::path::Path;

use ep_hasher::HasherInlet;
use tracing::{info, warn};

use crate::segment::{list_segments, recover_segment};

/// Emitted once replay has forwarded every durable event and the
/// downstream pipeline has drained
#[derive(Debug, Clone, Copy)]
pub struct DoneStreamingPcesTrigger {
    pub events_replayed: u64,
}

/// Replays every durable segment in `dir` into `hasher`, then invokes
/// `flush_intake` and `flush_transaction_handling` in order before
/// returning the completion trigger. Tolerates a truncated final
/// record in the newest segment (a crash mid-write); anything beyond
/// the first checksum failure in a segment is treated as never
/// written
pub async fn replay<FI, FIFut, FT, FTFut>(dir: &Path, hasher: &HasherInlet, flush_intake: FI, flush_transaction_handling: FT) -> std::io::Result<DoneStreamingPcesTrigger>
where
    FI: FnOnce() -> FIFut,
    FIFut: std::future::Future<Output = ()>,
    FT: FnOnce() -> FTFut,
    FTFut: std::future::Future<Output = ()>,
{
    let segments = list_segments(dir)?;
    let mut events_replayed = 0u64;
    let mut previous_end: Option<u64> = None;

    for path in &segments {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        let header = crate::format::SegmentHeader::read(&mut reader)?;

        if let Some(expected) = previous_end {
            if header.first_seq_num != expected {
                warn!(path = %path.display(), expected, found = header.first_seq_num, "pces replay: sequence discontinuity between segments");
            }
        }

        let mut count_in_segment = 0u64;
        while let Some((event, _seq)) = crate::format::read_record(&mut reader)? {
            if hasher.submit(event).await.is_err() {
                warn!(path = %path.display(), "pces replay: hasher closed mid-replay");
                break;
            }
            count_in_segment += 1;
        }
        events_replayed += count_in_segment;
        previous_end = Some(header.first_seq_num + count_in_segment);
    }

    info!(events_replayed, segments = segments.len(), "pces replay: forwarded all durable events");

    flush_intake().await;
    flush_transaction_handling().await;

    Ok(DoneStreamingPcesTrigger { events_replayed })
}

/// Convenience used by the writer/sequencer at startup to agree on the
/// next stream sequence number without a second full scan.
pub fn last_durable_sequence(dir: &Path) -> std::io::Result<Option<u64>> {
    let segments = list_segments(dir)?;
    let Some(last) = segments.last() else {
        return Ok(None);
    };
    let recovered = recover_segment(last)?;
    if recovered.record_count == 0 {
        return Ok(None);
    }
    Ok(Some(recovered.header.first_seq_num + recovered.record_count - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_bus::Wire;
    use ep_types::{AncientMode, EventBuilder, NodeId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn write_segment(dir: &Path, first_seq: u64, events: &[(u64, u64)]) {
        let path = dir.join(crate::segment::segment_file_name(first_seq));
        let mut file = std::fs::File::create(path).unwrap();
        crate::format::SegmentHeader { first_seq_num: first_seq, min_ancient_id: 0, ancient_mode: AncientMode::BirthRound }.write(&mut file).unwrap();
        let mut seq = first_seq;
        for &(_gen, time) in events {
            let event = EventBuilder::new(NodeId(0)).time_created(time).build().with_hash([time as u8; 32]);
            crate::format::write_record(&mut file, &event, seq).unwrap();
            seq += 1;
        }
        crate::format::SegmentFooter { record_count: events.len() as u64, max_ancient_id: 0 }.write(&mut file).unwrap();
    }

    #[tokio::test]
    async fn test_replay_forwards_every_durable_event() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 0, &[(0, 1), (0, 2)]);
        write_segment(dir.path(), 2, &[(0, 3)]);

        let (out, mut out_rx, _p) = Wire::channel(16);
        let stage = ep_hasher::spawn(1, 16, Arc::new(ep_hasher::Sha256Hasher), 16, out);

        let intake_flushed = Arc::new(AtomicUsize::new(0));
        let tx_flushed = Arc::new(AtomicUsize::new(0));
        let intake_flushed2 = intake_flushed.clone();
        let tx_flushed2 = tx_flushed.clone();

        let trigger = replay(
            dir.path(),
            &stage.inlet,
            || async move {
                intake_flushed2.fetch_add(1, Ordering::SeqCst);
            },
            || async move {
                tx_flushed2.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();

        stage.hasher_handle.flush().await;
        stage.collector_handle.flush().await;

        assert_eq!(trigger.events_replayed, 3);
        assert_eq!(intake_flushed.load(Ordering::SeqCst), 1);
        assert_eq!(tx_flushed.load(Ordering::SeqCst), 1);

        let mut seen = 0;
        while out_rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_last_durable_sequence_none_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(last_durable_sequence(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_last_durable_sequence_reflects_last_record() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 5, &[(0, 1), (0, 2), (0, 3)]);
        assert_eq!(last_durable_sequence(dir.path()).unwrap(), Some(7));
    }
}
