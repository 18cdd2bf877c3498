//! # Segment Discovery & Recovery
//!
//! Shared by the writer (to resume sequencing after a restart) and the
//! replayer (to walk every durable segment at startup). Segment files
//! are named `segment-<firstSeqNum padded to 20 digits>.pces` so a
//! plain lexicographic sort also sorts by sequence order.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ep_types::{AncientMode, NonAncientWindow};

use crate::format::{read_record, SegmentFooter, SegmentHeader};

#[must_use]
pub fn segment_file_name(first_seq_num: u64) -> String {
    format!("segment-{first_seq_num:020}.pces")
}

/// Segment files in `dir`, sorted oldest-first. Empty if the directory
/// does not exist yet (a fresh node).
pub fn list_segments(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("pces"))
        .collect();
    paths.sort();
    Ok(paths)
}

/// What recovery finds in one segment file.
pub struct RecoveredSegment {
    pub path: PathBuf,
    pub header: SegmentHeader,
    /// Number of records that passed their checksum. This is the
    /// durable count regardless of whether the footer is present: a
    /// truncated final record is simply not counted.
    pub record_count: u64,
    pub max_ancient_id: u64,
    /// Whether a valid footer followed the last intact record. Absence
    /// means the process crashed mid-segment.
    pub has_footer: bool,
}

fn ancient_id_of(mode: AncientMode, generation: u64, birth_round: u64) -> u64 {
    NonAncientWindow::genesis(mode).ancient_identifier(generation, birth_round)
}

/// Opens and fully scans one segment file.
pub fn recover_segment(path: &Path) -> std::io::Result<RecoveredSegment> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let header = SegmentHeader::read(&mut reader)?;

    let mut record_count = 0u64;
    let mut max_ancient_id = header.min_ancient_id;
    while let Some((event, _seq)) = read_record(&mut reader)? {
        let ancient_id = ancient_id_of(header.ancient_mode, event.generation, event.birth_round);
        max_ancient_id = max_ancient_id.max(ancient_id);
        record_count += 1;
    }
    let has_footer = SegmentFooter::read(&mut reader).is_some();

    Ok(RecoveredSegment {
        path: path.to_path_buf(),
        header,
        record_count,
        max_ancient_id,
        has_footer,
    })
}

/// The next sequence number to assign, recovered from the last segment
/// in `dir` (0 if the directory is empty or absent, i.e. genesis).
pub fn recover_next_sequence(dir: &Path) -> std::io::Result<u64> {
    let segments = list_segments(dir)?;
    let Some(last) = segments.last() else {
        return Ok(0);
    };
    let recovered = recover_segment(last)?;
    Ok(recovered.header.first_seq_num + recovered.record_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::write_record;
    use ep_types::{EventBuilder, NodeId};
    use std::io::Write;

    fn sample_event(n: u64) -> ep_types::Event {
        EventBuilder::new(NodeId(0)).time_created(n).build().with_hash([n as u8; 32])
    }

    #[test]
    fn test_recover_next_sequence_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(recover_next_sequence(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_recover_segment_counts_intact_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(segment_file_name(10));
        let mut file = fs::File::create(&path).unwrap();
        let header = SegmentHeader { first_seq_num: 10, min_ancient_id: 0, ancient_mode: AncientMode::BirthRound };
        header.write(&mut file).unwrap();
        write_record(&mut file, &sample_event(1), 10).unwrap();
        write_record(&mut file, &sample_event(2), 11).unwrap();
        SegmentFooter { record_count: 2, max_ancient_id: 0 }.write(&mut file).unwrap();
        drop(file);

        let recovered = recover_segment(&path).unwrap();
        assert_eq!(recovered.record_count, 2);
        assert!(recovered.has_footer);
        assert_eq!(recover_next_sequence(dir.path()).unwrap(), 12);
    }

    #[test]
    fn test_recover_segment_tolerates_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(segment_file_name(0));
        let mut file = fs::File::create(&path).unwrap();
        let header = SegmentHeader { first_seq_num: 0, min_ancient_id: 0, ancient_mode: AncientMode::BirthRound };
        header.write(&mut file).unwrap();
        write_record(&mut file, &sample_event(1), 0).unwrap();
        let mut bytes = Vec::new();
        write_record(&mut bytes, &sample_event(2), 1).unwrap();
        bytes.truncate(bytes.len() - 4);
        file.write_all(&bytes).unwrap();
        drop(file);

        let recovered = recover_segment(&path).unwrap();
        assert_eq!(recovered.record_count, 1);
        assert!(!recovered.has_footer);
    }
}
