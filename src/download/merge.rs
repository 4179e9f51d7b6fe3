//! Merge plan: ordered chunk files that must tile `[0, size)` exactly once.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::error::TransferError;
use super::range::{ByteRange, chunk_path, in_flight_path};

/// One downloaded range and the file holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    /// Bytes of the resource this chunk holds.
    pub range: ByteRange,
    /// Where the chunk was written.
    pub path: PathBuf,
}

/// Chunk files sorted by offset, validated to be contiguous and to cover the
/// whole resource before any merge is attempted.
#[derive(Debug, Clone)]
pub struct MergePlan {
    dest: PathBuf,
    total: u64,
    chunks: Vec<ChunkFile>,
}

impl MergePlan {
    /// Builds a plan from chunks in any order.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidPlan`] if the ranges leave a gap,
    /// overlap, or do not end at `total - 1`.
    pub fn new(
        dest: impl Into<PathBuf>,
        total: u64,
        mut chunks: Vec<ChunkFile>,
    ) -> Result<Self, TransferError> {
        let dest = dest.into();
        chunks.sort_by_key(|chunk| chunk.range.start());

        let mut next = 0_u64;
        for chunk in &chunks {
            if chunk.range.start() != next {
                let reason = if chunk.range.start() > next {
                    format!("gap before {}", chunk.range)
                } else {
                    format!("overlap at {}", chunk.range)
                };
                return Err(TransferError::InvalidPlan { path: dest, reason });
            }
            next = chunk.range.end() + 1;
        }
        if next != total {
            return Err(TransferError::InvalidPlan {
                path: dest,
                reason: format!("ranges cover {next} of {total} bytes"),
            });
        }

        Ok(Self {
            dest,
            total,
            chunks,
        })
    }

    /// Plan for `ranges` written to the standard chunk names next to `dest`.
    ///
    /// # Errors
    ///
    /// Same as [`MergePlan::new`].
    pub fn for_ranges(
        dest: impl Into<PathBuf>,
        total: u64,
        ranges: &[ByteRange],
    ) -> Result<Self, TransferError> {
        let dest = dest.into();
        let chunks = ranges
            .iter()
            .map(|&range| ChunkFile {
                range,
                path: chunk_path(&dest, range),
            })
            .collect();
        Self::new(dest, total, chunks)
    }

    /// Final output path.
    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Size of the assembled resource.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Chunks in offset order.
    #[must_use]
    pub fn chunks(&self) -> &[ChunkFile] {
        &self.chunks
    }

    /// Concatenates the chunks in offset order into `<dest>.download`, checks
    /// the assembled size, renames it to `dest` and deletes the chunks.
    ///
    /// On any error the chunk files are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Consistency`] when a chunk or the assembled
    /// file disagrees with the planned size, or [`TransferError::Io`].
    #[instrument(skip(self), fields(dest = %self.dest.display(), chunks = self.chunks.len()))]
    pub async fn merge(&self) -> Result<u64, TransferError> {
        let temp = in_flight_path(&self.dest);
        let file = File::create(&temp)
            .await
            .map_err(|e| TransferError::io(&temp, e))?;
        let mut writer = BufWriter::new(file);
        let mut assembled = 0_u64;

        for chunk in &self.chunks {
            let mut source = File::open(&chunk.path)
                .await
                .map_err(|e| TransferError::io(&chunk.path, e))?;
            let copied = tokio::io::copy(&mut source, &mut writer)
                .await
                .map_err(|e| TransferError::io(&temp, e))?;
            if copied != chunk.range.len() {
                return Err(TransferError::Consistency {
                    path: chunk.path.clone(),
                    expected_bytes: chunk.range.len(),
                    actual_bytes: copied,
                });
            }
            assembled += copied;
            debug!(range = %chunk.range, "chunk appended");
        }

        writer
            .flush()
            .await
            .map_err(|e| TransferError::io(&temp, e))?;
        drop(writer);

        if assembled != self.total {
            return Err(TransferError::Consistency {
                path: self.dest.clone(),
                expected_bytes: self.total,
                actual_bytes: assembled,
            });
        }

        tokio::fs::rename(&temp, &self.dest)
            .await
            .map_err(|e| TransferError::io(&self.dest, e))?;

        for chunk in &self.chunks {
            if let Err(e) = tokio::fs::remove_file(&chunk.path).await {
                warn!(path = %chunk.path.display(), error = %e, "failed to delete merged chunk");
            }
        }

        info!(bytes = assembled, "chunks merged");
        Ok(assembled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange::new(start, end).unwrap()
    }

    #[test]
    fn test_plan_sorts_chunks_by_offset() {
        let plan = MergePlan::for_ranges(
            "/tmp/v.m4s",
            30,
            &[range(20, 29), range(0, 9), range(10, 19)],
        )
        .unwrap();
        let starts: Vec<_> = plan.chunks().iter().map(|c| c.range.start()).collect();
        assert_eq!(starts, vec![0, 10, 20]);
        assert_eq!(
            plan.chunks()[0].path,
            PathBuf::from("/tmp/v.m4s.part-0-9")
        );
    }

    #[test]
    fn test_plan_rejects_gap() {
        let result = MergePlan::for_ranges("/tmp/v", 30, &[range(0, 9), range(11, 29)]);
        assert!(matches!(result, Err(TransferError::InvalidPlan { reason, .. }) if reason.contains("gap")));
    }

    #[test]
    fn test_plan_rejects_overlap() {
        let result = MergePlan::for_ranges("/tmp/v", 30, &[range(0, 10), range(10, 29)]);
        assert!(matches!(result, Err(TransferError::InvalidPlan { reason, .. }) if reason.contains("overlap")));
    }

    #[test]
    fn test_plan_rejects_short_cover() {
        let result = MergePlan::for_ranges("/tmp/v", 30, &[range(0, 9), range(10, 19)]);
        assert!(matches!(result, Err(TransferError::InvalidPlan { .. })));
        assert!(MergePlan::for_ranges("/tmp/v", 30, &[]).is_err());
    }

    #[tokio::test]
    async fn test_merge_assembles_in_offset_order_and_deletes_chunks() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("v.m4s");
        let body: Vec<u8> = (0..=99_u8).collect();
        let ranges = ByteRange::split(100, 3);

        // Written last-first to show completion order does not matter.
        for r in ranges.iter().rev() {
            let start = usize::try_from(r.start()).unwrap();
            let end = usize::try_from(r.end()).unwrap();
            std::fs::write(chunk_path(&dest, *r), &body[start..=end]).unwrap();
        }

        let plan = MergePlan::for_ranges(&dest, 100, &ranges).unwrap();
        assert_eq!(plan.merge().await.unwrap(), 100);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        for r in &ranges {
            assert!(!chunk_path(&dest, *r).exists());
        }
        assert!(!in_flight_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_merge_short_chunk_is_consistency_error_and_keeps_chunks() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("v.m4s");
        let ranges = [range(0, 9), range(10, 19)];
        std::fs::write(chunk_path(&dest, ranges[0]), [1_u8; 10]).unwrap();
        std::fs::write(chunk_path(&dest, ranges[1]), [2_u8; 7]).unwrap();

        let plan = MergePlan::for_ranges(&dest, 20, &ranges).unwrap();
        let error = plan.merge().await.unwrap_err();
        assert!(error.is_consistency(), "got {error:?}");
        assert!(!dest.exists());
        assert!(chunk_path(&dest, ranges[0]).exists());
        assert!(chunk_path(&dest, ranges[1]).exists());
    }

    #[tokio::test]
    async fn test_merge_missing_chunk_is_io_error() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("v.m4s");
        let plan = MergePlan::for_ranges(&dest, 5, &[range(0, 4)]).unwrap();
        assert!(matches!(plan.merge().await, Err(TransferError::Io { .. })));
    }
}
