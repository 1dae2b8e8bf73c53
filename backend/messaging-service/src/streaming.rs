//! Chunked streaming over a data store
//!
//! Streams are lazy and forward-only. A chunk shorter than the requested size
//! ends the stream without another fetch, and an empty page ends it without
//! emitting an empty chunk. The page source is dropped, releasing its cursor,
//! as soon as the stream finishes, fails or is dropped by the consumer.
//!
//! Paging is by offset over a stable order, so rows inserted or deleted
//! during a scan can be skipped or seen twice.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::{MessagingError, MessagingResult, StorageError, StorageResult};
use crate::store::PageSource;

/// One chunk per item; an error item is always the last one.
pub type ChunkStream<T> = BoxStream<'static, StorageResult<Vec<T>>>;

pub type RowStream<T> = BoxStream<'static, StorageResult<T>>;

struct Scan<T> {
    source: Box<dyn PageSource<T>>,
    offset: i64,
}

/// Stream `source` in chunks of at most `chunk_size` rows.
///
/// Fails with `InvalidArgument` for a non-positive size before the source
/// is touched.
pub fn stream_chunks<T>(
    source: Box<dyn PageSource<T>>,
    chunk_size: i64,
) -> MessagingResult<ChunkStream<T>>
where
    T: Send + 'static,
{
    if chunk_size <= 0 {
        return Err(MessagingError::invalid(format!(
            "chunk size must be positive, got {}",
            chunk_size
        )));
    }

    let initial = Some(Scan { source, offset: 0 });
    let chunks = stream::try_unfold(initial, move |state| async move {
        let Some(mut scan) = state else {
            return Ok::<_, StorageError>(None);
        };

        let page = scan.source.fetch_page(scan.offset, chunk_size).await?;
        let len = page.len() as i64;

        if page.is_empty() {
            debug!(offset = scan.offset, "Scan exhausted");
            return Ok(None);
        }
        if len < chunk_size {
            debug!(offset = scan.offset, rows = len, "Short chunk ends scan");
            return Ok(Some((page, None)));
        }

        scan.offset += len;
        Ok(Some((page, Some(scan))))
    });

    Ok(chunks.boxed())
}

/// The same scan as [`stream_chunks`], one row per item.
pub fn stream_rows<T>(
    source: Box<dyn PageSource<T>>,
    page_size: i64,
) -> MessagingResult<RowStream<T>>
where
    T: Send + 'static,
{
    let rows = stream_chunks(source, page_size)?
        .map_ok(|chunk| stream::iter(chunk.into_iter().map(Ok::<T, StorageError>)))
        .try_flatten();
    Ok(rows.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Vec-backed source that counts fetches and live instances.
    struct VecSource {
        rows: Vec<u32>,
        fetches: Arc<AtomicUsize>,
        alive: Arc<AtomicUsize>,
        fail_at_offset: Option<i64>,
    }

    impl VecSource {
        fn boxed(
            n: u32,
            fetches: &Arc<AtomicUsize>,
            alive: &Arc<AtomicUsize>,
        ) -> Box<dyn PageSource<u32>> {
            alive.fetch_add(1, Ordering::SeqCst);
            Box::new(VecSource {
                rows: (1..=n).collect(),
                fetches: fetches.clone(),
                alive: alive.clone(),
                fail_at_offset: None,
            })
        }
    }

    impl Drop for VecSource {
        fn drop(&mut self) {
            self.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PageSource<u32> for VecSource {
        async fn fetch_page(&mut self, offset: i64, limit: i64) -> StorageResult<Vec<u32>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_at_offset == Some(offset) {
                return Err(StorageError::Unavailable("connection lost".into()));
            }
            Ok(self
                .rows
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .copied()
                .collect())
        }
    }

    fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)))
    }

    async fn collect(stream: ChunkStream<u32>) -> Vec<Vec<u32>> {
        stream.try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_five_rows_in_chunks_of_two() {
        let (fetches, alive) = counters();
        let chunks = collect(stream_chunks(VecSource::boxed(5, &fetches, &alive), 2).unwrap()).await;

        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4], vec![5]]);
        // the short chunk ends the scan without a confirming fetch
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(alive.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_set_yields_no_chunks() {
        let (fetches, alive) = counters();
        let chunks = collect(stream_chunks(VecSource::boxed(0, &fetches, &alive), 10).unwrap()).await;
        assert!(chunks.is_empty());
        assert_eq!(alive.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_on_empty_page() {
        let (fetches, alive) = counters();
        let chunks = collect(stream_chunks(VecSource::boxed(4, &fetches, &alive), 2).unwrap()).await;
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_chunk_count_and_coverage() {
        for n in [0u32, 1, 7, 10, 23] {
            for size in [1i64, 3, 10, 50] {
                let (fetches, alive) = counters();
                let chunks =
                    collect(stream_chunks(VecSource::boxed(n, &fetches, &alive), size).unwrap())
                        .await;

                let expected_chunks = (n as i64 + size - 1) / size;
                assert_eq!(chunks.len() as i64, expected_chunks, "n={} size={}", n, size);
                assert!(chunks.iter().all(|c| !c.is_empty()));
                let flat: Vec<u32> = chunks.into_iter().flatten().collect();
                assert_eq!(flat, (1..=n).collect::<Vec<_>>());
            }
        }
    }

    #[tokio::test]
    async fn test_non_positive_size_fails_before_fetching() {
        for size in [0i64, -1, i64::MIN] {
            let (fetches, alive) = counters();
            let result = stream_chunks(VecSource::boxed(5, &fetches, &alive), size);
            assert!(matches!(result, Err(MessagingError::InvalidArgument(_))));
            assert_eq!(fetches.load(Ordering::SeqCst), 0);
            assert_eq!(alive.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_nothing_is_fetched_until_polled() {
        let (fetches, alive) = counters();
        let stream = stream_chunks(VecSource::boxed(5, &fetches, &alive), 2).unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(alive.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_early_drop_releases_source() {
        let (fetches, alive) = counters();
        let mut stream = stream_chunks(VecSource::boxed(100, &fetches, &alive), 10).unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(alive.load(Ordering::SeqCst), 1);

        drop(stream);
        assert_eq!(alive.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_is_yielded_once_and_ends_stream() {
        let (fetches, alive) = counters();
        alive.fetch_add(1, Ordering::SeqCst);
        let source = Box::new(VecSource {
            rows: (1..=10).collect(),
            fetches: fetches.clone(),
            alive: alive.clone(),
            fail_at_offset: Some(4),
        });
        let mut stream = stream_chunks(source, 4).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), vec![1, 2, 3, 4]);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_transient());
        assert_eq!(alive.load(Ordering::SeqCst), 0);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_rows_are_flattened_in_order() {
        let (fetches, alive) = counters();
        let rows: Vec<u32> = stream_rows(VecSource::boxed(7, &fetches, &alive), 3)
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows, (1..=7).collect::<Vec<_>>());
    }
}
