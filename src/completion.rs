use crate::staging::StagingStore;

/// true once every chunk `1..=total_chunks` is staged.
///
/// only looks at the disk, so a restarted process picks up where it left off
pub async fn is_complete(
    store: &StagingStore,
    identifier: &str,
    filename: &str,
    total_chunks: u64,
) -> bool {
    for chunk_number in 1..=total_chunks {
        if !store.chunk_exists(identifier, filename, chunk_number).await {
            tracing::trace!(
                "Upload {} incomplete, chunk {}/{} missing",
                identifier,
                chunk_number,
                total_chunks
            );
            return false;
        }
    }
    true
}
