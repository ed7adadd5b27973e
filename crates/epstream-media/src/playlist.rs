//! HLS master playlist composition.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use epstream_models::ProcessedQuality;

use crate::error::{MediaError, MediaResult};

/// File name of the master playlist inside an episode's output directory.
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";

/// Render the master playlist for the given variants, in the given order.
pub fn compose_master(variants: &[ProcessedQuality]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

    for variant in variants {
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}",
            variant.bandwidth(),
            variant.resolution
        );
        let _ = writeln!(out, "{}", variant.playlist_path);
    }

    out
}

/// Write the master playlist into `dir` with a single write.
pub async fn write_master(dir: &Path, variants: &[ProcessedQuality]) -> MediaResult<PathBuf> {
    let path = dir.join(MASTER_PLAYLIST_NAME);
    let body = compose_master(variants);

    tokio::fs::write(&path, body)
        .await
        .map_err(|source| MediaError::PlaylistWrite {
            path: path.clone(),
            source,
        })?;

    info!(
        master_playlist = %path.display(),
        variants = variants.len(),
        "Created master HLS playlist"
    );

    Ok(path)
}
