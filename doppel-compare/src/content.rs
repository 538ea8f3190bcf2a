// SPDX-License-Identifier: AGPL-3.0-or-later
//! Byte-level comparison

use doppel_core::{AfsPath, CancelToken, DoppelResult, ProgressReporter, StorageBackend};

/// Compare two files block by block. Stops at the first differing block.
pub async fn files_have_same_content(
    left: &dyn StorageBackend,
    left_path: &AfsPath,
    right: &dyn StorageBackend,
    right_path: &AfsPath,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> DoppelResult<bool> {
    let mut left_in = left.open_input_stream(left_path).await?;
    let mut right_in = right.open_input_stream(right_path).await?;
    let block = left_in.block_size().max(right_in.block_size()).max(4096);
    let mut left_buf = vec![0u8; block];
    let mut right_buf = vec![0u8; block];

    loop {
        cancel.check()?;
        let l = left_in.read(&mut left_buf).await?;
        let r = right_in.read(&mut right_buf).await?;
        reporter.add_progress(0, (l + r) as u64);
        if l != r || left_buf[..l] != right_buf[..r] {
            return Ok(false);
        }
        if l < block {
            return Ok(true);
        }
    }
}

/// Compare symlink targets as raw bytes.
pub async fn symlinks_have_same_target(
    left: &dyn StorageBackend,
    left_path: &AfsPath,
    right: &dyn StorageBackend,
    right_path: &AfsPath,
) -> DoppelResult<bool> {
    let l = left.read_symlink_target(left_path).await?;
    let r = right.read_symlink_target(right_path).await?;
    Ok(l == r)
}
