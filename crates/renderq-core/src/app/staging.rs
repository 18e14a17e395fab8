//! Staging - パイプライン1回分の scratch ファイル
//!
//! ここで作るパスはすべて `tempfile` のガードが所有する。
//! 成功・失敗・キャンセル・panic のどの経路でも削除される。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::debug;
use zip::ZipArchive;

use crate::domain::{JobId, StagingError};

/// Scene directory suffix inside the uploaded archive.
pub const SCENE_EXTENSION: &str = "vmax";

/// Scratch space for one job.
///
/// Dropping this removes the input file, the working directory and the
/// output directory.
#[derive(Debug)]
pub struct StagedJob {
    _input: NamedTempFile,
    work: TempDir,
    output: TempDir,
}

impl StagedJob {
    /// Copy of the archive's scene directory.
    pub fn scene_dir(&self) -> &Path {
        self.work.path()
    }

    /// Where frames and the final artifact are written.
    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }

    /// Split off the output directory so it can outlive the scratch files.
    pub fn into_output(self) -> TempDir {
        self.output
    }
}

/// Write `payload` to disk, extract it, and copy the first `*.vmax`
/// directory into a fresh working directory.
pub async fn stage(scratch: PathBuf, job: JobId, payload: Bytes) -> Result<StagedJob, StagingError> {
    tokio::task::spawn_blocking(move || stage_blocking(&scratch, job, &payload))
        .await
        .map_err(|e| StagingError::Aborted(e.to_string()))?
}

fn stage_blocking(scratch: &Path, job: JobId, payload: &[u8]) -> Result<StagedJob, StagingError> {
    fs::create_dir_all(scratch).map_err(StagingError::io("create scratch dir"))?;

    let mut input = Builder::new()
        .prefix(&format!("renderq-{job}-"))
        .suffix(".zip")
        .tempfile_in(scratch)
        .map_err(StagingError::io("create input file"))?;
    input
        .write_all(payload)
        .and_then(|_| input.flush())
        .map_err(StagingError::io("write input file"))?;

    // Only needed until the scene is copied out.
    let extract = Builder::new()
        .prefix(&format!("renderq-{job}-extract-"))
        .tempdir_in(scratch)
        .map_err(StagingError::io("create extract dir"))?;

    let file = input
        .reopen()
        .map_err(StagingError::io("reopen input file"))?;
    let mut archive = ZipArchive::new(file).map_err(|e| StagingError::Archive(e.to_string()))?;
    archive
        .extract(extract.path())
        .map_err(|e| StagingError::Archive(e.to_string()))?;

    let scene = find_scene_dir(extract.path())?.ok_or(StagingError::MissingScene)?;
    debug!(job = %job, scene = %scene.display(), "found scene directory");

    let work = Builder::new()
        .prefix(&format!("renderq-{job}-work-"))
        .tempdir_in(scratch)
        .map_err(StagingError::io("create work dir"))?;
    copy_tree(&scene, work.path())?;

    let output = Builder::new()
        .prefix(&format!("renderq-{job}-out-"))
        .tempdir_in(scratch)
        .map_err(StagingError::io("create output dir"))?;

    Ok(StagedJob {
        _input: input,
        work,
        output,
    })
}

/// First top-level directory (by name) whose extension is `.vmax`.
fn find_scene_dir(root: &Path) -> Result<Option<PathBuf>, StagingError> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(root).map_err(StagingError::io("list archive"))? {
        let entry = entry.map_err(StagingError::io("list archive"))?;
        let path = entry.path();
        let is_scene = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SCENE_EXTENSION));
        if is_scene && path.is_dir() {
            candidates.push(path);
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

/// Copy regular files under `from` into `to`, keeping relative paths.
fn copy_tree(from: &Path, to: &Path) -> Result<(), StagingError> {
    for entry in fs::read_dir(from).map_err(StagingError::io("read scene dir"))? {
        let entry = entry.map_err(StagingError::io("read scene dir"))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(StagingError::io("read scene dir"))?;
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(StagingError::io("create scene subdir"))?;
            copy_tree(&source, &target)?;
        } else if file_type.is_file() {
            fs::copy(&source, &target).map_err(StagingError::io("copy scene file"))?;
        }
    }
    Ok(())
}

/// `castle.vmax.zip` -> `castle`; also strips a bare `.zip`.
pub fn base_name(display_name: &str) -> &str {
    let lower = display_name.to_ascii_lowercase();
    for suffix in [".vmax.zip", ".zip"] {
        if lower.ends_with(suffix) && display_name.len() > suffix.len() {
            return &display_name[..display_name.len() - suffix.len()];
        }
    }
    display_name
}
