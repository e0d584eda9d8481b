use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{SessionId, SubjectId};
use crate::error::CurateError;
use crate::fs_util;
use crate::layout::Layout;
use crate::registry::Registry;

/// Dataset-level files copied once, on first merge into an empty
/// target.
pub const BOILERPLATE_FILES: &[&str] = &[
    "CHANGES",
    "README",
    "dataset_description.json",
    "participants.tsv",
];

#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub boilerplate_copied: usize,
    pub participants_appended: bool,
    pub subtree_copied: bool,
    pub scans_appended: usize,
}

/// Splice one converted subject/session into the cumulative dataset.
///
/// The steps run in order with no rollback: a failure partway can leave
/// the target with files copied but registries not yet updated. The
/// caller is expected to gate this on external validation and retry the
/// whole subject/session on error.
pub fn merge_dataset(
    source_root: &Utf8Path,
    target_root: &Utf8Path,
    project_name: &str,
    subject: &SubjectId,
    session: Option<&SessionId>,
) -> Result<MergeResult, CurateError> {
    if !source_root.as_std_path().is_dir() {
        return Err(CurateError::MissingDirectory(source_root.to_path_buf()));
    }

    let boilerplate_copied = copy_boilerplate(source_root, target_root)?;
    let participants_appended = reconcile_participants(source_root, target_root)?;
    let subtree_copied = copy_subject_tree(source_root, target_root, subject, session)?;
    let scans_appended = append_master_registry(target_root, project_name, subject, session)?;

    info!(
        subject = %subject,
        boilerplate_copied,
        participants_appended,
        subtree_copied,
        scans_appended,
        "dataset merge finished"
    );
    Ok(MergeResult {
        boilerplate_copied,
        participants_appended,
        subtree_copied,
        scans_appended,
    })
}

fn copy_boilerplate(source_root: &Utf8Path, target_root: &Utf8Path) -> Result<usize, CurateError> {
    let mut copied = 0;
    for name in BOILERPLATE_FILES {
        if fs_util::copy_file_if_absent(&source_root.join(name), &target_root.join(name))? {
            copied += 1;
        }
    }
    Ok(copied)
}

/// Append the source's participant rows unless one of them already
/// matches the target's first row. The row-0-only comparison is the
/// inherited behavior; see DESIGN.md.
fn reconcile_participants(
    source_root: &Utf8Path,
    target_root: &Utf8Path,
) -> Result<bool, CurateError> {
    let source_participants = Layout::new(source_root.to_path_buf())?.participants_path();
    let target_participants = Layout::new(target_root.to_path_buf())?.participants_path();
    let mut source = Registry::load(&source_participants)?;
    let mut target = Registry::load(&target_participants)?;
    source.dedup_columns();
    target.dedup_columns();

    if !target.is_empty() {
        let already_present = (0..source.rows().len()).any(|row| source.row_matches(row, &target, 0));
        if already_present {
            info!("subject already present in participants.tsv, skipping");
            return Ok(false);
        }
    }

    target.append_with_columns(&source)?;
    target.save(&target_participants)?;
    Ok(true)
}

fn copy_subject_tree(
    source_root: &Utf8Path,
    target_root: &Utf8Path,
    subject: &SubjectId,
    session: Option<&SessionId>,
) -> Result<bool, CurateError> {
    let source_sub = source_root.join(subject.dirname());
    let target_sub = target_root.join(subject.dirname());

    if !target_sub.as_std_path().is_dir() {
        fs_util::copy_dir_atomic(&source_sub, &target_sub)?;
        return Ok(true);
    }
    if let Some(ses) = session {
        let source_ses = source_sub.join(ses.dirname());
        let target_ses = target_sub.join(ses.dirname());
        if !target_ses.as_std_path().is_dir() {
            fs_util::copy_dir_atomic(&source_ses, &target_ses)?;
            return Ok(true);
        }
        warn!(subject = %subject, session = %ses, "subject/session directory already exists in dataset");
        return Ok(false);
    }
    warn!(subject = %subject, "subject directory already exists in dataset");
    Ok(false)
}

/// Master scans registry for a project, under `code/` beside the
/// dataset root.
pub fn master_registry_path(target_root: &Utf8Path, project_name: &str) -> Result<Utf8PathBuf, CurateError> {
    let parent = target_root
        .parent()
        .ok_or_else(|| CurateError::Filesystem("dataset root has no parent directory".to_string()))?;
    Ok(parent.join("code").join(format!("{project_name}_scans.tsv")))
}

/// Load the merged subject's scans registry, add the curation
/// bookkeeping columns, and append it to the project's master registry.
/// Concurrent subject/session jobs share the master file, so the
/// read-modify-write runs under an advisory lock.
fn append_master_registry(
    target_root: &Utf8Path,
    project_name: &str,
    subject: &SubjectId,
    session: Option<&SessionId>,
) -> Result<usize, CurateError> {
    let layout = Layout::new(target_root.to_path_buf())?;
    let mut sub_scans = Registry::load(&layout.scans_registry_path(subject, session))?;
    if sub_scans.column_index("remove").is_none() {
        sub_scans.add_column("remove", "0");
    }
    if sub_scans.column_index("annotation").is_none() {
        sub_scans.add_column("annotation", "");
    }

    let master_path = master_registry_path(target_root, project_name)?;
    if let Some(parent) = master_path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    }

    let lock_path = master_path.with_extension("tsv.lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path.as_std_path())
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    lock_file
        .lock_exclusive()
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;

    let appended = sub_scans.rows().len();
    if master_path.as_std_path().is_file() {
        // The master's column order is authoritative once written.
        let mut master = Registry::load(&master_path)?;
        master.append_with_columns(&sub_scans)?;
        master.save(&master_path)?;
    } else {
        sub_scans.save(&master_path)?;
    }

    FileExt::unlock(&lock_file).map_err(|err| CurateError::Filesystem(err.to_string()))?;
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_path_lives_under_code() {
        let path = master_registry_path(Utf8Path::new("/data/study/bids"), "ACE").unwrap();
        assert_eq!(path, Utf8PathBuf::from("/data/study/code/ACE_scans.tsv"));
    }
}
