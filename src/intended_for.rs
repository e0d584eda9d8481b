use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::{default_directions, default_target_classes};
use crate::domain::{Bucket, FmapTargetClass, Modality, PhaseDir, SessionId, SubjectId};
use crate::error::CurateError;
use crate::layout::{Layout, Scan};
use crate::sidecar::Sidecar;

/// Scope and write policy for one completion pass. The direction/class
/// lists bound which field-map buckets are resolved.
#[derive(Debug, Clone)]
pub struct CompleteOptions {
    pub overwrite: bool,
    pub directions: Vec<PhaseDir>,
    pub target_classes: Vec<FmapTargetClass>,
}

impl Default for CompleteOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            directions: default_directions(),
            target_classes: default_target_classes(),
        }
    }
}

/// Index into `sorted` of the rightmost entry not exceeding `target`,
/// or `None` when every entry exceeds it. This is the "most recent
/// field map at or before this scan" policy, kept as a named function
/// so the fallback in [`resolve_intended_for`] stays separate.
pub fn nearest_preceding(sorted: &[i64], target: i64) -> Option<usize> {
    let count = sorted.partition_point(|&index| index <= target);
    count.checked_sub(1)
}

/// Field-map association for one subject/session: sidecar path of each
/// field map mapped to the subject-relative data paths of the scans it
/// should correct, in target acquisition order.
pub fn resolve_intended_for(
    scans: &[Scan],
    directions: &[PhaseDir],
    target_classes: &[FmapTargetClass],
) -> BTreeMap<Utf8PathBuf, Vec<String>> {
    let mut buckets: BTreeMap<Bucket, Vec<&Scan>> = BTreeMap::new();
    for scan in scans.iter().filter(|scan| scan.modality == Modality::Fmap) {
        match scan.entities.bucket() {
            Some(bucket)
                if directions.contains(&bucket.dir)
                    && target_classes.contains(&bucket.class) =>
            {
                buckets.entry(bucket).or_default().push(scan)
            }
            Some(bucket) => debug!(path = %scan.data_path, %bucket, "bucket out of scope, skipping"),
            None => debug!(path = %scan.data_path, "field map without dir/acq entities, skipping"),
        }
    }

    let mut assignments: BTreeMap<Utf8PathBuf, Vec<String>> = BTreeMap::new();
    for (bucket, fmaps) in &buckets {
        // Scans arrive sorted by series number, so each bucket's field
        // maps are already ascending.
        let indices: Vec<i64> = fmaps.iter().map(|scan| scan.series_number).collect();
        for fmap in fmaps {
            assignments.entry(fmap.sidecar_path.clone()).or_default();
        }

        let targets = scans
            .iter()
            .filter(|scan| scan.modality == bucket.class.target_modality());
        for target in targets {
            // No preceding field map: fall back to the bucket's
            // earliest. Policy, not an error.
            let idx = nearest_preceding(&indices, target.series_number).unwrap_or(0);
            assignments
                .get_mut(&fmaps[idx].sidecar_path)
                .expect("every bucket field map was seeded above")
                .push(target.relative_path.clone());
        }
    }
    assignments
}

/// Write `IntendedFor` lists back into field-map sidecars. A sidecar
/// that already carries the field is left untouched unless `overwrite`.
pub fn write_intended_for(
    assignments: &BTreeMap<Utf8PathBuf, Vec<String>>,
    overwrite: bool,
) -> Result<usize, CurateError> {
    let mut written = 0;
    for (sidecar_path, paths) in assignments {
        let mut sidecar = Sidecar::read(sidecar_path)?;
        if overwrite || !sidecar.contains("IntendedFor") {
            let value = Value::Array(paths.iter().map(|p| json!(p)).collect());
            sidecar.set("IntendedFor", value);
            sidecar.write()?;
            written += 1;
        }
    }
    Ok(written)
}

/// `trt = ees * (floor(npe / acc) - 1)`, the effective readout duration
/// used by distortion correction.
pub fn total_readout_time(ees: f64, acc: f64, npe: u64) -> f64 {
    let etl = (npe as f64 / acc).floor();
    ees * (etl - 1.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteResult {
    pub fieldmaps_assigned: usize,
    pub sidecars_updated: usize,
}

/// Fill the gaps the converter leaves in one subject/session's
/// sidecars: `IntendedFor` on field maps, `TotalReadoutTime` on field
/// maps and functional/diffusion scans, `TaskName` on functional scans.
pub fn complete_sidecars(
    layout: &Layout,
    subject: &SubjectId,
    session: Option<&SessionId>,
    options: &CompleteOptions,
) -> Result<CompleteResult, CurateError> {
    let overwrite = options.overwrite;
    let scans = layout.scans(subject, session)?;

    let assignments =
        resolve_intended_for(&scans, &options.directions, &options.target_classes);
    let fieldmaps_assigned = write_intended_for(&assignments, overwrite)?;

    let mut sidecars_updated = 0;
    for scan in &scans {
        if scan.modality == Modality::Anat {
            continue;
        }
        let mut sidecar = Sidecar::read(&scan.sidecar_path)?;
        let mut changed = false;

        if overwrite || !sidecar.contains("TotalReadoutTime") {
            // All inputs are gathered before any mutation, so a missing
            // field leaves the sidecar on disk as it was.
            sidecar.phase_axis()?;
            let ees = sidecar.effective_echo_spacing()?;
            let npe = sidecar.phase_encode_steps()?;
            let trt = total_readout_time(ees, sidecar.acceleration(), npe);
            sidecar.set("TotalReadoutTime", json!(trt));
            changed = true;
        }

        if scan.modality == Modality::Func
            && (overwrite || !sidecar.contains("TaskName"))
            && let Some(task) = &scan.entities.task
        {
            sidecar.set("TaskName", json!(task));
            changed = true;
        }

        if changed {
            sidecar.write()?;
            sidecars_updated += 1;
        }
    }

    info!(
        subject = %subject,
        fieldmaps_assigned,
        sidecars_updated,
        "sidecar completion finished"
    );
    Ok(CompleteResult {
        fieldmaps_assigned,
        sidecars_updated,
    })
}
