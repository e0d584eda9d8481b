use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};

use bids_curator::domain::{SessionId, SubjectId};
use bids_curator::error::CurateError;
use bids_curator::intended_for::{CompleteOptions, complete_sidecars};
use bids_curator::layout::Layout;

fn write_scan(dir: &Utf8Path, name: &str, sidecar: &Value) {
    fs::create_dir_all(dir.as_std_path()).unwrap();
    fs::write(dir.join(format!("{name}.nii.gz")).as_std_path(), b"").unwrap();
    fs::write(
        dir.join(format!("{name}.json")).as_std_path(),
        serde_json::to_vec_pretty(sidecar).unwrap(),
    )
    .unwrap();
}

fn epi_fields(series: i64) -> Value {
    json!({
        "SeriesNumber": series,
        "PhaseEncodingDirection": "j-",
        "EffectiveEchoSpacing": 0.0005,
        "AcquisitionMatrixPE": 64
    })
}

fn read_json(path: &Utf8Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path.as_std_path()).unwrap()).unwrap()
}

/// Two AP/func field maps at series 3 and 10, functional runs at 1, 5,
/// and 12: the run before any field map falls back to the earliest, the
/// rest take the nearest preceding.
#[test]
fn assigns_nearest_preceding_with_first_fallback() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let ses = root.join("sub-01").join("ses-01");

    let fmap = ses.join("fmap");
    write_scan(&fmap, "sub-01_ses-01_acq-func_dir-AP_run-01_epi", &epi_fields(3));
    write_scan(&fmap, "sub-01_ses-01_acq-func_dir-AP_run-02_epi", &epi_fields(10));

    let func = ses.join("func");
    write_scan(&func, "sub-01_ses-01_task-rest_run-01_bold", &epi_fields(1));
    write_scan(&func, "sub-01_ses-01_task-rest_run-02_bold", &epi_fields(5));
    write_scan(&func, "sub-01_ses-01_task-rest_run-03_bold", &epi_fields(12));

    let layout = Layout::new(root).unwrap();
    let subject: SubjectId = "01".parse().unwrap();
    let session: SessionId = "01".parse().unwrap();
    let result = complete_sidecars(
        &layout,
        &subject,
        Some(&session),
        &CompleteOptions::default(),
    )
    .unwrap();
    assert_eq!(result.fieldmaps_assigned, 2);
    assert_eq!(result.sidecars_updated, 5);

    let first = read_json(&fmap.join("sub-01_ses-01_acq-func_dir-AP_run-01_epi.json"));
    assert_eq!(
        first["IntendedFor"],
        json!([
            "ses-01/func/sub-01_ses-01_task-rest_run-01_bold.nii.gz",
            "ses-01/func/sub-01_ses-01_task-rest_run-02_bold.nii.gz"
        ])
    );

    let second = read_json(&fmap.join("sub-01_ses-01_acq-func_dir-AP_run-02_epi.json"));
    assert_eq!(
        second["IntendedFor"],
        json!(["ses-01/func/sub-01_ses-01_task-rest_run-03_bold.nii.gz"])
    );

    // floor(64 / 1.0) = 64, 0.0005 * 63 = 0.0315
    let bold = read_json(&func.join("sub-01_ses-01_task-rest_run-01_bold.json"));
    assert!((bold["TotalReadoutTime"].as_f64().unwrap() - 0.0315).abs() < 1e-12);
    assert_eq!(bold["TaskName"], json!("rest"));
}

#[test]
fn second_run_without_overwrite_is_noop() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let sub = root.join("sub-02");

    write_scan(
        &sub.join("fmap"),
        "sub-02_acq-func_dir-PA_run-01_epi",
        &epi_fields(2),
    );
    write_scan(
        &sub.join("func"),
        "sub-02_task-nback_bold",
        &epi_fields(4),
    );

    let layout = Layout::new(root.clone()).unwrap();
    let subject: SubjectId = "02".parse().unwrap();
    let options = CompleteOptions::default();
    complete_sidecars(&layout, &subject, None, &options).unwrap();

    let fmap_json = sub.join("fmap").join("sub-02_acq-func_dir-PA_run-01_epi.json");
    let func_json = sub.join("func").join("sub-02_task-nback_bold.json");
    let fmap_before = fs::read(fmap_json.as_std_path()).unwrap();
    let func_before = fs::read(func_json.as_std_path()).unwrap();

    let result = complete_sidecars(&layout, &subject, None, &options).unwrap();
    assert_eq!(result.fieldmaps_assigned, 0);
    assert_eq!(result.sidecars_updated, 0);
    assert_eq!(fs::read(fmap_json.as_std_path()).unwrap(), fmap_before);
    assert_eq!(fs::read(func_json.as_std_path()).unwrap(), func_before);
}

#[test]
fn overwrite_reassigns_existing_fields() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let sub = root.join("sub-03");

    let mut fmap_fields = epi_fields(2);
    fmap_fields["IntendedFor"] = json!(["stale/path.nii.gz"]);
    write_scan(&sub.join("fmap"), "sub-03_acq-func_dir-AP_run-01_epi", &fmap_fields);
    write_scan(&sub.join("func"), "sub-03_task-rest_bold", &epi_fields(5));

    let layout = Layout::new(root).unwrap();
    let subject: SubjectId = "03".parse().unwrap();

    let options = CompleteOptions::default();
    complete_sidecars(&layout, &subject, None, &options).unwrap();
    let kept = read_json(&sub.join("fmap").join("sub-03_acq-func_dir-AP_run-01_epi.json"));
    assert_eq!(kept["IntendedFor"], json!(["stale/path.nii.gz"]));

    let options = CompleteOptions {
        overwrite: true,
        ..CompleteOptions::default()
    };
    complete_sidecars(&layout, &subject, None, &options).unwrap();
    let rewritten =
        read_json(&sub.join("fmap").join("sub-03_acq-func_dir-AP_run-01_epi.json"));
    assert_eq!(
        rewritten["IntendedFor"],
        json!(["func/sub-03_task-rest_bold.nii.gz"])
    );
}

#[test]
fn missing_echo_spacing_fails_and_leaves_sidecar_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let func = root.join("sub-04").join("func");

    write_scan(
        &func,
        "sub-04_task-rest_bold",
        &json!({
            "SeriesNumber": 4,
            "PhaseEncodingDirection": "j-",
            "AcquisitionMatrixPE": 64
        }),
    );
    let sidecar_path = func.join("sub-04_task-rest_bold.json");
    let before = fs::read(sidecar_path.as_std_path()).unwrap();

    let layout = Layout::new(root).unwrap();
    let subject: SubjectId = "04".parse().unwrap();
    let err = complete_sidecars(&layout, &subject, None, &CompleteOptions::default())
        .unwrap_err();
    assert_matches!(err, CurateError::MissingField { field, .. } if field == "EffectiveEchoSpacing");
    assert_eq!(fs::read(sidecar_path.as_std_path()).unwrap(), before);
}

#[test]
fn buckets_do_not_cross_direction_or_class() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let sub = root.join("sub-05");

    write_scan(
        &sub.join("fmap"),
        "sub-05_acq-dwi_dir-AP_run-01_epi",
        &epi_fields(2),
    );
    write_scan(&sub.join("func"), "sub-05_task-rest_bold", &epi_fields(5));
    write_scan(&sub.join("dwi"), "sub-05_dwi", &epi_fields(7));

    let layout = Layout::new(root).unwrap();
    let subject: SubjectId = "05".parse().unwrap();
    complete_sidecars(&layout, &subject, None, &CompleteOptions::default()).unwrap();

    // The dwi-class field map collects the diffusion scan only; the
    // functional scan has no field map bucket at all.
    let fmap = read_json(&sub.join("fmap").join("sub-05_acq-dwi_dir-AP_run-01_epi.json"));
    assert_eq!(fmap["IntendedFor"], json!(["dwi/sub-05_dwi.nii.gz"]));
    let bold = read_json(&sub.join("func").join("sub-05_task-rest_bold.json"));
    assert!(bold.get("IntendedFor").is_none());
}
