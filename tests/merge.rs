use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use bids_curator::domain::{SessionId, SubjectId};
use bids_curator::merge::{master_registry_path, merge_dataset};
use bids_curator::registry::Registry;

fn write_file(path: &Utf8Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path()).unwrap();
    }
    fs::write(path.as_std_path(), content).unwrap();
}

/// One converted subject/session output, the shape the converter stage
/// hands to the merge.
fn make_source(root: &Utf8Path, sub: &str, ses: &str, acq_time: &str) {
    write_file(&root.join("CHANGES"), "1.0.0 initial\n");
    write_file(&root.join("README"), "converted dataset\n");
    write_file(
        &root.join("dataset_description.json"),
        "{\"Name\": \"study\", \"BIDSVersion\": \"1.1.1\"}\n",
    );
    write_file(
        &root.join("participants.tsv"),
        &format!("participant_id\tage\nsub-{sub}\t25\n"),
    );
    let ses_dir = root.join(format!("sub-{sub}")).join(format!("ses-{ses}"));
    write_file(
        &ses_dir.join(format!("sub-{sub}_ses-{ses}_scans.tsv")),
        &format!("filename\tacq_time\nfunc/sub-{sub}_ses-{ses}_task-rest_bold.nii.gz\t{acq_time}\n"),
    );
    write_file(
        &ses_dir
            .join("func")
            .join(format!("sub-{sub}_ses-{ses}_task-rest_bold.nii.gz")),
        "",
    );
}

#[test]
fn first_merge_populates_target_and_master() {
    let temp = tempfile::tempdir().unwrap();
    let work = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let source = work.join("scratch");
    let target = work.join("study").join("bids");
    make_source(&source, "01", "01", "2020-05-01T09:15:00");

    let subject: SubjectId = "01".parse().unwrap();
    let session: SessionId = "01".parse().unwrap();
    let result = merge_dataset(&source, &target, "ACE", &subject, Some(&session)).unwrap();

    assert_eq!(result.boilerplate_copied, 4);
    assert!(!result.participants_appended);
    assert!(result.subtree_copied);
    assert_eq!(result.scans_appended, 1);

    assert!(
        target
            .join("sub-01")
            .join("ses-01")
            .join("func")
            .join("sub-01_ses-01_task-rest_bold.nii.gz")
            .as_std_path()
            .is_file()
    );

    let master_path = master_registry_path(&target, "ACE").unwrap();
    let master = Registry::load(&master_path).unwrap();
    assert_eq!(master.columns(), ["filename", "acq_time", "remove", "annotation"]);
    assert_eq!(master.rows().len(), 1);
    assert_eq!(master.rows()[0][2], "0");
    assert_eq!(master.rows()[0][3], "");
}

#[test]
fn remerging_same_session_skips_files_and_participants() {
    let temp = tempfile::tempdir().unwrap();
    let work = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let source = work.join("scratch");
    let target = work.join("study").join("bids");
    make_source(&source, "01", "01", "2020-05-01T09:15:00");

    let subject: SubjectId = "01".parse().unwrap();
    let session: SessionId = "01".parse().unwrap();
    merge_dataset(&source, &target, "ACE", &subject, Some(&session)).unwrap();
    let readme_before = fs::read(target.join("README").as_std_path()).unwrap();

    // Source boilerplate drifts after the first merge; the target copy
    // must win.
    write_file(&source.join("README"), "rewritten\n");
    let result = merge_dataset(&source, &target, "ACE", &subject, Some(&session)).unwrap();

    assert_eq!(result.boilerplate_copied, 0);
    assert!(!result.participants_appended);
    assert!(!result.subtree_copied);
    assert_eq!(fs::read(target.join("README").as_std_path()).unwrap(), readme_before);

    let participants = Registry::load(&target.join("participants.tsv")).unwrap();
    assert_eq!(participants.rows().len(), 1);
}

#[test]
fn second_subject_appends_participants_and_master_rows() {
    let temp = tempfile::tempdir().unwrap();
    let work = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let target = work.join("study").join("bids");

    let source_a = work.join("scratch-01");
    make_source(&source_a, "01", "01", "2020-05-01T09:15:00");
    let source_b = work.join("scratch-02");
    make_source(&source_b, "02", "01", "2020-05-02T10:30:00");

    let session: SessionId = "01".parse().unwrap();
    let sub_a: SubjectId = "01".parse().unwrap();
    let sub_b: SubjectId = "02".parse().unwrap();
    merge_dataset(&source_a, &target, "ACE", &sub_a, Some(&session)).unwrap();
    let result = merge_dataset(&source_b, &target, "ACE", &sub_b, Some(&session)).unwrap();

    assert!(result.participants_appended);
    assert!(result.subtree_copied);

    let participants = Registry::load(&target.join("participants.tsv")).unwrap();
    assert_eq!(participants.rows().len(), 2);
    assert_eq!(participants.rows()[1][0], "sub-02");

    let master = Registry::load(&master_registry_path(&target, "ACE").unwrap()).unwrap();
    assert_eq!(master.rows().len(), 2);
}

#[test]
fn master_column_order_is_authoritative() {
    let temp = tempfile::tempdir().unwrap();
    let work = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let source = work.join("scratch");
    let target = work.join("study").join("bids");
    make_source(&source, "01", "01", "2020-05-01T09:15:00");

    let master_path = master_registry_path(&target, "ACE").unwrap();
    write_file(
        &master_path,
        "acq_time\tfilename\tremove\tannotation\n2020-04-01T08:00:00\tfunc/old.nii.gz\t0\t\n",
    );

    let subject: SubjectId = "01".parse().unwrap();
    let session: SessionId = "01".parse().unwrap();
    merge_dataset(&source, &target, "ACE", &subject, Some(&session)).unwrap();

    let master = Registry::load(&master_path).unwrap();
    assert_eq!(master.columns(), ["acq_time", "filename", "remove", "annotation"]);
    assert_eq!(master.rows().len(), 2);
    assert_eq!(master.rows()[1][0], "2020-05-01T09:15:00");
    assert_eq!(
        master.rows()[1][1],
        "func/sub-01_ses-01_task-rest_bold.nii.gz"
    );
}

#[test]
fn missing_source_registry_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let work = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let source = work.join("scratch");
    let target = work.join("study").join("bids");
    fs::create_dir_all(source.as_std_path()).unwrap();
    write_file(&source.join("CHANGES"), "1.0.0\n");

    let subject: SubjectId = "01".parse().unwrap();
    assert!(merge_dataset(&source, &target, "ACE", &subject, None).is_err());
}
