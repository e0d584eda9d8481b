use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{Modality, ScanEntities, SessionId, SubjectId};
use crate::error::CurateError;
use crate::sidecar::{Sidecar, sidecar_path_for};

/// One acquired series in the converted tree. Immutable once the
/// converter has written it; curation only augments the sidecar.
#[derive(Debug, Clone)]
pub struct Scan {
    pub data_path: Utf8PathBuf,
    pub sidecar_path: Utf8PathBuf,
    pub modality: Modality,
    pub entities: ScanEntities,
    /// Series number from the sidecar, a monotone proxy for acquisition
    /// time within a session.
    pub series_number: i64,
    /// Data path relative to the subject directory, the form
    /// `IntendedFor` entries take.
    pub relative_path: String,
}

/// Read-only view over a converted dataset tree.
#[derive(Debug, Clone)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, CurateError> {
        let root = root.into();
        if !root.as_std_path().is_dir() {
            return Err(CurateError::MissingDirectory(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn subject_dir(&self, subject: &SubjectId) -> Utf8PathBuf {
        self.root.join(subject.dirname())
    }

    pub fn session_dir(&self, subject: &SubjectId, session: &SessionId) -> Utf8PathBuf {
        self.subject_dir(subject).join(session.dirname())
    }

    pub fn subjects(&self) -> Result<Vec<SubjectId>, CurateError> {
        let mut subjects = Vec::new();
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| CurateError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| CurateError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(label) = name.strip_prefix("sub-") {
                subjects.push(label.parse()?);
            }
        }
        subjects.sort_by(|a: &SubjectId, b: &SubjectId| a.as_str().cmp(b.as_str()));
        Ok(subjects)
    }

    pub fn sessions(&self, subject: &SubjectId) -> Result<Vec<SessionId>, CurateError> {
        let subject_dir = self.subject_dir(subject);
        if !subject_dir.as_std_path().is_dir() {
            return Err(CurateError::MissingDirectory(subject_dir));
        }
        let mut sessions = Vec::new();
        let entries = fs::read_dir(subject_dir.as_std_path())
            .map_err(|err| CurateError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| CurateError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(label) = name.strip_prefix("ses-") {
                sessions.push(label.parse()?);
            }
        }
        sessions.sort_by(|a: &SessionId, b: &SessionId| a.as_str().cmp(b.as_str()));
        Ok(sessions)
    }

    /// Collect every scan for one subject (or subject/session), reading
    /// each sidecar for its series number.
    pub fn scans(
        &self,
        subject: &SubjectId,
        session: Option<&SessionId>,
    ) -> Result<Vec<Scan>, CurateError> {
        let subject_dir = self.subject_dir(subject);
        if !subject_dir.as_std_path().is_dir() {
            return Err(CurateError::MissingDirectory(subject_dir));
        }
        let scan_root = match session {
            Some(ses) => {
                let dir = self.session_dir(subject, ses);
                if !dir.as_std_path().is_dir() {
                    return Err(CurateError::MissingDirectory(dir));
                }
                dir
            }
            None => subject_dir.clone(),
        };

        let mut scans = Vec::new();
        for modality in [Modality::Func, Modality::Dwi, Modality::Fmap, Modality::Anat] {
            let modality_dir = scan_root.join(modality.dirname());
            if !modality_dir.as_std_path().is_dir() {
                continue;
            }
            let entries = fs::read_dir(modality_dir.as_std_path())
                .map_err(|err| CurateError::Filesystem(err.to_string()))?;
            for entry in entries {
                let entry = entry.map_err(|err| CurateError::Filesystem(err.to_string()))?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !(name.ends_with(".nii.gz") || name.ends_with(".nii")) {
                    continue;
                }
                let data_path = modality_dir.join(name.as_ref());
                scans.push(self.scan_from_data_path(&subject_dir, modality, &data_path)?);
            }
        }
        scans.sort_by(|a, b| {
            a.series_number
                .cmp(&b.series_number)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        Ok(scans)
    }

    fn scan_from_data_path(
        &self,
        subject_dir: &Utf8Path,
        modality: Modality,
        data_path: &Utf8Path,
    ) -> Result<Scan, CurateError> {
        let basename = data_path
            .file_name()
            .ok_or_else(|| CurateError::InvalidFilename(data_path.to_string()))?;
        let entities = ScanEntities::parse(basename)?;
        let sidecar_path = sidecar_path_for(data_path)?;
        let sidecar = Sidecar::read(&sidecar_path)?;
        let series_number = sidecar.series_number()?;
        let relative_path = data_path
            .strip_prefix(subject_dir)
            .map_err(|_| CurateError::InvalidFilename(data_path.to_string()))?
            .to_string();
        Ok(Scan {
            data_path: data_path.to_path_buf(),
            sidecar_path,
            modality,
            entities,
            series_number,
            relative_path,
        })
    }

    /// Per-subject (or subject/session) scans registry:
    /// `sub-X/sub-X_scans.tsv` or `sub-X/ses-Y/sub-X_ses-Y_scans.tsv`.
    pub fn scans_registry_path(
        &self,
        subject: &SubjectId,
        session: Option<&SessionId>,
    ) -> Utf8PathBuf {
        match session {
            Some(ses) => self.session_dir(subject, ses).join(format!(
                "{}_{}_scans.tsv",
                subject.dirname(),
                ses.dirname()
            )),
            None => self
                .subject_dir(subject)
                .join(format!("{}_scans.tsv", subject.dirname())),
        }
    }

    pub fn participants_path(&self) -> Utf8PathBuf {
        self.root.join("participants.tsv")
    }
}
