use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CurateError;

/// Subject label without the `sub-` prefix. Input may carry the prefix;
/// it is stripped on parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name in the dataset tree, e.g. `sub-01`.
    pub fn dirname(&self) -> String {
        format!("sub-{}", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = CurateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let label = value.trim().strip_prefix("sub-").unwrap_or(value.trim());
        let is_valid = !label.is_empty() && label.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(CurateError::InvalidSubject(value.to_string()));
        }
        Ok(Self(label.to_string()))
    }
}

/// Session label without the `ses-` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn dirname(&self) -> String {
        format!("ses-{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = CurateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let label = value.trim().strip_prefix("ses-").unwrap_or(value.trim());
        let is_valid = !label.is_empty() && label.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(CurateError::InvalidSession(value.to_string()));
        }
        Ok(Self(label.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Func,
    Dwi,
    Fmap,
    Anat,
}

impl Modality {
    pub fn dirname(self) -> &'static str {
        match self {
            Modality::Func => "func",
            Modality::Dwi => "dwi",
            Modality::Fmap => "fmap",
            Modality::Anat => "anat",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dirname())
    }
}

/// Phase-encoding direction label carried in the `dir-` entity of
/// field-map filenames. The scanner acquires opposed pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PhaseDir {
    #[serde(rename = "AP")]
    Ap,
    #[serde(rename = "PA")]
    Pa,
}

impl PhaseDir {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseDir::Ap => "AP",
            PhaseDir::Pa => "PA",
        }
    }
}

impl fmt::Display for PhaseDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PhaseDir {
    type Err = CurateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "AP" => Ok(PhaseDir::Ap),
            "PA" => Ok(PhaseDir::Pa),
            _ => Err(CurateError::InvalidPhaseDir(value.to_string())),
        }
    }
}

/// Which acquisition class a field map corrects, carried in the `acq-`
/// entity of field-map filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FmapTargetClass {
    Func,
    Dwi,
}

impl FmapTargetClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FmapTargetClass::Func => "func",
            FmapTargetClass::Dwi => "dwi",
        }
    }

    pub fn target_modality(self) -> Modality {
        match self {
            FmapTargetClass::Func => Modality::Func,
            FmapTargetClass::Dwi => Modality::Dwi,
        }
    }
}

impl fmt::Display for FmapTargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FmapTargetClass {
    type Err = CurateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "func" => Ok(FmapTargetClass::Func),
            "dwi" => Ok(FmapTargetClass::Dwi),
            _ => Err(CurateError::InvalidTargetClass(value.to_string())),
        }
    }
}

/// Image axis along which phase encoding runs, from the first character
/// of the sidecar's `PhaseEncodingDirection` value (`j-` and `j` share
/// an axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAxis {
    I,
    J,
    K,
}

impl PhaseAxis {
    pub fn index(self) -> usize {
        match self {
            PhaseAxis::I => 0,
            PhaseAxis::J => 1,
            PhaseAxis::K => 2,
        }
    }

    pub fn from_encoding_direction(value: &str) -> Result<Self, CurateError> {
        match value.chars().next() {
            Some('i') => Ok(PhaseAxis::I),
            Some('j') => Ok(PhaseAxis::J),
            Some('k') => Ok(PhaseAxis::K),
            _ => Err(CurateError::InvalidPhaseAxis(value.to_string())),
        }
    }
}

/// Grouping key scoping field-map association: one resolver pass runs
/// per direction/class pair within a subject/session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bucket {
    pub dir: PhaseDir,
    pub class: FmapTargetClass,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dir-{} acq-{}", self.dir, self.class)
    }
}

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^sub-(?P<sub>[A-Za-z0-9]+)(?:_ses-(?P<ses>[A-Za-z0-9]+))?(?:_task-(?P<task>[A-Za-z0-9]+))?(?:_acq-(?P<acq>[A-Za-z0-9]+))?(?:_dir-(?P<dir>[A-Za-z0-9]+))?(?:_run-(?P<run>[0-9]+))?_(?P<suffix>[A-Za-z0-9]+)\.(?P<ext>nii\.gz|nii|json)$",
    )
    .expect("entity regex is valid")
});

/// Entities parsed from a BIDS basename, e.g.
/// `sub-01_ses-01_task-rest_bold.nii.gz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntities {
    pub subject: SubjectId,
    pub session: Option<SessionId>,
    pub task: Option<String>,
    pub acq: Option<String>,
    pub dir: Option<String>,
    pub run: Option<u32>,
    pub suffix: String,
}

impl ScanEntities {
    pub fn parse(basename: &str) -> Result<Self, CurateError> {
        let caps = ENTITY_RE
            .captures(basename)
            .ok_or_else(|| CurateError::InvalidFilename(basename.to_string()))?;

        let subject: SubjectId = caps["sub"].parse()?;
        let session = caps
            .name("ses")
            .map(|m| m.as_str().parse::<SessionId>())
            .transpose()?;
        let run = caps
            .name("run")
            .map(|m| m.as_str().parse::<u32>())
            .transpose()
            .map_err(|_| CurateError::InvalidFilename(basename.to_string()))?;

        Ok(Self {
            subject,
            session,
            task: caps.name("task").map(|m| m.as_str().to_string()),
            acq: caps.name("acq").map(|m| m.as_str().to_string()),
            dir: caps.name("dir").map(|m| m.as_str().to_string()),
            run,
            suffix: caps["suffix"].to_string(),
        })
    }

    /// Field maps carry both a `dir-` and an `acq-` entity; anything
    /// else has no bucket.
    pub fn bucket(&self) -> Option<Bucket> {
        let dir = self.dir.as_deref()?.parse::<PhaseDir>().ok()?;
        let class = self.acq.as_deref()?.parse::<FmapTargetClass>().ok()?;
        Some(Bucket { dir, class })
    }
}
