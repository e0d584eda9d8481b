use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Serializer, Value};
use serde::Serialize;

use crate::domain::PhaseAxis;
use crate::error::CurateError;
use crate::fs_util;

/// Keys retained by [`Sidecar::clean`]. Everything else the converter
/// emits (scanner CSA dumps, per-slice tables) is stripped before the
/// dataset is shared.
pub const KEEP_KEYS: &[&str] = &[
    "AnatomicalLandmarkCoordinates",
    "AcquisitionDuration",
    "AcquisitionMatrixPE",
    "CogAtlasID",
    "CogPOID",
    "CoilCombinationMethod",
    "ConversionSoftware",
    "ConversionSoftwareVersion",
    "DelayAfterTrigger",
    "DelayTime",
    "DeviceSerialNumber",
    "DwellTime",
    "EchoNumbers",
    "EchoTime",
    "EchoTrainLength",
    "EffectiveEchoSpacing",
    "FlipAngle",
    "GradientSetType",
    "HighBit",
    "ImagedNucleus",
    "ImageType",
    "ImagingFrequency",
    "InPlanePhaseEncodingDirection",
    "InstitutionName",
    "InstitutionAddress",
    "InstitutionalDepartmentName",
    "Instructions",
    "IntendedFor",
    "InversionTime",
    "MRAcquisitionType",
    "MagneticFieldStrength",
    "Manufacturer",
    "ManufacturersModelName",
    "MatrixCoilMode",
    "Modality",
    "MRTransmitCoilSequence",
    "MultibandAccelerationFactor",
    "NumberOfAverages",
    "NumberOfPhaseEncodingSteps",
    "NumberOfVolumesDiscardedByScanner",
    "NumberOfVolumesDiscardedByUser",
    "NumberShots",
    "ParallelAcquisitionTechnique",
    "ParallelReductionFactorInPlane",
    "PartialFourier",
    "PartialFourierDirection",
    "PhaseEncodingDirection",
    "PixelBandwidth",
    "ProtocolName",
    "PulseSequenceDetails",
    "PulseSequenceType",
    "ReceiveCoilActiveElements",
    "ReceiveCoilName",
    "ReconMatrixPE",
    "RepetitionTime",
    "Rows",
    "SAR",
    "ScanningSequence",
    "ScanOptions",
    "SequenceName",
    "SequenceVariant",
    "SeriesDescription",
    "SeriesNumber",
    "SliceEncodingDirection",
    "SliceLocation",
    "SliceThickness",
    "SliceTiming",
    "SoftwareVersions",
    "SpacingBetweenSlices",
    "StationName",
    "TaskDescription",
    "TaskName",
    "TotalReadoutTime",
    "Units",
    "VolumeTiming",
];

/// One scan's JSON metadata record. The backing map is key-sorted, so a
/// rewrite always produces deterministic output.
#[derive(Debug, Clone)]
pub struct Sidecar {
    path: Utf8PathBuf,
    map: Map<String, Value>,
}

impl Sidecar {
    pub fn read(path: &Utf8Path) -> Result<Self, CurateError> {
        if !path.as_std_path().is_file() {
            return Err(CurateError::MissingFile(path.to_path_buf()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CurateError::Filesystem(err.to_string()))?;
        let value: Value =
            serde_json::from_str(&content).map_err(|err| CurateError::InvalidSidecar {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        let map = match value {
            Value::Object(map) => map,
            _ => {
                return Err(CurateError::InvalidSidecar {
                    path: path.to_path_buf(),
                    message: "top-level value is not an object".to_string(),
                });
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    /// Rewrite in place: sorted keys, 4-space indent, atomic replace.
    pub fn write(&self) -> Result<(), CurateError> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = Serializer::with_formatter(&mut buf, formatter);
        self.map
            .serialize(&mut serializer)
            .map_err(|err| CurateError::Filesystem(err.to_string()))?;
        buf.push(b'\n');
        fs_util::write_bytes_atomic(&self.path, &buf)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.map.insert(key.to_string(), value);
    }

    fn missing(&self, field: &str) -> CurateError {
        CurateError::MissingField {
            field: field.to_string(),
            path: self.path.clone(),
        }
    }

    /// Integer series number, the acquisition-order proxy.
    pub fn series_number(&self) -> Result<i64, CurateError> {
        let value = self.map.get("SeriesNumber").ok_or_else(|| self.missing("SeriesNumber"))?;
        match value {
            Value::Number(num) => num
                .as_i64()
                .or_else(|| num.as_f64().map(|f| f as i64))
                .ok_or_else(|| self.missing("SeriesNumber")),
            Value::String(raw) => raw.parse::<i64>().map_err(|_| CurateError::InvalidSidecar {
                path: self.path.clone(),
                message: format!("SeriesNumber is not an integer: {raw}"),
            }),
            _ => Err(CurateError::InvalidSidecar {
                path: self.path.clone(),
                message: "SeriesNumber has unexpected type".to_string(),
            }),
        }
    }

    pub fn phase_axis(&self) -> Result<PhaseAxis, CurateError> {
        let raw = self
            .map
            .get("PhaseEncodingDirection")
            .and_then(Value::as_str)
            .ok_or_else(|| self.missing("PhaseEncodingDirection"))?;
        PhaseAxis::from_encoding_direction(raw)
    }

    /// In-plane parallel-acceleration factor; 1.0 when the converter
    /// did not record one.
    pub fn acceleration(&self) -> f64 {
        self.map
            .get("ParallelReductionFactorInPlane")
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
    }

    /// Effective echo spacing has no safe default; absence is fatal
    /// for readout-time derivation.
    pub fn effective_echo_spacing(&self) -> Result<f64, CurateError> {
        self.map
            .get("EffectiveEchoSpacing")
            .and_then(Value::as_f64)
            .ok_or_else(|| self.missing("EffectiveEchoSpacing"))
    }

    /// Voxel count along the phase-encode axis, from the converter's
    /// matrix fields (acquired, falling back to reconstructed).
    pub fn phase_encode_steps(&self) -> Result<u64, CurateError> {
        self.map
            .get("AcquisitionMatrixPE")
            .or_else(|| self.map.get("ReconMatrixPE"))
            .and_then(Value::as_u64)
            .ok_or_else(|| self.missing("AcquisitionMatrixPE"))
    }

    /// Restrict to the shared-key whitelist, also promoting whitelisted
    /// keys the converter tucked under `global.const`.
    pub fn clean(&mut self) {
        let global_const = self
            .map
            .get("global")
            .and_then(|v| v.get("const"))
            .and_then(Value::as_object)
            .cloned();

        let mut cleaned = Map::new();
        for key in KEEP_KEYS {
            if let Some(value) = self.map.get(*key) {
                cleaned.insert((*key).to_string(), value.clone());
            } else if let Some(consts) = &global_const
                && let Some(value) = consts.get(*key)
            {
                cleaned.insert((*key).to_string(), value.clone());
            }
        }
        self.map = cleaned;
    }
}

/// Apply [`Sidecar::clean`] to every scan sidecar in a dataset.
/// Returns the number of sidecars rewritten.
pub fn clean_dataset_sidecars(layout: &crate::layout::Layout) -> Result<usize, CurateError> {
    let mut cleaned = 0;
    for subject in layout.subjects()? {
        let sessions = layout.sessions(&subject)?;
        let passes: Vec<Option<_>> = if sessions.is_empty() {
            vec![None]
        } else {
            sessions.into_iter().map(Some).collect()
        };
        for session in passes {
            for scan in layout.scans(&subject, session.as_ref())? {
                let mut sidecar = Sidecar::read(&scan.sidecar_path)?;
                sidecar.clean();
                sidecar.write()?;
                cleaned += 1;
            }
        }
    }
    Ok(cleaned)
}

/// Sidecar path for a data file: swap the `.nii.gz`/`.nii` extension
/// for `.json`.
pub fn sidecar_path_for(data_path: &Utf8Path) -> Result<Utf8PathBuf, CurateError> {
    let name = data_path
        .file_name()
        .ok_or_else(|| CurateError::InvalidFilename(data_path.to_string()))?;
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .ok_or_else(|| CurateError::InvalidFilename(data_path.to_string()))?;
    Ok(data_path.with_file_name(format!("{stem}.json")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use serde_json::json;

    use super::*;

    fn write_sidecar(dir: &Utf8Path, name: &str, value: &Value) -> Utf8PathBuf {
        let path = dir.join(name);
        fs::write(path.as_std_path(), serde_json::to_vec(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn sidecar_path_swaps_extension() {
        let path = Utf8PathBuf::from("func/sub-01_task-rest_bold.nii.gz");
        assert_eq!(
            sidecar_path_for(&path).unwrap(),
            Utf8PathBuf::from("func/sub-01_task-rest_bold.json")
        );
    }

    #[test]
    fn accessors_and_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = write_sidecar(
            &dir,
            "scan.json",
            &json!({
                "SeriesNumber": 7,
                "PhaseEncodingDirection": "j-",
                "EffectiveEchoSpacing": 0.0005,
                "AcquisitionMatrixPE": 64
            }),
        );

        let sidecar = Sidecar::read(&path).unwrap();
        assert_eq!(sidecar.series_number().unwrap(), 7);
        assert_eq!(sidecar.phase_axis().unwrap(), PhaseAxis::J);
        assert_eq!(sidecar.acceleration(), 1.0);
        assert_eq!(sidecar.effective_echo_spacing().unwrap(), 0.0005);
        assert_eq!(sidecar.phase_encode_steps().unwrap(), 64);
    }

    #[test]
    fn missing_echo_spacing_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = write_sidecar(&dir, "scan.json", &json!({"SeriesNumber": 2}));

        let sidecar = Sidecar::read(&path).unwrap();
        let err = sidecar.effective_echo_spacing().unwrap_err();
        assert_matches!(err, CurateError::MissingField { field, .. } if field == "EffectiveEchoSpacing");
    }

    #[test]
    fn write_is_sorted_and_indented() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = write_sidecar(&dir, "scan.json", &json!({"Zeta": 1, "Alpha": 2}));

        let mut sidecar = Sidecar::read(&path).unwrap();
        sidecar.set("Mid", json!(3));
        sidecar.write().unwrap();

        let content = fs::read_to_string(path.as_std_path()).unwrap();
        let alpha = content.find("Alpha").unwrap();
        let mid = content.find("Mid").unwrap();
        let zeta = content.find("Zeta").unwrap();
        assert!(alpha < mid && mid < zeta);
        assert!(content.contains("    \"Alpha\""));
    }

    #[test]
    fn clean_keeps_whitelist_and_promotes_global_const() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = write_sidecar(
            &dir,
            "scan.json",
            &json!({
                "EchoTime": 0.03,
                "CsaSeriesHeader": "garbage",
                "global": {"const": {"RepetitionTime": 2.0}}
            }),
        );

        let mut sidecar = Sidecar::read(&path).unwrap();
        sidecar.clean();
        assert!(sidecar.contains("EchoTime"));
        assert!(sidecar.contains("RepetitionTime"));
        assert!(!sidecar.contains("CsaSeriesHeader"));
        assert!(!sidecar.contains("global"));
    }
}
