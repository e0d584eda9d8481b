use std::fs;

use camino::Utf8Path;

use crate::error::CurateError;

/// Success phrase the external validator prints for a well-formed
/// dataset. The merge step is only safe once this check passes.
pub const SUCCESS_PHRASE: &str = "This dataset appears to be BIDS compatible";

pub fn is_bids_compatible(validator_output: &str) -> bool {
    validator_output.contains(SUCCESS_PHRASE)
}

/// Read a captured validator transcript and decide whether the dataset
/// passed.
pub fn check_validator_file(path: &Utf8Path) -> Result<bool, CurateError> {
    if !path.as_std_path().is_file() {
        return Err(CurateError::MissingFile(path.to_path_buf()));
    }
    let output = fs::read_to_string(path.as_std_path())
        .map_err(|err| CurateError::Filesystem(err.to_string()))?;
    Ok(is_bids_compatible(&output))
}
