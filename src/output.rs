use std::io::{self, Write};

use serde::Serialize;

use crate::anonymize::AnonymizeResult;
use crate::intended_for::CompleteResult;
use crate::merge::MergeResult;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_complete(result: &CompleteResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_merge(result: &MergeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_anonymize(result: &AnonymizeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
