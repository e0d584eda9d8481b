pub mod anonymize;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod intended_for;
pub mod layout;
pub mod merge;
pub mod output;
pub mod registry;
pub mod sidecar;
pub mod validator;
