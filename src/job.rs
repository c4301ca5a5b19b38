//! Conversion job payload parsing and validation

use crate::error::{Error, Result};
use crate::source::ContentSource;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The only accepted request content type
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A virtual file declared in the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the sandbox `files` directory
    pub name: String,
    /// `None` when the payload carried `null`
    pub source: Option<ContentSource>,
}

/// A validated conversion job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Files passed to the tool as positional inputs, in payload order
    pub files: Vec<FileEntry>,
    /// Supporting files, written but not passed as inputs
    pub extra_files: Vec<FileEntry>,
    /// Arguments placed before the input names
    pub args: Vec<String>,
}

/// Reject anything but an exact `application/json` content type.
pub fn check_content_type(content_type: Option<&str>) -> Result<()> {
    match content_type {
        Some(JSON_CONTENT_TYPE) => Ok(()),
        other => Err(Error::BadContentType {
            content_type: other.unwrap_or("<none>").to_string(),
        }),
    }
}

impl JobRequest {
    /// Parse and validate a raw JSON body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body).map_err(|e| {
            if e.is_io() {
                Error::Internal {
                    reason: format!("Unexpected error while parsing the request: {}", e),
                }
            } else {
                Error::MalformedBody(e)
            }
        })?;
        Self::from_value(value)
    }

    /// Validate an already parsed payload.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut payload = match value {
            Value::Object(map) => map,
            _ => return Err(Error::MissingFiles),
        };

        let files = match payload.remove("files") {
            None => return Err(Error::MissingFiles),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(Error::InvalidFiles),
        };

        let extra_files = match payload.remove("extra_files") {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(Error::InvalidExtraFiles),
        };

        let args = match payload.remove("args") {
            None => return Err(Error::MissingArgs),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(arg) => Ok(arg),
                    _ => Err(Error::InvalidArgs),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(Error::InvalidArgs),
        };

        Ok(Self {
            files: parse_file_map(files)?,
            extra_files: parse_file_map(extra_files)?,
            args,
        })
    }

    /// Names of `files`, passed to the tool as positional inputs.
    pub fn input_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    /// Union of `files` and `extra_files`, each name once.
    ///
    /// An `extra_files` entry replaces the `files` entry of the same name in
    /// place; the remaining `extra_files` follow in their own order.
    pub fn merged_files(&self) -> Vec<&FileEntry> {
        let extras: HashMap<&str, &FileEntry> = self
            .extra_files
            .iter()
            .map(|entry| (entry.name.as_str(), entry))
            .collect();

        let mut merged: Vec<&FileEntry> = self
            .files
            .iter()
            .map(|entry| extras.get(entry.name.as_str()).copied().unwrap_or(entry))
            .collect();

        merged.extend(
            self.extra_files
                .iter()
                .filter(|extra| !self.files.iter().any(|f| f.name == extra.name)),
        );
        merged
    }
}

fn parse_file_map(map: Map<String, Value>) -> Result<Vec<FileEntry>> {
    map.into_iter()
        .map(|(name, value)| {
            let source = match value {
                Value::Null => None,
                Value::String(descriptor) => Some(ContentSource::parse(&descriptor)),
                _ => return Err(Error::InvalidFileContent { name }),
            };
            Ok(FileEntry { name, source })
        })
        .collect()
}
