use crate::wol;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot read configuration file: {0}")]
    Read(io::Error),
    #[error("Failed to parse configuration file: {0}")]
    Corrupt(serde_json::Error),
    #[error("Invalid JSON data: {0}")]
    InvalidJson(serde_json::Error),
    #[error("Invalid configuration format: expected an array.")]
    NotAnArray,
    #[error("Invalid configuration entry: each item must have at least 'mac' and 'host' fields.")]
    MissingFields,
    #[error("Invalid configuration entry #{index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error(
        "Cannot write configuration file. Please make sure the web server can write to the folder."
    )]
    Write(#[source] io::Error),
}

/// One configured host. The position in the list is its identity.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostRecord {
    #[serde(deserialize_with = "lenient_text")]
    pub mac: String,
    #[serde(deserialize_with = "lenient_text")]
    pub host: String,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        serialize_with = "number_or_text"
    )]
    pub cidr: String,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        serialize_with = "number_or_text"
    )]
    pub port: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub comment: String,
    // Keys written by newer clients survive a save.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HostRecord {
    pub fn validate(&self) -> Result<(), wol::Error> {
        wol::parse_cidr(&self.cidr)?;
        wol::parse_port(&self.port)?;
        Ok(())
    }
}

/// Body of a wake request. Every field is optional so that a missing MAC is
/// reported by the sender like any other invalid one.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(default)]
pub struct WakeRequest {
    #[serde(deserialize_with = "lenient_text")]
    pub mac: String,
    #[serde(deserialize_with = "lenient_text")]
    pub host: String,
    #[serde(deserialize_with = "lenient_text")]
    pub cidr: String,
    #[serde(deserialize_with = "lenient_text")]
    pub port: String,
}

impl From<&HostRecord> for WakeRequest {
    fn from(record: &HostRecord) -> Self {
        Self {
            mac: record.mac.clone(),
            host: record.host.clone(),
            cidr: record.cidr.clone(),
            port: record.port.clone(),
        }
    }
}

// The browser client sends numbers, numeric strings, "" or null for the same
// field depending on how the value was entered.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or a number, found {}",
            other
        ))),
    }
}

fn number_or_text<S>(value: &str, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value.trim().parse::<u32>() {
        Ok(n) => serializer.serialize_u32(n),
        Err(_) => serializer.serialize_str(value),
    }
}

/// Parses and validates an uploaded host list.
pub fn parse_host_list(body: &[u8]) -> Result<Vec<HostRecord>, Error> {
    let value: Value = serde_json::from_slice(body).map_err(Error::InvalidJson)?;
    let entries = match value {
        Value::Array(entries) => entries,
        _ => return Err(Error::NotAnArray),
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let has_fields = entry.as_object().map_or(false, |o| {
                ["mac", "host"]
                    .iter()
                    .all(|k| o.get(*k).map_or(false, |v| !v.is_null()))
            });
            if !has_fields {
                return Err(Error::MissingFields);
            }
            let record: HostRecord = serde_json::from_value(entry).map_err(|e| {
                Error::InvalidEntry {
                    index,
                    reason: e.to_string(),
                }
            })?;
            record.validate().map_err(|e| Error::InvalidEntry {
                index,
                reason: e.to_string(),
            })?;
            Ok(record)
        })
        .collect()
}

/// The host list as stored on disk.
pub struct HostStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HostStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty list.
    pub fn load(&self) -> Result<Vec<HostRecord>, Error> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(Error::Read(err)),
        };
        serde_json::from_slice(&data).map_err(Error::Corrupt)
    }

    /// Replaces the whole list. The file is written next to the target and
    /// renamed over it, so readers never see a partial file.
    pub fn save(&self, hosts: &[HostRecord]) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(hosts).map_err(|e| Error::Write(e.into()))?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let tmp = self.temp_path();
        if let Err(err) = fs::write(&tmp, json).and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Write(err));
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".tmp.{}", process::id()));
        PathBuf::from(name)
    }
}
