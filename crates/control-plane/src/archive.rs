use std::io::{Cursor, Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::transfer::{LATEST_VERSION, MANIFEST_MEMBER};

/// Local file header signature every zip archive starts with.
pub const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{0} not found")]
    MissingMember(String),
    #[error("failed to read {member}: {reason}")]
    Read { member: String, reason: String },
    #[error("failed to decode {member}: {reason}")]
    Decode { member: String, reason: String },
    #[error("failed to write archive: {0}")]
    Write(String),
    #[error("invalid archive: {0}")]
    Invalid(String),
}

pub fn has_zip_magic(content: &[u8]) -> bool {
    content.starts_with(&ZIP_MAGIC)
}

pub fn key_member(key: &str, version: &str) -> String {
    format!("kv/{}/{}", STANDARD.encode(key.as_bytes()), version)
}

pub fn latest_member(key: &str) -> String {
    key_member(key, LATEST_VERSION)
}

pub fn policy_member(name: &str) -> String {
    format!("policies/{}", STANDARD.encode(name.as_bytes()))
}

pub fn token_member(accessor_id: &str) -> String {
    format!("tokens/{accessor_id}")
}

pub struct ArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
}

fn member_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    pub fn add(&mut self, member: &str, data: &[u8]) -> Result<(), ArchiveError> {
        self.zip
            .start_file(member, member_options())
            .map_err(|err| ArchiveError::Write(err.to_string()))?;
        self.zip
            .write_all(data)
            .map_err(|err| ArchiveError::Write(err.to_string()))
    }

    pub fn add_json<T: serde::Serialize>(&mut self, member: &str, value: &T) -> Result<(), ArchiveError> {
        let data = serde_json::to_vec(value).map_err(|err| ArchiveError::Write(err.to_string()))?;
        self.add(member, &data)
    }

    pub fn finish(self) -> Result<Vec<u8>, ArchiveError> {
        let cursor = self
            .zip
            .finish()
            .map_err(|err| ArchiveError::Write(err.to_string()))?;
        Ok(cursor.into_inner())
    }
}

pub struct ArchiveReader {
    zip: ZipArchive<Cursor<Vec<u8>>>,
}

impl ArchiveReader {
    pub fn open(content: Vec<u8>) -> Result<Self, ArchiveError> {
        if !has_zip_magic(&content) {
            return Err(ArchiveError::Invalid("missing zip signature".to_string()));
        }
        let zip = ZipArchive::new(Cursor::new(content))
            .map_err(|err| ArchiveError::Invalid(err.to_string()))?;
        Ok(Self { zip })
    }

    pub fn read(&mut self, member: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut file = self.zip.by_name(member).map_err(|err| match err {
            ZipError::FileNotFound => ArchiveError::MissingMember(member.to_string()),
            other => ArchiveError::Read {
                member: member.to_string(),
                reason: other.to_string(),
            },
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|err| ArchiveError::Read {
            member: member.to_string(),
            reason: err.to_string(),
        })?;
        Ok(data)
    }

    pub fn read_json<T: DeserializeOwned>(&mut self, member: &str) -> Result<T, ArchiveError> {
        let data = self.read(member)?;
        serde_json::from_slice(&data).map_err(|err| ArchiveError::Decode {
            member: member.to_string(),
            reason: err.to_string(),
        })
    }

    pub fn manifest<T: DeserializeOwned>(&mut self) -> Result<T, ArchiveError> {
        self.read_json(MANIFEST_MEMBER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_use_standard_base64_names() {
        assert_eq!(latest_member("a/b"), "kv/YS9i/latest");
        assert_eq!(policy_member("ops"), "policies/b3Bz");
        assert_eq!(token_member("abc"), "tokens/abc");
    }

    #[test]
    fn written_archive_reads_back() {
        let mut writer = ArchiveWriter::new();
        writer.add("kv/YQ==/latest", b"1").expect("add");
        let bytes = writer.finish().expect("finish");
        assert!(has_zip_magic(&bytes));

        let mut reader = ArchiveReader::open(bytes).expect("open");
        assert_eq!(reader.read("kv/YQ==/latest").expect("read"), b"1");
        assert!(matches!(
            reader.read("metadata.json"),
            Err(ArchiveError::MissingMember(_))
        ));
    }

    #[test]
    fn rejects_content_without_signature() {
        assert!(matches!(
            ArchiveReader::open(b"{}".to_vec()),
            Err(ArchiveError::Invalid(_))
        ));
    }
}
