//! Pipeline Image
//!
//! Binary container for a compiled pipeline and the bounds its inputs were
//! quantized with.
//! Layout: [Header][Pipeline][Bounds][Metadata][Checksum]

use crate::{ClassLabel, Pipeline, PipelineError};
use log::debug;
use quantizer::{FeatureBounds, QuantizeError, Quantizer};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::Path;

/// Magic bytes: "PLN1"
pub const MAGIC: [u8; 4] = *b"PLN1";

/// Current format version
pub const VERSION: u16 = 1;

/// Image decoding errors
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("image I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("image section is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image too short: need {needed} bytes, have {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("invalid magic: {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("header disagrees with payload: {0}")]
    HeaderMismatch(String),

    #[error("section too large for the header: {0} bytes")]
    SectionTooLarge(usize),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Quantize(#[from] QuantizeError),
}

/// Image header (fixed size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub bit_width: u8,
    pub stage_count: u16,
    pub feature_count: u16,
    pub created_at_unix: u64,
    pub pipeline_size_bytes: u32,
    pub bounds_size_bytes: u32,
    pub metadata_size_bytes: u32,
}

/// Little-endian cursor over a byte slice
struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let end = self.offset + N;
        let slice = self.bytes.get(self.offset..end).ok_or(FormatError::TooShort {
            needed: end,
            actual: self.bytes.len(),
        })?;
        self.offset = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn section(&mut self, len: u32) -> Result<&'a [u8], FormatError> {
        let end = self.offset + len as usize;
        let slice = self.bytes.get(self.offset..end).ok_or(FormatError::TooShort {
            needed: end,
            actual: self.bytes.len(),
        })?;
        self.offset = end;
        Ok(slice)
    }
}

impl ImageHeader {
    pub const SIZE: usize = 31; // 4 + 2 + 1 + 2 + 2 + 8 + 4 + 4 + 4

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.magic);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(self.bit_width);
        buf.extend_from_slice(&self.stage_count.to_le_bytes());
        buf.extend_from_slice(&self.feature_count.to_le_bytes());
        buf.extend_from_slice(&self.created_at_unix.to_le_bytes());
        buf.extend_from_slice(&self.pipeline_size_bytes.to_le_bytes());
        buf.extend_from_slice(&self.bounds_size_bytes.to_le_bytes());
        buf.extend_from_slice(&self.metadata_size_bytes.to_le_bytes());

        let mut result = [0u8; Self::SIZE];
        result.copy_from_slice(&buf);
        result
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            magic: r.take::<4>()?,
            version: u16::from_le_bytes(r.take()?),
            bit_width: r.take::<1>()?[0],
            stage_count: u16::from_le_bytes(r.take()?),
            feature_count: u16::from_le_bytes(r.take()?),
            created_at_unix: u64::from_le_bytes(r.take()?),
            pipeline_size_bytes: u32::from_le_bytes(r.take()?),
            bounds_size_bytes: u32::from_le_bytes(r.take()?),
            metadata_size_bytes: u32::from_le_bytes(r.take()?),
        })
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        if self.magic != MAGIC {
            return Err(FormatError::BadMagic(self.magic));
        }
        if self.version != VERSION {
            return Err(FormatError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Provenance recorded next to the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub created_at: String,
    pub tree_depth: usize,
    pub leaf_count: usize,
    pub notes: String,
}

/// Complete pipeline image
#[derive(Debug, Clone)]
pub struct PipelineImage {
    pub header: ImageHeader,
    pub pipeline: Pipeline,
    pub bounds: Vec<FeatureBounds>,
    pub metadata: ImageMetadata,
}

fn section_len(bytes: &[u8]) -> Result<u32, FormatError> {
    u32::try_from(bytes.len()).map_err(|_| FormatError::SectionTooLarge(bytes.len()))
}

fn count_u16(what: &str, n: usize) -> Result<u16, FormatError> {
    u16::try_from(n).map_err(|_| FormatError::HeaderMismatch(format!("{} {} exceeds u16", what, n)))
}

impl PipelineImage {
    pub fn new(
        pipeline: Pipeline,
        bounds: Vec<FeatureBounds>,
        metadata: ImageMetadata,
        created_at_unix: u64,
    ) -> Result<Self, FormatError> {
        let header = ImageHeader {
            magic: MAGIC,
            version: VERSION,
            bit_width: pipeline.max_bit_width(),
            stage_count: count_u16("stage count", pipeline.stage_count())?,
            feature_count: count_u16("feature count", bounds.len())?,
            created_at_unix,
            pipeline_size_bytes: 0,
            bounds_size_bytes: 0,
            metadata_size_bytes: 0,
        };
        Ok(Self {
            header,
            pipeline,
            bounds,
            metadata,
        })
    }

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let pipeline_bytes = serde_json::to_vec(&self.pipeline)?;
        let bounds_bytes = serde_json::to_vec(&self.bounds)?;
        let metadata_bytes = serde_json::to_vec(&self.metadata)?;

        let header = ImageHeader {
            stage_count: count_u16("stage count", self.pipeline.stage_count())?,
            feature_count: count_u16("feature count", self.bounds.len())?,
            bit_width: self.pipeline.max_bit_width(),
            pipeline_size_bytes: section_len(&pipeline_bytes)?,
            bounds_size_bytes: section_len(&bounds_bytes)?,
            metadata_size_bytes: section_len(&metadata_bytes)?,
            ..self.header
        };

        let mut buf = Vec::with_capacity(
            ImageHeader::SIZE + pipeline_bytes.len() + bounds_bytes.len() + metadata_bytes.len() + 4,
        );
        buf.write_all(&header.to_bytes())?;
        buf.write_all(&pipeline_bytes)?;
        buf.write_all(&bounds_bytes)?;
        buf.write_all(&metadata_bytes)?;

        let crc = crc32fast::hash(&buf);
        buf.write_all(&crc.to_le_bytes())?;

        Ok(buf)
    }

    /// Deserialize from binary format; the decoded pipeline is validated
    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < ImageHeader::SIZE + 4 {
            return Err(FormatError::TooShort {
                needed: ImageHeader::SIZE + 4,
                actual: data.len(),
            });
        }

        let (payload, crc_bytes) = data.split_at(data.len() - 4);
        let mut expected = [0u8; 4];
        expected.copy_from_slice(crc_bytes);
        let expected = u32::from_le_bytes(expected);
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(FormatError::CrcMismatch { expected, actual });
        }

        let header = ImageHeader::from_bytes(payload)?;
        header.validate()?;

        let mut r = ByteReader::new(payload);
        r.section(ImageHeader::SIZE as u32)?;
        let pipeline: Pipeline = serde_json::from_slice(r.section(header.pipeline_size_bytes)?)?;
        let bounds: Vec<FeatureBounds> = serde_json::from_slice(r.section(header.bounds_size_bytes)?)?;
        let metadata: ImageMetadata = serde_json::from_slice(r.section(header.metadata_size_bytes)?)?;

        if usize::from(header.stage_count) != pipeline.stage_count() {
            return Err(FormatError::HeaderMismatch(format!(
                "header lists {} stages, pipeline has {}",
                header.stage_count,
                pipeline.stage_count()
            )));
        }
        if usize::from(header.feature_count) != bounds.len() {
            return Err(FormatError::HeaderMismatch(format!(
                "header lists {} features, bounds has {}",
                header.feature_count,
                bounds.len()
            )));
        }
        if header.bit_width != pipeline.max_bit_width() {
            return Err(FormatError::HeaderMismatch(format!(
                "header lists {}-bit fields, pipeline is at most {}-bit",
                header.bit_width,
                pipeline.max_bit_width()
            )));
        }
        if pipeline.bit_widths.len() != bounds.len() {
            return Err(FormatError::HeaderMismatch(format!(
                "pipeline declares {} features, bounds has {}",
                pipeline.bit_widths.len(),
                bounds.len()
            )));
        }
        for (b, &width) in bounds.iter().zip(&pipeline.bit_widths) {
            if b.bit_width() != width {
                return Err(FormatError::HeaderMismatch(format!(
                    "feature `{}` is {}-bit, pipeline matches it as {}-bit",
                    b.name(),
                    b.bit_width(),
                    width
                )));
            }
        }
        pipeline.validate()?;
        debug!(
            "decoded pipeline image: {} stages, {} rules, {} features",
            pipeline.stage_count(),
            pipeline.rule_count(),
            bounds.len()
        );

        Ok(Self {
            header,
            pipeline,
            bounds,
            metadata,
        })
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), FormatError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Quantize a raw row with the stored bounds and classify it
    pub fn classify_raw(&self, features: &[f64]) -> Result<ClassLabel, FormatError> {
        let quantizer = Quantizer::from_bounds(self.bounds.clone());
        let row = quantizer.transform_row(features)?;
        Ok(self.pipeline.classify(&row)?)
    }
}
