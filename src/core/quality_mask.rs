use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{PipelineError, PixelValue, QualityMask, RasterLayer, SatResult};

/// Sentinel-2 L2A QA band name
pub const S2_QA_BAND: &str = "QA60";
/// Opaque cloud flag in QA60
pub const S2_CLOUD_BIT: u8 = 10;
/// Cirrus flag in QA60
pub const S2_CIRRUS_BIT: u8 = 11;

/// Named bit position in a QA band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaBit {
    pub name: String,
    pub bit: u8,
}

impl QaBit {
    pub fn new(name: impl Into<String>, bit: u8) -> Self {
        Self { name: name.into(), bit }
    }
}

/// QA band plus the bits that disqualify a pixel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaBitMask {
    pub band: String,
    pub bits: Vec<QaBit>,
}

impl QaBitMask {
    pub fn new(band: impl Into<String>, bits: Vec<QaBit>) -> Self {
        Self { band: band.into(), bits }
    }

    /// Sentinel-2 QA60 cloud and cirrus bits
    pub fn sentinel2_qa60() -> Self {
        Self::new(
            S2_QA_BAND,
            vec![QaBit::new("cloud", S2_CLOUD_BIT), QaBit::new("cirrus", S2_CIRRUS_BIT)],
        )
    }

    pub fn validate(&self) -> SatResult<()> {
        if self.bits.is_empty() {
            return Err(PipelineError::Validation {
                context: format!("QA mask on band '{}'", self.band),
                reason: "no disqualifying bits given".to_string(),
            });
        }
        if let Some(bit) = self.bits.iter().find(|b| b.bit >= 32) {
            return Err(PipelineError::Validation {
                context: format!("QA mask on band '{}'", self.band),
                reason: format!("bit '{}' at position {} exceeds 31", bit.name, bit.bit),
            });
        }
        Ok(())
    }

    /// OR of every disqualifying bit
    pub fn disqualifying_bits(&self) -> u32 {
        self.bits.iter().fold(0u32, |acc, b| acc | (1u32 << b.bit))
    }

    /// Validity mask for one layer, pixel-aligned with it
    pub fn derive_mask(&self, layer: &RasterLayer) -> SatResult<QualityMask> {
        self.validate()?;
        let qa = layer.band(&self.band)?;
        let bits = self.disqualifying_bits();

        let valid = Zip::from(&qa.values)
            .and(&qa.mask)
            .map_collect(|&value, &present| present && qa_passes(value, bits));

        let mask = QualityMask { valid, transform: layer.transform.clone() };
        log::debug!(
            "QA mask for '{}': {}/{} pixels usable",
            layer.id,
            mask.valid_count(),
            mask.valid.len()
        );
        Ok(mask)
    }

    /// Mask every data band of a layer; the QA band itself is dropped
    pub fn apply(&self, layer: &RasterLayer) -> SatResult<RasterLayer> {
        let mask = self.derive_mask(layer)?;
        if !mask.is_aligned_with(layer) {
            return Err(PipelineError::Validation {
                context: format!("layer '{}'", layer.id),
                reason: "quality mask grid does not match layer grid".to_string(),
            });
        }
        let bands = layer
            .bands
            .iter()
            .filter(|(name, _)| **name != self.band)
            .map(|(name, band)| (name.clone(), band.masked(&mask.valid)))
            .collect::<BTreeMap<_, _>>();
        layer.with_bands(bands)
    }
}

impl fmt::Display for QaBitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: Vec<String> = self.bits.iter().map(|b| format!("{}:{}", b.name, b.bit)).collect();
        write!(f, "{} bits [{}] must be clear", self.band, bits.join(", "))
    }
}

/// Non-integer or negative QA codes are not valid bit fields and fail closed
fn qa_passes(value: PixelValue, bits: u32) -> bool {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u32::MAX as PixelValue {
        return false;
    }
    (value as u32) & bits == 0
}

/// Validity filtering applied to each time-slice before reduction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskingRule {
    /// Only band-level no-data is excluded
    #[default]
    None,
    /// Bit-encoded QA band masking
    QaBits(QaBitMask),
}

impl MaskingRule {
    pub fn qa_band(&self) -> Option<&str> {
        match self {
            MaskingRule::None => None,
            MaskingRule::QaBits(mask) => Some(mask.band.as_str()),
        }
    }

    pub fn derive_mask(&self, layer: &RasterLayer) -> SatResult<Option<QualityMask>> {
        match self {
            MaskingRule::None => Ok(None),
            MaskingRule::QaBits(mask) => mask.derive_mask(layer).map(Some),
        }
    }
}

impl fmt::Display for MaskingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskingRule::None => write!(f, "no QA masking"),
            MaskingRule::QaBits(mask) => write!(f, "{}", mask),
        }
    }
}
