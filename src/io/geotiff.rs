use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use crate::types::{epsg_code, is_geographic_crs, Band, GridTransform, PipelineError, PixelValue, SatResult};

// GeoTIFF tag IDs (not in the standard tiff crate)
const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
const GEOTIFF_MODELTIEPOINT: u16 = 33922;
const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

impl From<tiff::TiffError> for PipelineError {
    fn from(e: tiff::TiffError) -> Self {
        PipelineError::Tiff(e.to_string())
    }
}

/// Write one band to a GeoTIFF file
pub fn write_band<P: AsRef<Path>>(path: P, band: &Band, transform: &GridTransform) -> SatResult<()> {
    let file = File::create(path.as_ref())?;
    write_band_to(BufWriter::new(file), band, transform)
}

/// Write one band to any writer that implements Write + Seek
///
/// Invalid cells are written as NaN and flagged through `GDAL_NODATA`.
pub fn write_band_to<W: Write + Seek>(writer: W, band: &Band, transform: &GridTransform) -> SatResult<()> {
    let (rows, cols) = band.dim();
    if rows == 0 || cols == 0 {
        return Err(PipelineError::Validation {
            context: "GeoTIFF encoding".to_string(),
            reason: "raster has zero dimensions".to_string(),
        });
    }
    let epsg = epsg_code(&transform.crs).ok_or_else(|| PipelineError::Validation {
        context: "GeoTIFF encoding".to_string(),
        reason: format!("CRS '{}' is not an EPSG code", transform.crs),
    })?;

    let pixels: Vec<PixelValue> = band
        .values
        .iter()
        .zip(band.mask.iter())
        .map(|(&v, &valid)| if valid { v } else { PixelValue::NAN })
        .collect();

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<Gray32Float>(cols as u32, rows as u32)?;

    let pixel_scale = [transform.pixel_width, transform.pixel_height, 0.0];
    image.encoder().write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), &pixel_scale[..])?;

    // ties pixel (0, 0) to the grid origin
    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    image.encoder().write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), &tiepoint[..])?;

    let geokeys = geokey_directory(epsg, is_geographic_crs(&transform.crs));
    image.encoder().write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), &geokeys[..])?;
    image.encoder().write_tag(Tag::Unknown(GDAL_NODATA), "nan")?;

    image.write_data(&pixels)?;
    Ok(())
}

fn geokey_directory(epsg: u16, geographic: bool) -> Vec<u16> {
    // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys, (KeyID, Location, Count, Value)...]
    let mut keys = vec![1, 1, 0, 3];
    let model = if geographic { MODEL_TYPE_GEOGRAPHIC } else { MODEL_TYPE_PROJECTED };
    keys.extend_from_slice(&[GT_MODEL_TYPE_GEO_KEY, 0, 1, model]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
    let cs_key = if geographic { GEOGRAPHIC_TYPE_GEO_KEY } else { PROJECTED_CS_TYPE_GEO_KEY };
    keys.extend_from_slice(&[cs_key, 0, 1, epsg]);
    keys
}
