//! Named spectral indices built on [`Expr`].
//!
//! Band names differ per sensor, so every constructor takes a [`SensorBands`]
//! map. Calibration coefficients are never baked in; see [`Calibration`].

use serde::{Deserialize, Serialize};

use super::expr::{BandExpression, BinaryOp, Expr};
use crate::error::{AnalysisError, Result};

/// Physical band names for the spectral roles the indices need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorBands {
    pub green: String,
    pub red: String,
    /// ~705 nm red-edge band used by NDCI.
    pub red_edge: Option<String>,
    pub nir: String,
    /// ~1.6 µm shortwave-infrared band used by MNDWI.
    pub swir: Option<String>,
}

impl SensorBands {
    /// Sentinel-3 OLCI top-of-atmosphere radiances.
    pub fn sentinel3_olci() -> Self {
        Self {
            green: "Oa06_radiance".into(),
            red: "Oa08_radiance".into(),
            red_edge: Some("Oa11_radiance".into()),
            nir: "Oa17_radiance".into(),
            swir: None,
        }
    }

    /// Sentinel-2 MSI surface reflectance.
    pub fn sentinel2_msi() -> Self {
        Self {
            green: "B3".into(),
            red: "B4".into(),
            red_edge: Some("B5".into()),
            nir: "B8".into(),
            swir: Some("B11".into()),
        }
    }

    /// Landsat 8/9 OLI collection-2 surface reflectance.
    pub fn landsat_oli() -> Self {
        Self {
            green: "SR_B3".into(),
            red: "SR_B4".into(),
            red_edge: None,
            nir: "SR_B5".into(),
            swir: Some("SR_B6".into()),
        }
    }

    fn red_edge(&self) -> Result<&str> {
        self.red_edge
            .as_deref()
            .ok_or_else(|| AnalysisError::config("sensor has no red-edge band; NDCI is unavailable"))
    }

    fn swir(&self) -> Result<&str> {
        self.swir
            .as_deref()
            .ok_or_else(|| AnalysisError::config("sensor has no SWIR band; MNDWI is unavailable"))
    }
}

/// A chlorophyll-a calibration `chl = a₀ + a₁·N + a₂·N²` on a (possibly
/// offset) NDCI value `N = NDCI + ndci_offset`.
///
/// Published calibrations disagree depending on sensor, sun geometry and water
/// body, so the coefficients must come from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub name: String,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub ndci_offset: f64,
    /// NDCI below this value is treated as clear water (chlorophyll 0).
    #[serde(default)]
    pub clear_water_ndci: Option<f64>,
}

impl Calibration {
    pub fn validate(&self) -> Result<()> {
        if self.coefficients.is_empty() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(AnalysisError::config(format!(
                "calibration '{}' needs finite polynomial coefficients",
                self.name
            )));
        }
        Ok(())
    }
}

pub fn ndwi(bands: &SensorBands) -> BandExpression {
    BandExpression::new("NDWI", Expr::normalized_difference(Expr::band(&bands.green), Expr::band(&bands.nir)))
}

pub fn mndwi(bands: &SensorBands) -> Result<BandExpression> {
    Ok(BandExpression::new(
        "MNDWI",
        Expr::normalized_difference(Expr::band(&bands.green), Expr::band(bands.swir()?)),
    ))
}

pub fn ndci(bands: &SensorBands) -> Result<BandExpression> {
    Ok(BandExpression::new(
        "NDCI",
        Expr::normalized_difference(Expr::band(bands.red_edge()?), Expr::band(&bands.red)),
    ))
}

pub fn ndvi(bands: &SensorBands) -> BandExpression {
    BandExpression::new("NDVI", Expr::normalized_difference(Expr::band(&bands.nir), Expr::band(&bands.red)))
}

/// Red-band turbidity proxy, `scale · red`.
pub fn turbidity_proxy(bands: &SensorBands, scale: f64) -> BandExpression {
    BandExpression::new("Turbidity", Expr::band(&bands.red).affine(scale, 0.0))
}

/// Chlorophyll-a from an `NDCI` band already present on the raster.
pub fn chlorophyll(calibration: &Calibration) -> Result<BandExpression> {
    calibration.validate()?;
    let n = Expr::band("NDCI").affine(1.0, calibration.ndci_offset);
    let chl = n.polynomial(calibration.coefficients.clone());
    let expr = match calibration.clear_water_ndci {
        Some(cut) => Expr::where_else(Expr::band("NDCI").lt(Expr::constant(cut)), Expr::constant(0.0), chl),
        None => chl,
    };
    Ok(BandExpression::new("Chl_a", expr))
}

/// Empirical red/green ratio chlorophyll estimate, `scale · red/green + offset`.
pub fn band_ratio_chlorophyll(bands: &SensorBands, scale: f64, offset: f64) -> BandExpression {
    BandExpression::new(
        "Chl_ratio",
        Expr::band(&bands.red).binary(BinaryOp::Div, Expr::band(&bands.green)).affine(scale, offset),
    )
}

/// Shrinkage percentage from an `NDWI` band: `(NDWI − floor) / span · 100`.
pub fn shrinkage_proxy(floor: f64, span: f64) -> Result<BandExpression> {
    if span == 0.0 || !span.is_finite() {
        return Err(AnalysisError::config("shrinkage span must be finite and non-zero"));
    }
    Ok(BandExpression::new("Shrinkage", Expr::band("NDWI").affine(100.0 / span, -floor * 100.0 / span)))
}

/// Binary water mask `index > threshold` over an existing index band.
pub fn water_mask(index_band: &str, threshold: f64) -> BandExpression {
    BandExpression::new("water", Expr::band(index_band).gt(Expr::constant(threshold)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::derive_bands;
    use crate::geo::{Bounds, Crs};
    use crate::raster::{GridSpec, Raster};

    fn olci_pixel(oa08: f32, oa11: f32) -> Raster {
        let grid = GridSpec::new(1, 1, Bounds::new(0.0, 0.0, 1.0, 1.0), Crs::Projected).unwrap();
        Raster::new("olci", grid)
            .with_band("Oa06_radiance", vec![40.0])
            .unwrap()
            .with_band("Oa08_radiance", vec![oa08])
            .unwrap()
            .with_band("Oa11_radiance", vec![oa11])
            .unwrap()
            .with_band("Oa17_radiance", vec![20.0])
            .unwrap()
    }

    fn mishra() -> Calibration {
        Calibration {
            name: "mishra".into(),
            coefficients: vec![14.039, 86.115, 194.325],
            ndci_offset: 0.0,
            clear_water_ndci: Some(-0.05),
        }
    }

    #[test]
    fn chlorophyll_follows_calibration_polynomial() {
        let bands = SensorBands::sentinel3_olci();
        // NDCI = (60 − 40) / 100 = 0.2
        let r = olci_pixel(40.0, 60.0);
        let out = derive_bands(&r, &[ndci(&bands).unwrap(), chlorophyll(&mishra()).unwrap()]).unwrap();
        let chl = out.require_band("Chl_a").unwrap().data[0] as f64;
        let expected = 14.039 + 86.115 * 0.2 + 194.325 * 0.04;
        assert!((chl - expected).abs() < 1e-3, "chl = {chl}, expected {expected}");
    }

    #[test]
    fn clear_water_forces_zero_chlorophyll() {
        let bands = SensorBands::sentinel3_olci();
        let r = olci_pixel(60.0, 40.0);
        let out = derive_bands(&r, &[ndci(&bands).unwrap(), chlorophyll(&mishra()).unwrap()]).unwrap();
        assert_eq!(out.require_band("Chl_a").unwrap().data[0], 0.0);
    }

    #[test]
    fn swapping_calibration_changes_output_without_code_change() {
        let bands = SensorBands::sentinel3_olci();
        let r = olci_pixel(40.0, 60.0);
        let shifted = Calibration { name: "offset".into(), ndci_offset: 0.1, clear_water_ndci: None, ..mishra() };
        let a = derive_bands(&r, &[ndci(&bands).unwrap(), chlorophyll(&mishra()).unwrap()]).unwrap();
        let b = derive_bands(&r, &[ndci(&bands).unwrap(), chlorophyll(&shifted).unwrap()]).unwrap();
        assert!(b.require_band("Chl_a").unwrap().data[0] > a.require_band("Chl_a").unwrap().data[0]);
    }

    #[test]
    fn band_ratio_chlorophyll_scales_red_over_green() {
        let bands = SensorBands::sentinel3_olci();
        // red / green = 30 / 40
        let out = crate::bands::apply(&olci_pixel(30.0, 50.0), &band_ratio_chlorophyll(&bands, 20.0, 1.0)).unwrap();
        let v = out.require_band("Chl_ratio").unwrap().data[0];
        assert!((v - 16.0).abs() < 1e-4, "ratio chlorophyll = {v}");
    }

    #[test]
    fn mndwi_requires_swir() {
        assert!(mndwi(&SensorBands::sentinel3_olci()).is_err());
        assert!(mndwi(&SensorBands::landsat_oli()).is_ok());
    }

    #[test]
    fn shrinkage_maps_floor_to_zero_and_ceiling_to_hundred() {
        let grid = GridSpec::new(2, 1, Bounds::new(0.0, 0.0, 2.0, 1.0), Crs::Projected).unwrap();
        let r = Raster::new("n", grid).with_band("NDWI", vec![-0.5, 0.8]).unwrap();
        let out = crate::bands::apply(&r, &shrinkage_proxy(-0.5, 1.3).unwrap()).unwrap();
        let d = &out.require_band("Shrinkage").unwrap().data;
        assert!(d[0].abs() < 1e-4);
        assert!((d[1] - 100.0).abs() < 1e-3);
    }
}
