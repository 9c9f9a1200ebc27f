//! Band algebra and index engine. Stateless; every call is referentially transparent.
pub mod expr;
pub mod indices;

pub use expr::{BandExpression, BinaryOp, CompareOp, Expr};
pub use indices::{Calibration, SensorBands};

use crate::error::Result;
use crate::raster::{Band, Raster};

/// Evaluate `expression` into a new single-band raster aligned to `raster`'s grid.
pub fn apply(raster: &Raster, expression: &BandExpression) -> Result<Raster> {
    let band = evaluate_band(raster, expression)?;
    let mut out = Raster::new(raster.name.clone(), raster.grid);
    out.push_band(band)?;
    Ok(out)
}

/// Copy `raster` and append one band per expression, in order, so later
/// expressions may read bands derived by earlier ones.
pub fn derive_bands(raster: &Raster, expressions: &[BandExpression]) -> Result<Raster> {
    let mut out = raster.clone();
    for expression in expressions {
        let band = evaluate_band(&out, expression)?;
        out.push_band(band)?;
    }
    Ok(out)
}

impl Raster {
    /// Method form of [`derive_bands`].
    pub fn with_derived(&self, expressions: &[BandExpression]) -> Result<Raster> {
        derive_bands(self, expressions)
    }
}

fn evaluate_band(raster: &Raster, expression: &BandExpression) -> Result<Band> {
    let values = expression.expr.evaluate(raster)?;
    Ok(Band {
        name: expression.name.clone(),
        data: values.into_iter().map(|v| v as f32).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Bounds, Crs};
    use crate::raster::GridSpec;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn normalized_difference_stays_in_unit_range() {
        let n = 4096;
        let grid = GridSpec::new(64, 64, Bounds::new(0.0, 0.0, 64.0, 64.0), Crs::Projected).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut a: Vec<f32> = (0..n).map(|_| rng.gen_range(0.0..10_000.0)).collect();
        let mut b: Vec<f32> = (0..n).map(|_| rng.gen_range(0.0..10_000.0)).collect();
        // Force some zero denominators, including a signed pair.
        a[0] = 0.0;
        b[0] = 0.0;
        a[1] = 3.0;
        b[1] = -3.0;
        let r = Raster::new("s", grid).with_band("A", a).unwrap().with_band("B", b).unwrap();

        let nd = BandExpression::new("ND", Expr::normalized_difference(Expr::band("A"), Expr::band("B")));
        let out = apply(&r, &nd).unwrap();
        let data = &out.require_band("ND").unwrap().data;

        assert!(data[0].is_nan(), "zero denominator must be no-data, got {}", data[0]);
        assert!(data[1].is_nan(), "signed zero sum must be no-data, got {}", data[1]);
        for &v in &data[2..] {
            assert!((-1.0..=1.0).contains(&v), "ND value {v} outside [-1, 1]");
        }
        assert_eq!(out.bands().len(), 1);
        assert_eq!(out.grid, r.grid);
    }

    #[test]
    fn derive_bands_chains_outputs() {
        let grid = GridSpec::new(1, 1, Bounds::new(0.0, 0.0, 1.0, 1.0), Crs::Projected).unwrap();
        let r = Raster::new("s", grid).with_band("x", vec![2.0]).unwrap();
        let out = derive_bands(
            &r,
            &[
                BandExpression::new("y", Expr::band("x").affine(10.0, 0.0)),
                BandExpression::new("z", Expr::band("y").affine(1.0, 1.0)),
            ],
        )
        .unwrap();
        assert_eq!(out.band_names(), vec!["x", "y", "z"]);
        assert_eq!(out.require_band("z").unwrap().data[0], 21.0);

        let bad = r.with_derived(&[BandExpression::new("w", Expr::band("missing"))]);
        assert!(bad.is_err());
    }
}
