//! Point-wise band expressions.
//!
//! An [`Expr`] is a pure function of the named bands it references and the
//! constants it carries. Expressions deserialize from JSON, so index formulas
//! and calibration coefficients live in configuration rather than code.
//!
//! No-data handling: a `NaN` in any input yields `NaN` in the output, and so does
//! a zero denominator. Nothing is silently coerced to zero.

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::raster::Raster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Band { name: String },
    Const { value: f64 },
    /// `(a − b) / (a + b)`; `NaN` where `a + b == 0`.
    NormalizedDifference { a: Box<Expr>, b: Box<Expr> },
    /// `c₀ + c₁·x + c₂·x² + …`
    Polynomial { input: Box<Expr>, coefficients: Vec<f64> },
    /// `scale · x + offset`
    Affine { input: Box<Expr>, scale: f64, offset: f64 },
    Binary { kind: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// 1.0 where the comparison holds, 0.0 where it does not.
    Compare { kind: CompareOp, lhs: Box<Expr>, rhs: Box<Expr> },
    And { lhs: Box<Expr>, rhs: Box<Expr> },
    Or { lhs: Box<Expr>, rhs: Box<Expr> },
    Not { input: Box<Expr> },
    /// `then` where `condition` is true, `otherwise` elsewhere.
    Where { condition: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Max { lhs: Box<Expr>, rhs: Box<Expr> },
    Min { lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    pub fn band(name: &str) -> Self {
        Expr::Band { name: name.to_string() }
    }

    pub fn constant(value: f64) -> Self {
        Expr::Const { value }
    }

    pub fn normalized_difference(a: Expr, b: Expr) -> Self {
        Expr::NormalizedDifference { a: Box::new(a), b: Box::new(b) }
    }

    pub fn polynomial(self, coefficients: Vec<f64>) -> Self {
        Expr::Polynomial { input: Box::new(self), coefficients }
    }

    pub fn affine(self, scale: f64, offset: f64) -> Self {
        Expr::Affine { input: Box::new(self), scale, offset }
    }

    pub fn binary(self, kind: BinaryOp, rhs: Expr) -> Self {
        Expr::Binary { kind, lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn compare(self, kind: CompareOp, rhs: Expr) -> Self {
        Expr::Compare { kind, lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn gt(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn ge(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Ge, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::And { lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn or(self, rhs: Expr) -> Self {
        Expr::Or { lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn where_else(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Where { condition: Box::new(condition), then: Box::new(then), otherwise: Box::new(otherwise) }
    }

    pub fn max(self, rhs: Expr) -> Self {
        Expr::Max { lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    /// Names of every band this expression reads.
    pub fn inputs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_inputs(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_inputs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Band { name } => out.push(name),
            Expr::Const { .. } => {}
            Expr::NormalizedDifference { a, b } => {
                a.collect_inputs(out);
                b.collect_inputs(out);
            }
            Expr::Polynomial { input, .. } | Expr::Affine { input, .. } | Expr::Not { input } => {
                input.collect_inputs(out)
            }
            Expr::Binary { lhs, rhs, .. }
            | Expr::Compare { lhs, rhs, .. }
            | Expr::And { lhs, rhs }
            | Expr::Or { lhs, rhs }
            | Expr::Max { lhs, rhs }
            | Expr::Min { lhs, rhs } => {
                lhs.collect_inputs(out);
                rhs.collect_inputs(out);
            }
            Expr::Where { condition, then, otherwise } => {
                condition.collect_inputs(out);
                then.collect_inputs(out);
                otherwise.collect_inputs(out);
            }
        }
    }

    /// Evaluate over every pixel of `raster`.
    pub fn evaluate(&self, raster: &Raster) -> Result<Vec<f64>> {
        let n = raster.grid.len();
        Ok(match self {
            Expr::Band { name } => raster.require_band(name)?.data.iter().map(|&v| v as f64).collect(),
            Expr::Const { value } => vec![*value; n],
            Expr::NormalizedDifference { a, b } => zip2(a.evaluate(raster)?, b.evaluate(raster)?, |a, b| {
                let sum = a + b;
                if sum == 0.0 {
                    f64::NAN
                } else {
                    (a - b) / sum
                }
            }),
            Expr::Polynomial { input, coefficients } => {
                if coefficients.is_empty() {
                    return Err(AnalysisError::config("polynomial needs at least one coefficient"));
                }
                let x = input.evaluate(raster)?;
                x.into_iter()
                    // Horner's scheme, highest degree first.
                    .map(|x| coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c))
                    .collect()
            }
            Expr::Affine { input, scale, offset } => {
                input.evaluate(raster)?.into_iter().map(|x| x * scale + offset).collect()
            }
            Expr::Binary { kind, lhs, rhs } => {
                let kind = *kind;
                zip2(lhs.evaluate(raster)?, rhs.evaluate(raster)?, move |a, b| match kind {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div if b == 0.0 => f64::NAN,
                    BinaryOp::Div => a / b,
                })
            }
            Expr::Compare { kind, lhs, rhs } => {
                let kind = *kind;
                zip2(lhs.evaluate(raster)?, rhs.evaluate(raster)?, move |a, b| {
                    if a.is_nan() || b.is_nan() {
                        return f64::NAN;
                    }
                    let holds = match kind {
                        CompareOp::Gt => a > b,
                        CompareOp::Ge => a >= b,
                        CompareOp::Lt => a < b,
                        CompareOp::Le => a <= b,
                        CompareOp::Eq => a == b,
                    };
                    from_bool(holds)
                })
            }
            Expr::And { lhs, rhs } => zip2(lhs.evaluate(raster)?, rhs.evaluate(raster)?, |a, b| {
                logic(a, b, |a, b| a && b)
            }),
            Expr::Or { lhs, rhs } => zip2(lhs.evaluate(raster)?, rhs.evaluate(raster)?, |a, b| {
                logic(a, b, |a, b| a || b)
            }),
            Expr::Not { input } => input
                .evaluate(raster)?
                .into_iter()
                .map(|v| if v.is_nan() { f64::NAN } else { from_bool(v == 0.0) })
                .collect(),
            Expr::Where { condition, then, otherwise } => {
                let cond = condition.evaluate(raster)?;
                let then = then.evaluate(raster)?;
                let otherwise = otherwise.evaluate(raster)?;
                cond.into_iter()
                    .zip(then.into_iter().zip(otherwise))
                    .map(|(c, (t, o))| {
                        if c.is_nan() {
                            f64::NAN
                        } else if c != 0.0 {
                            t
                        } else {
                            o
                        }
                    })
                    .collect()
            }
            Expr::Max { lhs, rhs } => zip2(lhs.evaluate(raster)?, rhs.evaluate(raster)?, |a, b| {
                if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
            }),
            Expr::Min { lhs, rhs } => zip2(lhs.evaluate(raster)?, rhs.evaluate(raster)?, |a, b| {
                if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
            }),
        })
    }
}

#[inline]
fn from_bool(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

#[inline]
fn logic(a: f64, b: f64, f: impl Fn(bool, bool) -> bool) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        from_bool(f(a != 0.0, b != 0.0))
    }
}

fn zip2(a: Vec<f64>, b: Vec<f64>, f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    a.into_iter().zip(b).map(|(a, b)| f(a, b)).collect()
}

/// A named derived band: the unit of configuration for the index engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandExpression {
    pub name: String,
    pub expr: Expr,
}

impl BandExpression {
    pub fn new(name: &str, expr: Expr) -> Self {
        Self { name: name.to_string(), expr }
    }
}
