// literal.rs — Literal values carried by source arrows
//
// A `Literal` is a dense row-major f64 tensor. Scalars have the empty shape.
// Integer-valued data (index sets, dense shapes) is stored as whole f64s.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A port shape: one extent per dimension, empty for scalars.
pub type Shape = Vec<usize>;

/// Largest number of elements a literal may be allocated with.
pub const MAX_ELEMENTS: usize = 1 << 24;

/// Number of elements in `shape`, or `None` when it exceeds `MAX_ELEMENTS`.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |n, &d| n.checked_mul(d))
        .filter(|&n| n <= MAX_ELEMENTS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Literal {
    shape: Shape,
    data: Vec<f64>,
}

impl Literal {
    pub fn scalar(value: f64) -> Self {
        Literal {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn vector(data: Vec<f64>) -> Self {
        Literal {
            shape: vec![data.len()],
            data,
        }
    }

    /// Build a tensor, returning `None` if `data` does not fill `shape`.
    pub fn tensor(shape: Shape, data: Vec<f64>) -> Option<Self> {
        let n = shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d));
        if n != Some(data.len()) {
            return None;
        }
        Some(Literal { shape, data })
    }

    /// All-zero tensor, or `None` when `shape` is larger than `MAX_ELEMENTS`.
    pub fn zeros(shape: Shape) -> Option<Self> {
        let n = element_count(&shape)?;
        Some(Literal {
            shape,
            data: vec![0.0; n],
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Single value of a scalar (or one-element) literal.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.data.len() == 1 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Interpret the data as non-negative integers (index sets, shapes).
    pub fn as_indices(&self) -> Option<Vec<usize>> {
        self.data
            .iter()
            .map(|&v| {
                if v >= 0.0 && v.fract() == 0.0 {
                    Some(v as usize)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Literal {
        Literal {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Elementwise combination. Scalars broadcast against tensors; otherwise
    /// shapes must agree exactly.
    pub fn zip_with(&self, other: &Literal, f: impl Fn(f64, f64) -> f64) -> Option<Literal> {
        if self.shape == other.shape {
            let data = self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Some(Literal {
                shape: self.shape.clone(),
                data,
            });
        }
        if let Some(a) = self.as_scalar().filter(|_| self.is_scalar()) {
            return Some(other.map(|b| f(a, b)));
        }
        if let Some(b) = other.as_scalar().filter(|_| other.is_scalar()) {
            return Some(self.map(|a| f(a, b)));
        }
        None
    }

    /// Mean of all elements; 0 for an empty literal.
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    /// Number of elements in one row along axis 0.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Rows `indices` along axis 0.
    pub fn gather_rows(&self, indices: &[usize]) -> Option<Literal> {
        let first = *self.shape.first()?;
        let row = self.row_len();
        let mut data = Vec::with_capacity(indices.len() * row);
        for &i in indices {
            if i >= first {
                return None;
            }
            data.extend_from_slice(&self.data[i * row..(i + 1) * row]);
        }
        let mut shape = vec![indices.len()];
        shape.extend_from_slice(&self.shape[1..]);
        Some(Literal { shape, data })
    }

    /// Dense tensor of `shape` with `values` rows placed at `indices`.
    /// `None` when the pieces do not fit or `shape` is over the size limit.
    pub fn scatter_rows(shape: Shape, indices: &[usize], values: &Literal) -> Option<Literal> {
        let mut dense = Literal::zeros(shape)?;
        let first = *dense.shape.first()?;
        let row = dense.row_len();
        if values.len() != indices.len() * row {
            return None;
        }
        for (k, &i) in indices.iter().enumerate() {
            if i >= first {
                return None;
            }
            dense.data[i * row..(i + 1) * row]
                .copy_from_slice(&values.data[k * row..(k + 1) * row]);
        }
        Some(dense)
    }

    /// Approximate equality used by tests and residual checks.
    pub fn approx_eq(&self, other: &Literal, tol: f64) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

/// Value identity: elements compare with `==`, except that bit-identical
/// elements are always equal, so a NaN literal equals itself.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a == b || a.to_bits() == b.to_bits())
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::scalar(value)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            return write!(f, "{}", self.data[0]);
        }
        write!(f, "[")?;
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "]")?;
        if self.shape.len() > 1 {
            write!(f, " {:?}", self.shape)?;
        }
        Ok(())
    }
}

/// Positions along axis 0 of `extent` that are not in `indices`, ascending.
pub fn complement(indices: &[usize], extent: usize) -> Vec<usize> {
    let mut taken = vec![false; extent];
    for &i in indices {
        if i < extent {
            taken[i] = true;
        }
    }
    (0..extent).filter(|&i| !taken[i]).collect()
}
