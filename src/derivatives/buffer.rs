// src/derivatives/buffer.rs
use crate::error::{Result, SimError};

/// Row-major image over the region of interest
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Image {
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(SimError::EmptyBuffer { rows, cols });
        }
        Ok(Self { rows, cols, data: vec![0.0; rows * cols] })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.data[row * self.cols + col])
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Largest absolute pixel value
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0, |m, v| m.max(v.abs()))
    }
}

/// Zeroed image plus the current value of one refinable parameter.
#[derive(Debug, Clone)]
pub struct AccumulationBuffer {
    pub image: Image,
    /// Second derivative, filled only by passes that compute curvatures
    pub curvature: Image,
    pub value: f64,
    pub active: bool,
}

impl AccumulationBuffer {
    pub fn initialize(rows: usize, cols: usize) -> Result<Self> {
        Ok(Self {
            image: Image::zeros(rows, cols)?,
            curvature: Image::zeros(rows, cols)?,
            value: 0.0,
            active: false,
        })
    }

    pub fn accumulate(&mut self, index: usize, delta: f64) -> Result<()> {
        let len = self.image.len();
        match self.image.data.get_mut(index) {
            Some(px) => {
                *px += delta;
                Ok(())
            }
            None => Err(SimError::IndexOutOfRange { index, len }),
        }
    }

    pub fn accumulate_curvature(&mut self, index: usize, delta: f64) -> Result<()> {
        let len = self.curvature.len();
        match self.curvature.data.get_mut(index) {
            Some(px) => {
                *px += delta;
                Ok(())
            }
            None => Err(SimError::IndexOutOfRange { index, len }),
        }
    }

    pub fn zero(&mut self) {
        self.image.data.iter_mut().for_each(|v| *v = 0.0);
        self.curvature.data.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn shape(&self) -> (usize, usize) {
        self.image.shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_rejects_empty() {
        assert_eq!(
            AccumulationBuffer::initialize(0, 4).unwrap_err(),
            SimError::EmptyBuffer { rows: 0, cols: 4 }
        );
        assert!(AccumulationBuffer::initialize(3, 0).is_err());
    }

    #[test]
    fn test_accumulate_is_additive() {
        let mut buf = AccumulationBuffer::initialize(2, 3).unwrap();
        assert!(!buf.active);
        assert_eq!(buf.image.sum(), 0.0);

        buf.accumulate(4, 1.5).unwrap();
        buf.accumulate(4, -0.25).unwrap();
        buf.accumulate(0, 2.0).unwrap();

        assert_eq!(buf.image.get(1, 1), Some(1.25));
        assert_eq!(buf.image.get(0, 0), Some(2.0));
        assert!(buf.accumulate(6, 1.0).is_err());

        buf.accumulate_curvature(5, 3.0).unwrap();
        assert_eq!(buf.curvature.get(1, 2), Some(3.0));
        assert_eq!(buf.image.get(1, 2), Some(0.0));
        assert!(buf.accumulate_curvature(6, 1.0).is_err());

        buf.zero();
        assert_eq!(buf.image.max_abs(), 0.0);
        assert_eq!(buf.curvature.max_abs(), 0.0);
        assert_eq!(buf.shape(), (2, 3));
    }
}
