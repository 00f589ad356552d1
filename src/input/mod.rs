//! Number sequence loading
//!
//! Input files hold real numbers separated by arbitrary whitespace. Values are
//! stored as single-precision floats, matching what workers square and sum.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Immutable sequence of single-precision values owned by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct NumberSequence {
    values: Vec<f32>,
}

impl NumberSequence {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

impl From<Vec<f32>> for NumberSequence {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Load a whitespace-separated number file
pub fn load_numbers(path: &Path) -> Result<NumberSequence> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Unable to open the file: {}", path.display()))?;

    parse_numbers(&contents)
        .with_context(|| format!("Failed to parse numbers from {}", path.display()))
}

/// Parse whitespace-separated real numbers
pub fn parse_numbers(contents: &str) -> Result<NumberSequence> {
    let values = contents
        .split_whitespace()
        .enumerate()
        .map(|(i, token)| {
            token.parse::<f32>().with_context(|| {
                format!("token {} ({:?}) is not a real number", i + 1, token)
            })
        })
        .collect::<Result<Vec<f32>>>()?;

    Ok(NumberSequence::new(values))
}
