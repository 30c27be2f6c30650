// DCT fingerprints for near-duplicate image matching.
//
// The image is reduced to a 32x32 luma grid and transformed with a 2-D
// DCT-II. The 8x8 low-frequency corner gives a 64-bit signature for cheap
// Hamming pre-filtering; the 16x16 corner (minus DC) is kept as a vector and
// compared by Pearson correlation.

use image::imageops::{self, FilterType};
use image::DynamicImage;

const GRID: usize = 32;
const SIGNATURE_BLOCK: usize = 8;
const FINE_BLOCK: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub signature: u64,
    pub coefficients: Vec<f64>,
}

impl Fingerprint {
    pub fn new(signature: u64, coefficients: Vec<f64>) -> Self {
        Self {
            signature,
            coefficients,
        }
    }

    pub fn of_image(image: &DynamicImage) -> Self {
        let gray = imageops::resize(
            &image.to_luma8(),
            GRID as u32,
            GRID as u32,
            FilterType::Triangle,
        );
        let pixels: Vec<f64> = gray.pixels().map(|p| f64::from(p.0[0])).collect();
        let dct = dct_2d(&pixels, GRID);

        let block: Vec<f64> = low_frequencies(&dct, SIGNATURE_BLOCK).collect();
        let median = median(&block[1..]);
        let signature = block
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > median)
            .fold(0u64, |sig, (i, _)| sig | (1u64 << i));

        let coefficients = low_frequencies(&dct, FINE_BLOCK).skip(1).collect();
        Self::new(signature, coefficients)
    }

    pub fn hamming(&self, other: &Fingerprint) -> u32 {
        (self.signature ^ other.signature).count_ones()
    }

    pub fn correlation(&self, other: &Fingerprint) -> f64 {
        pearson(&self.coefficients, &other.coefficients)
    }
}

/// Row-major top-left `size` x `size` block of an N x N coefficient grid.
fn low_frequencies(dct: &[f64], size: usize) -> impl Iterator<Item = f64> + '_ {
    (0..size).flat_map(move |u| (0..size).map(move |v| dct[u * GRID + v]))
}

/// Separable unnormalized DCT-II over an `n` x `n` grid.
fn dct_2d(pixels: &[f64], n: usize) -> Vec<f64> {
    let table: Vec<f64> = (0..n)
        .flat_map(|k| {
            (0..n).map(move |x| {
                (std::f64::consts::PI / n as f64 * (x as f64 + 0.5) * k as f64).cos()
            })
        })
        .collect();

    let mut rows = vec![0.0; n * n];
    for y in 0..n {
        for k in 0..n {
            rows[y * n + k] = (0..n).map(|x| pixels[y * n + x] * table[k * n + x]).sum();
        }
    }

    let mut out = vec![0.0; n * n];
    for k in 0..n {
        for col in 0..n {
            out[k * n + col] = (0..n).map(|y| rows[y * n + col] * table[k * n + y]).sum();
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Pearson correlation; 0.0 when either side is constant or lengths differ.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        cov / denom
    }
}
