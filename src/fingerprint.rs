//! Perceptual image fingerprinting and duplicate detection.
//!
//! Two hashes are computed per image: a 16x16 average hash (coarse, cheap)
//! and a 16x16 DCT perceptual hash (finer, robust to recompression). A new
//! report is a duplicate of an earlier one within the time window iff the
//! Hamming distance of *both* hashes is at or below the threshold - AND
//! semantics cut the false positives either hash produces alone.
//!
//! Duplicate detection is fail-open: a corrupt image degrades to an exact
//! SHA-256 content-hash comparison, and any failure means "not a duplicate"
//! rather than an error. Deduplication must never block report ingestion.

use image::imageops::FilterType;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::config::DedupConfig;
use crate::model::{DuplicateCheck, ImageFingerprint};
use crate::services::MediaStore;
use crate::storage::Storage;

/// Side length of the hash grid; 16x16 = 256 bits per hash.
const HASH_SIZE: u32 = 16;

/// The perceptual hash samples a 4x larger image before the DCT.
const PHASH_INPUT_SIZE: u32 = HASH_SIZE * 4;

/// Compute the fingerprint of an image.
///
/// Deterministic: identical bytes always yield an identical fingerprint.
/// Undecodable bytes yield a content-hash-only fingerprint instead of an
/// error.
pub fn fingerprint(image_bytes: &[u8]) -> ImageFingerprint {
    let content_hash = hex::encode(Sha256::digest(image_bytes));

    match image::load_from_memory(image_bytes) {
        Ok(img) => {
            let gray = img.to_luma8();
            ImageFingerprint {
                average_hash: Some(hex::encode(average_hash(&gray))),
                perceptual_hash: Some(hex::encode(perceptual_hash(&gray))),
                content_hash,
            }
        }
        Err(e) => {
            warn!(error = %e, "Image decode failed; falling back to content hash");
            ImageFingerprint {
                average_hash: None,
                perceptual_hash: None,
                content_hash,
            }
        }
    }
}

/// Look for a duplicate of `candidate` among reports created within the
/// window.
///
/// Two passes: stored fingerprints first (cheap), then reports that have no
/// fingerprint yet - submitted but not analyzed - whose bytes are fetched and
/// hashed on demand, so analysis order between two rapid submissions cannot
/// hide a match. Storage and fetch errors are swallowed (fail-open) and
/// reported as "no duplicate".
pub async fn find_duplicate(
    storage: &Storage,
    media: &dyn MediaStore,
    candidate: &ImageFingerprint,
    config: &DedupConfig,
    exclude_report: Option<Uuid>,
) -> DuplicateCheck {
    let recent = match storage.recent_fingerprints(config.window, exclude_report).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Duplicate lookup failed; treating report as unique");
            return DuplicateCheck::unique();
        }
    };

    for stored in &recent {
        if let Some(distance) = match_distance(candidate, &stored.fingerprint, config.hamming_threshold) {
            return DuplicateCheck {
                is_duplicate: true,
                matched_report_id: Some(stored.report_id),
                matched_distance: Some(distance),
            };
        }
    }

    let unhashed = match storage
        .recent_unhashed_reports(config.window, exclude_report)
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Pending-report lookup failed; treating report as unique");
            return DuplicateCheck::unique();
        }
    };

    for (report_id, image_ref) in unhashed {
        let bytes = match media.fetch(&image_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%report_id, error = %e, "image fetch failed during duplicate scan; skipping");
                continue;
            }
        };
        let fp = fingerprint(&bytes);
        if let Some(distance) = match_distance(candidate, &fp, config.hamming_threshold) {
            return DuplicateCheck {
                is_duplicate: true,
                matched_report_id: Some(report_id),
                matched_distance: Some(distance),
            };
        }
    }

    DuplicateCheck::unique()
}

/// Whether two fingerprints match, and at what distance.
///
/// Returns the worse of the two Hamming distances when both perceptual
/// hashes are within `threshold`, `Some(0)` for an exact content-hash match
/// when either side lacks perceptual hashes, `None` otherwise.
pub fn match_distance(
    a: &ImageFingerprint,
    b: &ImageFingerprint,
    threshold: u32,
) -> Option<u32> {
    match (
        (&a.average_hash, &a.perceptual_hash),
        (&b.average_hash, &b.perceptual_hash),
    ) {
        ((Some(aa), Some(ap)), (Some(ba), Some(bp))) => {
            let avg_dist = hamming_distance_hex(aa, ba)?;
            let per_dist = hamming_distance_hex(ap, bp)?;
            if avg_dist <= threshold && per_dist <= threshold {
                Some(avg_dist.max(per_dist))
            } else {
                None
            }
        }
        // Missing perceptual hashes on either side: only exact bytes count.
        _ => (a.content_hash == b.content_hash).then_some(0),
    }
}

/// Count of differing bits between two hex-encoded hashes.
///
/// Returns `None` for malformed or unequal-length inputs, which callers
/// treat as "no match".
pub fn hamming_distance_hex(a: &str, b: &str) -> Option<u32> {
    let a = hex::decode(a).ok()?;
    let b = hex::decode(b).ok()?;
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum(),
    )
}

/// Average hash: resize to 16x16 grayscale, set a bit for every pixel at or
/// above the mean luminance.
fn average_hash(gray: &image::GrayImage) -> Vec<u8> {
    let small = image::imageops::resize(gray, HASH_SIZE, HASH_SIZE, FilterType::Triangle);
    let pixels: Vec<f64> = small.pixels().map(|p| p.0[0] as f64).collect();
    let mean = pixels.iter().sum::<f64>() / pixels.len() as f64;

    bits_to_bytes(pixels.iter().map(|&p| p >= mean))
}

/// Perceptual hash: resize to 64x64 grayscale, 2D DCT, keep the 16x16
/// low-frequency block, set a bit for every coefficient above the block
/// median.
fn perceptual_hash(gray: &image::GrayImage) -> Vec<u8> {
    let n = PHASH_INPUT_SIZE as usize;
    let small = image::imageops::resize(gray, PHASH_INPUT_SIZE, PHASH_INPUT_SIZE, FilterType::Triangle);
    let input: Vec<f64> = small.pixels().map(|p| p.0[0] as f64).collect();

    let coeffs = dct_2d(&input, n);

    // Low-frequency block, row-major.
    let size = HASH_SIZE as usize;
    let mut block = Vec::with_capacity(size * size);
    for row in 0..size {
        for col in 0..size {
            block.push(coeffs[row * n + col]);
        }
    }

    let mut sorted = block.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = (sorted[size * size / 2 - 1] + sorted[size * size / 2]) / 2.0;

    bits_to_bytes(block.iter().map(|&c| c > median))
}

/// Separable 2D DCT-II over an n*n row-major buffer: rows first, then columns.
fn dct_2d(input: &[f64], n: usize) -> Vec<f64> {
    let mut rows = vec![0.0; n * n];
    for r in 0..n {
        let row = &input[r * n..(r + 1) * n];
        let out = dct_1d(row);
        rows[r * n..(r + 1) * n].copy_from_slice(&out);
    }

    let mut result = vec![0.0; n * n];
    let mut col_buf = vec![0.0; n];
    for c in 0..n {
        for r in 0..n {
            col_buf[r] = rows[r * n + c];
        }
        let out = dct_1d(&col_buf);
        for r in 0..n {
            result[r * n + c] = out[r];
        }
    }
    result
}

fn dct_1d(input: &[f64]) -> Vec<f64> {
    let n = input.len();
    let mut output = vec![0.0; n];
    let factor = std::f64::consts::PI / n as f64;
    for (k, out) in output.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (i, &value) in input.iter().enumerate() {
            sum += value * ((i as f64 + 0.5) * k as f64 * factor).cos();
        }
        *out = sum;
    }
    output
}

fn bits_to_bytes(bits: impl Iterator<Item = bool>) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut current = 0u8;
    let mut count = 0;
    for bit in bits {
        current = (current << 1) | (bit as u8);
        count += 1;
        if count == 8 {
            bytes.push(current);
            current = 0;
            count = 0;
        }
    }
    if count > 0 {
        bytes.push(current << (8 - count));
    }
    bytes
}
