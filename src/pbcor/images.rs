//! Image discovery and coarse-channel naming.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::DedupKey;

/// Suffix of images eligible for correction.
pub const IMAGE_SUFFIX: &str = "image.fits";
/// Marker of multi-frequency-synthesis images, which are not corrected.
pub const MFS_MARKER: &str = "MFS";
/// Token preceding the coarse channel number in image names.
pub const COARSE_CHANNEL_TOKEN: &str = "-coch-";

/// Width of one coarse channel in MHz.
const COARSE_CHANNEL_WIDTH_MHZ: f64 = 1.28;
const COARSE_CHANNEL_COUNT: u32 = 300;

/// `*image.fits` files directly in `dir`, sorted by name, excluding MFS images.
///
/// # Errors
///
/// Fails if the directory cannot be read.
pub fn discover_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.ends_with(IMAGE_SUFFIX) && !name.contains(MFS_MARKER) && entry.file_type()?.is_file() {
            images.push(entry.path());
        }
    }
    images.sort();
    Ok(images)
}

/// Coarse channel of an image, taken from its file name.
///
/// The channel is the text after `-coch-` up to the next `-`. Names without
/// the token fall back to their first `-`-separated field.
#[must_use]
pub fn coarse_channel_from_name(image: &Path) -> DedupKey {
    let name = image.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let tail = name.rsplit(COARSE_CHANNEL_TOKEN).next().unwrap_or(name);
    DedupKey::new(tail.split('-').next().unwrap_or(tail))
}

/// Coarse channel containing `freq_mhz`.
///
/// Channel `i` covers `[1.28 i - 0.64, 1.28 i + 0.64)` MHz with both edges
/// rounded to two decimals. Returns `None` outside channels `0..300`.
#[must_use]
pub fn coarse_channel_for_freq(freq_mhz: f64) -> Option<u32> {
    let half = COARSE_CHANNEL_WIDTH_MHZ / 2.0;
    (0..COARSE_CHANNEL_COUNT).find(|&i| {
        let centre = f64::from(i) * COARSE_CHANNEL_WIDTH_MHZ;
        let lo = round2(centre - half);
        let hi = round2(centre + half);
        freq_mhz >= lo && freq_mhz < hi
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "obs-coch-121-0002-image.fits",
            "obs-coch-121-0001-image.fits",
            "obs-coch-121-MFS-image.fits",
            "obs-coch-121-0001-residual.fits",
            "obs-coch-121-0001-image_pbcor.fits",
        ] {
            fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = discover_images(tmp.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["obs-coch-121-0001-image.fits", "obs-coch-121-0002-image.fits"]);
    }

    #[test]
    fn test_channel_from_name() {
        assert_eq!(
            coarse_channel_from_name(Path::new("/d/1234-coch-145-t0001-image.fits")).as_str(),
            "145"
        );
        assert_eq!(coarse_channel_from_name(Path::new("plain-image.fits")).as_str(), "plain");
    }

    #[test]
    fn test_channel_for_freq() {
        assert_eq!(coarse_channel_for_freq(0.0), Some(0));
        assert_eq!(coarse_channel_for_freq(153.6), Some(120));
        assert_eq!(coarse_channel_for_freq(154.24), Some(121));
        assert_eq!(coarse_channel_for_freq(154.23), Some(120));
        assert_eq!(coarse_channel_for_freq(-1.0), None);
        assert_eq!(coarse_channel_for_freq(400.0), None);
    }
}
