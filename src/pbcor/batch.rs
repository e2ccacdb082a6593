//! Turn an image directory into a deduplicated correction batch.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::BeamConfig;
use crate::core::job::THREADS_PLACEHOLDER;
use crate::core::{ArtifactLayout, BatchInput, CommandTemplate, OutputCollector, SchedulerError, WorkItem};
use crate::pbcor::images::{coarse_channel_from_name, discover_images};

/// Subdirectory receiving corrected images.
pub const OUTPUT_DIR: &str = "pbcor_images";
/// Subdirectory holding shared beam artifacts.
pub const ARTIFACT_DIR: &str = "pbs";
/// Suffix of corrected images.
pub const OUTPUT_SUFFIX: &str = "pbcor.fits";

const ARTIFACT_PREFIX: &str = "pbfile_";
const ARTIFACT_EXTENSION: &str = "npy";

/// Correction batch rooted at one image directory.
#[derive(Debug, Clone)]
pub struct PbcorBatch {
    imagedir: PathBuf,
    metafits: PathBuf,
    interpolate: bool,
    beam: BeamConfig,
}

impl PbcorBatch {
    /// Batch for the images in `imagedir` observed with `metafits`.
    pub fn new(imagedir: impl Into<PathBuf>, metafits: impl Into<PathBuf>, interpolate: bool, beam: BeamConfig) -> Self {
        Self {
            imagedir: imagedir.into(),
            metafits: metafits.into(),
            interpolate,
            beam,
        }
    }

    /// Image directory; also the working directory of every job.
    #[must_use]
    pub fn imagedir(&self) -> &Path {
        &self.imagedir
    }

    /// Directory receiving corrected images.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.imagedir.join(OUTPUT_DIR)
    }

    /// Directory holding shared beam artifacts.
    #[must_use]
    pub fn artifact_dir(&self) -> PathBuf {
        self.imagedir.join(ARTIFACT_DIR)
    }

    /// Artifact naming: `pbs/pbfile_{channel}.npy`.
    #[must_use]
    pub fn artifact_layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(self.artifact_dir(), ARTIFACT_PREFIX, ARTIFACT_EXTENSION)
    }

    /// Moves `*pbcor.fits` from the image directory into the output directory.
    #[must_use]
    pub fn output_collector(&self) -> OutputCollector {
        OutputCollector::new(&self.imagedir, OUTPUT_SUFFIX, self.output_dir())
    }

    /// Correction command for one image, with the thread count left as a placeholder.
    #[must_use]
    pub fn command_for(&self, image: &Path) -> CommandTemplate {
        let interpolated = if self.interpolate { "True" } else { "False" };
        CommandTemplate::new(format!(
            "{python} {script} --MWA_PB_file {pb} --sweetspot_file {ss} --imagename {image} \
             --outfile {outfile} --metafits {metafits} --IAU_order False \
             --num_threads {THREADS_PLACEHOLDER} --verbose False --interpolated {interpolated}",
            python = self.beam.python,
            script = self.beam.script,
            pb = self.beam.beam_pattern_file,
            ss = self.beam.sweetspot_file,
            image = image.display(),
            outfile = output_stem(image),
            metafits = self.metafits.display(),
        ))
    }

    /// One work item per image, keyed by coarse channel.
    #[must_use]
    pub fn work_items(&self, images: &[PathBuf]) -> Vec<WorkItem> {
        let output_dir = self.output_dir();
        images
            .iter()
            .map(|image| {
                let stem = image_stem(image);
                WorkItem::new(
                    stem,
                    self.command_for(image),
                    coarse_channel_from_name(image),
                    output_dir.join(format!("{}.fits", output_stem(image))),
                )
            })
            .collect()
    }

    /// Discover images, create the output and artifact directories and
    /// assemble the executor input.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Configuration`] when the image directory is missing
    /// or holds no images; [`SchedulerError::Io`] on filesystem failures.
    pub fn prepare(&self, requested_cpu: Option<usize>, requested_mem_gb: Option<f64>) -> Result<BatchInput, SchedulerError> {
        if !self.imagedir.is_dir() {
            return Err(SchedulerError::Configuration(format!(
                "image directory {} does not exist",
                self.imagedir.display()
            )));
        }
        let images = discover_images(&self.imagedir)?;
        let Some(representative) = images.first().cloned() else {
            return Err(SchedulerError::Configuration(format!(
                "no *image.fits files found in {}",
                self.imagedir.display()
            )));
        };
        fs::create_dir_all(self.output_dir())?;
        fs::create_dir_all(self.artifact_dir())?;
        info!(images = images.len(), imagedir = %self.imagedir.display(), "images discovered");

        Ok(BatchInput {
            items: self.work_items(&images),
            representative_file: representative,
            requested_cpu,
            requested_mem_gb,
            outputs: self.output_collector(),
        })
    }
}

fn image_stem(image: &Path) -> String {
    image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn output_stem(image: &Path) -> String {
    format!("{}_pbcor", image_stem(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobRole;

    fn batch(dir: &Path) -> PbcorBatch {
        PbcorBatch::new(dir, "/obs/1234.metafits", true, BeamConfig::default())
    }

    #[test]
    fn test_command_line_shape() {
        let b = batch(Path::new("/img"));
        let template = b.command_for(Path::new("/img/x-coch-120-0001-image.fits"));
        let artifact = b.artifact_layout().path(&crate::core::DedupKey::new("120"));
        let primary = template.render(4, JobRole::Primary, &artifact);
        assert_eq!(
            primary,
            "python3 mwapb.py --MWA_PB_file mwa_full_embedded_element_pattern.h5 \
             --sweetspot_file MWA_sweet_spots.npy --imagename /img/x-coch-120-0001-image.fits \
             --outfile x-coch-120-0001-image_pbcor --metafits /obs/1234.metafits --IAU_order False \
             --num_threads 4 --verbose False --interpolated True --save_pb /img/pbs/pbfile_120"
        );
        let secondary = template.render(2, JobRole::Secondary, &artifact);
        assert!(secondary.ends_with("--num_threads 2 --verbose False --interpolated True --pb_jones_file /img/pbs/pbfile_120.npy"));
    }

    #[test]
    fn test_work_items_keyed_by_channel() {
        let b = batch(Path::new("/img"));
        let items = b.work_items(&[
            PathBuf::from("/img/a-coch-120-0001-image.fits"),
            PathBuf::from("/img/a-coch-121-0001-image.fits"),
        ]);
        assert_eq!(items[0].name, "a-coch-120-0001-image");
        assert_eq!(items[0].dedup_key.as_str(), "120");
        assert_eq!(items[1].dedup_key.as_str(), "121");
        assert_eq!(
            items[0].output_path,
            PathBuf::from("/img/pbcor_images/a-coch-120-0001-image_pbcor.fits")
        );
    }

    #[test]
    fn test_prepare_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a-coch-120-0001-image.fits"), vec![0u8; 64]).unwrap();
        let input = batch(tmp.path()).prepare(Some(2), None).unwrap();
        assert_eq!(input.items.len(), 1);
        assert_eq!(input.requested_cpu, Some(2));
        assert!(tmp.path().join(OUTPUT_DIR).is_dir());
        assert!(tmp.path().join(ARTIFACT_DIR).is_dir());
    }

    #[test]
    fn test_prepare_without_images_is_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = batch(tmp.path()).prepare(None, None).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
        let err = batch(&tmp.path().join("missing")).prepare(None, None).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }
}
