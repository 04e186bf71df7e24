//! Node image build and teardown.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use snafu::ResultExt;
use tracing::info;
use tracing::warn;

use crate::error::PlatformSnafu;
use crate::error::Result;
use crate::platform::ContainerPlatform;

/// Builds the node image from a local context directory.
pub struct ImageBuilder {
    platform: Arc<dyn ContainerPlatform>,
    context_dir: PathBuf,
    tag: String,
}

impl std::fmt::Debug for ImageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuilder")
            .field("context_dir", &self.context_dir)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl ImageBuilder {
    /// Builder for `tag` from `context_dir`.
    pub fn new(platform: Arc<dyn ContainerPlatform>, context_dir: impl AsRef<Path>, tag: impl Into<String>) -> Self {
        Self {
            platform,
            context_dir: context_dir.as_ref().to_path_buf(),
            tag: tag.into(),
        }
    }

    /// The image tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Build the image.
    pub fn build(&self) -> Result<()> {
        info!(tag = %self.tag, context = %self.context_dir.display(), "building image");
        self.platform.build_image(&self.context_dir, &self.tag).context(PlatformSnafu {
            operation: format!("build image {}", self.tag),
        })
    }

    /// Build the image unless `skip` is set, returning whether a build ran.
    ///
    /// Skipping assumes the tag is already present locally.
    pub fn build_unless_skipped(&self, skip: bool) -> Result<bool> {
        if skip {
            info!(tag = %self.tag, "skipping image build");
            return Ok(false);
        }
        self.build()?;
        Ok(true)
    }

    /// Remove the image and prune dangling layers.
    ///
    /// A missing image is not an error.
    pub fn cleanup(&self) -> Result<()> {
        info!(tag = %self.tag, "removing image");
        match self.platform.remove_image(&self.tag) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => warn!(tag = %self.tag, "image already removed"),
            Err(source) => {
                return Err(source).context(PlatformSnafu {
                    operation: format!("remove image {}", self.tag),
                });
            }
        }
        self.platform.prune_images().context(PlatformSnafu {
            operation: "prune images",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::InMemoryPlatform;

    #[test]
    fn test_build_then_cleanup() {
        let platform = Arc::new(InMemoryPlatform::new());
        let builder = ImageBuilder::new(platform.clone(), "/tmp/kvs", "kvstore-test");

        builder.build().unwrap();
        assert!(platform.has_image("kvstore-test"));

        builder.cleanup().unwrap();
        assert!(!platform.has_image("kvstore-test"));
        assert_eq!(platform.calls().last().map(String::as_str), Some("prune_images"));
    }

    #[test]
    fn test_skipped_build_leaves_platform_untouched() {
        let platform = Arc::new(InMemoryPlatform::new());
        let builder = ImageBuilder::new(platform.clone(), "/tmp/kvs", "kvstore-test");

        assert!(!builder.build_unless_skipped(true).unwrap());
        assert!(!platform.has_image("kvstore-test"));
        assert!(!platform.calls().iter().any(|c| c.starts_with("build_image")));

        assert!(builder.build_unless_skipped(false).unwrap());
        assert!(platform.has_image("kvstore-test"));
    }

    #[test]
    fn test_cleanup_without_image_still_prunes() {
        let platform = Arc::new(InMemoryPlatform::new());
        let builder = ImageBuilder::new(platform.clone(), "/tmp/kvs", "never-built");

        builder.cleanup().unwrap();
        assert!(platform.calls().contains(&"prune_images".to_string()));
    }
}
