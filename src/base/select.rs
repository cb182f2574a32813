//! Platform selection on fetched artifacts

use crate::error::{BaseImageError, BaseImageResult};
use crate::image::{Artifact, ImageIndex, ImageManifest, Platform, PlatformSelector, Reference};

/// Narrow a fetched artifact to what the selector asks for.
///
/// `all` keeps an index as is. A single platform picks the matching index
/// entry. Several platforms keep the index once each one is present.
pub fn select(
    reference: &Reference,
    artifact: Artifact,
    selector: &PlatformSelector,
) -> BaseImageResult<Artifact> {
    match artifact {
        Artifact::Index(index) => select_from_index(reference, index, selector),
        Artifact::Image(image) => {
            check_image(reference, &image, selector)?;
            Ok(Artifact::Image(image))
        }
    }
}

fn select_from_index(
    reference: &Reference,
    index: ImageIndex,
    selector: &PlatformSelector,
) -> BaseImageResult<Artifact> {
    match selector {
        PlatformSelector::All => Ok(Artifact::Index(index)),
        PlatformSelector::Single { platform, .. } => match index.find(platform) {
            Some(entry) => Ok(Artifact::Image(entry.into())),
            None => Err(not_found(reference, &index, platform)),
        },
        PlatformSelector::Many(platforms) => {
            if let Some(missing) = platforms.iter().find(|p| index.find(p).is_none()) {
                return Err(not_found(reference, &index, missing));
            }
            Ok(Artifact::Index(index))
        }
    }
}

fn check_image(
    reference: &Reference,
    image: &ImageManifest,
    selector: &PlatformSelector,
) -> BaseImageResult<()> {
    // Images that don't report a platform are taken on trust
    let Some(ref actual) = image.platform else {
        return Ok(());
    };

    let requested: &[Platform] = match selector {
        PlatformSelector::All => return Ok(()),
        PlatformSelector::Single {
            explicit: false, ..
        } => return Ok(()),
        PlatformSelector::Single { platform, .. } => std::slice::from_ref(platform),
        PlatformSelector::Many(platforms) => platforms,
    };

    match requested.iter().find(|p| !p.matches(actual)) {
        Some(wanted) => Err(BaseImageError::PlatformMismatch {
            reference: reference.to_string(),
            requested: wanted.to_string(),
            actual: actual.to_string(),
        }),
        None => Ok(()),
    }
}

fn not_found(reference: &Reference, index: &ImageIndex, platform: &Platform) -> BaseImageError {
    BaseImageError::PlatformNotFound {
        reference: reference.to_string(),
        platform: platform.to_string(),
        available: index.platforms_display(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::descriptor::{OCI_INDEX, OCI_MANIFEST};
    use crate::image::{Digest, IndexEntry};

    fn reference() -> Reference {
        Reference::parse("gcr.io/base/multi:v1").unwrap()
    }

    fn entry(platform: Platform) -> IndexEntry {
        IndexEntry {
            digest: Digest::sha256_of(platform.to_string().as_bytes()),
            media_type: OCI_MANIFEST.to_string(),
            size: 1024,
            platform: Some(platform),
        }
    }

    fn index() -> Artifact {
        Artifact::Index(ImageIndex {
            digest: Digest::sha256_of(b"index"),
            media_type: OCI_INDEX.to_string(),
            manifests: vec![
                entry(Platform::new("linux", "amd64")),
                entry(Platform::new("linux", "arm64").with_variant("v8")),
            ],
        })
    }

    fn image(platform: Option<Platform>) -> Artifact {
        Artifact::Image(ImageManifest {
            digest: Digest::sha256_of(b"image"),
            media_type: OCI_MANIFEST.to_string(),
            platform,
        })
    }

    #[test]
    fn all_keeps_index() {
        let got = select(&reference(), index(), &PlatformSelector::All).unwrap();
        assert_eq!(got, index());
    }

    #[test]
    fn single_platform_picks_entry() {
        let selector = PlatformSelector::single(Platform::new("linux", "arm64"));
        let got = select(&reference(), index(), &selector).unwrap();

        assert!(!got.is_index());
        assert_eq!(got.digest(), &Digest::sha256_of(b"linux/arm64/v8"));
    }

    #[test]
    fn implicit_default_picks_amd64() {
        let selector = PlatformSelector::from_requested(Vec::<String>::new()).unwrap();
        let got = select(&reference(), index(), &selector).unwrap();
        assert_eq!(got.digest(), &Digest::sha256_of(b"linux/amd64"));
    }

    #[test]
    fn missing_platform_lists_available() {
        let selector = PlatformSelector::single(Platform::new("linux", "s390x"));
        let err = select(&reference(), index(), &selector).unwrap_err();

        match err {
            BaseImageError::PlatformNotFound {
                platform,
                available,
                ..
            } => {
                assert_eq!(platform, "linux/s390x");
                assert_eq!(available, "linux/amd64, linux/arm64/v8");
            }
            other => panic!("expected PlatformNotFound, got {:?}", other),
        }
    }

    #[test]
    fn many_platforms_keep_index_when_covered() {
        let selector: PlatformSelector = "linux/amd64,linux/arm64".parse().unwrap();
        assert!(select(&reference(), index(), &selector).unwrap().is_index());

        let selector: PlatformSelector = "linux/amd64,linux/ppc64le".parse().unwrap();
        assert!(matches!(
            select(&reference(), index(), &selector),
            Err(BaseImageError::PlatformNotFound { .. })
        ));
    }

    #[test]
    fn explicit_platform_rejects_other_image() {
        let selector = PlatformSelector::single(Platform::new("linux", "arm64"));
        let err = select(
            &reference(),
            image(Some(Platform::new("linux", "amd64"))),
            &selector,
        )
        .unwrap_err();
        assert!(matches!(err, BaseImageError::PlatformMismatch { .. }));
    }

    #[test]
    fn implicit_platform_accepts_any_image() {
        let selector = PlatformSelector::from_requested(Vec::<String>::new()).unwrap();
        let arm = image(Some(Platform::new("linux", "arm64")));
        assert_eq!(select(&reference(), arm.clone(), &selector).unwrap(), arm);
    }

    #[test]
    fn image_without_platform_is_accepted() {
        let selector = PlatformSelector::single(Platform::new("linux", "arm64"));
        assert!(select(&reference(), image(None), &selector).is_ok());
    }
}
