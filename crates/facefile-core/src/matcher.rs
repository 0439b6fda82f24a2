//! Nearest-match search over the gallery.

use crate::gallery::{GalleryStore, StorageError};
use crate::probe::Probe;
use crate::types::Identity;
use crate::verifier::Verifier;
use std::path::PathBuf;

/// Default distance cutoff. A match must be strictly below it.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.3;

/// Result of matching a probe against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, `None` when nothing verified below the threshold.
    pub identity: Option<Identity>,
    /// Distance of the winning pair (the threshold when there is no match).
    pub distance: f32,
    /// Reference image of the winning pair.
    pub reference: Option<PathBuf>,
    /// Pairs the verifier answered.
    pub compared: usize,
    /// Pairs skipped because the verifier failed.
    pub skipped: usize,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.identity.is_some()
    }
}

/// Strategy for finding the identity a probe belongs to.
pub trait Matcher {
    fn find_match(
        &self,
        probe: &Probe,
        gallery: &dyn GalleryStore,
        threshold: f32,
    ) -> Result<MatchResult, StorageError>;
}

/// Brute-force matcher: verifies the probe against every stored image.
///
/// Best = lowest distance among verified pairs, strictly below the running
/// best (initially the threshold). Ties keep the first pair in scan order
/// (identities ascending, images by filename).
pub struct ScanMatcher<V> {
    verifier: V,
}

impl<V: Verifier> ScanMatcher<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }
}

impl<V: Verifier> Matcher for ScanMatcher<V> {
    fn find_match(
        &self,
        probe: &Probe,
        gallery: &dyn GalleryStore,
        threshold: f32,
    ) -> Result<MatchResult, StorageError> {
        let mut best = MatchResult {
            identity: None,
            distance: threshold,
            reference: None,
            compared: 0,
            skipped: 0,
        };

        for identity in gallery.list_identities()? {
            for reference in gallery.list_images(identity)? {
                let verdict = match self.verifier.verify(probe, &reference.path) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            reference = %reference.path.display(),
                            error = %e,
                            "verification failed; skipping pair"
                        );
                        best.skipped += 1;
                        continue;
                    }
                };
                best.compared += 1;

                tracing::trace!(
                    identity = %identity,
                    reference = %reference.path.display(),
                    verified = verdict.verified,
                    distance = verdict.distance,
                    "pair verified"
                );

                if verdict.verified && verdict.distance < best.distance {
                    best.identity = Some(identity);
                    best.distance = verdict.distance;
                    best.reference = Some(reference.path);
                }
            }
        }

        tracing::debug!(
            matched = ?best.identity,
            distance = best.distance,
            compared = best.compared,
            skipped = best.skipped,
            "gallery scan finished"
        );

        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::DirGallery;
    use crate::verifier::{Verdict, VerifyError};
    use chrono::NaiveDate;
    use image::RgbImage;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::path::Path;

    /// Verdicts keyed by reference file name; anything else is a non-match.
    struct Scripted {
        verdicts: HashMap<String, Result<Verdict, ()>>,
        calls: Cell<usize>,
    }

    impl Scripted {
        fn new(entries: &[(&str, Result<Verdict, ()>)]) -> Self {
            Self {
                verdicts: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: Cell::new(0),
            }
        }
    }

    impl Verifier for Scripted {
        fn verify(&self, _probe: &Probe, reference: &Path) -> Result<Verdict, VerifyError> {
            self.calls.set(self.calls.get() + 1);
            let name = reference.file_name().unwrap().to_str().unwrap();
            match self.verdicts.get(name) {
                Some(Ok(v)) => Ok(*v),
                Some(Err(())) => Err(VerifyError::Embedding("no face".into())),
                None => Ok(Verdict { verified: false, distance: 0.9 }),
            }
        }
    }

    struct AlwaysFails;

    impl Verifier for AlwaysFails {
        fn verify(&self, _probe: &Probe, _reference: &Path) -> Result<Verdict, VerifyError> {
            Err(VerifyError::Embedding("undetectable face".into()))
        }
    }

    fn hit(distance: f32) -> Result<Verdict, ()> {
        Ok(Verdict { verified: true, distance })
    }

    struct Fixture {
        gallery: DirGallery,
        probe: Probe,
        _tmp: tempfile::TempDir,
    }

    /// Gallery with identities whose images are named as given.
    fn fixture(identities: &[&[&str]]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let gallery = DirGallery::open(tmp.path().join("gallery")).unwrap();
        for names in identities {
            let id = gallery.create_identity().unwrap();
            for name in *names {
                std::fs::write(gallery.identity_dir(id).join(name), b"jpeg").unwrap();
            }
        }
        let at = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let probe = Probe::stage(RgbImage::new(4, 4), at, tmp.path()).unwrap();
        Fixture { gallery, probe, _tmp: tmp }
    }

    fn id(n: u32) -> Identity {
        Identity::new(n).unwrap()
    }

    #[test]
    fn test_matches_single_verified_reference() {
        let f = fixture(&[&["x.jpg"]]);
        let matcher = ScanMatcher::new(Scripted::new(&[("x.jpg", hit(0.1))]));

        let result = matcher.find_match(&f.probe, &f.gallery, 0.3).unwrap();
        assert_eq!(result.identity, Some(id(1)));
        assert!((result.distance - 0.1).abs() < 1e-6);
        assert_eq!(result.reference.unwrap().file_name().unwrap(), "x.jpg");
    }

    #[test]
    fn test_threshold_is_strict() {
        let f = fixture(&[&["x.jpg"]]);
        let matcher = ScanMatcher::new(Scripted::new(&[("x.jpg", hit(0.3))]));

        let result = matcher.find_match(&f.probe, &f.gallery, 0.3).unwrap();
        assert!(!result.matched());
        assert_eq!(result.compared, 1);
    }

    #[test]
    fn test_unverified_pair_never_matches() {
        let f = fixture(&[&["x.jpg"]]);
        let verdict = Ok(Verdict { verified: false, distance: 0.01 });
        let matcher = ScanMatcher::new(Scripted::new(&[("x.jpg", verdict)]));

        let result = matcher.find_match(&f.probe, &f.gallery, 0.3).unwrap();
        assert!(!result.matched());
    }

    #[test]
    fn test_lowest_distance_wins_across_identities() {
        let f = fixture(&[&["a.jpg", "b.jpg"], &["c.jpg"], &["d.jpg"]]);
        let matcher = ScanMatcher::new(Scripted::new(&[
            ("a.jpg", hit(0.25)),
            ("c.jpg", hit(0.05)),
            ("d.jpg", hit(0.2)),
        ]));

        let result = matcher.find_match(&f.probe, &f.gallery, 0.3).unwrap();
        assert_eq!(result.identity, Some(id(2)));
        assert_eq!(result.compared, 4);
    }

    #[test]
    fn test_tie_keeps_first_in_scan_order() {
        let f = fixture(&[&["a.jpg"], &["b.jpg"]]);
        let matcher = ScanMatcher::new(Scripted::new(&[("a.jpg", hit(0.1)), ("b.jpg", hit(0.1))]));

        let result = matcher.find_match(&f.probe, &f.gallery, 0.3).unwrap();
        assert_eq!(result.identity, Some(id(1)));
    }

    #[test]
    fn test_failures_are_skipped_not_fatal() {
        let f = fixture(&[&["a.jpg"], &["b.jpg"]]);
        let matcher = ScanMatcher::new(Scripted::new(&[("a.jpg", Err(())), ("b.jpg", hit(0.2))]));

        let result = matcher.find_match(&f.probe, &f.gallery, 0.3).unwrap();
        assert_eq!(result.identity, Some(id(2)));
        assert_eq!(result.skipped, 1);
        assert_eq!(result.compared, 1);
    }

    #[test]
    fn test_all_failures_yield_no_match() {
        let f = fixture(&[&["a.jpg", "b.jpg"], &["c.jpg"]]);
        let result = ScanMatcher::new(AlwaysFails)
            .find_match(&f.probe, &f.gallery, 0.3)
            .unwrap();
        assert!(!result.matched());
        assert_eq!(result.skipped, 3);
    }

    #[test]
    fn test_scans_every_image() {
        let f = fixture(&[&["a.jpg", "b.jpg", "c.jpg"], &[], &["d.jpg"]]);
        let matcher = ScanMatcher::new(Scripted::new(&[("a.jpg", hit(0.0))]));

        matcher.find_match(&f.probe, &f.gallery, 0.3).unwrap();
        assert_eq!(matcher.verifier().calls.get(), 4);
    }

    #[test]
    fn test_empty_gallery() {
        let f = fixture(&[]);
        let result = ScanMatcher::new(AlwaysFails)
            .find_match(&f.probe, &f.gallery, 0.3)
            .unwrap();
        assert!(!result.matched());
        assert_eq!(result.distance, 0.3);
        assert_eq!(result.compared + result.skipped, 0);
    }
}
