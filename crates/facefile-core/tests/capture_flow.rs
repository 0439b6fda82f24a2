use facefile_core::camera::{CameraDevice, CameraError, FrameReader};
use facefile_core::{
    CaptureController, CaptureError, CaptureSettings, DirGallery, GalleryStore, Placement, Probe,
    ScanMatcher, Session, Verdict, Verifier, VerifyError,
};
use image::{Rgb, RgbImage};
use std::cell::Cell;
use std::path::Path;

/// Camera that yields a solid-colour frame, or fails to open.
struct SolidCamera {
    colour: Cell<Option<[u8; 3]>>,
    opened: Cell<usize>,
    closed: std::rc::Rc<Cell<usize>>,
}

impl SolidCamera {
    fn new(colour: Option<[u8; 3]>) -> Self {
        Self {
            colour: Cell::new(colour),
            opened: Cell::new(0),
            closed: Default::default(),
        }
    }
}

struct SolidHandle {
    colour: [u8; 3],
    closed: std::rc::Rc<Cell<usize>>,
}

impl Drop for SolidHandle {
    fn drop(&mut self) {
        self.closed.set(self.closed.get() + 1);
    }
}

impl FrameReader for SolidHandle {
    fn read_frame(&mut self) -> Result<RgbImage, CameraError> {
        Ok(RgbImage::from_pixel(48, 48, Rgb(self.colour)))
    }
}

impl CameraDevice for SolidCamera {
    fn open(&self) -> Result<Box<dyn FrameReader + '_>, CameraError> {
        let colour = self
            .colour
            .get()
            .ok_or_else(|| CameraError::DeviceNotFound("/dev/video0".into()))?;
        self.opened.set(self.opened.get() + 1);
        Ok(Box::new(SolidHandle {
            colour,
            closed: self.closed.clone(),
        }))
    }
}

/// "Same person" = same mean colour, distance = normalised colour difference.
struct ColourVerifier;

fn mean(image: &RgbImage) -> [f32; 3] {
    let n = (image.width() * image.height()) as f32;
    let mut sum = [0f32; 3];
    for p in image.pixels() {
        for c in 0..3 {
            sum[c] += p[c] as f32;
        }
    }
    sum.map(|s| s / n)
}

impl Verifier for ColourVerifier {
    fn verify(&self, probe: &Probe, reference: &Path) -> Result<Verdict, VerifyError> {
        let stored = image::open(reference)
            .map_err(|source| VerifyError::Reference {
                path: reference.to_path_buf(),
                source,
            })?
            .to_rgb8();
        let (a, b) = (mean(probe.image()), mean(&stored));
        let distance = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f32>() / (3.0 * 255.0);
        Ok(Verdict {
            verified: distance < 0.05,
            distance,
        })
    }
}

fn controller(root: &Path) -> CaptureController<DirGallery, ScanMatcher<ColourVerifier>> {
    let settings = CaptureSettings {
        staging_dir: root.to_path_buf(),
        ..CaptureSettings::default()
    };
    CaptureController::new(
        DirGallery::open(root.join("gallery")).unwrap(),
        ScanMatcher::new(ColourVerifier),
        settings,
    )
}

#[test]
fn new_faces_get_new_identities_and_known_faces_are_matched() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = controller(tmp.path());
    let mut session = Session::new();

    let red = SolidCamera::new(Some([200, 30, 30]));
    let blue = SolidCamera::new(Some([30, 30, 200]));

    let first = ctl.capture_and_verify(&mut session, &red).unwrap();
    assert_eq!(first.placement, Placement::Created);
    assert_eq!(first.identity.id(), 1);
    assert_eq!(session.current(), None);

    let second = ctl.capture_and_verify(&mut session, &blue).unwrap();
    assert_eq!(second.placement, Placement::Created);
    assert_eq!(second.identity.id(), 2);

    let third = ctl.capture_and_verify(&mut session, &red).unwrap();
    assert!(matches!(third.placement, Placement::Matched { .. }));
    assert_eq!(third.identity, first.identity);
    assert_eq!(session.current(), Some(first.identity));

    // Pinned to red now: a blue face still lands in red's folder.
    let fourth = ctl.capture_and_verify(&mut session, &blue).unwrap();
    assert_eq!(fourth.placement, Placement::Pinned);
    assert_eq!(fourth.identity, first.identity);

    let saved = ctl.capture_and_save(&session, &blue).unwrap();
    assert_eq!(saved.identity, first.identity);

    assert_eq!(ctl.gallery().list_images(first.identity).unwrap().len(), 4);
    assert_eq!(ctl.gallery().list_images(second.identity).unwrap().len(), 1);

    ctl.disconnect(&mut session);
    let green = SolidCamera::new(Some([30, 200, 30]));
    let fifth = ctl.capture_and_verify(&mut session, &green).unwrap();
    assert_eq!(fifth.placement, Placement::Created);
    assert_eq!(fifth.identity.id(), 3);

    assert_eq!(red.opened.get(), red.closed.get());
    assert_eq!(blue.opened.get(), blue.closed.get());
}

#[test]
fn save_without_pin_does_not_open_camera() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = controller(tmp.path());
    let session = Session::new();
    let camera = SolidCamera::new(Some([1, 2, 3]));

    let err = ctl.capture_and_save(&session, &camera).unwrap_err();
    assert!(matches!(err, CaptureError::NoPinnedIdentity));
    assert_eq!(camera.opened.get(), 0);
    assert!(ctl.gallery().list_identities().unwrap().is_empty());
}

#[test]
fn camera_failure_aborts_without_writes() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = controller(tmp.path());
    let mut session = Session::new();
    let camera = SolidCamera::new(None);

    let err = ctl.capture_and_verify(&mut session, &camera).unwrap_err();
    assert!(matches!(err, CaptureError::CameraUnavailable(_)));
    assert!(!err.is_fatal());
    assert!(ctl.gallery().list_identities().unwrap().is_empty());
}

#[test]
fn staged_probes_are_cleaned_up() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = controller(tmp.path());
    let mut session = Session::new();
    let camera = SolidCamera::new(Some([90, 160, 90]));

    ctl.capture_and_verify(&mut session, &camera).unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("facefile-probe-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn zero_padded_folders_are_not_identities() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = controller(tmp.path());
    std::fs::create_dir(tmp.path().join("gallery/user_01")).unwrap();
    let mut session = Session::new();
    let camera = SolidCamera::new(Some([200, 30, 30]));

    let first = ctl.capture_and_verify(&mut session, &camera).unwrap();
    assert_eq!(first.placement, Placement::Created);
    assert_eq!(first.identity.id(), 1);

    let second = ctl.capture_and_verify(&mut session, &camera).unwrap();
    assert!(matches!(second.placement, Placement::Matched { .. }));
    assert_eq!(second.identity, first.identity);
    assert!(tmp.path().join("gallery/user_1").is_dir());
}
