// tests/test_blur_demo.rs: Kernel selection, timing labels and presentation.

use std::path::PathBuf;

use gpu_dispatch::blur::BlurDemo;
use gpu_dispatch::convolution::{box_blur, EdgePolicy};
use gpu_dispatch::gpu::{HostBackend, TransferMode};
use gpu_dispatch::image::{pack_rgb, RgbImage};
use gpu_dispatch::presentation::{run_selections, FilePresenter, Presenter};
use gpu_dispatch::Error;

fn checkerboard(w: usize, h: usize) -> RgbImage {
    let mut img = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            if (x / 4 + y / 4) % 2 == 0 {
                img.set(x, y, pack_rgb(240, 120, 30));
            }
        }
    }
    img
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gpu-dispatch-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
fn selection_produces_labels_and_agreeing_images() {
    let backend = HostBackend::new();
    let mut demo = BlurDemo::new(&backend, checkerboard(40, 30));
    assert_eq!(demo.selected(), None);

    let outcome = demo.on_kernel_selected(2).unwrap();
    assert_eq!(demo.selected(), Some(2));
    assert_eq!(outcome.kernel_name, "Blur 7x7");
    assert!(outcome.host_label.starts_with("Host: "), "{}", outcome.host_label);
    assert!(outcome.device_label.starts_with("Device: "), "{}", outcome.device_label);
    assert!(outcome.host_label.ends_with(" ms"));
    assert!(outcome.agrees(), "diff {}", outcome.max_channel_diff);
    assert_eq!(outcome.device_image.width(), 40);
    assert_eq!(outcome.device_image.height(), 30);
}

#[test]
fn each_selection_releases_its_session() {
    let backend = HostBackend::new();
    let mut demo = BlurDemo::new(&backend, checkerboard(24, 24)).transfer(TransferMode::Pinned);
    for index in [0, 3, 6, 0] {
        demo.on_kernel_selected(index).unwrap();
        let ledger = backend.ledger();
        assert!(ledger.balanced(), "after {index}: {ledger}");
    }
}

#[test]
fn zero_fill_policy_reaches_the_device() {
    let backend = HostBackend::new();
    let img = RgbImage::filled(16, 16, pack_rgb(255, 255, 255));
    let mut demo = BlurDemo::new(&backend, img)
        .edge_policy(EdgePolicy::ZeroFill)
        .with_kernels(vec![box_blur(5)]);
    let outcome = demo.on_kernel_selected(0).unwrap();
    assert!(outcome.agrees());
    assert_eq!(outcome.device_image.get(0, 0), 0);
    assert_eq!(outcome.device_image.get(1, 8), 0);
    assert_eq!(outcome.device_image.get(8, 8), pack_rgb(255, 255, 255));
}

#[test]
fn bad_selection_and_missing_device() {
    let backend = HostBackend::new();
    let mut demo = BlurDemo::new(&backend, checkerboard(8, 8));
    assert!(matches!(demo.on_kernel_selected(7), Err(Error::ArgumentBinding(_))));
    assert_eq!(demo.selected(), None);

    let mut elsewhere = BlurDemo::new(&backend, checkerboard(8, 8)).on_device(0, 3);
    assert!(matches!(
        elsewhere.on_kernel_selected(0),
        Err(Error::DeviceUnavailable(_))
    ));
    assert!(backend.ledger().balanced());
}

#[test]
fn file_presenter_writes_host_and_device_images() {
    let backend = HostBackend::new();
    let dir = scratch_dir("presenter");
    let mut demo = BlurDemo::new(&backend, checkerboard(20, 12));
    let mut presenter = FilePresenter::new(&dir);

    let outcomes = run_selections(&mut demo, &mut presenter, &[0, 1]).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(presenter.offered().len(), 7);
    assert_eq!(presenter.offered()[0], "Blur 3x3");
    assert_eq!(
        presenter.written(),
        &[
            dir.join("blur-3x3-host.png"),
            dir.join("blur-3x3-device.png"),
            dir.join("blur-5x5-host.png"),
            dir.join("blur-5x5-device.png"),
        ]
    );
    let back = RgbImage::load_rgb(dir.join("blur-5x5-device.png")).unwrap();
    assert_eq!(back.max_channel_diff(&outcomes[1].device_image), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[derive(Default)]
struct Recorder {
    offered: Vec<String>,
    seen: Vec<String>,
}

impl Presenter for Recorder {
    fn offer_kernels(&mut self, names: &[String]) {
        self.offered = names.to_vec();
    }

    fn present(&mut self, outcome: &gpu_dispatch::blur::BlurOutcome) -> gpu_dispatch::Result<()> {
        self.seen.push(outcome.kernel_name.clone());
        Ok(())
    }
}

#[test]
fn run_selections_stops_at_first_error() {
    let backend = HostBackend::new();
    let mut demo = BlurDemo::new(&backend, checkerboard(8, 8));
    let mut recorder = Recorder::default();
    let err = run_selections(&mut demo, &mut recorder, &[1, 99, 2]).unwrap_err();
    assert!(matches!(err, Error::ArgumentBinding(_)));
    assert_eq!(recorder.seen, vec!["Blur 5x5".to_string()]);
    assert_eq!(recorder.offered.len(), 7);
}
