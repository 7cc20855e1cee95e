// tests/test_wgpu.rs: The same pipelines on a real adapter.
//
// These need a GPU (or a software adapter such as lavapipe):
//   cargo test --test test_wgpu -- --ignored

use gpu_dispatch::array_add::add_arrays;
use gpu_dispatch::blur::{DeviceBlur, CHANNEL_TOLERANCE};
use gpu_dispatch::convolution::{blur_family, convolve_rgb, EdgePolicy};
use gpu_dispatch::gpu::{Access, Backend, DeviceProfile, Scalar, Session, TransferMode, WgpuBackend};
use gpu_dispatch::image::{pack_rgb, RgbImage};
use gpu_dispatch::kernels::{self, CompileOptions, KernelSource};
use gpu_dispatch::partition::WorkPartition;
use gpu_dispatch::Error;

fn scene(w: usize, h: usize) -> RgbImage {
    let mut img = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let r = (x * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            let b = if (x / 16 + y / 16) % 2 == 0 { 200 } else { 20 };
            img.set(x, y, pack_rgb(r, g, b));
        }
    }
    img
}

#[test]
#[ignore = "requires a GPU adapter"]
fn wgpu_enumerates_and_opens() {
    let backend = WgpuBackend::new(DeviceProfile::Native);
    let platforms = backend.platforms().unwrap();
    assert!(!platforms.is_empty());
    let session = Session::open(&backend, 0, 0).expect("need a GPU adapter");
    assert!(!session.info().name.is_empty());
}

#[test]
#[ignore = "requires a GPU adapter"]
fn wgpu_adds_arrays_in_both_modes() {
    let backend = WgpuBackend::default();
    let session = Session::open(&backend, 0, 0).expect("need a GPU adapter");
    let a: Vec<f32> = (0..100_000).map(|i| i as f32).collect();
    for mode in [TransferMode::Copy, TransferMode::Pinned] {
        let c = add_arrays(&session, &a, &a, mode).unwrap();
        assert!(c.iter().enumerate().all(|(i, &v)| v == 2.0 * i as f32), "{mode}");
    }
}

#[test]
#[ignore = "requires a GPU adapter"]
fn wgpu_blur_agrees_with_host_reference() {
    let backend = WgpuBackend::default();
    let session = Session::open(&backend, 0, 0).expect("need a GPU adapter");
    let img = scene(161, 97);
    for kernel in blur_family() {
        for edge in [EdgePolicy::Clamp, EdgePolicy::ZeroFill] {
            let blur = DeviceBlur::new(&session, &kernel, edge, &CompileOptions::new()).unwrap();
            let device = blur.filter(&img, TransferMode::Copy).unwrap();
            let host = convolve_rgb(&img, &kernel, edge);
            let diff = host.max_channel_diff(&device);
            assert!(diff <= CHANNEL_TOLERANCE, "{} / {edge}: {diff}", kernel.name());
        }
    }
}

#[test]
#[ignore = "requires a GPU adapter"]
fn wgpu_reports_compile_log() {
    let backend = WgpuBackend::default();
    let session = Session::open(&backend, 0, 0).expect("need a GPU adapter");
    let broken = KernelSource::new(
        "broken.wgsl",
        "@compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1)\nfn add_arrays() { let x = ; }",
        "add_arrays",
        vec![],
    );
    match session.compile(&broken, &CompileOptions::new()) {
        Err(Error::Compile { entry, log }) => {
            assert_eq!(entry, "add_arrays");
            assert!(!log.is_empty());
        }
        other => panic!("expected compile error, got {other:?}"),
    };
}

#[test]
#[ignore = "requires a GPU adapter"]
fn wgpu_binding_checks_match_host() {
    let backend = WgpuBackend::default();
    let session = Session::open(&backend, 0, 0).expect("need a GPU adapter");
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a = session.upload(&[1.0f32; 8], Access::ReadOnly).unwrap();
    let c = session.alloc::<f32>(8, Access::ReadWrite).unwrap();
    let err = program
        .run(&[a.arg(), Scalar::F32(1.0).into(), c.arg()], &WorkPartition::linear(8))
        .unwrap_err();
    assert!(matches!(err, Error::ArgumentBinding(_)));
}

#[test]
#[ignore = "requires a GPU adapter"]
fn wgpu_short_input_stops_at_its_length() {
    let backend = WgpuBackend::default();
    let session = Session::open(&backend, 0, 0).expect("need a GPU adapter");
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a = session.upload(&[1.0f32, 2.0, 3.0], Access::ReadOnly).unwrap();
    let b = session.upload(&[1.0f32; 10], Access::ReadOnly).unwrap();
    let c = session.alloc::<f32>(10, Access::ReadWrite).unwrap();
    program
        .run(&[a.arg(), a.arg(), c.arg()], &WorkPartition::linear(3))
        .unwrap();
    assert_eq!(&c.to_vec().unwrap()[..3], &[2.0, 4.0, 6.0]);
    program
        .run(&[a.arg(), b.arg(), c.arg()], &WorkPartition::linear(10))
        .unwrap();
    let out = c.to_vec().unwrap();
    assert_eq!(&out[..3], &[2.0, 3.0, 4.0]);
    assert_eq!(&out[3..], &[0.0; 7]);
}
