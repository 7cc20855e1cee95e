// tests/test_host_backend.rs: Session, program, buffer and dispatch behaviour
// against the CPU backend, including the acquire/release ledger.

use gpu_dispatch::array_add::add_arrays;
use gpu_dispatch::gpu::host::{KernelArgs, WorkItem};
use gpu_dispatch::gpu::{
    Access, DeviceBuffer, ElementKind, HostBackend, ResourceKind, Scalar, Session, TransferMode,
};
use gpu_dispatch::kernels::{self, CompileOptions, KernelSource, Param, ScalarKind};
use gpu_dispatch::partition::{Extent, WorkPartition};
use gpu_dispatch::Error;

fn iota(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32).collect()
}

// ===== DeviceSession =====

#[test]
fn open_reports_device_unavailable() {
    let none = HostBackend::with_topology(&[]);
    assert!(matches!(Session::open(&none, 0, 0), Err(Error::DeviceUnavailable(_))));

    let two = HostBackend::with_topology(&[2]);
    assert!(Session::open(&two, 0, 1).is_ok());
    assert!(matches!(Session::open(&two, 0, 2), Err(Error::DeviceUnavailable(_))));
    assert!(matches!(Session::open(&two, 1, 0), Err(Error::DeviceUnavailable(_))));
    assert!(two.ledger().balanced());
}

#[test]
fn session_reports_selected_device() {
    let backend = HostBackend::with_topology(&[1, 3]);
    let session = Session::open(&backend, 1, 2).unwrap();
    assert_eq!(session.info().name, "Host device 1.2");
    assert_eq!(session.platform_index(), 1);
}

// ===== End-to-end =====

#[test]
fn add_zero_to_nine() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let a = iota(10);
    let c = add_arrays(&session, &a, &a, TransferMode::Copy).unwrap();
    assert_eq!(c, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0, 18.0]);
}

#[test]
fn surplus_work_items_do_not_write_out_of_range() {
    // 10 items in groups of 4 → 12 work-items, 2 surplus.
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a = session.upload(&iota(10), Access::ReadOnly).unwrap();
    let b = session.upload(&iota(10), Access::ReadOnly).unwrap();
    let c = session.alloc::<f32>(10, Access::ReadWrite).unwrap();
    let p = WorkPartition::new(Extent::d1(10), Extent::d1(4)).unwrap();
    assert_eq!(p.surplus(), 2);
    program.run(&[a.arg(), b.arg(), c.arg()], &p).unwrap();
    assert_eq!(c.to_vec().unwrap()[9], 18.0);
}

#[test]
fn empty_problem_is_a_no_op() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a = session.upload(&[1.0f32, 2.0], Access::ReadOnly).unwrap();
    let b = session.upload(&[1.0f32, 2.0], Access::ReadOnly).unwrap();
    let c = session.alloc::<f32>(2, Access::ReadWrite).unwrap();
    program
        .run(&[a.arg(), b.arg(), c.arg()], &WorkPartition::linear(0))
        .unwrap();
    assert_eq!(c.to_vec().unwrap(), vec![0.0, 0.0]);
}

#[test]
fn program_is_reusable_across_dispatches() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    for n in [3, 17, 64] {
        let a = session.upload(&iota(n), Access::ReadOnly).unwrap();
        let b = session.upload(&vec![1.0f32; n], Access::ReadOnly).unwrap();
        let c = session.alloc::<f32>(n, Access::ReadWrite).unwrap();
        program.run(&[a.arg(), b.arg(), c.arg()], &WorkPartition::linear(n)).unwrap();
        assert_eq!(c.to_vec().unwrap()[n - 1], n as f32);
    }
    drop(program);
    drop(session);
    let ledger = backend.ledger();
    assert_eq!(ledger.acquired(ResourceKind::Program), 1);
    assert_eq!(ledger.acquired(ResourceKind::Buffer), 9);
    assert!(ledger.balanced(), "{ledger}");
}

#[test]
fn custom_native_kernel_with_scalar() {
    fn scale(item: &WorkItem, args: &mut KernelArgs<'_>) {
        let i = item.linear_id();
        if i >= args.f32(0).len() {
            return;
        }
        let Scalar::F32(k) = args.scalar(1) else { return };
        args.f32_mut(0)[i] *= k;
    }
    let source = KernelSource::new(
        "scale.wgsl",
        "@compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1) fn scale() {}",
        "scale",
        vec![
            Param::buffer("data", ElementKind::F32, Access::ReadWrite),
            Param::scalar("factor", ScalarKind::F32),
        ],
    );
    let mut backend = HostBackend::new();
    backend.register("scale", scale);
    let session = Session::open(&backend, 0, 0).unwrap();
    let program = session.compile(&source, &CompileOptions::new()).unwrap();
    let data = session.upload(&[1.0f32, 2.0, 3.0], Access::ReadWrite).unwrap();
    program
        .run(&[data.arg(), Scalar::F32(2.5).into()], &WorkPartition::linear(3))
        .unwrap();
    assert_eq!(data.to_vec().unwrap(), vec![2.5, 5.0, 7.5]);
}

// ===== KernelProgram =====

#[test]
fn compile_errors_carry_a_log() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();

    let missing_entry = KernelSource::new("empty.wgsl", "fn other() {}", "add_arrays", vec![]);
    match session.compile(&missing_entry, &CompileOptions::new()) {
        Err(Error::Compile { entry, log }) => {
            assert_eq!(entry, "add_arrays");
            assert!(log.contains("not found"), "{log}");
        }
        other => panic!("expected compile error, got {other:?}"),
    }

    let unregistered = KernelSource::new("x.wgsl", "fn mystery() {}", "mystery", vec![]);
    assert!(matches!(
        session.compile(&unregistered, &CompileOptions::new()),
        Err(Error::Compile { .. })
    ));

    // blur without its EDGE_POLICY define.
    assert!(matches!(
        session.compile(&kernels::blur(), &CompileOptions::new()),
        Err(Error::Compile { .. })
    ));
}

// ===== Argument binding =====

#[test]
fn binding_errors_are_caught_before_dispatch() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a = session.upload(&iota(4), Access::ReadOnly).unwrap();
    let b = session.upload(&iota(4), Access::ReadOnly).unwrap();
    let c = session.alloc::<f32>(4, Access::ReadWrite).unwrap();
    let ints = session.upload(&[0u32; 4], Access::ReadWrite).unwrap();
    let p = WorkPartition::linear(4);

    let cases: Vec<(&str, Vec<_>)> = vec![
        ("too few", vec![a.arg(), b.arg()]),
        ("too many", vec![a.arg(), b.arg(), c.arg(), Scalar::U32(1).into()]),
        ("scalar for buffer", vec![a.arg(), Scalar::F32(1.0).into(), c.arg()]),
        ("wrong element", vec![a.arg(), b.arg(), ints.arg()]),
        ("read-only output", vec![a.arg(), c.arg(), b.arg()]),
        ("output aliases an input", vec![a.arg(), c.arg(), c.arg()]),
    ];
    for (what, args) in cases {
        assert!(
            matches!(program.run(&args, &p), Err(Error::ArgumentBinding(_))),
            "{what}"
        );
    }
    // Nothing was dispatched.
    assert_eq!(c.to_vec().unwrap(), vec![0.0; 4]);
}

#[test]
fn one_buffer_may_feed_several_read_only_params() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a = session.upload(&iota(4), Access::ReadOnly).unwrap();
    let c = session.alloc::<f32>(4, Access::ReadWrite).unwrap();
    program
        .run(&[a.arg(), a.arg(), c.arg()], &WorkPartition::linear(4))
        .unwrap();
    assert_eq!(c.to_vec().unwrap(), vec![0.0, 2.0, 4.0, 6.0]);
}

#[test]
fn short_input_stops_at_its_length() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a = session.upload(&iota(3), Access::ReadOnly).unwrap();
    let b = session.upload(&iota(10), Access::ReadOnly).unwrap();
    let c = session.alloc::<f32>(10, Access::ReadWrite).unwrap();
    program
        .run(&[a.arg(), b.arg(), c.arg()], &WorkPartition::linear(10))
        .unwrap();
    let out = c.to_vec().unwrap();
    assert_eq!(&out[..3], &[0.0, 2.0, 4.0]);
    assert!(out[3..].iter().all(|&v| v == 0.0));

    // The buffers are back in place for the next dispatch.
    program
        .run(&[a.arg(), b.arg(), c.arg()], &WorkPartition::linear(10))
        .unwrap();
}

#[test]
fn panicking_kernel_is_a_dispatch_error() {
    fn out_of_bounds(item: &WorkItem, args: &mut KernelArgs<'_>) {
        let i = item.linear_id();
        let v = args.f32(0)[i + 100];
        args.f32_mut(0)[i] = v;
    }
    let source = KernelSource::new(
        "oob.wgsl",
        "fn out_of_bounds() {}",
        "out_of_bounds",
        vec![Param::buffer("data", ElementKind::F32, Access::ReadWrite)],
    );
    let mut backend = HostBackend::new();
    backend.register("out_of_bounds", out_of_bounds);
    {
        let session = Session::open(&backend, 0, 0).unwrap();
        let program = session.compile(&source, &CompileOptions::new()).unwrap();
        let data = session.upload(&[1.0f32, 2.0], Access::ReadWrite).unwrap();
        let err = program
            .run(&[data.arg()], &WorkPartition::linear(2))
            .unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)), "{err}");
        assert_eq!(data.to_vec().unwrap(), vec![1.0, 2.0]);
    }
    assert!(backend.ledger().balanced(), "{}", backend.ledger());
}

#[test]
fn buffer_from_another_session_is_rejected() {
    let backend = HostBackend::with_topology(&[2]);
    let first = Session::open(&backend, 0, 0).unwrap();
    let second = Session::open(&backend, 0, 1).unwrap();
    let program = first.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a = first.upload(&iota(2), Access::ReadOnly).unwrap();
    let b = second.upload(&iota(2), Access::ReadOnly).unwrap();
    let c = first.alloc::<f32>(2, Access::ReadWrite).unwrap();
    let err = program
        .run(&[a.arg(), b.arg(), c.arg()], &WorkPartition::linear(2))
        .unwrap_err();
    assert!(err.to_string().contains("different session"), "{err}");
}

// ===== Buffer transfer =====

#[test]
fn copy_round_trip_is_bit_identical() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let data: Vec<f32> = [0x7fc0_0001u32, 0x8000_0000, 0x0000_0001, 0x3f80_0000]
        .iter()
        .map(|&b| f32::from_bits(b))
        .collect();
    let buf = session.upload(&data, Access::ReadOnly).unwrap();
    let back = buf.to_vec().unwrap();
    let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&back), bits(&data));
}

#[test]
fn copy_mode_decouples_host_memory() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let mut host = vec![1u32, 2, 3];
    let buf = session.upload(&host, Access::ReadOnly).unwrap();
    host[0] = 99;
    drop(host);
    assert_eq!(buf.to_vec().unwrap(), vec![1, 2, 3]);
}

#[test]
fn pinned_output_syncs_into_host_slice() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();
    let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
    let a_host = iota(5);
    let mut c_host = vec![0.0f32; 5];
    {
        let a = session.pin(&a_host).unwrap();
        assert_eq!(a.mode(), TransferMode::Pinned);
        assert_eq!(a.pinned_host(), Some(a_host.as_slice()));
        let b = session.upload(&a_host, Access::ReadOnly).unwrap();
        let mut c = DeviceBuffer::pin_mut(&session, &mut c_host, Access::ReadWrite).unwrap();
        program
            .run(&[a.arg(), b.arg(), c.arg()], &WorkPartition::linear(5))
            .unwrap();
        assert_eq!(c.sync_host().unwrap(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
    }
    assert_eq!(c_host, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn transfer_errors() {
    let backend = HostBackend::new();
    let session = Session::open(&backend, 0, 0).unwrap();

    assert!(matches!(
        session.alloc::<f32>(0, Access::ReadWrite),
        Err(Error::Transfer(_))
    ));

    let buf = session.upload(&[1.0f32, 2.0, 3.0], Access::ReadOnly).unwrap();
    let mut short = [0.0f32; 2];
    assert!(matches!(buf.download(&mut short), Err(Error::Transfer(_))));

    let host = [1.0f32];
    assert!(matches!(
        DeviceBuffer::with_mode(&session, &host, Access::ReadWrite, TransferMode::Pinned),
        Err(Error::Transfer(_))
    ));

    let mut copy = session.upload(&[1u32], Access::ReadOnly).unwrap();
    assert!(matches!(copy.sync_host(), Err(Error::Transfer(_))));
    copy.write(&[5]).unwrap();
    assert_eq!(copy.to_vec().unwrap(), vec![5]);
}

// ===== Resource lifecycle =====

#[test]
fn every_acquire_is_released_once() {
    let backend = HostBackend::new();
    {
        let session = Session::open(&backend, 0, 0).unwrap();
        let a = iota(100);
        add_arrays(&session, &a, &a, TransferMode::Copy).unwrap();
        add_arrays(&session, &a, &a, TransferMode::Pinned).unwrap();
        session.close();
    }
    let ledger = backend.ledger();
    assert_eq!(ledger.acquired(ResourceKind::Device), 1);
    assert_eq!(ledger.released(ResourceKind::Device), 1);
    assert_eq!(ledger.acquired(ResourceKind::Program), 2);
    assert_eq!(ledger.released(ResourceKind::Program), 2);
    assert_eq!(ledger.acquired(ResourceKind::Buffer), 6);
    assert_eq!(ledger.released(ResourceKind::Buffer), 6);
    assert!(ledger.violations().is_empty(), "{:?}", ledger.violations());
    assert!(ledger.balanced());
}

#[test]
fn error_paths_release_everything() {
    let backend = HostBackend::new();
    {
        let session = Session::open(&backend, 0, 0).unwrap();
        // Length mismatch fails before anything is compiled.
        assert!(add_arrays(&session, &[1.0], &[1.0, 2.0], TransferMode::Copy).is_err());
        // Compile failure after the session is open.
        assert!(session.compile(&kernels::blur(), &CompileOptions::new()).is_err());
        // Binding failure with live buffers.
        let program = session.compile(&kernels::add_arrays(), &CompileOptions::new()).unwrap();
        let a = session.upload(&[1.0f32], Access::ReadOnly).unwrap();
        assert!(program.run(&[a.arg()], &WorkPartition::linear(1)).is_err());
    }
    let ledger = backend.ledger();
    assert_eq!(ledger.live(ResourceKind::Buffer), 0);
    assert!(ledger.balanced(), "{ledger}");
}
