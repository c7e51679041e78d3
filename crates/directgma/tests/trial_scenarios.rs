//! End-to-end trials against the simulated device API.

use directgma::api::{ops, status};
use directgma::config::{AMD_VENDOR, BUS_ADDRESSABLE_EXTENSION};
use directgma::discovery::{resolve, DiscoveryRequest};
use directgma::host::{seed_pattern, HostMirror};
use directgma::report::GIB;
use directgma::{
    run_all, run_trial, BenchConfig, DirectGmaError, DiscoveryError, Orientation, OrientationSet, SetupError,
    SimApi, SimDeviceSpec, SimSpec, TimingSource, TransferError, TransferMode, Trial, ValidationError,
};
use proptest::prelude::*;

// 192 KiB of 32-bit words. The `192 * 2048 * 2` expression the size list is
// built from gives 786432 bytes, not 196608, so the size is written out.
const SCENARIO_SIZE: usize = 196_608;
const SCENARIO_WORDS: usize = SCENARIO_SIZE / 4;

fn zero_copy_request() -> DiscoveryRequest {
    DiscoveryRequest {
        vendor: AMD_VENDOR.into(),
        extension: BUS_ADDRESSABLE_EXTENSION.into(),
        require_residency: true,
    }
}

fn scenario_config() -> BenchConfig {
    BenchConfig {
        mode: TransferMode::ZeroCopy,
        timing: Some(TimingSource::DeviceEvents),
        iterations: Some(5000),
        sizes: vec![SCENARIO_SIZE],
        orientations: OrientationSet::Forward,
        ..Default::default()
    }
}

#[test]
fn forward_zero_copy_scenario() {
    assert_eq!(SCENARIO_SIZE, 196_608);
    assert_eq!(SCENARIO_WORDS, 49_152);

    let api = SimApi::new(SimSpec::amd_pair());
    let reports = run_all(&api, &scenario_config(), |_| {}).unwrap();
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report.source, "Simulated GPU 1");
    assert_eq!(report.destination, "Simulated GPU 0");
    assert_eq!(report.size_bytes, SCENARIO_SIZE);
    assert_eq!(report.size_kib, 192);
    assert_eq!(report.iterations, 5000);
    assert!(report.gib_per_sec > 0.0);

    let spec = api.spec();
    let expected_seconds = 5000.0 * spec.copy_duration_ns(SCENARIO_SIZE) as f64 / 1e9;
    assert!((report.elapsed_seconds - expected_seconds).abs() < 1e-9);
    let expected_gibps = SCENARIO_SIZE as f64 * 5000.0 / expected_seconds / GIB;
    assert!((report.gib_per_sec - expected_gibps).abs() < 1e-6);

    assert_eq!(api.live_handles(), 0);
}

#[test]
fn destination_holds_seed_after_transfer() {
    // Drive the pieces by hand so the destination can be inspected directly.
    use directgma::report::read_back;
    use directgma::transfer::{run, strategy_for};
    use directgma::{BufferTriple, Session};

    let api = SimApi::new(SimSpec::amd_pair());
    let found = resolve(&api, &zero_copy_request()).unwrap();
    let caps = found.residency.unwrap();
    let session = Session::open(&api, &found.platform, found.devices.clone(), true).unwrap();
    let mut buffers = BufferTriple::allocate_zero_copy(&session, &caps, SCENARIO_SIZE).unwrap();
    let mut mirror = HostMirror::new(SCENARIO_SIZE);
    buffers.upload_seed(&session, mirror.input_bytes()).unwrap();

    let mut strategy = strategy_for::<SimApi>(TransferMode::ZeroCopy, SCENARIO_SIZE);
    run(strategy.as_mut(), &session, &mut buffers, 3, TimingSource::DeviceEvents).unwrap();
    read_back(&session, &buffers, &mut mirror).unwrap();

    assert_eq!(mirror.words(), SCENARIO_WORDS);
    assert_eq!(mirror.output().len(), SCENARIO_WORDS);
    assert_eq!(mirror.output(), seed_pattern(SCENARIO_WORDS).as_slice());
    assert!(mirror.verify().is_ok());
}

#[test]
fn corrupted_read_back_aborts_without_report() {
    let api = SimApi::new(SimSpec::amd_pair());
    api.corrupt_read(1, 1234);

    let mut reported = 0;
    let err = run_all(&api, &scenario_config(), |_| reported += 1).unwrap_err();
    assert_eq!(reported, 0);
    match err {
        DirectGmaError::Validation(ValidationError::DataMismatch { word, offset, expected, mismatched_words, .. }) => {
            assert_eq!(word, 1234);
            assert_eq!(offset, 1234 * 4);
            assert_eq!(expected, 1235);
            assert_eq!(mismatched_words, 1);
        }
        other => panic!("expected DataMismatch, got {other}"),
    }
    assert_eq!(api.live_handles(), 0);
}

#[test]
fn mismatch_stops_remaining_trials() {
    let api = SimApi::new(SimSpec::amd_pair());
    api.corrupt_read(2, 0);
    let config = BenchConfig {
        iterations: Some(2),
        sizes: vec![4096, 8192, 16384],
        orientations: OrientationSet::Both,
        ..Default::default()
    };
    let mut reported = Vec::new();
    let err = run_all(&api, &config, |r| reported.push(r.size_bytes)).unwrap_err();
    assert!(matches!(err, DirectGmaError::Validation(_)));
    assert_eq!(reported, vec![4096]);
    assert_eq!(api.call_count(ops::READ_BUFFER), 2);
}

#[test]
fn both_orientations_succeed_independently() {
    let api = SimApi::new(SimSpec::amd_pair());
    let config = BenchConfig {
        iterations: Some(16),
        sizes: vec![4096, SCENARIO_SIZE],
        orientations: OrientationSet::Both,
        ..Default::default()
    };
    let reports = run_all(&api, &config, |_| {}).unwrap();
    assert_eq!(reports.len(), 4);

    let (forward, swapped): (Vec<_>, Vec<_>) = reports.iter().partition(|r| r.orientation == Orientation::Forward);
    assert_eq!(forward.len(), 2);
    assert_eq!(swapped.len(), 2);
    for (f, s) in forward.iter().zip(&swapped) {
        assert_eq!(f.source, s.destination);
        assert_eq!(f.destination, s.source);
        assert_eq!(f.size_bytes, s.size_bytes);
        assert_eq!(f.elapsed_seconds, s.elapsed_seconds);
    }

    // one session (two contexts) per trial
    assert_eq!(api.call_count(ops::CREATE_CONTEXT), 8);
    assert_eq!(api.call_count(ops::MAKE_RESIDENT), 4);
    assert_eq!(api.live_handles(), 0);
}

#[test]
fn swapped_trial_runs_alone() {
    let api = SimApi::new(SimSpec::amd_pair());
    let found = resolve(&api, &zero_copy_request()).unwrap();
    let config = scenario_config();
    let trial = Trial { size: 4096, iterations: 8, orientation: Orientation::Swapped };
    let report = run_trial(&api, &found, &trial, &config).unwrap();
    assert_eq!(report.source, "Simulated GPU 0");
    assert_eq!(report.destination, "Simulated GPU 1");
}

#[test]
fn residency_pin_precedes_every_alias() {
    let api = SimApi::new(SimSpec::amd_pair());
    let config = BenchConfig { iterations: Some(2), sizes: vec![4096, 8192], ..Default::default() };
    run_all(&api, &config, |_| {}).unwrap();

    let mut pinned = 0usize;
    for call in api.calls() {
        if call == ops::MAKE_RESIDENT {
            pinned += 1;
        } else if call == ops::CREATE_EXTERNAL_BUFFER {
            assert!(pinned > 0, "alias created before any residency pin");
            pinned -= 1;
        }
    }
    assert_eq!(api.call_count(ops::CREATE_EXTERNAL_BUFFER), 4);
}

#[test]
fn missing_capability_fails_before_any_context() {
    let mut spec = SimSpec::amd_pair();
    spec.platforms[0].devices = vec![SimDeviceSpec::plain("GPU A"), SimDeviceSpec::plain("GPU B")];
    let api = SimApi::new(spec);

    let err = run_all(&api, &scenario_config(), |_| {}).unwrap_err();
    assert!(matches!(err, DirectGmaError::Discovery(DiscoveryError::MissingExtension { .. })), "{err}");
    assert_eq!(api.call_count(ops::CREATE_CONTEXT), 0);
    assert_eq!(api.live_handles(), 0);
}

#[test]
fn host_staged_run_does_not_need_the_capability() {
    let mut spec = SimSpec::amd_pair();
    spec.platforms[0].devices = vec![SimDeviceSpec::plain("GPU A"), SimDeviceSpec::plain("GPU B")];
    spec.platforms[0].entry_points.clear();
    let api = SimApi::new(spec);

    let config = BenchConfig {
        mode: TransferMode::MapUnmap,
        timing: Some(TimingSource::WallClock),
        iterations: Some(3),
        sizes: vec![4096],
        ..Default::default()
    };
    let reports = run_all(&api, &config, |_| {}).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(api.call_count(ops::MAKE_RESIDENT), 0);
    assert_eq!(api.call_count(ops::CREATE_EXTERNAL_BUFFER), 0);
}

#[test]
fn zero_copy_trial_without_resolved_residency_is_setup_error() {
    let api = SimApi::new(SimSpec::amd_pair());
    let request = DiscoveryRequest { require_residency: false, ..zero_copy_request() };
    let found = resolve(&api, &request).unwrap();
    let trial = Trial { size: 4096, iterations: 1, orientation: Orientation::Forward };
    let err = run_trial(&api, &found, &trial, &scenario_config()).unwrap_err();
    assert_eq!(err, DirectGmaError::Setup(SetupError::ResidencyUnavailable));
    assert_eq!(api.live_handles(), 0);
}

#[test]
fn injected_failures_release_everything() {
    let cases: &[(&'static str, usize)] = &[
        (ops::CREATE_CONTEXT, 2),
        (ops::CREATE_QUEUE, 1),
        (ops::CREATE_BUFFER, 1),
        (ops::MAKE_RESIDENT, 1),
        (ops::CREATE_EXTERNAL_BUFFER, 1),
        (ops::CREATE_BUFFER, 2),
        (ops::WRITE_BUFFER, 1),
        (ops::COPY_BUFFER, 1),
        (ops::COPY_BUFFER, 7),
        (ops::FINISH, 2),
        (ops::EVENT_PROFILING, 3),
        (ops::READ_BUFFER, 1),
    ];
    for &(op, nth) in cases {
        let api = SimApi::new(SimSpec::amd_pair());
        api.fail_on(op, nth, status::OUT_OF_RESOURCES);
        let config = BenchConfig { iterations: Some(10), sizes: vec![4096], ..Default::default() };
        let err = run_all(&api, &config, |_| {}).unwrap_err();

        let api_err = err.api_error().copied().unwrap_or_else(|| panic!("{op}#{nth}: no api error in {err}"));
        assert_eq!(api_err.op, op, "{op}#{nth}: {err}");
        assert_eq!(api_err.status, status::OUT_OF_RESOURCES);
        assert_eq!(api.live_handles(), 0, "{op}#{nth} leaked handles");
    }
}

#[test]
fn first_warm_up_failure_is_reported_as_warm_up() {
    let api = SimApi::new(SimSpec::amd_pair());
    api.fail_on(ops::COPY_BUFFER, 1, status::INVALID_VALUE);
    let err = run_all(&api, &scenario_config(), |_| {}).unwrap_err();
    assert!(matches!(err, DirectGmaError::Transfer(TransferError::WarmupFailed(_))), "{err}");
    assert!(err.to_string().contains("clEnqueueCopyBuffer failed. Error code = -30"));
}

#[test]
fn measured_copy_failure_names_iteration() {
    let api = SimApi::new(SimSpec::amd_pair());
    // copy #1 is the warm-up
    api.fail_on(ops::COPY_BUFFER, 6, status::OUT_OF_RESOURCES);
    let err = run_all(&api, &scenario_config(), |_| {}).unwrap_err();
    assert!(
        matches!(err, DirectGmaError::Transfer(TransferError::TransferFailed { iteration: 4, .. })),
        "{err}"
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_word_aligned_size_round_trips(words in 1usize..4096, swapped in any::<bool>()) {
        let api = SimApi::new(SimSpec::amd_pair());
        let config = BenchConfig {
            iterations: Some(2),
            sizes: vec![words * 4],
            orientations: if swapped { OrientationSet::Swapped } else { OrientationSet::Forward },
            ..Default::default()
        };
        let reports = run_all(&api, &config, |_| {}).unwrap();
        prop_assert_eq!(reports.len(), 1);
        prop_assert!(reports[0].bytes_per_sec > 0.0);
        prop_assert_eq!(api.live_handles(), 0);
    }

    #[test]
    fn seed_pattern_is_index_plus_one(words in 0usize..10_000) {
        let seed = seed_pattern(words);
        prop_assert_eq!(seed.len(), words);
        for (i, v) in seed.iter().enumerate() {
            prop_assert_eq!(*v as usize, i + 1);
        }
    }
}
