//! End-to-end reverb scenarios: upload, select, prepare, process

use std::sync::Arc;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use rf_core::RfError;
use rf_engine::{ConvolutionReverb, IrSlotStore, PreparePool, ReverbConfig, UNSET_NAME};

const SAMPLE_RATE: u32 = 48000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup_with_pool(
    slot_count: usize,
    threads: usize,
) -> (Arc<IrSlotStore>, Arc<PreparePool>, ConvolutionReverb) {
    init_logging();
    let store = Arc::new(IrSlotStore::new(slot_count));
    let pool = Arc::new(PreparePool::new(threads).unwrap());
    let reverb = ConvolutionReverb::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        &ReverbConfig::default(),
        SAMPLE_RATE,
    )
    .unwrap();
    (store, pool, reverb)
}

fn setup(slot_count: usize) -> (Arc<IrSlotStore>, ConvolutionReverb) {
    let (store, _pool, reverb) = setup_with_pool(slot_count, 2);
    (store, reverb)
}

fn assert_block(reverb: &ConvolutionReverb, input: &[f32], expected: &[f32]) {
    let mut output = vec![0.0; expected.len()];
    reverb.process(input, 1, &mut output, 1, SAMPLE_RATE);
    for (got, want) in output.iter().zip(expected) {
        assert_relative_eq!(*got, *want, epsilon = 1e-5);
    }
}

/// Simple LCG noise in [-1, 1]
fn noise(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            (state >> 8) as f32 / (1u32 << 23) as f32 - 1.0
        })
        .collect()
}

#[test]
fn test_unit_impulse_over_two_blocks() {
    let (store, reverb) = setup(16);
    assert!(store.upload(0, &[1.0, 0.0, 0.0, 0.0], 4, 1, SAMPLE_RATE, "unit"));

    reverb.set_host_layout(1, 2, SAMPLE_RATE);
    let report = reverb.poll().expect("preparation queued").wait().unwrap();
    assert_eq!(report.slot, 0);
    assert_eq!(report.layout.num_partitions, 2);

    let mut first = [0.0; 2];
    let mut second = [0.0; 2];
    reverb.process(&[1.0, 0.0], 1, &mut first, 1, SAMPLE_RATE);
    reverb.process(&[0.0, 0.0], 1, &mut second, 1, SAMPLE_RATE);

    let expected = [1.0, 0.0, 0.0, 0.0];
    for (got, want) in first.iter().chain(second.iter()).zip(expected) {
        assert_relative_eq!(*got, want, epsilon = 1e-5);
    }
}

#[test]
fn test_empty_slot_is_usable() {
    let (store, reverb) = setup(16);
    assert!(store.upload(5, &[], 0, 2, SAMPLE_RATE, "empty"));
    assert_eq!(store.name(5), "empty");

    reverb.set_parameter(0, 5.0).unwrap();
    reverb.set_host_layout(2, 64, SAMPLE_RATE);
    let report = reverb.poll().unwrap().wait().unwrap();
    assert_eq!(report.slot, 5);

    let input = noise(128, 7);
    let mut output = vec![0.0; 128];
    for _ in 0..16 {
        reverb.process(&input, 2, &mut output, 2, SAMPLE_RATE);
        assert!(output.iter().all(|s| s.is_finite() && s.abs() <= 1.0 + 1e-4));
    }
}

#[test]
fn test_out_of_range_uploads_change_nothing() {
    let (store, _reverb) = setup(16);
    let data = [1.0; 8];
    // -1 cannot reach a usize slot; the FFI layer covers it
    assert!(!store.upload(16, &data, 8, 1, SAMPLE_RATE, "late"));
    assert!(!store.upload(usize::MAX, &data, 8, 1, SAMPLE_RATE, "late"));

    for slot in 0..16 {
        assert!(!store.is_allocated(slot));
        assert!(!store.is_update_pending(slot));
        assert_eq!(store.name(slot), UNSET_NAME);
    }
}

#[test]
fn test_content_update_swaps_spectra_without_rebuild() {
    let (store, reverb) = setup(4);
    reverb.set_host_layout(1, 4, SAMPLE_RATE);
    assert!(store.upload(1, &[1.0, 0.0, 0.0, 0.0], 4, 1, SAMPLE_RATE, "dry"));
    reverb.set_parameter(0, 1.0).unwrap();
    assert!(reverb.poll().unwrap().wait().unwrap().rebuilt);

    // same shape → spectra swapped in place
    assert!(store.upload(1, &[0.0, 1.0, 0.0, 0.0], 4, 1, SAMPLE_RATE, "delayed"));
    let report = reverb.poll().unwrap().wait().unwrap();
    assert!(!report.rebuilt);

    let mut output = [0.0; 4];
    reverb.reset();
    reverb.process(&[1.0, 0.0, 0.0, 0.0], 1, &mut output, 1, SAMPLE_RATE);
    let expected = [0.0, 1.0, 0.0, 0.0];
    for (got, want) in output.iter().zip(expected) {
        assert_relative_eq!(*got, want, epsilon = 1e-5);
    }

    // longer IR → new layout
    assert!(store.upload(1, &[1.0; 16], 16, 1, SAMPLE_RATE, "long"));
    let report = reverb.poll().unwrap().wait().unwrap();
    assert!(report.rebuilt);
    assert_eq!(report.layout.num_partitions, 4);
}

#[test]
fn test_slot_switch_reprepares() {
    let (store, reverb) = setup(4);
    reverb.set_host_layout(2, 64, SAMPLE_RATE);
    assert!(store.upload(2, &noise(1000, 3), 500, 2, 44100, "room"));

    reverb.poll().unwrap().wait().unwrap();
    assert_eq!(reverb.prepared_slot(), Some(0));

    reverb.set_parameter(0, 2.0).unwrap();
    let report = reverb.poll().unwrap().wait().unwrap();
    assert_eq!(report.slot, 2);
    // ceil(500 * 48000 / 44100) = 545
    assert_eq!(report.layout.target_length, 545);
    assert_eq!(report.layout.num_partitions, 9);
    assert_eq!(reverb.prepared_slot(), Some(2));
}

#[test]
fn test_audio_path_reconfigures_on_block_size_change() {
    let (_store, reverb) = setup(2);
    let run_until_ready = |frames: usize| {
        let input = vec![0.25; frames * 2];
        let mut output = vec![0.0; frames * 2];
        let deadline = Instant::now() + Duration::from_secs(5);
        while reverb.layout().map(|l| l.hop_size()) != Some(frames) {
            reverb.process(&input, 2, &mut output, 2, SAMPLE_RATE);
            assert!(Instant::now() < deadline, "block size {frames} never prepared");
            std::thread::sleep(Duration::from_millis(1));
        }
    };

    run_until_ready(128);
    run_until_ready(256);
    assert_eq!(reverb.layout().unwrap().channels(), 2);
}

#[test]
fn test_envelope_matches_requested_length() {
    let (store, reverb) = setup(2);
    let ir: Vec<f32> = (0..480).map(|n| (-(n as f32) / 60.0).exp()).collect();
    assert!(store.upload(0, &ir, 480, 1, SAMPLE_RATE, "decay"));
    reverb.set_host_layout(2, 64, SAMPLE_RATE);
    reverb.poll().unwrap().wait().unwrap();

    let mut envelope = vec![0.0; 32];
    assert!(reverb.envelope(1, &mut envelope));
    assert!(envelope.iter().all(|v| v.is_finite()));
    // decaying IR: the head is louder than the tail
    assert!(envelope[0] > envelope[31]);
    assert!(!reverb.envelope(2, &mut envelope));
}

#[test]
fn test_unsupported_parameter_is_an_error() {
    let (_store, reverb) = setup(2);
    assert_eq!(reverb.set_parameter(3, 1.0), Err(RfError::UnsupportedParameter(3)));
}

#[test]
fn test_config_from_json_builds_instance() {
    init_logging();
    let config = ReverbConfig::from_json(r#"{ "worker_threads": 1, "initial_block_size": 256 }"#)
        .unwrap();
    let reverb = ConvolutionReverb::from_config(&config, SAMPLE_RATE).unwrap();
    let report = reverb.poll().unwrap().wait().unwrap();
    assert_eq!(report.layout.hop_size(), 256);
    assert_eq!(report.layout.channels(), 2);
}

#[test]
fn test_upload_during_queued_run_is_not_run_twice() {
    let (store, pool, reverb) = setup_with_pool(4, 1);
    reverb.set_host_layout(1, 4, SAMPLE_RATE);
    assert!(store.upload(0, &[1.0, 0.0, 0.0, 0.0], 4, 1, SAMPLE_RATE, "dry"));

    // occupy the only worker so the preparation stays queued
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let blocker = pool.submit(move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Err(RfError::WorkerPool("held".into()))
    });
    started_rx.recv().unwrap();

    let queued = reverb.poll().expect("first run queued");
    assert!(store.is_preparing(0));
    assert!(store.upload(0, &[0.0, 1.0, 0.0, 0.0], 4, 1, SAMPLE_RATE, "delayed"));
    assert!(reverb.poll().is_none());

    release_tx.send(()).unwrap();
    assert!(blocker.wait().is_err());
    assert_eq!(queued.wait().unwrap().slot, 0);

    // the queued run read the newer upload
    assert!(!store.is_update_pending(0));
    assert!(reverb.poll().is_none());
    assert_block(&reverb, &[1.0, 0.0, 0.0, 0.0], &[0.0, 1.0, 0.0, 0.0]);
}

#[test]
fn test_upload_during_run_is_picked_up_by_next_check() {
    let (store, reverb) = setup(4);
    reverb.set_host_layout(1, 4, SAMPLE_RATE);
    assert!(store.upload(0, &[1.0, 0.0, 0.0, 0.0], 4, 1, SAMPLE_RATE, "dry"));
    reverb.poll().unwrap().wait().unwrap();

    // a run that already read the slot holds the marker
    let running = store.begin_preparation(0).expect("slot idle");
    assert!(store.upload(0, &[0.0, 0.0, 1.0, 0.0], 4, 1, SAMPLE_RATE, "late"));
    assert!(store.is_update_pending(0));
    assert!(reverb.poll().is_none());
    drop(running);

    let report = reverb.poll().expect("deferred update").wait().unwrap();
    assert!(!report.rebuilt);
    assert!(reverb.poll().is_none());

    reverb.reset();
    assert_block(&reverb, &[1.0, 0.0, 0.0, 0.0], &[0.0, 0.0, 1.0, 0.0]);
}
