//! Repair Integration Tests
//!
//! End-to-end exercises of the full pipeline: stripe encoding, per-helper
//! trace generation, the concurrent repair coordinator over in-memory
//! helper nodes, and trace-based recovery of the erased shard.

use std::sync::Arc;
use std::time::Duration;

use tracestor::codec::encoder::EncodeRequest;
use tracestor::repair::mock::MockTraceSource;
use tracestor::repair::TraceSource;
use tracestor::tables::bandwidth;
use tracestor::{
    CodecOptions, Error, RepairConfig, RepairCoordinator, RepairTask, TrDecoder, TrEncoder,
};

// =============================================================================
// Fixtures
// =============================================================================

/// Surface the engine's `debug!`/`info!` output under
/// `RUST_LOG=debug cargo test -- --nocapture`.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn stripe_data(len: usize, seed: u64) -> Vec<Vec<u8>> {
    // xorshift so stripes are deterministic but not structured
    let mut state = seed | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state as u8
    };
    (0..6).map(|_| (0..len).map(|_| next()).collect()).collect()
}

/// RS-encode a stripe into its nine cells (data followed by parity).
fn all_shards(data: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let len = data[0].len();
    let encoder = TrEncoder::new(CodecOptions::tr_default()).unwrap();
    let inputs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
    let mut parity = vec![vec![0u8; len]; 3];
    {
        let mut outputs: Vec<&mut [u8]> = parity.iter_mut().map(|p| p.as_mut_slice()).collect();
        encoder
            .encode_parity(len, &inputs, &[0; 6], &mut outputs, &[0; 3])
            .unwrap();
    }
    data.iter().cloned().chain(parity).collect()
}

/// Build sources from mocks, applying `tweak` to each (slot, source) pair.
fn make_sources(
    shards: &[Vec<u8>],
    erased: usize,
    tweak: impl Fn(usize, MockTraceSource) -> MockTraceSource,
) -> Vec<Arc<dyn TraceSource>> {
    (0..8)
        .map(|live| {
            let stripe = if live < erased { live } else { live + 1 };
            let source = MockTraceSource::new(
                format!("node-{}", stripe),
                shards[stripe].clone(),
                stripe,
                erased,
            );
            Arc::new(tweak(live, source)) as Arc<dyn TraceSource>
        })
        .collect()
}

fn make_task(erased: usize, sources: Vec<Arc<dyn TraceSource>>, block_len: u64) -> RepairTask {
    RepairTask {
        block_group: 31_337,
        erased_index: erased,
        live_indices: (0..8).collect(),
        sources,
        block_lens: vec![block_len; 9],
        target_count: 1,
    }
}

// =============================================================================
// Full Pipeline
// =============================================================================

#[tokio::test]
async fn test_repair_every_erased_index() {
    init_tracing();
    let len = 256;
    for erased in 0..9 {
        let shards = all_shards(&stripe_data(len, 0xDEAD_BEEF + erased as u64));
        let expected = shards[erased].clone();
        let task = make_task(erased, make_sources(&shards, erased, |_, s| s), len as u64);

        let coordinator =
            RepairCoordinator::new(CodecOptions::tr_default(), RepairConfig::default(), task)
                .unwrap();
        let result = coordinator.run().await.unwrap();

        assert_eq!(result.block_group, 31_337);
        assert_eq!(result.data, expected, "repair mismatch for erased {}", erased);
        assert_eq!(result.stats.reads_failed, 0);
    }
}

#[tokio::test]
async fn test_encoder_traces_decode_directly() {
    init_tracing();
    // The encoder's bulk trace output feeds the decoder without going
    // through the coordinator: the codec-level contract of the wire format.
    let len = 128;
    let data = stripe_data(len, 0xF00D);
    let encoder = TrEncoder::new(CodecOptions::tr_default()).unwrap();
    let decoder = TrDecoder::new(CodecOptions::tr_default()).unwrap();

    for erased in [0usize, 5, 8] {
        let inputs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
        let mut parity = vec![vec![0u8; len]; 3];
        let traces = {
            let mut outputs: Vec<&mut [u8]> =
                parity.iter_mut().map(|p| p.as_mut_slice()).collect();
            let mut request = EncodeRequest {
                inputs: &inputs,
                input_offsets: &[0; 6],
                outputs: &mut outputs,
                output_offsets: &[0; 3],
                encode_length: len,
                erased_index: erased,
                requested_node_index: None,
            };
            encoder.encode(&mut request).unwrap()
        };

        let slots: Vec<Option<&[u8]>> = traces.iter().map(|t| t.as_deref()).collect();
        let mut output = vec![0u8; len];
        decoder.decode(&slots, erased, &mut output, 0, len).unwrap();

        let expected: &[u8] = if erased < 6 {
            &data[erased]
        } else {
            &parity[erased - 6]
        };
        assert_eq!(output.as_slice(), expected);
    }
}

#[tokio::test]
async fn test_repair_large_block_chunked_reads() {
    init_tracing();
    // A block much larger than the read buffer forces many sequential
    // iterations; each helper serves the trace of each range in turn.
    let len = 16 * 1024;
    let erased = 5;
    let shards = all_shards(&stripe_data(len, 0x1234_5678));
    let expected = shards[erased].clone();
    let task = make_task(erased, make_sources(&shards, erased, |_, s| s), len as u64);

    let config = RepairConfig::from_options([
        ("reconstruction.striped-read.timeout.ms", "2000"),
        ("reconstruction.striped-read.buffer.size", "4096"),
    ])
    .unwrap();

    let coordinator = RepairCoordinator::new(CodecOptions::tr_default(), config, task).unwrap();
    let result = coordinator.run().await.unwrap();

    assert_eq!(result.data, expected);
    // 16 KiB / 4 KiB span = 4 iterations of 8 reads each.
    assert_eq!(result.stats.reads_issued, 32);
    assert_eq!(
        result.stats.bytes_fetched,
        (0..9)
            .filter(|&i| i != erased)
            .map(|i| (len * bandwidth(i, erased) as usize / 8) as u64)
            .sum::<u64>()
    );
}

#[tokio::test]
async fn test_repair_traffic_is_less_than_full_shards() {
    init_tracing();
    // The point of trace repair: the bytes on the wire are well under the
    // k full shards classical repair would fetch.
    let len = 8 * 1024;
    let erased = 0;
    let shards = all_shards(&stripe_data(len, 0xFEED));
    let task = make_task(erased, make_sources(&shards, erased, |_, s| s), len as u64);

    let coordinator =
        RepairCoordinator::new(CodecOptions::tr_default(), RepairConfig::default(), task).unwrap();
    let result = coordinator.run().await.unwrap();

    let classical = (6 * len) as u64;
    assert!(
        result.stats.bytes_fetched < classical,
        "trace repair fetched {} bytes, classical needs {}",
        result.stats.bytes_fetched,
        classical
    );
}

#[tokio::test]
async fn test_concurrent_repairs_share_codec_state() {
    init_tracing();
    // Tables and codec parameters are immutable process-wide state; several
    // repairs of different block groups run concurrently against them.
    let len = 512;
    let repairs = (0..4).map(|round| {
        let erased = (round * 2 + 1) % 9;
        let shards = all_shards(&stripe_data(len, 0x9000 + round as u64));
        let expected = shards[erased].clone();
        let mut task = make_task(erased, make_sources(&shards, erased, |_, s| s), len as u64);
        task.block_group = round as u64;
        let coordinator =
            RepairCoordinator::new(CodecOptions::tr_default(), RepairConfig::default(), task)
                .unwrap();
        async move { (coordinator.run().await, expected) }
    });

    for (result, expected) in futures::future::join_all(repairs).await {
        let result = result.unwrap();
        assert_eq!(result.data, expected);
    }
}

#[tokio::test]
async fn test_repair_survives_one_slow_source_per_round() {
    init_tracing();
    let len = 512;
    let erased = 8;
    let shards = all_shards(&stripe_data(len, 0xABCD));
    let expected = shards[erased].clone();

    let sources = make_sources(&shards, erased, |slot, source| {
        if slot == 2 {
            source.slow_reads(1, Duration::from_millis(200))
        } else {
            source
        }
    });

    let mut task = make_task(erased, sources, len as u64);
    task.block_group = 8_080;

    let config = RepairConfig {
        striped_read_timeout: Duration::from_millis(40),
        read_buffer_size: 512,
    };
    let coordinator = RepairCoordinator::new(CodecOptions::tr_default(), config, task).unwrap();
    let result = coordinator.run().await.unwrap();

    assert_eq!(result.data, expected);
    assert!(result.stats.reads_timed_out >= 1);
}

#[tokio::test]
async fn test_repair_reports_insufficient_sources() {
    init_tracing();
    let len = 64;
    let erased = 6;
    let shards = all_shards(&stripe_data(len, 0x600D));

    let sources = make_sources(&shards, erased, |slot, source| {
        if slot < 2 {
            source.fail_reads(10)
        } else {
            source
        }
    });

    let mut task = make_task(erased, sources, len as u64);
    task.block_group = 99;

    let coordinator =
        RepairCoordinator::new(CodecOptions::tr_default(), RepairConfig::default(), task).unwrap();
    match coordinator.run().await {
        Err(Error::InsufficientSources {
            available,
            required,
            block_group,
        }) => {
            assert_eq!(available, 6);
            assert_eq!(required, 8);
            assert_eq!(block_group, 99);
        }
        other => panic!(
            "expected InsufficientSources, got {:?}",
            other.map(|r| r.data.len())
        ),
    }
}

#[tokio::test]
async fn test_cancellation_stops_repair_and_releases_buffers() {
    init_tracing();
    let len = 64;
    let erased = 0;
    let shards = all_shards(&stripe_data(len, 0xCAFE));

    let sources = make_sources(&shards, erased, |_, source| {
        source.slow_reads(8, Duration::from_secs(30))
    });

    let mut task = make_task(erased, sources, len as u64);
    task.block_group = 1;

    let config = RepairConfig {
        striped_read_timeout: Duration::from_millis(40),
        read_buffer_size: 512,
    };
    let coordinator = RepairCoordinator::new(CodecOptions::tr_default(), config, task).unwrap();
    let pool = coordinator.buffer_pool();
    let handle = coordinator.handle();

    let driver = tokio::spawn(coordinator.run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();

    let result = driver.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(pool.outstanding(), 0);
}
