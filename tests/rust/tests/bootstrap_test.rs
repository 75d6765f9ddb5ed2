
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use common::{
    run_ranks, with_captured_logs, FakeCollective, FakeDevice, FakeRegistry, LogBuffer,
    TrackedStore, TEST_TIMEOUT,
};
use xccl_bootstrap::{RendezvousContext, XcclBootstrap, XcclBootstrapBuilder};
use xccl_core::{
    BootstrapConfig, CommHandle, CommOptions, Error, RankInfo, RendezvousAddress,
};
use xccl_store::{MemoryStore, Store};

fn rendezvous_config(rank: u32, world_size: u32) -> BootstrapConfig {
    BootstrapConfig::new(RankInfo::new(rank, world_size).unwrap())
        .with_rendezvous(RendezvousAddress::new("127.0.0.1", 29500))
}

/// Builder for one simulated process: own device, own key counter
fn rank_builder(
    backend: &Arc<FakeCollective>,
    device: Arc<FakeDevice>,
    config: BootstrapConfig,
) -> XcclBootstrapBuilder {
    XcclBootstrap::builder(backend.clone(), device)
        .config(config)
        .context(Arc::new(RendezvousContext::new()))
        .timeout(TEST_TIMEOUT)
}

#[test]
fn test_identity_convergence() -> Result<()> {
    let registry = FakeRegistry::new();
    let backend = Arc::new(FakeCollective::new(4));

    let comms = run_ranks(4, |rank| {
        let mut bootstrap = rank_builder(&backend, FakeDevice::new(4), rendezvous_config(rank, 4))
            .registry(registry.clone())
            .build()
            .unwrap();
        let first = bootstrap.create_communicator("tp", &CommOptions::new()).unwrap();
        let second = bootstrap.create_communicator("tp", &CommOptions::new()).unwrap();
        bootstrap.close().unwrap();
        (first, second)
    });

    for (rank, (first, second)) in comms.into_iter().enumerate() {
        assert_eq!(first, CommHandle(0x100 + rank as u64));
        assert_eq!(second, first);
    }

    let inits = backend.inits.lock();
    assert_eq!(inits.len(), 8);
    assert_eq!(backend.unique_id_calls.load(Ordering::SeqCst), 2);

    // Every rank saw the same identity per communicator, and the two differ
    let first_id = inits[0].unique_id.clone();
    let second_id = inits[4].unique_id.clone();
    assert_ne!(first_id, second_id);
    for init in &inits[..4] {
        assert_eq!(init.unique_id, first_id);
        assert_eq!(init.nranks, 4);
    }
    for init in &inits[4..] {
        assert_eq!(init.unique_id, second_id);
    }
    Ok(())
}

#[test]
fn test_deterministic_device_assignment() {
    let backend = Arc::new(FakeCollective::new(8));

    let devices = run_ranks(8, |rank| {
        let device = FakeDevice::new(3);
        let bootstrap = rank_builder(&backend, device.clone(), rendezvous_config(rank, 8))
            .build()
            .unwrap();
        let assigned = bootstrap.device();
        bootstrap.close().unwrap();
        let selected = *device.selected.lock();
        let allocations = device.allocations.lock().clone();
        (assigned, selected, allocations)
    });

    for (rank, (assigned, selected, allocations)) in devices.into_iter().enumerate() {
        assert_eq!(assigned, rank as i32 % 3);
        assert_eq!(selected, Some(assigned));
        assert_eq!(allocations, vec![std::mem::size_of::<f32>()]);
    }
}

#[test]
fn test_explicit_device_is_used() {
    let backend = Arc::new(FakeCollective::new(1));
    let device = FakeDevice::new(8);

    let bootstrap = rank_builder(&backend, device.clone(), rendezvous_config(0, 1))
        .device(5)
        .build()
        .unwrap();

    assert_eq!(bootstrap.device(), 5);
    assert_eq!(*device.selected.lock(), Some(5));
}

#[test]
fn test_invalid_device_fails_construction() {
    let backend = Arc::new(FakeCollective::new(1));
    let err = rank_builder(&backend, FakeDevice::new(2), rendezvous_config(0, 1))
        .device(7)
        .build()
        .err()
        .unwrap();

    assert!(matches!(err, Error::Device { .. }));
    assert!(err.to_string().contains("Failed to set device 7"));
}

#[test]
fn test_consecutive_exchanges_use_distinct_keys() -> Result<()> {
    let store = Arc::new(MemoryStore::new(TEST_TIMEOUT));
    let backend = Arc::new(FakeCollective::new(1));
    let context = Arc::new(RendezvousContext::new());

    let mut bootstrap = XcclBootstrap::builder(backend.clone(), FakeDevice::new(1))
        .config(BootstrapConfig::new(RankInfo::new(0, 1)?))
        .store(store.clone())
        .context(context.clone())
        .build()?;

    bootstrap.create_communicator("a", &CommOptions::new())?;
    bootstrap.create_communicator("b", &CommOptions::new())?;
    bootstrap.create_communicator("a", &CommOptions::new())?;

    assert_eq!(
        store.keys(),
        vec!["xccl_storekey_0", "xccl_storekey_1", "xccl_storekey_2"]
    );
    assert_eq!(context.store_key_counter(), 3);
    assert_eq!(&store.get("xccl_storekey_1")?[..], &[2u8; 16][..]);

    bootstrap.close()?;
    Ok(())
}

#[test]
fn test_bootstraps_sharing_a_context_never_reuse_keys() -> Result<()> {
    let store = Arc::new(MemoryStore::new(TEST_TIMEOUT));
    let backend = Arc::new(FakeCollective::new(1));
    let context = Arc::new(RendezvousContext::new());

    let build = || {
        XcclBootstrap::builder(backend.clone(), FakeDevice::new(1))
            .config(BootstrapConfig::new(RankInfo::new(0, 1).unwrap()))
            .store(store.clone())
            .context(context.clone())
            .build()
    };
    let mut first = build()?;
    let mut second = build()?;

    first.create_communicator("x", &CommOptions::new())?;
    second.create_communicator("x", &CommOptions::new())?;

    assert_eq!(store.keys(), vec!["xccl_storekey_0", "xccl_storekey_1"]);
    Ok(())
}

#[test]
fn test_hint_robustness() {
    let backend = Arc::new(FakeCollective::new(1));
    let logs = LogBuffer::default();

    let comm = with_captured_logs(&logs, || {
        let mut bootstrap = XcclBootstrap::builder(backend.clone(), FakeDevice::new(1))
            .config(BootstrapConfig::new(RankInfo::new(0, 1).unwrap()))
            .store(Arc::new(MemoryStore::new(TEST_TIMEOUT)))
            .context(Arc::new(RendezvousContext::new()))
            .build()
            .unwrap();
        let options = CommOptions::new()
            .hint("thisIsNotAHint", "1")
            .hint("alsoUnknown", "not a number")
            .hint("netName", "Socket")
            .hint("traffic_class", "3");
        bootstrap.create_communicator("pp", &options)
    });

    assert!(comm.is_ok());
    assert_eq!(logs.count_lines(&["Unknown XCCL hint", "thisIsNotAHint", "pp"]), 1);
    assert_eq!(logs.count_lines(&["Unknown XCCL hint", "alsoUnknown"]), 1);

    let inits = backend.inits.lock();
    let config = &inits[0].config;
    assert_eq!(config.net_name.as_deref(), Some("Socket"));
    assert_eq!(config.traffic_class, Some(3));
    assert_eq!(config.comm_name.as_deref(), Some("pp"));
}

#[test]
fn test_comm_name_hint_overrides_default() -> Result<()> {
    let backend = Arc::new(FakeCollective::new(1));
    let mut bootstrap = XcclBootstrap::builder(backend.clone(), FakeDevice::new(1))
        .config(BootstrapConfig::new(RankInfo::new(0, 1)?))
        .store(Arc::new(MemoryStore::new(TEST_TIMEOUT)))
        .context(Arc::new(RendezvousContext::new()))
        .build()?;

    bootstrap.create_communicator("tp", &CommOptions::new().hint("commName", "tensor"))?;

    assert_eq!(backend.inits.lock()[0].config.comm_name.as_deref(), Some("tensor"));
    Ok(())
}

#[test]
fn test_external_store_is_never_released() -> Result<()> {
    let registry = FakeRegistry::new();
    let released = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let store = Arc::new(TrackedStore::new(
        Arc::new(MemoryStore::new(TEST_TIMEOUT)),
        released.clone(),
    ));
    let backend = Arc::new(FakeCollective::new(1));
    let device = FakeDevice::new(1);

    let mut bootstrap = rank_builder(&backend, device.clone(), rendezvous_config(0, 1))
        .store(store.clone())
        .registry(registry.clone())
        .build()?;
    assert!(bootstrap.has_external_store());

    bootstrap.create_communicator("dp", &CommOptions::new())?;
    bootstrap.create_communicator("dp", &CommOptions::new())?;
    bootstrap.close()?;

    assert_eq!(released.load(Ordering::SeqCst), 0);
    assert_eq!(Arc::strong_count(&store), 1);
    assert_eq!(registry.acquired(), 0);
    assert_eq!(backend.all_reduces.load(Ordering::SeqCst), 0);
    assert_eq!(device.syncs.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_closing_barrier_waits_for_every_release() {
    let registry = FakeRegistry::new();
    let backend = Arc::new(FakeCollective::new(4).observing(&registry));

    let devices = run_ranks(4, |rank| {
        let device = FakeDevice::new(4);
        let mut bootstrap = rank_builder(&backend, device.clone(), rendezvous_config(rank, 4))
            .registry(registry.clone())
            .build()
            .unwrap();
        bootstrap.create_communicator("tp", &CommOptions::new()).unwrap();
        bootstrap.create_communicator("tp", &CommOptions::new()).unwrap();
        bootstrap.close().unwrap();
        device
    });

    assert_eq!(registry.acquired(), 8);
    assert_eq!(registry.released(), 8);
    assert_eq!(backend.all_reduces.load(Ordering::SeqCst), 8);

    // No rank left a barrier before every rank had released that round's store
    let mut observations = backend.barrier_observations.lock().clone();
    observations.sort();
    assert_eq!(&observations[..4], &[4, 4, 4, 4]);
    assert_eq!(&observations[4..], &[8, 8, 8, 8]);

    for device in devices {
        assert_eq!(device.syncs.load(Ordering::SeqCst), 2);
        assert_eq!(device.freed.lock().len(), 1);
    }

    let requests = registry.requests.lock();
    assert!(requests
        .iter()
        .all(|(backend_name, name, timeout)| backend_name == "xccl" && name == "tp" && *timeout == TEST_TIMEOUT));
}

#[test]
fn test_barrier_failure_is_logged_not_raised() {
    let registry = FakeRegistry::new();
    let mut collective = FakeCollective::new(1);
    collective.fail_all_reduce = true;
    let backend = Arc::new(collective);
    let device = FakeDevice::new(1);
    let logs = LogBuffer::default();

    let comm = with_captured_logs(&logs, || {
        let mut bootstrap = rank_builder(&backend, device.clone(), rendezvous_config(0, 1))
            .registry(registry.clone())
            .build()
            .unwrap();
        bootstrap.create_communicator("ep", &CommOptions::new())
    });

    assert_eq!(comm.unwrap(), CommHandle(0x100));
    assert_eq!(logs.count_lines(&["Closing barrier all-reduce failed", "SystemError"]), 1);
    assert_eq!(device.syncs.load(Ordering::SeqCst), 1);
    assert_eq!(registry.released(), 1);
}

#[test]
fn test_stream_sync_failure_is_raised() {
    let registry = FakeRegistry::new();
    let backend = Arc::new(FakeCollective::new(1));
    let device = Arc::new(FakeDevice {
        count: 1,
        fail_sync: true,
        ..FakeDevice::default()
    });

    let mut bootstrap = rank_builder(&backend, device, rendezvous_config(0, 1))
        .registry(registry.clone())
        .build()
        .unwrap();
    let err = bootstrap
        .create_communicator("ep", &CommOptions::new())
        .unwrap_err();

    assert!(matches!(err, Error::Device { .. }));
    let message = err.to_string();
    assert!(message.contains("fake device error 719"));
    assert!(message.contains("rank 0"), "{message}");
    assert!(message.contains("'ep'"), "{message}");
}

#[test]
fn test_comm_init_failure_releases_internal_store() {
    let registry = FakeRegistry::new();
    let mut collective = FakeCollective::new(1);
    collective.fail_comm_init = true;
    let backend = Arc::new(collective);

    let mut bootstrap = rank_builder(&backend, FakeDevice::new(1), rendezvous_config(0, 1))
        .registry(registry.clone())
        .build()
        .unwrap();
    let err = bootstrap
        .create_communicator("tp", &CommOptions::new())
        .unwrap_err();

    match &err {
        Error::CommInit {
            rank, size, comm, message,
        } => {
            assert_eq!((*rank, *size), (0, 1));
            assert_eq!(comm, "tp");
            assert!(message.contains("InternalError"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_fatal());
    assert_eq!(registry.released(), 1);
    assert_eq!(backend.all_reduces.load(Ordering::SeqCst), 0);
}

#[test]
fn test_null_communicator_is_an_error() {
    let mut collective = FakeCollective::new(1);
    collective.null_comm = true;
    let backend = Arc::new(collective);

    let mut bootstrap = XcclBootstrap::builder(backend, FakeDevice::new(1))
        .config(BootstrapConfig::new(RankInfo::new(0, 1).unwrap()))
        .store(Arc::new(MemoryStore::new(TEST_TIMEOUT)))
        .context(Arc::new(RendezvousContext::new()))
        .build()
        .unwrap();

    let err = bootstrap
        .create_communicator("tp", &CommOptions::new())
        .unwrap_err();
    assert!(err.to_string().contains("null communicator"));
}

#[test]
fn test_exchange_timeout_names_key_and_rank() {
    let backend = Arc::new(FakeCollective::new(2));
    let store = Arc::new(MemoryStore::new(std::time::Duration::from_millis(50)));

    let mut bootstrap = XcclBootstrap::builder(backend.clone(), FakeDevice::new(2))
        .config(BootstrapConfig::new(RankInfo::new(1, 2).unwrap()))
        .store(store)
        .context(Arc::new(RendezvousContext::new()))
        .build()
        .unwrap();

    let err = bootstrap
        .create_communicator("dp", &CommOptions::new())
        .unwrap_err();
    match &err {
        Error::Exchange { key, rank, comm, source } => {
            assert_eq!(key, "xccl_storekey_0");
            assert_eq!(*rank, 1);
            assert_eq!(comm, "dp");
            assert!(matches!(**source, Error::StoreTimeout { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.init_count(), 0);
}

#[test]
fn test_scenario_a_four_ranks_with_hints() {
    let registry = FakeRegistry::new();
    let backend = Arc::new(FakeCollective::new(4));

    let logs = run_ranks(4, |rank| {
        let logs = LogBuffer::default();
        let comm = with_captured_logs(&logs, || {
            let mut bootstrap = rank_builder(&backend, FakeDevice::new(4), rendezvous_config(rank, 4))
                .registry(registry.clone())
                .build()
                .unwrap();
            let options = CommOptions::new()
                .hint("blocking", "1")
                .hint("bogus_key", "x");
            bootstrap.create_communicator("world", &options)
        });
        assert!(comm.is_ok(), "rank {} failed: {:?}", rank, comm);
        logs
    });

    for buffer in &logs {
        assert_eq!(buffer.count_lines(&["Unknown XCCL hint", "bogus_key"]), 1);
    }

    let inits = backend.inits.lock();
    assert_eq!(inits.len(), 4);
    for init in inits.iter() {
        assert_eq!(init.config.blocking, Some(1));
        assert_eq!(init.config.comm_name.as_deref(), Some("world"));
    }
    assert_eq!(registry.released(), 4);
}

#[test]
fn test_scenario_b_short_identity_is_rejected() -> Result<()> {
    let store = Arc::new(MemoryStore::new(TEST_TIMEOUT));
    store.set("xccl_storekey_0", &[1, 2, 3])?;
    let backend = Arc::new(FakeCollective::new(2).with_id_size(16));

    let mut bootstrap = XcclBootstrap::builder(backend.clone(), FakeDevice::new(2))
        .config(BootstrapConfig::new(RankInfo::new(1, 2)?))
        .store(store)
        .context(Arc::new(RendezvousContext::new()))
        .build()?;

    let err = bootstrap
        .create_communicator("tp", &CommOptions::new())
        .unwrap_err();

    match err {
        Error::InvalidUniqueIdSize {
            expected, actual, rank, ..
        } => {
            assert_eq!((expected, actual, rank), (16, 3, 1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.unique_id_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.init_count(), 0);
    Ok(())
}

#[test]
fn test_scenario_c_no_exchange_method() {
    let registry = FakeRegistry::new();
    let backend = Arc::new(FakeCollective::new(2));

    let mut bootstrap = XcclBootstrap::builder(backend.clone(), FakeDevice::new(2))
        .config(BootstrapConfig::new(RankInfo::new(0, 2).unwrap()).with_exchange_method("auto"))
        .registry(registry.clone())
        .context(Arc::new(RendezvousContext::new()))
        .build()
        .unwrap();

    let err = bootstrap
        .create_communicator("tp", &CommOptions::new())
        .unwrap_err();

    assert!(matches!(err, Error::NoExchangeMethod { .. }));
    assert!(err.to_string().contains("No way to exchange unique ID"));
    assert_eq!(registry.acquired(), 0);
    assert_eq!(backend.unique_id_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_scenario_d_malformed_integer_hint() {
    let backend = Arc::new(FakeCollective::new(1));

    let mut bootstrap = XcclBootstrap::builder(backend.clone(), FakeDevice::new(1))
        .config(BootstrapConfig::new(RankInfo::new(0, 1).unwrap()))
        .store(Arc::new(MemoryStore::new(TEST_TIMEOUT)))
        .context(Arc::new(RendezvousContext::new()))
        .build()
        .unwrap();

    let err = bootstrap
        .create_communicator("tp", &CommOptions::new().hint("min_ctas", "abc"))
        .unwrap_err();

    match err {
        Error::HintParse {
            key,
            value,
            rank,
            comm,
            ..
        } => {
            assert_eq!(key, "min_ctas");
            assert_eq!(value, "abc");
            assert_eq!(rank, 0);
            assert_eq!(comm, "tp");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.init_count(), 0);
}

#[test]
fn test_registry_failure_carries_comm_context() {
    struct RefusingRegistry;

    impl xccl_store::StoreRegistry for RefusingRegistry {
        fn get_store(
            &self,
            _backend_name: &str,
            _name: &str,
            _timeout: std::time::Duration,
        ) -> xccl_core::Result<Arc<dyn Store>> {
            Err(Error::StoreUnavailable {
                address: "127.0.0.1:29500".to_string(),
            })
        }
    }

    let backend = Arc::new(FakeCollective::new(1));
    let mut bootstrap = rank_builder(&backend, FakeDevice::new(1), rendezvous_config(0, 1))
        .registry(Arc::new(RefusingRegistry))
        .build()
        .unwrap();

    let err = bootstrap
        .create_communicator("moe", &CommOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::StoreAcquire { rank: 0, .. }));
    assert!(err.to_string().contains("'moe'"));
    assert!(!err.is_fatal());
}
