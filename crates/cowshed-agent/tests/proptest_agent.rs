//! Property-based tests for the storage agent.
//!
//! Each case runs a real engine over a scratch directory and the fake
//! toolchain, verifying the lifecycle invariants rather than single
//! hand-picked examples.

mod common;

use std::future::Future;
use std::sync::{Arc, OnceLock};

use proptest::prelude::*;

use common::fake_tools;
use cowshed_agent::{
    AgentConfig, ErrorCode, StorageAgent, VolumeCreateRequest, VolumeRecord, VolumeUpdateRequest,
};
use cowshed_nfs::KernelExporter;

fn block_on<F: Future>(fut: F) -> F::Output {
    static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime")
    })
    .block_on(fut)
}

async fn new_agent(dir: &tempfile::TempDir) -> StorageAgent {
    let (runner, _state) = fake_tools();
    let config = AgentConfig {
        base_path: dir.path().to_path_buf(),
        tenants: vec!["t1".to_string()],
        verify_backing_fs: false,
        ..AgentConfig::default()
    };
    let exporter = Arc::new(KernelExporter::new(runner.clone()));
    StorageAgent::new(config, runner, exporter)
        .await
        .expect("agent startup failed")
}

fn valid_compression() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("none".to_string()),
        "(zstd|lzo|zlib)",
        ("(zstd|lzo|zlib)", 1u32..=15).prop_map(|(algo, level)| format!("{algo}:{level}")),
    ]
}

fn any_create_request() -> impl Strategy<Value = VolumeCreateRequest> {
    (
        "[a-z][a-z0-9-]{0,20}",
        1u64..(1 << 40),
        valid_compression(),
        any::<bool>(),
        prop_oneof![Just(0u64), 1u64..(1 << 20)],
    )
        .prop_map(|(name, size_bytes, compression, nocow, quota_extra)| {
            // nocow and real compression are mutually exclusive by contract
            let nocow = nocow && matches!(compression.as_str(), "" | "none");
            let quota_bytes = if quota_extra == 0 {
                0
            } else {
                size_bytes.saturating_add(quota_extra)
            };
            VolumeCreateRequest {
                name,
                size_bytes,
                nocow,
                compression,
                quota_bytes,
                ..VolumeCreateRequest::default()
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_accepted_create_upholds_invariants(req in any_create_request()) {
        let dir = tempfile::tempdir().unwrap();
        let record = block_on(async {
            let agent = new_agent(&dir).await;
            agent.create_volume("t1", req).await
        })
        .expect("valid request rejected");

        prop_assert!(record.quota_bytes >= record.size_bytes);
        prop_assert!(cowshed_btrfs::is_valid_compression(&record.compression));
        if record.nocow {
            prop_assert!(matches!(record.compression.as_str(), "" | "none"));
        }
        prop_assert!(record.clients.is_empty());
        prop_assert!(record.path.join("data").is_dir());
        prop_assert!(record.path.join("metadata.json").is_file());
    }

    #[test]
    fn prop_lifecycle_keeps_metadata_and_subvolume_in_agreement(
        req in any_create_request(),
        grows in proptest::collection::vec(1u64..(1 << 30), 0..4),
        delete in any::<bool>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let name = req.name.clone();

        let final_size = block_on(async {
            let agent = new_agent(&dir).await;
            let mut record = agent.create_volume("t1", req).await.expect("create failed");
            for grow in &grows {
                let target = record.size_bytes.saturating_add(*grow);
                record = agent
                    .update_volume(
                        "t1",
                        &name,
                        VolumeUpdateRequest {
                            size_bytes: Some(target),
                            ..VolumeUpdateRequest::default()
                        },
                    )
                    .await
                    .expect("grow failed");
            }
            if delete {
                agent.delete_volume("t1", &name).await.expect("delete failed");
                None
            } else {
                Some(record.size_bytes)
            }
        });

        let vol_dir = dir.path().join("t1").join(&name);
        match final_size {
            None => {
                prop_assert!(!vol_dir.exists(), "deleted volume left residue");
            }
            Some(size) => {
                prop_assert!(vol_dir.join("data").is_dir(), "subvolume missing");
                let raw = std::fs::read(vol_dir.join("metadata.json")).expect("metadata missing");
                let record: VolumeRecord = serde_json::from_slice(&raw).expect("metadata corrupt");
                prop_assert_eq!(record.size_bytes, size);
                prop_assert!(record.quota_bytes >= record.size_bytes);
                prop_assert!(record.updated_at >= record.created_at);
            }
        }
    }

    #[test]
    fn prop_shrink_is_always_rejected(
        a in 2u64..(1 << 40),
        b in 1u64..(1 << 40),
    ) {
        let size = a.max(b);
        let target = a.min(b); // target <= size, so always a shrink or no-op
        let dir = tempfile::tempdir().unwrap();

        let (err, after) = block_on(async {
            let agent = new_agent(&dir).await;
            let req = VolumeCreateRequest {
                name: "vol".to_string(),
                size_bytes: size,
                ..VolumeCreateRequest::default()
            };
            agent.create_volume("t1", req).await.expect("create failed");
            let err = agent
                .update_volume(
                    "t1",
                    "vol",
                    VolumeUpdateRequest {
                        size_bytes: Some(target),
                        ..VolumeUpdateRequest::default()
                    },
                )
                .await
                .unwrap_err();
            let after = agent.get_volume("t1", "vol").expect("volume vanished");
            (err, after)
        });

        prop_assert_eq!(err.code(), ErrorCode::Invalid);
        prop_assert_eq!(after.size_bytes, size);
        prop_assert_eq!(after.quota_bytes, size);
    }
}
