use juicebox_resumable::config::{Config, ParamNames};
use juicebox_resumable::models::ChunkRequest;
use juicebox_resumable::{UploadCoordinator, UploadError, UploadStatus};
use std::collections::HashMap;
use std::path::Path;

fn params(identifier: &str, filename: &str, chunk: u64, total: u64) -> HashMap<String, String> {
    HashMap::from([
        ("resumableIdentifier".to_string(), identifier.to_string()),
        ("resumableFilename".to_string(), filename.to_string()),
        ("resumableChunkNumber".to_string(), chunk.to_string()),
        ("resumableChunkSize".to_string(), "1000".to_string()),
        ("resumableTotalChunks".to_string(), total.to_string()),
        ("resumableTotalSize".to_string(), "2500".to_string()),
    ])
}

fn test_config(root: &Path) -> Config {
    Config::new(root.join("tmp"), root.join("uploads"))
}

async fn send(config: &Config, request: ChunkRequest) -> (Option<UploadStatus>, UploadCoordinator) {
    let mut coordinator = UploadCoordinator::new(config, None).unwrap();
    let status = coordinator.process(&request).await.unwrap();
    (status, coordinator)
}

fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_three_chunk_scenario() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    let (status, _) = send(&config, ChunkRequest::chunk(params("abc123", "report.pdf", 1, 3), vec![0x41; 1000])).await;
    assert_eq!(status, Some(UploadStatus::Accepted));

    let (status, _) = send(&config, ChunkRequest::chunk(params("abc123", "report.pdf", 3, 3), vec![0x43; 500])).await;
    assert_eq!(status, Some(UploadStatus::Accepted));

    let (status, coordinator) =
        send(&config, ChunkRequest::chunk(params("abc123", "report.pdf", 2, 3), vec![0x42; 1000])).await;
    assert_eq!(status, Some(UploadStatus::Created));
    assert_eq!(status.unwrap().code(), 201);
    assert!(coordinator.is_upload_complete());

    let final_path = temp_dir.path().join("uploads").join("report.pdf");
    assert_eq!(coordinator.filepath(), Some(final_path.as_path()));
    assert_eq!(coordinator.stored_file_name().as_deref(), Some("report.pdf"));
    assert_eq!(coordinator.extension(), Some("pdf"));
    assert_eq!(coordinator.original_filename(false), Some("report.pdf"));
    assert_eq!(coordinator.original_filename(true), Some("report"));

    let mut expected = vec![0x41; 1000];
    expected.extend(vec![0x42; 1000]);
    expected.extend(vec![0x43; 500]);
    assert_eq!(std::fs::read(&final_path).unwrap(), expected);

    // staging dir is gone
    assert!(!temp_dir.path().join("tmp").join("abc123").exists());
}

#[tokio::test]
async fn test_probe_semantics() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    // nothing staged yet: please send
    let (status, _) = send(&config, ChunkRequest::probe(params("p1", "a.txt", 1, 2))).await;
    assert_eq!(status, Some(UploadStatus::NotFound));
    assert_eq!(status.unwrap().code(), 204);
    // probing never creates anything
    assert!(!temp_dir.path().join("tmp").exists());

    send(&config, ChunkRequest::chunk(params("p1", "a.txt", 1, 2), &b"hello "[..])).await;

    // staged but incomplete: already have it
    let (status, _) = send(&config, ChunkRequest::probe(params("p1", "a.txt", 1, 2))).await;
    assert_eq!(status, Some(UploadStatus::Accepted));
    let (status, _) = send(&config, ChunkRequest::probe(params("p1", "a.txt", 2, 2))).await;
    assert_eq!(status, Some(UploadStatus::NotFound));

    // complete the set with retention on so the probe finds a full set
    let mut keep = config.clone();
    keep.delete_staging_dir = false;
    let store_dir = temp_dir.path().join("tmp").join("p1");
    std::fs::write(store_dir.join("a.txt.0002"), b"world").unwrap();

    let (status, coordinator) = send(&keep, ChunkRequest::probe(params("p1", "a.txt", 2, 2))).await;
    assert_eq!(status, Some(UploadStatus::Created));
    assert!(coordinator.is_upload_complete());
    let final_path = temp_dir.path().join("uploads").join("a.txt");
    assert_eq!(std::fs::read(final_path).unwrap(), b"hello world");
    // retained for diagnostics
    assert!(store_dir.exists());

    // the retained marker stops a second assembly
    let (status, _) = send(&keep, ChunkRequest::probe(params("p1", "a.txt", 2, 2))).await;
    assert_eq!(status, Some(UploadStatus::Accepted));
    assert_eq!(dir_names(&temp_dir.path().join("uploads")), vec!["a.txt"]);
}

#[tokio::test]
async fn test_order_independent_completion() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    let total = 12;
    let order = [7, 12, 1, 10, 2, 11, 3, 9, 4, 8, 5, 6];
    let mut expected = Vec::new();
    for n in 1..=total {
        expected.extend(format!("<{}>", n).into_bytes());
    }

    for (i, n) in order.iter().enumerate() {
        let body = format!("<{}>", n).into_bytes();
        let (status, _) = send(&config, ChunkRequest::chunk(params("ooo", "data.bin", *n, total), body)).await;
        if i + 1 < order.len() {
            assert_eq!(status, Some(UploadStatus::Accepted), "chunk {}", n);
        } else {
            assert_eq!(status, Some(UploadStatus::Created));
        }
    }

    let assembled = std::fs::read(temp_dir.path().join("uploads").join("data.bin")).unwrap();
    assert_eq!(assembled, expected);
}

#[tokio::test]
async fn test_duplicate_chunk_keeps_single_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    send(&config, ChunkRequest::chunk(params("dup", "a.bin", 1, 2), &b"one"[..])).await;
    let (status, _) = send(&config, ChunkRequest::chunk(params("dup", "a.bin", 1, 2), &b"one"[..])).await;
    assert_eq!(status, Some(UploadStatus::Accepted));

    assert_eq!(dir_names(&temp_dir.path().join("tmp").join("dup")), vec!["a.bin.0001"]);
}

#[tokio::test]
async fn test_collision_gets_suffix() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    let (first, c1) = send(&config, ChunkRequest::chunk(params("u1", "photo.jpg", 1, 1), &b"first"[..])).await;
    let (second, c2) = send(&config, ChunkRequest::chunk(params("u2", "photo.jpg", 1, 1), &b"second"[..])).await;
    assert_eq!(first, Some(UploadStatus::Created));
    assert_eq!(second, Some(UploadStatus::Created));

    let first_path = c1.filepath().unwrap().to_path_buf();
    let second_path = c2.filepath().unwrap().to_path_buf();
    assert_ne!(first_path, second_path);
    assert_eq!(std::fs::read(&first_path).unwrap(), b"first");
    assert_eq!(std::fs::read(&second_path).unwrap(), b"second");

    let second_name = c2.stored_file_name().unwrap();
    assert!(second_name.starts_with("photo_"));
    assert!(second_name.ends_with(".jpg"));
    assert_eq!(second_name.len(), "photo_XXXXX.jpg".len());
    assert_eq!(c2.extension(), Some("jpg"));
}

#[tokio::test]
async fn test_filename_override() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    let mut coordinator = UploadCoordinator::new(&config, None).unwrap();
    coordinator.set_filename("../renamed.txt");
    assert_eq!(coordinator.filename(), Some("../renamed.txt"));

    let status = coordinator
        .process(&ChunkRequest::chunk(params("ov", "original.dat", 1, 1), &b"x"[..]))
        .await
        .unwrap();
    assert_eq!(status, Some(UploadStatus::Created));
    assert_eq!(coordinator.stored_file_name().as_deref(), Some("renamed.txt"));
    assert_eq!(coordinator.extension(), Some("txt"));
    assert!(temp_dir.path().join("uploads").join("renamed.txt").exists());
}

#[tokio::test]
async fn test_instance_namespace() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    let mut coordinator = UploadCoordinator::new(&config, Some("tenant-a")).unwrap();
    assert_eq!(coordinator.instance_id(), Some("tenant-a"));

    let status = coordinator
        .process(&ChunkRequest::chunk(params("ns", "a.txt", 1, 2), &b"a"[..]))
        .await
        .unwrap();
    assert_eq!(status, Some(UploadStatus::Accepted));
    assert!(temp_dir.path().join("tmp").join("tenant-a").join("ns").join("a.txt.0001").exists());

    let mut coordinator = UploadCoordinator::new(&config, Some("tenant-a")).unwrap();
    let status = coordinator
        .process(&ChunkRequest::chunk(params("ns", "a.txt", 2, 2), &b"b"[..]))
        .await
        .unwrap();
    assert_eq!(status, Some(UploadStatus::Created));
    let final_path = temp_dir.path().join("uploads").join("tenant-a").join("a.txt");
    assert_eq!(std::fs::read(final_path).unwrap(), b"ab");

    // the configured namespace applies when none is passed
    let mut with_default = config.clone();
    with_default.instance_id = Some("tenant-b".to_string());
    let coordinator = UploadCoordinator::new(&with_default, None).unwrap();
    assert_eq!(coordinator.upload_dir(), temp_dir.path().join("uploads").join("tenant-b"));

    // unsafe namespaces are rejected, not rewritten
    let err = UploadCoordinator::new(&config, Some("../escape")).unwrap_err();
    assert!(matches!(err, UploadError::InvalidInstance(_)));
}

#[tokio::test]
async fn test_missing_params_is_noop() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    let (status, _) = send(&config, ChunkRequest::chunk(HashMap::new(), &b"x"[..])).await;
    assert_eq!(status, None);

    let mut partial = params("id", "a.bin", 1, 2);
    partial.remove("resumableTotalChunks");
    let (status, _) = send(&config, ChunkRequest::probe(partial)).await;
    assert_eq!(status, None);

    // chunk numbers are 1-based and within the declared total
    let (status, _) = send(&config, ChunkRequest::chunk(params("id", "a.bin", 0, 2), &b"x"[..])).await;
    assert_eq!(status, None);
    let (status, _) = send(&config, ChunkRequest::chunk(params("id", "a.bin", 3, 2), &b"x"[..])).await;
    assert_eq!(status, None);

    assert!(!temp_dir.path().join("tmp").exists());
}

#[tokio::test]
async fn test_remapped_param_names() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.params = ParamNames {
        prefix: "flow".to_string(),
        ..ParamNames::default()
    }
    .merge([("chunkNumber", "index")]);

    let request = ChunkRequest::chunk(
        HashMap::from([
            ("flowIdentifier".to_string(), "remap".to_string()),
            ("flowFilename".to_string(), "r.bin".to_string()),
            ("flowIndex".to_string(), "1".to_string()),
            ("flowTotalChunks".to_string(), "1".to_string()),
        ]),
        &b"remapped"[..],
    );
    let (status, _) = send(&config, request).await;
    assert_eq!(status, Some(UploadStatus::Created));

    // default names mean nothing to this deployment
    let (status, _) = send(&config, ChunkRequest::chunk(params("x", "y.bin", 1, 1), &b"x"[..])).await;
    assert_eq!(status, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completion_assembles_once() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    let total = 10;
    for n in 1..total {
        send(&config, ChunkRequest::chunk(params("race", "race.bin", n, total), vec![n as u8; 100])).await;
    }

    // last chunk and a pile of probes all see a full set at roughly the same time
    let mut handles = Vec::new();
    for i in 0..12u64 {
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let request = if i == 0 {
                ChunkRequest::chunk(params("race", "race.bin", total, total), vec![total as u8; 100])
            } else {
                ChunkRequest::probe(params("race", "race.bin", 1 + i % total, total))
            };
            let mut coordinator = UploadCoordinator::new(&config, None).unwrap();
            let status = coordinator.process(&request).await.unwrap();
            status.unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == UploadStatus::Created {
            created += 1;
        }
    }

    // the request that stores the last chunk always sees a full set, so somebody wins
    assert_eq!(created, 1);
    let uploads = temp_dir.path().join("uploads");
    assert_eq!(dir_names(&uploads), vec!["race.bin"]);
    let mut expected = Vec::new();
    for n in 1..=total {
        expected.extend(vec![n as u8; 100]);
    }
    assert_eq!(std::fs::read(uploads.join("race.bin")).unwrap(), expected);
}

#[tokio::test]
async fn test_marker_of_running_assembly_blocks_retry() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());

    send(&config, ChunkRequest::chunk(params("slow", "big.bin", 1, 2), &b"one"[..])).await;
    let store = juicebox_resumable::staging::StagingStore::new(temp_dir.path().join("tmp"), 0o664);
    store.write_chunk("slow", "big.bin", 2, b"two").await.unwrap();

    // an assembler is mid-copy: it holds the marker and the placeholder exists
    let claim = store.claim_assembly("slow", config.assembly_lock_ttl).await.unwrap();
    std::fs::create_dir_all(temp_dir.path().join("uploads")).unwrap();
    std::fs::write(temp_dir.path().join("uploads").join("big.bin"), b"").unwrap();
    claim.refresh().await;

    let (status, _) = send(&config, ChunkRequest::probe(params("slow", "big.bin", 2, 2))).await;
    assert_eq!(status, Some(UploadStatus::Accepted));
    assert_eq!(dir_names(&temp_dir.path().join("uploads")), vec!["big.bin"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_ttl_still_assembles_once() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.assembly_lock_ttl = std::time::Duration::ZERO;
    config.delete_staging_dir = false;

    for n in 1..=3 {
        send(&config, ChunkRequest::chunk(params("zero", "race.bin", n, 3), vec![n as u8; 10])).await;
    }
    // the last chunk above already assembled; start over with a clean slate of probes
    std::fs::remove_file(temp_dir.path().join("uploads").join("race.bin")).unwrap();
    std::fs::remove_file(temp_dir.path().join("tmp").join("zero").join(".assembly.lock")).unwrap();

    let mut handles = Vec::new();
    for i in 0..12u64 {
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let request = ChunkRequest::probe(params("zero", "race.bin", 1 + i % 3, 3));
            let mut coordinator = UploadCoordinator::new(&config, None).unwrap();
            coordinator.process(&request).await.unwrap().unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == UploadStatus::Created {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(dir_names(&temp_dir.path().join("uploads")), vec!["race.bin"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_assembly_is_retried() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let uploads = temp_dir.path().join("uploads");

    // dangling symlink: the name looks free but the exclusive create refuses it
    std::fs::create_dir_all(&uploads).unwrap();
    let blocker = uploads.join("doc.txt");
    std::os::unix::fs::symlink(temp_dir.path().join("nowhere"), &blocker).unwrap();

    send(&config, ChunkRequest::chunk(params("retry", "doc.txt", 1, 2), &b"hello "[..])).await;
    let (status, coordinator) =
        send(&config, ChunkRequest::chunk(params("retry", "doc.txt", 2, 2), &b"world"[..])).await;
    assert_eq!(status, Some(UploadStatus::Accepted));
    assert!(!coordinator.is_upload_complete());

    // claim given back, chunks kept
    let staging = temp_dir.path().join("tmp").join("retry");
    assert!(!staging.join(".assembly.lock").exists());
    assert_eq!(dir_names(&staging), vec!["doc.txt.0001", "doc.txt.0002"]);

    std::fs::remove_file(&blocker).unwrap();
    let (status, coordinator) = send(&config, ChunkRequest::probe(params("retry", "doc.txt", 2, 2))).await;
    assert_eq!(status, Some(UploadStatus::Created));
    assert!(coordinator.is_upload_complete());
    assert_eq!(std::fs::read(uploads.join("doc.txt")).unwrap(), b"hello world");
    assert!(!staging.exists());
}
