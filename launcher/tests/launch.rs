use std::{
    net::{Ipv4Addr, TcpListener as StdListener},
    path::{Path, PathBuf},
    thread,
};

use clap::Parser;
use launcher::{Args, Cluster, LauncherErr};
use machine_learning::persistence::{MODEL_FILE, WEIGHTS_FILE, checkpoint_path};
use tokio::{net::TcpListener, runtime::Runtime};
use worker::data::{Example, Feature, IMAGE_LEN, NUM_CLASSES, RecordWriter};

fn write_tfos_files(dir: &Path, files: usize, records: usize) {
    std::fs::create_dir_all(dir).unwrap();

    for f in 0..files {
        let mut writer = RecordWriter::create(dir.join(format!("part-{f:05}"))).unwrap();

        for r in 0..records {
            let label = (f * records + r) % NUM_CLASSES;
            let mut example = Example::new();
            let one_hot = (0..NUM_CLASSES).map(|i| (i == label) as i64).collect();
            example.insert("image", Feature::Int64s(vec![(label * 20) as i64; IMAGE_LEN]));
            example.insert("label", Feature::Int64s(one_hot));
            writer.write_record(&example.encode()).unwrap();
        }

        writer.flush().unwrap();
    }
}

fn args(dir: &Path, cluster_size: usize, extra: &[&str]) -> Args {
    let pattern = dir.join("data/part-*").to_string_lossy().into_owned();
    let model_dir = dir.join("mnist_model").to_string_lossy().into_owned();
    let export_dir = dir.join("mnist_export").to_string_lossy().into_owned();
    let cluster_size = cluster_size.to_string();

    let argv = [
        "launcher",
        "--images_labels",
        pattern.as_str(),
        "--model_dir",
        model_dir.as_str(),
        "--export_dir",
        export_dir.as_str(),
        "--cluster_size",
        cluster_size.as_str(),
        "--batch_size",
        "4",
        "--buffer_size",
        "100",
        "--epochs",
        "2",
        "--steps_per_epoch",
        "2",
        "--learning_rate",
        "0.01",
        "--seed",
        "3",
    ];

    Args::try_parse_from(argv.iter().chain(extra)).unwrap()
}

fn single_export(export_root: &Path) -> PathBuf {
    let exports: Vec<_> = std::fs::read_dir(export_root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();

    assert_eq!(exports.len(), 1);
    exports.into_iter().next().unwrap()
}

#[test]
fn in_process_cluster_trains_and_exports() {
    let dir = tempfile::tempdir().unwrap();
    write_tfos_files(&dir.path().join("data"), 2, 8);

    let cluster = Cluster::run(&args(dir.path(), 2, &[])).unwrap();
    assert_eq!(cluster.size(), 2);

    let reports = cluster.shutdown().unwrap();
    assert_eq!(reports.len(), 2);

    for (worker_id, report) in reports.iter().enumerate() {
        assert_eq!(report.worker_id, worker_id);
        assert_eq!(report.steps, 4);
        assert_eq!(report.epochs.len(), 2);
        assert!(!report.exhausted);
    }

    assert_eq!(reports[0].epochs, reports[1].epochs);
    assert!(reports[1].export_dir.is_none());

    let export = reports[0].export_dir.clone().unwrap();
    assert_eq!(export, single_export(&dir.path().join("mnist_export")));
    assert!(export.join(MODEL_FILE).is_file());
    assert!(export.join(WEIGHTS_FILE).is_file());

    let model_dir = dir.path().join("mnist_model");
    assert!(checkpoint_path(&model_dir, 1).is_file());
    assert!(checkpoint_path(&model_dir, 2).is_file());
}

#[test]
fn remote_daemons_are_reached_by_address() {
    let dir = tempfile::tempdir().unwrap();
    write_tfos_files(&dir.path().join("data"), 2, 8);

    let listeners: Vec<StdListener> = (0..2)
        .map(|_| StdListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap())
        .collect();
    let addrs: Vec<String> = listeners
        .iter()
        .map(|l| l.local_addr().unwrap().to_string())
        .collect();

    let daemons = thread::spawn(move || {
        let runtime = Runtime::new().unwrap();
        runtime.block_on(async move {
            let mut handles = Vec::new();

            for listener in listeners {
                listener.set_nonblocking(true).unwrap();
                let listener = TcpListener::from_std(listener).unwrap();

                handles.push(tokio::spawn(async move {
                    let (stream, _) = listener.accept().await.unwrap();
                    let ip = stream.local_addr().unwrap().ip();
                    let (rx, tx) = stream.into_split();
                    worker::serve(rx, tx, ip).await
                }));
            }

            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        });
    });

    let worker_addrs = addrs.join(",");
    let args = args(dir.path(), 2, &["--worker_addrs", worker_addrs.as_str()]);
    let reports = Cluster::run(&args).unwrap().shutdown().unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports[0].export_dir.is_some());
    daemons.join().unwrap();
}

#[test]
fn missing_input_fails_the_run_with_the_worker_id() {
    let dir = tempfile::tempdir().unwrap();

    let err = Cluster::run(&args(dir.path(), 1, &[]))
        .and_then(Cluster::shutdown)
        .unwrap_err();

    match err {
        LauncherErr::WorkerFailed { worker_id, msg } => {
            assert_eq!(worker_id, 0);
            assert!(!msg.is_empty());
        }
        other => panic!("expected a worker failure, got {other}"),
    }
}

#[test]
fn failing_replica_is_blamed_instead_of_the_chief() {
    let dir = tempfile::tempdir().unwrap();
    write_tfos_files(&dir.path().join("data"), 2, 8);

    // Worker 1 reads the second file.
    std::fs::write(dir.path().join("data/part-00001"), b"not a record file at all").unwrap();

    let err = Cluster::run(&args(dir.path(), 2, &[]))
        .and_then(Cluster::shutdown)
        .unwrap_err();

    match err {
        LauncherErr::WorkerFailed { worker_id, msg } => {
            assert_eq!(worker_id, 1, "{msg}");
            assert!(msg.contains("record"), "{msg}");
        }
        other => panic!("expected a worker failure, got {other}"),
    }
}

#[test]
fn unreachable_daemon_is_a_connection_failure() {
    let dir = tempfile::tempdir().unwrap();

    // Bind and drop to get a port nobody listens at.
    let addr = StdListener::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .to_string();

    let args = args(dir.path(), 1, &["--worker_addrs", addr.as_str()]);
    assert!(matches!(
        Cluster::run(&args),
        Err(LauncherErr::ConnectionFailed { .. })
    ));
}

#[test]
fn missing_tensorboard_does_not_stop_training() {
    let dir = tempfile::tempdir().unwrap();
    write_tfos_files(&dir.path().join("data"), 1, 8);

    let cluster = Cluster::run(&args(dir.path(), 1, &["--tensorboard"])).unwrap();
    let reports = cluster.shutdown().unwrap();

    assert_eq!(reports.len(), 1);
    assert!(reports[0].export_dir.is_some());
}
