use std::num::NonZeroUsize;

use comms::{
    Deserialize, Serialize,
    msg::{Command, Msg, Payload},
    specs::worker::{DataFormatSpec, TrainingSpec, WorkerSpec},
};
use tokio::io;

struct MyStr<'a>(&'a str);

impl<'a> Serialize<'a> for MyStr<'_> {
    fn serialize(&'a self, _buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        Some(self.0.as_bytes())
    }
}

impl<'a> Deserialize<'a> for MyStr<'a> {
    fn deserialize(buf: &'a mut [u8]) -> std::io::Result<Self> {
        str::from_utf8(buf)
            .map(Self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn worker_spec() -> WorkerSpec {
    WorkerSpec {
        worker_id: 1,
        cluster_size: NonZeroUsize::new(2).unwrap(),
        training: TrainingSpec {
            batch_size: NonZeroUsize::new(64).unwrap(),
            buffer_size: NonZeroUsize::new(10000).unwrap(),
            epochs: NonZeroUsize::new(3).unwrap(),
            steps_per_epoch: NonZeroUsize::new(468).unwrap(),
            data_format: DataFormatSpec::Tfos,
            images_labels: "data/part-*".into(),
            model_dir: "mnist_model".into(),
            export_dir: "mnist_export".into(),
            learning_rate: 0.001,
            seed: Some(7),
        },
    }
}

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let msg = MyStr("Hello, world!");

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let s: MyStr = rx.recv().await.unwrap();

    assert_eq!(msg.0, s.0);
}

#[tokio::test]
async fn worker_spec_and_weights_travel_in_order() {
    const SIZE: usize = 4096;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);
    let (rx_two, tx_two) = io::split(two);
    let (mut rx, _) = comms::channel(rx_two, tx_two);

    let sender = tokio::spawn(async move {
        let spec = worker_spec();
        tx.send(&Msg::Control(Command::CreateWorker(spec))).await?;

        let mut weights = [1.0f32, -2.0, 3.5];
        tx.send(&Msg::Data(Payload::Weights(&mut weights))).await?;
        tx.send(&Msg::Control(Command::Disconnect)).await
    });

    match rx.recv::<Msg>().await.unwrap() {
        Msg::Control(cmd) => assert_eq!(cmd, Command::CreateWorker(worker_spec())),
        other => panic!("unexpected msg: {other:?}"),
    }

    match rx.recv::<Msg>().await.unwrap() {
        Msg::Data(Payload::Weights(w)) => assert_eq!(w, [1.0, -2.0, 3.5]),
        other => panic!("unexpected msg: {other:?}"),
    }

    let mut buf: Vec<u32> = Vec::new();
    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert!(matches!(msg, Msg::Control(Command::Disconnect)));

    sender.await.unwrap().unwrap();
}

#[tokio::test]
async fn eof_is_reported_as_an_error() {
    let (one, two) = io::duplex(64);
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let err = rx.recv::<Msg>().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}
