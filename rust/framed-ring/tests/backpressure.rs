//! Writer blocking and wake-up behavior.

use std::sync::mpsc;
use std::time::Duration;

use framed_ring::{Delivery, Reader, RingConfig, RingError, Segment};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn fill(value: u8, len: usize) -> impl FnOnce(&mut [u8]) -> usize {
    move |buf| {
        buf.fill(value);
        len
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_blocks_until_reader_frees_space() {
    init_tracing();
    let segment = framed_ring::allocate(16).unwrap();
    let mut writer = framed_ring::writer(&segment).unwrap();

    // 12 of 16 bytes in use; an 8 byte payload needs 12.
    writer.wait(8).await.unwrap();
    writer.write(8, fill(1, 8)).unwrap();
    writer.flush();

    let (unblocked_tx, unblocked_rx) = mpsc::channel();
    let producer = std::thread::spawn(move || {
        writer.wait_blocking(8).unwrap();
        unblocked_tx.send(()).unwrap();
        writer.write(8, fill(2, 8)).unwrap();
    });

    assert!(
        unblocked_rx.recv_timeout(Duration::from_millis(250)).is_err(),
        "wait returned while the ring was full"
    );

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let mut release_rx = Some(release_rx);
    let reader = Reader::new(&segment).unwrap();
    let consumer = tokio::spawn(async move {
        let mut received = Vec::new();
        reader
            .run(move |payload| {
                received.push(payload[0]);
                match release_rx.take() {
                    Some(rx) => Delivery::pending(async move {
                        let _ = rx.await;
                    }),
                    None => Delivery::Done,
                }
            })
            .await
            .unwrap()
    });

    // The first record is still in flight, so its bytes are still in use.
    assert!(
        unblocked_rx.recv_timeout(Duration::from_millis(250)).is_err(),
        "wait returned before the reader released the record"
    );

    release_tx.send(()).unwrap();
    unblocked_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("wait returned once space was freed");

    producer.join().unwrap();
    let summary = consumer.await.unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(summary.padding, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_survives_timeouts_without_reporting_them() {
    init_tracing();
    let config = RingConfig::default()
        .with_capacity(16)
        .with_wait_timeout(Duration::from_millis(5));
    let segment = Segment::with_config(config).unwrap();
    let mut writer = framed_ring::writer(&segment).unwrap();
    let mut reader = Reader::new(&segment).unwrap();

    writer.wait(8).await.unwrap();
    writer.write(8, fill(1, 8)).unwrap();
    writer.flush();

    let waiter = tokio::spawn(async move {
        writer.wait(8).await?;
        Ok::<_, RingError>(writer)
    });

    // Many timeouts elapse before the reader catches up.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!waiter.is_finished());

    assert_eq!(reader.drain_available(|_| ()).unwrap().records, 1);
    let writer = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("writer woke up")
        .unwrap()
        .unwrap();
    // The 4 byte tail was padded out before the record fit at offset 0.
    assert_eq!(writer.position(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_fails_when_reader_goes_away() {
    init_tracing();
    let segment = framed_ring::allocate(16).unwrap();
    let mut writer = framed_ring::writer(&segment).unwrap();
    let reader = Reader::new(&segment).unwrap();

    writer.wait(8).await.unwrap();
    writer.write(8, fill(1, 8)).unwrap();

    let waiter = tokio::spawn(async move { writer.wait(8).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(reader);

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("writer noticed the closed reader")
        .unwrap();
    assert_eq!(result, Err(RingError::Closed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reader_stops_after_draining_a_closed_writer() {
    init_tracing();
    let segment = framed_ring::allocate(64).unwrap();
    let mut writer = framed_ring::writer(&segment).unwrap();

    for value in 0..5u8 {
        writer.wait(4).await.unwrap();
        writer.write(4, fill(value, 4)).unwrap();
    }
    writer.close();

    let mut received = Vec::new();
    let summary = framed_ring::reader(&segment, |payload: &[u8]| received.push(payload[0]))
        .await
        .unwrap();
    assert_eq!(received, vec![0, 1, 2, 3, 4]);
    assert_eq!(summary.records, 5);
    assert_eq!(segment.status().len, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_reader_wakes_on_first_publish() {
    init_tracing();
    let segment = framed_ring::allocate(32).unwrap();
    let mut writer = framed_ring::writer(&segment).unwrap();

    let consumer = {
        let segment = segment.clone();
        tokio::spawn(async move {
            let mut received = Vec::new();
            framed_ring::reader(&segment, |payload: &[u8]| received.push(payload.to_vec()))
                .await
                .unwrap();
            received
        })
    };

    // Let the reader reach its idle wait first.
    tokio::time::sleep(Duration::from_millis(50)).await;
    writer.wait(5).await.unwrap();
    writer
        .write(5, |buf| {
            buf.copy_from_slice(b"hello");
            5
        })
        .unwrap();
    writer.close();

    let received = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("reader woke up")
        .unwrap();
    assert_eq!(received, vec![b"hello".to_vec()]);
}

#[test]
fn cancelled_idle_reader_lets_runtime_shut_down() {
    init_tracing();
    let segment = framed_ring::allocate(32).unwrap();
    // Attached but silent: the reader parks with no timeout.
    let writer = framed_ring::writer(&segment).unwrap();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let outcome = runtime.block_on(async {
        tokio::time::timeout(
            Duration::from_millis(100),
            framed_ring::reader(&segment, |_: &[u8]| ()),
        )
        .await
    });
    assert!(outcome.is_err(), "reader returned while the writer was open");

    let (dropped_tx, dropped_rx) = mpsc::channel();
    std::thread::spawn(move || {
        drop(runtime);
        let _ = dropped_tx.send(());
    });
    dropped_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("runtime shut down while the writer stayed open");
    drop(writer);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_delivery_releases_earlier_records() {
    init_tracing();
    let segment = framed_ring::allocate(64).unwrap();
    let mut writer = framed_ring::writer(&segment).unwrap();

    writer.wait(3).await.unwrap();
    writer.write(3, fill(b'a', 3)).unwrap();
    writer.wait(5).await.unwrap();
    writer.write(5, fill(b'b', 5)).unwrap();
    writer.flush();

    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let mut release_rx = Some(release_rx);
    let consumer = {
        let segment = segment.clone();
        tokio::spawn(async move {
            framed_ring::reader(&segment, move |payload: &[u8]| {
                if payload[0] == b'a' {
                    return Delivery::Done;
                }
                match release_rx.take() {
                    Some(rx) => Delivery::pending(async move {
                        let _ = rx.await;
                    }),
                    None => Delivery::Done,
                }
            })
            .await
            .unwrap()
        })
    };

    // The first record is released while the second is still in flight.
    let first_frame = 4 + 3;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while segment.status().read_index != first_frame {
        assert!(tokio::time::Instant::now() < deadline, "first record never released");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(segment.status().read_index, first_frame);

    release_tx.send(()).unwrap();
    writer.close();
    let summary = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("reader finished")
        .unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(segment.status().read_index, 4 + 3 + 4 + 5);
}
