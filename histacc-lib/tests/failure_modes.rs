//! Timeouts, cancellation and broken links

mod common;

use common::*;
use histacc_lib::{BinAddress, BinCount, CancellationToken, Driver, HistError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_silent_peripheral_times_out() {
    // Keep the device end open but never answer
    let (link, _device) = tokio::io::duplex(64);
    let mut driver = Driver::new(link, fast_config());

    match driver.stop_histogram().await {
        Err(HistError::Timeout {
            operation,
            received,
            expected,
        }) => {
            assert_eq!(operation, "STOP_HIST");
            assert_eq!(received, 0);
            assert_eq!(expected, 1);
        }
        other => panic!("Expected Timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_short_upload_times_out_with_progress() {
    init_tracing();
    let peripheral = Peripheral {
        truncate_upload: Some(5),
        ..Peripheral::default()
    };
    let (link, peripheral) = peripheral.spawn();
    let mut driver = Driver::new(link, fast_config());

    driver.configure(BinCount(4), BinAddress(0)).await.unwrap();
    match driver.start_upload().await {
        Err(HistError::Timeout {
            operation,
            received,
            expected,
        }) => {
            assert_eq!(operation, "START_UPLOAD");
            assert_eq!(received, 5);
            assert_eq!(expected, 9);
        }
        other => panic!("Expected Timeout, got {:?}", other),
    }
    assert_eq!(driver.timing().upload_count(), 0);

    finish(driver, peripheral).await;
}

#[tokio::test]
async fn test_cancel_while_waiting() {
    let (link, _device) = tokio::io::duplex(64);
    let token = CancellationToken::new();
    let config = fast_config().with_response_timeout(Duration::from_secs(30));
    let mut driver = Driver::new(link, config).with_cancellation(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = driver.start_histogram().await.unwrap_err();
    assert!(matches!(err, HistError::Cancelled { operation: "START_HIST" }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_cancel_during_accumulation() {
    let (link, peripheral) = Peripheral::default().spawn();
    let mut driver = Driver::new(link, fast_config());
    let token = driver.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = driver.acquire(Duration::from_secs(30)).await.unwrap_err();
    assert!(matches!(err, HistError::Cancelled { operation: "accumulation" }));

    let log = finish(driver, peripheral).await;
    assert_eq!(log.received, vec![2, END]);
    assert!(log.running);
}

#[tokio::test]
async fn test_closed_link_is_io_error() {
    let (link, device) = tokio::io::duplex(64);
    drop(device);
    let mut driver = Driver::new(link, fast_config());

    let err = driver.clear_results().await.unwrap_err();
    assert!(matches!(err, HistError::Io(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_resync_discards_stale_bytes() {
    let (link, mut device) = tokio::io::duplex(64);
    let mut driver = Driver::new(link, fast_config());

    device.write_all(&[0x12, 0x34, END]).await.unwrap();
    assert_eq!(driver.resync().await.unwrap(), 3);
    assert_eq!(driver.resync().await.unwrap(), 0);

    // After draining, a fresh acknowledgement completes the next command
    device.write_all(&[END]).await.unwrap();
    driver.stop_histogram().await.unwrap();
}

#[tokio::test]
async fn test_close_shuts_down_link() {
    let (link, peripheral) = Peripheral::default().spawn();
    let mut driver = Driver::new(link, fast_config());

    driver.start_histogram().await.unwrap();
    driver.close().await.unwrap();

    let log = peripheral.await.unwrap();
    assert_eq!(log.received, vec![2, END]);
    assert!(log.running);
}

#[tokio::test]
async fn test_unknown_byte_during_acknowledgement_is_reported() {
    let (link, mut device) = tokio::io::duplex(64);
    let mut driver = Driver::new(link, fast_config());

    device.write_all(&[0x42, END]).await.unwrap();
    let err = driver.stop_histogram().await.unwrap_err();
    assert!(matches!(err, HistError::UnknownCommand(0x42)), "got {:?}", err);
    assert!(err.is_recoverable());

    // The END behind the unknown byte is not taken as the acknowledgement
    assert_eq!(driver.resync().await.unwrap(), 1);
    device.write_all(&[END]).await.unwrap();
    driver.stop_histogram().await.unwrap();
}

#[tokio::test]
async fn test_stale_bytes_do_not_shift_upload() {
    init_tracing();
    let peripheral = Peripheral {
        stale: vec![0x42, END],
        ..Peripheral::default()
    }
    .with_memory(vec![1, 2]);
    let (link, peripheral) = peripheral.spawn();
    let mut driver = Driver::new(link, fast_config());

    let err = driver.configure(BinCount(2), BinAddress(0)).await.unwrap_err();
    assert!(matches!(err, HistError::UnknownCommand(0x42)), "got {:?}", err);
    assert_eq!(driver.bin_count(), BinCount(512));

    // Stale END plus the SET_NUMBINS acknowledgement
    assert_eq!(driver.resync().await.unwrap(), 2);

    driver.configure(BinCount(2), BinAddress(0)).await.unwrap();
    let histogram = driver.upload_histogram().await.unwrap();
    assert_eq!(histogram.samples, vec![1, 2]);

    finish(driver, peripheral).await;
}

#[tokio::test]
async fn test_cancel_during_partial_upload() {
    let peripheral = Peripheral {
        truncate_upload: Some(5),
        ..Peripheral::default()
    };
    let (link, peripheral) = peripheral.spawn();
    let config = fast_config().with_response_timeout(Duration::from_secs(30));
    let mut driver = Driver::new(link, config);
    driver.configure(BinCount(4), BinAddress(0)).await.unwrap();

    let token = driver.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = driver.start_upload().await.unwrap_err();
    assert!(matches!(err, HistError::Cancelled { operation: "START_UPLOAD" }), "got {:?}", err);
    assert!(err.is_recoverable());
    assert_eq!(driver.timing().upload_count(), 0);

    let log = finish(driver, peripheral).await;
    assert_eq!(log.received.last(), Some(&END));
    assert_eq!(log.bin_count, 4);
}
