mod common;

use common::TestDb;
use factory_database::{connect, ConnectError, ConnectionOptions, ProfilerKind};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_connect_succeeds_once_backend_appears() {
    let db = TestDb::new();
    let dir = db.temp_dir.path().join("late");
    let options = ConnectionOptions::builder()
        .dsn(format!("sqlite://{}/app.db", dir.display()))
        .retries(50)
        .retry_delay(Duration::from_millis(20))
        .connect_timeout(Duration::ZERO)
        .build()
        .unwrap();

    let creator = {
        let dir = dir.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::create_dir_all(dir).unwrap();
        })
    };

    let pool = connect(&options).await.unwrap();
    creator.await.unwrap();

    pool.health_check().await.unwrap();
    assert!(dir.join("app.db").exists());
}

#[tokio::test]
async fn test_connect_gives_up_after_retries() {
    let db = TestDb::new();
    let options = ConnectionOptions::builder()
        .dsn(format!("sqlite://{}/never/app.db", db.temp_dir.path().display()))
        .retries(3)
        .retry_delay(Duration::from_millis(10))
        .connect_timeout(Duration::ZERO)
        .build()
        .unwrap();

    let err = connect(&options).await.unwrap_err();
    assert_eq!(err.attempts(), 4);
    assert!(matches!(err, ConnectError::Exhausted { .. }));
}

#[tokio::test]
async fn test_connect_deadline_beats_remaining_retries() {
    let db = TestDb::new();
    let options = ConnectionOptions::builder()
        .dsn(format!("sqlite://{}/never/app.db", db.temp_dir.path().display()))
        .retries(10_000)
        .retry_delay(Duration::from_millis(20))
        .connect_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = connect(&options).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        ConnectError::DeadlineExceeded {
            attempts,
            timeout,
            last_error,
        } => {
            assert!(attempts >= 1);
            assert_eq!(timeout, Duration::from_millis(200));
            assert!(last_error.is_some());
        }
        other => panic!("expected deadline, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_options_make_no_attempt() {
    assert!(ConnectionOptions::new("mysql://elsewhere").is_err());

    let err = connect(&ConnectionOptions::new("sqlite://app.db?mode=bogus").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::InvalidOptions(_)));
    assert_eq!(err.attempts(), 0);
}

#[tokio::test]
async fn test_file_pool_uses_configured_profiler() {
    let db = TestDb::new();
    let options = db.options().profiler(ProfilerKind::Memory).build().unwrap();
    let pool = connect(&options).await.unwrap();

    assert_eq!(pool.profiler().map(|p| p.name()), Some("MemoryProfiler"));
    assert_eq!(pool.options().dsn(), db.dsn());
    assert_eq!(pool.stats().max_connections, 4);
}
