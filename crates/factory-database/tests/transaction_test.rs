mod common;

use common::{balance, wait_until_idle, TestDb};
use factory_database::{args, QueryContext, StatementError, TransactionError};
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_commit_is_visible_to_other_connections() {
    let db = TestDb::new();
    let pool = db.accounts().await;

    pool.handle()
        .transaction(|tx| {
            Box::pin(async move {
                tx.exec("UPDATE accounts SET balance = balance - ? WHERE id = 1", &args![40])
                    .await?;
                tx.exec("UPDATE accounts SET balance = balance + ? WHERE id = 2", &args![40])
                    .await?;
                Ok::<_, StatementError>(())
            })
        })
        .await
        .unwrap();

    let other = db.connect().await;
    assert_eq!(balance(&other, 1).await, 60);
    assert_eq!(balance(&other, 2).await, 40);
}

#[tokio::test]
async fn test_work_error_rolls_back_unmodified() {
    let db = TestDb::new();
    let pool = db.accounts().await;

    let err = pool
        .handle()
        .transaction(|tx| {
            Box::pin(async move {
                tx.exec("UPDATE accounts SET balance = 0 WHERE id = 1", &[]).await?;
                tx.exec("INSERT INTO accounts (id, balance) VALUES (2, 5)", &[]).await?;
                Ok::<_, StatementError>(())
            })
        })
        .await
        .unwrap_err();

    match err {
        TransactionError::Work(StatementError::Database(sqlx::Error::Database(db_err))) => {
            assert!(db_err.is_unique_violation());
        }
        other => panic!("expected the work's constraint error, got {other:?}"),
    }
    assert_eq!(balance(&pool, 1).await, 100);
    wait_until_idle(&pool).await;
}

#[tokio::test]
async fn test_racing_writers_one_wins_one_conflicts() {
    let db = TestDb::new();
    let pool = db.accounts().await;

    let (a_read_tx, a_read_rx) = oneshot::channel::<()>();
    let (b_done_tx, b_done_rx) = oneshot::channel::<()>();

    let slow = {
        let handle = pool.handle();
        tokio::spawn(async move {
            handle
                .transaction(move |tx| {
                    Box::pin(async move {
                        tx.query("SELECT balance FROM accounts WHERE id = 1", &[]).await?;
                        let _ = a_read_tx.send(());
                        let _ = b_done_rx.await;
                        tx.exec("UPDATE accounts SET balance = balance - 10 WHERE id = 1", &[])
                            .await?;
                        Ok::<_, StatementError>(())
                    })
                })
                .await
        })
    };

    let fast = {
        let handle = pool.handle();
        tokio::spawn(async move {
            a_read_rx.await.unwrap();
            let result = handle
                .transaction(|tx| {
                    Box::pin(async move {
                        tx.exec("UPDATE accounts SET balance = balance - 20 WHERE id = 1", &[])
                            .await?;
                        Ok::<_, StatementError>(())
                    })
                })
                .await;
            let _ = b_done_tx.send(());
            result
        })
    };

    let fast = fast.await.unwrap();
    let slow = slow.await.unwrap();

    assert!(fast.is_ok(), "{fast:?}");
    let err = slow.unwrap_err();
    assert!(err.is_conflict(), "expected a conflict, got {err:?}");
    let work = err.into_work_error().expect("conflict surfaces as the work error");
    assert!(work.is_conflict());

    assert_eq!(balance(&pool, 1).await, 80);
    wait_until_idle(&pool).await;
}

#[tokio::test]
async fn test_cancel_mid_transaction_rolls_back() {
    let db = TestDb::new();
    let pool = db.accounts().await;
    let (ctx, cancel) = QueryContext::background().with_cancel();

    let err = pool
        .with_context(ctx)
        .transaction(move |tx| {
            Box::pin(async move {
                tx.exec("UPDATE accounts SET balance = 0 WHERE id = 1", &[]).await?;
                cancel.cancel();
                tx.exec("UPDATE accounts SET balance = 0 WHERE id = 2", &[]).await?;
                Ok::<_, StatementError>(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransactionError::Work(StatementError::Canceled)));
    assert_eq!(balance(&pool, 1).await, 100);
    wait_until_idle(&pool).await;
}

#[tokio::test]
async fn test_deadline_during_work_prevents_commit() {
    let db = TestDb::new();
    let pool = db.accounts().await;
    let (ctx, _cancel) = QueryContext::background().with_timeout(Duration::from_millis(50));

    let err = pool
        .with_context(ctx)
        .transaction(|tx| {
            Box::pin(async move {
                tx.exec("UPDATE accounts SET balance = 1 WHERE id = 1", &[]).await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, StatementError>(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransactionError::Commit(StatementError::DeadlineExceeded)));
    assert_eq!(balance(&pool, 1).await, 100);
}

#[tokio::test]
async fn test_failed_rollback_keeps_work_and_rollback_errors() {
    let db = TestDb::new();
    let pool = db.accounts().await;

    let err = pool
        .handle()
        .transaction(|tx| {
            Box::pin(async move {
                tx.exec("UPDATE accounts SET balance = 0 WHERE id = 1", &[]).await?;
                // ends the transaction behind the runner's back
                tx.exec("ROLLBACK", &[]).await?;
                Err::<(), _>(StatementError::Database(sqlx::Error::RowNotFound))
            })
        })
        .await
        .unwrap_err();

    let text = err.to_string();
    match err {
        TransactionError::Rollback { work, rollback } => {
            assert!(matches!(work, StatementError::Database(sqlx::Error::RowNotFound)));
            assert!(matches!(rollback, StatementError::Database(_)));
            assert!(text.contains(&work.to_string()), "{text}");
            assert!(text.contains(&rollback.to_string()), "{text}");
        }
        other => panic!("expected a rollback failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_rollback_after_cancel_keeps_both() {
    let db = TestDb::new();
    let pool = db.accounts().await;
    let (ctx, cancel) = QueryContext::background().with_cancel();

    let err = pool
        .with_context(ctx)
        .transaction(move |tx| {
            Box::pin(async move {
                tx.exec("ROLLBACK", &[]).await?;
                cancel.cancel();
                Ok::<_, StatementError>(())
            })
        })
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            TransactionError::Rollback {
                work: StatementError::Canceled,
                rollback: StatementError::Database(_),
            }
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_commit_failure_is_reported_and_rolled_back() {
    let db = TestDb::new();
    let pool = db.accounts().await;
    let handle = pool.handle();
    handle
        .exec(
            "CREATE TABLE transfers (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL
                    REFERENCES accounts (id) DEFERRABLE INITIALLY DEFERRED
            )",
            &[],
        )
        .await
        .unwrap();

    // the dangling reference is only checked at commit
    let err = handle
        .transaction(|tx| {
            Box::pin(async move {
                tx.exec("INSERT INTO transfers (id, account_id) VALUES (1, 99)", &[])
                    .await?;
                Ok::<_, StatementError>(())
            })
        })
        .await
        .unwrap_err();

    assert!(
        matches!(err, TransactionError::Commit(StatementError::Database(_))),
        "{err:?}"
    );
    wait_until_idle(&pool).await;
    let (count,): (i64,) = handle
        .get("SELECT COUNT(*) FROM transfers", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count, 0);
}
