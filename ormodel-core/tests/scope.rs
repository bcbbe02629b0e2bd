mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Team, TestDb};
use tokio::sync::Barrier;
use ormodel_core::ambient;
use ormodel_core::prelude::*;

#[tokio::test]
async fn verbs_outside_scope_fail_loudly() {
    let _t = TestDb::new().await;
    let err = Team::objects().count().await.unwrap_err();
    assert!(matches!(err, OrmError::NoActiveSession));
}

#[tokio::test]
async fn nested_scope_reuses_outer_session() {
    let t = TestDb::new().await;
    let db = t.db.clone();
    t.db.scope(|outer| async move {
        Team::objects().create(fields! { name: "Outer" }).await?;

        let inner = db
            .unit_of_work(|inner| async move { Ok::<_, OrmError>(inner) })
            .await?;
        assert_eq!(inner, outer);

        // the inner scope neither closed nor reset the outer session
        assert!(outer.is_active());
        assert_eq!(ambient::current()?, outer);
        assert_eq!(Team::objects().count().await?, 1);
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn holder_restored_after_scope() {
    let t = TestDb::new().await;
    ambient::enter(async {
        assert!(ambient::get().is_none());
        let seen = t
            .db
            .scope(|session| async move { Ok::<_, OrmError>(session) })
            .await
            .unwrap();
        assert!(seen.is_closed());
        assert!(ambient::get().is_none());
    })
    .await;
}

#[tokio::test]
async fn set_and_reset_nest() {
    let t = TestDb::new().await;
    ambient::enter(async {
        let first = t.db.session();
        let second = t.db.session();
        assert_ne!(first, second);

        let outer = ambient::set(first.clone()).unwrap();
        let inner = ambient::set(second.clone()).unwrap();
        assert_eq!(ambient::get(), Some(second));
        ambient::reset(inner);
        assert_eq!(ambient::get(), Some(first.clone()));
        ambient::reset(outer);
        assert!(ambient::get().is_none());

        first.close().await;
    })
    .await;
}

#[tokio::test]
async fn set_without_slot_is_typed_failure() {
    let t = TestDb::new().await;
    let err = ambient::set(t.db.session()).unwrap_err();
    assert!(matches!(err, OrmError::NoTaskContext));
}

#[tokio::test]
async fn scope_does_not_commit_but_unit_of_work_does() {
    let t = TestDb::new().await;
    t.db.scope(|_| async {
        Team::objects().create(fields! { name: "Discarded" }).await
    })
    .await
    .unwrap();
    t.db.unit_of_work(|_| async {
        Team::objects().create(fields! { name: "Kept" }).await
    })
    .await
    .unwrap();

    let names = t
        .db
        .scope(|_| async { Team::objects().all().await })
        .await
        .unwrap()
        .into_iter()
        .map(|team| team.name)
        .collect::<Vec<_>>();
    assert_eq!(names, ["Kept"]);
}

#[tokio::test]
async fn error_in_scope_rolls_back() {
    let t = TestDb::new().await;
    let result: Result<(), OrmError> = t
        .db
        .unit_of_work(|_| async {
            Team::objects().create(fields! { name: "Doomed" }).await?;
            Team::objects().get(fields! { name: "Missing" }).await?;
            Ok(())
        })
        .await;
    assert!(result.unwrap_err().is_does_not_exist());

    let count = t
        .db
        .scope(|_| async { Team::objects().count().await })
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn unique_violation_requires_rollback() {
    let t = TestDb::new().await;
    t.db.unit_of_work(|_| async {
        Team::objects().create(fields! { name: "Preventers" }).await
    })
    .await
    .unwrap();

    t.db.scope(|session| async move {
        let err = Team::objects()
            .create(fields! { name: "Preventers" })
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert!(err.is_integrity_error());
        assert!(!session.is_active());

        let err = Team::objects().count().await.unwrap_err();
        assert!(matches!(err, OrmError::PendingRollback));

        session.rollback().await?;
        assert!(session.is_active());
        assert_eq!(Team::objects().count().await?, 1);
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn failed_unit_of_work_keeps_count() {
    let t = TestDb::new().await;
    let result = t
        .db
        .unit_of_work(|_| async {
            Team::objects().create(fields! { name: "Preventers" }).await?;
            Team::objects().create(fields! { name: "Preventers" }).await
        })
        .await;
    assert!(result.unwrap_err().is_unique_violation());

    t.db.unit_of_work(|_| async {
        Team::objects().create(fields! { name: "Preventers" }).await
    })
    .await
    .unwrap();
    let result = t
        .db
        .unit_of_work(|_| async {
            Team::objects().create(fields! { name: "Preventers" }).await
        })
        .await;
    assert!(result.unwrap_err().is_integrity_error());

    let count = t
        .db
        .scope(|_| async { Team::objects().count().await })
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn concurrent_tasks_see_their_own_session() {
    let t = TestDb::new().await;
    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = t.db.clone();
        handles.push(tokio::spawn(async move {
            db.scope(|session| async move {
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                    assert_eq!(ambient::current()?, session);
                }
                Team::objects().count().await?;
                Ok::<_, OrmError>(session.id())
            })
            .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn cancelled_scope_restores_holder() {
    let t = TestDb::new().await;
    ambient::enter(async {
        let slow = t.db.scope(|_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, OrmError>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(50), slow).await.is_err());
        assert!(ambient::get().is_none());
    })
    .await;
}

#[tokio::test]
async fn failed_open_leaves_holder_untouched() {
    let t = TestDb::new().await;
    ambient::enter(async {
        // an inactive ambient session is not reused, so the scope must open one
        let outer = t.db.session();
        outer.close().await;
        let token = ambient::set(outer.clone()).unwrap();

        t.db.shutdown().await;
        let err = t
            .db
            .scope(|_| async { Ok::<_, OrmError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Database(_)));
        assert_eq!(ambient::get(), Some(outer));

        ambient::reset(token);
        let err = t
            .db
            .unit_of_work(|_| async { Ok::<_, OrmError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Database(_)));
        assert!(ambient::get().is_none());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_read_then_write_units_both_commit() {
    let t = TestDb::new().await;
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for name in ["Preventers", "Z-Force"] {
        let db = t.db.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            db.unit_of_work(|_| async move {
                Team::objects().count().await?;
                // both sessions have read before either writes
                barrier.wait().await;
                Team::objects().create(fields! { name: name }).await
            })
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let count = t
        .db
        .scope(|_| async { Team::objects().count().await })
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_get_or_create_waits_for_writer() {
    let t = TestDb::new().await;
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for name in ["Preventers", "Z-Force"] {
        let db = t.db.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            db.unit_of_work(|_| async move {
                Team::objects().exists().await?;
                barrier.wait().await;
                let (team, created) = Team::objects()
                    .get_or_create(fields! { name: name }, fields! { headquarters: "HQ" })
                    .await?;
                assert!(created);
                // reads after the write see it inside the same transaction
                assert_eq!(Team::objects().get(fields! { name: name }).await?, team);
                Ok::<_, OrmError>(())
            })
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let teams = t
        .db
        .scope(|_| async { Team::objects().order_by("name").all().await })
        .await
        .unwrap();
    let names: Vec<_> = teams.iter().map(|team| team.name.as_str()).collect();
    assert_eq!(names, ["Preventers", "Z-Force"]);
}
