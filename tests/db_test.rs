use promptq::db::{CreateResult, Db, WorkStore};
use promptq::error::Error;
use promptq::model::{NewWorkItem, Outcome, OutcomeKind, WorkId};

/// Helper: file-backed database in a temp dir, connected and migrated.
async fn test_db(dir: &tempfile::TempDir) -> Db {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("promptq.db").display());
    let db = Db::connect(&url).await.unwrap();
    db.migrate().await.unwrap();
    db
}

fn unit(variant: &str, trial: u32) -> NewWorkItem {
    NewWorkItem::new("final", "teamA", variant, trial)
        .prompt(format!("draw \"{variant}\""))
        .output_dir(format!("competition/teamA/raw/{variant}"))
}

#[tokio::test]
async fn connects_and_migrates() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir).await;
    assert!(db.health_check().await.is_ok());
    // Running migrations twice is a no-op.
    db.migrate().await.unwrap();
}

#[tokio::test]
async fn backlog_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = test_db(&dir).await;
        db.create(unit("A", 1)).await.unwrap();
        db.create(unit("A", 2)).await.unwrap();
        db.mark_completed(
            &WorkId::derive("final", "teamA", "A", 1),
            &Outcome::new(OutcomeKind::Success, 1),
        )
        .await
        .unwrap();
    }

    let db = test_db(&dir).await;
    assert_eq!(db.count(None).await.unwrap(), 2);
    assert_eq!(db.count(Some(true)).await.unwrap(), 1);

    let pending = db.list_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, WorkId::derive("final", "teamA", "A", 2));
    assert_eq!(pending[0].trial, 2);
    assert!(!pending[0].completed);
}

#[tokio::test]
async fn open_existing_refuses_a_missing_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("competition").join("promptq.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());

    let err = match Db::open_existing(&url).await {
        Ok(_) => panic!("opened a store that does not exist"),
        Err(e) => e,
    };
    assert!(matches!(err, Error::Config(_)), "{err}");
    assert!(err.to_string().contains(&path.display().to_string()), "{err}");
    assert!(!path.exists());
}

#[tokio::test]
async fn open_existing_reads_a_planned_backlog() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = test_db(&dir).await;
        db.create(unit("A", 1)).await.unwrap();
    }

    let url = format!("sqlite://{}", dir.path().join("promptq.db").display());
    let db = Db::open_existing(&url).await.unwrap();
    db.migrate().await.unwrap();
    assert_eq!(db.count(Some(false)).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_planners_create_each_identity_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let mut created = 0;
            for trial in 1..=5 {
                if db.create(unit("B", trial)).await.unwrap() == CreateResult::Created {
                    created += 1;
                }
            }
            created
        }));
    }

    let mut created = 0;
    for handle in handles {
        created += handle.await.unwrap();
    }
    assert_eq!(created, 5);
    assert_eq!(db.count(None).await.unwrap(), 5);
}

#[tokio::test]
async fn list_pending_respects_limit() {
    let db = Db::in_memory().await.unwrap();
    for trial in 1..=6 {
        db.create(unit("C", trial)).await.unwrap();
    }

    assert_eq!(db.list_pending(4).await.unwrap().len(), 4);
    assert_eq!(db.list_pending(0).await.unwrap().len(), 0);
    assert_eq!(db.list_pending(100).await.unwrap().len(), 6);
}
