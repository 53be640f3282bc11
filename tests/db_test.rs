// Tests for the account and session store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use authstore::db::{NewUser, UserUpdate};
use authstore::session::{classify, SessionState};
use authstore::{Config, ConstraintKind, Database, StoreError};
use chrono::Duration;
use tempfile::TempDir;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use uuid::Uuid;

fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());
    let db = Database::initialize(&Config::with_database_url(url)).unwrap();
    db.migrate().unwrap();
    (db, temp_dir)
}

fn new_user(user_name: &str) -> NewUser {
    NewUser {
        user_image: format!("avatars/{user_name}.png"),
        user_name: user_name.to_string(),
        first_name: "Grace".to_string(),
        last_name: "Hopper".to_string(),
        email_address: format!("{user_name}@example.com"),
        password: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
    }
}

#[test]
fn test_database_initialization() {
    let (db, temp) = create_test_db();
    assert!(temp.path().join("test.db").exists());
    assert!(db.pending_migrations().unwrap().is_empty());
    assert!(db.verify_schema().unwrap().is_empty());
    assert_eq!(db.migrate().unwrap(), 0, "migrations should be idempotent");
}

#[test]
fn test_initialize_without_url_makes_no_connection() {
    let temp_dir = TempDir::new().unwrap();

    let err = Database::initialize(&Config::default()).err().unwrap();
    assert!(matches!(err, StoreError::Config(_)));

    let db_path = temp_dir.path().join("never.db");
    let malformed = Config::with_database_url(format!("mysql://{}", db_path.display()));
    let err = Database::initialize(&malformed).err().unwrap();
    assert!(matches!(err, StoreError::Config(_)));
    assert!(!db_path.exists(), "no database file should be created");
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_create_user() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    let a = uow.users().create(&new_user("grace")).unwrap();
    let b = uow.users().create(&new_user("alan")).unwrap();
    uow.commit().unwrap();

    assert!(!a.user_id.is_nil());
    assert_ne!(a.user_id, b.user_id);

    let uow = db.unit_of_work().unwrap();
    let stored = uow.users().get(a.user_id).unwrap().unwrap();
    assert_eq!(stored, a);
    assert_eq!(
        uow.users().find_by_user_name("alan").unwrap().map(|u| u.user_id),
        Some(b.user_id)
    );
    assert_eq!(uow.users().list().unwrap().len(), 2);
}

#[test]
fn test_duplicate_user_name_is_constraint_violation() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    uow.users().create(&new_user("grace")).unwrap();
    let err = uow.users().create(&new_user("grace")).unwrap_err();

    assert_eq!(err.constraint_kind(), Some(ConstraintKind::Unique));
    assert!(!err.is_transient());
}

#[test]
fn test_users_may_share_a_password_hash() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    let a = uow.users().create(&new_user("grace")).unwrap();
    let b = uow.users().create(&new_user("alan")).unwrap();
    assert_eq!(a.password, b.password);
}

#[test]
fn test_update_profile_bumps_last_updated() {
    let (db, _temp) = create_test_db();
    let user = db
        .with_unit_of_work(|uow| uow.users().create(&new_user("grace")))
        .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));

    let update = UserUpdate {
        email_address: Some("hopper@navy.mil".to_string()),
        ..UserUpdate::default()
    };
    let updated = db
        .with_unit_of_work(|uow| uow.users().update_profile(user.user_id, &update))
        .unwrap()
        .unwrap();

    assert_eq!(updated.email_address, "hopper@navy.mil");
    assert_eq!(updated.first_name, user.first_name);
    assert!(updated.last_updated > user.last_updated);

    let missing = db
        .with_unit_of_work(|uow| uow.users().update_profile(Uuid::new_v4(), &update))
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn test_default_session_lasts_seven_days() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    let user = uow.users().create(&new_user("grace")).unwrap();
    let session = uow.sessions().create(Some(user.user_id)).unwrap();
    assert_eq!(session.expiration_time - session.start_time, Duration::days(7));

    let stored = uow.sessions().get(session.session_id).unwrap().unwrap();
    assert_eq!(stored, session);
    assert_eq!(stored.expiration_time - stored.start_time, Duration::days(7));
}

#[test]
fn test_session_requires_existing_user() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    let err = uow.sessions().create(Some(Uuid::new_v4())).unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::ForeignKey));
}

#[test]
fn test_anonymous_session() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    let session = uow.sessions().create(None).unwrap();
    assert!(session.is_anonymous());
    assert_eq!(
        uow.sessions().get(session.session_id).unwrap().unwrap().user_id,
        None
    );
}

#[test]
fn test_expiration_must_follow_start() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    let start = authstore::db::repositories::now_utc();
    let err = uow
        .sessions()
        .create_with_expiration(None, start, start)
        .unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::Check));
}

#[test]
fn test_deleting_user_cascades_to_sessions() {
    let (db, _temp) = create_test_db();

    let (user, session) = db
        .with_unit_of_work(|uow| {
            let user = uow.users().create(&new_user("grace"))?;
            let session = uow.sessions().create(Some(user.user_id))?;
            Ok((user, session))
        })
        .unwrap();

    assert!(db.with_unit_of_work(|uow| uow.users().delete(user.user_id)).unwrap());

    let uow = db.unit_of_work().unwrap();
    assert!(uow.sessions().get(session.session_id).unwrap().is_none());
    assert!(uow.sessions().list_for_user(user.user_id).unwrap().is_empty());
}

#[test]
fn test_expired_session_row_still_exists() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    let now = authstore::db::repositories::now_utc();
    let user = uow.users().create(&new_user("grace")).unwrap();
    let session = uow
        .sessions()
        .create_at(Some(user.user_id), now - Duration::days(8))
        .unwrap();

    let stored = uow.sessions().get(session.session_id).unwrap();
    assert!(stored.is_some(), "expiry must not delete the row");
    assert_eq!(classify(stored.as_ref(), now), SessionState::Expired);
}

#[test]
fn test_delete_expired_keeps_active_sessions() {
    let (db, _temp) = create_test_db();
    let uow = db.unit_of_work().unwrap();

    let now = authstore::db::repositories::now_utc();
    let user = uow.users().create(&new_user("grace")).unwrap();
    let stale = uow
        .sessions()
        .create_at(Some(user.user_id), now - Duration::days(10))
        .unwrap();
    let fresh = uow.sessions().create_at(Some(user.user_id), now).unwrap();

    assert_eq!(uow.sessions().delete_expired(now).unwrap(), 1);
    assert!(uow.sessions().get(stale.session_id).unwrap().is_none());
    assert!(uow.sessions().get(fresh.session_id).unwrap().is_some());
}

#[test]
fn test_dropped_unit_of_work_rolls_back_and_releases() {
    let (db, _temp) = create_test_db();
    let idle_before = db.idle_connections();

    {
        let uow = db.unit_of_work().unwrap();
        assert_eq!(db.idle_connections(), idle_before - 1);
        uow.users().create(&new_user("grace")).unwrap();
        // dropped without commit
    }

    assert_eq!(db.idle_connections(), idle_before);
    let users = db.with_unit_of_work(|uow| uow.users().list()).unwrap();
    assert!(users.is_empty());
}

#[test]
fn test_failed_unit_of_work_is_all_or_nothing() {
    let (db, _temp) = create_test_db();

    let result = db.with_unit_of_work(|uow| {
        uow.users().create(&new_user("grace"))?;
        uow.users().create(&new_user("grace"))
    });
    assert_eq!(
        result.unwrap_err().constraint_kind(),
        Some(ConstraintKind::Unique)
    );

    let users = db.with_unit_of_work(|uow| uow.users().list()).unwrap();
    assert!(users.is_empty(), "first insert should be rolled back");
}

#[test]
fn test_explicit_close_discards_work() {
    let (db, _temp) = create_test_db();

    let uow = db.unit_of_work().unwrap();
    uow.users().create(&new_user("grace")).unwrap();
    db.close(uow);

    let users = db.with_unit_of_work(|uow| uow.users().list()).unwrap();
    assert!(users.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_units_of_work() {
    let (db, _temp) = create_test_db();

    let mut handles = Vec::new();
    for i in 0..8 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            db.run_blocking(move |uow| uow.users().create(&new_user(&format!("user{i}"))))
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().user_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    let count = db
        .run_blocking(|uow| Ok(uow.users().list()?.len()))
        .await
        .unwrap();
    assert_eq!(count, 8);
}

#[test]
fn test_pool_exhaustion_is_transient() {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());
    let config = Config {
        pool_max_size: 1,
        connection_timeout_ms: 100,
        ..Config::with_database_url(url)
    };
    let db = Database::initialize(&config).unwrap();

    let _held = db.unit_of_work().unwrap();
    let err = db.read_unit_of_work().err().unwrap();
    assert!(matches!(err, StoreError::Connection(_)));
    assert!(err.is_transient());
}

#[test]
fn test_in_memory_database_round_trip() {
    let db = Database::initialize(&Config::with_database_url("sqlite::memory:")).unwrap();
    assert_eq!(db.migrate().unwrap(), 2);
    assert!(db.verify_schema().unwrap().is_empty());

    let user = db
        .with_unit_of_work(|uow| uow.users().create(&new_user("grace")))
        .unwrap();
    let stored = db
        .with_read_unit_of_work(|uow| uow.users().get(user.user_id))
        .unwrap();
    assert_eq!(stored, Some(user));
}

#[derive(Clone, Default)]
struct SqlEvents(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for SqlEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() == "authstore::sql" {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn count_sql_events(log_statements: bool) -> usize {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());
    let config = Config {
        log_statements,
        ..Config::with_database_url(url)
    };

    let events = SqlEvents::default();
    let subscriber = tracing_subscriber::registry().with(events.clone());
    tracing::subscriber::with_default(subscriber, || {
        let db = Database::initialize(&config).unwrap();
        db.migrate().unwrap();
        db.with_unit_of_work(|uow| uow.users().create(&new_user("grace")))
            .unwrap();
    });
    events.0.load(Ordering::SeqCst)
}

#[test]
fn test_statement_logging_is_opt_in() {
    assert_eq!(count_sql_events(false), 0);
    assert!(count_sql_events(true) > 0);
}

#[test]
fn test_concurrent_migrate_applies_each_migration_once() {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());
    let config = Config::with_database_url(url);

    let first = Database::initialize(&config).unwrap();
    let second = Database::initialize(&config).unwrap();
    let barrier = Barrier::new(2);

    let applied: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = [&first, &second]
            .into_iter()
            .map(|db| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    db.migrate()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .sum()
    });

    assert_eq!(applied, 2);
    assert!(first.pending_migrations().unwrap().is_empty());
}
