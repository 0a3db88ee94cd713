//! End-to-end reward pipeline: request path, in-memory channel, consumer, ledger

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use laurel::db::missions::{self, NewMission};
use laurel::db::requirements;
use laurel::db::{envelopes, titles, transactions, users, LedgerDb, RequirementKind, TransactionKind};
use laurel::handlers::HandlerRegistry;
use laurel::mail::{EmailContent, LogMailer, Mailer};
use laurel::queue::{Consumer, ConsumerConfig, DispatchReport, EnvelopeChannel, InMemoryChannel, Producer};
use laurel::services::ServicesConfig;
use laurel::{LaurelError, Result, Services};

struct Pipeline {
    _dir: TempDir,
    db: Arc<LedgerDb>,
    channel: Arc<InMemoryChannel>,
    services: Arc<Services>,
    consumer: Consumer,
}

fn pipeline(mailer: Arc<dyn Mailer>) -> Pipeline {
    pipeline_with(mailer, ServicesConfig::default())
}

fn pipeline_with(mailer: Arc<dyn Mailer>, config: ServicesConfig) -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(LedgerDb::open(&dir.path().join("laurel.db")).unwrap());
    let channel = Arc::new(InMemoryChannel::new());
    let services = Arc::new(Services::new(
        db.clone(),
        Producer::new(channel.clone()),
        mailer,
        config,
    ));
    let consumer = Consumer::new(
        channel.clone(),
        Arc::new(HandlerRegistry::with_defaults(services.clone())),
        db.clone(),
        ConsumerConfig {
            worker_id: "it".into(),
            batch_size: 10,
            wait_timeout: Duration::from_millis(20),
            max_attempts: 3,
            retry_delay: Duration::ZERO,
        },
    );
    Pipeline {
        _dir: dir,
        db,
        channel,
        services,
        consumer,
    }
}

fn new_user(db: &LedgerDb, email: Option<&str>) -> i64 {
    db.with_conn_mut(|conn| users::create_user(conn, email))
        .unwrap()
        .id
}

#[tokio::test]
async fn mission_completion_credits_reward_once() {
    let p = pipeline(Arc::new(LogMailer::new()));
    let user_id = new_user(&p.db, None);
    let mission = p
        .db
        .with_conn(|conn| {
            let mission = missions::create_mission(conn, &NewMission::active("Shutterbug", 10, 0))?;
            requirements::create_requirement(conn, RequirementKind::Mission, mission.id, "photo.upload", 3)?;
            Ok(mission)
        })
        .unwrap();

    // Requirements are not met yet
    let err = p.services.complete_mission(user_id, mission.id).await.unwrap_err();
    assert!(matches!(err, LaurelError::Validation(_)));
    assert_eq!(p.channel.pending(), 0);

    for _ in 0..3 {
        p.services
            .progress
            .track_mission_progress(user_id, "photo.upload", 1)
            .unwrap();
    }
    p.services.complete_mission(user_id, mission.id).await.unwrap();

    let report = p.consumer.poll_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(p.services.wallet.balance(user_id).unwrap(), 10);

    let ledger = p
        .db
        .with_conn(|conn| transactions::list_for_user(conn, user_id))
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, 10);
    assert_eq!(ledger[0].kind(), Some(TransactionKind::MissionReward));

    // The same envelope delivered again is recognized and dropped
    p.services
        .producer()
        .enqueue(
            laurel::queue::EventType::CompleteMission,
            &laurel::queue::CompleteMissionBody {
                user_id,
                mission_id: mission.id,
            },
        )
        .await
        .unwrap();
    let report = p.consumer.poll_once().await.unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(p.services.wallet.balance(user_id).unwrap(), 10);
}

fn exec(db: &LedgerDb, sql: &str) {
    db.with_conn(|conn| {
        conn.execute_batch(sql)
            .map_err(|e| LaurelError::Database(e.to_string()))
    })
    .unwrap();
}

#[tokio::test]
async fn retried_mission_still_delivers_level_rewards() {
    let p = pipeline(Arc::new(LogMailer::new()));
    let user_id = new_user(&p.db, None);
    let (mission, veteran) = p
        .db
        .with_conn(|conn| {
            let mission = missions::create_mission(conn, &NewMission::active("Marathon", 0, 150))?;
            let veteran = titles::create_title(conn, "Veteran", None, None)?;
            titles::set_level_title(conn, 2, veteran.id)?;
            Ok((mission, veteran))
        })
        .unwrap();
    p.services.complete_mission(user_id, mission.id).await.unwrap();

    // The experience grant commits, then the bonus title insert fails
    exec(
        &p.db,
        "CREATE TRIGGER refuse_titles BEFORE INSERT ON user_titles
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
    );
    let report = p.consumer.poll_once().await.unwrap();
    assert_eq!(report.retried, 1);

    exec(&p.db, "DROP TRIGGER refuse_titles;");
    let report = p.consumer.poll_once().await.unwrap();
    assert_eq!(report.completed, 1);

    let owned = p
        .db
        .with_conn(|conn| titles::list_user_titles(conn, user_id))
        .unwrap();
    assert_eq!(owned, vec![veteran.id]);
    let user = p
        .db
        .with_conn(|conn| users::get_user(conn, user_id))
        .unwrap()
        .unwrap();
    assert_eq!(user.experience, 150);
    assert_eq!(user.level, 2);

    let mut kinds: Vec<String> = p
        .services
        .notifier
        .list(user_id)
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
    kinds.sort();
    assert_eq!(kinds, vec!["level_up", "mission_completed", "title_achieved"]);
}

#[tokio::test]
async fn over_budget_rewards_are_dead_lettered_without_retry() {
    let p = pipeline_with(
        Arc::new(LogMailer::new()),
        ServicesConfig {
            effect_budget: 2,
            ..ServicesConfig::default()
        },
    );
    let user_id = new_user(&p.db, None);
    let mission = p
        .db
        .with_conn(|conn| {
            let mission = missions::create_mission(conn, &NewMission::active("Bundle", 10, 0))?;
            for name in ["Gold", "Silver", "Bronze"] {
                let title = titles::create_title(conn, name, None, None)?;
                missions::add_title_reward(conn, mission.id, title.id)?;
            }
            Ok(mission)
        })
        .unwrap();
    p.services.complete_mission(user_id, mission.id).await.unwrap();

    let report = p.consumer.poll_once().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.retried, 0);
    assert_eq!(p.channel.pending() + p.channel.in_flight(), 0);

    let dead = p
        .db
        .with_conn(|conn| envelopes::list_dead_letters(conn, 10))
        .unwrap();
    assert!(dead[0].reason.contains("budget"));
    assert_eq!(dead[0].attempts, 1);
}

#[tokio::test]
async fn unknown_envelope_type_is_discarded() {
    let p = pipeline(Arc::new(LogMailer::new()));
    p.channel
        .send(Bytes::from_static(br#"{"type":"GrantBadge","body":{"user_id":1}}"#))
        .await
        .unwrap();

    let report = p.consumer.poll_once().await.unwrap();
    assert_eq!(report.unknown, 1);
    assert_eq!(p.channel.pending() + p.channel.in_flight(), 0);
    let stats = p.db.stats().unwrap();
    assert_eq!(stats.processed_envelope_count, 0);
    assert_eq!(stats.dead_letter_count, 0);
}

#[tokio::test]
async fn title_purchase_is_fulfilled() {
    let mailer = Arc::new(LogMailer::new());
    let p = pipeline(mailer.clone());
    let user_id = new_user(&p.db, Some("grace@example.com"));
    let title = p
        .db
        .with_conn(|conn| titles::create_title(conn, "Benefactor", None, Some(40)))
        .unwrap();

    let err = p.services.purchase_title(user_id, title.id).await.unwrap_err();
    assert!(matches!(err, LaurelError::InsufficientFunds { .. }));

    p.services.wallet.add(user_id, 100).unwrap();
    let receipt = p.services.purchase_title(user_id, title.id).await.unwrap();
    assert_eq!(receipt.balance, 60);

    let report = p.consumer.poll_once().await.unwrap();
    assert_eq!(report.completed, 1);

    let ledger = p
        .db
        .with_conn(|conn| transactions::list_for_user(conn, user_id))
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, -40);
    assert_eq!(mailer.sent().len(), 1);
    assert!(p
        .db
        .with_conn(|conn| titles::user_has_title(conn, user_id, title.id))
        .unwrap());

    let err = p.services.purchase_title(user_id, title.id).await.unwrap_err();
    assert!(matches!(err, LaurelError::Conflict(_)));
    assert_eq!(p.services.wallet.balance(user_id).unwrap(), 60);
}

/// Mail relay that never answers
struct UnreachableMailer;

#[async_trait]
impl Mailer for UnreachableMailer {
    async fn send(&self, _recipient: &str, _content: &EmailContent) -> Result<()> {
        Err(LaurelError::Mail("connection refused".into()))
    }
}

#[tokio::test]
async fn mail_outage_retries_then_dead_letters() {
    let p = pipeline(Arc::new(UnreachableMailer));
    let user_id = new_user(&p.db, Some("linus@example.com"));
    let title = p
        .db
        .with_conn(|conn| titles::create_title(conn, "Collector", None, Some(5)))
        .unwrap();
    p.services.wallet.add(user_id, 5).unwrap();
    p.services.purchase_title(user_id, title.id).await.unwrap();

    let mut total = DispatchReport::default();
    for _ in 0..4 {
        total.merge(&p.consumer.poll_once().await.unwrap());
    }
    assert_eq!(total.retried, 2);
    assert_eq!(total.dead_lettered, 1);
    assert_eq!(p.channel.pending() + p.channel.in_flight(), 0);

    let dead = p
        .db
        .with_conn(|conn| envelopes::list_dead_letters(conn, 10))
        .unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_type.as_deref(), Some("PurchaseTitle"));
    assert_eq!(dead[0].attempts, 3);

    // Retries never duplicate the ledger entry
    let ledger = p
        .db
        .with_conn(|conn| transactions::list_for_user(conn, user_id))
        .unwrap();
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn concurrent_wallet_mutations_are_not_lost() {
    let p = pipeline(Arc::new(LogMailer::new()));
    let user_id = new_user(&p.db, None);
    p.services.wallet.add(user_id, 1000).unwrap();

    let add = {
        let wallet = p.services.wallet.clone();
        tokio::task::spawn_blocking(move || wallet.add(user_id, 200))
    };
    let subtract = {
        let wallet = p.services.wallet.clone();
        tokio::task::spawn_blocking(move || wallet.subtract(user_id, 50))
    };
    add.await.unwrap().unwrap();
    subtract.await.unwrap().unwrap();

    assert_eq!(p.services.wallet.balance(user_id).unwrap(), 1150);
}
