use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use sqlx::PgPool;
use syncguard::domain::Source;
use syncguard::webhooks::RegisteredEvent;
use syncguard::webhooks::WebhookManager;
use syncguard::webhooks::WebhookRegistrar;

/// A registrar double that never fails and counts calls, for exercising the
/// delete-stale-then-create reconcile sequence (`spec.md` §4.9) without a
/// real upstream.
struct FakeRegistrar {
    deletes: AtomicUsize,
    creates: AtomicUsize,
    fail_create: bool,
}

impl FakeRegistrar {
    fn new() -> Self { Self { deletes: AtomicUsize::new(0), creates: AtomicUsize::new(0), fail_create: false } }
    fn failing() -> Self { Self { deletes: AtomicUsize::new(0), creates: AtomicUsize::new(0), fail_create: true } }
}

#[async_trait::async_trait]
impl WebhookRegistrar for FakeRegistrar {
    async fn delete_registration(&self, _registration_id: &str) -> Result<(), anyhow::Error> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_registrations(&self, _target_url: &str) -> Result<Vec<RegisteredEvent>, anyhow::Error> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(anyhow::anyhow!("upstream rejected registration"));
        }
        Ok(vec![
            RegisteredEvent { registration_id: "reg-1".to_string(), event: "task.created".to_string() },
            RegisteredEvent { registration_id: "reg-2".to_string(), event: "task.updated".to_string() },
        ])
    }
}

#[sqlx::test]
async fn reconcile_persists_fresh_registrations(pool: PgPool) {
    let registrar = Arc::new(FakeRegistrar::new());
    let manager = WebhookManager::new(pool.clone(), Some(registrar.clone() as Arc<dyn WebhookRegistrar>), None);

    manager.reconcile("https://ingress.example.com").await;

    let rows = sqlx::query!(r#"SELECT registration_id FROM webhook_registrations WHERE source = 'T'"#)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(registrar.creates.load(Ordering::SeqCst), 1);
}

#[sqlx::test]
async fn reconcile_deletes_stale_registrations_before_creating(pool: PgPool) {
    sqlx::query!(
        r#"INSERT INTO webhook_registrations (source, registration_id, target_url, events) VALUES ('T', 'old-1', 'https://old.example.com', '{}')"#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let registrar = Arc::new(FakeRegistrar::new());
    let manager = WebhookManager::new(pool.clone(), Some(registrar.clone() as Arc<dyn WebhookRegistrar>), None);

    manager.reconcile("https://new.example.com").await;

    assert_eq!(registrar.deletes.load(Ordering::SeqCst), 1);
    let rows = sqlx::query!(r#"SELECT target_url FROM webhook_registrations WHERE source = 'T'"#)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(rows.iter().all(|r| r.target_url == "https://new.example.com"));
}

/// §4.9 step 5: a permanently-failing registrar must not stop reconcile from
/// returning, and stale rows stay deleted rather than left half-migrated.
#[sqlx::test]
async fn reconcile_logs_and_continues_on_permanent_create_failure(pool: PgPool) {
    let registrar = Arc::new(FakeRegistrar::failing());
    let manager = WebhookManager::new(pool.clone(), Some(registrar as Arc<dyn WebhookRegistrar>), None);

    manager.reconcile("https://ingress.example.com").await;

    let rows = sqlx::query!(r#"SELECT registration_id FROM webhook_registrations WHERE source = 'T'"#)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[sqlx::test]
async fn needs_reconcile_is_true_until_a_registration_exists(pool: PgPool) {
    let manager = WebhookManager::new(pool.clone(), None, None);
    assert!(manager.needs_reconcile(Source::T, "https://ingress.example.com").await.unwrap());

    sqlx::query!(
        r#"INSERT INTO webhook_registrations (source, registration_id, target_url, events) VALUES ('T', 'reg-1', 'https://ingress.example.com', '{}')"#,
    )
    .execute(&pool)
    .await
    .unwrap();

    assert!(!manager.needs_reconcile(Source::T, "https://ingress.example.com").await.unwrap());
    assert!(manager.needs_reconcile(Source::T, "https://different.example.com").await.unwrap());
}
