mod scheduler;

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use teloxide::types::ChatId;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::cache::MenuCache;
use crate::messages;
use crate::upstream::{self, MealKind, UpstreamClient};

/// Process-wide wall clock zone. The upstream delivers in Czechia and aligns
/// its day timestamps to midnight in this zone.
pub const TIMEZONE: Tz = chrono_tz::Europe::Prague;

/// Upper bound on concurrent menu fetches within one tick, to keep the
/// per-tick load on the rate-limited upstream reasonable.
const MAX_CONCURRENT_FETCHES: usize = 16;

/// Time source for tick scheduling and "today" resolution. Injected so tests
/// can freeze it; there is exactly one zone for the whole process.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Tz>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&TIMEZONE)
    }
}

/// Outbound side of the chat backend. The notifier only ever needs to push
/// text at a chat; delivery errors are logged, never retried.
pub trait ChatTransport: Send + Sync + 'static {
    type Error: Display + Send;

    fn send(
        &self,
        chat_id: ChatId,
        text: String,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// One registered user: the chat the notifications go to, the phone number
/// the upstream knows them by, and the client that logged in with it.
struct Registration {
    chat_id: ChatId,
    phone: String,
    client: UpstreamClient,
}

/// Unix seconds of today's local midnight, the key the upstream uses for
/// its day records.
fn local_midnight(now: DateTime<Tz>) -> i64 {
    let mut date = now.date_naive();
    loop {
        // midnight can fall into a DST gap in exotic zones; roll forward
        match date.and_time(NaiveTime::MIN).and_local_timezone(TIMEZONE) {
            chrono::LocalResult::None => {
                date = date.succ_opt().expect("date out of range");
            }
            result => {
                return result
                    .earliest()
                    .expect("local midnight exists")
                    .timestamp()
            }
        }
    }
}

struct Inner<T: ChatTransport> {
    transport: T,
    registry: RwLock<HashMap<ChatId, Arc<Registration>>>,
    cache: MenuCache,
    clock: Arc<dyn Clock>,
    base_url: String,
    shutdown: watch::Sender<bool>,
    triggers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: ChatTransport> Inner<T> {
    /// Point-in-time view of the registry. The returned `Arc`s keep every
    /// included registration alive for the whole fan-out, so a concurrent
    /// unregister cannot pull a client out from under a running task.
    fn snapshot(&self) -> Vec<Arc<Registration>> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// One scheduled tick: notify every registered user about their dish of
    /// the given meal, one independent task per user. No failure crosses
    /// user boundaries, and nothing is retried before the next tick.
    async fn broadcast(self: &Arc<Self>, kind: MealKind) {
        let snapshot = self.snapshot();
        log::info!("{kind:?} tick: notifying {} registered chats", snapshot.len());

        let today = local_midnight(self.clock.now());
        let limit = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));

        let mut tasks = Vec::with_capacity(snapshot.len());
        for registration in snapshot {
            let inner = Arc::clone(self);
            let limit = Arc::clone(&limit);
            tasks.push(tokio::spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                inner.notify_user(&registration, kind, today).await;
            }));
        }

        for task in tasks {
            if task.await.is_err() {
                log::error!("{kind:?} notification task panicked");
            }
        }
    }

    async fn notify_user(&self, registration: &Registration, kind: MealKind, today: i64) {
        let chat_id = registration.chat_id;

        let menu = match registration.client.get_menu().await {
            Ok(menu) => menu,
            Err(e) => {
                log::warn!("{chat_id}: fetching menu for {kind:?} failed: {e}");
                return;
            }
        };

        let Some(day) = menu.days.iter().find(|day| day.timestamp == today) else {
            log::info!("{chat_id}: no menu for today, skipping {kind:?}");
            return;
        };

        let Some(dish) = day.dishes.iter().find(|dish| dish.meal == kind.wire()) else {
            log::info!("{chat_id}: today's menu has no {kind:?}");
            return;
        };

        let text = messages::single_meal(kind, dish);
        if let Err(e) = self.transport.send(chat_id, text).await {
            log::warn!("{chat_id}: couldn't deliver {kind:?} notification: {e}");
        }
    }
}

/// The per-user notification engine. Binds chat ids to authenticated
/// upstream clients, wakes up three times a day to fan a meal notification
/// out to every registered chat, and serves the on-demand `/menu` path
/// through the menu cache.
pub struct MealNotifier<T: ChatTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: ChatTransport> Clone for MealNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ChatTransport> MealNotifier<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, upstream::BASE_URL, Arc::new(SystemClock))
    }

    fn with_config(transport: T, base_url: &str, clock: Arc<dyn Clock>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                transport,
                registry: RwLock::new(HashMap::new()),
                cache: MenuCache::default(),
                clock,
                base_url: base_url.to_owned(),
                shutdown,
                triggers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Authenticates the phone number against the upstream and installs the
    /// registration, superseding any previous one for the chat. On auth
    /// failure nothing changes.
    pub async fn register_user(&self, chat_id: ChatId, phone: &str) -> Result<(), upstream::Error> {
        let client = UpstreamClient::login_at(&self.inner.base_url, phone).await?;

        let registration = Arc::new(Registration {
            chat_id,
            phone: phone.to_owned(),
            client,
        });

        log::info!(
            "{chat_id}: registered phone {} for meal notifications",
            registration.phone
        );

        self.inner
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat_id, registration);

        Ok(())
    }

    /// No-op if the chat was never registered. An already-snapshotted
    /// fan-out task may still deliver one final notification.
    pub fn unregister_user(&self, chat_id: ChatId) {
        let removed = self
            .inner
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&chat_id);

        if removed.is_some() {
            log::info!("{chat_id}: unregistered from meal notifications");
        }
    }

    /// The on-demand `/menu` path. Serves from the cache when possible; on a
    /// miss logs in, fetches and caches. A menu without a day for today
    /// yields the fixed placeholder text.
    pub async fn get_today_menu(&self, phone: &str) -> Result<String, upstream::Error> {
        let menu = match self.inner.cache.get(phone) {
            Some(menu) => menu,
            None => {
                let client = UpstreamClient::login_at(&self.inner.base_url, phone).await?;
                let menu = Arc::new(client.get_menu().await?);
                self.inner.cache.put(phone, Arc::clone(&menu));
                menu
            }
        };

        let today = local_midnight(self.inner.clock.now());
        Ok(match menu.days.iter().find(|day| day.timestamp == today) {
            Some(day) => messages::day_menu(day),
            None => messages::NO_MENU_TODAY.to_owned(),
        })
    }

    pub fn clear_menu(&self, phone: &str) {
        self.inner.cache.clear(phone);
    }

    /// Spawns the three daily trigger tasks. Calling it on an already
    /// running notifier does nothing.
    pub fn start(&self) {
        let mut triggers = self
            .inner
            .triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        if !triggers.is_empty() {
            return;
        }

        for (kind, hour) in scheduler::TICKS {
            triggers.push(tokio::spawn(scheduler::run_trigger(
                Arc::clone(&self.inner),
                kind,
                hour,
                self.inner.shutdown.subscribe(),
            )));
        }
    }

    /// Stops firing new ticks and waits for in-flight fan-outs to finish;
    /// bounded by the upstream request deadline.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown.send(true);

        let triggers: Vec<_> = self
            .inner
            .triggers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for trigger in triggers {
            if trigger.await.is_err() {
                log::error!("trigger task panicked");
            }
        }

        log::info!("Meal notifier stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::prelude::*;
    use httpmock::Mock;

    /// 2024-01-15 00:00 Europe/Prague
    const TODAY_TS: i64 = 1705273200;

    struct FixedClock(DateTime<Tz>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Tz> {
            self.0
        }
    }

    fn monday_morning() -> Arc<FixedClock> {
        Arc::new(FixedClock(
            TIMEZONE.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap(),
        ))
    }

    #[derive(Clone, Default)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<(ChatId, String)>>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(ChatId, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ChatTransport for RecordingTransport {
        type Error = std::convert::Infallible;

        async fn send(&self, chat_id: ChatId, text: String) -> Result<(), Self::Error> {
            self.sent.lock().unwrap().push((chat_id, text));
            Ok(())
        }
    }

    fn notifier(
        server: &MockServer,
        transport: RecordingTransport,
    ) -> MealNotifier<RecordingTransport> {
        MealNotifier::with_config(transport, &server.base_url(), monday_morning())
    }

    fn mock_login<'a>(server: &'a MockServer, phone: &str, token: &str) -> Mock<'a> {
        let body = serde_json::json!({ "inBodyId": phone });
        let response = serde_json::json!({ "accessToken": token });
        server.mock(move |when, then| {
            when.method(PUT).path("/api/menu/rate/login").json_body(body);
            then.status(200).json_body(response);
        })
    }

    fn mock_menu<'a>(server: &'a MockServer, token: &str, menu: serde_json::Value) -> Mock<'a> {
        let bearer = format!("Bearer {token}");
        server.mock(move |when, then| {
            when.method(GET)
                .path("/api/menu/me")
                .header("authorization", &bearer);
            then.status(200).json_body(menu);
        })
    }

    fn dish(title: &str, meal: u8) -> serde_json::Value {
        serde_json::json!({
            "title": title,
            "meal": meal,
            "weight": 250,
            "isHot": true,
            "nutrients": { "kcal": 320.0, "prot": 12.0, "fat": 7.0, "carb": 55.0 }
        })
    }

    fn menu_for(timestamp: i64, dishes: Vec<serde_json::Value>) -> serde_json::Value {
        serde_json::json!({
            "days": [{
                "timestamp": timestamp,
                "dishes": dishes,
                "nutrients": { "kcal": 320.0, "prot": 12.0, "fat": 7.0, "carb": 55.0 }
            }]
        })
    }

    #[tokio::test]
    async fn registration_appears_exactly_once_in_snapshot() {
        let server = MockServer::start();
        mock_login(&server, "123456789", "T");

        let notifier = notifier(&server, RecordingTransport::default());
        notifier
            .register_user(ChatId(42), "123456789")
            .await
            .unwrap();

        let snapshot = notifier.inner.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].chat_id, ChatId(42));
        assert_eq!(snapshot[0].phone, "123456789");
    }

    #[tokio::test]
    async fn reregistration_supersedes_previous_phone() {
        let server = MockServer::start();
        mock_login(&server, "111111111", "T1");
        mock_login(&server, "222222222", "T2");

        let notifier = notifier(&server, RecordingTransport::default());
        notifier
            .register_user(ChatId(42), "111111111")
            .await
            .unwrap();
        notifier
            .register_user(ChatId(42), "222222222")
            .await
            .unwrap();

        let snapshot = notifier.inner.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].phone, "222222222");
    }

    #[tokio::test]
    async fn failed_auth_leaves_registry_unchanged() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/api/menu/rate/login");
            then.status(401).body("nope");
        });

        let notifier = notifier(&server, RecordingTransport::default());
        let err = notifier
            .register_user(ChatId(7), "000000000")
            .await
            .unwrap_err();

        assert!(matches!(err, upstream::Error::Auth { .. }));
        assert!(notifier.inner.snapshot().is_empty());
    }

    #[tokio::test]
    async fn breakfast_broadcast_delivers_formatted_dish() {
        let server = MockServer::start();
        mock_login(&server, "123456789", "T");
        mock_menu(&server, "T", menu_for(TODAY_TS, vec![dish("Oatmeal", 0)]));

        let transport = RecordingTransport::default();
        let notifier = notifier(&server, transport.clone());
        notifier
            .register_user(ChatId(42), "123456789")
            .await
            .unwrap();

        notifier.inner.broadcast(MealKind::Breakfast).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId(42));
        assert!(sent[0]
            .1
            .starts_with("🌅 Breakfast time!\n\n🍳 Oatmeal\n\n⚖️ Weight: 250g\n♨️ Needs heating"));
    }

    #[tokio::test]
    async fn one_failing_user_does_not_block_the_others() {
        let server = MockServer::start();

        // A: menu fetch blows up with a 500
        mock_login(&server, "111111111", "TA");
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/menu/me")
                .header("authorization", "Bearer TA");
            then.status(500).body("boom");
        });

        // B: valid lunch for today
        mock_login(&server, "222222222", "TB");
        mock_menu(&server, "TB", menu_for(TODAY_TS, vec![dish("Chicken", 2)]));

        // C: today's menu has no lunch at all
        mock_login(&server, "333333333", "TC");
        mock_menu(&server, "TC", menu_for(TODAY_TS, vec![dish("Oatmeal", 0)]));

        let transport = RecordingTransport::default();
        let notifier = notifier(&server, transport.clone());
        notifier
            .register_user(ChatId(1), "111111111")
            .await
            .unwrap();
        notifier
            .register_user(ChatId(2), "222222222")
            .await
            .unwrap();
        notifier
            .register_user(ChatId(3), "333333333")
            .await
            .unwrap();

        notifier.inner.broadcast(MealKind::Lunch).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId(2));
        assert!(sent[0].1.starts_with("🍽️ Lunch time!\n\n🍳 Chicken"));
    }

    #[tokio::test]
    async fn snapshotted_registration_outlives_unregister() {
        let server = MockServer::start();
        mock_login(&server, "123456789", "T");
        mock_menu(&server, "T", menu_for(TODAY_TS, vec![dish("Oatmeal", 0)]));

        let transport = RecordingTransport::default();
        let notifier = notifier(&server, transport.clone());
        notifier
            .register_user(ChatId(42), "123456789")
            .await
            .unwrap();

        let snapshot = notifier.inner.snapshot();
        notifier.unregister_user(ChatId(42));
        assert!(notifier.inner.snapshot().is_empty());

        // the task holding the snapshot entry still completes its delivery
        notifier
            .inner
            .notify_user(&snapshot[0], MealKind::Breakfast, TODAY_TS)
            .await;
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn menu_without_today_yields_placeholder() {
        let server = MockServer::start();
        mock_login(&server, "999999999", "T");
        mock_menu(
            &server,
            "T",
            menu_for(TODAY_TS + 86_400, vec![dish("Oatmeal", 0)]),
        );

        let notifier = notifier(&server, RecordingTransport::default());
        let text = notifier.get_today_menu("999999999").await.unwrap();

        assert_eq!(text, "🌱 No menu available for today, enjoy your day");
    }

    #[tokio::test]
    async fn cached_menu_is_reused_until_cleared() {
        let server = MockServer::start();
        let login = mock_login(&server, "123456789", "T");
        let menu = mock_menu(&server, "T", menu_for(TODAY_TS, vec![dish("Oatmeal", 0)]));

        let notifier = notifier(&server, RecordingTransport::default());

        let first = notifier.get_today_menu("123456789").await.unwrap();
        let second = notifier.get_today_menu("123456789").await.unwrap();
        assert!(first.starts_with("📅 Menu for Monday, 15.01.2024"));
        assert_eq!(first, second);
        assert_eq!(login.hits(), 1);
        assert_eq!(menu.hits(), 1);

        notifier.clear_menu("123456789");
        notifier.get_today_menu("123456789").await.unwrap();
        assert_eq!(login.hits(), 2);
        assert_eq!(menu.hits(), 2);
    }

    #[tokio::test]
    async fn upstream_failure_surfaces_from_on_demand_path() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/api/menu/rate/login");
            then.status(503).body("down");
        });

        let notifier = notifier(&server, RecordingTransport::default());
        assert!(notifier.get_today_menu("123456789").await.is_err());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_terminates() {
        let server = MockServer::start();
        let notifier = notifier(&server, RecordingTransport::default());

        notifier.start();
        notifier.start();
        assert_eq!(notifier.inner.triggers.lock().unwrap().len(), 3);

        notifier.stop().await;
        assert!(notifier.inner.triggers.lock().unwrap().is_empty());
    }

    #[test]
    fn local_midnight_matches_upstream_day_keys() {
        let clock = monday_morning();
        assert_eq!(local_midnight(clock.now()), TODAY_TS);

        // late evening still resolves to the same day key
        let evening = TIMEZONE.with_ymd_and_hms(2024, 1, 15, 23, 59, 59).unwrap();
        assert_eq!(local_midnight(evening), TODAY_TS);
    }
}
