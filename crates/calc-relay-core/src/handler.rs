//! The relay pipeline: access gate → parser → accumulator update → effects.
//!
//! `handle_message` touches only the accumulator store; everything it wants
//! sent is returned as [`Effect`]s for a [`RelayDispatcher`] to deliver.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    arithmetic::{self, ArithmeticError, DIVISION_BY_ZERO_NOTICE},
    command::{self, Command},
    config::Config,
    domain::{ChatId, ScopeKey, UserId},
    formatting::{format_number, format_result},
    relay::{Effect, RelayDispatcher},
    security::{self, Admission},
    store::{AccumulatorStore, Accumulators},
    utils::{AuditEvent, AuditLogger},
    Result,
};

/// One inbound chat message, transport-agnostic.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub sender: Option<UserId>,
    pub chat_id: ChatId,
    pub text: String,
}

/// Per-scope async locks serializing read → compute → write.
#[derive(Default)]
pub struct ScopeLocks {
    inner: Mutex<HashMap<ScopeKey, Arc<Mutex<()>>>>,
}

impl ScopeLocks {
    pub async fn lock_scope(&self, scope: &ScopeKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(scope.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Collaborators the handler needs.
pub struct RelayDeps {
    pub cfg: Arc<Config>,
    pub accumulators: Accumulators<dyn AccumulatorStore>,
    pub locks: ScopeLocks,
    pub audit: Option<AuditLogger>,
}

impl RelayDeps {
    pub fn new(cfg: Arc<Config>, store: Arc<dyn AccumulatorStore>) -> Self {
        let accumulators = Accumulators::new(store, cfg.initial_value);
        Self {
            cfg,
            accumulators,
            locks: ScopeLocks::default(),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    fn record(&self, event: AuditEvent) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit.write(&event) {
            tracing::warn!(path = %audit.path().display(), "audit write failed: {e}");
        }
    }
}

/// Gate and parse. `None` means the message is ordinary traffic.
fn eligible(msg: &IncomingMessage, cfg: &Config) -> Option<(Admission, Command)> {
    let admission = security::admit(cfg, msg.sender, msg.chat_id)?;
    let cmd = command::parse(&msg.text)?;
    Some((admission, cmd))
}

/// Process one message and return the effects to deliver.
///
/// Ineligible messages yield no effects and leave the store untouched.
/// Storage failures are returned as errors.
pub async fn handle_message(msg: &IncomingMessage, deps: &RelayDeps) -> Result<Vec<Effect>> {
    let Some((admission, cmd)) = eligible(msg, &deps.cfg) else {
        tracing::trace!(chat_id = msg.chat_id.0, "ignoring message");
        return Ok(Vec::new());
    };

    let scope = ScopeKey::select(deps.cfg.independent_mode, admission.source);
    let user_id = msg.sender.map(|u| u.0);
    let command_text = format!("{} {}", cmd.token, format_number(cmd.operand));

    let outcome = {
        let _guard = deps.locks.lock_scope(&scope).await;
        let old = deps.accumulators.read(&scope).await?;
        match arithmetic::apply(old, cmd.op, cmd.operand) {
            Ok(new) => {
                deps.accumulators.write(&scope, new).await?;
                Ok((old, new))
            }
            Err(e) => Err(e),
        }
    };

    let (old, new) = match outcome {
        Ok(values) => values,
        Err(ArithmeticError::DivisionByZero) => {
            tracing::info!(
                scope = %scope,
                chat_id = admission.source.0,
                "division by zero rejected"
            );
            deps.record(AuditEvent::rejected(
                user_id,
                admission.source.0,
                scope.as_str(),
                &command_text,
                &ArithmeticError::DivisionByZero.to_string(),
            ));
            return Ok(vec![Effect::Notice {
                chat_id: admission.source,
                text: DIVISION_BY_ZERO_NOTICE.to_string(),
            }]);
        }
    };

    tracing::info!(
        scope = %scope,
        source = admission.source.0,
        destination = admission.destination.0,
        old,
        new,
        "accumulator updated"
    );
    deps.record(AuditEvent::calculation(
        user_id,
        admission.source.0,
        admission.destination.0,
        scope.as_str(),
        &command_text,
        old,
        new,
    ));

    Ok(vec![Effect::Relay {
        chat_id: admission.destination,
        text: format_result(old, cmd.token, cmd.operand, new, deps.cfg.show_process),
    }])
}

/// Handle a message and deliver its effects.
pub async fn process_message(
    msg: &IncomingMessage,
    deps: &RelayDeps,
    dispatcher: &RelayDispatcher,
) -> Result<()> {
    let effects = handle_message(msg, deps).await?;
    dispatcher.dispatch(&effects).await
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, path::PathBuf, sync::Mutex as StdMutex};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::{AccumulatorRecord, MessageId, MessageRef},
        errors::Error,
        messaging::port::MessagingPort,
        store::{JsonFileStore, MemoryStore},
    };

    const ADMIN: UserId = UserId(42);
    const SRC_A: ChatId = ChatId(-100);
    const SRC_B: ChatId = ChatId(-200);
    const DEST: ChatId = ChatId(-900);

    fn cfg(show_process: bool, independent_mode: bool) -> Arc<Config> {
        Arc::new(Config {
            telegram_bot_token: "t".to_string(),
            admins: vec![ADMIN.0],
            initial_value: 1.0,
            group_mappings: BTreeMap::from([(SRC_A, DEST), (SRC_B, DEST)]),
            show_process,
            independent_mode,
            store_file: PathBuf::from("/tmp/unused.json"),
            audit_log_path: PathBuf::from("/tmp/unused.log"),
            audit_log_json: false,
        })
    }

    fn deps(show_process: bool, independent_mode: bool) -> (RelayDeps, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            RelayDeps::new(cfg(show_process, independent_mode), store.clone()),
            store,
        )
    }

    fn msg(sender: UserId, chat_id: ChatId, text: &str) -> IncomingMessage {
        IncomingMessage {
            sender: Some(sender),
            chat_id,
            text: text.to_string(),
        }
    }

    async fn value(store: &MemoryStore, scope: ScopeKey) -> Option<f64> {
        store.get(&scope).await.unwrap().map(|r| r.value)
    }

    #[tokio::test]
    async fn unauthorized_sender_has_no_effect() {
        let (deps, store) = deps(false, false);
        let effects = handle_message(&msg(UserId(7), SRC_A, "+ 2"), &deps)
            .await
            .unwrap();
        assert!(effects.is_empty());
        assert!(store.is_empty().await);

        let anonymous = IncomingMessage {
            sender: None,
            chat_id: SRC_A,
            text: "+ 2".to_string(),
        };
        assert!(handle_message(&anonymous, &deps).await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unmapped_chat_has_no_effect() {
        let (deps, store) = deps(false, false);
        let effects = handle_message(&msg(ADMIN, DEST, "+ 2"), &deps)
            .await
            .unwrap();
        assert!(effects.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn chatter_has_no_effect() {
        let (deps, store) = deps(false, false);
        for text in ["hello", "+", "2+2", "+ 2 apples", "- -1"] {
            let effects = handle_message(&msg(ADMIN, SRC_A, text), &deps)
                .await
                .unwrap();
            assert!(effects.is_empty(), "{text:?} produced effects");
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn accumulates_and_relays_current_value() {
        let (deps, store) = deps(false, false);

        let effects = handle_message(&msg(ADMIN, SRC_A, "+ 2"), &deps)
            .await
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Relay {
                chat_id: DEST,
                text: "当前值: 3".to_string()
            }]
        );
        assert_eq!(value(&store, ScopeKey::global()).await, Some(3.0));

        let effects = handle_message(&msg(ADMIN, SRC_A, " x3 "), &deps)
            .await
            .unwrap();
        assert_eq!(effects[0].text(), "当前值: 9");
        assert_eq!(value(&store, ScopeKey::global()).await, Some(9.0));
    }

    #[tokio::test]
    async fn show_process_relays_equation() {
        let (deps, store) = deps(true, false);
        store
            .upsert(AccumulatorRecord {
                id: ScopeKey::global(),
                value: 2.0,
            })
            .await
            .unwrap();

        let effects = handle_message(&msg(ADMIN, SRC_A, "+3"), &deps)
            .await
            .unwrap();
        assert_eq!(effects[0].text(), "2 + 3 = 5");
        assert_eq!(effects[0].chat_id(), DEST);
    }

    #[tokio::test]
    async fn division_by_zero_notifies_source_only() {
        let (deps, store) = deps(false, false);
        store
            .upsert(AccumulatorRecord {
                id: ScopeKey::global(),
                value: 5.0,
            })
            .await
            .unwrap();

        let effects = handle_message(&msg(ADMIN, SRC_A, "÷ 0"), &deps)
            .await
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Notice {
                chat_id: SRC_A,
                text: DIVISION_BY_ZERO_NOTICE.to_string()
            }]
        );
        assert_eq!(value(&store, ScopeKey::global()).await, Some(5.0));
    }

    #[tokio::test]
    async fn division_by_zero_still_initializes_unseen_scope() {
        let (deps, store) = deps(false, true);
        handle_message(&msg(ADMIN, SRC_B, "/ 0.0"), &deps)
            .await
            .unwrap();
        assert_eq!(value(&store, ScopeKey::for_chat(SRC_B)).await, Some(1.0));
    }

    #[tokio::test]
    async fn independent_mode_isolates_chats() {
        let (deps, store) = deps(false, true);
        handle_message(&msg(ADMIN, SRC_A, "+ 10"), &deps)
            .await
            .unwrap();
        handle_message(&msg(ADMIN, SRC_B, "* 4"), &deps)
            .await
            .unwrap();

        assert_eq!(value(&store, ScopeKey::for_chat(SRC_A)).await, Some(11.0));
        assert_eq!(value(&store, ScopeKey::for_chat(SRC_B)).await, Some(4.0));
        assert_eq!(value(&store, ScopeKey::global()).await, None);
    }

    #[tokio::test]
    async fn shared_mode_uses_one_value() {
        let (deps, store) = deps(false, false);
        handle_message(&msg(ADMIN, SRC_A, "+ 10"), &deps)
            .await
            .unwrap();
        handle_message(&msg(ADMIN, SRC_B, "- 1"), &deps)
            .await
            .unwrap();

        assert_eq!(value(&store, ScopeKey::global()).await, Some(10.0));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_updates_to_one_scope_are_serialized() {
        let (deps, store) = deps(false, false);
        let deps = Arc::new(deps);

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let deps = deps.clone();
            tasks.push(tokio::spawn(async move {
                handle_message(&msg(ADMIN, SRC_A, "+ 1"), &deps).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(value(&store, ScopeKey::global()).await, Some(51.0));
    }

    fn tmp_path(prefix: &str, ext: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{}-{ts}.{ext}", std::process::id()))
    }

    #[tokio::test]
    async fn overflow_relays_infinity_with_file_store() {
        let path = tmp_path("calc-relay-handler-overflow", "json");
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let deps = RelayDeps::new(cfg(false, false), store.clone());

        let text = format!("* 1{}", "0".repeat(400));
        let effects = handle_message(&msg(ADMIN, SRC_A, &text), &deps)
            .await
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Relay {
                chat_id: DEST,
                text: "当前值: Infinity".to_string()
            }]
        );

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let rec = reopened.get(&ScopeKey::global()).await.unwrap().unwrap();
        assert_eq!(rec.value, f64::INFINITY);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn rejected_division_is_audited_and_releases_scope() {
        let path = tmp_path("calc-relay-handler-reject", "log");
        let store = Arc::new(MemoryStore::new());
        let deps =
            RelayDeps::new(cfg(false, false), store).with_audit(AuditLogger::new(&path, true));

        let effects = handle_message(&msg(ADMIN, SRC_A, "/ 0"), &deps)
            .await
            .unwrap();
        assert!(matches!(effects[0], Effect::Notice { .. }));

        let guard = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            deps.locks.lock_scope(&ScopeKey::global()),
        )
        .await;
        assert!(guard.is_ok(), "scope lock still held after rejection");

        let txt = std::fs::read_to_string(&path).unwrap();
        let event: serde_json::Value = serde_json::from_str(txt.trim()).unwrap();
        assert_eq!(event["event"], "rejected");
        assert_eq!(event["reason"], "division by zero");

        let _ = std::fs::remove_file(&path);
    }

    struct FailingStore;

    #[async_trait]
    impl AccumulatorStore for FailingStore {
        async fn get(&self, _id: &ScopeKey) -> Result<Option<AccumulatorRecord>> {
            Err(Error::Storage("backend unavailable".to_string()))
        }

        async fn upsert(&self, _record: AccumulatorRecord) -> Result<()> {
            Err(Error::Storage("backend unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced() {
        let deps = RelayDeps::new(cfg(false, false), Arc::new(FailingStore));
        let err = handle_message(&msg(ADMIN, SRC_A, "+ 1"), &deps)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[derive(Default)]
    struct FakeMessenger {
        sends: StdMutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            self.sends.lock().unwrap().push((chat_id, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }
    }

    #[tokio::test]
    async fn process_message_sends_relay_to_destination() {
        let (deps, _store) = deps(true, false);
        let messenger = Arc::new(FakeMessenger::default());
        let dispatcher = RelayDispatcher::new(messenger.clone());

        process_message(&msg(ADMIN, SRC_A, "+ 2"), &deps, &dispatcher)
            .await
            .unwrap();
        process_message(&msg(UserId(1), SRC_A, "+ 2"), &deps, &dispatcher)
            .await
            .unwrap();

        let sends = messenger.sends.lock().unwrap().clone();
        assert_eq!(sends, vec![(DEST, "1 + 2 = 3".to_string())]);
    }

    #[tokio::test]
    async fn audit_records_calculations() {
        let path = PathBuf::from(format!(
            "/tmp/calc-relay-handler-audit-{}-{}.log",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        let store = Arc::new(MemoryStore::new());
        let deps =
            RelayDeps::new(cfg(false, false), store).with_audit(AuditLogger::new(&path, true));

        handle_message(&msg(ADMIN, SRC_A, "+ 2"), &deps)
            .await
            .unwrap();
        handle_message(&msg(ADMIN, SRC_A, "/ 0"), &deps)
            .await
            .unwrap();

        let txt = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = txt
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "calculation");
        assert_eq!(events[0]["command"], "+ 2");
        assert_eq!(events[1]["event"], "rejected");

        let _ = std::fs::remove_file(&path);
    }
}
