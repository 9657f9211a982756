use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::time::{Duration, timeout};

use super::*;
use crate::feed::{ChangeFeed, ChangeKind, Subscription};
use crate::store::memory::MemoryStore;
use crate::types::{Board, BoardPatch, DataPatch, LinkPatch, NewBoard, Participant, PostItData, PostItPatch};

// =============================================================================
// SCRIPTED STORE
// =============================================================================

/// `MemoryStore` with per-operation failure injection and gates that hold
/// calls until released: `insert_element` and `list_elements` replies after
/// the inner call, `update_element` before it.
#[derive(Default)]
struct ScriptedStore {
    inner: MemoryStore,
    fail_updates: AtomicBool,
    fail_deletes: AtomicBool,
    hold_inserts: AtomicBool,
    release: Notify,
    hold_lists: AtomicBool,
    list_read: Notify,
    release_list: Notify,
    hold_updates: AtomicBool,
    release_update: Notify,
}

impl ScriptedStore {
    fn offline() -> StoreError {
        StoreError::Unavailable("scripted failure".into())
    }
}

#[async_trait::async_trait]
impl RemoteStore for ScriptedStore {
    async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        self.inner.list_boards().await
    }

    async fn get_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        self.inner.get_board(board_id).await
    }

    async fn insert_board(&self, board: NewBoard) -> Result<Board, StoreError> {
        self.inner.insert_board(board).await
    }

    async fn update_board(&self, board_id: Uuid, patch: &BoardPatch) -> Result<Option<Board>, StoreError> {
        self.inner.update_board(board_id, patch).await
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_board(board_id).await
    }

    async fn list_elements(&self, board_id: Uuid) -> Result<Vec<BoardElement>, StoreError> {
        let elements = self.inner.list_elements(board_id).await?;
        if self.hold_lists.load(Ordering::SeqCst) {
            self.list_read.notify_one();
            self.release_list.notified().await;
        }
        Ok(elements)
    }

    async fn insert_element(&self, element: NewElement) -> Result<BoardElement, StoreError> {
        let inserted = self.inner.insert_element(element).await?;
        if self.hold_inserts.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(inserted)
    }

    async fn update_element(&self, element_id: Uuid, patch: &ElementPatch) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        if self.hold_updates.load(Ordering::SeqCst) {
            self.release_update.notified().await;
        }
        self.inner.update_element(element_id, patch).await
    }

    async fn delete_element(&self, element_id: Uuid) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        self.inner.delete_element(element_id).await
    }

    async fn delete_elements_not_authored_by(&self, board_id: Uuid, author: &str) -> Result<u64, StoreError> {
        self.inner.delete_elements_not_authored_by(board_id, author).await
    }

    async fn upsert_participant(&self, board_id: Uuid, nickname: &str) -> Result<Participant, StoreError> {
        self.inner.upsert_participant(board_id, nickname).await
    }

    async fn list_participants(&self, board_id: Uuid) -> Result<Vec<Participant>, StoreError> {
        self.inner.list_participants(board_id).await
    }
}

// =============================================================================
// HELPERS
// =============================================================================

struct Fixture {
    store: Arc<ScriptedStore>,
    engine: BoardEngine,
    feed: Subscription,
}

async fn fixture() -> Fixture {
    let store = Arc::new(ScriptedStore::default());
    let board_id = store.insert_board(NewBoard::default()).await.unwrap().id;
    let feed = store.inner.subscribe(board_id).await.unwrap();
    let engine = BoardEngine::new(board_id, store.clone());
    Fixture { store, engine, feed }
}

async fn next_event(sub: &mut Subscription) -> FeedEvent {
    timeout(Duration::from_millis(200), sub.recv())
        .await
        .expect("feed event timed out")
        .expect("feed closed")
}

/// Apply every event already queued on the feed.
async fn drain(fx: &mut Fixture) {
    while let Some(event) = fx.feed.try_recv() {
        fx.engine.apply_feed_event(&event).await;
    }
}

fn mario() -> Actor {
    Actor::Participant("Mario".into())
}

const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

fn text_patch(text: &str) -> ElementPatch {
    ElementPatch::data(DataPatch::PostIt(PostItPatch { text: Some(text.into()), color: None }))
}

// =============================================================================
// LOAD
// =============================================================================

#[tokio::test]
async fn load_replaces_sequence_in_creation_order() {
    let fx = fixture().await;
    let board_id = fx.engine.board_id();
    for author in ["A", "B", "C"] {
        fx.store
            .insert_element(NewElement {
                board_id,
                position: ORIGIN,
                author: author.into(),
                data: ElementData::default_for(ElementKind::PostIt),
            })
            .await
            .unwrap();
    }

    let loaded = fx.engine.load().await.unwrap();
    let authors: Vec<&str> = loaded.iter().map(|e| e.author.as_str()).collect();
    assert_eq!(authors, vec!["A", "B", "C"]);
    assert_eq!(fx.engine.snapshot(), loaded);
}

#[tokio::test]
async fn failed_load_empties_sequence_and_queues_notice() {
    let fx = fixture().await;
    fx.engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    assert_eq!(fx.engine.snapshot().len(), 1);

    fx.store.inner.set_available(false);
    let err = fx.engine.load().await.unwrap_err();
    assert!(matches!(err, BachecaError::StoreUnavailable(_)));
    assert!(fx.engine.snapshot().is_empty());

    let notices = fx.engine.take_notices().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].code, "E_STORE_UNAVAILABLE");
    assert!(notices[0].retryable);
    assert!(fx.engine.take_notices().await.is_empty());
}

// =============================================================================
// ADD
// =============================================================================

#[tokio::test]
async fn optimistic_add_then_echoed_insert_keeps_one_element() {
    let mut fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    assert_eq!(fx.engine.snapshot().len(), 1);

    let echo = next_event(&mut fx.feed).await;
    assert!(!fx.engine.apply_feed_event(&echo).await);
    assert!(!fx.engine.apply_feed_event(&echo).await);

    let snapshot = fx.engine.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, element.id);
    assert_eq!(snapshot[0].author, "Mario");
    assert_eq!(snapshot[0].data, ElementData::PostIt(PostItData::default()));
}

#[tokio::test]
async fn insert_echo_arriving_before_add_reply_keeps_one_element() {
    let mut fx = fixture().await;
    fx.store.hold_inserts.store(true, Ordering::SeqCst);

    let engine = fx.engine.clone();
    let pending = tokio::spawn(async move {
        engine
            .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
            .await
    });

    let echo = next_event(&mut fx.feed).await;
    assert!(fx.engine.apply_feed_event(&echo).await);
    assert_eq!(fx.engine.snapshot().len(), 1);

    fx.store.release.notify_one();
    let element = pending.await.unwrap().unwrap();

    let snapshot = fx.engine.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, element.id);
}

#[tokio::test]
async fn add_reply_after_feed_delete_does_not_resurrect() {
    let mut fx = fixture().await;
    fx.store.hold_inserts.store(true, Ordering::SeqCst);

    let engine = fx.engine.clone();
    let pending = tokio::spawn(async move {
        engine
            .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
            .await
    });

    let insert = next_event(&mut fx.feed).await;
    let ElementChange::Insert(element) = insert.decode_element().unwrap() else {
        panic!("expected insert");
    };
    fx.engine
        .apply_feed_event(&FeedEvent::element_delete(fx.engine.board_id(), element.id))
        .await;

    fx.store.release.notify_one();
    pending.await.unwrap().unwrap();
    assert!(fx.engine.snapshot().is_empty());

    assert!(!fx.engine.apply_feed_event(&insert).await);
    assert!(fx.engine.snapshot().is_empty());
}

#[tokio::test]
async fn add_denied_never_reaches_store() {
    let mut fx = fixture().await;
    let config = BoardConfig { allow_post_it: false, ..BoardConfig::default() };

    let err = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, BachecaError::PermissionDenied(_)));
    assert!(fx.feed.try_recv().is_none());
    assert!(fx.engine.snapshot().is_empty());
    assert!(fx.engine.take_notices().await.is_empty());

    let element = fx
        .engine
        .add(ElementKind::PostIt, &Actor::Instructor, ORIGIN, &config)
        .await
        .unwrap();
    assert_eq!(element.author, INSTRUCTOR_AUTHOR);
}

#[tokio::test]
async fn failed_add_leaves_state_and_queues_notice() {
    let fx = fixture().await;
    fx.store.inner.set_available(false);

    let err = fx
        .engine
        .add(ElementKind::Poll, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BachecaError::StoreUnavailable(_)));
    assert!(fx.engine.snapshot().is_empty());
    assert_eq!(fx.engine.take_notices().await.len(), 1);
}

// =============================================================================
// UPDATE
// =============================================================================

#[tokio::test]
async fn update_is_visible_before_store_reply_and_merges_fields() {
    let fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    let mut snapshots = fx.engine.subscribe();
    let _ = snapshots.borrow_and_update();
    fx.store.hold_updates.store(true, Ordering::SeqCst);

    let engine = fx.engine.clone();
    let pending = tokio::spawn(async move { engine.update(element.id, text_patch("ciao")).await });

    timeout(Duration::from_millis(200), snapshots.changed())
        .await
        .expect("optimistic snapshot timed out")
        .unwrap();
    let current = fx.engine.element(element.id).unwrap();
    let ElementData::PostIt(ref data) = current.data else { panic!("expected post-it") };
    assert_eq!(data.text, "ciao");
    assert_eq!(data.color, "yellow");
    assert_eq!(current.position, ORIGIN);

    let stored = fx.store.list_elements(fx.engine.board_id()).await.unwrap();
    let ElementData::PostIt(ref before) = stored[0].data else { panic!("expected post-it") };
    assert_eq!(before.text, "");

    fx.store.release_update.notify_one();
    pending.await.unwrap().unwrap();
    let stored = fx.store.list_elements(fx.engine.board_id()).await.unwrap();
    assert_eq!(stored[0].data, current.data);
}

#[tokio::test]
async fn update_unknown_element_is_not_found() {
    let fx = fixture().await;
    let err = fx
        .engine
        .update(Uuid::new_v4(), ElementPatch::position(ORIGIN))
        .await
        .unwrap_err();
    assert!(matches!(err, BachecaError::ElementNotFound(_)));
}

#[tokio::test]
async fn update_with_wrong_kind_fails_validation_without_write() {
    let mut fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    drain(&mut fx).await;

    let patch = ElementPatch::data(DataPatch::Link(LinkPatch { url: Some("x".into()), title: None }));
    let err = fx.engine.update(element.id, patch).await.unwrap_err();
    assert!(matches!(err, BachecaError::ValidationFailed(_)));
    assert!(fx.feed.try_recv().is_none());
    assert_eq!(fx.engine.element(element.id).unwrap(), element);
}

#[tokio::test]
async fn failed_update_reloads_authoritative_state() {
    let fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();

    fx.store.fail_updates.store(true, Ordering::SeqCst);
    let err = fx
        .engine
        .update(element.id, text_patch("persa"))
        .await
        .unwrap_err();

    assert!(matches!(err, BachecaError::StoreUnavailable(_)));
    assert_eq!(fx.engine.element(element.id).unwrap(), element);
    let notices = fx.engine.take_notices().await;
    assert_eq!(notices.len(), 1);
}

#[tokio::test]
async fn position_and_data_updates_are_independent_groups() {
    let mut fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    drain(&mut fx).await;

    // The remote text edit's row carries the stored position, so the move survives.
    let moved = Position { x: 40.0, y: 60.0 };
    fx.engine.update(element.id, ElementPatch::position(moved)).await.unwrap();
    drain(&mut fx).await;
    assert_eq!(fx.engine.element(element.id).unwrap().position, moved);

    fx.store.update_element(element.id, &text_patch("remoto")).await.unwrap();
    drain(&mut fx).await;

    let current = fx.engine.element(element.id).unwrap();
    assert_eq!(current.position, moved);
    let ElementData::PostIt(data) = current.data else { panic!("expected post-it") };
    assert_eq!(data.text, "remoto");
}

// =============================================================================
// REMOVE / RESET
// =============================================================================

#[tokio::test]
async fn remove_waits_for_feed_delete() {
    let mut fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    drain(&mut fx).await;

    fx.engine.remove(element.id).await.unwrap();
    assert_eq!(fx.engine.snapshot().len(), 1);

    let delete = next_event(&mut fx.feed).await;
    assert_eq!(delete.kind, ChangeKind::Delete);
    assert!(fx.engine.apply_feed_event(&delete).await);
    assert!(fx.engine.snapshot().is_empty());
}

#[tokio::test]
async fn load_read_before_delete_does_not_resurrect() {
    let mut fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    drain(&mut fx).await;

    fx.store.hold_lists.store(true, Ordering::SeqCst);
    let engine = fx.engine.clone();
    let pending = tokio::spawn(async move { engine.load().await });
    fx.store.list_read.notified().await;

    fx.engine.remove(element.id).await.unwrap();
    let delete = next_event(&mut fx.feed).await;
    assert!(fx.engine.apply_feed_event(&delete).await);

    fx.store.release_list.notify_one();
    let loaded = pending.await.unwrap().unwrap();
    assert!(loaded.is_empty());
    assert!(fx.engine.snapshot().is_empty());
}

#[test]
fn tombstones_keep_only_the_most_recent_ids() {
    let mut tombstones = Tombstones::default();
    let ids: Vec<Uuid> = (0..=MAX_TOMBSTONES).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        tombstones.insert(*id);
    }
    tombstones.insert(ids[MAX_TOMBSTONES]);

    assert_eq!(tombstones.ids.len(), MAX_TOMBSTONES);
    assert_eq!(tombstones.order.len(), MAX_TOMBSTONES);
    assert!(!tombstones.contains(&ids[0]));
    assert!(tombstones.contains(&ids[1]));
    assert!(tombstones.contains(&ids[MAX_TOMBSTONES]));
}

#[tokio::test]
async fn failed_remove_changes_nothing() {
    let fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();

    fx.store.fail_deletes.store(true, Ordering::SeqCst);
    let err = fx.engine.remove(element.id).await.unwrap_err();
    assert!(matches!(err, BachecaError::StoreUnavailable(_)));
    assert_eq!(fx.engine.snapshot().len(), 1);
    assert_eq!(fx.engine.take_notices().await.len(), 1);
}

#[tokio::test]
async fn reset_leaves_only_instructor_elements() {
    let mut fx = fixture().await;
    let config = BoardConfig::default();
    fx.engine.add(ElementKind::PostIt, &Actor::Instructor, ORIGIN, &config).await.unwrap();
    fx.engine.add(ElementKind::Poll, &Actor::Instructor, ORIGIN, &config).await.unwrap();
    fx.engine.add(ElementKind::PostIt, &mario(), ORIGIN, &config).await.unwrap();
    drain(&mut fx).await;
    assert_eq!(fx.engine.snapshot().len(), 3);

    assert_eq!(fx.engine.reset_participant_elements().await.unwrap(), 1);
    assert_eq!(fx.engine.snapshot().len(), 3);

    drain(&mut fx).await;
    let snapshot = fx.engine.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|e| e.author == INSTRUCTOR_AUTHOR));
}

// =============================================================================
// FEED MERGE
// =============================================================================

#[tokio::test]
async fn delete_event_is_idempotent() {
    let mut fx = fixture().await;
    let element = fx
        .engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    drain(&mut fx).await;

    let delete = FeedEvent::element_delete(fx.engine.board_id(), element.id);
    assert!(fx.engine.apply_feed_event(&delete).await);
    let after_first = fx.engine.snapshot();
    assert!(!fx.engine.apply_feed_event(&delete).await);
    assert_eq!(fx.engine.snapshot(), after_first);
}

#[tokio::test]
async fn update_for_unknown_element_is_dropped() {
    let mut fx = fixture().await;
    fx.engine
        .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
        .await
        .unwrap();
    drain(&mut fx).await;
    let before = fx.engine.snapshot();

    let mut stranger = before[0].clone();
    stranger.id = Uuid::new_v4();
    let event = FeedEvent::element_upsert(ChangeKind::Update, &stranger.to_row().unwrap()).unwrap();

    assert!(!fx.engine.apply_feed_event(&event).await);
    assert_eq!(fx.engine.snapshot(), before);
}

#[tokio::test]
async fn insert_from_another_client_is_appended() {
    let mut fx = fixture().await;
    let other = fx
        .store
        .insert_element(NewElement {
            board_id: fx.engine.board_id(),
            position: ORIGIN,
            author: "Anna".into(),
            data: ElementData::default_for(ElementKind::Exercise),
        })
        .await
        .unwrap();

    drain(&mut fx).await;
    assert_eq!(fx.engine.snapshot(), vec![other]);
}

#[tokio::test]
async fn events_for_other_boards_or_collections_are_ignored() {
    let fx = fixture().await;
    let foreign = BoardElement {
        id: Uuid::new_v4(),
        board_id: Uuid::new_v4(),
        position: ORIGIN,
        author: "Anna".into(),
        created_at: 1,
        data: ElementData::default_for(ElementKind::Link),
    };
    let event = FeedEvent::element_upsert(ChangeKind::Insert, &foreign.to_row().unwrap()).unwrap();
    assert!(!fx.engine.apply_feed_event(&event).await);

    let board_event = FeedEvent::board(ChangeKind::Update, fx.engine.board_id());
    assert!(!fx.engine.apply_feed_event(&board_event).await);
    assert!(fx.engine.snapshot().is_empty());
}

#[tokio::test]
async fn undecodable_event_is_dropped() {
    let fx = fixture().await;
    let event = FeedEvent {
        collection: Collection::BoardElements,
        kind: ChangeKind::Insert,
        board_id: fx.engine.board_id(),
        new_row: Some(serde_json::json!({ "id": "not-a-uuid" })),
        old_row: None,
    };
    assert!(!fx.engine.apply_feed_event(&event).await);
}

// =============================================================================
// CLOSE
// =============================================================================

#[tokio::test]
async fn closed_engine_ignores_results_and_events() {
    let mut fx = fixture().await;
    fx.store.hold_inserts.store(true, Ordering::SeqCst);

    let engine = fx.engine.clone();
    let pending = tokio::spawn(async move {
        engine
            .add(ElementKind::PostIt, &mario(), ORIGIN, &BoardConfig::default())
            .await
    });
    let echo = next_event(&mut fx.feed).await;

    fx.engine.close().await;
    assert!(fx.engine.is_closed().await);
    fx.store.release.notify_one();
    pending.await.unwrap().unwrap();

    assert!(!fx.engine.apply_feed_event(&echo).await);
    assert!(fx.engine.snapshot().is_empty());
}
