use std::sync::Arc;

use super::*;
use crate::store::RemoteStore;
use crate::store::memory::MemoryStore;
use crate::types::{NewBoard, PollData};

struct Setup {
    store: Arc<MemoryStore>,
    engine: BoardEngine,
    config: BoardConfig,
}

async fn setup() -> Setup {
    let store = Arc::new(MemoryStore::new());
    let board_id = store.insert_board(NewBoard::default()).await.unwrap().id;
    let engine = BoardEngine::new(board_id, store.clone());
    Setup { store, engine, config: BoardConfig::default() }
}

fn mario() -> Actor {
    Actor::Participant("Mario".into())
}

fn anna() -> Actor {
    Actor::Participant("Anna".into())
}

fn data_of(s: &Setup, id: Uuid) -> ElementData {
    s.engine.element(id).unwrap().data
}

#[tokio::test]
async fn add_uses_default_position() {
    let s = setup().await;
    let actor = mario();
    let element = add_element(ActionContext::new(&s.engine, &actor, &s.config), ElementKind::PostIt, None)
        .await
        .unwrap();
    assert_eq!(element.position, DEFAULT_POSITION);
    assert_eq!(element.author, "Mario");
}

#[tokio::test]
async fn locked_board_blocks_participant_add() {
    let s = setup().await;
    let locked = BoardConfig { is_locked: true, ..s.config };
    let actor = mario();
    let err = add_element(ActionContext::new(&s.engine, &actor, &locked), ElementKind::PostIt, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BachecaError::PermissionDenied(_)));

    let instructor = Actor::Instructor;
    add_element(ActionContext::new(&s.engine, &instructor, &locked), ElementKind::PostIt, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn only_author_or_instructor_moves_and_edits() {
    let s = setup().await;
    let (owner, other, instructor) = (mario(), anna(), Actor::Instructor);
    let element = add_element(ActionContext::new(&s.engine, &owner, &s.config), ElementKind::PostIt, None)
        .await
        .unwrap();
    let to = Position { x: 5.0, y: 6.0 };

    let err = move_element(ActionContext::new(&s.engine, &other, &s.config), element.id, to)
        .await
        .unwrap_err();
    assert!(matches!(err, BachecaError::PermissionDenied(_)));
    assert!(
        save_post_it_text(ActionContext::new(&s.engine, &other, &s.config), element.id, "x")
            .await
            .is_err()
    );

    move_element(ActionContext::new(&s.engine, &owner, &s.config), element.id, to)
        .await
        .unwrap();
    assert_eq!(s.engine.element(element.id).unwrap().position, to);

    save_post_it_text(ActionContext::new(&s.engine, &instructor, &s.config), element.id, "  nota  ")
        .await
        .unwrap();
    let ElementData::PostIt(data) = data_of(&s, element.id) else { panic!("expected post-it") };
    assert_eq!(data.text, "nota");
}

#[tokio::test]
async fn post_it_text_and_color_validation() {
    let s = setup().await;
    let actor = mario();
    let ctx = ActionContext::new(&s.engine, &actor, &s.config);
    let element = add_element(ctx, ElementKind::PostIt, None).await.unwrap();

    assert!(save_post_it_text(ctx, element.id, "   ").await.is_err());
    assert!(save_post_it_text(ctx, element.id, &"a".repeat(281)).await.is_err());
    assert!(set_post_it_color(ctx, element.id, "purple").await.is_err());

    set_post_it_color(ctx, element.id, "pink").await.unwrap();
    let ElementData::PostIt(data) = data_of(&s, element.id) else { panic!("expected post-it") };
    assert_eq!(data.color, "pink");
    assert_eq!(data.text, "");
}

#[tokio::test]
async fn delete_is_owner_only_and_waits_for_feed() {
    let s = setup().await;
    let (owner, other) = (mario(), anna());
    let element = add_element(ActionContext::new(&s.engine, &owner, &s.config), ElementKind::PostIt, None)
        .await
        .unwrap();

    assert!(
        delete_element(ActionContext::new(&s.engine, &other, &s.config), element.id)
            .await
            .is_err()
    );
    delete_element(ActionContext::new(&s.engine, &owner, &s.config), element.id)
        .await
        .unwrap();

    assert!(s.engine.element(element.id).is_some());
    assert!(s.store.list_elements(s.engine.board_id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn poll_save_validates_and_keeps_votes() {
    let s = setup().await;
    let instructor = Actor::Instructor;
    let voter = anna();
    let element = add_element(ActionContext::new(&s.engine, &instructor, &s.config), ElementKind::Poll, None)
        .await
        .unwrap();
    vote(ActionContext::new(&s.engine, &voter, &s.config), element.id, 1)
        .await
        .unwrap();

    let ctx = ActionContext::new(&s.engine, &instructor, &s.config);
    let too_few = vec!["solo".to_owned(), " ".to_owned()];
    let err = save_poll(ctx, element.id, "Domanda", &too_few, false).await.unwrap_err();
    assert!(matches!(err, BachecaError::ValidationFailed(_)));

    let options = vec!["Sì".to_owned(), "No".to_owned(), "Forse".to_owned()];
    save_poll(ctx, element.id, " Domanda? ", &options, true).await.unwrap();

    let ElementData::Poll(PollData { question, options, multiple_choice, votes }) = data_of(&s, element.id) else {
        panic!("expected poll");
    };
    assert_eq!(question, "Domanda?");
    assert_eq!(options.len(), 3);
    assert!(multiple_choice);
    assert!(poll::has_voted(&votes, "Anna", 1));
}

#[tokio::test]
async fn vote_on_others_poll_but_not_when_locked() {
    let s = setup().await;
    let instructor = Actor::Instructor;
    let voter = mario();
    let element = add_element(ActionContext::new(&s.engine, &instructor, &s.config), ElementKind::Poll, None)
        .await
        .unwrap();

    vote(ActionContext::new(&s.engine, &voter, &s.config), element.id, 0)
        .await
        .unwrap();
    vote(ActionContext::new(&s.engine, &voter, &s.config), element.id, 1)
        .await
        .unwrap();
    let ElementData::Poll(data) = data_of(&s, element.id) else { panic!("expected poll") };
    assert!(!poll::has_voted(&data.votes, "Mario", 0));
    assert!(poll::has_voted(&data.votes, "Mario", 1));

    let locked = BoardConfig { is_locked: true, ..s.config };
    let err = vote(ActionContext::new(&s.engine, &voter, &locked), element.id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BachecaError::PermissionDenied(_)));

    let postit = add_element(ActionContext::new(&s.engine, &voter, &s.config), ElementKind::PostIt, None)
        .await
        .unwrap();
    let err = vote(ActionContext::new(&s.engine, &voter, &s.config), postit.id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BachecaError::ValidationFailed(_)));
}

#[tokio::test]
async fn one_response_per_participant() {
    let s = setup().await;
    let instructor = Actor::Instructor;
    let participant = mario();
    let element = add_element(ActionContext::new(&s.engine, &instructor, &s.config), ElementKind::Exercise, None)
        .await
        .unwrap();

    let ctx = ActionContext::new(&s.engine, &participant, &s.config);
    assert!(submit_response(ctx, element.id, "  ").await.is_err());
    submit_response(ctx, element.id, " la mia risposta ").await.unwrap();
    let err = submit_response(ctx, element.id, "ancora").await.unwrap_err();
    assert!(matches!(err, BachecaError::ValidationFailed(_)));

    let ctx = ActionContext::new(&s.engine, &instructor, &s.config);
    submit_response(ctx, element.id, "prima").await.unwrap();
    submit_response(ctx, element.id, "seconda").await.unwrap();

    let ElementData::Exercise(data) = data_of(&s, element.id) else { panic!("expected exercise") };
    let authors: Vec<&str> = data.responses.iter().map(|r| r.author.as_str()).collect();
    assert_eq!(authors, vec!["Mario", "formatore", "formatore"]);
    assert_eq!(data.responses[0].text, "la mia risposta");
}

#[tokio::test]
async fn exercise_question_is_owner_edit() {
    let s = setup().await;
    let instructor = Actor::Instructor;
    let participant = mario();
    let element = add_element(ActionContext::new(&s.engine, &instructor, &s.config), ElementKind::Exercise, None)
        .await
        .unwrap();

    assert!(
        save_exercise_question(ActionContext::new(&s.engine, &participant, &s.config), element.id, "x")
            .await
            .is_err()
    );
    save_exercise_question(ActionContext::new(&s.engine, &instructor, &s.config), element.id, " Spiega ")
        .await
        .unwrap();
    let ElementData::Exercise(data) = data_of(&s, element.id) else { panic!("expected exercise") };
    assert_eq!(data.question, "Spiega");
}

#[test]
fn normalize_url_prefixes_missing_scheme() {
    assert_eq!(normalize_url("esempio.com"), "https://esempio.com");
    assert_eq!(normalize_url(" http://esempio.com "), "http://esempio.com");
    assert_eq!(normalize_url("HTTPS://Esempio.com"), "HTTPS://Esempio.com");
}

#[tokio::test]
async fn save_link_defaults_title() {
    let s = setup().await;
    let instructor = Actor::Instructor;
    let ctx = ActionContext::new(&s.engine, &instructor, &s.config);
    let element = add_element(ctx, ElementKind::Link, None).await.unwrap();

    assert!(save_link(ctx, element.id, "  ", "x").await.is_err());
    save_link(ctx, element.id, "rust-lang.org", "   ").await.unwrap();

    let ElementData::Link(data) = data_of(&s, element.id) else { panic!("expected link") };
    assert_eq!(data.url, "https://rust-lang.org");
    assert_eq!(data.title, "Link");
}

#[tokio::test]
async fn unknown_element_is_not_found() {
    let s = setup().await;
    let actor = mario();
    let err = vote(ActionContext::new(&s.engine, &actor, &s.config), Uuid::new_v4(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BachecaError::ElementNotFound(_)));
}
