use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use parlor_api::middleware::issue_token;
use parlor_api::notify::{Notification, Notifier};
use parlor_api::service::ChatService;
use parlor_api::state::AppStateInner;
use parlor_db::channels::{ChannelScope, NewChannel};
use parlor_db::messages::MessageScope;
use parlor_db::{ChatError, Database};
use parlor_gateway::dispatcher::Dispatcher;
use parlor_types::actor::Actor;
use parlor_types::api::{
    ChannelFilter, ChannelListRequest, CreateChannelRequest, MessageFilter, MessageListRequest,
    MessageSort, SendMessageRequest,
};
use parlor_types::models::{Channel, ChannelKind, ChannelState, MessageBody};
use parlor_types::pagination::PageArgs;

const SECRET: &str = "test-secret";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: Notification) -> BoxFuture<'_, anyhow::Result<()>> {
        self.sent.lock().unwrap().push(notification);
        Box::pin(async { Ok(()) })
    }
}

struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn send(&self, _notification: Notification) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Err(anyhow::anyhow!("notification service down")) })
    }
}

struct Harness {
    service: ChatService,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    Harness {
        service: service_with(notifier.clone()),
        notifier,
    }
}

fn service_with(notifier: Arc<dyn Notifier>) -> ChatService {
    let db = Arc::new(Database::open_in_memory().unwrap());
    ChatService::new(db, Dispatcher::new(64), notifier, Duration::from_secs(2))
}

async fn member(service: &ChatService, name: &str) -> Actor {
    let actor = Actor::member(Uuid::new_v4(), name);
    service.ensure_user(&actor).await.unwrap();
    actor
}

async fn admin(service: &ChatService) -> Actor {
    let actor = Actor::admin(Uuid::new_v4(), "root");
    service.ensure_user(&actor).await.unwrap();
    actor
}

fn room(service: &ChatService, creator: &Actor, members: &[&Actor]) -> Channel {
    let new = NewChannel {
        name: Some("general".into()),
        kind: ChannelKind::Room,
        is_visible: true,
    };
    let ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();
    service.db().create_channel(&new, Some(creator.id), &ids).unwrap()
}

fn text(channel: &Channel, body: &str) -> SendMessageRequest {
    SendMessageRequest {
        channel_id: channel.id,
        body: MessageBody::text(body),
    }
}

fn all_messages(service: &ChatService) -> i64 {
    service
        .db()
        .count_messages(MessageScope::All, &MessageFilter::default())
        .unwrap()
}

#[tokio::test]
async fn send_needs_an_active_channel_with_two_members() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let root = admin(&h.service).await;

    let lonely = room(&h.service, &a, &[]);
    let err = h.service.send_message(&a, text(&lonely, "hi")).await.unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));

    let channel = room(&h.service, &a, &[&b]);
    h.service.set_channel_state(&root, channel.id, ChannelState::Inactive).await.unwrap();
    let err = h.service.send_message(&a, text(&channel, "hi")).await.unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));

    assert_eq!(all_messages(&h.service), 0);
}

#[tokio::test]
async fn only_admins_change_channel_state() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let channel = room(&h.service, &a, &[&b]);

    let err = h
        .service
        .set_channel_state(&a, channel.id, ChannelState::Inactive)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
}

#[tokio::test]
async fn leaving_twice_fails_the_second_time() {
    let h = harness();
    let (a, b, c) = (
        member(&h.service, "a").await,
        member(&h.service, "b").await,
        member(&h.service, "c").await,
    );
    let channel = room(&h.service, &a, &[&b, &c]);

    h.service.leave_channel(&b, channel.id).await.unwrap();
    let before = h.service.db().channel_participants(channel.id).unwrap();

    let err = h.service.leave_channel(&b, channel.id).await.unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));
    assert_eq!(h.service.db().channel_participants(channel.id).unwrap(), before);
}

#[tokio::test]
async fn unread_follows_read_all() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let channel = room(&h.service, &a, &[&b]);

    h.service.send_message(&a, text(&channel, "hi")).await.unwrap();
    assert_eq!(h.service.unread_count(&b, channel.id).await.unwrap(), 1);

    h.service.read_all_messages(&b, channel.id).await.unwrap();
    assert_eq!(h.service.unread_count(&b, channel.id).await.unwrap(), 0);

    h.service.send_message(&a, text(&channel, "there")).await.unwrap();
    assert_eq!(h.service.unread_count(&b, channel.id).await.unwrap(), 1);
    assert_eq!(h.service.unread_count(&a, channel.id).await.unwrap(), 0);

    let view = h.service.get_channel(&b, channel.id).await.unwrap();
    assert_eq!(view.unread_count, 1);
    assert_eq!(view.participants.len(), 2);
}

#[tokio::test]
async fn outsiders_are_forbidden_admins_are_not() {
    let h = harness();
    let (a, b, u) = (
        member(&h.service, "a").await,
        member(&h.service, "b").await,
        member(&h.service, "u").await,
    );
    let root = admin(&h.service).await;
    let channel = room(&h.service, &a, &[&b]);

    let err = h.service.get_channel(&u, channel.id).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
    assert_eq!(h.service.get_channel(&root, channel.id).await.unwrap().channel.id, channel.id);

    let err = h.service.get_channel(&u, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn sending_to_a_missing_channel_creates_nothing() {
    let h = harness();
    let a = member(&h.service, "a").await;
    let req = SendMessageRequest {
        channel_id: Uuid::new_v4(),
        body: MessageBody::text("hi"),
    };

    let err = h.service.send_message(&a, req).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
    assert_eq!(all_messages(&h.service), 0);
}

#[tokio::test]
async fn blocks_hide_messages_in_listings_and_realtime() {
    let h = harness();
    let (a, b, c) = (
        member(&h.service, "a").await,
        member(&h.service, "b").await,
        member(&h.service, "c").await,
    );
    let channel = room(&h.service, &c, &[&a, &b]);

    h.service.send_message(&b, text(&channel, "from b")).await.unwrap();
    h.service.send_message(&c, text(&channel, "from c")).await.unwrap();
    h.service.block_user(&a, b.id).await.unwrap();

    let page = h
        .service
        .list_messages_by_channel(&a, channel.id, MessageListRequest::default())
        .await
        .unwrap();
    let authors: Vec<Option<Uuid>> = page.nodes().map(|v| v.message.author_id).collect();
    assert_eq!(authors, vec![Some(c.id)]);
    assert_eq!(page.nodes().next().unwrap().author.as_ref().unwrap().username, "c");

    // The blocked side sees no content from the blocker either.
    let mut stream = h.service.on_message_received(&b, channel.id).await.unwrap();
    h.service.send_message(&a, text(&channel, "from a")).await.unwrap();
    h.service.send_message(&c, text(&channel, "from c again")).await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.author_id, Some(c.id));
}

#[tokio::test]
async fn reading_a_blocked_users_message_is_rejected() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let channel = room(&h.service, &a, &[&b]);
    let sent = h.service.send_message(&b, text(&channel, "hi")).await.unwrap();

    h.service.block_user(&a, b.id).await.unwrap();
    let err = h.service.get_message(&a, sent.id).await.unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));

    h.service.unblock_user(&a, b.id).await.unwrap();
    let view = h.service.get_message(&a, sent.id).await.unwrap();
    assert_eq!(view.author.unwrap().id, b.id);
}

#[tokio::test]
async fn admin_listing_bypasses_membership() {
    let h = harness();
    let (a, b, u) = (
        member(&h.service, "a").await,
        member(&h.service, "b").await,
        member(&h.service, "u").await,
    );
    let root = admin(&h.service).await;
    let channel = room(&h.service, &a, &[&b]);

    let req = ChannelListRequest {
        with_total_count: true,
        ..Default::default()
    };
    let page = h.service.list_channels_admin(&root, req.clone()).await.unwrap();
    assert_eq!(page.nodes().map(|v| v.channel.id).collect::<Vec<_>>(), vec![channel.id]);
    assert_eq!(page.total_count, Some(1));

    let mine = h.service.list_my_channels(&u, req.clone()).await.unwrap();
    assert!(mine.edges.is_empty());

    let err = h.service.list_channels_admin(&u, req).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
}

#[tokio::test]
async fn channel_pages_concatenate_to_the_full_listing() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let mut expected: Vec<Uuid> = (0..7).map(|_| room(&h.service, &a, &[&b]).id).collect();
    expected.reverse();

    let mut seen = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let mut page = PageArgs::first(3);
        page.after = after.clone();
        let req = ChannelListRequest {
            page,
            ..Default::default()
        };
        let result = h.service.list_my_channels(&a, req).await.unwrap();
        seen.extend(result.nodes().map(|v| v.channel.id));
        if !result.page_info.has_next_page {
            break;
        }
        after = result.page_info.end_cursor;
    }
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn notifications_go_to_other_participants() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let channel = room(&h.service, &a, &[&b]);

    h.service.send_message(&a, text(&channel, "hi")).await.unwrap();

    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec![b.id]);
    assert_eq!(sent[0].relation_id, channel.id);
    assert_eq!(sent[0].message, "hi");
}

#[tokio::test]
async fn notifications_skip_block_related_participants() {
    let h = harness();
    let (a, b, c) = (
        member(&h.service, "a").await,
        member(&h.service, "b").await,
        member(&h.service, "c").await,
    );
    let channel = room(&h.service, &a, &[&b, &c]);
    h.service.block_user(&a, b.id).await.unwrap();

    h.service.send_message(&a, text(&channel, "secret from a")).await.unwrap();
    h.service.send_message(&b, text(&channel, "secret from b")).await.unwrap();

    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].recipients, vec![c.id]);
    assert_eq!(sent[1].recipients, vec![c.id]);
}

#[tokio::test]
async fn failed_notification_keeps_the_message() {
    let service = service_with(Arc::new(FailingNotifier));
    let (a, b) = (member(&service, "a").await, member(&service, "b").await);
    let channel = room(&service, &a, &[&b]);

    let message = service.send_message(&a, text(&channel, "hi")).await.unwrap();
    assert!(service.db().find_message(message.id).unwrap().is_some());
}

#[tokio::test]
async fn system_messages_are_admin_only() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let root = admin(&h.service).await;
    let channel = room(&h.service, &a, &[&b]);
    let system = || SendMessageRequest {
        channel_id: channel.id,
        body: MessageBody::System {
            event: "renamed".into(),
            data: None,
        },
    };

    let err = h.service.send_message(&a, system()).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));

    let message = h.service.send_message(&root, system()).await.unwrap();
    assert_eq!(message.author_id, None);
}

#[tokio::test]
async fn dm_channels_are_reused() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);

    let first = h.service.create_dm_channel(&a, b.id).await.unwrap();
    let again = h.service.create_dm_channel(&b, a.id).await.unwrap();
    assert_eq!(first.channel.id, again.channel.id);
    assert_eq!(first.channel.kind, ChannelKind::Dm);

    let err = h.service.create_dm_channel(&a, a.id).await.unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));

    let c = member(&h.service, "c").await;
    h.service.block_user(&c, a.id).await.unwrap();
    let err = h.service.create_dm_channel(&a, c.id).await.unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dm_requests_share_one_channel() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let service = h.service.clone();
        let (me, other) = if i % 2 == 0 { (a.clone(), b.id) } else { (b.clone(), a.id) };
        tasks.push(tokio::spawn(async move { service.create_dm_channel(&me, other).await }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().channel.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let total = h
        .service
        .db()
        .count_channels(ChannelScope::Admin(a.id), &ChannelFilter::default())
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn members_join_open_rooms_only() {
    let h = harness();
    let (a, b, u) = (
        member(&h.service, "a").await,
        member(&h.service, "b").await,
        member(&h.service, "u").await,
    );
    let root = admin(&h.service).await;

    let open = room(&h.service, &a, &[&b]);
    h.service.join_channel(&u, open.id).await.unwrap();
    let err = h.service.join_channel(&u, open.id).await.unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));

    let hidden = h
        .service
        .create_channel_admin(
            &root,
            CreateChannelRequest {
                name: None,
                kind: ChannelKind::Room,
                is_visible: false,
                member_ids: vec![a.id],
            },
        )
        .await
        .unwrap();
    let err = h.service.join_channel(&u, hidden.id).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
}

#[tokio::test]
async fn only_authors_delete_their_messages() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let root = admin(&h.service).await;
    let channel = room(&h.service, &a, &[&b]);
    let first = h.service.send_message(&a, text(&channel, "one")).await.unwrap();
    let second = h.service.send_message(&a, text(&channel, "two")).await.unwrap();

    let err = h.service.delete_message(&b, first.id).await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));

    h.service.delete_message(&a, first.id).await.unwrap();
    assert_eq!(h.service.delete_messages(&root, vec![second.id]).await.unwrap(), 1);
    assert_eq!(all_messages(&h.service), 0);
}

#[tokio::test]
async fn soft_deleted_channels_can_be_purged() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let root = admin(&h.service).await;
    let channel = room(&h.service, &a, &[&b]);

    let err = h.service.purge_channels(&root, vec![channel.id]).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));

    assert_eq!(h.service.delete_channels(&root, vec![channel.id]).await.unwrap(), 1);
    let err = h.service.get_channel(&a, channel.id).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));

    assert_eq!(h.service.purge_channels(&root, vec![channel.id]).await.unwrap(), 1);
}

#[tokio::test]
async fn oldest_first_sort_is_honoured() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let channel = room(&h.service, &a, &[&b]);
    h.service.send_message(&a, text(&channel, "1")).await.unwrap();
    h.service.send_message(&b, text(&channel, "2")).await.unwrap();

    let req = MessageListRequest {
        sort: MessageSort::CreatedAtAsc,
        ..Default::default()
    };
    let page = h.service.list_messages_by_channel(&a, channel.id, req).await.unwrap();
    let texts: Vec<&str> = page.nodes().filter_map(|v| v.message.body.text_content()).collect();
    assert_eq!(texts, vec!["1", "2"]);
}

// -- HTTP surface --

async fn call(app: axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn app(service: ChatService) -> axum::Router {
    parlor_api::router(Arc::new(AppStateInner {
        service,
        jwt_secret: SECRET.into(),
    }))
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let h = harness();
    let request = Request::builder().uri("/channels").body(Body::empty()).unwrap();
    let (status, body) = call(app(h.service), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn non_bearer_authorization_is_unauthorized() {
    let h = harness();
    for value in ["Basic YTpi", "Bearer", "garbage"] {
        let request = Request::builder()
            .uri("/channels")
            .header("authorization", value)
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(app(h.service.clone()), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", value);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn http_errors_carry_their_code() {
    let h = harness();
    let actor = Actor::member(Uuid::new_v4(), "ana");
    let token = issue_token(&actor, SECRET, Duration::from_secs(60)).unwrap();

    let payload = serde_json::json!({ "channel_id": Uuid::new_v4(), "type": "TEXT", "text": "hi" });
    let request = Request::builder()
        .method("POST")
        .uri("/messages")
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = call(app(h.service.clone()), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    // The middleware mirrored the caller into the directory.
    assert!(h.service.db().find_user(actor.id).unwrap().is_some());
}

#[tokio::test]
async fn http_lists_my_channels() {
    let h = harness();
    let (a, b) = (member(&h.service, "a").await, member(&h.service, "b").await);
    let channel = room(&h.service, &a, &[&b]);
    let token = issue_token(&a, SECRET, Duration::from_secs(60)).unwrap();

    let request = Request::builder()
        .uri("/channels?first=5&with_total_count=true&kind=ROOM")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(app(h.service), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["edges"][0]["node"]["id"], channel.id.to_string());
    assert_eq!(body["page_info"]["has_next_page"], false);
}
