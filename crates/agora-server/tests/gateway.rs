use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use agora_db::Database;
use agora_gateway::{ChatService, SessionRegistry};
use agora_types::events::ServerEvent;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    chat: ChatService,
    ana: i64,
    bruno: i64,
    carla: i64,
}

async fn start() -> Server {
    let db = Database::open_in_memory().unwrap();
    let ana = db.create_user("Ana", "ana@example.com", "hash", None).unwrap().id;
    let bruno = db.create_user("Bruno", "bruno@example.com", "hash", None).unwrap().id;
    let carla = db.create_user("Carla", "carla@example.com", "hash", None).unwrap().id;
    let chat = ChatService::new(Arc::new(db), SessionRegistry::new());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = agora_server::router(chat.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        addr,
        chat,
        ana,
        bruno,
        carla,
    }
}

async fn connect(server: &Server) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/gateway", server.addr))
        .await
        .unwrap();
    ws
}

async fn emit(ws: &mut Client, event: Value) {
    ws.send(Message::Text(event.to_string().into())).await.unwrap();
}

async fn next_event(ws: &mut Client) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Client) {
    let waited = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(waited.is_err(), "unexpected frame: {waited:?}");
}

async fn login(server: &Server, user_id: i64) -> Client {
    let mut ws = connect(server).await;
    emit(&mut ws, json!({ "type": "authenticate", "data": { "userId": user_id } })).await;
    assert_eq!(
        next_event(&mut ws).await,
        ServerEvent::Authenticated {
            success: true,
            user_id: Some(user_id),
        }
    );
    ws
}

#[tokio::test]
async fn message_fans_out_to_both_participants() {
    let server = start().await;
    let conv = server
        .chat
        .find_or_create_direct(server.ana, server.bruno)
        .await
        .unwrap();

    let mut ana = login(&server, server.ana).await;
    let mut bruno = login(&server, server.bruno).await;
    let mut carla = login(&server, server.carla).await;

    emit(
        &mut ana,
        json!({ "type": "send_message", "data": { "conversationId": conv, "content": "hi" } }),
    )
    .await;

    for ws in [&mut ana, &mut bruno] {
        match next_event(ws).await {
            ServerEvent::NewMessage(message) => {
                assert_eq!(message.conversation_id, conv);
                assert_eq!(message.sender_id, server.ana);
                assert_eq!(message.content, "hi");
                assert_eq!(message.sender_name.as_deref(), Some("Ana"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_silent(&mut carla).await;

    emit(
        &mut bruno,
        json!({ "type": "mark_as_read", "data": { "conversationId": conv } }),
    )
    .await;
    let read = ServerEvent::MessagesRead {
        conversation_id: conv,
        user_id: server.bruno,
    };
    assert_eq!(next_event(&mut ana).await, read);
    assert_eq!(next_event(&mut bruno).await, read);

    let list = server.chat.list_conversations(server.bruno).await.unwrap();
    assert_eq!(list[0].unread_count, 0);
}

#[tokio::test]
async fn typing_is_relayed_to_the_room_including_sender() {
    let server = start().await;
    let conv = server
        .chat
        .find_or_create_direct(server.ana, server.bruno)
        .await
        .unwrap();
    let mut ana = login(&server, server.ana).await;
    let mut bruno = login(&server, server.bruno).await;

    emit(&mut bruno, json!({ "type": "typing", "data": { "conversationId": conv } })).await;

    let typing = ServerEvent::UserTyping {
        conversation_id: conv,
        user_id: server.bruno,
    };
    assert_eq!(next_event(&mut ana).await, typing);
    assert_eq!(next_event(&mut bruno).await, typing);
}

#[tokio::test]
async fn legacy_field_names_are_accepted() {
    let server = start().await;
    let conv = server
        .chat
        .find_or_create_direct(server.ana, server.bruno)
        .await
        .unwrap();
    let mut ana = login(&server, server.ana).await;

    emit(
        &mut ana,
        json!({ "type": "send_message", "data": { "conversaId": conv, "conteudo": "oi" } }),
    )
    .await;

    match next_event(&mut ana).await {
        ServerEvent::NewMessage(message) => assert_eq!(message.content, "oi"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn joining_a_new_conversation_after_authenticate() {
    let server = start().await;
    let mut ana = login(&server, server.ana).await;
    let mut carla = login(&server, server.carla).await;

    let conv = server
        .chat
        .find_or_create_direct(server.ana, server.carla)
        .await
        .unwrap();

    // The typing echo confirms each join was processed.
    emit(&mut ana, json!({ "type": "join_conversation", "data": { "conversationId": conv } })).await;
    emit(&mut ana, json!({ "type": "typing", "data": { "conversationId": conv } })).await;
    assert!(matches!(next_event(&mut ana).await, ServerEvent::UserTyping { .. }));

    emit(&mut carla, json!({ "type": "join_conversation", "data": { "conversationId": conv } })).await;
    emit(&mut carla, json!({ "type": "typing", "data": { "conversationId": conv } })).await;
    let carla_typing = ServerEvent::UserTyping {
        conversation_id: conv,
        user_id: server.carla,
    };
    assert_eq!(next_event(&mut carla).await, carla_typing);
    assert_eq!(next_event(&mut ana).await, carla_typing);

    emit(
        &mut carla,
        json!({ "type": "send_message", "data": { "conversationId": conv, "content": "olá" } }),
    )
    .await;
    assert!(matches!(next_event(&mut ana).await, ServerEvent::NewMessage(_)));

    emit(&mut ana, json!({ "type": "leave_conversation", "data": { "conversationId": conv } })).await;
    emit(&mut ana, json!({ "type": "typing", "data": { "conversationId": conv } })).await;
    assert!(matches!(next_event(&mut carla).await, ServerEvent::NewMessage(_)));
    assert!(matches!(next_event(&mut carla).await, ServerEvent::UserTyping { .. }));
    assert_silent(&mut ana).await;
}

#[tokio::test]
async fn errors_go_to_the_caller_and_keep_the_connection_open() {
    let server = start().await;
    let conv = server
        .chat
        .find_or_create_direct(server.ana, server.bruno)
        .await
        .unwrap();
    let mut ws = connect(&server).await;

    emit(
        &mut ws,
        json!({ "type": "send_message", "data": { "conversationId": conv, "content": "hi" } }),
    )
    .await;
    assert_eq!(next_event(&mut ws).await, ServerEvent::error("not authenticated"));

    ws.send(Message::Text("{not json".into())).await.unwrap();
    assert!(matches!(next_event(&mut ws).await, ServerEvent::ErrorMessage { .. }));

    emit(&mut ws, json!({ "type": "shout", "data": {} })).await;
    assert!(matches!(next_event(&mut ws).await, ServerEvent::ErrorMessage { .. }));

    emit(&mut ws, json!({ "type": "authenticate", "data": { "userId": 9999 } })).await;
    assert_eq!(
        next_event(&mut ws).await,
        ServerEvent::Authenticated {
            success: false,
            user_id: None,
        }
    );

    emit(&mut ws, json!({ "type": "authenticate", "data": { "userId": server.carla } })).await;
    assert!(matches!(
        next_event(&mut ws).await,
        ServerEvent::Authenticated { success: true, .. }
    ));

    emit(
        &mut ws,
        json!({ "type": "send_message", "data": { "conversationId": conv, "content": "hi" } }),
    )
    .await;
    assert!(matches!(next_event(&mut ws).await, ServerEvent::ErrorMessage { .. }));

    emit(&mut ws, json!({ "type": "send_message", "data": { "conversationId": conv } })).await;
    assert_eq!(next_event(&mut ws).await, ServerEvent::error("incomplete data"));
}

#[tokio::test]
async fn disconnect_releases_the_session() {
    let server = start().await;
    let conv = server
        .chat
        .find_or_create_direct(server.ana, server.bruno)
        .await
        .unwrap();
    let mut ana = login(&server, server.ana).await;
    assert_eq!(server.chat.registry().room_size(conv).await, 1);

    ana.close(None).await.unwrap();
    drop(ana);

    let mut remaining = usize::MAX;
    for _ in 0..50 {
        remaining = server.chat.registry().connection_count().await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
    assert_eq!(server.chat.registry().room_size(conv).await, 0);
}
