use super::*;
use crate::test_support::{api_over, messages_body, private_message, user_json, ScriptedTransport};
use crate::gateway::GatewayRequest;
use shared::domain::MessageId;

fn query_pairs(path_and_query: &str) -> Vec<(String, String)> {
    let (_, query) = path_and_query.split_once('?').expect("query string");
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn posted_form(transport: &ScriptedTransport) -> Vec<(String, String)> {
    match transport.calls().pop() {
        Some(GatewayRequest::Post { path, form }) => {
            assert_eq!(path, "/messages");
            form
        }
        other => panic!("expected a post, got {other:?}"),
    }
}

#[test]
fn messages_path_carries_paging_and_narrow() {
    let narrow = Narrow::topic("general", "greetings");
    let path = messages_path(
        &narrow,
        FetchOptions {
            anchor: Anchor::Id(MessageId(120)),
            before: 50,
            after: 0,
            apply_markdown: true,
        },
    );

    assert!(path.starts_with("/messages?"));
    let pairs = query_pairs(&path);
    let get = |key: &str| {
        pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
            .expect(key)
    };
    assert_eq!(get("anchor"), "120");
    assert_eq!(get("num_before"), "50");
    assert_eq!(get("num_after"), "0");
    assert_eq!(get("client_gravatar"), "true");
    assert_eq!(get("apply_markdown"), "true");
    let narrow_json: Value = serde_json::from_str(&get("narrow")).expect("narrow json");
    assert_eq!(
        narrow_json,
        json!([
            { "operator": "stream", "operand": "general" },
            { "operator": "topic", "operand": "greetings" }
        ])
    );
}

#[test]
fn default_fetch_is_newest_page() {
    let pairs = query_pairs(&messages_path(&Narrow::all(), FetchOptions::default()));
    assert!(pairs.contains(&("anchor".to_string(), "newest".to_string())));
    assert!(pairs.contains(&("num_before".to_string(), FEED_PAGE_SIZE.to_string())));
    assert!(pairs.contains(&("narrow".to_string(), "[]".to_string())));
}

#[tokio::test]
async fn stream_send_defaults_the_topic() {
    let transport = ScriptedTransport::ok(json!({ "result": "success", "id": 99 }));
    let api = api_over(transport.clone());

    let response = api
        .send_message(
            &SendTarget::Stream {
                stream: "general".into(),
                topic: Some("   ".into()),
            },
            "hello",
        )
        .await
        .expect("send");

    assert_eq!(response.id, MessageId(99));
    assert_eq!(
        posted_form(&transport),
        vec![
            ("type".to_string(), "stream".to_string()),
            ("to".to_string(), "general".to_string()),
            ("topic".to_string(), DEFAULT_TOPIC.to_string()),
            ("content".to_string(), "hello".to_string()),
        ]
    );
}

#[tokio::test]
async fn direct_send_encodes_recipients_as_json_list() {
    let transport = ScriptedTransport::ok(json!({ "result": "success", "id": 5 }));
    let api = api_over(transport.clone());

    api.send_message(
        &SendTarget::Direct {
            recipients: vec!["bob@example.com".into(), " cy@example.com ".into()],
        },
        "psst",
    )
    .await
    .expect("send");

    let form = posted_form(&transport);
    assert_eq!(form[0], ("type".to_string(), "private".to_string()));
    assert_eq!(
        form[1],
        (
            "to".to_string(),
            r#"["bob@example.com","cy@example.com"]"#.to_string()
        )
    );
}

#[tokio::test]
async fn send_without_destination_is_refused_locally() {
    let transport = ScriptedTransport::ok(json!({ "result": "success", "id": 1 }));
    let api = api_over(transport.clone());

    let err = api
        .send_message(&SendTarget::Direct { recipients: vec![] }, "x")
        .await
        .expect_err("no recipients");

    assert!(matches!(err, ClientError::Decode(_)));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn upload_reference_falls_back_between_uri_and_url() {
    let transport = ScriptedTransport::ok(json!({ "result": "success", "uri": "/user_uploads/1/a/cat.png" }));
    let api = api_over(transport);

    let uploaded = api.upload_file("cat.png", vec![1, 2, 3]).await.expect("upload");
    assert_eq!(uploaded.uri, "/user_uploads/1/a/cat.png");
    assert_eq!(uploaded.url, "/user_uploads/1/a/cat.png");
    assert_eq!(uploaded.filename, "cat.png");

    let transport = ScriptedTransport::ok(json!({ "result": "success" }));
    let err = api_over(transport)
        .upload_file("cat.png", vec![1])
        .await
        .expect_err("no reference");
    assert!(matches!(err, ClientError::UploadRejected { .. }));
}

#[tokio::test]
async fn user_lookup_by_email_is_url_encoded() {
    let transport = ScriptedTransport::ok(json!({
        "result": "success",
        "user": user_json(3, "Bob", "bob+chat@example.com")
    }));
    let api = api_over(transport.clone());

    let user = api
        .get_user_by_email("bob+chat@example.com")
        .await
        .expect("user");

    assert_eq!(user.full_name, "Bob");
    assert_eq!(
        transport.calls(),
        vec![GatewayRequest::Get {
            path_and_query: "/users/bob%2Bchat%40example.com".to_string()
        }]
    );
}

#[tokio::test]
async fn user_lookup_by_id_uses_the_numeric_path() {
    let transport = ScriptedTransport::ok(json!({
        "result": "success",
        "user": user_json(9, "Cy", "cy@example.com")
    }));
    let api = api_over(transport.clone());

    let user = api.get_user(UserId(9)).await.expect("user");

    assert_eq!(user.user_id, UserId(9));
    assert_eq!(user.email, "cy@example.com");
    assert_eq!(
        transport.calls(),
        vec![GatewayRequest::Get {
            path_and_query: "/users/9".to_string()
        }]
    );
}

#[tokio::test]
async fn recent_direct_messages_keep_newest_per_partner() {
    let page = vec![
        private_message(10, 2, "bob@example.com"),
        private_message(14, 3, "cy@example.com"),
        private_message(12, 2, "bob@example.com"),
        private_message(11, 3, "cy@example.com"),
    ];
    let transport = ScriptedTransport::ok(messages_body(&page));
    let api = api_over(transport.clone());

    let recent = api.recent_direct_messages().await.expect("recent");

    let ids = recent.iter().map(|message| message.id.0).collect::<Vec<_>>();
    assert_eq!(ids, vec![14, 12]);
    match &transport.calls()[0] {
        GatewayRequest::Get { path_and_query } => {
            assert!(query_pairs(path_and_query).contains(&(
                "narrow".to_string(),
                r#"[{"operator":"is","operand":"private"}]"#.to_string()
            )));
        }
        other => panic!("unexpected request: {other:?}"),
    }
}

#[tokio::test]
async fn listing_endpoints_decode_their_envelopes() {
    let transport = ScriptedTransport::new(|request| {
        let GatewayRequest::Get { path_and_query } = request else {
            return Ok(json!({}));
        };
        Ok(match path_and_query.as_str() {
            "/streams" => json!({ "result": "success", "streams": [{ "stream_id": 4, "name": "dev" }] }),
            "/users/me/4/topics" => json!({ "result": "success", "topics": [{ "name": "build", "max_id": 88 }] }),
            "/users" => json!({ "result": "success", "members": [user_json(1, "Ada", "ada@example.com")] }),
            "/realm/presence" => json!({
                "result": "success",
                "server_timestamp": 10.0,
                "presences": { "ada@example.com": { "aggregated": { "status": "idle", "timestamp": 9 } } }
            }),
            _ => json!({ "result": "success" }),
        })
    });
    let api = api_over(transport);

    let streams = api.list_streams().await.expect("streams");
    assert_eq!(streams[0].name, "dev");
    let topics = api.list_topics(streams[0].stream_id).await.expect("topics");
    assert_eq!(topics[0].max_id, MessageId(88));
    let users = api.list_users().await.expect("users");
    assert_eq!(users[0].email, "ada@example.com");
    let presence = api.realm_presence().await.expect("presence");
    assert_eq!(
        presence.status_of("ada@example.com"),
        shared::protocol::PresenceStatus::Idle
    );
}
