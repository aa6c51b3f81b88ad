use patchwright_core::{prompt::compose_prompt, Task, TaskItem};
use serde_json::json;

fn task(items: Vec<TaskItem>) -> Task {
    Task {
        id: 1,
        token: "abcdef".into(),
        title: "Fix a minor bug".into(),
        items,
    }
}

fn origin(comments: serde_json::Value) -> TaskItem {
    TaskItem {
        id: Some(9),
        kind: "origin".into(),
        data: json!({ "issueComments": comments }),
    }
}

#[test]
fn title_only() {
    assert_eq!(compose_prompt(&task(vec![])), "<title>Fix a minor bug</title>");
}

#[test]
fn single_message_becomes_description() {
    let prompt = compose_prompt(&task(vec![TaskItem::message("It does not work")]));
    assert_eq!(
        prompt,
        "<title>Fix a minor bug</title>\n<description>It does not work</description>"
    );
}

#[test]
fn descriptions_follow_item_order_and_skip_other_types() {
    let items = vec![
        TaskItem::message("first"),
        TaskItem {
            id: None,
            kind: "proposal".into(),
            data: json!({ "content": "not a description" }),
        },
        TaskItem::message("second"),
    ];
    assert_eq!(
        compose_prompt(&task(items)),
        "<title>Fix a minor bug</title>\n<description>first</description>\n<description>second</description>"
    );
}

#[test]
fn origin_comments_come_after_descriptions() {
    let items = vec![
        origin(json!([
            { "body": "Happens on mobile too", "userName": "alice" },
            { "body": "+1", "userName": "bob" }
        ])),
        TaskItem::message("It does not work"),
    ];
    assert_eq!(
        compose_prompt(&task(items)),
        "<title>Fix a minor bug</title>\n\
         <description>It does not work</description>\n\
         <comment author=\"alice\">Happens on mobile too</comment>\n\
         <comment author=\"bob\">+1</comment>"
    );
}

#[test]
fn only_first_origin_is_consulted() {
    let items = vec![
        origin(json!([{ "body": "from first", "userName": "a" }])),
        origin(json!([{ "body": "from second", "userName": "b" }])),
    ];
    let prompt = compose_prompt(&task(items));
    assert!(prompt.contains("from first"));
    assert!(!prompt.contains("from second"));
}

#[test]
fn origin_without_comments_adds_nothing() {
    let items = vec![TaskItem {
        id: None,
        kind: "origin".into(),
        data: json!({ "issueNumber": 12 }),
    }];
    assert_eq!(compose_prompt(&task(items)), "<title>Fix a minor bug</title>");
}

#[test]
fn message_without_content_is_an_empty_description() {
    let items = vec![TaskItem {
        id: None,
        kind: "message".into(),
        data: json!({}),
    }];
    assert_eq!(
        compose_prompt(&task(items)),
        "<title>Fix a minor bug</title>\n<description></description>"
    );
}

#[test]
fn composition_is_deterministic() {
    let t = task(vec![
        TaskItem::message("a"),
        origin(json!([{ "body": "b", "userName": "c" }])),
    ]);
    assert_eq!(compose_prompt(&t), compose_prompt(&t.clone()));
}
