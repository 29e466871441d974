mod helpers;

use helpers::{spike, test_db};
use pairstore::recall::RecallQuery;
use pairstore::{Agent, Error, FieldKind, FindQuery, ScalarKind, TypeDescriptor};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Serialize, Deserialize, JsonSchema)]
struct Ticket {
    title: String,
    priority: i64,
    labels: Vec<String>,
    reporter: Option<Person>,
}

#[derive(Serialize, Deserialize, JsonSchema)]
struct Person {
    name: String,
    email: Option<String>,
}

#[derive(Serialize, Deserialize, JsonSchema)]
struct Triage {
    team: String,
    urgent: bool,
}

#[test]
fn descriptors_derive_from_rust_types() {
    let descriptor = TypeDescriptor::of::<Ticket>().unwrap();
    let title = descriptor.field("title").unwrap();
    assert_eq!(title.kind, FieldKind::Scalar(ScalarKind::String));
    assert!(!title.optional);
    assert_eq!(
        descriptor.field("priority").unwrap().kind,
        FieldKind::integer()
    );
    assert!(descriptor.field("reporter").unwrap().optional);
    assert!(matches!(
        descriptor.field("reporter").unwrap().kind,
        FieldKind::Object(_)
    ));
}

#[test]
fn typed_records_round_trip_through_an_agent() {
    let mut conn = test_db();
    let agent = Agent::init(
        &mut conn,
        "tickets",
        TypeDescriptor::of::<Ticket>().unwrap(),
        TypeDescriptor::of::<Triage>().unwrap(),
        4,
    )
    .unwrap();

    let ticket = Ticket {
        title: "login page 500s".into(),
        priority: 1,
        labels: vec!["auth".into(), "web".into()],
        reporter: Some(Person {
            name: "Sam".into(),
            email: None,
        }),
    };
    let triage = Triage {
        team: "identity".into(),
        urgent: true,
    };
    let id = agent
        .store(
            &mut conn,
            &serde_json::to_value(&ticket).unwrap(),
            &serde_json::to_value(&triage).unwrap(),
        )
        .unwrap();
    agent.vectors().upsert(&conn, id, &spike(0, 4)).unwrap();

    let record = agent.get(&conn, id).unwrap();
    let back: Ticket = serde_json::from_value(serde_json::Value::Object(record.input)).unwrap();
    assert_eq!(back.title, ticket.title);
    assert_eq!(back.priority, 1);
    assert_eq!(back.labels, ticket.labels);
    assert_eq!(back.reporter.unwrap().name, "Sam");

    let urgent = agent
        .query(
            &conn,
            &FindQuery::new().output(pairstore::Filter::new().eq("urgent", true)),
        )
        .unwrap()
        .ids()
        .unwrap();
    assert_eq!(urgent, vec![id]);

    let hits = agent
        .recall_with_vector(
            &conn,
            &RecallQuery::by_input(helpers::payload(json!({"title": "login"}))),
            &spike(0, 4),
        )
        .unwrap();
    assert_eq!(hits[0].record.id, id);
}

#[test]
fn wrong_dimension_query_vectors_are_rejected() {
    let mut conn = test_db();
    let agent = helpers::qa_agent(&mut conn);
    let err = agent
        .recall_with_vector(
            &conn,
            &RecallQuery::by_input(helpers::payload(json!({"question": "q"}))),
            &spike(0, 3),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Dimension { .. }));
}

#[test]
fn unknown_fields_are_rejected_with_their_path() {
    let mut conn = test_db();
    let agent = helpers::qa_agent(&mut conn);
    let err = agent
        .store(
            &mut conn,
            &json!({"question": "q", "extra": 1}),
            &json!({"answer": "a"}),
        )
        .unwrap_err();
    match err {
        Error::Validation { path, .. } => assert_eq!(path, "extra"),
        other => panic!("unexpected error: {other}"),
    }
}
