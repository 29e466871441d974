mod helpers;

use helpers::{payload, qa_agent, test_db, BrokenEmbedder, KeywordEmbedder};
use pairstore::{Agent, Error, Filter, FindQuery, RecallQuery};
use rusqlite::Connection;
use serde_json::json;

/// Stores four records; returns their ids in insertion order.
fn seed(conn: &mut Connection, agent: &Agent) -> Vec<i64> {
    [
        ("what is the sum of 2 and 2", "math", "4"),
        ("capital of france", "geo", "Paris"),
        ("sum of 3 and 3", "math", "6"),
        ("weather tomorrow", "misc", "rain"),
    ]
    .iter()
    .map(|(q, topic, a)| {
        agent
            .store_embedded(
                conn,
                &json!({"question": q, "topic": topic}),
                &json!({"answer": a}),
                &KeywordEmbedder,
            )
            .unwrap()
    })
    .collect()
}

#[test]
fn closest_records_come_first() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    let ids = seed(&mut conn, &agent);

    let query = RecallQuery::by_input(payload(json!({"question": "capital of france?"}))).k(2);
    let hits = agent.recall(&conn, &query, &KeywordEmbedder).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.id, ids[1]);
    assert!(hits[0].score > hits[1].score);
}

#[test]
fn equal_scores_break_ties_by_smaller_id() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    let ids = seed(&mut conn, &agent);

    // Both math records share the "math" and "sum" keywords, and so embed identically.
    let query = RecallQuery::by_input(payload(json!({"question": "sum", "topic": "math"})))
        .k(2);
    let hits = agent.recall(&conn, &query, &KeywordEmbedder).unwrap();
    let got: Vec<_> = hits.iter().map(|h| h.record.id).collect();
    assert_eq!(got, vec![ids[0], ids[2]]);
    assert_eq!(hits[0].score, hits[1].score);
}

#[test]
fn fragment_fields_rank_but_never_filter() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    let ids = seed(&mut conn, &agent);

    // No record has topic "geo" alongside a sum question; the fragment still finds them.
    let query =
        RecallQuery::by_input(payload(json!({"question": "sum of 3 and 3", "topic": "geo"}))).k(4);
    let hits = agent.recall(&conn, &query, &KeywordEmbedder).unwrap();
    assert_eq!(hits.len(), 4);
    assert!([ids[0], ids[2]].contains(&hits[0].record.id));
    assert_eq!(hits[0].record.input["topic"], "math");

    let narrowed = query.filter(FindQuery::new().input(Filter::new().eq("topic", "geo")));
    let hits = agent.recall(&conn, &narrowed, &KeywordEmbedder).unwrap();
    let got: Vec<_> = hits.iter().map(|h| h.record.id).collect();
    assert_eq!(got, vec![ids[1]]);
}

#[test]
fn k_bounds_the_result_count() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    seed(&mut conn, &agent);

    let base = RecallQuery::by_input(payload(json!({"question": "anything"})));
    for k in [0, 1, 3, 10] {
        let hits = agent
            .recall(&conn, &base.clone().k(k), &KeywordEmbedder)
            .unwrap();
        assert_eq!(hits.len(), k.min(4));
    }
}

#[test]
fn filters_select_the_candidates() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    let ids = seed(&mut conn, &agent);

    // The closest record overall is excluded by the filter; k counts filtered records.
    let query = RecallQuery::by_input(payload(json!({"question": "capital of france"})))
        .filter(FindQuery::new().input(Filter::new().eq("topic", "math")))
        .k(5);
    let hits = agent.recall(&conn, &query, &KeywordEmbedder).unwrap();
    let got: Vec<_> = hits.iter().map(|h| h.record.id).collect();
    assert_eq!(got, vec![ids[0], ids[2]]);
}

#[test]
fn recall_by_output_embeds_the_output() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    seed(&mut conn, &agent);

    let query = RecallQuery::by_output(payload(json!({"answer": "weather"}))).k(1);
    let hits = agent.recall(&conn, &query, &KeywordEmbedder).unwrap();
    assert_eq!(hits[0].record.output["answer"], "rain");
}

#[test]
fn deleted_and_superseded_records_are_not_recalled() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    let ids = seed(&mut conn, &agent);

    agent.delete(&mut conn, ids[1]).unwrap();
    let edited = agent
        .edit(&mut conn, ids[0], None, Some(&json!({"answer": "four"})))
        .unwrap();
    agent.embed_record(&conn, edited, &KeywordEmbedder).unwrap();

    let query = RecallQuery::by_input(payload(json!({"question": "sum capital france"}))).k(10);
    let hits = agent.recall(&conn, &query, &KeywordEmbedder).unwrap();
    let got: Vec<_> = hits.iter().map(|h| h.record.id).collect();
    assert!(!got.contains(&ids[1]));
    assert!(!got.contains(&ids[0]));
    assert!(got.contains(&edited));
}

#[test]
fn embedding_failure_fails_the_recall() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    seed(&mut conn, &agent);

    let query = RecallQuery::by_input(payload(json!({"question": "sum"})));
    let err = agent.recall(&conn, &query, &BrokenEmbedder).unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
}

#[test]
fn store_embedded_writes_nothing_when_embedding_fails() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    let err = agent
        .store_embedded(
            &mut conn,
            &json!({"question": "q"}),
            &json!({"answer": "a"}),
            &BrokenEmbedder,
        )
        .unwrap_err();
    assert_eq!(err.kind(), "embedding_error");
    assert_eq!(agent.query(&conn, &FindQuery::new()).unwrap().count().unwrap(), 0);
}

#[test]
fn missing_embeddings_can_be_rebuilt() {
    let mut conn = test_db();
    let agent = qa_agent(&mut conn);
    let plain = agent
        .store(&mut conn, &json!({"question": "weather?"}), &json!({"answer": "sun"}))
        .unwrap();
    seed(&mut conn, &agent);

    assert_eq!(agent.missing_embeddings(&conn).unwrap(), vec![plain]);
    let mut calls = 0;
    let rebuilt = agent
        .embed_missing(&conn, &KeywordEmbedder, |_, _| calls += 1)
        .unwrap();
    assert_eq!((rebuilt, calls), (1, 1));
    assert!(agent.missing_embeddings(&conn).unwrap().is_empty());
}
