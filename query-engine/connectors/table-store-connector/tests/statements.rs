use std::{collections::HashSet, sync::Arc};

use indoc::indoc;
use pretty_assertions::assert_eq;
use serde_json::{Value as JsonValue, json};
use table_store_connector::{
    ConnectorConfig, DriverConnection, DriverResult, ExecutionResult, MemoryStore, Param, Translator,
};

fn translator(store: &Arc<MemoryStore>) -> Translator {
    Translator::new(store.clone(), ConnectorConfig::default())
}

fn people() -> MemoryStore {
    MemoryStore::new()
        .with_table(
            "candidates",
            vec![
                json!({"id": 1, "name": "Ada", "email": "ada@example.com", "job_id": 7}),
                json!({"id": 2, "name": "Grace", "email": "grace@navy.mil", "job_id": 7}),
                json!({"id": 3, "name": "Linus", "email": "linus@example.com", "job_id": 8}),
            ],
        )
        .with_table(
            "evaluations",
            vec![
                json!({"id": 10, "candidate_id": 1, "job_id": 7, "score": 90, "status": "done"}),
                json!({"id": 11, "candidate_id": 2, "job_id": 7, "score": 75, "status": "done"}),
                json!({"id": 12, "candidate_id": 2, "job_id": 8, "score": null, "status": "pending"}),
                json!({"id": 13, "candidate_id": 99, "job_id": 7, "score": 10, "status": "done"}),
            ],
        )
}

fn column(result: &ExecutionResult, name: &str) -> Vec<JsonValue> {
    result
        .data
        .iter()
        .map(|row| row.get(name).cloned().unwrap_or(JsonValue::Null))
        .collect()
}

#[tokio::test]
async fn inserted_rows_can_be_selected_back() {
    let store = Arc::new(MemoryStore::new());
    let translator = translator(&store);

    let inserted = translator
        .execute(
            "INSERT INTO candidates (name, score) VALUES (?, ?)",
            &["A".into(), 42.into()],
        )
        .await;

    assert!(inserted.success, "{:?}", inserted.error);
    assert_eq!(inserted.insert_id, Some(json!(1)));
    assert_eq!(inserted.affected_rows, Some(1));

    let selected = translator
        .execute("SELECT * FROM candidates WHERE name = ?", &["A".into()])
        .await;

    assert_eq!(column(&selected, "score"), vec![json!(42)]);
}

#[tokio::test]
async fn predicates_bind_in_textual_order() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let result = translator
        .execute(
            indoc! {"
                SELECT id FROM evaluations
                WHERE status = ? AND job_id = ? AND candidate_id IN (?, ?)
                ORDER BY id DESC
            "},
            &["done".into(), 7.into(), 1.into(), 99.into()],
        )
        .await;

    assert_eq!(column(&result, "id"), vec![json!(13), json!(10)]);
}

#[tokio::test]
async fn like_is_case_insensitive_and_projection_renames() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let result = translator
        .execute(
            "SELECT name AS candidate FROM candidates WHERE email LIKE ? ORDER BY name DESC LIMIT 1",
            &["%@EXAMPLE.COM".into()],
        )
        .await;

    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("candidate"), Some(&json!("Linus")));
    assert_eq!(result.data[0].get("name"), None);
}

#[tokio::test]
async fn large_key_lists_are_chunked() {
    let store = Arc::new(MemoryStore::new().with_table(
        "evaluations",
        (0..250).map(|i| json!({"id": i + 1, "candidate_id": i})),
    ));
    let translator = translator(&store);
    let keys: Vec<JsonValue> = (0..250).map(|i| json!(i)).collect();

    let result = translator
        .execute(
            "SELECT * FROM evaluations WHERE candidate_id IN (?)",
            &[Param::Json(JsonValue::Array(keys))],
        )
        .await;

    assert!(result.success);
    assert_eq!(store.request_count(), 3);
    assert_eq!(result.data.len(), 250);

    let unique: HashSet<_> = column(&result, "id").into_iter().map(|v| v.to_string()).collect();
    assert_eq!(unique.len(), 250);
}

#[tokio::test]
async fn limit_and_offset_apply_after_merging_chunks() {
    let store = Arc::new(MemoryStore::new().with_table(
        "evaluations",
        (0..250).map(|i| json!({"id": i + 1, "candidate_id": i})),
    ));
    let translator = translator(&store);
    let keys: Vec<JsonValue> = (0..250).map(|i| json!(i)).collect();

    let result = translator
        .execute(
            "SELECT candidate_id FROM evaluations WHERE candidate_id IN (?) LIMIT ? OFFSET 120",
            &[Param::Json(JsonValue::Array(keys)), 3.into()],
        )
        .await;

    assert_eq!(column(&result, "candidate_id"), vec![json!(120), json!(121), json!(122)]);
}

#[tokio::test]
async fn failing_chunks_abort_with_partial_rows() {
    let store = Arc::new(
        MemoryStore::new()
            .with_table("evaluations", (0..250).map(|i| json!({"id": i + 1, "candidate_id": i})))
            .failing_after(1),
    );
    let translator = translator(&store);
    let keys: Vec<JsonValue> = (0..250).map(|i| json!(i)).collect();

    let result = translator
        .execute(
            "SELECT * FROM evaluations WHERE candidate_id IN (?)",
            &[Param::Json(JsonValue::Array(keys))],
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.data.len(), 100);
    assert_eq!(store.request_count(), 2);
    assert_eq!(
        result.error.as_deref(),
        Some("Batch 2 of 3 failed: injected failure")
    );
}

#[tokio::test]
async fn unconditional_deletes_go_through_batches() {
    let store = Arc::new(MemoryStore::new().with_table("messages", (1..=100).map(|i| json!({"id": i, "body": "hi"}))));
    let config = ConnectorConfig {
        chunk_size: 15,
        delete_page_size: 40,
        ..Default::default()
    };
    let translator = Translator::new(store.clone(), config);

    let before = store.rows("messages").len();
    let result = translator.execute("DELETE FROM messages", &[]).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.affected_rows, Some(before as u64));
    assert!(store.rows("messages").is_empty());

    // 4 listing pages (40, 40, 20, empty) and 7 deletes of at most 15 ids.
    assert_eq!(store.request_count(), 11);
    assert!(store.request_log().iter().all(|r| !r.ends_with("messages?")));
}

#[tokio::test]
async fn unconditional_deletes_survive_capped_pages() {
    let store = Arc::new(
        MemoryStore::new()
            .with_table("messages", (1..=50).map(|i| json!({"id": i})))
            .with_max_rows(20),
    );
    let config = ConnectorConfig {
        delete_page_size: 30,
        ..Default::default()
    };
    let translator = Translator::new(store.clone(), config);

    let result = translator.execute("DELETE FROM messages", &[]).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.affected_rows, Some(50));
    assert!(store.rows("messages").is_empty());
}

#[tokio::test]
async fn unconditional_deletes_report_progress_when_a_batch_fails() {
    let store = Arc::new(
        MemoryStore::new()
            .with_table("messages", (1..=100).map(|i| json!({"id": i})))
            .failing_after(5),
    );
    let config = ConnectorConfig {
        chunk_size: 15,
        delete_page_size: 40,
        ..Default::default()
    };
    let translator = Translator::new(store.clone(), config);

    let result = translator.execute("DELETE FROM messages", &[]).await;

    // 4 listing pages, one successful delete, then the failing one.
    assert!(!result.success);
    assert_eq!(result.affected_rows, Some(15));
    assert_eq!(result.error.as_deref(), Some("Batch 2 of 7 failed: injected failure"));
    assert_eq!(store.request_count(), 6);
    assert_eq!(store.rows("messages").len(), 85);
}

#[tokio::test]
async fn large_key_lists_are_chunked_for_writes() {
    let store = Arc::new(MemoryStore::new().with_table(
        "evaluations",
        (0..250).map(|i| json!({"id": i + 1, "candidate_id": i, "status": "open"})),
    ));
    let translator = translator(&store);
    let keys = || Param::Json(JsonValue::Array((0..250).map(|i| json!(i)).collect()));

    let updated = translator
        .execute(
            "UPDATE evaluations SET status = ? WHERE candidate_id IN (?)",
            &["closed".into(), keys()],
        )
        .await;

    assert!(updated.success, "{:?}", updated.error);
    assert_eq!(updated.affected_rows, Some(250));
    assert_eq!(store.request_count(), 3);
    assert!(store.request_log().iter().all(|r| r.starts_with("PATCH evaluations?candidate_id=in.(")));

    let deleted = translator
        .execute("DELETE FROM evaluations WHERE candidate_id IN (?)", &[keys()])
        .await;

    assert!(deleted.success, "{:?}", deleted.error);
    assert_eq!(deleted.affected_rows, Some(250));
    assert_eq!(store.request_count(), 6);
    assert!(store.rows("evaluations").is_empty());
}

#[tokio::test]
async fn failing_write_chunks_keep_partial_counts() {
    let seed = || (0..250).map(|i| json!({"id": i + 1, "candidate_id": i, "status": "open"}));
    let keys = || Param::Json(JsonValue::Array((0..250).map(|i| json!(i)).collect()));

    let store = Arc::new(MemoryStore::new().with_table("evaluations", seed()).failing_after(1));
    let updated = translator(&store)
        .execute(
            "UPDATE evaluations SET status = ? WHERE candidate_id IN (?)",
            &["closed".into(), keys()],
        )
        .await;

    assert!(!updated.success);
    assert_eq!(updated.affected_rows, Some(100));
    assert_eq!(updated.data.len(), 100);
    assert_eq!(updated.error.as_deref(), Some("Batch 2 of 3 failed: injected failure"));
    assert_eq!(store.request_count(), 2);

    let store = Arc::new(MemoryStore::new().with_table("evaluations", seed()).failing_after(2));
    let deleted = translator(&store)
        .execute("DELETE FROM evaluations WHERE candidate_id IN (?)", &[keys()])
        .await;

    assert!(!deleted.success);
    assert_eq!(deleted.affected_rows, Some(200));
    assert_eq!(deleted.error.as_deref(), Some("Batch 3 of 3 failed: injected failure"));
    assert_eq!(store.request_count(), 3);
    assert_eq!(store.rows("evaluations").len(), 50);
}

#[tokio::test]
async fn null_equality_matches_no_rows() {
    let store = Arc::new(MemoryStore::new().with_table(
        "messages",
        vec![
            json!({"id": 1, "parent_id": null}),
            json!({"id": 2, "parent_id": null}),
            json!({"id": 3, "parent_id": 1}),
        ],
    ));
    let translator = translator(&store);

    let selected = translator
        .execute("SELECT * FROM messages WHERE parent_id = ?", &[Param::null()])
        .await;

    assert!(selected.success);
    assert!(selected.data.is_empty());

    let deleted = translator
        .execute("DELETE FROM messages WHERE parent_id = ?", &[Param::null()])
        .await;

    assert!(deleted.success);
    assert_eq!(deleted.affected_rows, Some(0));
    assert_eq!(store.rows("messages").len(), 3);
    assert_eq!(store.request_count(), 0);
}

#[tokio::test]
async fn filtered_updates_and_deletes_report_affected_rows() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let updated = translator
        .execute(
            "UPDATE evaluations SET status = ?, reviewed_at = NOW() WHERE job_id = ?",
            &["archived".into(), 7.into()],
        )
        .await;

    assert_eq!(updated.affected_rows, Some(3));
    assert!(updated.data.iter().all(|r| r["reviewed_at"].is_string()));

    let deleted = translator
        .execute("DELETE FROM evaluations WHERE status = ?", &["archived".into()])
        .await;

    assert_eq!(deleted.affected_rows, Some(3));
    assert_eq!(store.rows("evaluations").len(), 1);
}

#[tokio::test]
async fn joined_columns_match_a_direct_fetch() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let joined = translator
        .execute(
            indoc! {"
                SELECT e.*, c.name AS candidate_name
                FROM evaluations e
                LEFT JOIN candidates c ON c.id = e.candidate_id
                WHERE e.job_id = ?
                ORDER BY e.id ASC
            "},
            &[7.into()],
        )
        .await;

    assert!(joined.success, "{:?}", joined.error);
    assert!(!joined.degraded);
    assert_eq!(column(&joined, "id"), vec![json!(10), json!(11), json!(13)]);

    for row in joined.data.iter().filter(|r| r["candidate_id"] != json!(99)) {
        let direct = translator
            .execute("SELECT * FROM candidates WHERE id = ?", &[Param::Json(row["candidate_id"].clone())])
            .await;
        let candidate = &direct.data[0];

        for (column, value) in candidate {
            assert_eq!(&row[&format!("candidates_{column}")], value);
        }

        // `c` is a short alias: bare columns too, unless the primary table has them.
        assert_eq!(row["name"], candidate["name"]);
        assert_eq!(row["candidate_name"], candidate["name"]);
        assert_ne!(row["id"], candidate["id"]);
    }

    let orphan = &joined.data[2];
    assert_eq!(orphan.get("candidates_name"), None);
    assert_eq!(orphan["candidate_name"], JsonValue::Null);
}

#[tokio::test]
async fn filters_on_joined_columns_behave_like_inner_joins() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let result = translator
        .execute(
            "SELECT e.id FROM evaluations e LEFT JOIN candidates c ON c.id = e.candidate_id WHERE c.name = ?",
            &["Grace".into()],
        )
        .await;

    assert_eq!(column(&result, "id"), vec![json!(11), json!(12)]);

    // Only the requested item survives flattening.
    for row in &result.data {
        assert_eq!(row.keys().map(String::as_str).collect::<Vec<_>>(), vec!["id"]);
    }
}

#[tokio::test]
async fn rejected_joins_degrade_visibly() {
    let store = Arc::new(people().rejecting_embeds());
    let translator = translator(&store);

    let result = translator
        .execute(
            "SELECT * FROM evaluations e INNER JOIN candidates c ON c.id = e.candidate_id WHERE e.job_id = ?",
            &[7.into()],
        )
        .await;

    assert!(result.success);
    assert!(result.degraded);
    assert_eq!(column(&result, "id"), vec![json!(10), json!(11), json!(13)]);
    assert!(result.data.iter().all(|r| !r.contains_key("candidates_name")));
    assert_eq!(store.request_count(), 2);

    let envelope = serde_json::to_value(&result).unwrap();
    assert_eq!(envelope["degraded"], json!(true));
}

#[tokio::test]
async fn coalesce_writes_null_instead_of_keeping_the_old_value() {
    let store = Arc::new(MemoryStore::new().with_table("candidates", vec![json!({"id": 1, "note": "keep me"})]));
    let translator = translator(&store);

    let result = translator
        .execute(
            "UPDATE candidates SET note = COALESCE(?, note) WHERE id = ?",
            &[Param::null(), 1.into()],
        )
        .await;

    assert!(result.success);
    assert_eq!(store.rows("candidates")[0]["note"], JsonValue::Null);
}

#[tokio::test]
async fn unsupported_constructs_fail_before_any_request() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let cases = [
        ("SELECT * FROM candidates WHERE id = ? OR id = ?", "OR"),
        ("SELECT * FROM candidates WHERE (id = ?)", "parenthesized condition"),
        ("TRUNCATE candidates", "statement starting with `TRUNCATE`"),
    ];

    for (sql, construct) in cases {
        let result = translator.execute(sql, &[1.into(), 2.into()]).await;

        assert!(!result.success);
        let error = result.error.unwrap_or_default();
        assert!(error.contains(construct), "{error}");
    }

    let result = translator
        .execute("SELECT * FROM candidates WHERE id = ? AND name = ?", &[1.into()])
        .await;
    assert_eq!(
        result.error.as_deref(),
        Some("Statement placeholder #2 has no bound parameter (1 supplied).")
    );

    assert_eq!(store.request_count(), 0);
}

#[tokio::test]
async fn unknown_qualifiers_report_their_offset() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let cases = [
        ("SELECT * FROM candidates WHERE x.id = ?", 31),
        ("SELECT * FROM candidates ORDER BY x.name", 34),
        ("SELECT c.id, x.name FROM candidates c", 13),
        ("SELECT x.* FROM candidates", 7),
        ("SELECT COUNT(DISTINCT x.job_id) FROM candidates", 22),
    ];

    for (sql, offset) in cases {
        let result = translator.execute(sql, &[1.into()]).await;

        assert_eq!(
            result.error.as_deref(),
            Some(format!("Unsupported statement construct: unknown table qualifier `x` (at offset {offset}).").as_str()),
            "{sql}"
        );
    }

    let result = translator
        .execute(
            "SELECT * FROM evaluations e JOIN candidates c ON c.id = e.candidate_id ORDER BY c.name",
            &[],
        )
        .await;
    assert_eq!(
        result.error.as_deref(),
        Some("Unsupported statement construct: ORDER BY on joined column `c.name` (at offset 80).")
    );

    assert_eq!(store.request_count(), 0);
}

#[tokio::test]
async fn empty_key_lists_short_circuit() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let result = translator
        .execute("SELECT * FROM candidates WHERE id IN (?)", &[Param::Json(json!([]))])
        .await;

    assert!(result.success);
    assert!(result.data.is_empty());
    assert_eq!(store.request_count(), 0);
}

#[tokio::test]
async fn insert_id_falls_back_to_the_latest_row() {
    let store = Arc::new(
        MemoryStore::new()
            .with_table("messages", (1..=3).map(|i| json!({"id": i})))
            .without_write_echo(),
    );
    let translator = translator(&store);

    let result = translator
        .execute("INSERT INTO messages (body) VALUES (?)", &["hello".into()])
        .await;

    assert!(result.success);
    assert_eq!(result.insert_id, Some(json!(4)));
    assert_eq!(result.affected_rows, Some(1));
    assert_eq!(store.request_log().last().map(String::as_str), Some("GET messages?select=id&order=id.desc&limit=1"));
}

#[tokio::test]
async fn upserts_use_the_conflict_column() {
    let store = Arc::new(MemoryStore::new());
    let translator = translator(&store);
    let sql = "INSERT INTO settings (key, value) VALUES (?, ?) ON DUPLICATE KEY UPDATE value = VALUES(value)";

    translator.execute(sql, &["theme".into(), "dark".into()]).await;
    let second = translator.execute(sql, &["theme".into(), "light".into()]).await;

    assert!(second.success);
    assert_eq!(second.insert_id, Some(json!(1)));

    let rows = store.rows("settings");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["value"], json!("light"));
    assert!(store.request_log().iter().all(|r| r == "POST settings?on_conflict=key"));
}

#[tokio::test]
async fn counts_return_a_single_pseudo_row() {
    let store = Arc::new(people());
    let translator = translator(&store);

    let result = translator
        .execute("SELECT COUNT(*) AS n FROM evaluations WHERE job_id = ?", &[7.into()])
        .await;
    assert_eq!(
        serde_json::to_value(&result.data).unwrap(),
        json!([{"total": 3, "count": 3, "n": 3}])
    );

    let result = translator
        .execute("SELECT COUNT(DISTINCT candidate_id) FROM evaluations", &[])
        .await;
    assert_eq!(result.data[0]["count"], json!(3));
}

#[tokio::test]
async fn binary_columns_round_trip_as_buffers() {
    let store = Arc::new(MemoryStore::new());
    let config = ConnectorConfig::from_toml(indoc! {r#"
        [binary_columns]
        resumes = ["file_data"]
    "#})
    .unwrap();
    let translator = Translator::new(store.clone(), config);

    let result = translator
        .execute(
            "INSERT INTO resumes (file_name, file_data) VALUES (?, ?)",
            &["cv.pdf".into(), Param::Bytes(vec![0x25, 0x50])],
        )
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(store.rows("resumes")[0]["file_data"], json!("\\x2550"));

    let result = translator
        .execute("SELECT file_data FROM resumes WHERE file_name = ?", &["cv.pdf".into()])
        .await;
    assert_eq!(result.data[0]["file_data"], json!({"type": "Buffer", "data": [37, 80]}));

    let result = translator
        .execute(
            "INSERT INTO resumes (file_name, file_data) VALUES (?, ?)",
            &["bad.pdf".into(), "definitely not base64!".into()],
        )
        .await;
    assert!(!result.success);
    assert_eq!(store.rows("resumes").len(), 1);
}

#[tokio::test]
async fn driver_connections_speak_driver_shapes() {
    let store = Arc::new(people());
    let connection = DriverConnection::new(translator(&store));

    connection.begin_transaction();

    let inserted = connection
        .query("INSERT INTO candidates (name) VALUES (?)", &["Barbara".into()])
        .await
        .unwrap();
    assert_eq!(
        inserted,
        DriverResult::Insert {
            insert_id: Some(json!(4)),
            affected_rows: 1
        }
    );

    let updated = connection
        .query("UPDATE candidates SET job_id = ? WHERE job_id = ?", &[9.into(), 7.into()])
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&updated).unwrap(),
        json!({"affectedRows": 2, "changedRows": 2})
    );

    assert_eq!(connection.applied().len(), 2);

    // Nothing is undone.
    connection.rollback();
    connection.release();
    assert!(connection.applied().is_empty());
    assert_eq!(store.rows("candidates").len(), 4);

    let err = connection.query("SELECT * FROM candidates WHERE a > ?", &[1.into()]).await.unwrap_err();
    assert!(err.is_parse_error());
}
