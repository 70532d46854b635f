use chrono::{DateTime, Duration, Utc};
use flow_core::model::{
    AnswerValue, FieldMap, FormStatus, FormVersionId, QuestionId, ResponseId, ResponseStatus,
    StoredAnswer,
};
use flow_core::time::{fixed_clock, fixed_now};
use storage::repository::{
    AnswerPersistence, FormRepository, ResponseRepository, StorageError,
};
use storage::seed::{SeedBundle, install_bundle};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn demo_version() -> FormVersionId {
    FormVersionId::from("form-demo-health-v1")
}

#[tokio::test]
async fn sqlite_roundtrips_demo_catalog() {
    let repo = connect("memdb_catalog").await;
    install_bundle(&repo, SeedBundle::demo().unwrap())
        .await
        .expect("install");

    let form = repo
        .published_form_by_slug("demo-health-survey")
        .await
        .unwrap()
        .expect("published form");
    assert_eq!(form.active_version_id, Some(demo_version()));
    assert_eq!(form.exit_map.len(), 3);

    let bundle = repo.load_version(&demo_version()).await.unwrap();
    assert_eq!(bundle.version.version, 1);
    assert_eq!(bundle.questions.len(), 6);
    assert_eq!(bundle.rules.len(), 5);

    let orders: Vec<i32> = bundle.questions.iter().map(|q| q.order()).collect();
    assert_eq!(orders, vec![1, 2, 3, 4, 5, 6]);

    let nps = bundle
        .questions
        .iter()
        .find(|q| q.id() == &QuestionId::from("q-nps"))
        .unwrap();
    assert_eq!(nps.scale_bounds(), Some((0, 10)));

    let overall = bundle
        .questions
        .iter()
        .find(|q| q.id() == &QuestionId::from("q-overall"))
        .unwrap();
    let values: Vec<&str> = overall.choices().iter().map(|c| c.value.as_str()).collect();
    assert_eq!(values, vec!["excellent", "good", "fair", "poor"]);

    let catalog = bundle.into_catalog();
    assert!(catalog.dangling_rules().is_empty());
}

#[tokio::test]
async fn sqlite_reinstall_replaces_version_contents() {
    let repo = connect("memdb_reinstall").await;
    install_bundle(&repo, SeedBundle::demo().unwrap())
        .await
        .unwrap();

    let mut bundle = SeedBundle::demo().unwrap();
    bundle.questions.retain(|q| q.id.as_str() != "q-feedback");
    install_bundle(&repo, bundle).await.unwrap();

    let loaded = repo.load_version(&demo_version()).await.unwrap();
    assert_eq!(loaded.questions.len(), 5);
}

#[tokio::test]
async fn sqlite_hides_unpublished_forms() {
    let repo = connect("memdb_unpublished").await;
    let mut bundle = SeedBundle::demo().unwrap();
    bundle.forms[0].status = FormStatus::Draft;
    install_bundle(&repo, bundle).await.unwrap();

    assert!(
        repo.published_form_by_slug("demo-health-survey")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn sqlite_response_lifecycle() {
    let repo = connect("memdb_lifecycle").await;
    let response = repo
        .create_response(&demo_version(), "user-1", None, fixed_now())
        .await
        .unwrap();

    let fetched = repo.get_response(response.id).await.unwrap();
    assert_eq!(fetched, response);
    assert_eq!(fetched.status, ResponseStatus::Draft);

    repo.update_progress(response.id, 40).await.unwrap();
    assert_eq!(repo.get_response(response.id).await.unwrap().progress_pct, 40);

    repo.complete_response(response.id, fixed_now()).await.unwrap();
    let done = repo.get_response(response.id).await.unwrap();
    assert_eq!(done.status, ResponseStatus::Completed);
    assert_eq!(done.progress_pct, 100);
    assert_eq!(done.completed_at, Some(fixed_now()));

    let missing = ResponseId::generate();
    assert!(matches!(
        repo.abandon_response(missing).await,
        Err(StorageError::NotFound)
    ));
    assert!(matches!(
        repo.get_response(missing).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_batch_upsert_is_idempotent_and_last_write_wins() {
    let repo = connect("memdb_batch").await;
    let response = repo
        .create_response(&demo_version(), "user-1", None, fixed_now())
        .await
        .unwrap();

    let first = vec![
        StoredAnswer::new("q-name", "Ada"),
        StoredAnswer::new("q-nps", 9),
        StoredAnswer::new("q-symptoms", vec!["fatigue", "fever"]),
    ];
    repo.save_answers_batch(response.id, &first).await.unwrap();
    repo.save_answers_batch(response.id, &first).await.unwrap();
    repo.save_answers_batch(response.id, &[StoredAnswer::new("q-name", "Ada Lovelace")])
        .await
        .unwrap();

    let mut saved = repo.answers_for_response(response.id).await.unwrap();
    saved.sort_by(|a, b| a.question_id.as_str().cmp(b.question_id.as_str()));
    assert_eq!(saved.len(), 3);
    assert_eq!(saved[0].value, AnswerValue::from("Ada Lovelace"));
    assert_eq!(saved[1].value, AnswerValue::Number(9.0));
    assert_eq!(
        saved[2].value,
        AnswerValue::List(vec!["fatigue".into(), "fever".into()])
    );
}

#[tokio::test]
async fn sqlite_batch_for_unknown_response_is_rejected() {
    let repo = connect("memdb_batch_unknown").await;
    let err = repo
        .save_answers_batch(ResponseId::generate(), &[StoredAnswer::new("q-name", "x")])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn sqlite_response_keeps_utm_parameters() {
    let repo = connect("memdb_utm").await;
    let mut utm = FieldMap::new();
    utm.insert("utm_source".into(), "demo_app".into());
    utm.insert("utm_campaign".into(), "health_survey".into());

    let response = repo
        .create_response(&demo_version(), "user-1", Some(utm.clone()), fixed_now())
        .await
        .unwrap();
    let fetched = repo.get_response(response.id).await.unwrap();
    assert_eq!(fetched.utm, utm);
    assert!(fetched.hidden.is_empty());
    assert_eq!(fetched, response);
}

#[tokio::test]
async fn sqlite_plain_text_answers_stay_text() {
    let repo = connect("memdb_text_cells").await;
    let response = repo
        .create_response(&demo_version(), "user-1", None, fixed_now())
        .await
        .unwrap();

    repo.save_answers_batch(
        response.id,
        &[
            StoredAnswer::new("q-name", "42"),
            StoredAnswer::new("q-details", "[see notes]"),
            StoredAnswer::new("q-nps", 0),
        ],
    )
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO response_items (response_id, question_id, value, updated_at)
         VALUES (?1, 'q-feedback', 'typed by hand', ?2)",
    )
    .bind(response.id.to_string())
    .bind(fixed_now())
    .execute(repo.pool())
    .await
    .unwrap();

    let mut saved = repo.answers_for_response(response.id).await.unwrap();
    saved.sort_by(|a, b| a.question_id.as_str().cmp(b.question_id.as_str()));
    let values: Vec<AnswerValue> = saved.into_iter().map(|a| a.value).collect();
    assert_eq!(
        values,
        vec![
            AnswerValue::from("[see notes]"),
            AnswerValue::from("typed by hand"),
            AnswerValue::from("42"),
            AnswerValue::Number(0.0),
        ]
    );
}

#[tokio::test]
async fn sqlite_rejects_non_finite_answers() {
    let repo = connect("memdb_non_finite").await;
    let response = repo
        .create_response(&demo_version(), "user-1", None, fixed_now())
        .await
        .unwrap();

    let err = repo
        .save_answers_batch(
            response.id,
            &[
                StoredAnswer::new("q-name", "Ada"),
                StoredAnswer::new("q-nps", f64::INFINITY),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Serialization(_)));
    assert!(repo.answers_for_response(response.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn sqlite_answer_stamps_follow_the_clock() {
    let mut clock = fixed_clock();
    let repo = connect("memdb_clock").await.with_clock(clock);
    let response = repo
        .create_response(&demo_version(), "user-1", None, fixed_now())
        .await
        .unwrap();
    repo.save_answers_batch(response.id, &[StoredAnswer::new("q-name", "Ada")])
        .await
        .unwrap();

    clock.advance(Duration::seconds(30));
    let repo = repo.with_clock(clock);
    repo.save_answers_batch(response.id, &[StoredAnswer::new("q-feedback", "none")])
        .await
        .unwrap();
    repo.save_answers_batch(response.id, &[StoredAnswer::new("q-details", "later")])
        .await
        .unwrap();

    let stamps: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT question_id, updated_at FROM response_items
         WHERE response_id = ?1 ORDER BY question_id",
    )
    .bind(response.id.to_string())
    .fetch_all(repo.pool())
    .await
    .unwrap();
    assert_eq!(
        stamps,
        vec![
            ("q-details".to_owned(), fixed_now() + Duration::seconds(30)),
            ("q-feedback".to_owned(), fixed_now() + Duration::seconds(30)),
            ("q-name".to_owned(), fixed_now()),
        ]
    );

    let order: Vec<String> = repo
        .answers_for_response(response.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.question_id.as_str().to_owned())
        .collect();
    assert_eq!(order, vec!["q-name", "q-details", "q-feedback"]);
}
