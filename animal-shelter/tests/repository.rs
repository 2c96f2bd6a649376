use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use animal_shelter::{
    bson::{self, Bson, Document, doc},
    memory::InMemoryStore,
    prelude::*,
};
use async_trait::async_trait;
use serde_json::json;

const ANIMALS: &str = "animals";

async fn seeded(records: Vec<Document>) -> InMemoryStore {
    let store = InMemoryStore::new();
    for record in records {
        store.insert_document(record, ANIMALS).await.unwrap();
    }
    store
}

async fn connect(store: &InMemoryStore) -> AnimalShelterRepository<InMemoryStore> {
    AnimalShelterRepository::connect(store.clone(), ANIMALS)
        .await
        .unwrap()
}

fn rec_nums(records: &[Document]) -> Vec<i64> {
    records
        .iter()
        .filter_map(animal_shelter::record::record_number)
        .collect()
}

/// In-memory store with injectable failures.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: InMemoryStore,
    unreachable: bool,
    broken: AtomicBool,
    inserts_before_failure: Option<usize>,
    inserts: AtomicUsize,
    /// Inserts to pre-empt with a competing writer taking the same record number
    racing_inserts: AtomicUsize,
    shut_down: Arc<AtomicBool>,
}

impl FlakyStore {
    fn check(&self) -> ShelterResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ShelterError::Backend("connection reset by peer".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ShelterBackend for FlakyStore {
    async fn ping(&self) -> ShelterResult<()> {
        if self.unreachable {
            return Err(ShelterError::Backend("server selection timed out".into()));
        }
        Ok(())
    }

    async fn find_documents(&self, query: Query, collection: &str) -> ShelterResult<Vec<Document>> {
        self.check()?;
        self.inner.find_documents(query, collection).await
    }

    async fn insert_document(&self, document: Document, collection: &str) -> ShelterResult<Bson> {
        self.check()?;

        let attempt = self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.inserts_before_failure.is_some_and(|limit| attempt >= limit) {
            return Err(ShelterError::Backend("connection reset by peer".into()));
        }

        let racing = self
            .racing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if racing {
            let taken = document.get(REC_NUM_FIELD).cloned().unwrap_or(Bson::Null);
            self.inner
                .insert_document(doc! { "name": "competitor", "rec_num": taken }, collection)
                .await?;
        }

        self.inner.insert_document(document, collection).await
    }

    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: UpdateSpec,
        collection: &str,
    ) -> ShelterResult<u64> {
        self.check()?;
        self.inner.update_documents(filter, update, collection).await
    }

    async fn delete_documents(&self, filter: Option<Expr>, collection: &str) -> ShelterResult<u64> {
        self.check()?;
        self.inner.delete_documents(filter, collection).await
    }

    async fn add_index(&self, collection: &str, field: &str, unique: bool) -> ShelterResult<()> {
        self.inner.add_index(collection, field, unique).await
    }

    async fn shutdown(self) -> ShelterResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn next_record_num_is_one_for_an_empty_collection() {
    let repository = connect(&InMemoryStore::new()).await;

    assert_eq!(repository.next_record_num().await.unwrap(), 1);
}

#[tokio::test]
async fn next_record_num_follows_the_maximum() {
    let store = seeded(vec![
        doc! { "name": "Bo", "rec_num": 3 },
        doc! { "name": "Max", "rec_num": 7_i64 },
        doc! { "name": "Rex", "rec_num": 2.0 },
        doc! { "name": "Unnumbered" },
    ])
    .await;
    let repository = connect(&store).await;

    assert_eq!(repository.next_record_num().await.unwrap(), 8);
}

#[tokio::test]
async fn next_record_num_ignores_non_numeric_values() {
    let store = seeded(vec![
        doc! { "name": "Bo", "rec_num": 1 },
        doc! { "name": "Max", "rec_num": "7" },
    ])
    .await;
    let repository = connect(&store).await;

    assert_eq!(repository.next_record_num().await.unwrap(), 2);
    assert_eq!(repository.create(doc! { "name": "Rex" }).await.unwrap(), vec![2]);
    assert_eq!(repository.create(doc! { "name": "Luna" }).await.unwrap(), vec![3]);
}

#[tokio::test]
async fn create_inserts_one_numbered_record() {
    let store = seeded(vec![doc! { "name": "Bo", "rec_num": 1 }]).await;
    let repository = connect(&store).await;
    let expected = repository.next_record_num().await.unwrap();

    let numbers = repository
        .create(doc! { "_id": "cloned-id", "name": "Max", "breed": "Beagle" })
        .await
        .unwrap();

    assert_eq!(numbers, vec![expected]);
    assert_eq!(store.count(ANIMALS).await, 2);

    let stored = repository.read(doc! { "name": "Max" }, None).await.unwrap();
    assert_eq!(rec_nums(&stored), vec![expected]);
    assert_ne!(stored[0].get("_id"), Some(&Bson::from("cloned-id")));
}

#[tokio::test]
async fn create_rejects_missing_and_malformed_input() {
    let store = InMemoryStore::new();
    let repository = connect(&store).await;

    for data in [
        Bson::from(None::<Document>),
        Bson::from("not a mapping"),
        bson::bson!([{ "name": "Bo" }, 3]),
    ] {
        let err = repository.create(data).await.unwrap_err();
        assert!(matches!(err, ShelterError::InvalidArgument(_)), "{err}");
    }

    assert_eq!(store.count(ANIMALS).await, 0);
}

#[tokio::test]
async fn batches_receive_consecutive_numbers() {
    let repository = connect(&InMemoryStore::new()).await;

    let first = repository
        .create(vec![
            doc! { "name": "Bo" },
            doc! { "name": "Max" },
            doc! { "name": "Rex" },
        ])
        .await
        .unwrap();
    let second = repository.create(doc! { "name": "Luna" }).await.unwrap();

    assert_eq!(first, vec![1, 2, 3]);
    assert_eq!(second, vec![4]);
    assert_eq!(repository.create(Vec::<Document>::new()).await.unwrap(), Vec::<i64>::new());
}

#[tokio::test]
async fn json_batches_are_accepted() {
    let repository = connect(&InMemoryStore::new()).await;
    let batch = RecordBatch::try_from(json!([
        { "animal_id": "A746874", "breed": "Beagle" },
        { "animal_id": "A725717", "breed": "Boxer" },
    ]))
    .unwrap();

    assert_eq!(repository.create_batch(batch).await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn read_without_filter_returns_at_most_one_record() {
    let store = InMemoryStore::new();
    let repository = connect(&store).await;

    assert!(repository.read(doc! {}, None).await.unwrap().is_empty());

    repository
        .create(vec![doc! { "name": "Bo" }, doc! { "name": "Max" }])
        .await
        .unwrap();
    let found = repository.read(doc! {}, None).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_str("name").unwrap(), "Bo");
}

#[tokio::test]
async fn read_with_filter_returns_matches_by_record_number() {
    let store = seeded(vec![
        doc! { "breed": "Beagle", "rec_num": 5 },
        doc! { "breed": "Boxer", "rec_num": 1 },
        doc! { "breed": "Beagle", "rec_num": 2 },
        doc! { "breed": "Beagle", "rec_num": 9 },
    ])
    .await;
    let repository = connect(&store).await;

    let beagles = repository.read(doc! { "breed": "Beagle" }, None).await.unwrap();
    assert_eq!(rec_nums(&beagles), vec![2, 5, 9]);
    assert!(beagles.iter().all(|record| record.get_str("breed").ok() == Some("Beagle")));

    let later = repository
        .read(doc! { "rec_num": { "$gt": 1 }, "breed": { "$ne": "Boxer" } }, None)
        .await
        .unwrap();
    assert_eq!(rec_nums(&later), vec![2, 5, 9]);
}

#[tokio::test]
async fn read_applies_projections() {
    let repository = connect(&InMemoryStore::new()).await;
    repository
        .create(doc! { "animal_id": "B721406", "breed": "Labrador Retriever Mix" })
        .await
        .unwrap();

    let found = repository
        .read(doc! { "animal_id": "B721406" }, Some(doc! { "_id": 0, "animal_id": 1 }))
        .await
        .unwrap();
    assert_eq!(found, vec![doc! { "animal_id": "B721406" }]);

    let err = repository
        .read(doc! { "animal_id": "B721406" }, Some(doc! { "animal_id": 1, "breed": 0 }))
        .await
        .unwrap_err();
    assert!(matches!(err, ShelterError::InvalidArgument(_)));
}

#[tokio::test]
async fn read_projects_dotted_paths() {
    let repository = connect(&InMemoryStore::new()).await;
    repository
        .create(doc! { "animal_id": "B1", "location": { "lat": 30.1, "long": -97.0 } })
        .await
        .unwrap();

    let found = repository
        .read(doc! { "animal_id": "B1" }, Some(doc! { "_id": 0, "location.lat": 1 }))
        .await
        .unwrap();
    assert_eq!(found, vec![doc! { "location": { "lat": 30.1 } }]);

    let found = repository
        .read(doc! { "animal_id": "B1" }, Some(doc! { "_id": 0, "location.long": 0, "rec_num": 0 }))
        .await
        .unwrap();
    assert_eq!(found, vec![doc! { "animal_id": "B1", "location": { "lat": 30.1 } }]);
}

#[tokio::test]
async fn read_matches_patterns() {
    let repository = connect(&InMemoryStore::new()).await;
    repository
        .create(vec![
            doc! { "breed": "Labrador Retriever Mix" },
            doc! { "breed": "Beagle" },
            doc! { "breed": "labrador" },
        ])
        .await
        .unwrap();

    let labs = repository
        .read(doc! { "breed": { "$regex": "^Lab" } }, None)
        .await
        .unwrap();
    assert_eq!(rec_nums(&labs), vec![1]);

    let labs = repository
        .read(doc! { "breed": { "$regex": "^lab", "$options": "i" } }, None)
        .await
        .unwrap();
    assert_eq!(rec_nums(&labs), vec![1, 3]);
}

#[tokio::test]
async fn in_memory_backend_rejects_operators_it_cannot_evaluate() {
    let repository = connect(&InMemoryStore::new()).await;
    repository.create(doc! { "tags": ["calm"] }).await.unwrap();

    for filter in [
        doc! { "$where": "this.rec_num > 1" },
        doc! { "tags": { "$all": ["calm"] } },
    ] {
        let err = repository.read(filter, None).await.unwrap_err();
        assert!(matches!(err, ShelterError::InvalidArgument(_)), "{err}");
    }

    let err = repository
        .update(doc! { "rec_num": 1 }, doc! { "$min": { "age": 2 } })
        .await
        .unwrap_err();
    assert!(matches!(err, ShelterError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn update_requires_a_query_and_operators() {
    let repository = connect(&InMemoryStore::new()).await;

    let err = repository
        .update(doc! {}, doc! { "$set": { "note": "x" } })
        .await
        .unwrap_err();
    assert!(matches!(err, ShelterError::InvalidArgument(_)));

    let err = repository
        .update(doc! { "breed": "Beagle" }, doc! { "note": "x" })
        .await
        .unwrap_err();
    assert!(matches!(err, ShelterError::InvalidArgument(_)));
}

#[tokio::test]
async fn update_modifies_every_match() {
    let repository = connect(&InMemoryStore::new()).await;
    repository
        .create(vec![
            doc! { "breed": "Beagle", "name": "Bo" },
            doc! { "breed": "Beagle", "name": "Max" },
            doc! { "breed": "Boxer", "name": "Rex" },
        ])
        .await
        .unwrap();

    let modified = repository
        .update(doc! { "breed": "Beagle" }, doc! { "$set": { "outcome_type": "Adoption" } })
        .await
        .unwrap();
    assert_eq!(modified, 2);

    let adopted = repository
        .read(doc! { "outcome_type": "Adoption" }, None)
        .await
        .unwrap();
    assert_eq!(rec_nums(&adopted), vec![1, 2]);

    // Matching records that already hold the value are not counted
    let again = repository
        .update(doc! { "breed": "Beagle" }, doc! { "$set": { "outcome_type": "Adoption" } })
        .await
        .unwrap();
    assert_eq!(again, 0);

    let none = repository
        .update(doc! { "breed": "Poodle" }, doc! { "$set": { "outcome_type": "Adoption" } })
        .await
        .unwrap();
    assert_eq!(none, 0);
}

#[tokio::test]
async fn update_applies_field_operators() {
    let repository = connect(&InMemoryStore::new()).await;
    repository
        .create(doc! { "animal_id": "B1", "visits": 1, "color": "Black", "dob": "2015-05-20" })
        .await
        .unwrap();

    let modified = repository
        .update(
            doc! { "animal_id": "B1" },
            doc! {
                "$unset": { "color": "" },
                "$inc": { "visits": 2 },
                "$rename": { "dob": "date_of_birth" },
                "$push": { "tags": "friendly" },
            },
        )
        .await
        .unwrap();
    assert_eq!(modified, 1);

    let found = repository
        .read(doc! { "animal_id": "B1" }, Some(doc! { "_id": 0 }))
        .await
        .unwrap();
    assert_eq!(
        found,
        vec![doc! {
            "animal_id": "B1",
            "visits": 3,
            "rec_num": 1_i64,
            "date_of_birth": "2015-05-20",
            "tags": ["friendly"],
        }]
    );
}

#[tokio::test]
async fn update_rejects_record_number_collisions() {
    let repository = connect(&InMemoryStore::new()).await;
    repository
        .create(vec![doc! { "name": "Bo" }, doc! { "name": "Max" }])
        .await
        .unwrap();

    let err = repository
        .update(doc! { "name": "Max" }, doc! { "$set": { "rec_num": 1 } })
        .await
        .unwrap_err();

    assert!(matches!(err, ShelterError::DuplicateKey(_)));
}

#[tokio::test]
async fn delete_removes_exactly_the_matches() {
    let store = InMemoryStore::new();
    let repository = connect(&store).await;

    let err = repository.delete(doc! {}).await.unwrap_err();
    assert!(matches!(err, ShelterError::InvalidArgument(_)));

    repository
        .create(vec![
            doc! { "breed": "Beagle" },
            doc! { "breed": "Boxer" },
            doc! { "breed": "Beagle" },
        ])
        .await
        .unwrap();

    assert_eq!(repository.delete(doc! { "breed": "Beagle" }).await.unwrap(), 2);
    assert!(repository.read(doc! { "breed": "Beagle" }, None).await.unwrap().is_empty());
    assert_eq!(store.count(ANIMALS).await, 1);
    assert_eq!(repository.delete(doc! { "breed": "Beagle" }).await.unwrap(), 0);
}

#[tokio::test]
async fn labrador_round_trip() {
    let repository = connect(&InMemoryStore::new()).await;

    let created = repository
        .create(doc! { "breed": "Labrador Retriever Mix", "animal_id": "B721406" })
        .await
        .unwrap();
    assert_eq!(created, vec![1]);

    let stored = repository.read(doc! { "animal_id": "B721406" }, None).await.unwrap();
    assert_eq!(rec_nums(&stored), vec![1]);

    let updated = repository
        .update(doc! { "animal_id": "B721406" }, doc! { "$set": { "note": "x" } })
        .await
        .unwrap();
    assert_eq!(updated, 1);

    assert_eq!(repository.delete(doc! { "rec_num": 1 }).await.unwrap(), 1);
    assert!(repository.read(doc! {}, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn probe_returns_any_record() {
    let repository = connect(&InMemoryStore::new()).await;
    assert_eq!(repository.probe().await.unwrap(), None);

    repository.create(doc! { "name": "Bo" }).await.unwrap();
    let probed = repository.probe().await.unwrap().unwrap();

    assert_eq!(probed.get_str("name").unwrap(), "Bo");
}

#[tokio::test]
async fn backend_failures_are_not_empty_results() {
    let repository = AnimalShelterRepository::connect(FlakyStore::default(), ANIMALS)
        .await
        .unwrap();
    repository.create(doc! { "breed": "Beagle" }).await.unwrap();
    repository.backend().broken.store(true, Ordering::SeqCst);

    assert!(repository.next_record_num().await.unwrap_err().is_backend());
    assert!(repository.read(doc! { "breed": "Beagle" }, None).await.unwrap_err().is_backend());
    assert!(
        repository
            .update(doc! { "breed": "Beagle" }, doc! { "$set": { "note": "x" } })
            .await
            .unwrap_err()
            .is_backend()
    );
    assert!(repository.delete(doc! { "breed": "Beagle" }).await.unwrap_err().is_backend());
    assert!(repository.probe().await.unwrap_err().is_backend());
    assert!(repository.create(doc! { "breed": "Boxer" }).await.unwrap_err().is_backend());

    // Argument errors still win over backend state
    assert!(matches!(
        repository.delete(doc! {}).await,
        Err(ShelterError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn interrupted_batches_report_what_was_committed() {
    let backend = FlakyStore {
        inserts_before_failure: Some(2),
        ..FlakyStore::default()
    };
    let repository = AnimalShelterRepository::connect(backend, ANIMALS).await.unwrap();

    let err = repository
        .create(vec![
            doc! { "name": "Bo" },
            doc! { "name": "Max" },
            doc! { "name": "Rex" },
        ])
        .await
        .unwrap_err();

    match err {
        ShelterError::PartialInsert { committed, .. } => assert_eq!(committed, vec![1, 2]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(repository.backend().inner.count(ANIMALS).await, 2);

    // Nothing committed: the backend error comes through as is
    let err = repository.create(doc! { "name": "Luna" }).await.unwrap_err();
    assert!(matches!(err, ShelterError::Backend(_)));
}

#[tokio::test]
async fn colliding_record_numbers_are_retried() {
    let backend = FlakyStore {
        racing_inserts: AtomicUsize::new(1),
        ..FlakyStore::default()
    };
    let repository = AnimalShelterRepository::connect(backend, ANIMALS).await.unwrap();

    assert_eq!(repository.create(doc! { "name": "Bo" }).await.unwrap(), vec![2]);

    let numbers = rec_nums(&repository.read(doc! { "rec_num": { "$gte": 1 } }, None).await.unwrap());
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn retries_are_bounded() {
    let backend = FlakyStore {
        racing_inserts: AtomicUsize::new(5),
        ..FlakyStore::default()
    };
    let repository = AnimalShelterRepository::connect(backend, ANIMALS)
        .await
        .unwrap()
        .with_insert_attempts(2);

    let err = repository.create(doc! { "name": "Bo" }).await.unwrap_err();

    assert!(matches!(err, ShelterError::DuplicateKey(_)));
}

#[tokio::test]
async fn legacy_duplicates_do_not_block_connecting() {
    let store = seeded(vec![
        doc! { "name": "Bo", "rec_num": 1 },
        doc! { "name": "Max", "rec_num": 1 },
    ])
    .await;
    let repository = connect(&store).await;

    assert!(repository.ensure_record_index().await.is_err());
    assert_eq!(repository.create(doc! { "name": "Rex" }).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn unreachable_backends_fail_to_connect_and_are_released() {
    let shut_down = Arc::new(AtomicBool::new(false));
    let backend = FlakyStore {
        unreachable: true,
        shut_down: shut_down.clone(),
        ..FlakyStore::default()
    };

    let err = AnimalShelterRepository::connect(backend, ANIMALS).await.unwrap_err();

    assert!(matches!(err, ShelterError::Connection(_)));
    assert!(shut_down.load(Ordering::SeqCst));
}

#[tokio::test]
async fn collection_name_is_required() {
    let err = AnimalShelterRepository::connect(InMemoryStore::new(), "  ")
        .await
        .unwrap_err();

    assert!(matches!(err, ShelterError::InvalidArgument(_)));
}

#[tokio::test]
async fn shutdown_releases_the_backend() {
    let shut_down = Arc::new(AtomicBool::new(false));
    let backend = FlakyStore {
        shut_down: shut_down.clone(),
        ..FlakyStore::default()
    };
    let repository = AnimalShelterRepository::connect(backend, ANIMALS).await.unwrap();
    assert_eq!(repository.collection_name(), ANIMALS);

    repository.shutdown().await.unwrap();

    assert!(shut_down.load(Ordering::SeqCst));
}
