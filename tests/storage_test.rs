//! Integration tests for the SQLite storage layer
//!
//! Tests database operations using an in-memory SQLite database.

use iat_survey::storage::{
    NewBrand, NewTest, NewTrial, ResponseLabels, SqliteStorage, Storage,
};

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

/// A small complete test definition: two brands (one with an image) and two
/// words.
fn coffee_test() -> NewTest {
    NewTest {
        name: "Coffee".to_string(),
        response_labels: ResponseLabels::PositiveNegative,
        brands: vec![
            NewBrand {
                name: "A".to_string(),
                image_url: None,
            },
            NewBrand {
                name: "B".to_string(),
                image_url: Some("/uploads/b.png".to_string()),
            },
        ],
        words: vec!["good".to_string(), "bad".to_string()],
    }
}

mod test_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get_test() {
        let storage = create_test_storage().await;

        let id = storage.create_test(&coffee_test()).await.unwrap();
        let detail = storage.get_test(id).await.unwrap().unwrap();

        assert_eq!(detail.id, id);
        assert_eq!(detail.name, "Coffee");
        assert_eq!(detail.response_labels, ResponseLabels::PositiveNegative);
        assert_eq!(detail.brands.len(), 2);
        assert_eq!(detail.words.len(), 2);
        assert_eq!(detail.brands[1].image_url.as_deref(), Some("/uploads/b.png"));
        assert_eq!(detail.words[0].text, "good");
    }

    #[tokio::test]
    async fn test_get_nonexistent_test() {
        let storage = create_test_storage().await;

        let result = storage.get_test(999).await.unwrap();

        assert!(result.is_none(), "Should return None for nonexistent test");
    }

    #[tokio::test]
    async fn test_yes_no_mode_round_trips() {
        let storage = create_test_storage().await;

        let mut new = coffee_test();
        new.response_labels = ResponseLabels::YesNo;
        let id = storage.create_test(&new).await.unwrap();

        let detail = storage.get_test(id).await.unwrap().unwrap();
        assert_eq!(detail.response_labels, ResponseLabels::YesNo);
    }

    #[tokio::test]
    async fn test_null_response_labels_reads_as_pn() {
        let storage = create_test_storage().await;

        let id = storage.create_test(&coffee_test()).await.unwrap();

        // Tests written before the column existed have NULL there.
        sqlx::query("UPDATE tests SET response_labels = NULL WHERE id = ?")
            .bind(id)
            .execute(storage.pool())
            .await
            .unwrap();

        let detail = storage.get_test(id).await.unwrap().unwrap();
        assert_eq!(detail.response_labels, ResponseLabels::PositiveNegative);
    }

    #[tokio::test]
    async fn test_list_tests() {
        let storage = create_test_storage().await;

        storage.create_test(&coffee_test()).await.unwrap();
        let mut second = coffee_test();
        second.name = "Tea".to_string();
        storage.create_test(&second).await.unwrap();

        let tests = storage.list_tests().await.unwrap();
        assert_eq!(tests.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_lists_accepted() {
        let storage = create_test_storage().await;

        let new = NewTest {
            name: "Empty".to_string(),
            response_labels: ResponseLabels::PositiveNegative,
            brands: vec![],
            words: vec![],
        };
        let id = storage.create_test(&new).await.unwrap();

        let detail = storage.get_test(id).await.unwrap().unwrap();
        assert!(detail.brands.is_empty());
        assert!(detail.words.is_empty());
    }
}

mod run_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get_run() {
        let storage = create_test_storage().await;
        let test_id = storage.create_test(&coffee_test()).await.unwrap();

        let run_id = storage
            .create_run(test_id, Some(33), Some("feminino"))
            .await
            .unwrap();

        let run = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.test_id, test_id);
        assert_eq!(run.age, Some(33));
        assert_eq!(run.gender.as_deref(), Some("feminino"));
        assert!(run.completed_at.is_none(), "New run is in progress");
    }

    #[tokio::test]
    async fn test_complete_run_stamps_timestamp() {
        let storage = create_test_storage().await;
        let test_id = storage.create_test(&coffee_test()).await.unwrap();
        let run_id = storage.create_run(test_id, None, None).await.unwrap();

        let existed = storage.complete_run(run_id).await.unwrap();
        assert!(existed);

        let run = storage.get_run(run_id).await.unwrap().unwrap();
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_nonexistent_run() {
        let storage = create_test_storage().await;

        let existed = storage.complete_run(404).await.unwrap();
        assert!(!existed);
    }

    #[tokio::test]
    async fn test_list_runs_counts_trials() {
        let storage = create_test_storage().await;
        let test_id = storage.create_test(&coffee_test()).await.unwrap();
        let detail = storage.get_test(test_id).await.unwrap().unwrap();

        let run_id = storage.create_run(test_id, None, None).await.unwrap();
        let empty_run_id = storage.create_run(test_id, None, None).await.unwrap();

        for word in &detail.words {
            storage
                .insert_trial(&NewTrial {
                    run_id,
                    brand_id: detail.brands[0].id,
                    word_id: word.id,
                    positive: true,
                    rt_ms: 400,
                })
                .await
                .unwrap();
        }

        let runs = storage.list_runs(test_id).await.unwrap();
        assert_eq!(runs.len(), 2);

        let with_trials = runs.iter().find(|r| r.id == run_id).unwrap();
        assert_eq!(with_trials.trial_count, 2);

        let without_trials = runs.iter().find(|r| r.id == empty_run_id).unwrap();
        assert_eq!(without_trials.trial_count, 0);
    }
}

mod trial_tests {
    use super::*;

    #[tokio::test]
    async fn test_run_trials_joined_and_ordered() {
        let storage = create_test_storage().await;
        let test_id = storage.create_test(&coffee_test()).await.unwrap();
        let detail = storage.get_test(test_id).await.unwrap().unwrap();
        let run_id = storage.create_run(test_id, None, None).await.unwrap();

        // Answer in a fixed order; the detail view must preserve it.
        let pairs = [
            (detail.brands[1].id, detail.words[0].id, true, 512),
            (detail.brands[0].id, detail.words[1].id, false, 233),
        ];
        for (brand_id, word_id, positive, rt_ms) in pairs {
            storage
                .insert_trial(&NewTrial {
                    run_id,
                    brand_id,
                    word_id,
                    positive,
                    rt_ms,
                })
                .await
                .unwrap();
        }

        let trials = storage.run_trials(run_id).await.unwrap();
        assert_eq!(trials.len(), 2);

        assert_eq!(trials[0].brand_name, "B");
        assert_eq!(trials[0].word_text, "good");
        assert!(trials[0].positive);
        assert_eq!(trials[0].rt_ms, 512);
        assert_eq!(
            trials[0].brand_image_url.as_deref(),
            Some("/uploads/b.png")
        );

        assert_eq!(trials[1].brand_name, "A");
        assert_eq!(trials[1].word_text, "bad");
        assert!(!trials[1].positive);
    }
}

mod cascade_tests {
    use super::*;

    async fn count(storage: &SqliteStorage, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .fetch_one(storage.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delete_test_cascades_to_everything() {
        let storage = create_test_storage().await;
        let test_id = storage.create_test(&coffee_test()).await.unwrap();
        let detail = storage.get_test(test_id).await.unwrap().unwrap();

        let run_id = storage.create_run(test_id, Some(20), None).await.unwrap();
        storage
            .insert_trial(&NewTrial {
                run_id,
                brand_id: detail.brands[0].id,
                word_id: detail.words[0].id,
                positive: true,
                rt_ms: 300,
            })
            .await
            .unwrap();

        let deleted = storage.delete_test(test_id).await.unwrap();
        assert!(deleted);

        assert_eq!(count(&storage, "SELECT COUNT(*) FROM tests").await, 0);
        assert_eq!(count(&storage, "SELECT COUNT(*) FROM brands").await, 0);
        assert_eq!(count(&storage, "SELECT COUNT(*) FROM words").await, 0);
        assert_eq!(count(&storage, "SELECT COUNT(*) FROM runs").await, 0);
        assert_eq!(count(&storage, "SELECT COUNT(*) FROM trials").await, 0);
    }

    #[tokio::test]
    async fn test_delete_nonexistent_test() {
        let storage = create_test_storage().await;

        let deleted = storage.delete_test(404).await.unwrap();
        assert!(!deleted);
    }

    #[tokio::test]
    async fn test_delete_leaves_other_tests_alone() {
        let storage = create_test_storage().await;
        let first = storage.create_test(&coffee_test()).await.unwrap();
        let second = storage.create_test(&coffee_test()).await.unwrap();

        storage.delete_test(first).await.unwrap();

        assert!(storage.get_test(second).await.unwrap().is_some());
        assert_eq!(
            count(&storage, "SELECT COUNT(*) FROM brands").await,
            2,
            "Only the deleted test's brands are gone"
        );
    }
}
