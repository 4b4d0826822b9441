//! Management handlers for the `/api/jobs` surface.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::api::{validated_json::ValidatedJson, ApiError};
use crate::app::App;
use crate::job::{Job, JobCreate};

pub async fn list(State(app): State<App>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(app.store.list().await?))
}

pub async fn show(
    State(app): State<App>,
    Path(name): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = app
        .store
        .get(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(name))?;
    Ok(Json(job))
}

/// Store first, then schedule; a failed registration rolls the store
/// back so both sides stay in agreement.
pub async fn create(
    State(app): State<App>,
    ValidatedJson(draft): ValidatedJson<JobCreate>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = draft.into_job(Utc::now());
    info!(job = %job.job_name, schedule = %job.schedule_time, "creating job");

    app.store.put(&job).await?;

    if let Err(e) = app.scheduler.register(&job) {
        warn!(job = %job.job_name, "scheduling failed, rolling back creation: {e}");
        if let Err(remove_err) = app.store.remove(&job.job_name).await {
            warn!(job = %job.job_name, "rollback failed: {remove_err}");
        }
        return Err(e.into());
    }

    Ok((StatusCode::CREATED, Json(job)))
}

/// Unregister, replace, re-register. `created_at` and `last_run`
/// carry over from the prior record; an in-flight run finishes
/// against the snapshot it already took.
pub async fn update(
    State(app): State<App>,
    Path(name): Path<String>,
    ValidatedJson(draft): ValidatedJson<JobCreate>,
) -> Result<Json<Job>, ApiError> {
    if app.store.get(&name).await?.is_none() {
        return Err(ApiError::NotFound(name));
    }
    info!(job = %name, "updating job");

    app.scheduler.unregister(&name);
    let stored = app.store.replace(&name, draft.into_job(Utc::now())).await?;
    app.scheduler.register(&stored)?;

    Ok(Json(stored))
}

pub async fn destroy(
    State(app): State<App>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    info!(job = %name, "deleting job");
    app.scheduler.unregister(&name);
    app.store.remove(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// One-shot synchronous run returning the CSV output. Subject to the
/// same one-run-per-job rule as scheduled fires.
pub async fn test_run(
    State(app): State<App>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let job = app
        .store
        .get(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(name.clone()))?;

    let gate = app.scheduler.run_gate(&name);
    let Ok(_permit) = gate.try_acquire_owned() else {
        return Err(ApiError::Busy(name));
    };

    let csv = app.executor.test_run(&job).await?;
    Ok(([(header::CONTENT_TYPE, "text/csv")], csv).into_response())
}

#[cfg(test)]
mod tests {
    use crate::tests::setup_test::setup_test;
    use serde_json::{json, Value};

    fn draft(name: &str) -> Value {
        json!({
            "job_name": name,
            "schedule_time": "* * * * *",
            "data_source": {
                "source_type": "api",
                "location": "https://example.test/data"
            },
            "processing_script": "result = data",
            "consumer_emails": ["x@example.com"]
        })
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let test = setup_test().await;

        let response = test.server.post("/api/jobs/create").json(&draft("j1")).await;
        assert_eq!(response.status_code(), 201);

        let body: Value = response.json();
        assert_eq!(body["job_name"], "j1");
        assert!(body["created_at"].is_string());
        assert!(body["last_run"].is_null());

        let listed: Vec<Value> = test.server.get("/api/jobs").await.json();
        assert_eq!(listed.len(), 1);
        assert_eq!(test.scheduler.list(), ["j1"]);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let test = setup_test().await;

        let first = test.server.post("/api/jobs/create").json(&draft("j1")).await;
        assert_eq!(first.status_code(), 201);

        let second = test.server.post("/api/jobs/create").json(&draft("j1")).await;
        assert_eq!(second.status_code(), 400);
        assert!(second.text().contains("already exists"));

        assert_eq!(test.store.list().await.unwrap().len(), 1);
        assert_eq!(test.scheduler.list().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failures_are_400() {
        let test = setup_test().await;

        let mut bad_cron = draft("j1");
        bad_cron["schedule_time"] = json!("*/0 * * * *");
        assert_eq!(
            test.server
                .post("/api/jobs/create")
                .json(&bad_cron)
                .await
                .status_code(),
            400
        );

        let mut no_emails = draft("j2");
        no_emails["consumer_emails"] = json!([]);
        assert_eq!(
            test.server
                .post("/api/jobs/create")
                .json(&no_emails)
                .await
                .status_code(),
            400
        );

        let mut file_without_type = draft("j3");
        file_without_type["data_source"] =
            json!({"source_type": "file", "location": "data/in.csv"});
        assert_eq!(
            test.server
                .post("/api/jobs/create")
                .json(&file_without_type)
                .await
                .status_code(),
            400
        );

        assert!(test.scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_get_job() {
        let test = setup_test().await;
        test.server.post("/api/jobs/create").json(&draft("j1")).await;

        let found = test.server.get("/api/jobs/j1").await;
        assert_eq!(found.status_code(), 200);
        let body: Value = found.json();
        assert_eq!(body["schedule_time"], "* * * * *");

        assert_eq!(test.server.get("/api/jobs/ghost").await.status_code(), 404);
    }

    #[tokio::test]
    async fn test_update_preserves_created_at_and_last_run() {
        let test = setup_test().await;
        let created: Value = test
            .server
            .post("/api/jobs/create")
            .json(&draft("j1"))
            .await
            .json();

        test.store
            .touch_last_run("j1", chrono::Utc::now())
            .await
            .unwrap();

        let mut changed = draft("j1");
        changed["schedule_time"] = json!("0 12 * * *");
        let response = test.server.put("/api/jobs/j1").json(&changed).await;
        assert_eq!(response.status_code(), 200);

        let body: Value = response.json();
        assert_eq!(body["schedule_time"], "0 12 * * *");
        assert_eq!(body["created_at"], created["created_at"]);
        assert!(body["last_run"].is_string());

        assert_eq!(test.scheduler.schedule_of("j1").unwrap(), "0 12 * * *");
    }

    #[tokio::test]
    async fn test_update_missing_is_404() {
        let test = setup_test().await;
        let response = test.server.put("/api/jobs/ghost").json(&draft("ghost")).await;
        assert_eq!(response.status_code(), 404);
        assert!(test.scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_delete_job() {
        let test = setup_test().await;
        test.server.post("/api/jobs/create").json(&draft("j1")).await;

        let response = test.server.delete("/api/jobs/j1").await;
        assert_eq!(response.status_code(), 204);
        assert!(test.store.list().await.unwrap().is_empty());
        assert!(test.scheduler.list().is_empty());

        assert_eq!(test.server.delete("/api/jobs/j1").await.status_code(), 404);
    }

    #[tokio::test]
    async fn test_test_endpoint_returns_csv() {
        let test = setup_test().await;

        let input = test.data_dir().join("input.csv");
        std::fs::write(&input, "a,b\n1,2\n3,4\n").unwrap();

        let mut file_draft = draft("j1");
        file_draft["data_source"] = json!({
            "source_type": "file",
            "location": input.to_str().unwrap(),
            "file_type": "csv"
        });
        file_draft["processing_script"] = json!("result = data.filter(|row| row.a > 1);");
        test.server.post("/api/jobs/create").json(&file_draft).await;

        let response = test.server.post("/api/jobs/j1/test").await;
        assert_eq!(response.status_code(), 200);
        let csv = response.text();
        assert!(csv.starts_with("a,b"));
        assert!(csv.contains("3,4"));
        assert!(!csv.contains("1,2"));

        // A test run neither emails nor advances last_run.
        assert!(test.mailer.messages().unwrap().is_empty());
        let job = test.store.get("j1").await.unwrap().unwrap();
        assert!(job.last_run.is_none());
    }

    #[tokio::test]
    async fn test_test_endpoint_missing_job_is_404() {
        let test = setup_test().await;
        assert_eq!(
            test.server.post("/api/jobs/ghost/test").await.status_code(),
            404
        );
    }

    #[tokio::test]
    async fn test_test_endpoint_coalesces_with_active_run() {
        let test = setup_test().await;
        test.server.post("/api/jobs/create").json(&draft("j1")).await;

        let _permit = test.scheduler.run_gate("j1").try_acquire_owned().unwrap();
        let response = test.server.post("/api/jobs/j1/test").await;
        assert_eq!(response.status_code(), 409);
    }
}
