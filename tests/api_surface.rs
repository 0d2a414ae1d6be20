//! REST surface round-trips against the simulated cluster

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use stratus_orchestrator::api::{build_app, ApiConfig, AppState};
use stratus_orchestrator::autoscaling::AutoscalingController;
use stratus_orchestrator::caching::CachingController;
use stratus_orchestrator::cluster::sim::SimulatedCluster;
use stratus_orchestrator::insight::InsightIngestor;
use stratus_orchestrator::loadbalancing::LoadBalancingController;
use stratus_orchestrator::migration::MigrationController;
use stratus_orchestrator::preemption::PreemptionController;
use stratus_orchestrator::provisioning::ProvisioningController;

fn test_app() -> (Router, Arc<SimulatedCluster>) {
    let cluster = Arc::new(SimulatedCluster::new(3));
    let migrations = MigrationController::new(cluster.clone());
    let state = AppState {
        loadbalancing: LoadBalancingController::new(cluster.clone(), Arc::new(migrations.clone())),
        migrations,
        autoscaling: AutoscalingController::new(cluster.clone()),
        preemption: PreemptionController::new(cluster.clone()),
        caching: CachingController::new(),
        provisioning: ProvisioningController::new(cluster.clone()),
        insight: InsightIngestor::new(),
    };
    (build_app(state, &ApiConfig::default()), cluster)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn poll_status(app: &Router, uri: &str, terminal: &[&str]) -> Value {
    for _ in 0..300 {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let status = body["status"].as_str().unwrap().to_string();
        if terminal.contains(&status.as_str()) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{uri} never reached one of {terminal:?}");
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let response = app.oneshot(get("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "stratus-orchestrator");
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn test_autoscaler_crud_roundtrip() {
    let (app, _) = test_app();

    let request = json!({
        "workload_name": "inference",
        "namespace": "default",
        "workload_kind": "Deployment",
        "min_replicas": 1,
        "max_replicas": 10,
        "target_cpu_percent": 70.0
    });
    let response = app.clone().oneshot(post("/api/v1/autoscaling", request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("autoscaler-"));

    let response = app.clone().oneshot(get(&format!("/api/v1/autoscaling/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["request"]["workload_name"], "inference");

    let response = app.clone().oneshot(get("/api/v1/autoscaling")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);

    let response =
        app.clone().oneshot(delete(&format!("/api/v1/autoscaling/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get(&format!("/api/v1/autoscaling/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Deleting again keeps returning not-found.
    let response =
        app.clone().oneshot(delete(&format!("/api/v1/autoscaling/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "not_found");
    assert!(body["details"].as_str().unwrap().contains(&id));
}

#[tokio::test]
async fn test_autoscaler_validation_maps_to_400() {
    let (app, _) = test_app();
    let request = json!({
        "workload_name": "inference",
        "namespace": "default",
        "workload_kind": "Deployment",
        "min_replicas": 0,
        "max_replicas": 10,
        "target_cpu_percent": 70.0
    });
    let response = app.oneshot(post("/api/v1/autoscaling", request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "validation");
    assert!(body["details"].as_str().unwrap().contains("min_replicas"));
}

#[tokio::test]
async fn test_migration_endpoints() {
    let (app, _) = test_app();

    // Same source and target is rejected up front.
    let bad = json!({
        "pod_name": "node-1-pod-1",
        "namespace": "default",
        "source_node": "node-1",
        "target_node": "node-1"
    });
    let response = app.clone().oneshot(post("/api/v1/migrations", bad)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = json!({
        "pod_name": "node-1-pod-1",
        "namespace": "default",
        "source_node": "node-1",
        "target_node": "node-2"
    });
    let response = app.clone().oneshot(post("/api/v1/migrations", request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("migration-"));

    let body =
        poll_status(&app, &format!("/api/v1/migrations/{id}/status"), &["completed", "failed"])
            .await;
    assert_eq!(body["status"], "completed");

    let response = app.clone().oneshot(get(&format!("/api/v1/migrations/{id}"))).await.unwrap();
    let job = body_json(response).await;
    assert!(job["details"]["replacement_pod"].as_str().is_some());

    // The top-level metrics endpoint reports migrations.
    let response = app.clone().oneshot(get("/api/v1/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metrics = body_json(response).await;
    assert_eq!(metrics["total_migrations"], 1);

    let response = app.oneshot(get("/api/v1/migrations/migration-00000000")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_loadbalancing_endpoints() {
    let (app, _) = test_app();

    let response = app
        .clone()
        .oneshot(post("/api/v1/loadbalancing", json!({"dry_run": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("lb-"));

    let body = poll_status(
        &app,
        &format!("/api/v1/loadbalancing/{id}"),
        &["completed", "failed", "cancelled"],
    )
    .await;
    assert_eq!(body["status"], "completed");

    // Cancelling a finished job is a client error.
    let response =
        app.clone().oneshot(delete(&format!("/api/v1/loadbalancing/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.clone().oneshot(get("/api/v1/loadbalancing/metrics")).await.unwrap();
    let metrics = body_json(response).await;
    assert_eq!(metrics["cycles_total"], 1);

    let response = app
        .clone()
        .oneshot(post("/api/v1/loadbalancing", json!({"strategy": "round_robin"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preemption_endpoints() {
    let (app, _) = test_app();

    let request = json!({
        "node_name": "node-1",
        "resource_type": "all",
        "target_amount": "1"
    });
    let response = app.clone().oneshot(post("/api/v1/preemption", request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("preempt-"));

    let body = poll_status(&app, &format!("/api/v1/preemption/{id}"), &["completed", "failed"])
        .await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["details"]["target_achieved"], true);

    let response = app.clone().oneshot(get("/api/v1/preemption")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);

    let response = app.oneshot(get("/api/v1/preemption/metrics")).await.unwrap();
    let metrics = body_json(response).await;
    assert_eq!(metrics["total_pods_preempted"], 1);
}

#[tokio::test]
async fn test_caching_endpoints() {
    let (app, _) = test_app();

    let request = json!({
        "source_pvc": "dataset-imagenet",
        "source_namespace": "ml",
        "target_tier": "nvme"
    });
    let response = app.clone().oneshot(post("/api/v1/caching", request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("cache-"));

    poll_status(&app, &format!("/api/v1/caching/{id}"), &["active"]).await;

    let response = app
        .clone()
        .oneshot(post(&format!("/api/v1/caching/{id}/migrate"), json!({"target_tier": "ssd"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post(&format!("/api/v1/caching/{id}/evict"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post(&format!("/api/v1/caching/{id}/warmup"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post("/api/v1/caching/policy", json!({"action": "no_action"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post("/api/v1/caching/policy", json!({"action": "defragment"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.clone().oneshot(get("/api/v1/caching/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(delete(&format!("/api/v1/caching/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.oneshot(get(&format!("/api/v1/caching/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_provisioning_endpoints() {
    let (app, cluster) = test_app();

    let request = json!({
        "workload_name": "llm-finetune",
        "namespace": "ml",
        "workload_type": "training",
        "capacity": "100Gi"
    });
    let response = app.clone().oneshot(post("/api/v1/provisioning", request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("provisioning-"));

    let body =
        poll_status(&app, &format!("/api/v1/provisioning/{id}"), &["ready", "failed"]).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["details"]["profile"]["tier"], "nvme");
    assert!(cluster
        .created_pvcs()
        .await
        .iter()
        .any(|(ns, name, _)| ns == "ml" && name == "llm-finetune-data"));

    let response = app.clone().oneshot(delete(&format!("/api/v1/provisioning/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.oneshot(get("/api/v1/provisioning")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_insight_endpoints() {
    let (app, _) = test_app();

    let report = json!({
        "namespace": "ml",
        "name": "trainer",
        "workload_type": "training",
        "signature": {"read_pattern": "sequential", "burst": true}
    });
    let response = app.clone().oneshot(post("/api/v1/insight/reports", report)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["workload"], "ml/trainer");

    let response =
        app.clone().oneshot(get("/api/v1/insight/reports/ml/trainer")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["report"]["workload_type"], "training");

    let response = app.clone().oneshot(get("/api/v1/insight/reports/ml/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(get("/api/v1/insight/metrics")).await.unwrap();
    let metrics = body_json(response).await;
    assert_eq!(metrics["tracked_workloads"], 1);
    assert_eq!(metrics["reports_received"], 1);

    let response = app
        .clone()
        .oneshot(post("/api/v1/insight/cleanup", json!({"max_age_seconds": 3600})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["dropped"], 0);
}
