use crate::helpers::spawn_app;

#[tokio::test]
async fn health_returns_200_and_reports_queue_depth() {
    let app = spawn_app().await;

    let response = app.get_health().await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["queue_depth"], 0);
    assert_eq!(body["db_ok"], true);
}
