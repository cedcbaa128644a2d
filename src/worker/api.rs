use axum::{
    Json, Router,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};

use super::types::{TaskServer, Worker, WorkerError};
use crate::error::Result;
use crate::tasks::types::Task;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

impl TaskServer {
    pub fn new(worker: Arc<Worker>, address: &str) -> Self {
        Self {
            worker,
            address: address.to_string(),
        }
    }

    async fn get_tasks(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<String>> {
        Json(worker.running().await)
    }

    async fn start_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        Json(task): Json<Task>,
    ) -> impl IntoResponse {
        let guid = task.guid.clone();
        match worker.submit(task).await {
            Ok(()) => (StatusCode::CREATED, format!("Task {} started", guid)),
            Err(err @ WorkerError::AlreadyRunning(_)) => (StatusCode::CONFLICT, err.to_string()),
            Err(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        }
    }

    async fn stop_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        Path(guid): Path<String>,
    ) -> impl IntoResponse {
        match worker.cancel(&guid).await {
            Ok(()) => {
                info!(guid = %guid, "task stop requested over http");
                (StatusCode::OK, format!("Task {} stopping", guid))
            }
            Err(err) => (StatusCode::NOT_FOUND, err.to_string()),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/tasks", get(TaskServer::get_tasks).post(TaskServer::start_task))
            .route("/tasks/{guid}", delete(TaskServer::stop_task))
            .with_state(self.worker.clone())
    }

    pub async fn start_server(self) -> Result<()> {
        let app = self.router();
        let listener = TcpListener::bind(self.address.as_str()).await?;
        info!(address = %self.address, "task server listening");

        axum::serve(listener, app).await?;
        Ok(())
    }
}
