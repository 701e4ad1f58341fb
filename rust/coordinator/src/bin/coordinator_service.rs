use chroma_coordinator::coordinator_service_entrypoint;

#[tokio::main]
async fn main() {
    Box::pin(coordinator_service_entrypoint()).await;
}
