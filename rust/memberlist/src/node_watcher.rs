use crate::memberlist::{sort_memberlist, Member, Memberlist, WorkerState};
use crate::work_queue::WorkQueue;
use async_trait::async_trait;
use chroma_error::{ChromaError, ErrorCodes};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum NodeWatcherError {
    #[error("Node watcher already started")]
    AlreadyStarted,
    #[error("Node watcher has not completed its initial listing")]
    NotSynced,
    #[error("Node watcher unavailable: {0}")]
    Unavailable(String),
}

impl ChromaError for NodeWatcherError {
    fn code(&self) -> ErrorCodes {
        match self {
            NodeWatcherError::AlreadyStarted => ErrorCodes::FailedPrecondition,
            NodeWatcherError::NotSynced => ErrorCodes::Unavailable,
            NodeWatcherError::Unavailable(_) => ErrorCodes::Unavailable,
        }
    }
}

/// Observes worker liveness.
#[async_trait]
pub trait NodeWatcher: Send + Sync + Debug {
    /// Starts delivering the id of every worker that changes to `queue`.
    async fn start(&self, queue: WorkQueue<String>) -> Result<(), NodeWatcherError>;

    /// Tears down the event subscription.
    async fn stop(&self);

    /// Point-in-time listing of the ready workers, sorted by id.
    async fn list_ready_members(&self) -> Result<Memberlist, NodeWatcherError>;
}

//////////////////////// Kubernetes ////////////////////////

/// Ready only when the pod reports a `Ready` condition of `True` and is not
/// being deleted.
pub fn pod_worker_state(pod: &Pod) -> WorkerState {
    if pod.metadata.deletion_timestamp.is_some() {
        return WorkerState::NotReady;
    }
    let ready_condition = pod
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition.type_ == "Ready")
        });
    match ready_condition.map(|condition| condition.status.as_str()) {
        Some("True") => WorkerState::Ready,
        Some("False") => WorkerState::NotReady,
        _ => WorkerState::Unknown,
    }
}

pub fn member_from_pod(pod: &Pod) -> Option<Member> {
    let member_id = pod.metadata.name.clone()?;
    let member_ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.clone())
        .unwrap_or_default();
    let member_node_name = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .unwrap_or_default();
    Some(Member {
        member_id,
        member_ip,
        member_node_name,
    })
}

/// Watches worker pods selected by a label selector and keeps them in a
/// local reflector cache.
pub struct KubernetesNodeWatcher {
    pod_client: Api<Pod>,
    label_selector: String,
    reader: Store<Pod>,
    writer: Mutex<Option<Writer<Pod>>>,
    synced: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for KubernetesNodeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesNodeWatcher")
            .field("label_selector", &self.label_selector)
            .field("synced", &self.synced.load(Ordering::Relaxed))
            .finish()
    }
}

impl KubernetesNodeWatcher {
    pub fn new(kube_client: Client, kube_ns: &str, label_selector: &str) -> Self {
        let (reader, writer) = reflector::store::<Pod>();
        KubernetesNodeWatcher {
            pod_client: Api::<Pod>::namespaced(kube_client, kube_ns),
            label_selector: label_selector.to_string(),
            reader,
            writer: Mutex::new(Some(writer)),
            synced: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl NodeWatcher for KubernetesNodeWatcher {
    async fn start(&self, queue: WorkQueue<String>) -> Result<(), NodeWatcherError> {
        let Some(writer) = self.writer.lock().take() else {
            return Err(NodeWatcherError::AlreadyStarted);
        };
        let config = watcher::Config::default().labels(&self.label_selector);
        let stream = reflector::reflector(writer, watcher(self.pod_client.clone(), config))
            .default_backoff();
        let synced = self.synced.clone();
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = stream.next() => event,
                };
                match event {
                    Some(Ok(watcher::Event::Applied(pod))) | Some(Ok(watcher::Event::Deleted(pod))) => {
                        if let Some(name) = pod.metadata.name {
                            tracing::debug!(pod = %name, "Pod event");
                            queue.add(name);
                        }
                    }
                    Some(Ok(watcher::Event::Restarted(pods))) => {
                        synced.store(true, Ordering::Release);
                        tracing::info!(pods = pods.len(), "Pod watch (re)listed");
                        for name in pods.into_iter().filter_map(|pod| pod.metadata.name) {
                            queue.add(name);
                        }
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "Error watching pods");
                    }
                    None => {
                        tracing::warn!("Pod watch stream ended");
                        break;
                    }
                }
            }
        });
        *self.task.lock() = Some(task);
        tracing::info!(label_selector = %self.label_selector, "Started node watcher");
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Node watcher task failed");
            }
        }
    }

    async fn list_ready_members(&self) -> Result<Memberlist, NodeWatcherError> {
        if !self.synced.load(Ordering::Acquire) {
            return Err(NodeWatcherError::NotSynced);
        }
        Ok(ready_members(&self.reader))
    }
}

/// Ready workers in the reflector cache, sorted by member id.
fn ready_members(store: &Store<Pod>) -> Memberlist {
    let mut members: Memberlist = store
        .state()
        .iter()
        .filter(|pod| pod_worker_state(pod) == WorkerState::Ready)
        .filter_map(|pod| member_from_pod(pod))
        .collect();
    sort_memberlist(&mut members);
    members
}

//////////////////////// In memory ////////////////////////

#[derive(Debug, Default)]
struct InMemoryNodeWatcherState {
    workers: HashMap<String, (Member, WorkerState)>,
    queue: Option<WorkQueue<String>>,
    unavailable: bool,
}

/// Worker states set by hand. Every change is delivered to the queue once
/// the watcher was started.
#[derive(Debug, Default, Clone)]
pub struct InMemoryNodeWatcher {
    state: Arc<Mutex<InMemoryNodeWatcherState>>,
}

impl InMemoryNodeWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_worker(&self, member: Member, worker_state: WorkerState) {
        let mut state = self.state.lock();
        let member_id = member.member_id.clone();
        state
            .workers
            .insert(member_id.clone(), (member, worker_state));
        if let Some(queue) = &state.queue {
            queue.add(member_id);
        }
    }

    pub fn remove_worker(&self, member_id: &str) {
        let mut state = self.state.lock();
        state.workers.remove(member_id);
        if let Some(queue) = &state.queue {
            queue.add(member_id.to_string());
        }
    }

    /// Makes `list_ready_members` fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }
}

#[async_trait]
impl NodeWatcher for InMemoryNodeWatcher {
    async fn start(&self, queue: WorkQueue<String>) -> Result<(), NodeWatcherError> {
        let mut state = self.state.lock();
        if state.queue.is_some() {
            return Err(NodeWatcherError::AlreadyStarted);
        }
        for member_id in state.workers.keys() {
            queue.add(member_id.clone());
        }
        state.queue = Some(queue);
        Ok(())
    }

    async fn stop(&self) {
        self.state.lock().queue = None;
    }

    async fn list_ready_members(&self) -> Result<Memberlist, NodeWatcherError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(NodeWatcherError::Unavailable(
                "worker listing disabled".to_string(),
            ));
        }
        let mut members: Memberlist = state
            .workers
            .values()
            .filter(|(_, worker_state)| *worker_state == WorkerState::Ready)
            .map(|(member, _)| member.clone())
            .collect();
        sort_memberlist(&mut members);
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::time::Duration;

    fn pod(name: &str, ready: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-1".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.1".to_string()),
                conditions: ready.map(|status| {
                    vec![PodCondition {
                        type_: "Ready".to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
        }
    }

    fn member(id: &str) -> Member {
        Member {
            member_id: id.to_string(),
            member_ip: format!("ip-{id}"),
            member_node_name: "node".to_string(),
        }
    }

    #[test]
    fn test_ready_members_from_reflector_store() {
        let (reader, mut writer): (Store<Pod>, Writer<Pod>) = reflector::store();
        writer.apply_watcher_event(&watcher::Event::Restarted(vec![
            pod("worker-b", Some("True")),
            pod("worker-c", Some("False")),
            pod("worker-a", Some("True")),
        ]));
        let ids: Vec<String> = ready_members(&reader)
            .into_iter()
            .map(|member| member.member_id)
            .collect();
        assert_eq!(ids, vec!["worker-a", "worker-b"]);

        writer.apply_watcher_event(&watcher::Event::Deleted(pod("worker-a", Some("True"))));
        let ids: Vec<String> = ready_members(&reader)
            .into_iter()
            .map(|member| member.member_id)
            .collect();
        assert_eq!(ids, vec!["worker-b"]);
    }

    #[test]
    fn test_pod_worker_state() {
        assert_eq!(pod_worker_state(&pod("a", Some("True"))), WorkerState::Ready);
        assert_eq!(
            pod_worker_state(&pod("a", Some("False"))),
            WorkerState::NotReady
        );
        assert_eq!(pod_worker_state(&pod("a", None)), WorkerState::Unknown);
        assert_eq!(
            pod_worker_state(&pod("a", Some("Unknown"))),
            WorkerState::Unknown
        );

        let mut terminating = pod("a", Some("True"));
        terminating.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(pod_worker_state(&terminating), WorkerState::NotReady);
    }

    #[test]
    fn test_member_from_pod() {
        assert_eq!(
            member_from_pod(&pod("query-service-0", Some("True"))),
            Some(Member {
                member_id: "query-service-0".to_string(),
                member_ip: "10.0.0.1".to_string(),
                member_node_name: "node-1".to_string(),
            })
        );
        assert_eq!(member_from_pod(&Pod::default()), None);
    }

    #[tokio::test]
    async fn test_in_memory_watcher_enqueues_changes() {
        let watcher = InMemoryNodeWatcher::new();
        watcher.set_worker(member("b"), WorkerState::Ready);
        let queue = WorkQueue::new(Duration::from_millis(1), Duration::from_millis(10));
        watcher.start(queue.clone()).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert!(matches!(
            watcher.start(queue.clone()).await,
            Err(NodeWatcherError::AlreadyStarted)
        ));

        watcher.set_worker(member("a"), WorkerState::Ready);
        watcher.set_worker(member("c"), WorkerState::NotReady);
        assert_eq!(queue.len(), 3);

        let ready = watcher.list_ready_members().await.unwrap();
        assert_eq!(ready, vec![member("a"), member("b")]);

        watcher.set_unavailable(true);
        assert!(watcher.list_ready_members().await.is_err());

        watcher.stop().await;
        watcher.set_unavailable(false);
        watcher.remove_worker("a");
        assert_eq!(queue.len(), 3);
        assert_eq!(watcher.list_ready_members().await.unwrap(), vec![member("b")]);
    }
}
