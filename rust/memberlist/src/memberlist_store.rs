use crate::memberlist::{Member, Memberlist};
use async_trait::async_trait;
use chroma_error::{ChromaError, ErrorCodes};
use kube::api::{Api, PostParams};
use kube::{Client, CustomResource};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Opaque compare-and-swap token of the stored memberlist. `None` when the
/// memberlist was never written.
pub type ResourceVersion = Option<String>;

#[derive(Error, Debug)]
pub enum MemberlistStoreError {
    #[error("Memberlist was modified concurrently")]
    Conflict,
    #[error("Kubernetes request failed: {0}")]
    Kube(#[from] kube::Error),
    #[error("Memberlist store unavailable: {0}")]
    Unavailable(String),
}

impl ChromaError for MemberlistStoreError {
    fn code(&self) -> ErrorCodes {
        match self {
            MemberlistStoreError::Conflict => ErrorCodes::Aborted,
            MemberlistStoreError::Kube(_) => ErrorCodes::Unavailable,
            MemberlistStoreError::Unavailable(_) => ErrorCodes::Unavailable,
        }
    }
}

/// The persisted, versioned memberlist.
#[async_trait]
pub trait MemberlistStore: Send + Sync + Debug {
    async fn get_memberlist(&self) -> Result<(Memberlist, ResourceVersion), MemberlistStoreError>;

    /// Replaces the memberlist if it is still at `resource_version`. Returns
    /// the new version.
    async fn update_memberlist(
        &self,
        memberlist: &Memberlist,
        resource_version: &ResourceVersion,
    ) -> Result<ResourceVersion, MemberlistStoreError>;
}

/* =========== CRD ============== */
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "chroma.cluster",
    version = "v1",
    kind = "MemberList",
    root = "MemberListKubeResource",
    namespaced
)]
pub struct MemberListCrd {
    // Kubernetes creates the resource without members, so this stays optional
    // for deserialization to succeed before the first write.
    pub members: Option<Vec<Member>>,
}

/* =========== CR Store ============== */
pub struct CustomResourceMemberlistStore {
    memberlist_name: String,
    kube_ns: String,
    memberlist_cr_client: Api<MemberListKubeResource>,
}

impl Debug for CustomResourceMemberlistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomResourceMemberlistStore")
            .field("memberlist_name", &self.memberlist_name)
            .field("kube_ns", &self.kube_ns)
            .finish()
    }
}

impl CustomResourceMemberlistStore {
    pub fn new(kube_client: Client, kube_ns: &str, memberlist_name: &str) -> Self {
        CustomResourceMemberlistStore {
            memberlist_name: memberlist_name.to_string(),
            kube_ns: kube_ns.to_string(),
            memberlist_cr_client: Api::<MemberListKubeResource>::namespaced(kube_client, kube_ns),
        }
    }
}

fn map_kube_error(err: kube::Error) -> MemberlistStoreError {
    match err {
        kube::Error::Api(ref response) if response.code == 409 => MemberlistStoreError::Conflict,
        err => MemberlistStoreError::Kube(err),
    }
}

#[async_trait]
impl MemberlistStore for CustomResourceMemberlistStore {
    async fn get_memberlist(&self) -> Result<(Memberlist, ResourceVersion), MemberlistStoreError> {
        let resource = self
            .memberlist_cr_client
            .get_opt(&self.memberlist_name)
            .await?;
        let Some(resource) = resource else {
            return Ok((vec![], None));
        };
        Ok((
            resource.spec.members.unwrap_or_default(),
            resource.metadata.resource_version,
        ))
    }

    async fn update_memberlist(
        &self,
        memberlist: &Memberlist,
        resource_version: &ResourceVersion,
    ) -> Result<ResourceVersion, MemberlistStoreError> {
        let mut resource = MemberListKubeResource::new(
            &self.memberlist_name,
            MemberListCrd {
                members: Some(memberlist.clone()),
            },
        );
        resource.metadata.namespace = Some(self.kube_ns.clone());
        resource.metadata.resource_version = resource_version.clone();

        let params = PostParams::default();
        let written = match resource_version {
            Some(_) => {
                self.memberlist_cr_client
                    .replace(&self.memberlist_name, &params, &resource)
                    .await
            }
            None => self.memberlist_cr_client.create(&params, &resource).await,
        }
        .map_err(map_kube_error)?;

        tracing::info!(
            name = %self.memberlist_name,
            members = memberlist.len(),
            "Wrote memberlist"
        );
        Ok(written.metadata.resource_version)
    }
}

/* =========== In memory ============== */
#[derive(Debug, Default)]
struct InMemoryMemberlistState {
    memberlist: Memberlist,
    version: u64,
    writes: usize,
    unavailable: bool,
}

/// Keeps the memberlist in memory with a counter as the version.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMemberlistStore {
    state: Arc<Mutex<InMemoryMemberlistState>>,
}

impl InMemoryMemberlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    pub fn memberlist(&self) -> Memberlist {
        self.state.lock().memberlist.clone()
    }

    /// Makes reads and writes fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Simulates a write by another writer, moving the version forward.
    pub fn bump_version(&self) {
        self.state.lock().version += 1;
    }

    fn version_token(version: u64) -> ResourceVersion {
        if version == 0 {
            None
        } else {
            Some(version.to_string())
        }
    }
}

#[async_trait]
impl MemberlistStore for InMemoryMemberlistStore {
    async fn get_memberlist(&self) -> Result<(Memberlist, ResourceVersion), MemberlistStoreError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(MemberlistStoreError::Unavailable(
                "memberlist reads disabled".to_string(),
            ));
        }
        Ok((state.memberlist.clone(), Self::version_token(state.version)))
    }

    async fn update_memberlist(
        &self,
        memberlist: &Memberlist,
        resource_version: &ResourceVersion,
    ) -> Result<ResourceVersion, MemberlistStoreError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(MemberlistStoreError::Unavailable(
                "memberlist writes disabled".to_string(),
            ));
        }
        if *resource_version != Self::version_token(state.version) {
            return Err(MemberlistStoreError::Conflict);
        }
        state.memberlist = memberlist.clone();
        state.version += 1;
        state.writes += 1;
        Ok(Self::version_token(state.version))
    }
}
