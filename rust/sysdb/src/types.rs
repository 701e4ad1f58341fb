use chroma_types::{CollectionUuid, MetadataUpdate, SegmentScope, SegmentType, SegmentUuid};

/// Filters for `get_collections`. A `None` field places no constraint.
#[derive(Default, Debug, Clone)]
pub struct GetCollectionsOptions {
    pub collection_id: Option<CollectionUuid>,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub tenant: Option<String>,
    pub database: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Filters for `get_segments`. A `None` field places no constraint.
#[derive(Default, Debug, Clone)]
pub struct GetSegmentsOptions {
    pub id: Option<SegmentUuid>,
    pub r#type: Option<SegmentType>,
    pub scope: Option<SegmentScope>,
    pub topic: Option<String>,
    pub collection: Option<CollectionUuid>,
}

/// Changes applied by `update_segment`. The outer `Option` of `topic` and
/// `collection` says whether to touch the field, the inner one sets or clears it.
#[derive(Default, Debug, Clone)]
pub struct UpdateSegmentOptions {
    pub topic: Option<Option<String>>,
    pub collection: Option<Option<CollectionUuid>>,
    pub metadata: Option<MetadataUpdate>,
}

impl UpdateSegmentOptions {
    pub(crate) fn is_empty(&self) -> bool {
        self.topic.is_none() && self.collection.is_none() && self.metadata.is_none()
    }
}
