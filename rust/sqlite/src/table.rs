use sea_query::Iden;

/// A key/value metadata table keyed by the owning entity's id.
pub trait MetadataTable {
    fn table_name() -> Self;
    fn id_column() -> Self;
    fn key_column() -> Self;
    fn str_value_column() -> Self;
    fn int_value_column() -> Self;
    fn float_value_column() -> Self;
}

#[derive(Iden)]
pub enum Tenants {
    Table,
    Id,
    Ts,
    LastCompactionTime,
}

#[derive(Iden)]
pub enum Databases {
    Table,
    Id,
    Name,
    TenantId,
    Ts,
}

#[derive(Iden)]
pub enum Collections {
    Table,
    Id,
    Name,
    Topic,
    Dimension,
    DatabaseId,
    LogPosition,
    Version,
    VersionFileName,
    CreatedAt,
}

#[derive(Iden)]
pub enum CollectionMetadata {
    Table,
    CollectionId,
    Key,
    StrValue,
    IntValue,
    FloatValue,
}

impl MetadataTable for CollectionMetadata {
    fn table_name() -> Self {
        CollectionMetadata::Table
    }
    fn id_column() -> Self {
        CollectionMetadata::CollectionId
    }
    fn key_column() -> Self {
        CollectionMetadata::Key
    }
    fn str_value_column() -> Self {
        CollectionMetadata::StrValue
    }
    fn int_value_column() -> Self {
        CollectionMetadata::IntValue
    }
    fn float_value_column() -> Self {
        CollectionMetadata::FloatValue
    }
}

#[derive(Iden)]
pub enum Segments {
    Table,
    Id,
    Type,
    Scope,
    Collection,
    Topic,
    FilePaths,
}

#[derive(Iden)]
pub enum SegmentMetadata {
    Table,
    SegmentId,
    Key,
    StrValue,
    IntValue,
    FloatValue,
}

impl MetadataTable for SegmentMetadata {
    fn table_name() -> Self {
        SegmentMetadata::Table
    }
    fn id_column() -> Self {
        SegmentMetadata::SegmentId
    }
    fn key_column() -> Self {
        SegmentMetadata::Key
    }
    fn str_value_column() -> Self {
        SegmentMetadata::StrValue
    }
    fn int_value_column() -> Self {
        SegmentMetadata::IntValue
    }
    fn float_value_column() -> Self {
        SegmentMetadata::FloatValue
    }
}

#[derive(Iden)]
pub enum RecordLogs {
    Table,
    CollectionId,
    Id,
    Timestamp,
    Record,
}

#[derive(Iden)]
pub enum Notifications {
    Table,
    Id,
    CollectionId,
    Type,
    Status,
}
