//! Kafka API key constants.
//!
//! The wire codec that maps these onto bytes is external to this crate;
//! this enum exists so the router's handler dispatch and a future codec
//! layer agree on the same numbering.

/// Kafka protocol API keys the core implements handlers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ApiKey {
    Produce = 0,
    Fetch = 1,
    ListOffsets = 2,
    Metadata = 3,
    OffsetCommit = 8,
    OffsetFetch = 9,
    FindCoordinator = 10,
    JoinGroup = 11,
    Heartbeat = 12,
    LeaveGroup = 13,
    SyncGroup = 14,
    DescribeGroups = 15,
    ListGroups = 16,
    SaslHandshake = 17,
    ApiVersions = 18,
    CreateTopics = 19,
    DeleteTopics = 20,
    DeleteRecords = 21,
    InitProducerId = 22,
    AddPartitionsToTxn = 24,
    AddOffsetsToTxn = 25,
    EndTxn = 26,
    WriteTxnMarkers = 27,
    TxnOffsetCommit = 28,
    DescribeConfigs = 32,
    AlterConfigs = 33,
    SaslAuthenticate = 36,
    DescribeLogDirs = 35,
}

impl ApiKey {
    #[must_use]
    pub fn from_i16(v: i16) -> Option<Self> {
        use ApiKey::{
            AddOffsetsToTxn, AddPartitionsToTxn, AlterConfigs, ApiVersions, CreateTopics,
            DeleteRecords, DeleteTopics, DescribeConfigs, DescribeGroups, DescribeLogDirs, EndTxn,
            Fetch, FindCoordinator, Heartbeat, InitProducerId, JoinGroup, LeaveGroup, ListGroups,
            ListOffsets, Metadata, OffsetCommit, OffsetFetch, Produce, SaslAuthenticate,
            SaslHandshake, SyncGroup, TxnOffsetCommit, WriteTxnMarkers,
        };
        Some(match v {
            0 => Produce,
            1 => Fetch,
            2 => ListOffsets,
            3 => Metadata,
            8 => OffsetCommit,
            9 => OffsetFetch,
            10 => FindCoordinator,
            11 => JoinGroup,
            12 => Heartbeat,
            13 => LeaveGroup,
            14 => SyncGroup,
            15 => DescribeGroups,
            16 => ListGroups,
            17 => SaslHandshake,
            18 => ApiVersions,
            19 => CreateTopics,
            20 => DeleteTopics,
            21 => DeleteRecords,
            22 => InitProducerId,
            24 => AddPartitionsToTxn,
            25 => AddOffsetsToTxn,
            26 => EndTxn,
            27 => WriteTxnMarkers,
            28 => TxnOffsetCommit,
            32 => DescribeConfigs,
            33 => AlterConfigs,
            35 => DescribeLogDirs,
            36 => SaslAuthenticate,
            _ => return None,
        })
    }
}
