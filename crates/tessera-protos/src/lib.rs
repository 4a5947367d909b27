//! Wire-format messages for persisting and transmitting partition metadata.
//!
//! The messages in this crate are hand-written [`prost`] structs rather than `protoc`-generated code, so the crate
//! builds without a protobuf toolchain while remaining byte-compatible with any other producer or consumer of the
//! same schema. Use [`prost::Message::encode`] and [`prost::Message::decode`] to convert messages to and from bytes.
//!
//! These messages are deliberately permissive: they can represent states that are not meaningful partition schemes
//! (for example, a tiled scheme without a tile shape). Semantic checking happens when a message is converted into
//! the in-memory scheme representation, not here.

use prost::{Enumeration, Message};

/// Kind of partition scheme represented by a [`PartitionSchemeProto`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum PartitionKind {
    /// The whole value is copied identically to every device.
    Replicated = 0,

    /// The whole value is placed, unsplit, on a single device.
    Maximal = 1,

    /// One scheme per leaf position of a tuple-shaped value; only
    /// [`PartitionSchemeProto::tuple_elements`] is meaningful.
    Tuple = 2,

    /// The value is cut into a regular grid of tiles described by the tile shape
    /// and the tile-assignment fields.
    Tiled = 3,
}

/// Shape of a multi-dimensional array value, or of a (possibly nested) tuple of such values.
#[derive(Clone, PartialEq, Message)]
pub struct ShapeProto {
    /// Extent of each array dimension, ordered from outermost to innermost. Empty for scalars and tuples.
    #[prost(int64, repeated, tag = "1")]
    pub dimensions: Vec<i64>,

    /// Marks this shape as a tuple. Required because an empty tuple and a scalar both have no dimensions.
    #[prost(bool, tag = "2")]
    pub is_tuple: bool,

    /// Element shapes of a tuple shape, in order. Only meaningful when [`ShapeProto::is_tuple`] is set.
    #[prost(message, repeated, tag = "3")]
    pub tuple_shapes: Vec<ShapeProto>,
}

/// Describes how one value of a distributed program is partitioned across devices.
#[derive(Clone, PartialEq, Message)]
pub struct PartitionSchemeProto {
    /// Kind of partition scheme represented by this message.
    #[prost(enumeration = "PartitionKind", tag = "1")]
    pub kind: i32,

    /// Shape of one tile. Only meaningful for [`PartitionKind::Tiled`].
    #[prost(message, optional, tag = "2")]
    pub tile_shape: Option<ShapeProto>,

    /// Extents of the tile-assignment grid, one per partitioned-value dimension.
    #[prost(int64, repeated, tag = "3")]
    pub tile_assignment_extents: Vec<i64>,

    /// Flattened, row-major list of the device ids owning each tile. For [`PartitionKind::Maximal`]
    /// this carries exactly the one device owning the whole value.
    #[prost(int64, repeated, tag = "4")]
    pub tile_assignment_devices: Vec<i64>,

    /// Flattened pre-order list of leaf schemes for a tuple-shaped value.
    /// Only meaningful for [`PartitionKind::Tuple`].
    #[prost(message, repeated, tag = "5")]
    pub tuple_elements: Vec<PartitionSchemeProto>,
}
