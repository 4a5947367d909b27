//! Core value types for reasoning about how the multi-dimensional array values of a distributed
//! program are partitioned across a fixed set of compute devices.
//!
//! The central type is [`PartitionScheme`], an immutable recursive value that records which device
//! owns which slice of a value and answers the geometric queries a compiler needs while generating
//! per-device code. The remaining modules supply the small collaborators the scheme is expressed
//! in terms of: [`shapes`] for array and tuple shapes, [`trees`] for pairing a shape with one value
//! per leaf position, and [`arrays`] for the dense device-assignment grids.

pub mod arrays;
pub mod partitioning;
pub mod shapes;
pub mod trees;

pub use arrays::{DenseArray, DenseArrayError};
pub use partitioning::{
    is_reserved_device, DeviceId, PartitionError, PartitionScheme, TileTransform, HOST_DEVICE, UNASSIGNED_DEVICE,
};
pub use shapes::{ArrayShape, Shape};
pub use trees::{ShapeTree, ShapeTreeError};
