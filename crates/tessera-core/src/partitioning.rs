//! This module provides the core data structure for representing how one value of a distributed program is
//! _partitioned_ across a fixed set of compute devices, together with the algorithms a compiler needs to reason
//! about that partitioning: which device owns which tile, what region of the original value each device's tile
//! covers, how many distinct devices participate, and whether a given partitioning is valid for a concrete shape
//! and device count.
//!
//! # Partition modes
//!
//! A [`PartitionScheme`] is a recursive value with three leaf modes and one composite mode:
//!
//! | Mode | Meaning | Text form |
//! |---|---|---|
//! | [`Replicated`][PartitionScheme::Replicated] | Every device holds a full, identical copy | `{replicated}` |
//! | [`Maximal`][PartitionScheme::Maximal] | The whole value lives, unsplit, on one device | `{maximal device=3}` |
//! | [`Tiled`][PartitionScheme::Tiled] | The value is cut into a regular grid of tiles | `{[2,2] devices=[2,1]0,1}` |
//! | [`Tuple`][PartitionScheme::Tuple] | One scheme per leaf of a tuple-shaped value | `{{replicated}, {maximal device=3}}` |
//!
//! # Implicit padding
//!
//! A tiled scheme never requires the partitioned value's extents to be exact multiples of the tile extents. Any
//! dimension that is not an exact multiple is implicitly padded up to the next tile boundary; the padding is
//! virtual and never materialized. For example, tiling a `[3,2]` value with tile shape `[2,2]` over a `[2,1]`
//! device grid covers rows `0..2` on device `0` and rows `2..4` on device `1`, where row `3` is padding:
//!
//! ```text
//!   rows 0..2   +--------+   device 0
//!   rows 2..4   +--------+   device 1 (row 3 is padding)
//! ```
//!
//! [`tile_limit_for_device`][PartitionScheme::tile_limit_for_device] deliberately reports the *unclipped* upper
//! corner (`4` here), so callers can detect padding; they must clip to the true extents before addressing data.
//!
//! # Immutability and sharing
//!
//! Schemes are pure values: every query is read-only and every transform returns a new, independent instance.
//! Any number of compiler passes may therefore query the same scheme concurrently without synchronization.
//! Structural equality and hashing are derived from the same fields, which makes schemes usable as cache and
//! map keys (e.g., for memoizing validation results).

use std::collections::BTreeMap;
use std::fmt::Display;

use thiserror::Error;

use tessera_protos::{PartitionKind, PartitionSchemeProto, ShapeProto};

use crate::arrays::DenseArray;
use crate::shapes::{ArrayShape, Shape};
use crate::trees::ShapeTree;

// ---------------------------------------------------------------------------
// Device ids
// ---------------------------------------------------------------------------

/// Identifier of one execution unit that can hold a tile of a partitioned value.
///
/// Non-negative identifiers name real devices. Negative identifiers are reserved sentinels with dedicated
/// handling logic ([`HOST_DEVICE`] and [`UNASSIGNED_DEVICE`]); they are exempt from device-count bounds checks
/// during [validation][PartitionScheme::validate].
pub type DeviceId = i64;

/// Reserved [`DeviceId`] denoting placement on the host rather than on a compute device.
pub const HOST_DEVICE: DeviceId = -1;

/// Reserved [`DeviceId`] denoting a tile that has not been assigned to any device yet. Spatial-partitioning
/// passes use this as bookkeeping while an assignment is still being decided.
pub const UNASSIGNED_DEVICE: DeviceId = -2;

/// Returns `true` if `device` is a reserved identifier with a special meaning rather than the identifier of
/// a real device.
#[inline]
pub fn is_reserved_device(device: DeviceId) -> bool {
    device < 0
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for [`PartitionScheme`] queries, transforms, validation, and wire-form decoding.
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PartitionError {
    /// Error returned when a tuple-only operation is invoked on a non-tuple scheme.
    #[error("operation requires a tuple partition scheme")]
    TupleSchemeRequired,

    /// Error returned when a geometry operation is invoked on a tuple scheme.
    #[error("operation requires a non-tuple partition scheme")]
    LeafSchemeRequired,

    /// Error returned when a single-device tile query is made against a replicated scheme, where no
    /// single device answers.
    #[error("a replicated partition scheme does not assign tiles to single devices")]
    ReplicatedTileQuery,

    /// Error returned when [`PartitionScheme::unique_device`] is called on a scheme that does not place
    /// the whole value on a single device.
    #[error("partition scheme does not place the whole value on a single device")]
    NoUniqueDevice,

    /// Error returned when a tile offset or limit is requested from a scheme without tile geometry
    /// (a replicated or maximal scheme).
    #[error("partition scheme has no tile geometry")]
    NoTileGeometry,

    /// Error returned when an inverse lookup does not find the requested device in the tile assignment.
    #[error("device {device} does not appear in the tile assignment")]
    DeviceNotFound { device: DeviceId },

    /// Error returned when a forward lookup uses a tile index outside the tile-assignment grid.
    #[error("tile index {index:?} is out of bounds for tile-grid extents {extents:?}")]
    TileIndexOutOfBounds { index: Vec<usize>, extents: Vec<usize> },

    /// Error returned when a tuple scheme's element count does not match a shape's leaf count.
    /// An empty tuple shape still requires exactly one element.
    #[error("shape requires {expected} partition scheme(s), but got {actual}")]
    LeafCountMismatch { expected: usize, actual: usize },

    /// Error returned when a tuple leaf index is out of range.
    #[error("tuple leaf index {leaf_index} is out of bounds for {leaf_count} leaves")]
    LeafIndexOutOfBounds { leaf_index: usize, leaf_count: usize },

    /// Error returned when an operation on a tuple scheme is given a non-tuple shape.
    #[error("expected a tuple shape, but got `{shape}`")]
    TupleShapeRequired { shape: Shape },

    /// Error returned when a leaf scheme is validated against a tuple shape.
    #[error("expected an array shape, but got `{shape}`")]
    ArrayShapeRequired { shape: Shape },

    /// Error returned when a tile grid's rank does not match the rank of the shape it partitions.
    #[error("tile grid of rank {tile_rank} cannot partition a shape of rank {shape_rank}")]
    RankMismatch { tile_rank: usize, shape_rank: usize },

    /// Error returned when a tile extent is zero, which no dimension extent can satisfy.
    #[error("dimension {dimension} has a tile of extent zero")]
    ZeroTileExtent { dimension: usize },

    /// Error returned when the number of tiles along a dimension differs from the number needed to
    /// cover it with at most one partially-padding tile.
    #[error(
        "dimension {dimension} of extent {dimension_extent} needs {required_tiles} tile(s) of extent \
         {tile_extent}, but the tile grid provides {actual_tiles}"
    )]
    TileCountMismatch {
        dimension: usize,
        dimension_extent: usize,
        tile_extent: usize,
        required_tiles: usize,
        actual_tiles: usize,
    },

    /// Error returned when a non-reserved device id is at or beyond the program's device count.
    #[error("device {device} is out of range for a program with {device_count} device(s)")]
    DeviceOutOfRange { device: DeviceId, device_count: usize },

    /// Error wrapping the first validation failure found inside a tuple scheme, tagged with the leaf index.
    #[error("partition scheme for tuple leaf {leaf_index} is invalid: {source}")]
    InvalidTupleElement { leaf_index: usize, source: Box<PartitionError> },

    /// Error returned when a wire message carries a partition kind this version does not know.
    #[error("wire message carries unknown partition kind {kind}")]
    UnknownWireKind { kind: i32 },

    /// Error returned when a maximal wire message does not carry exactly one device.
    #[error("maximal wire message must carry exactly one device, but carries {device_count}")]
    MalformedWireMaximal { device_count: usize },

    /// Error returned when a tiled wire message is missing its tile shape.
    #[error("tiled wire message is missing its tile shape")]
    MissingWireTileShape,

    /// Error returned when a tiled wire message carries a tuple where its tile shape should be.
    #[error("tiled wire message carries a tuple-shaped tile shape")]
    MalformedWireTileShape,

    /// Error returned when a wire message carries a negative tile-shape or tile-grid extent.
    #[error("wire message carries an invalid extent {value}")]
    InvalidWireExtent { value: i64 },

    /// Error returned when the tile count implied by a wire message's tile-grid extents overflows.
    #[error("overflow while computing the tile count of a wire message's tile grid")]
    WireTileCountOverflow,

    /// Error returned when a tiled wire message's device list does not cover its tile grid.
    #[error("tiled wire message carries {device_count} device(s) for a tile grid of {tile_count} tile(s)")]
    MalformedWireTileGrid { device_count: usize, tile_count: usize },

    /// Error returned when a tuple wire message nests another tuple, which the flattened pre-order
    /// representation does not allow.
    #[error("tuple wire message may only carry leaf elements, but element {element} is a tuple")]
    NestedWireTuple { element: usize },
}

// ---------------------------------------------------------------------------
// Tile transforms
// ---------------------------------------------------------------------------

/// Policy that rewrites the tile extent of a partitioned axis in
/// [`PartitionScheme::transform_tile_shape`].
///
/// Unpartitioned axes (tile count one) never consult the policy; they always adopt the new shape's
/// extent directly.
#[derive(Copy, Clone, Default)]
pub enum TileTransform<'a> {
    /// Keep the existing tile extent unchanged.
    #[default]
    Keep,

    /// Multiply the existing tile extent by a constant factor.
    ScaleBy(usize),

    /// Map `(axis, old_extent)` to a new tile extent.
    Custom(&'a dyn Fn(usize, usize) -> usize),
}

impl TileTransform<'_> {
    fn apply(&self, axis: usize, extent: usize) -> usize {
        match self {
            Self::Keep => extent,
            Self::ScaleBy(factor) => extent * factor,
            Self::Custom(transform) => transform(axis, extent),
        }
    }
}

// ---------------------------------------------------------------------------
// Partition schemes
// ---------------------------------------------------------------------------

/// Describes how one value of a distributed program is partitioned across compute devices.
///
/// See the [module documentation](self) for the four partition modes, the implicit-padding rules, and
/// the text rendering. Schemes are immutable; operations either answer queries or build new schemes.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum PartitionScheme {
    /// Every device holds a full, identical copy of the value.
    Replicated,

    /// The whole value is placed, unsplit, on a single device. The device may be a reserved
    /// sentinel such as [`HOST_DEVICE`].
    Maximal { device: DeviceId },

    /// The value is cut into a regular grid of tiles of extent `tile_shape`, with `tile_assignment`
    /// mapping each tile coordinate to the device owning that tile. The grid and the tile shape
    /// have one axis per dimension of the partitioned value.
    Tiled { tile_shape: ArrayShape, tile_assignment: DenseArray<DeviceId> },

    /// One scheme per leaf position of a tuple-shaped value, flattened in pre-order. Never empty:
    /// a structurally empty tuple carries exactly one placeholder element.
    Tuple { elements: Vec<PartitionScheme> },
}

impl PartitionScheme {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Creates a scheme that replicates the whole value to every device.
    ///
    /// ```rust
    /// # use tessera_core::partitioning::PartitionScheme;
    /// assert_eq!(PartitionScheme::replicate().to_string(), "{replicated}");
    /// ```
    #[inline]
    pub fn replicate() -> Self {
        Self::Replicated
    }

    /// Creates a scheme that places the whole value, unsplit, on `device`. This emulates device
    /// placement: a single tile equal to the entire value.
    #[inline]
    pub fn assign_device(device: DeviceId) -> Self {
        Self::Maximal { device }
    }

    /// Creates a tiled scheme from an explicit per-axis tile extent and a dense device grid.
    ///
    /// Construction is total; the geometric invariants (rank agreement between `tile_shape` and
    /// `tile_assignment`, and the at-most-one-padding-tile-per-axis rule against a concrete value
    /// shape) are enforced by [`validate`][Self::validate].
    #[inline]
    pub fn tile(tile_shape: ArrayShape, tile_assignment: DenseArray<DeviceId>) -> Self {
        Self::Tiled { tile_shape, tile_assignment }
    }

    /// Creates a tiled scheme that splits the single axis of a one-dimensional shape into
    /// `num_tiles` tiles of equal extent (the last tile possibly padding), owned by devices
    /// `0..num_tiles` in order.
    ///
    /// # Panics
    ///
    /// Panics if `input_shape` is not one-dimensional or `num_tiles` is zero.
    pub fn tile_1d(input_shape: &ArrayShape, num_tiles: usize) -> Self {
        assert_eq!(input_shape.rank(), 1, "tile_1d requires a one-dimensional input shape");
        assert!(num_tiles > 0, "tile_1d requires at least one tile");

        let tile_extent = input_shape.dimension(0).div_ceil(num_tiles);
        let devices = (0..num_tiles as DeviceId).collect::<Vec<_>>();
        Self::Tiled {
            tile_shape: ArrayShape::new(vec![tile_extent]),
            tile_assignment: DenseArray::new(vec![num_tiles], devices)
                .expect("device count matches the tile count by construction"),
        }
    }

    /// Creates a tuple scheme from a tree holding one scheme per leaf position, flattened in
    /// pre-order. A tree over an empty tuple shape produces the single placeholder element
    /// required of empty tuples (a replicated scheme).
    pub fn tuple(sub_schemes: &ShapeTree<PartitionScheme>) -> Self {
        let mut elements = sub_schemes.leaves().to_vec();
        if elements.is_empty() {
            elements.push(Self::replicate());
        }
        Self::Tuple { elements }
    }

    /// Creates a tuple scheme from an explicit pre-order list of leaf schemes.
    ///
    /// The list length must equal the leaf count of `tuple_shape`, except that an empty tuple shape
    /// requires exactly one entry.
    pub fn tuple_from_slice(tuple_shape: &Shape, schemes: &[PartitionScheme]) -> Result<Self, PartitionError> {
        if !tuple_shape.is_tuple() {
            return Err(PartitionError::TupleShapeRequired { shape: tuple_shape.clone() });
        }
        let expected = required_leaves(tuple_shape);
        if schemes.len() != expected {
            return Err(PartitionError::LeafCountMismatch { expected, actual: schemes.len() });
        }
        Ok(Self::Tuple { elements: schemes.to_vec() })
    }

    // -----------------------------------------------------------------------
    // Predicates and accessors
    // -----------------------------------------------------------------------

    /// Returns `true` if every device holds a full copy of the value. A tuple scheme is replicated
    /// iff every element is.
    pub fn is_replicated(&self) -> bool {
        match self {
            Self::Replicated => true,
            Self::Maximal { .. } | Self::Tiled { .. } => false,
            Self::Tuple { elements } => elements.iter().all(Self::is_replicated),
        }
    }

    /// Returns `true` if the scheme consists of a single tile covering the whole value (which
    /// includes replicated schemes). A tuple scheme is tile-maximal iff every element is.
    pub fn is_tile_maximal(&self) -> bool {
        match self {
            Self::Replicated | Self::Maximal { .. } => true,
            Self::Tiled { .. } => false,
            Self::Tuple { elements } => elements.iter().all(Self::is_tile_maximal),
        }
    }

    /// Returns `true` if this is a tuple scheme.
    #[inline]
    pub fn is_tuple(&self) -> bool {
        matches!(self, Self::Tuple { .. })
    }

    /// Returns `true` if the scheme places the whole value on exactly one device, i.e. it is a
    /// non-tuple, tile-maximal, non-replicated scheme.
    #[inline]
    pub fn has_unique_device(&self) -> bool {
        matches!(self, Self::Maximal { .. })
    }

    /// Returns the single device the whole value is placed on.
    ///
    /// Fails unless the scheme is a non-tuple, tile-maximal, non-replicated scheme
    /// (see [`has_unique_device`][Self::has_unique_device]).
    pub fn unique_device(&self) -> Result<DeviceId, PartitionError> {
        match self {
            Self::Maximal { device } => Ok(*device),
            Self::Tuple { .. } => Err(PartitionError::LeafSchemeRequired),
            Self::Replicated | Self::Tiled { .. } => Err(PartitionError::NoUniqueDevice),
        }
    }

    /// Returns the tile shape of a tiled scheme.
    #[inline]
    pub fn tile_shape(&self) -> Option<&ArrayShape> {
        match self {
            Self::Tiled { tile_shape, .. } => Some(tile_shape),
            _ => None,
        }
    }

    /// Returns the device-assignment grid of a tiled scheme.
    #[inline]
    pub fn tile_assignment(&self) -> Option<&DenseArray<DeviceId>> {
        match self {
            Self::Tiled { tile_assignment, .. } => Some(tile_assignment),
            _ => None,
        }
    }

    /// Returns the flattened pre-order leaf schemes of a tuple scheme.
    #[inline]
    pub fn tuple_elements(&self) -> Option<&[PartitionScheme]> {
        match self {
            Self::Tuple { elements } => Some(elements.as_slice()),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Tuple composition
    // -----------------------------------------------------------------------

    /// Projects this scheme onto the leaf tree of a concrete shape: a non-tuple scheme is copied to
    /// every leaf, while a tuple scheme's elements are paired with the leaves in pre-order.
    ///
    /// Fails if a tuple scheme's element count does not match the shape's leaf count.
    pub fn as_shape_tree(&self, shape: &Shape) -> Result<ShapeTree<PartitionScheme>, PartitionError> {
        match self {
            Self::Tuple { elements } => {
                check_leaf_count(elements, shape)?;
                // An empty tuple holds one placeholder element but has no leaf positions.
                let leaves = if shape.leaf_count() == 0 { Vec::new() } else { elements.clone() };
                Ok(ShapeTree::from_leaves(shape.clone(), leaves)
                    .expect("element count was checked against the shape"))
            }
            _ => Ok(ShapeTree::uniform(shape.clone(), self.clone())),
        }
    }

    /// Returns the scheme of the `leaf_index`-th leaf of a tuple scheme, where leaves are numbered
    /// in the pre-order of `shape`.
    ///
    /// Fails on a non-tuple scheme, on a leaf-count mismatch against `shape`, or on an
    /// out-of-bounds index.
    pub fn sub_scheme(&self, shape: &Shape, leaf_index: usize) -> Result<PartitionScheme, PartitionError> {
        match self {
            Self::Tuple { elements } => {
                check_leaf_count(elements, shape)?;
                elements.get(leaf_index).cloned().ok_or(PartitionError::LeafIndexOutOfBounds {
                    leaf_index,
                    leaf_count: elements.len(),
                })
            }
            _ => Err(PartitionError::TupleSchemeRequired),
        }
    }

    /// Returns this scheme as a tuple scheme sized to `shape`: a tuple scheme is returned as-is
    /// (after a leaf-count check), while a non-tuple scheme is wrapped into a tuple whose every
    /// element is a copy of it.
    pub fn as_tuple_scheme(&self, shape: &Shape) -> Result<PartitionScheme, PartitionError> {
        match self {
            Self::Tuple { elements } => {
                check_leaf_count(elements, shape)?;
                Ok(self.clone())
            }
            _ => Ok(Self::Tuple { elements: vec![self.clone(); required_leaves(shape)] }),
        }
    }

    /// Extracts the scheme that is common to the whole value: a non-tuple scheme is its own common
    /// scheme, and a tuple scheme has a common scheme only when all of its elements are
    /// structurally equal to the first. Heterogeneous tuples legitimately have none.
    pub fn extract_single_scheme(&self) -> Option<&PartitionScheme> {
        match self {
            Self::Tuple { elements } => {
                let (first, rest) = elements.split_first()?;
                rest.iter().all(|element| element == first).then_some(first)
            }
            _ => Some(self),
        }
    }

    // -----------------------------------------------------------------------
    // Geometry
    // -----------------------------------------------------------------------

    /// Returns `true` if `device` owns any part of the value: it appears in the tile assignment of
    /// a leaf scheme, or in any element of a tuple scheme. A replicated scheme names no device.
    pub fn uses_device(&self, device: DeviceId) -> bool {
        match self {
            Self::Replicated => false,
            Self::Maximal { device: assigned } => *assigned == device,
            Self::Tiled { tile_assignment, .. } => tile_assignment.contains(device),
            Self::Tuple { elements } => elements.iter().any(|element| element.uses_device(device)),
        }
    }

    /// Returns a histogram mapping each used device id to its occurrence count, together with the
    /// number of units the scheme is made of (one for a non-tuple scheme, the number of elements
    /// for a tuple scheme). Reserved sentinel ids are excluded from the histogram.
    pub fn used_devices(&self) -> (BTreeMap<DeviceId, usize>, usize) {
        let mut histogram = BTreeMap::new();
        let unit_count = self.count_devices(&mut histogram);
        (histogram, unit_count)
    }

    fn count_devices(&self, histogram: &mut BTreeMap<DeviceId, usize>) -> usize {
        match self {
            Self::Replicated => 1,
            Self::Maximal { device } => {
                if !is_reserved_device(*device) {
                    *histogram.entry(*device).or_insert(0) += 1;
                }
                1
            }
            Self::Tiled { tile_assignment, .. } => {
                for device in tile_assignment.values().iter().copied() {
                    if !is_reserved_device(device) {
                        *histogram.entry(device).or_insert(0) += 1;
                    }
                }
                1
            }
            Self::Tuple { elements } => elements.iter().map(|element| element.count_devices(histogram)).sum(),
        }
    }

    /// Returns the coordinate in the tile-assignment grid whose tile is owned by `device`. The
    /// trivial grid of a maximal scheme answers `[0]` for its own device.
    ///
    /// Fails on a tuple scheme, or when `device` owns no tile (which is always the case for a
    /// replicated scheme).
    pub fn tile_index_for_device(&self, device: DeviceId) -> Result<Vec<usize>, PartitionError> {
        match self {
            Self::Tuple { .. } => Err(PartitionError::LeafSchemeRequired),
            Self::Replicated => Err(PartitionError::DeviceNotFound { device }),
            Self::Maximal { device: assigned } if *assigned == device => Ok(vec![0]),
            Self::Maximal { .. } => Err(PartitionError::DeviceNotFound { device }),
            Self::Tiled { tile_assignment, .. } => {
                tile_assignment.position_of(device).ok_or(PartitionError::DeviceNotFound { device })
            }
        }
    }

    /// Returns the device that owns the tile at `index` in the tile-assignment grid. A maximal
    /// scheme answers its single device.
    ///
    /// Fails on a tuple scheme, on a replicated scheme (no single device answers any tile query),
    /// or when `index` is out of bounds of the grid.
    pub fn device_for_tile_index(&self, index: &[usize]) -> Result<DeviceId, PartitionError> {
        match self {
            Self::Tuple { .. } => Err(PartitionError::LeafSchemeRequired),
            Self::Replicated => Err(PartitionError::ReplicatedTileQuery),
            Self::Maximal { device } => Ok(*device),
            Self::Tiled { tile_assignment, .. } => {
                tile_assignment.get(index).ok_or_else(|| PartitionError::TileIndexOutOfBounds {
                    index: index.to_vec(),
                    extents: tile_assignment.extents().to_vec(),
                })
            }
        }
    }

    /// Returns the lower corner, in the partitioned value's coordinate space, of the tile owned by
    /// `device`.
    ///
    /// Fails on a tuple scheme, on a scheme without tile geometry (replicated or maximal), or when
    /// `device` owns no tile.
    pub fn tile_offset_for_device(&self, device: DeviceId) -> Result<Vec<usize>, PartitionError> {
        match self {
            Self::Tuple { .. } => Err(PartitionError::LeafSchemeRequired),
            Self::Tiled { tile_shape, tile_assignment } => {
                let index = tile_assignment.position_of(device).ok_or(PartitionError::DeviceNotFound { device })?;
                Ok(index.iter().zip(tile_shape.dimensions()).map(|(coordinate, extent)| coordinate * extent).collect())
            }
            Self::Replicated | Self::Maximal { .. } => Err(PartitionError::NoTileGeometry),
        }
    }

    /// Returns the exclusive upper corner, in the partitioned value's coordinate space, of the tile
    /// owned by `device`.
    ///
    /// The corner is *not* clipped to the value's true extents: along a padded axis the last tile
    /// reports a limit beyond the real data, and callers must clip before addressing it. This is
    /// deliberate, so that padding remains detectable from the reported geometry.
    ///
    /// Fails in the same cases as [`tile_offset_for_device`][Self::tile_offset_for_device].
    pub fn tile_limit_for_device(&self, device: DeviceId) -> Result<Vec<usize>, PartitionError> {
        match self {
            Self::Tuple { .. } => Err(PartitionError::LeafSchemeRequired),
            Self::Tiled { tile_shape, tile_assignment } => {
                let index = tile_assignment.position_of(device).ok_or(PartitionError::DeviceNotFound { device })?;
                Ok(index
                    .iter()
                    .zip(tile_shape.dimensions())
                    .map(|(coordinate, extent)| (coordinate + 1) * extent)
                    .collect())
            }
            Self::Replicated | Self::Maximal { .. } => Err(PartitionError::NoTileGeometry),
        }
    }

    /// Returns a scheme with the same device grid that applies to `new_shape`.
    ///
    /// Replicated and maximal schemes have no tile geometry to adapt and are returned unchanged.
    /// For a tiled scheme, each axis the grid does not actually partition (tile count one) adopts
    /// `new_shape`'s extent as its new tile extent, while each partitioned axis maps its current
    /// tile extent through `transform` ([`TileTransform::Keep`] leaves it unchanged).
    ///
    /// Fails on a tuple scheme, or when `new_shape`'s rank differs from the tile grid's rank.
    pub fn transform_tile_shape(
        &self,
        new_shape: &ArrayShape,
        transform: TileTransform<'_>,
    ) -> Result<PartitionScheme, PartitionError> {
        match self {
            Self::Tuple { .. } => Err(PartitionError::LeafSchemeRequired),
            Self::Replicated | Self::Maximal { .. } => Ok(self.clone()),
            Self::Tiled { tile_shape, tile_assignment } => {
                if new_shape.rank() != tile_assignment.rank() {
                    return Err(PartitionError::RankMismatch {
                        tile_rank: tile_assignment.rank(),
                        shape_rank: new_shape.rank(),
                    });
                }
                let dimensions = (0..new_shape.rank())
                    .map(|axis| {
                        if tile_assignment.extent(axis) == 1 {
                            new_shape.dimension(axis)
                        } else {
                            transform.apply(axis, tile_shape.dimension(axis))
                        }
                    })
                    .collect();
                Ok(Self::Tiled { tile_shape: ArrayShape::new(dimensions), tile_assignment: tile_assignment.clone() })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Checks that this scheme can describe the partitioning of a value with shape `shape` in a
    /// program with `device_count` devices. Purely a check: nothing is mutated and nothing is
    /// partially applied.
    ///
    /// A tuple scheme requires a tuple shape with a matching leaf count and validates each element
    /// against its leaf shape, wrapping the first failure with the leaf index. A leaf scheme
    /// requires an array shape; a tiled scheme additionally requires rank agreement between the
    /// shape, the tile shape, and the tile grid, requires every non-reserved device id to be below
    /// `device_count`, and requires each axis's tile count to cover the dimension with strictly
    /// less than one tile's worth of padding.
    pub fn validate(&self, shape: &Shape, device_count: usize) -> Result<(), PartitionError> {
        match self {
            Self::Tuple { elements } => Self::validate_tuple(elements, shape, device_count),
            _ => self.validate_leaf(shape, device_count),
        }
    }

    fn validate_tuple(elements: &[PartitionScheme], shape: &Shape, device_count: usize) -> Result<(), PartitionError> {
        if !shape.is_tuple() {
            return Err(PartitionError::TupleShapeRequired { shape: shape.clone() });
        }
        check_leaf_count(elements, shape)?;
        for (leaf_index, (leaf_shape, element)) in shape.leaves().into_iter().zip(elements.iter()).enumerate() {
            element.validate(leaf_shape, device_count).map_err(|error| PartitionError::InvalidTupleElement {
                leaf_index,
                source: Box::new(error),
            })?;
        }
        Ok(())
    }

    fn validate_leaf(&self, shape: &Shape, device_count: usize) -> Result<(), PartitionError> {
        let array_shape = match shape {
            Shape::Array(array_shape) => array_shape,
            Shape::Tuple(_) => return Err(PartitionError::ArrayShapeRequired { shape: shape.clone() }),
        };

        match self {
            Self::Replicated => Ok(()),
            Self::Maximal { device } => check_device_bound(*device, device_count),
            Self::Tiled { tile_shape, tile_assignment } => {
                for device in tile_assignment.values().iter().copied() {
                    check_device_bound(device, device_count)?;
                }
                if tile_assignment.rank() != array_shape.rank() {
                    return Err(PartitionError::RankMismatch {
                        tile_rank: tile_assignment.rank(),
                        shape_rank: array_shape.rank(),
                    });
                }
                if tile_shape.rank() != array_shape.rank() {
                    return Err(PartitionError::RankMismatch {
                        tile_rank: tile_shape.rank(),
                        shape_rank: array_shape.rank(),
                    });
                }
                for axis in 0..array_shape.rank() {
                    let dimension_extent = array_shape.dimension(axis);
                    let tile_extent = tile_shape.dimension(axis);
                    if tile_extent == 0 {
                        return Err(PartitionError::ZeroTileExtent { dimension: axis });
                    }
                    // The grid must provide exactly enough tiles to cover the dimension with
                    // strictly less than one tile's worth of trailing padding.
                    let required_tiles = dimension_extent.div_ceil(tile_extent);
                    let actual_tiles = tile_assignment.extent(axis);
                    if actual_tiles != required_tiles {
                        return Err(PartitionError::TileCountMismatch {
                            dimension: axis,
                            dimension_extent,
                            tile_extent,
                            required_tiles,
                            actual_tiles,
                        });
                    }
                }
                Ok(())
            }
            Self::Tuple { .. } => unreachable!("tuple schemes are validated by validate_tuple"),
        }
    }

    // -----------------------------------------------------------------------
    // Wire form
    // -----------------------------------------------------------------------

    /// Builds a scheme from its wire form.
    ///
    /// Fails when the message encodes contradictory or incomplete state: an unknown kind, a maximal
    /// message without exactly one device, a tiled message with a missing or tuple-shaped tile
    /// shape, rank disagreement between the tile shape and the tile grid, a device list that does
    /// not cover the tile grid, or a tuple message nesting another tuple.
    pub fn from_proto(proto: &PartitionSchemeProto) -> Result<PartitionScheme, PartitionError> {
        match PartitionKind::try_from(proto.kind) {
            Ok(PartitionKind::Replicated) => Ok(Self::Replicated),
            Ok(PartitionKind::Maximal) => {
                if proto.tile_assignment_devices.len() != 1 {
                    return Err(PartitionError::MalformedWireMaximal {
                        device_count: proto.tile_assignment_devices.len(),
                    });
                }
                Ok(Self::Maximal { device: proto.tile_assignment_devices[0] })
            }
            Ok(PartitionKind::Tuple) => {
                let mut elements = Vec::with_capacity(proto.tuple_elements.len());
                for (element_index, element) in proto.tuple_elements.iter().enumerate() {
                    if element.kind == PartitionKind::Tuple as i32 {
                        return Err(PartitionError::NestedWireTuple { element: element_index });
                    }
                    elements.push(Self::from_proto(element)?);
                }
                if elements.is_empty() {
                    elements.push(Self::replicate());
                }
                Ok(Self::Tuple { elements })
            }
            Ok(PartitionKind::Tiled) => {
                let tile_shape = proto.tile_shape.as_ref().ok_or(PartitionError::MissingWireTileShape)?;
                if tile_shape.is_tuple {
                    return Err(PartitionError::MalformedWireTileShape);
                }
                let tile_shape = ArrayShape::new(decode_extents(&tile_shape.dimensions)?);
                let extents = decode_extents(&proto.tile_assignment_extents)?;
                if extents.len() != tile_shape.rank() {
                    return Err(PartitionError::RankMismatch {
                        tile_rank: extents.len(),
                        shape_rank: tile_shape.rank(),
                    });
                }
                let tile_count = extents
                    .iter()
                    .try_fold(1usize, |count, extent| count.checked_mul(*extent))
                    .ok_or(PartitionError::WireTileCountOverflow)?;
                if proto.tile_assignment_devices.len() != tile_count {
                    return Err(PartitionError::MalformedWireTileGrid {
                        device_count: proto.tile_assignment_devices.len(),
                        tile_count,
                    });
                }
                let tile_assignment = DenseArray::new(extents, proto.tile_assignment_devices.clone())
                    .expect("device count was checked against the tile count");
                Ok(Self::Tiled { tile_shape, tile_assignment })
            }
            Err(_) => Err(PartitionError::UnknownWireKind { kind: proto.kind }),
        }
    }

    /// Renders this scheme in its wire form. Total and lossless: the result decodes back to an
    /// equal scheme.
    pub fn to_proto(&self) -> PartitionSchemeProto {
        match self {
            Self::Replicated => {
                PartitionSchemeProto { kind: PartitionKind::Replicated as i32, ..Default::default() }
            }
            Self::Maximal { device } => PartitionSchemeProto {
                kind: PartitionKind::Maximal as i32,
                tile_assignment_extents: vec![1],
                tile_assignment_devices: vec![*device],
                ..Default::default()
            },
            Self::Tiled { tile_shape, tile_assignment } => PartitionSchemeProto {
                kind: PartitionKind::Tiled as i32,
                tile_shape: Some(ShapeProto {
                    dimensions: tile_shape.dimensions().iter().map(|extent| *extent as i64).collect(),
                    ..Default::default()
                }),
                tile_assignment_extents: tile_assignment.extents().iter().map(|extent| *extent as i64).collect(),
                tile_assignment_devices: tile_assignment.values().to_vec(),
                ..Default::default()
            },
            Self::Tuple { elements } => PartitionSchemeProto {
                kind: PartitionKind::Tuple as i32,
                tuple_elements: elements.iter().map(Self::to_proto).collect(),
                ..Default::default()
            },
        }
    }
}

impl Display for PartitionScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replicated => write!(f, "{{replicated}}"),
            Self::Maximal { device } => write!(f, "{{maximal device={device}}}"),
            Self::Tiled { tile_shape, tile_assignment } => write!(
                f,
                "{{{} devices=[{}]{}}}",
                tile_shape,
                tile_assignment.extents().iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
                tile_assignment.values().iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
            ),
            Self::Tuple { elements } => {
                write!(f, "{{{}}}", elements.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Number of elements a tuple scheme needs to cover `shape`. Empty tuples still carry one
/// placeholder element.
fn required_leaves(shape: &Shape) -> usize {
    shape.leaf_count().max(1)
}

fn check_leaf_count(elements: &[PartitionScheme], shape: &Shape) -> Result<(), PartitionError> {
    let expected = required_leaves(shape);
    if elements.len() != expected {
        return Err(PartitionError::LeafCountMismatch { expected, actual: elements.len() });
    }
    Ok(())
}

fn check_device_bound(device: DeviceId, device_count: usize) -> Result<(), PartitionError> {
    if !is_reserved_device(device) && device >= device_count as DeviceId {
        return Err(PartitionError::DeviceOutOfRange { device, device_count });
    }
    Ok(())
}

fn decode_extents(extents: &[i64]) -> Result<Vec<usize>, PartitionError> {
    extents
        .iter()
        .map(|extent| usize::try_from(*extent).map_err(|_| PartitionError::InvalidWireExtent { value: *extent }))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
