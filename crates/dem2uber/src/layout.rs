use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// Shape of one terrain cell: a quadtree `cell_tree_depth` levels deep whose
/// leaves are `node_dim` samples on a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellLayout {
    pub node_dim: u32,
    pub cell_tree_depth: u32,
}

impl CellLayout {
    #[inline]
    pub const fn new(node_dim: u32, cell_tree_depth: u32) -> Self {
        Self {
            node_dim,
            cell_tree_depth,
        }
    }

    /// Leaf nodes along one edge of a cell: `2^(depth - 1)`.
    pub fn cell_width_in_nodes(self) -> Result<u32> {
        self.cell_tree_depth
            .checked_sub(1)
            .and_then(|shift| 1u32.checked_shl(shift))
            .ok_or_else(|| self.invalid())
    }

    /// Samples along one edge of a cell. Both uber-surface sides must be a
    /// multiple of this.
    pub fn clamping_dim(self) -> Result<u32> {
        if self.node_dim == 0 {
            return Err(self.invalid());
        }

        self.node_dim
            .checked_mul(self.cell_width_in_nodes()?)
            .ok_or_else(|| self.invalid())
    }

    fn invalid(self) -> ConvertError {
        ConvertError::InvalidTiling {
            node_dim: self.node_dim,
            cell_tree_depth: self.cell_tree_depth,
        }
    }
}

/// Everything the renderer needs to know about how cells tile the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TilingParameters {
    #[serde(flatten)]
    pub layout: CellLayout,
    /// Samples shared along the edge of adjacent cells.
    pub overlap: u32,
    /// World-space distance between samples.
    pub spacing: f32,
}

impl TilingParameters {
    pub fn new(layout: CellLayout, overlap: u32, spacing: f32) -> Self {
        Self {
            layout,
            overlap,
            spacing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_dim_doubles_per_level() {
        for node_dim in [1u32, 16, 32, 33] {
            for depth in 1u32..=6 {
                let layout = CellLayout::new(node_dim, depth);
                assert_eq!(layout.cell_width_in_nodes().unwrap(), 1 << (depth - 1));
                assert_eq!(layout.clamping_dim().unwrap(), node_dim << (depth - 1));
            }
        }
    }

    #[test]
    fn degenerate_layouts_are_rejected() {
        for layout in [
            CellLayout::new(0, 3),
            CellLayout::new(32, 0),
            CellLayout::new(32, 40),
            CellLayout::new(u32::MAX, 2),
        ] {
            assert!(matches!(
                layout.clamping_dim(),
                Err(ConvertError::InvalidTiling { .. })
            ));
        }
    }
}
