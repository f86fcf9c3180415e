//! Mesh corner interpolation

use super::{MeshCoordinates, Point2F};
use crate::error::UsageError;

/// Spread a `row_count` x `column_count` grid linearly between two corners.
///
/// Column `c` sits at `min_x + c * (max_x - min_x) / (column_count - 1)` and
/// row `r` at `min_y + r * (max_y - min_y) / (row_count - 1)`. No skew
/// compensation is applied.
pub fn calculate_mesh_coordinates(
    row_count: usize,
    column_count: usize,
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
) -> Result<MeshCoordinates, UsageError> {
    if row_count < 2 || column_count < 2 {
        return Err(UsageError::MeshTooSmall {
            rows: row_count,
            columns: column_count,
        });
    }

    let x_step = (max_x - min_x) / (column_count - 1) as f64;
    let y_step = (max_y - min_y) / (row_count - 1) as f64;

    let grid = (0..row_count)
        .map(|row| {
            // Last row and column land exactly on the corner
            let y = if row == row_count - 1 {
                max_y
            } else {
                min_y + row as f64 * y_step
            };
            (0..column_count)
                .map(|column| {
                    let x = if column == column_count - 1 {
                        max_x
                    } else {
                        min_x + column as f64 * x_step
                    };
                    Point2F::new(x, y)
                })
                .collect()
        })
        .collect();

    Ok(MeshCoordinates {
        row_count,
        column_count,
        min_x,
        max_x,
        min_y,
        max_y,
        grid,
    })
}
