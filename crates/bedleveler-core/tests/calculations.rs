use bedleveler_core::{average_samples, calculate_mesh_coordinates, Point2F};
use proptest::prelude::*;

proptest! {
    #[test]
    fn mesh_corners_match_bounds(
        rows in 2usize..12,
        columns in 2usize..12,
        min_x in -200.0f64..200.0,
        width in 1.0f64..400.0,
        min_y in -200.0f64..200.0,
        depth in 1.0f64..400.0,
    ) {
        let max_x = min_x + width;
        let max_y = min_y + depth;
        let mesh = calculate_mesh_coordinates(rows, columns, min_x, max_x, min_y, max_y).unwrap();

        prop_assert_eq!(mesh.grid.len(), rows);
        for row in &mesh.grid {
            prop_assert_eq!(row.len(), columns);
        }
        prop_assert_eq!(mesh.grid[0][0], Point2F::new(min_x, min_y));
        prop_assert_eq!(mesh.grid[rows - 1][columns - 1], Point2F::new(max_x, max_y));
    }

    #[test]
    fn mesh_rows_share_y_and_columns_share_x(
        rows in 2usize..8,
        columns in 2usize..8,
    ) {
        let mesh = calculate_mesh_coordinates(rows, columns, 5.0, 225.0, 15.0, 215.0).unwrap();
        for (r, row) in mesh.grid.iter().enumerate() {
            for (c, point) in row.iter().enumerate() {
                prop_assert_eq!(point.y, mesh.grid[r][0].y);
                prop_assert_eq!(point.x, mesh.grid[0][c].x);
            }
        }
    }

    #[test]
    fn averaging_is_order_independent(
        mut samples in prop::collection::vec(-5.0f64..5.0, 1..16),
    ) {
        let forward = average_samples(&samples).unwrap();
        samples.reverse();
        let reversed = average_samples(&samples).unwrap();
        prop_assert_eq!(forward.to_bits(), reversed.to_bits());
    }

    #[test]
    fn average_lies_within_sample_range(
        samples in prop::collection::vec(-5.0f64..5.0, 1..16),
    ) {
        let mean = average_samples(&samples).unwrap();
        let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(mean >= min - 1e-9 && mean <= max + 1e-9);
    }
}

#[test]
fn averaging_three_samples_in_either_order() {
    let a = average_samples(&[0.12, -0.03, 0.07]).unwrap();
    let b = average_samples(&[0.07, -0.03, 0.12]).unwrap();
    assert_eq!(a, b);
}
