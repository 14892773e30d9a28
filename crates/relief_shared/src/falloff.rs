use crate::grid::HeightGrid;

const FALLOFF_STEEPNESS: f32 = 3.0;
const FALLOFF_SHIFT: f32 = 2.2;

/// Square island mask: ~0 in the middle rising towards 1 at the edges.
pub fn generate_falloff_map(size: usize) -> HeightGrid {
    let mut grid = HeightGrid::new(size, size);
    if size == 0 {
        return grid;
    }

    let span = (size.max(2) - 1) as f32;
    for y in 0..size {
        for x in 0..size {
            let i = x as f32 / span * 2.0 - 1.0;
            let j = y as f32 / span * 2.0 - 1.0;
            let value = i.abs().max(j.abs());
            grid.set(x, y, evaluate(value));
        }
    }
    grid
}

fn evaluate(value: f32) -> f32 {
    let a = FALLOFF_STEEPNESS;
    let b = FALLOFF_SHIFT;
    let rising = value.powf(a);
    rising / (rising + (b - b * value).powf(a))
}

/// Subtracts `falloff` from `heights` cell by cell, clamping into `[0, 1]`.
pub fn apply_falloff(heights: &mut HeightGrid, falloff: &HeightGrid) {
    assert_eq!(
        (heights.width(), heights.height()),
        (falloff.width(), falloff.height()),
        "falloff map must match the height grid"
    );
    for (height, &mask) in heights.values_mut().iter_mut().zip(falloff.values()) {
        *height = (*height - mask).clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_falloff, generate_falloff_map};
    use crate::grid::HeightGrid;

    #[test]
    fn falloff_is_zero_at_center_and_one_at_edges() {
        let map = generate_falloff_map(21);
        assert_eq!(map.get(10, 10), 0.0);
        assert_eq!(map.get(0, 10), 1.0);
        assert_eq!(map.get(20, 20), 1.0);
        assert_eq!(map.get(10, 0), 1.0);
    }

    #[test]
    fn falloff_rises_monotonically_from_center_to_edge() {
        let map = generate_falloff_map(31);
        let mut previous = -1.0;
        for x in 15..31 {
            let value = map.get(x, 15);
            assert!(value >= previous, "falloff dipped at column {x}");
            assert!((0.0..=1.0).contains(&value));
            previous = value;
        }
    }

    #[test]
    fn applying_falloff_clamps_into_unit_range() {
        let mut heights = HeightGrid::filled(5, 5, 0.6);
        heights.set(2, 2, 1.4);
        let falloff = generate_falloff_map(5);
        apply_falloff(&mut heights, &falloff);

        assert_eq!(heights.get(0, 0), 0.0);
        assert_eq!(heights.get(2, 2), 1.0);
        assert!(heights.values().iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
