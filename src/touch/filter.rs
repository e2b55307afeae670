// src/touch/filter.rs
//
// First-order IIR smoothing of calibrated touch coordinates:
//
//     out = in/4 + prev - prev/4
//
// The history is re-seeded at the start of every press so a new touch does
// not drift in from where the previous one ended.

use super::calibration::Point;

/// `k = 1 / 2^FILTER_SHIFT`
pub const FILTER_SHIFT: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchState {
    Pressed,
    Released,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TouchFilter {
    prev: Point,
    pressed: bool,
}

impl TouchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample. While released the last filtered point is held.
    pub fn update(&mut self, point: Point, state: TouchState) -> Point {
        match state {
            TouchState::Pressed => {
                if !self.pressed {
                    self.prev = point;
                    self.pressed = true;
                }
                let filtered = Point::new(smooth(point.x, self.prev.x), smooth(point.y, self.prev.y));
                self.prev = filtered;
                filtered
            }
            TouchState::Released => {
                self.pressed = false;
                self.prev
            }
        }
    }

    pub fn last(&self) -> Point {
        self.prev
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn smooth(input: i32, prev: i32) -> i32 {
    (input >> FILTER_SHIFT) + (prev - (prev >> FILTER_SHIFT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_passes_through() {
        let mut filter = TouchFilter::new();
        assert_eq!(filter.update(Point::new(100, 200), TouchState::Pressed), Point::new(100, 200));
    }

    #[test]
    fn test_moves_a_quarter_towards_input() {
        let mut filter = TouchFilter::new();
        filter.update(Point::new(100, 100), TouchState::Pressed);
        assert_eq!(filter.update(Point::new(200, 100), TouchState::Pressed), Point::new(125, 100));
        assert_eq!(filter.update(Point::new(200, 100), TouchState::Pressed), Point::new(144, 100));
    }

    #[test]
    fn test_release_holds_and_new_press_reseeds() {
        let mut filter = TouchFilter::new();
        filter.update(Point::new(100, 100), TouchState::Pressed);
        filter.update(Point::new(200, 100), TouchState::Pressed);
        assert_eq!(filter.update(Point::new(0, 0), TouchState::Released), Point::new(125, 100));
        assert_eq!(filter.update(Point::new(400, 40), TouchState::Pressed), Point::new(400, 40));
    }

    #[test]
    fn test_reset() {
        let mut filter = TouchFilter::new();
        filter.update(Point::new(10, 10), TouchState::Pressed);
        filter.reset();
        assert_eq!(filter.last(), Point::default());
    }
}
