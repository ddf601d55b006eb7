//! Line-producing components. Parametric ones regenerate their segment list whenever an
//! input changes, so `segments()` is never stale.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub color: [f32; 3],
}

impl LineSegment {
    pub fn new(start: [f32; 3], end: [f32; 3], color: [f32; 3]) -> Self {
        Self { start, end, color }
    }
}

/// Red X, green Y and blue Z axes from the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSystem {
    length: f32,
    segments: Vec<LineSegment>,
    pub visible: bool,
}

impl CoordinateSystem {
    pub fn new(length: f32) -> Self {
        let mut axes = Self { length, segments: Vec::new(), visible: true };
        axes.regenerate();
        axes
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn set_length(&mut self, length: f32) {
        self.length = length;
        self.regenerate();
    }

    pub fn segments(&self) -> &[LineSegment] {
        &self.segments
    }

    fn regenerate(&mut self) {
        let l = self.length;
        self.segments = vec![
            LineSegment::new([0.0; 3], [l, 0.0, 0.0], [1.0, 0.0, 0.0]),
            LineSegment::new([0.0; 3], [0.0, l, 0.0], [0.0, 1.0, 0.0]),
            LineSegment::new([0.0; 3], [0.0, 0.0, l], [0.0, 0.0, 1.0]),
        ];
    }
}

impl Default for CoordinateSystem {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Free-form segment list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinesMesh {
    segments: Vec<LineSegment>,
    pub visible: bool,
}

impl LinesMesh {
    pub fn new(segments: Vec<LineSegment>) -> Self {
        Self { segments, visible: true }
    }

    pub fn segments(&self) -> &[LineSegment] {
        &self.segments
    }

    pub fn set_segments(&mut self, segments: Vec<LineSegment>) {
        self.segments = segments;
    }

    pub fn push(&mut self, segment: LineSegment) {
        self.segments.push(segment);
    }
}

/// Square grid in the XZ plane centred at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct LinesGrid {
    half_extent: f32,
    divisions: u32,
    color: [f32; 3],
    segments: Vec<LineSegment>,
    pub visible: bool,
}

impl LinesGrid {
    pub fn new(half_extent: f32, divisions: u32, color: [f32; 3]) -> Self {
        let mut grid = Self {
            half_extent,
            divisions,
            color,
            segments: Vec::new(),
            visible: true,
        };
        grid.regenerate();
        grid
    }

    pub fn half_extent(&self) -> f32 {
        self.half_extent
    }

    pub fn divisions(&self) -> u32 {
        self.divisions
    }

    pub fn set_half_extent(&mut self, half_extent: f32) {
        self.half_extent = half_extent;
        self.regenerate();
    }

    pub fn set_divisions(&mut self, divisions: u32) {
        self.divisions = divisions;
        self.regenerate();
    }

    pub fn set_color(&mut self, color: [f32; 3]) {
        self.color = color;
        self.regenerate();
    }

    pub fn segments(&self) -> &[LineSegment] {
        &self.segments
    }

    fn regenerate(&mut self) {
        self.segments.clear();
        if self.divisions == 0 {
            return;
        }
        let h = self.half_extent;
        let step = 2.0 * h / self.divisions as f32;
        for i in 0..=self.divisions {
            let t = -h + step * i as f32;
            self.segments.push(LineSegment::new([t, 0.0, -h], [t, 0.0, h], self.color));
            self.segments.push(LineSegment::new([-h, 0.0, t], [h, 0.0, t], self.color));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_regenerates_on_every_setter() {
        let mut grid = LinesGrid::new(1.0, 2, [0.5; 3]);
        assert_eq!(grid.segments().len(), 6);
        grid.set_divisions(4);
        assert_eq!(grid.segments().len(), 10);
        grid.set_half_extent(3.0);
        assert_eq!(grid.segments()[0].start, [-3.0, 0.0, -3.0]);
        grid.set_color([1.0, 0.0, 0.0]);
        assert!(grid.segments().iter().all(|s| s.color == [1.0, 0.0, 0.0]));
        grid.set_divisions(0);
        assert!(grid.segments().is_empty());
    }

    #[test]
    fn axes_follow_length() {
        let mut axes = CoordinateSystem::new(1.0);
        axes.set_length(2.5);
        assert_eq!(axes.segments()[1].end, [0.0, 2.5, 0.0]);
    }
}
