use carte_shared::Position;

/// An eased camera flight between two centers and zoom levels.
/// Times are milliseconds on the view's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraAnimation {
    pub from_center: Position,
    pub from_zoom: f64,
    pub to_center: Position,
    pub to_zoom: f64,
    pub start_time: f64,
    pub duration: f64,
}

impl CameraAnimation {
    pub fn new(
        from: (Position, f64),
        to: (Position, f64),
        start_time: f64,
        duration: f64,
    ) -> Self {
        Self {
            from_center: from.0,
            from_zoom: from.1,
            to_center: to.0,
            to_zoom: to.1,
            start_time,
            duration,
        }
    }

    /// Camera at `now`, or None once the flight is over.
    pub fn sample(&self, now: f64) -> Option<(Position, f64)> {
        let elapsed = now - self.start_time;
        if elapsed >= self.duration {
            return None;
        }

        let t = cubic_ease_out((elapsed / self.duration).max(0.0));
        let center = Position::new(
            lerp(self.from_center.x, self.to_center.x, t),
            lerp(self.from_center.y, self.to_center.y, t),
        );
        Some((center, lerp(self.from_zoom, self.to_zoom, t)))
    }

    pub fn target(&self) -> (Position, f64) {
        (self.to_center, self.to_zoom)
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Cubic ease-out: decelerating to zero velocity.
fn cubic_ease_out(t: f64) -> f64 {
    let t = t - 1.0;
    t * t * t + 1.0
}
