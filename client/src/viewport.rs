use std::fmt;

use carte_shared::projection::lonlat_to_planar;
use carte_shared::{Extent, FitPolicy, Position};
use tracing::{debug, info};

use crate::animation::CameraAnimation;
use crate::config::{
    DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH, HOME_CENTER_LONLAT, HOME_DURATION_MS, HOME_ZOOM,
    INITIAL_CENTER_LONLAT, INITIAL_ZOOM, MAX_ZOOM, MIN_ZOOM,
};

/// Metres per pixel at zoom 0 for 256 px web-mercator tiles.
const ZOOM0_RESOLUTION: f64 = 156_543.033_928_040_97;
const ZOOM_SENSITIVITY: f64 = 0.001;

/// Background tile sources the operator can switch between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseMap {
    #[default]
    Osm,
    GoogleHybrid,
    GoogleSatellite,
    GoogleRoad,
}

impl BaseMap {
    pub const ALL: [BaseMap; 4] = [
        BaseMap::Osm,
        BaseMap::GoogleHybrid,
        BaseMap::GoogleSatellite,
        BaseMap::GoogleRoad,
    ];

    /// Unknown keys fall back to OpenStreetMap.
    pub fn from_key(key: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|b| b.key() == key)
            .unwrap_or_default()
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Osm => "osm",
            Self::GoogleHybrid => "googleT",
            Self::GoogleSatellite => "googleS",
            Self::GoogleRoad => "googleM",
        }
    }

    pub fn tile_url(self, z: u32, x: u32, y: u32) -> String {
        match self {
            Self::Osm => format!("https://tile.openstreetmap.org/{z}/{x}/{y}.png"),
            Self::GoogleHybrid => format!("https://mt1.google.com/vt/lyrs=y&x={x}&y={y}&z={z}"),
            Self::GoogleSatellite => format!("https://mt1.google.com/vt/lyrs=s&x={x}&y={y}&z={z}"),
            Self::GoogleRoad => format!("https://mt1.google.com/vt/lyrs=m&x={x}&y={y}&z={z}"),
        }
    }
}

impl fmt::Display for BaseMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Camera over the planar (web-mercator) world: a center in metres, a
/// fractional zoom level, and the canvas size in pixels.
#[derive(Debug, Clone)]
pub struct Viewport {
    pub center: Position,
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
    basemap: BaseMap,
    animation: Option<CameraAnimation>,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(DEFAULT_CANVAS_WIDTH, DEFAULT_CANVAS_HEIGHT)
    }
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        let (lon, lat) = INITIAL_CENTER_LONLAT;
        Self {
            center: lonlat_to_planar(Position::new(lon, lat)),
            zoom: INITIAL_ZOOM,
            width,
            height,
            basemap: BaseMap::default(),
            animation: None,
        }
    }

    /// Metres per screen pixel.
    pub fn resolution(&self) -> f64 {
        ZOOM0_RESOLUTION / 2f64.powf(self.zoom)
    }

    pub fn basemap(&self) -> BaseMap {
        self.basemap
    }

    pub fn set_basemap(&mut self, key: &str) -> BaseMap {
        self.basemap = BaseMap::from_key(key);
        debug!(basemap = %self.basemap, "base map switched");
        self.basemap
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    /// Convert world coordinates to screen coordinates. Screen y grows downward.
    pub fn world_to_screen(&self, world: Position) -> (f64, f64) {
        let res = self.resolution();
        (
            (world.x - self.center.x) / res + self.width / 2.0,
            (self.center.y - world.y) / res + self.height / 2.0,
        )
    }

    /// Convert screen coordinates to world coordinates.
    pub fn screen_to_world(&self, sx: f64, sy: f64) -> Position {
        let res = self.resolution();
        Position::new(
            self.center.x + (sx - self.width / 2.0) * res,
            self.center.y - (sy - self.height / 2.0) * res,
        )
    }

    /// Zoom toward a focus point (screen coordinates).
    pub fn zoom_at(&mut self, delta: f64, screen_x: f64, screen_y: f64) {
        self.animation = None;
        let anchor = self.screen_to_world(screen_x, screen_y);
        self.zoom = (self.zoom - delta * ZOOM_SENSITIVITY).clamp(MIN_ZOOM, MAX_ZOOM);

        // Keep the point under the cursor fixed
        let res = self.resolution();
        self.center = Position::new(
            anchor.x - (screen_x - self.width / 2.0) * res,
            anchor.y + (screen_y - self.height / 2.0) * res,
        );
    }

    /// Pan by screen-space delta.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.animation = None;
        let res = self.resolution();
        self.center = Position::new(self.center.x - dx * res, self.center.y + dy * res);
    }

    pub fn animate_to(&mut self, center: Position, zoom: f64, now: f64, duration: f64) {
        let zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        self.animation = Some(CameraAnimation::new(
            (self.center, self.zoom),
            (center, zoom),
            now,
            duration,
        ));
        self.tick(now);
    }

    /// Advance any running animation. Returns true while still animating.
    pub fn tick(&mut self, now: f64) -> bool {
        let Some(anim) = &self.animation else {
            return false;
        };
        match anim.sample(now) {
            Some((center, zoom)) => {
                self.center = center;
                self.zoom = zoom;
                true
            }
            None => {
                (self.center, self.zoom) = anim.target();
                self.animation = None;
                false
            }
        }
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Where the camera will rest once the current animation ends.
    pub fn target(&self) -> (Position, f64) {
        self.animation
            .as_ref()
            .map(CameraAnimation::target)
            .unwrap_or((self.center, self.zoom))
    }

    /// Animate so `extent` fills the canvas minus `policy.padding`
    /// (top, right, bottom, left), never zooming past `policy.max_zoom`.
    /// Returns false when the extent or canvas cannot be framed.
    pub fn fit_extent(&mut self, extent: &Extent, policy: &FitPolicy, now: f64) -> bool {
        let [top, right, bottom, left] = policy.padding;
        let avail_w = self.width - left - right;
        let avail_h = self.height - top - bottom;
        if !extent.is_finite() || avail_w <= 0.0 || avail_h <= 0.0 {
            return false;
        }

        let fit_res = (extent.width() / avail_w).max(extent.height() / avail_h);
        let zoom = if fit_res > 0.0 {
            (ZOOM0_RESOLUTION / fit_res).log2().min(policy.max_zoom)
        } else {
            policy.max_zoom
        }
        .clamp(MIN_ZOOM, MAX_ZOOM);

        // Shift the center so the extent sits in the middle of the padded area
        let res = ZOOM0_RESOLUTION / 2f64.powf(zoom);
        let mid = extent.center();
        let center = Position::new(
            mid.x + (right - left) / 2.0 * res,
            mid.y + (top - bottom) / 2.0 * res,
        );

        info!(zoom, max_zoom = policy.max_zoom, "fitting viewport to extent");
        self.animate_to(center, zoom, now, policy.duration_ms);
        true
    }

    pub fn reset_home(&mut self, now: f64) {
        let (lon, lat) = HOME_CENTER_LONLAT;
        self.animate_to(lonlat_to_planar(Position::new(lon, lat)), HOME_ZOOM, now, HOME_DURATION_MS);
    }
}
