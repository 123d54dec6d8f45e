use std::fmt;

use weatherflow_core::Units;

/// Coordinates are compared at the provider's precision (4 decimal places).
const COORD_SCALE: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Current,
    Forecast,
    Search,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
            Self::Search => "search",
        }
    }
}

/// Ordered `(kind, lat, lon, units-or-query)` tuple identifying a cached resource.
///
/// Display-only location data (names, countries) never takes part in a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: ResourceKind,
    lat: i64,
    lon: i64,
    variant: String,
}

fn quantize(coord: f64) -> i64 {
    (coord * COORD_SCALE).round() as i64
}

impl CacheKey {
    pub fn new(kind: ResourceKind, lat: f64, lon: f64, variant: impl Into<String>) -> Self {
        Self {
            kind,
            lat: quantize(lat),
            lon: quantize(lon),
            variant: variant.into(),
        }
    }

    pub fn current(lat: f64, lon: f64, units: Units) -> Self {
        Self::new(ResourceKind::Current, lat, lon, units.as_str())
    }

    pub fn forecast(lat: f64, lon: f64, units: Units) -> Self {
        Self::new(ResourceKind::Forecast, lat, lon, units.as_str())
    }

    /// Search keys carry no location; the query string is the discriminator.
    pub fn search(query: &str) -> Self {
        Self::new(ResourceKind::Search, 0.0, 0.0, query.trim())
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn lat(&self) -> f64 {
        self.lat as f64 / COORD_SCALE
    }

    pub fn lon(&self) -> f64 {
        self.lon as f64 / COORD_SCALE
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// True for location-bound keys (current/forecast) at the given point.
    pub fn is_for_location(&self, lat: f64, lon: f64) -> bool {
        self.kind != ResourceKind::Search && self.lat == quantize(lat) && self.lon == quantize(lon)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.kind.as_str(),
            self.lat(),
            self.lon(),
            self.variant
        )
    }
}
