//! Display helpers for the presentation layer.

use chrono::{DateTime, Utc};

use crate::types::Units;

const HPA_TO_INHG: f64 = 0.029_53;

const COMPASS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// "16°C" / "61°F"
pub fn format_temp(value: f64, units: Units) -> String {
    format!("{}{}", value.round() as i64, units.temperature_symbol())
}

/// Wind speed to one decimal place, dropping a trailing ".0"
pub fn format_wind(speed: f64, units: Units) -> String {
    let rounded = (speed * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as i64, units.wind_speed_symbol())
    } else {
        format!("{:.1} {}", rounded, units.wind_speed_symbol())
    }
}

pub fn format_pressure(hpa: u32, units: Units) -> String {
    match units {
        Units::Metric => format!("{} hPa", hpa),
        Units::Imperial => format!("{:.2} inHg", f64::from(hpa) * HPA_TO_INHG),
    }
}

/// 16-point compass direction for a bearing in degrees
pub fn wind_direction(degrees: f64) -> &'static str {
    let normalized = degrees.rem_euclid(360.0);
    let index = (normalized / 22.5).round() as usize % COMPASS.len();
    COMPASS[index]
}

/// Relative age for the offline staleness indicator
pub fn format_snapshot_age(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - captured_at).num_minutes().max(0);
    match minutes {
        0 => "just now".to_string(),
        1 => "1 minute ago".to_string(),
        m if m < 60 => format!("{} minutes ago", m),
        m if m < 120 => "1 hour ago".to_string(),
        m if m < 24 * 60 => format!("{} hours ago", m / 60),
        m if m < 48 * 60 => "1 day ago".to_string(),
        m => format!("{} days ago", m / (24 * 60)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_temp() {
        assert_eq!(format_temp(15.6, Units::Metric), "16°C");
        assert_eq!(format_temp(60.1, Units::Imperial), "60°F");
        assert_eq!(format_temp(-3.4, Units::Metric), "-3°C");
    }

    #[test]
    fn test_format_wind() {
        assert_eq!(format_wind(12.34, Units::Metric), "12.3 km/h");
        assert_eq!(format_wind(4.0, Units::Imperial), "4 mph");
        assert_eq!(format_wind(3.96, Units::Metric), "4 km/h");
    }

    #[test]
    fn test_format_pressure() {
        assert_eq!(format_pressure(1013, Units::Metric), "1013 hPa");
        assert_eq!(format_pressure(1013, Units::Imperial), "29.91 inHg");
    }

    #[test]
    fn test_wind_direction() {
        assert_eq!(wind_direction(0.0), "N");
        assert_eq!(wind_direction(45.0), "NE");
        assert_eq!(wind_direction(200.0), "SSW");
        assert_eq!(wind_direction(350.0), "N");
        assert_eq!(wind_direction(-90.0), "W");
        assert_eq!(wind_direction(720.0), "N");
    }

    #[test]
    fn test_snapshot_age() {
        let now = Utc::now();
        assert_eq!(format_snapshot_age(now, now), "just now");
        assert_eq!(format_snapshot_age(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(format_snapshot_age(now - Duration::minutes(42), now), "42 minutes ago");
        assert_eq!(format_snapshot_age(now - Duration::minutes(90), now), "1 hour ago");
        assert_eq!(format_snapshot_age(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(format_snapshot_age(now - Duration::days(3), now), "3 days ago");
        // Clock skew never produces a negative age
        assert_eq!(format_snapshot_age(now + Duration::minutes(5), now), "just now");
    }
}
