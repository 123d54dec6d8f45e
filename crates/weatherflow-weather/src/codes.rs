//! WMO weather code interpretation.
//!
//! Every code maps to a `(category, description, icon)` triple; codes outside
//! the table map to the Unknown triple so no condition list is ever empty.
//! See: https://open-meteo.com/en/docs#weathervariables

use crate::types::{Condition, WeatherCategory, WeatherIcon};

const OVERCAST: i32 = 3;

const OVERCAST_VARIANTS: [(&str, WeatherIcon); 5] = [
    ("Cloudy", WeatherIcon::Cloudy),
    ("Overcast", WeatherIcon::PartlyCloudyDay),
    ("Cloudy skies", WeatherIcon::Cloudy),
    ("Overcast skies", WeatherIcon::PartlyCloudyDay),
    ("Cloudy conditions", WeatherIcon::Cloudy),
];

const SECONDS_PER_DAY: i64 = 86_400;

impl WeatherCategory {
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0..=3 => Self::Clear,
            45 | 48 => Self::Fog,
            51 | 53 | 55 | 56 | 57 => Self::Drizzle,
            61 | 63 | 65 | 66 | 67 | 80 | 81 | 82 => Self::Rain,
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Unknown,
        }
    }
}

/// Human-readable description for a code
pub fn description(code: i32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mostly sunny",
        2 => "Partly cloudy",
        3 => "Cloudy",
        45 => "Foggy",
        48 => "Foggy with rime",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Heavy drizzle",
        56 => "Light freezing drizzle",
        57 => "Heavy freezing drizzle",
        61 => "Light rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Light snow",
        73 => "Moderate snow",
        75 => "Heavy snow",
        77 => "Snow grains",
        80 => "Light rain showers",
        81 => "Moderate rain showers",
        82 => "Heavy rain showers",
        85 => "Light snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with hail",
        99 => "Severe thunderstorm",
        _ => "Unknown conditions",
    }
}

pub fn icon(code: i32, is_day: bool) -> WeatherIcon {
    match WeatherCategory::from_wmo_code(code) {
        WeatherCategory::Unknown => WeatherIcon::Unknown,
        WeatherCategory::Clear => match (code, is_day) {
            (0, true) => WeatherIcon::ClearDay,
            (0, false) => WeatherIcon::ClearNight,
            (OVERCAST, _) => WeatherIcon::Cloudy,
            (_, true) => WeatherIcon::PartlyCloudyDay,
            (_, false) => WeatherIcon::PartlyCloudyNight,
        },
        WeatherCategory::Fog => WeatherIcon::Fog,
        WeatherCategory::Drizzle => WeatherIcon::Rain,
        WeatherCategory::Rain if (80..=82).contains(&code) => WeatherIcon::ShowerRain,
        WeatherCategory::Rain => WeatherIcon::Rain,
        WeatherCategory::Snow => WeatherIcon::Snow,
        WeatherCategory::Thunderstorm => WeatherIcon::Thunderstorm,
    }
}

/// Local hours 06:00 to 17:59 count as daytime
pub fn is_day_hour(hour: u32) -> bool {
    (6..18).contains(&hour)
}

/// Full condition triple for `code`
pub fn condition(code: i32, is_day: bool) -> Condition {
    Condition {
        code,
        category: WeatherCategory::from_wmo_code(code),
        description: description(code).to_string(),
        icon: icon(code, is_day),
    }
}

/// Like [`condition`], but overcast days rotate through a few phrasings keyed
/// on the day number of `timestamp` so a week of cloud does not read as one line.
pub fn varied_condition(code: i32, timestamp: i64, is_day: bool) -> Condition {
    if code != OVERCAST {
        return condition(code, is_day);
    }

    let day = timestamp.div_euclid(SECONDS_PER_DAY);
    let index = (day + i64::from(code)).rem_euclid(OVERCAST_VARIANTS.len() as i64) as usize;
    let (text, icon) = OVERCAST_VARIANTS[index];
    let icon = match (icon, is_day) {
        (WeatherIcon::PartlyCloudyDay, false) => WeatherIcon::PartlyCloudyNight,
        (icon, _) => icon,
    };

    Condition {
        code,
        category: WeatherCategory::Clear,
        description: text.to_string(),
        icon,
    }
}
