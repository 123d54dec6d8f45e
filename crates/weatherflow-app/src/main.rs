use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use weatherflow_app::{App, WeatherService, WeatherView};
use weatherflow_weather::format::{format_pressure, format_temp, format_wind, wind_direction};
use weatherflow_weather::{CurrentWeather, Forecast, GeoPoint};

const FORECAST_DAYS: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    weatherflow_core::init()?;

    let mut app = App::load()?;
    app.start();
    tracing::info!("WeatherFlow started");

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let service = app.service();
    let cancel = app.shutdown_token();

    let outcome = run(&service, &query, &cancel).await;
    app.shutdown().await?;

    if let Err(e) = outcome {
        eprintln!("{}", e.user_message());
        tracing::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(
    service: &WeatherService,
    query: &str,
    cancel: &CancellationToken,
) -> Result<(), weatherflow_core::AppError> {
    let Some(point) = choose_location(service, query, cancel).await? else {
        println!("Usage: weatherflow <city>");
        println!("No city given and no saved location or favorite to fall back to.");
        return Ok(());
    };

    let current = service.current_or_snapshot(&point, cancel).await?;
    print_current(&current);

    match service.forecast_or_snapshot(&point, cancel).await {
        Ok(forecast) => print_forecast(&forecast),
        Err(e) => eprintln!("Forecast unavailable: {}", e.user_message()),
    }
    Ok(())
}

async fn choose_location(
    service: &WeatherService,
    query: &str,
    cancel: &CancellationToken,
) -> Result<Option<GeoPoint>, weatherflow_core::AppError> {
    if !query.trim().is_empty() {
        let results = service.search(query, cancel).await?;
        return match results.first() {
            Some(point) => Ok(Some(point.clone())),
            None => Err(weatherflow_core::WeatherError::LocationNotFound(query.to_string()).into()),
        };
    }

    if let Some(point) = service.last_location() {
        return Ok(Some(point));
    }

    let favorites = service.store().favorites().unwrap_or_else(|e| {
        tracing::warn!("Failed to read favorites: {:#}", e);
        Vec::new()
    });
    Ok(favorites.first().map(|favorite| favorite.to_point()))
}

fn print_staleness<T>(view: &WeatherView<T>) {
    if let Some(label) = view.staleness_label(Utc::now()) {
        println!("[{}]", label);
    }
}

fn print_current(view: &WeatherView<CurrentWeather>) {
    let weather = &view.data;
    print_staleness(view);

    println!("{}", weather.location_label);
    if let Some(condition) = weather.conditions.first() {
        println!("  {} {}", condition.icon.emoji(), condition.description);
    }
    println!(
        "  {} (feels like {})",
        format_temp(weather.temperature, view.units),
        format_temp(weather.feels_like, view.units)
    );
    println!(
        "  Wind {} {}",
        format_wind(weather.wind_speed, view.units),
        wind_direction(f64::from(weather.wind_dir_deg))
    );
    println!(
        "  Humidity {}%, pressure {}",
        weather.humidity_pct,
        format_pressure(weather.pressure_hpa, view.units)
    );
}

fn print_forecast(view: &WeatherView<Forecast>) {
    println!();
    print_staleness(view);

    for day in view.data.daily.iter().take(FORECAST_DAYS) {
        let (emoji, description) = day
            .conditions
            .first()
            .map(|c| (c.icon.emoji(), c.description.as_str()))
            .unwrap_or(("", ""));
        println!(
            "  {}  {} / {}  {} {}",
            day.date.format("%a %d %b"),
            format_temp(day.temp_max, view.units),
            format_temp(day.temp_min, view.units),
            emoji,
            description
        );
    }
}
