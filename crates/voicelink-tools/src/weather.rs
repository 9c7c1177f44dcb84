//! Weather tools
//!
//! `get_weather` and `get_weather_forecast` take an optional city. Without
//! one, the session's resolved location fills in; if that is also missing
//! the tool returns a well-formed error object instead of failing the call,
//! so the model can ask the user for a city.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use voicelink_core::LocationInfo;

use crate::{Tool, ToolError, ToolOutcome};

/// Current conditions for one city.
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherNow {
    pub province: String,
    pub city: String,
    pub weather: String,
    pub temperature: String,
    pub humidity: String,
    #[serde(rename = "winddirection")]
    pub wind_direction: String,
    #[serde(rename = "windpower")]
    pub wind_power: String,
    #[serde(rename = "reporttime")]
    pub report_time: String,
}

/// One forecast day.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastDay {
    pub date: String,
    pub week: String,
    #[serde(rename = "dayweather")]
    pub day_weather: String,
    #[serde(rename = "nightweather")]
    pub night_weather: String,
    #[serde(rename = "daytemp")]
    pub day_temp: String,
    #[serde(rename = "nighttemp")]
    pub night_temp: String,
    #[serde(rename = "daywind")]
    pub day_wind: String,
    #[serde(rename = "nightwind")]
    pub night_wind: String,
    #[serde(rename = "daypower")]
    pub day_power: String,
    #[serde(rename = "nightpower")]
    pub night_power: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherForecast {
    pub province: String,
    pub city: String,
    pub casts: Vec<ForecastDay>,
}

/// Weather lookup backend.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, city: &str) -> Result<WeatherNow, ToolError>;
    async fn forecast(&self, city: &str) -> Result<WeatherForecast, ToolError>;
}

/// Amap (高德) weather API client.
pub struct AmapWeatherProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AmapResponse {
    status: String,
    #[serde(default)]
    info: String,
    #[serde(default)]
    lives: Vec<WeatherNow>,
    #[serde(default)]
    forecasts: Vec<WeatherForecast>,
}

impl AmapWeatherProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://restapi.amap.com")
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    async fn query(&self, city: &str, extensions: &str) -> Result<AmapResponse, ToolError> {
        let url = format!("{}/v3/weather/weatherInfo", self.base_url);
        let resp: AmapResponse = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("city", city),
                ("extensions", extensions),
            ])
            .send()
            .await?
            .json()
            .await?;
        if resp.status != "1" {
            return Err(ToolError::Invoke(format!(
                "weather api status {}: {}",
                resp.status, resp.info
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl WeatherProvider for AmapWeatherProvider {
    async fn current(&self, city: &str) -> Result<WeatherNow, ToolError> {
        let resp = self.query(city, "base").await?;
        resp.lives
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::Invoke(format!("no weather data for {city}")))
    }

    async fn forecast(&self, city: &str) -> Result<WeatherForecast, ToolError> {
        let resp = self.query(city, "all").await?;
        resp.forecasts
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::Invoke(format!("no forecast data for {city}")))
    }
}

#[derive(Deserialize, Default)]
struct CityArgs {
    #[serde(default)]
    city: String,
}

fn resolve_city(arguments: &str, location: &RwLock<LocationInfo>) -> Result<String, ToolOutcome> {
    let args: CityArgs = serde_json::from_str(arguments).unwrap_or_default();
    if !args.city.is_empty() {
        return Ok(args.city);
    }
    let loc = location.read();
    if loc.has_city() {
        tracing::debug!(city = %loc.city, "Using resolved location for weather lookup");
        return Ok(loc.city.clone());
    }
    Err(ToolOutcome::feedback(
        serde_json::json!({
            "success": false,
            "error": "未指定城市名称，且无法获取用户位置信息"
        })
        .to_string(),
    ))
}

fn city_parameters() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "city": {
                "type": "string",
                "description": "城市名称，不填则使用用户当前位置"
            }
        },
        "required": []
    })
}

/// `get_weather`: current conditions.
pub struct WeatherTool {
    provider: Arc<dyn WeatherProvider>,
    location: Arc<RwLock<LocationInfo>>,
}

impl WeatherTool {
    pub fn new(provider: Arc<dyn WeatherProvider>, location: Arc<RwLock<LocationInfo>>) -> Self {
        Self { provider, location }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "查询指定城市的当前天气。"
    }

    fn parameters(&self) -> serde_json::Value {
        city_parameters()
    }

    async fn invoke(&self, arguments: &str) -> Result<ToolOutcome, ToolError> {
        let city = match resolve_city(arguments, &self.location) {
            Ok(city) => city,
            Err(outcome) => return Ok(outcome),
        };

        let weather = match self.provider.current(&city).await {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(error = %e, city = %city, "Weather lookup failed");
                return Ok(ToolOutcome::feedback(
                    serde_json::json!({
                        "success": false,
                        "error": format!("获取天气信息失败: {e}")
                    })
                    .to_string(),
                ));
            }
        };

        let description = format!(
            "{}{}当前天气：{}，温度{}°C，湿度{}%，{}风{}级",
            weather.province,
            weather.city,
            weather.weather,
            weather.temperature,
            weather.humidity,
            weather.wind_direction,
            weather.wind_power
        );
        Ok(ToolOutcome::feedback(
            serde_json::json!({
                "success": true,
                "city": weather.city,
                "province": weather.province,
                "weather": weather.weather,
                "temperature": weather.temperature,
                "humidity": weather.humidity,
                "wind": { "direction": weather.wind_direction, "power": weather.wind_power },
                "report_time": weather.report_time,
                "description": description,
            })
            .to_string(),
        ))
    }
}

/// `get_weather_forecast`: next-days forecast.
pub struct WeatherForecastTool {
    provider: Arc<dyn WeatherProvider>,
    location: Arc<RwLock<LocationInfo>>,
}

impl WeatherForecastTool {
    pub fn new(provider: Arc<dyn WeatherProvider>, location: Arc<RwLock<LocationInfo>>) -> Self {
        Self { provider, location }
    }
}

#[async_trait]
impl Tool for WeatherForecastTool {
    fn name(&self) -> &str {
        "get_weather_forecast"
    }

    fn description(&self) -> &str {
        "查询指定城市未来几天的天气预报。"
    }

    fn parameters(&self) -> serde_json::Value {
        city_parameters()
    }

    async fn invoke(&self, arguments: &str) -> Result<ToolOutcome, ToolError> {
        let city = match resolve_city(arguments, &self.location) {
            Ok(city) => city,
            Err(outcome) => return Ok(outcome),
        };

        let forecast = match self.provider.forecast(&city).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, city = %city, "Forecast lookup failed");
                return Ok(ToolOutcome::feedback(
                    serde_json::json!({
                        "success": false,
                        "error": format!("获取天气预报失败: {e}")
                    })
                    .to_string(),
                ));
            }
        };

        let days: Vec<serde_json::Value> = forecast
            .casts
            .iter()
            .map(|cast| {
                serde_json::json!({
                    "date": cast.date,
                    "week": cast.week,
                    "day_weather": cast.day_weather,
                    "night_weather": cast.night_weather,
                    "day_temp": cast.day_temp,
                    "night_temp": cast.night_temp,
                    "day_wind": format!("{}{}级", cast.day_wind, cast.day_power),
                    "night_wind": format!("{}{}级", cast.night_wind, cast.night_power),
                })
            })
            .collect();

        Ok(ToolOutcome::feedback(
            serde_json::json!({
                "success": true,
                "city": forecast.city,
                "province": forecast.province,
                "forecast": days,
            })
            .to_string(),
        ))
    }
}
