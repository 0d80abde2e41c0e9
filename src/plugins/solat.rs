//! Malaysian prayer times from the waktusolat.app API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Handler, MessageContext, Plugin, PluginContext, PluginError, bind};
use crate::config::JsonStore;
use crate::telegram::escape_html;

const NAMESPACE: &str = "solat";
const API_BASE: &str = "https://api.waktusolat.app";
const ZONES_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A JAKIM prayer zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub jakim_code: String,
    pub negeri: String,
    pub daerah: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrayerData {
    prayer_time: PrayerTime,
    #[serde(default)]
    status: Value,
    #[serde(default)]
    server_time: Value,
    #[serde(default)]
    period_type: Value,
}

#[derive(Debug, Deserialize)]
struct PrayerTime {
    #[serde(default)]
    hijri: Value,
    #[serde(default)]
    date: Value,
    #[serde(default)]
    day: Value,
    #[serde(default)]
    fajr: Value,
    #[serde(default)]
    syuruk: Value,
    #[serde(default)]
    dhuhr: Value,
    #[serde(default)]
    asr: Value,
    #[serde(default)]
    maghrib: Value,
    #[serde(default)]
    isha: Value,
}

/// Renders a JSON scalar without quotes.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => escape_html(s),
        Value::Null => String::new(),
        other => escape_html(&other.to_string()),
    }
}

fn format_prayer(zone: &Zone, data: &PrayerData) -> String {
    let t = &data.prayer_time;
    format!(
        "<b>query result:</b>\n\
         <b>Zone:</b> {}\n\
         <b>Negeri:</b> {}\n\
         <b>Daerah:</b> {}\n\
         \n\
         <b>Day:</b> {}\n\
         <b>Date:</b> {}\n\
         <b>Hijri Date:</b> {}\n\
         <b>Server Time:</b> {}\n\
         <b>Period Time:</b> {}\n\
         <b>Response Status:</b> {}\n\
         \n\
         <b>WAKTU SOLAT</b>\n\
         <b>SUBUH</b> {}\n\
         <b>ZOHOR</b> {}\n\
         <b>ASAR</b> {}\n\
         <b>MAGHRIB</b> {}\n\
         <b>ISYAK</b> {}\n\
         --\n\
         <b>SYURUK</b> {}",
        escape_html(&zone.jakim_code),
        escape_html(&zone.negeri),
        escape_html(&zone.daerah),
        plain(&t.day),
        plain(&t.date),
        plain(&t.hijri),
        plain(&data.server_time),
        plain(&data.period_type),
        plain(&data.status),
        plain(&t.fajr),
        plain(&t.dhuhr),
        plain(&t.asr),
        plain(&t.maghrib),
        plain(&t.isha),
        plain(&t.syuruk),
    )
}

/// Day and optional month and year of a prayer time request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Period {
    day: u32,
    month: Option<u32>,
    year: Option<u32>,
}

impl Period {
    /// Parses `<day> [month] [year]`. Non-numeric values yield `None`.
    fn parse(day: &str, month: Option<&str>, year: Option<&str>) -> Option<Self> {
        let number = |raw: &str| raw.parse::<u32>().ok();
        let optional = |raw: Option<&str>| match raw {
            Some(raw) => number(raw).map(Some),
            None => Some(None),
        };
        Some(Self {
            day: number(day)?,
            month: optional(month)?,
            year: optional(year)?,
        })
    }

    /// Query string for the optional month and year.
    fn query(&self) -> Vec<(&'static str, u32)> {
        let mut query = Vec::new();
        if let Some(month) = self.month {
            query.push(("month", month));
        }
        if let Some(year) = self.year {
            query.push(("year", year));
        }
        query
    }
}

struct ZoneCache {
    store: JsonStore,
    zones: Vec<Zone>,
}

pub struct Solat {
    ctx: PluginContext,
    http: Client,
    cache: Mutex<ZoneCache>,
}

pub fn load(ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
    let store = JsonStore::open(ctx.persist_dir(), NAMESPACE)?;
    let zones: Vec<Zone> = store.get_or_default("zones");
    if zones.is_empty() {
        warn!("zone cache is empty, it will be built on first use");
    }

    Ok(Arc::new(Solat {
        ctx: ctx.clone(),
        http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        cache: Mutex::new(ZoneCache { store, zones }),
    }))
}

impl Solat {
    /// Returns the cached zones, fetching and persisting them when empty.
    async fn zones(&self) -> Result<Vec<Zone>, PluginError> {
        let mut cache = self.cache.lock().await;
        if !cache.zones.is_empty() {
            return Ok(cache.zones.clone());
        }

        info!("zones are not yet cached. building cache...");
        let zones: Vec<Zone> = self
            .http
            .get(format!("{API_BASE}/zones"))
            .timeout(ZONES_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        cache.store.set("zones", &zones)?;
        cache.store.save()?;
        cache.zones.clone_from(&zones);
        Ok(zones)
    }

    async fn waktu_solat(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let zones = self.zones().await?;

        let argv = ctx.argv();
        if argv.len() < 2 {
            return ctx
                .edit("<i>syntax: .ws &lt;zone&gt; &lt;day&gt; [month] [year]</i>")
                .await;
        }
        let code = &argv[0];
        let Some(period) = Period::parse(
            &argv[1],
            argv.get(2).map(String::as_str),
            argv.get(3).map(String::as_str),
        ) else {
            return ctx
                .edit("<i>day, month and year must be numbers</i>")
                .await;
        };

        ctx.edit("<i>loading...</i>").await?;

        let Some(zone) = zones.iter().find(|z| &z.jakim_code == code) else {
            return ctx
                .edit(&format!(
                    "invalid zone: {}, please refer .getzones",
                    escape_html(code)
                ))
                .await;
        };

        let response = self
            .http
            .get(format!("{API_BASE}/solat/{}/{}", zone.jakim_code, period.day))
            .query(&period.query())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return ctx
                .edit(&format!(
                    "<i>api call failed, status code {}\n{}</i>",
                    status.as_u16(),
                    escape_html(&body)
                ))
                .await;
        }

        let data: PrayerData = response.json().await?;
        ctx.edit(&format_prayer(zone, &data)).await
    }

    async fn get_zones(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let zones = self.zones().await?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("zones.json");
        tokio::fs::write(&path, serde_json::to_string_pretty(&zones)?).await?;

        ctx.reply_document(&path, "").await?;
        ctx.bot
            .delete_messages(ctx.chat_id(), &[ctx.message.id])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Plugin for Solat {
    fn name(&self) -> &'static str {
        "Khusus untuk solat"
    }

    fn description(&self) -> &'static str {
        "Buat masa ni ada pasal waktu solat je, maybe more soon."
    }

    fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
        vec![
            Handler::new(
                self.ctx
                    .command(["waktusolat", "waktu_solat", "ws"])
                    .me_only(),
                bind(&self, Self::waktu_solat),
            ),
            Handler::new(
                self.ctx.command(["getzones"]).me_only(),
                bind(&self, Self::get_zones),
            ),
        ]
    }
}
