//! Static HTML scraping adapter (component G).
//!
//! Fetches a field's `target` URL once per unique target (mirroring
//! [`crate::http_api`]'s shared-fetch grouping) and applies each field's
//! `selector` as a CSS selector via the `scraper` crate, taking the first
//! matched element's text content.

use std::collections::HashMap;
use std::sync::Arc;

use chomp_core::scheduler::{IngesterBody, RuntimeContext};
use chomp_core::{ChompError, FieldValue, IngesterDef, Result};
use futures::FutureExt;
use scraper::{Html, Selector};
use tracing::warn;

use crate::ingest::{self, StorageSink};

/// Construct the Static Scraper ingester body.
#[must_use]
pub fn body(storage: Arc<StorageSink>, client: reqwest::Client) -> IngesterBody {
    Arc::new(move |context, def| {
        let storage = Arc::clone(&storage);
        let client = client.clone();
        run_tick(context, def, storage, client).boxed()
    })
}

async fn run_tick(
    context: Arc<RuntimeContext>,
    def: Arc<IngesterDef>,
    storage: Arc<StorageSink>,
    client: reqwest::Client,
) -> Result<()> {
    let interval_sec = chomp_core::interval::parse(&def.interval)?;
    let mut fields = ingest::pre_ingest(&def);

    let mut by_target: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, field) in fields.iter().enumerate() {
        by_target.entry(field.def.target.clone()).or_default().push(index);
    }

    for (target, indices) in by_target {
        if target.is_empty() {
            continue;
        }
        match fetch_html(&client, &target).await {
            Ok(body) => {
                let document = Html::parse_document(&body);
                for index in indices {
                    let selector = fields[index].def.selector.clone();
                    match extract(&document, &selector) {
                        Some(text) => fields[index].value = FieldValue::String(text),
                        None => warn!(
                            ingester = %def.name,
                            field = %fields[index].def.name,
                            selector = %selector,
                            "css selector matched no element"
                        ),
                    }
                }
            }
            Err(err) => {
                warn!(ingester = %def.name, target = %target, error = %err, "scrape fetch failed");
            }
        }
    }

    ingest::post_ingest(&def, fields, &storage, context.clock.as_ref(), interval_sec).await
}

async fn fetch_html(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| ChompError::decode_error(url, err.to_string()))?
        .error_for_status()
        .map_err(|err| ChompError::decode_error(url, err.to_string()))?;
    response
        .text()
        .await
        .map_err(|err| ChompError::decode_error(url, err.to_string()))
}

/// Parse `selector` as CSS and return the first matched element's trimmed,
/// concatenated text content.
fn extract(document: &Html, selector: &str) -> Option<String> {
    let parsed = Selector::parse(selector).ok()?;
    let element = document.select(&parsed).next()?;
    let text = element.text().collect::<String>();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
