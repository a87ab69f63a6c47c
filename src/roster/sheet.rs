use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// First sheet row the roster is written to; rows above hold the header.
pub const START_ROW: u32 = 4;
pub const START_COL: u32 = 1;

/// Body accepted by the spreadsheet web app.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetWriteRequest {
    pub clear: bool,
    pub start_row: u32,
    pub start_col: u32,
    pub rows: Vec<Vec<Value>>,
}

impl SheetWriteRequest {
    /// Replace everything below the header with `rows`.
    pub fn replace(rows: Vec<Vec<Value>>) -> Self {
        Self {
            clear: true,
            start_row: START_ROW,
            start_col: START_COL,
            rows,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SheetWriteResponse {
    ok: Option<bool>,
    count: Option<u64>,
    error: Option<String>,
}

/// Client for the spreadsheet web app that mirrors the gate roster.
/// A single attempt per call; failures surface to the caller.
#[derive(Clone)]
pub struct SheetClient {
    client: reqwest::Client,
}

impl SheetClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("permit-portal/roster-sync")
            .build()?;
        Ok(Self { client })
    }

    /// POST the rows and return how many the sheet reports as written.
    pub async fn write_rows(&self, url: &str, request: &SheetWriteRequest) -> Result<u64> {
        let resp = self.client.post(url).json(request).send().await?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(status = %status, body = %body, "roster sheet rejected write");
            anyhow::bail!("sheet sync failed ({}): {}", status, body);
        }
        if !content_type.contains("application/json") {
            anyhow::bail!(
                "sheet sync returned a non-JSON response ({}); check the web app deployment",
                if content_type.is_empty() { "no content-type" } else { content_type.as_str() }
            );
        }

        let parsed: SheetWriteResponse = serde_json::from_str(&body)
            .map_err(|e| anyhow::anyhow!("sheet sync returned malformed JSON: {}", e))?;
        if parsed.ok == Some(false) {
            anyhow::bail!(
                "sheet sync failed: {}",
                parsed.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        let count = parsed.count.unwrap_or(request.rows.len() as u64);
        info!(count, "roster sheet updated");
        Ok(count)
    }
}
