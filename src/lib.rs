//! School permit portal: application review, auto-approval policies, the
//! gate roster and printable permits.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod permit;
pub mod review;
pub mod roster;
pub mod store;

use auth::JwtVerifier;
use roster::sheet::SheetClient;
use store::postgres::PgStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub config: config::Config,
    pub sheets: SheetClient,
    pub verifier: JwtVerifier,
}

impl AppState {
    pub fn new(db: PgStore, config: config::Config) -> anyhow::Result<Self> {
        let verifier = JwtVerifier::new(
            &config.jwt_secret,
            config.jwt_audience.clone(),
            config.admin_emails.clone(),
        );
        Ok(Self {
            db,
            sheets: SheetClient::new()?,
            verifier,
            config,
        })
    }

    /// Roster sync target for reviews triggered through this process.
    pub fn roster_sync(&self) -> review::RosterSync<'_> {
        review::RosterSync {
            sheets: &self.sheets,
            fallback_url: self.config.sheet_webapp_url.as_deref(),
        }
    }
}
