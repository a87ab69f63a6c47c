use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// HS256 secret shared with the managed auth provider.
    pub jwt_secret: String,
    pub jwt_audience: Option<String>,
    /// Lowercased emails that are always treated as administrators.
    pub admin_emails: Vec<String>,
    /// Used when the `google_sheet_webapp_url` setting is empty.
    pub sheet_webapp_url: Option<String>,
    pub upload_dir: PathBuf,
    /// Directories searched for permit PDF templates, in order.
    pub form_dirs: Vec<PathBuf>,
    /// Directories searched for a Korean font to embed in permits.
    pub font_dirs: Vec<PathBuf>,
    /// Period of the in-process auto-approval trigger. 0 = disabled.
    pub auto_approval_interval_secs: u64,
    pub dashboard_origin: String,
    /// `PORTAL_ENV` (or `RUST_ENV`) is `production`.
    pub production: bool,
}

impl Config {
    /// Checks that only apply to the HTTP server. CLI commands never verify
    /// tokens and run without a JWT secret.
    pub fn validate_for_server(&self) -> anyhow::Result<()> {
        if !self.jwt_secret.trim().is_empty() {
            return Ok(());
        }
        if self.production {
            anyhow::bail!(
                "AUTH_JWT_SECRET is not set. \
                 Set the auth provider's JWT secret before running in production."
            );
        }
        tracing::warn!("AUTH_JWT_SECRET is not set; every authenticated request will be rejected");
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "postgres://localhost/portal".into(),
            jwt_secret: String::new(),
            jwt_audience: None,
            admin_emails: Vec::new(),
            sheet_webapp_url: None,
            upload_dir: PathBuf::from("./uploads"),
            form_dirs: vec![PathBuf::from("."), PathBuf::from("./assets/forms")],
            font_dirs: [
                "./assets/fonts",
                "./public/fonts",
                "/usr/share/fonts/truetype/nanum",
                "/usr/share/fonts/truetype/noto",
                "/usr/share/fonts/opentype/noto",
                "C:/Windows/Fonts",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            auto_approval_interval_secs: 0,
            dashboard_origin: "http://localhost:3000".into(),
            production: false,
        }
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let jwt_secret = std::env::var("AUTH_JWT_SECRET").unwrap_or_default();
    let env_mode = std::env::var("PORTAL_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_default();

    Ok(Config {
        port: std::env::var("PORTAL_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        jwt_secret,
        jwt_audience: std::env::var("AUTH_JWT_AUDIENCE")
            .ok()
            .filter(|v| !v.trim().is_empty()),
        admin_emails: split_list(&std::env::var("ADMIN_EMAILS").unwrap_or_default())
            .map(str::to_lowercase)
            .collect(),
        sheet_webapp_url: std::env::var("GOOGLE_SHEET_WEBAPP_URL")
            .ok()
            .filter(|v| !v.trim().is_empty()),
        upload_dir: std::env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir),
        form_dirs: match std::env::var("FORM_DIRS") {
            Ok(raw) => split_list(&raw).map(PathBuf::from).collect(),
            Err(_) => defaults.form_dirs,
        },
        font_dirs: match std::env::var("FONT_DIRS") {
            Ok(raw) => split_list(&raw).map(PathBuf::from).collect(),
            Err(_) => defaults.font_dirs,
        },
        auto_approval_interval_secs: std::env::var("AUTO_APPROVAL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN").unwrap_or(defaults.dashboard_origin),
        production: env_mode == "production",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_disable_interval_trigger() {
        let config = Config::default();
        assert_eq!(config.auto_approval_interval_secs, 0);
        assert_eq!(config.form_dirs.len(), 2);
        assert!(config
            .font_dirs
            .contains(&PathBuf::from("/usr/share/fonts/truetype/nanum")));
    }

    #[test]
    fn test_missing_secret_is_fatal_only_for_production_server() {
        let dev = Config::default();
        assert!(dev.validate_for_server().is_ok());

        let prod = Config {
            production: true,
            ..Config::default()
        };
        assert!(prod.validate_for_server().is_err());

        let prod_with_secret = Config {
            production: true,
            jwt_secret: "s3cret".into(),
            ..Config::default()
        };
        assert!(prod_with_secret.validate_for_server().is_ok());
    }

    #[test]
    fn test_split_list_skips_blanks() {
        let items: Vec<&str> = split_list(" a@x , ,b@y,").collect();
        assert_eq!(items, vec!["a@x", "b@y"]);
    }
}
