use std::io::{self, Write};

use serde::Serialize;

use crate::app::CatalogResult;
use crate::config::Settings;
use crate::pool::RunSummary;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn from_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Human }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalog(result: &CatalogResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    /// Settings with the token masked.
    pub fn print_settings(settings: &Settings) -> io::Result<()> {
        let mut shown = settings.clone();
        if shown.token().is_some() {
            shown.github_token = Some("********".to_string());
        }
        Self::print_json(&shown)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
