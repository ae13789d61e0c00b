use crate::data_context::MarketData;
use crate::database::Database;
use crate::models::PairSpec;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Clone)]
pub struct AppContext {
    database_url: Option<String>,
}

/// Where a command reads its bars from.
#[derive(Clone, Debug, Default)]
pub struct BarQuery {
    pub lookback: Option<usize>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub data_file: Option<PathBuf>,
}

impl AppContext {
    pub async fn initialize(database_url: Option<String>) -> Result<Self> {
        let database_url = database_url.filter(|url| !url.trim().is_empty());
        Ok(Self { database_url })
    }

    pub fn has_database(&self) -> bool {
        self.database_url.is_some()
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(database_url) = self.database_url.as_deref() else {
            return Err(anyhow!(
                "DATABASE_URL must be set to use database-backed commands."
            ));
        };
        Database::new(database_url).await
    }

    /// Bars for a pair from the snapshot file when given, otherwise from the
    /// database.
    pub async fn market_data(&self, pair: &PairSpec, query: &BarQuery) -> Result<MarketData> {
        let data = match &query.data_file {
            Some(path) => {
                let data = MarketData::load_from_file(path)?;
                if data.pair() != pair {
                    return Err(anyhow!(
                        "Snapshot {} holds {} but {} was requested",
                        path.display(),
                        data.pair(),
                        pair
                    ));
                }
                data.restrict(query.lookback, query.start, query.end)
            }
            None => {
                let db = self.database().await?;
                MarketData::load(&db, pair, query.lookback, query.start, query.end).await?
            }
        };
        if data.bars().is_empty() {
            return Err(anyhow!("No bars available for {}", pair));
        }
        Ok(data)
    }
}
