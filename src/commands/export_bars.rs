use crate::context::{AppContext, BarQuery};
use crate::models::PairSpec;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(app: &AppContext, pair: &PairSpec, bars: &BarQuery, output_path: &Path) -> Result<()> {
    info!(
        "Generating bar snapshot for {} at {}",
        pair,
        output_path.display()
    );

    let query = BarQuery {
        data_file: None,
        ..bars.clone()
    };
    let market_data = app.market_data(pair, &query).await?;

    market_data.save_to_file(output_path)?;
    info!(
        "Bar snapshot with {} bars successfully written to {}",
        market_data.bars().len(),
        output_path.display()
    );

    Ok(())
}
