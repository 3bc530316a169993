use anyhow::Context;
use clap::Parser;
use formula_context::{
    App, AppConfig, CliArgs, Command, LoggingConfig, MemoryWorkbook, ProbeStatus, RefreshOutcome,
    WorkbookHost, init_logging, open_workbook, settings,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_logging(LoggingConfig::from_env())?;

    let cli = CliArgs::parse();
    let config = AppConfig::from_args(cli.config)?;

    match cli.command {
        Command::Map { workbook } => {
            let host = open_workbook(&workbook)?;
            let mut app = App::with_host(config, host)?;
            match app.start().await {
                RefreshOutcome::Rebuilt(map) => println!("{map}"),
                RefreshOutcome::Failed(error) => return Err(error.into()),
                other => anyhow::bail!("semantic map was not built: {other:?}"),
            }
        }
        Command::Probe => {
            let host = Arc::new(MemoryWorkbook::new());
            let app = App::with_host(config, host)?;
            match app.backend().warm_up().await {
                ProbeStatus::Ready => println!("backend ready at {}", app.backend().api_base()),
                ProbeStatus::Unreachable => {
                    println!("backend unreachable at {}", app.backend().api_base())
                }
            }
        }
        Command::Generate {
            workbook,
            query,
            sheet,
        } => {
            let host = open_workbook(&workbook)?;
            let first_sheet = host
                .worksheets()
                .await
                .context("failed to list worksheets")?
                .into_iter()
                .next()
                .map(|info| info.name)
                .unwrap_or_default();
            let main_sheet = sheet.unwrap_or(first_sheet);

            let mut app = App::with_host(config, host)?;
            if let RefreshOutcome::Failed(error) = app.start().await {
                tracing::warn!(%error, "continuing without a semantic map");
            }
            let formula = app
                .assistant()
                .generate(&query, &main_sheet)
                .await
                .context("formula generation failed")?;
            println!("{formula}");
        }
        Command::SetApiBase { url } => {
            let api_base = settings::set_api_base(&config.settings_store(), url.as_deref());
            println!("API base set to {api_base}");
        }
    }

    Ok(())
}
